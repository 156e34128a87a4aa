//! Gateway builder and runner

use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{response::Json, routing::get, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::consumer::ConsumerFactory;
use crate::error::{Error, Result};
use crate::event::{EventProducer, Producer};
use crate::handler::{self, GatewayState, ResponseHeader};
use crate::metric::Metrics;
use crate::pattern::Pattern;

/// Time the server gets to drain open connections on shutdown
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Namespace of the metrics snapshot on `/debug/vars`
pub const METRICS_NAMESPACE: &str = "eventgate";

type Served = JoinHandle<std::io::Result<()>>;

/// HTTP listener lifecycle for the stream handler
pub struct Gateway {
    address: SocketAddr,
    grace: Duration,
    router: Router,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Build the router: stream handler on every path, plus health and metrics
    pub fn router(state: GatewayState, metrics: Arc<Metrics>) -> Router {
        Router::new()
            .route("/health", get(|| async { "OK" }))
            .route(
                "/debug/vars",
                get(move || {
                    let metrics = metrics.clone();
                    async move { Json(BTreeMap::from([(METRICS_NAMESPACE, metrics.report())])) }
                }),
            )
            .method_not_allowed_fallback(handler::handle)
            .fallback(handler::handle)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Token that stops the gateway when cancelled
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the listener exits, a signal arrives or shutdown is requested
    pub async fn launch(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.address).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: tokio::net::TcpListener) -> Result<()> {
        let address = listener.local_addr()?;
        info!(address = %address, "server: listening");

        let graceful = self.shutdown.clone();
        let mut served: Served = tokio::spawn(
            axum::serve(listener, self.router.clone())
                .with_graceful_shutdown(graceful.cancelled_owned())
                .into_future(),
        );

        tokio::select! {
            result = &mut served => return exited(address, result),
            signal = shutdown_signal() => info!(signal, "server: caught signal"),
            _ = self.shutdown.cancelled() => info!("server: shutdown requested"),
        }

        self.drain(address, served).await;
        Ok(())
    }

    /// Drain with a bounded grace period; never fails
    async fn drain(&self, address: SocketAddr, mut served: Served) {
        self.shutdown.cancel();

        match tokio::time::timeout(self.grace, &mut served).await {
            Ok(result) => {
                if let Err(e) = exited(address, result) {
                    error!(error = %e, "server: shutdown");
                }
            }
            Err(_) => {
                let e = Error::ShutdownTimeout(self.grace);
                error!(error = %e, "server: shutdown");
                served.abort();
            }
        }
    }
}

fn exited(
    address: SocketAddr,
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => {
            info!(address = %address, "server: closed");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "server: listener failed");
            Err(Error::Io(e))
        }
        Err(e) => {
            error!(error = %e, "server: listener task failed");
            Err(Error::Server(e.to_string()))
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    address: SocketAddr,
    grace: Duration,
    pattern: Option<Arc<dyn Pattern>>,
    consumers: Option<Arc<dyn ConsumerFactory>>,
    producer: Arc<dyn Producer>,
    header: ResponseHeader,
    metrics: Option<Arc<Metrics>>,
    shutdown: CancellationToken,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 2069)),
            grace: SHUTDOWN_GRACE,
            pattern: None,
            consumers: None,
            producer: Arc::new(EventProducer),
            header: ResponseHeader::default(),
            metrics: None,
            shutdown: CancellationToken::new(),
        }
    }
}

impl GatewayBuilder {
    /// Set the bind address
    pub fn address(mut self, address: SocketAddr) -> Self {
        self.address = address;
        self
    }

    /// Set the shutdown grace period
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set the queue-name pattern
    pub fn pattern(mut self, pattern: impl Pattern) -> Self {
        self.pattern = Some(Arc::new(pattern));
        self
    }

    /// Set the consumer factory
    pub fn consumers(mut self, consumers: impl ConsumerFactory) -> Self {
        self.consumers = Some(Arc::new(consumers));
        self
    }

    /// Replace the event framer
    pub fn producer(mut self, producer: impl Producer) -> Self {
        self.producer = Arc::new(producer);
        self
    }

    /// Set the CORS and SSE response headers
    pub fn header(mut self, header: ResponseHeader) -> Self {
        self.header = header;
        self
    }

    /// Set the metrics aggregator
    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a cancellation token; cancelling it shuts the gateway down
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Build the gateway
    pub fn build(self) -> Result<Gateway> {
        let pattern = self
            .pattern
            .ok_or_else(|| Error::Config("pattern is required".into()))?;
        let consumers = self
            .consumers
            .ok_or_else(|| Error::Config("consumer factory is required".into()))?;
        let metrics = self.metrics.unwrap_or_default();

        let state = GatewayState {
            consumers,
            pattern,
            producer: self.producer,
            header: Arc::new(self.header),
            metric: metrics.clone(),
            shutdown: self.shutdown.clone(),
        };

        Ok(Gateway {
            address: self.address,
            grace: self.grace,
            router: Gateway::router(state, metrics),
            shutdown: self.shutdown,
        })
    }
}
