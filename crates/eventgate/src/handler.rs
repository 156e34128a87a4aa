//! HTTP handler that turns one request into one queue-backed SSE stream

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consumer::{Consumer, ConsumerFactory, Delivery, DeliveryStream};
use crate::error::{Error, Result};
use crate::event::{Producer, BANNER};
use crate::metric::{Metric, TaskGuard};
use crate::pattern::{Pattern, RequestParams};

/// Diagnostic header carrying the cause of a failed request
pub const STATUS_REASON: &str = "x-status-reason";

/// Headers applied verbatim to responses
#[derive(Debug, Clone, Default)]
pub struct ResponseHeader {
    /// Applied to every response
    pub cors: HeaderMap,
    /// Applied to stream responses
    pub sse: HeaderMap,
}

impl ResponseHeader {
    /// Build from configured name/value maps
    ///
    /// `Transfer-Encoding` is skipped: the HTTP server owns message framing.
    pub fn from_maps(
        cors: &BTreeMap<String, String>,
        sse: &BTreeMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            cors: header_map(cors)?,
            sse: header_map(sse)?,
        })
    }
}

fn header_map(map: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in map {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("header name {name:?}: {e}")))?;
        if name == axum::http::header::TRANSFER_ENCODING {
            continue;
        }
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn set_headers(target: &mut HeaderMap, headers: &HeaderMap) {
    for (name, value) in headers {
        target.insert(name.clone(), value.clone());
    }
}

/// Shared state for the stream handler
#[derive(Clone)]
pub struct GatewayState {
    pub consumers: Arc<dyn ConsumerFactory>,
    pub pattern: Arc<dyn Pattern>,
    pub producer: Arc<dyn Producer>,
    pub header: Arc<ResponseHeader>,
    pub metric: Arc<dyn Metric>,
    /// Cancelled when the server starts draining
    pub shutdown: CancellationToken,
}

impl GatewayState {
    fn send_status(&self, status: StatusCode, err: Option<&Error>) -> Response {
        let mut response = status.into_response();

        if status.is_client_error() || status.is_server_error() {
            let reason = err.map(ToString::to_string).unwrap_or_default();
            if let Some(value) = reason_header(&reason) {
                response.headers_mut().insert(STATUS_REASON, value);
            }
            warn!(status = status.as_u16(), reason = %reason, "server: status");
        }

        set_headers(response.headers_mut(), &self.header.cors);
        response
    }
}

fn reason_header(reason: &str) -> Option<HeaderValue> {
    if reason.is_empty() {
        return None;
    }
    let printable: String = reason
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    HeaderValue::from_str(&printable).ok()
}

/// Stream endpoint: one request, one queue, one SSE stream
pub async fn handle(
    State(state): State<GatewayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method == Method::OPTIONS {
        return state.send_status(StatusCode::NO_CONTENT, None);
    }
    if method != Method::GET {
        return state.send_status(StatusCode::METHOD_NOT_ALLOWED, None);
    }

    let params = RequestParams::from_request(&uri, &headers);
    let queue = match state.pattern.apply(&params) {
        Ok(queue) => queue,
        Err(e) => return state.send_status(StatusCode::SERVICE_UNAVAILABLE, Some(&e)),
    };

    let mut consumer = state.consumers.consumer().await;
    let deliveries = match consumer.consume(&queue).await {
        Ok(deliveries) => deliveries,
        Err(e) => {
            if let Err(close) = consumer.close().await {
                debug!(queue = %queue, error = %close, "consumer close failed");
            }
            return state.send_status(StatusCode::SERVICE_UNAVAILABLE, Some(&e));
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(1);
    let _ = tx.try_send(Bytes::from_static(BANNER.as_bytes()));

    let stream_id = uuid::Uuid::new_v4().to_string();
    info!(queue = %queue, stream_id = %stream_id, "Stream opened");

    let session = StreamSession {
        queue,
        stream_id,
        producer: state.producer.clone(),
        metric: state.metric.clone(),
        shutdown: state.shutdown.clone(),
    };
    tokio::spawn(async move {
        let mut sink = ChannelSink { tx };
        session.run(consumer, deliveries, &mut sink).await;
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = Response::new(body);
    set_headers(response.headers_mut(), &state.header.sse);
    set_headers(response.headers_mut(), &state.header.cors);
    response
}

/// Where framed events are written
#[async_trait]
pub trait EventSink: Send {
    /// Write and flush one frame
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Resolves once the client is gone
    async fn closed(&self);
}

/// Sink feeding the streaming response body
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::Write("client stream closed".to_string()))
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Why a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The broker connection closed
    BrokerClosed(String),
    /// The client went away
    ClientGone,
    /// The delivery stream ended (channel closed)
    DeliveriesEnded,
    /// The server is draining
    Shutdown,
}

enum Step {
    Deliver(Box<dyn Delivery>),
    Stop(Termination),
}

/// The streaming half of one request
pub struct StreamSession {
    pub queue: String,
    pub stream_id: String,
    pub producer: Arc<dyn Producer>,
    pub metric: Arc<dyn Metric>,
    pub shutdown: CancellationToken,
}

impl StreamSession {
    /// Forward deliveries to `sink` until a terminal condition, then release the consumer
    pub async fn run<S: EventSink>(
        self,
        mut consumer: Box<dyn Consumer>,
        mut deliveries: DeliveryStream,
        sink: &mut S,
    ) -> Termination {
        let _task = TaskGuard::new(self.metric.clone());
        let mut broker_close = consumer.notify();

        let termination = loop {
            let step = tokio::select! {
                delivery = deliveries.next() => match delivery {
                    Some(delivery) => Step::Deliver(delivery),
                    None => Step::Stop(Termination::DeliveriesEnded),
                },
                reason = broker_close.closed() => Step::Stop(Termination::BrokerClosed(reason)),
                _ = sink.closed() => Step::Stop(Termination::ClientGone),
                _ = self.shutdown.cancelled() => Step::Stop(Termination::Shutdown),
            };

            let delivery = match step {
                Step::Deliver(delivery) => delivery,
                Step::Stop(termination) => break termination,
            };

            let frame = self.producer.server_sent_event(delivery.body()).to_frame();
            if let Err(e) = sink.send(Bytes::from(frame)).await {
                // left unacknowledged, the broker redelivers it
                debug!(queue = %self.queue, stream_id = %self.stream_id, error = %e, "Delivery not written");
                continue;
            }

            match delivery.ack().await {
                Ok(()) => self.metric.inc_delivery_count(),
                Err(e) => warn!(queue = %self.queue, stream_id = %self.stream_id, error = %e, "Ack failed"),
            }
        };

        consumer.ignore(&broker_close);
        if let Err(e) = consumer.close().await {
            debug!(queue = %self.queue, error = %e, "consumer close failed");
        }

        info!(
            queue = %self.queue,
            stream_id = %self.stream_id,
            termination = ?termination,
            "Stream closed"
        );
        termination
    }
}
