//! Observable AMQP connection

use std::sync::Arc;

use async_trait::async_trait;
use eventgate::{CloseListener, Connection, Dialer, Error, Listeners, Result};
use lapin::{Channel, ConnectionProperties};
use url::Url;

/// Reply code for a normal, application-initiated close
const REPLY_SUCCESS: u16 = 200;

/// A live `lapin` connection whose closure is fanned out to listeners
pub struct AmqpConnection {
    inner: lapin::Connection,
    listeners: Arc<Listeners>,
}

impl AmqpConnection {
    pub fn new(inner: lapin::Connection) -> Self {
        let listeners = Arc::new(Listeners::new());

        let watcher = listeners.clone();
        inner.on_error(move |err| {
            let signalled = watcher.dispatch(err.to_string());
            tracing::debug!(error = %err, signalled, "broker: connection error");
        });

        Self { inner, listeners }
    }
}

#[async_trait]
impl Connection for AmqpConnection {
    type Channel = Channel;

    async fn channel(&self) -> Result<Channel> {
        if self.listeners.is_closed() {
            return Err(Error::Transport("connection closed".into()));
        }
        self.inner
            .create_channel()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn notify(&self) -> CloseListener {
        self.listeners.notify()
    }

    fn ignore(&self, listener: &CloseListener) {
        self.listeners.ignore(listener)
    }

    fn is_open(&self) -> bool {
        !self.listeners.is_closed() && self.inner.status().connected()
    }

    async fn close(&self) -> Result<()> {
        let result = self
            .inner
            .close(REPLY_SUCCESS, "closed by application")
            .await
            .map_err(|e| Error::Transport(e.to_string()));
        self.listeners.dispatch("closed by application");
        result
    }
}

/// Dials broker nodes with the default `lapin` connection properties
#[derive(Clone, Default)]
pub struct AmqpDialer {
    properties: ConnectionProperties,
}

impl AmqpDialer {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

#[async_trait]
impl Dialer for AmqpDialer {
    type Connection = AmqpConnection;

    async fn dial(&self, node: &Url) -> Result<AmqpConnection> {
        let inner = lapin::Connection::connect(node.as_str(), self.properties.clone())
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(AmqpConnection::new(inner))
    }
}
