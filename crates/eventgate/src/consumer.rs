//! Queue consumer seam between the stream handler and a broker backend

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::broker::CloseListener;
use crate::error::Result;

/// One message read from a queue, awaiting acknowledgment
#[async_trait]
pub trait Delivery: Send {
    /// Raw message body
    fn body(&self) -> &[u8];

    /// Acknowledge this single delivery
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// Deliveries of one consumed queue; ends when the channel goes away
pub type DeliveryStream = BoxStream<'static, Box<dyn Delivery>>;

/// Per-request queue consumer
///
/// Owns one channel derived from a shared broker connection. Closing the
/// consumer closes that channel only, never the connection.
#[async_trait]
pub trait Consumer: Send {
    /// Declare `queue` and start consuming it with manual acknowledgment
    ///
    /// Fails with [`Error::QueueBusy`](crate::Error::QueueBusy) if the queue
    /// already has a consumer.
    async fn consume(&mut self, queue: &str) -> Result<DeliveryStream>;

    /// Register for closure of the underlying connection
    fn notify(&self) -> CloseListener;

    /// Deregister a closure listener
    fn ignore(&self, listener: &CloseListener);

    /// Close the derived channel; idempotent
    async fn close(&mut self) -> Result<()>;
}

/// Creates a fresh consumer, bound to a healthy connection, per request
#[async_trait]
pub trait ConsumerFactory: Send + Sync + 'static {
    async fn consumer(&self) -> Box<dyn Consumer>;
}
