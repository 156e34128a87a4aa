//! AMQP 0-9-1 backend for eventgate
//!
//! Dials broker nodes with `lapin`, fans connection closure out to stream
//! handlers, and consumes one durable queue per request.

mod connection;
mod consumer;

pub use connection::{AmqpConnection, AmqpDialer};
pub use consumer::{AmqpConsumer, AmqpConsumers, AmqpDelivery};
