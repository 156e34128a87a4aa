//! # eventgate
//!
//! Core of a gateway that bridges broker queues to HTTP clients via
//! Server-Sent Events. Every request opens one long-lived stream bound to
//! one queue, named from the request's query parameters or cookies.
//!
//! ## Pieces
//!
//! - [`Connector`] supervises one connection per broker node and hands out
//!   whichever is healthy through a [`ConnectionSupply`]
//! - [`Consumer`] declares the request's queue and yields its deliveries
//! - [`QueuePattern`] resolves the queue name from `${query:key}` and
//!   `${cookie:key}` placeholders
//! - [`EventProducer`] frames message bodies as SSE events
//! - [`Gateway`] serves the stream handler and drains on shutdown
//!
//! Broker backends implement [`Dialer`], [`Connection`] and [`ConsumerFactory`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventgate::{Connector, Gateway, Metrics, QueuePattern};
//!
//! let metrics = Arc::new(Metrics::new());
//! let supply = Connector::new(dialer, nodes, metrics.clone()).spawn(cancel.clone());
//!
//! Gateway::builder()
//!     .address("0.0.0.0:2069".parse()?)
//!     .pattern(QueuePattern::new("${query:id}"))
//!     .consumers(MyConsumers::new(supply))
//!     .metrics(metrics)
//!     .shutdown(cancel)
//!     .build()?
//!     .launch()
//!     .await
//! ```

pub mod broker;
pub mod connector;
pub mod consumer;
mod error;
pub mod event;
pub mod handler;
pub mod metric;
pub mod pattern;
mod server;

// Re-exports
pub use broker::{CloseListener, Connection, Dialer, Listeners};
pub use connector::{ConnectionSupply, Connector};
pub use consumer::{Consumer, ConsumerFactory, Delivery, DeliveryStream};
pub use error::{Error, Result};
pub use event::{EventProducer, Producer, SseEvent};
pub use handler::{GatewayState, ResponseHeader};
pub use metric::{Metric, Metrics, Stats};
pub use pattern::{Pattern, QueuePattern, RequestParams};
pub use server::{Gateway, GatewayBuilder, SHUTDOWN_GRACE};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
