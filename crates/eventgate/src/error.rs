//! Error types for eventgate

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in eventgate
#[derive(Error, Debug)]
pub enum Error {
    /// Dialing a broker node failed or the transport is already closed
    #[error("broker: {0}")]
    Transport(String),

    /// Deriving, declaring or configuring a channel failed
    #[error("channel: {0}")]
    Channel(String),

    /// The queue already has an active consumer
    #[error("server: max consumers exceeded")]
    QueueBusy,

    /// A placeholder could not be resolved from the request
    #[error("request parameter(s) missing")]
    MissingParameter,

    /// The resolved queue name is empty, too long or reserved
    #[error("invalid queue name")]
    InvalidQueueName,

    /// Writing to the client stream failed
    #[error("write: {0}")]
    Write(String),

    /// Graceful drain did not finish in time
    #[error("server: shutdown not completed within {0:?}")]
    ShutdownTimeout(Duration),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server errors
    #[error("Server error: {0}")]
    Server(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
