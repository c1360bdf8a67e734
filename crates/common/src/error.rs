//! Common error types for Uplink
//!
//! This module defines all error types used across the coordinator and
//! worker. Protocol parsing errors from `uplink-proto` convert into
//! [`UplinkError::Protocol`].

use crate::WorkerId;
use std::net::AddrParseError;
use thiserror::Error;
use uplink_proto::ProtocolError;

/// Main error type for Uplink
#[derive(Error, Debug)]
pub enum UplinkError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or unexpected wire message
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Handshake or registration exchange failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Task rejected at the producer boundary
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// A pending task with the same name already exists
    #[error("Duplicate task: {0}")]
    DuplicateTask(String),

    /// Pending queue full (backpressure)
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Worker is not connected
    #[error("Unknown worker: {0}")]
    UnknownWorker(WorkerId),

    /// Worker outbox has no room left in this pass
    #[error("Worker busy: {0}")]
    WorkerBusy(WorkerId),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AddrParseError> for UplinkError {
    fn from(err: AddrParseError) -> Self {
        UplinkError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for UplinkError {
    fn from(err: config::ConfigError) -> Self {
        UplinkError::Config(err.to_string())
    }
}

impl UplinkError {
    /// Whether the error ends the session it occurred on
    ///
    /// Transport failures, timeouts and failed handshakes are fatal. Malformed
    /// messages and rejected tasks are logged and the session keeps reading.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            UplinkError::Io(_)
                | UplinkError::Connection(_)
                | UplinkError::Timeout(_)
                | UplinkError::Handshake(_)
        )
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        UplinkError::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        UplinkError::Connection(msg.into())
    }

    /// Create a handshake error
    pub fn handshake(msg: impl Into<String>) -> Self {
        UplinkError::Handshake(msg.into())
    }

    /// Create an invalid task error
    pub fn invalid_task(msg: impl Into<String>) -> Self {
        UplinkError::InvalidTask(msg.into())
    }

    /// Create a queue full error
    pub fn queue_full(msg: impl Into<String>) -> Self {
        UplinkError::QueueFull(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        UplinkError::Timeout(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        UplinkError::Internal(msg.into())
    }
}

/// Result type alias for Uplink operations
pub type Result<T> = std::result::Result<T, UplinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_fatal_classification() {
        let io = UplinkError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(io.is_session_fatal());
        assert!(UplinkError::timeout("write").is_session_fatal());
        assert!(UplinkError::handshake("bad pong").is_session_fatal());

        assert!(!UplinkError::Protocol(ProtocolError::EmptyResources).is_session_fatal());
        assert!(!UplinkError::invalid_task("no resources").is_session_fatal());
    }

    #[test]
    fn test_protocol_error_conversion() {
        let err: UplinkError = ProtocolError::InvalidPayoff("x".to_string()).into();
        assert!(matches!(err, UplinkError::Protocol(_)));
        assert!(err.to_string().contains("Invalid payoff"));
    }
}
