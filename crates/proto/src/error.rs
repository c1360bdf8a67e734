//! Errors raised while parsing wire messages and task values

use thiserror::Error;

/// Protocol-level error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not match any known message form
    #[error("Unknown message: {0:?}")]
    UnknownMessage(String),

    /// Task assignment payload could not be split into its fields
    #[error("Malformed task assignment: {0:?}")]
    MalformedTask(String),

    /// Resource list could not be parsed
    #[error("Malformed resource list: {0:?}")]
    MalformedResources(String),

    /// Registration carried no resource ids
    #[error("Registration carries no resources")]
    EmptyResources,

    /// Payoff is not a non-negative integer
    #[error("Invalid payoff: {0:?}")]
    InvalidPayoff(String),

    /// Task fails validation
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Payload is not valid UTF-8
    #[error("Payload is not valid UTF-8")]
    Utf8,
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
