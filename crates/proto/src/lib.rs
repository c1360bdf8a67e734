//! Uplink wire protocol
//!
//! Text messages exchanged between the ground station (coordinator) and
//! satellites (workers), plus the [`Task`] value both sides agree on.

pub mod error;
pub mod framing;
pub mod message;
pub mod task;

pub use error::{ProtocolError, Result};
pub use framing::{decode_bytes, read_payload, write_message, DEFAULT_READ_BUFFER_SIZE};
pub use message::Message;
pub use task::Task;
