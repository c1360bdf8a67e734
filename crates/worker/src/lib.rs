//! Uplink Worker
//!
//! A satellite: connects to the ground station, declares the resources it
//! supplies and executes the tasks assigned to it.

pub mod client;
pub mod hook;
pub mod ledger;

pub use client::{ClientState, ShutdownHandle, WorkerClient};
pub use hook::{ExecutionHook, LoggingHook};
pub use ledger::ResourceLedger;
