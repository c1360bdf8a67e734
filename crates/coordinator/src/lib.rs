//! Uplink ground station
//!
//! Accepts satellite (worker) connections, indexes the resources they
//! declare and assigns queued tasks with a greedy payoff-per-resource pass.

pub mod console;
pub mod dispatch;
pub mod resource_index;
pub mod server;
pub mod session;
pub mod station;
pub mod task_queue;

pub use console::{Command, Console};
pub use dispatch::{Assignment, DispatchReport, Notifier};
pub use resource_index::ResourceIndex;
pub use server::CoordinatorServer;
pub use session::WorkerSession;
pub use station::{GroundStation, SessionLink, SessionState, WorkerSummary};
pub use task_queue::TaskQueue;
