//! Durable queue of pending sync operations.

mod operation;
mod store;

pub use operation::{FailOutcome, NewOperation, OperationStatus, QueueStats, SyncOperation};
pub use store::OperationQueue;
