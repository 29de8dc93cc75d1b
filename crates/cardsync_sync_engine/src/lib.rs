//! # CardSync Sync Engine
//!
//! Pushes the local operation queue to the sync server.
//!
//! This crate provides:
//! - Coalescing of queued operations into one net operation per entity
//! - The drain cycle (dequeue → coalesce → submit → apply results)
//! - Conflict handling through [`ConflictPolicy`]
//! - Retry with exponential backoff, paused while offline
//! - HTTP transport abstraction and a scripted mock transport
//! - A tokio-driven auto-sync loop
//!
//! ## Key Invariants
//!
//! - Operations on one entity reach the server in enqueue order
//! - At most one batch is in flight per engine
//! - Connectivity failures never count as retries
//! - A crash mid-cycle replays unconfirmed operations; the server dedupes
//!   them by operation id

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod coalesce;
mod config;
mod engine;
mod error;
mod http;
mod observer;
mod scheduler;
mod transport;

pub use coalesce::{coalesce, CoalescedOperation};
pub use config::{RetryConfig, SyncConfig};
pub use engine::{DrainSummary, SyncEngine, SyncState, SyncStats};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer};
pub use observer::{NoopObserver, RecordingObserver, SyncEvent, SyncObserver};
pub use scheduler::AutoSync;
pub use transport::{MockReply, MockTransport, SyncTransport};

pub use cardsync_sync_protocol::{ConflictPolicy, ConflictResolution, ResolutionStrategy};
