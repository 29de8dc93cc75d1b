//! # CardSync Core
//!
//! The on-device half of CardSync: a journaled entity store, typed
//! repositories, the durable Sync Operation Queue and schema migrations.
//!
//! Every local write goes through a [`Repository`], which updates the
//! [`EntityStore`] and appends a [`SyncOperation`] to the
//! [`OperationQueue`]. The sync engine later drains the queue to the server.
//!
//! ## Example
//!
//! ```rust
//! use cardsync_core::{CustomDeck, LocalDatabase, OperationStatus, StoreConfig};
//!
//! let db = LocalDatabase::open_in_memory(StoreConfig::default()).unwrap();
//! let deck = CustomDeck {
//!     id: "deck-1".into(),
//!     name: "Verbs".into(),
//!     description: None,
//!     language: "es".into(),
//!     created_at_ms: 0,
//! };
//!
//! let op = db.repository::<CustomDeck>().save(&deck).unwrap();
//! assert_eq!(op.status, OperationStatus::Pending);
//! assert_eq!(db.queue().stats().pending, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod codec;
mod config;
mod database;
#[cfg(feature = "std")]
mod dir;
mod entity;
mod error;
pub mod migration;
mod queue;
mod repository;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RetryConfig, StoreConfig, DEFAULT_OWNER};
pub use database::LocalDatabase;
#[cfg(feature = "std")]
pub use dir::StoreDir;
pub use entity::{
    new_entity_id, CustomDeck, CustomFlashcard, EntityRecord, EntityStore, Flashcard, GameResult,
    HistoryEntry, QuizResult, SpacedRepetition, StoreTransaction, SyncEntity,
};
pub use error::{CoreError, CoreResult};
pub use migration::{MigrationManager, MigrationRunResult, CURRENT_SCHEMA_VERSION};
pub use queue::{
    FailOutcome, NewOperation, OperationQueue, OperationStatus, QueueStats, SyncOperation,
};
pub use repository::Repository;

pub use cardsync_sync_protocol::{EntityKey, EntityType, OperationKind, Payload};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
