//! # CardSync Storage
//!
//! Storage backends and the record journal used by the CardSync local store.
//!
//! Backends are **opaque byte stores**: they append, read, sync and truncate
//! bytes and know nothing about entities or sync operations. The [`Journal`]
//! adds framing on top of a backend: every record is written with a magic
//! marker, a length and a CRC32 so a torn write at the tail can be detected
//! and discarded when the journal is reopened.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests; handles can be shared to simulate a restart
//! - [`FileBackend`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use cardsync_storage::{InMemoryBackend, Journal};
//!
//! let backend = InMemoryBackend::new();
//! let (mut journal, records) = Journal::open(Box::new(backend.share())).unwrap();
//! assert!(records.is_empty());
//! journal.append(b"queued op").unwrap();
//!
//! let (_journal, records) = Journal::open(Box::new(backend)).unwrap();
//! assert_eq!(records, vec![b"queued op".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod journal;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use journal::{compute_crc32, Journal, JOURNAL_MAGIC, RECORD_HEADER_LEN};
pub use memory::InMemoryBackend;
