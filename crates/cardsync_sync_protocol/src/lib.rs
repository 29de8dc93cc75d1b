//! # CardSync Sync Protocol
//!
//! Pure protocol types shared by the client store, the sync engine and the
//! reference server:
//!
//! - [`EntityType`] / [`OperationKind`] / [`EntityKey`]
//! - [`Payload`], the opaque JSON snapshot of an entity
//! - the `POST /sync/batch` messages ([`BatchRequest`], [`BatchResponse`])
//! - the deterministic conflict policy ([`ConflictPolicy`], [`resolve`])
//!
//! This crate performs no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod entity;
mod error;
mod messages;
mod payload;

pub use conflict::{resolve, ConflictPolicy, ConflictResolution, ConflictSide, ResolutionStrategy};
pub use entity::{EntityKey, EntityType, OperationKind};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    BatchRequest, BatchResponse, ConflictData, OperationResult, ResultStatus, WireOperation,
    BATCH_ENDPOINT,
};
pub use payload::Payload;
