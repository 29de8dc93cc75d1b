//! # CardSync Sync Server
//!
//! Reference sync server for CardSync.
//!
//! This crate provides:
//! - The `POST /sync/batch` endpoint as an in-process handler
//! - An authoritative in-memory entity store with version counters
//! - Replay detection by operation id
//! - Outage and failure switches for exercising clients
//!
//! # Protocol
//!
//! Each batch is applied in order under one lock. Every operation gets a
//! result: `accepted` with the new version, `rejected` with the server's
//! state when the client's base version is stale, or `error`.
//!
//! An HTTP frontend is out of scope; tests route requests to
//! [`SyncServer::handle_post`] directly.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;
mod store;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use server::SyncServer;
pub use store::{ServerStore, StoredEntity};
