//! Meridian Effects - handlers for the core effect traits
//!
//! Stateless or self-contained implementations of the traits in
//! `meridian_core::effects`. Test doubles that need scripted behaviour (manual
//! time, in-memory peer networks) live in `meridian-testkit`.

#![forbid(unsafe_code)]

/// Storage handlers
pub mod storage;

/// System time handler
pub mod time;

pub use storage::{FilesystemStorageHandler, MemoryStorageHandler, NullStorageHandler};
pub use time::SystemTimeHandler;
