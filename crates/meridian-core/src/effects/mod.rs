//! Effect traits the sequencing core depends on.
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `meridian-effects` (production), `meridian-testkit` (tests)
//! - **Usage**: sequencer durability, peer transport errors, lease and backoff timing
//!
//! Traits here carry no state. Handlers decide durability and time source.

pub mod network;
pub mod storage;
pub mod time;

pub use network::NetworkError;
pub use storage::{StorageEffects, StorageError};
pub use time::PhysicalTimeEffects;
