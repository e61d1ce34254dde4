//! Meridian Core - causal ordering primitives
//!
//! Types and effect interfaces shared by transaction handles, the client
//! transaction manager and sequencers.
//!
//! - [`time`]: `Timestamp`, `TripleTimestamp` and their generators
//! - [`clock`]: `CausalityClock`, a version vector with exceptions
//! - [`updates`]: per-object operation groups produced by transactions
//! - [`crdt`]: the contract replicated objects satisfy
//! - [`messages`]: sequencer request and reply bodies
//! - [`effects`]: storage, network and time seams

#![forbid(unsafe_code)]

/// Causal history representation and algebra
pub mod clock;

/// Configuration trait and override helpers
pub mod config;

/// Replicated object contract
pub mod crdt;

/// Pure effect interfaces (no implementations)
pub mod effects;

/// Unified error handling
pub mod errors;

/// Site and object identifiers
pub mod identifiers;

/// Sequencer request and reply bodies
pub mod messages;

/// Canonical binary encoding
pub mod serialization;

/// Event identity primitives
pub mod time;

/// Operation groups
pub mod updates;

pub use clock::{CausalityClock, CmpClock};
pub use config::MeridianConfig;
pub use crdt::{CrdtError, ReplicatedObject};
pub use errors::MeridianError;
pub use identifiers::{ObjectId, SiteId};
pub use time::{
    IncrementalTimestampGenerator, IncrementalTripleTimestampGenerator, Timestamp,
    TripleTimestamp,
};
pub use updates::{ObjectUpdatesGroup, UpdateOperation};
