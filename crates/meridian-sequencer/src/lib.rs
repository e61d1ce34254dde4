//! Meridian Sequencer - per-site timestamp authority
//!
//! A [`Sequencer`] issues globally unique timestamps once a transaction's
//! causal dependencies are committed at its site, finalizes them in
//! per-origin FIFO order, and propagates every local commit to peer
//! sequencers until each has acknowledged it.
//!
//! - [`sequencer`]: request handling and clock bookkeeping
//! - [`replication`]: anti-entropy rounds and acknowledgement tracking
//! - [`pending`]: remote commits waiting on their dependencies
//! - [`wire`]: versioned message envelope
//! - [`network`]: the transport seam
//! - [`tasks`]: background loops

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
mod fifo;
pub mod network;
pub mod pending;
pub mod record;
pub mod replication;
pub mod sequencer;
mod state;
pub mod tasks;
pub mod wire;

pub use config::SequencerConfig;
pub use error::SequencerError;
pub use network::{PeerAddress, SequencerNetwork};
pub use pending::ReplicaApplier;
pub use record::{AckSet, CommitRecord};
pub use sequencer::{PersistedClocks, Sequencer};
pub use tasks::SequencerTasks;
pub use wire::{
    deserialize_message, serialize_message, SequencerPayload, SequencerWireMessage,
    SEQUENCER_WIRE_SCHEMA_VERSION,
};
