//! Meridian Testkit - fixtures for deterministic sequencer tests
//!
//! Everything here runs in-process: a manually advanced clock, an in-memory
//! transport that still round-trips every message through the wire codec,
//! client adapters for the transaction manager, and small replicated objects.

#![allow(clippy::unwrap_used, clippy::expect_used)]

pub mod client;
pub mod fixtures;
pub mod foundation;
pub mod strategies;
pub mod time;
pub mod transport;

pub use client::{LocalSequencerClient, WireSequencerClient};
pub use fixtures::{CounterObject, CounterReplica, RecordingApplier, SequencerCluster, TestSite};
pub use foundation::{init_test_tracing, wait_until};
pub use time::ManualTime;
pub use transport::InMemoryNetwork;
