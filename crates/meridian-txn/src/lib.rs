//! Meridian Txn - snapshot-isolated client transactions
//!
//! [`TransactionHandle`] is the per-transaction state machine reconciling
//! local and global visibility. [`TxnManager`] queues locally committed
//! transactions and promotes them to global commit through a
//! [`SequencerClient`].

#![forbid(unsafe_code)]

pub mod client;
pub mod error;
pub mod handle;
pub mod manager;

pub use client::SequencerClient;
pub use error::TxnError;
pub use handle::{
    CommitListener, FnCommitListener, LoggingCommitListener, TransactionHandle, TxnStatus,
};
pub use manager::{TxnManager, TxnManagerConfig};
