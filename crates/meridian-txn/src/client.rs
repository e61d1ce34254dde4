//! Seam between the transaction manager and a sequencer.

use crate::error::TxnError;
use async_trait::async_trait;
use meridian_core::messages::{
    CommitTsReply, CommitTsRequest, GenerateTimestampReply, GenerateTimestampRequest,
    LatestKnownClockReply,
};

/// Request/reply access to the sequencer of the client's data center.
///
/// `generate_timestamp` may take arbitrarily long: the sequencer holds the
/// request until the dependency clock is satisfied.
#[async_trait]
pub trait SequencerClient: Send + Sync {
    /// Obtain a global timestamp for a transaction
    async fn generate_timestamp(
        &self,
        request: GenerateTimestampRequest,
    ) -> Result<GenerateTimestampReply, TxnError>;

    /// Finalize a timestamp obtained from [`SequencerClient::generate_timestamp`]
    async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, TxnError>;

    /// Read the sequencer's current and stable clocks
    async fn latest_known_clock(&self) -> Result<LatestKnownClockReply, TxnError>;
}
