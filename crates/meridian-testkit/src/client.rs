//! [`SequencerClient`] adapters for driving a [`TxnManager`](meridian_txn::TxnManager)
//! against real sequencers.

use async_trait::async_trait;
use meridian_core::messages::{
    CommitTsReply, CommitTsRequest, GenerateTimestampReply, GenerateTimestampRequest,
    LatestKnownClockReply, LatestKnownClockRequest,
};
use meridian_sequencer::{
    PeerAddress, Sequencer, SequencerNetwork, SequencerPayload, SequencerWireMessage,
};
use meridian_txn::{SequencerClient, TxnError};
use std::sync::Arc;

/// Calls a sequencer in the same process.
pub struct LocalSequencerClient {
    sequencer: Arc<Sequencer>,
}

impl LocalSequencerClient {
    /// Client calling `sequencer` directly
    pub fn new(sequencer: Arc<Sequencer>) -> Arc<Self> {
        Arc::new(Self { sequencer })
    }
}

#[async_trait]
impl SequencerClient for LocalSequencerClient {
    async fn generate_timestamp(
        &self,
        request: GenerateTimestampRequest,
    ) -> Result<GenerateTimestampReply, TxnError> {
        self.sequencer
            .generate_timestamp(request)
            .await
            .map_err(|e| TxnError::sequencer(e.to_string()))
    }

    async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, TxnError> {
        self.sequencer
            .commit_ts(request)
            .await
            .map_err(|e| TxnError::sequencer(e.to_string()))
    }

    async fn latest_known_clock(&self) -> Result<LatestKnownClockReply, TxnError> {
        self.sequencer
            .latest_known_clock()
            .map_err(|e| TxnError::sequencer(e.to_string()))
    }
}

/// Reaches a sequencer through a [`SequencerNetwork`].
pub struct WireSequencerClient {
    network: Arc<dyn SequencerNetwork>,
    sequencer: PeerAddress,
}

impl WireSequencerClient {
    /// Client for the sequencer listening at `sequencer`
    pub fn new(network: Arc<dyn SequencerNetwork>, sequencer: impl Into<PeerAddress>) -> Arc<Self> {
        Arc::new(Self {
            network,
            sequencer: sequencer.into(),
        })
    }

    async fn call(&self, payload: SequencerPayload) -> Result<SequencerPayload, TxnError> {
        self.network
            .request(&self.sequencer, SequencerWireMessage::new(payload))
            .await
            .map(|reply| reply.payload)
            .map_err(|e| TxnError::sequencer(e.to_string()))
    }
}

fn unexpected(payload: &SequencerPayload) -> TxnError {
    TxnError::sequencer(format!("unexpected reply {}", payload.kind()))
}

#[async_trait]
impl SequencerClient for WireSequencerClient {
    async fn generate_timestamp(
        &self,
        request: GenerateTimestampRequest,
    ) -> Result<GenerateTimestampReply, TxnError> {
        match self.call(SequencerPayload::GenerateTimestamp(request)).await? {
            SequencerPayload::GenerateTimestampReply(reply) => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }

    async fn commit_ts(&self, request: CommitTsRequest) -> Result<CommitTsReply, TxnError> {
        match self.call(SequencerPayload::CommitTs(request)).await? {
            SequencerPayload::CommitTsReply(reply) => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }

    async fn latest_known_clock(&self) -> Result<LatestKnownClockReply, TxnError> {
        match self
            .call(SequencerPayload::LatestKnownClock(LatestKnownClockRequest {}))
            .await?
        {
            SequencerPayload::LatestKnownClockReply(reply) => Ok(reply),
            other => Err(unexpected(&other)),
        }
    }
}
