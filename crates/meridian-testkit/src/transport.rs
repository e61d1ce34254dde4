//! In-process transport between sequencers.

use async_trait::async_trait;
use meridian_core::effects::NetworkError;
use meridian_sequencer::{
    deserialize_message, serialize_message, PeerAddress, Sequencer, SequencerNetwork,
    SequencerWireMessage,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Delivers messages by calling the target sequencer directly.
///
/// Messages are encoded and decoded on the way so every exchange exercises
/// the wire format. Partitioned addresses refuse delivery.
#[derive(Default)]
pub struct InMemoryNetwork {
    endpoints: RwLock<HashMap<PeerAddress, Weak<Sequencer>>>,
    partitioned: RwLock<HashSet<PeerAddress>>,
    delivered: RwLock<HashMap<PeerAddress, usize>>,
}

impl InMemoryNetwork {
    /// Network with no endpoints registered
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `sequencer` reachable at `address`
    pub fn register(&self, address: impl Into<PeerAddress>, sequencer: &Arc<Sequencer>) {
        self.endpoints
            .write()
            .insert(address.into(), Arc::downgrade(sequencer));
    }

    /// Refuse every message to `address`
    pub fn partition(&self, address: impl Into<PeerAddress>) {
        self.partitioned.write().insert(address.into());
    }

    /// Deliver to `address` again
    pub fn heal(&self, address: impl Into<PeerAddress>) {
        self.partitioned.write().remove(&address.into());
    }

    /// Messages delivered to `address` so far
    pub fn delivered_to(&self, address: impl Into<PeerAddress>) -> usize {
        self.delivered
            .read()
            .get(&address.into())
            .copied()
            .unwrap_or(0)
    }

    async fn deliver(
        &self,
        to: &PeerAddress,
        message: SequencerWireMessage,
    ) -> Result<Option<SequencerWireMessage>, NetworkError> {
        if self.partitioned.read().contains(to) {
            return Err(NetworkError::send_failed(to.as_str(), "partitioned"));
        }
        let target = self
            .endpoints
            .read()
            .get(to)
            .and_then(Weak::upgrade)
            .ok_or_else(|| NetworkError::UnknownPeer {
                peer: to.to_string(),
            })?;

        let decoded = deserialize_message(&serialize_message(&message)?)?;
        *self.delivered.write().entry(to.clone()).or_default() += 1;

        match target.handle_message(decoded).await {
            Some(reply) => Ok(Some(deserialize_message(&serialize_message(&reply)?)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SequencerNetwork for InMemoryNetwork {
    async fn request(
        &self,
        to: &PeerAddress,
        message: SequencerWireMessage,
    ) -> Result<SequencerWireMessage, NetworkError> {
        self.deliver(to, message)
            .await?
            .ok_or_else(|| NetworkError::NoReply {
                peer: to.to_string(),
            })
    }

    async fn send(&self, to: &PeerAddress, message: SequencerWireMessage) -> Result<(), NetworkError> {
        self.deliver(to, message).await.map(|_| ())
    }
}
