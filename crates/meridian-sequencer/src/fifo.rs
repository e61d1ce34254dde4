//! Per-origin FIFO of commits waiting to be applied.
//!
//! Items are keyed by origin site and counter; only the head of each origin's
//! queue is ever offered for delivery, so an origin's commits leave in strictly
//! increasing counter order.

use meridian_core::{SiteId, Timestamp};
use std::collections::BTreeMap;

#[derive(Debug)]
pub(crate) struct FifoQueues<T> {
    queues: BTreeMap<SiteId, BTreeMap<(i64, u64), (Timestamp, T)>>,
    // Tie-breaker so a retried counter queues behind the first attempt
    sequence: u64,
}

impl<T> Default for FifoQueues<T> {
    fn default() -> Self {
        Self {
            queues: BTreeMap::new(),
            sequence: 0,
        }
    }
}

impl<T> FifoQueues<T> {
    pub(crate) fn offer(&mut self, ts: &Timestamp, item: T) {
        self.sequence += 1;
        self.queues
            .entry(ts.site_id().clone())
            .or_default()
            .insert((ts.counter(), self.sequence), (ts.clone(), item));
    }

    /// Remove the first queue head accepted by `deliverable`.
    pub(crate) fn pop_deliverable<F>(&mut self, mut deliverable: F) -> Option<(Timestamp, T)>
    where
        F: FnMut(&Timestamp, &T) -> bool,
    {
        let mut found = None;
        for (site, queue) in &self.queues {
            if let Some((key, (ts, item))) = queue.first_key_value() {
                if deliverable(ts, item) {
                    found = Some((site.clone(), *key));
                    break;
                }
            }
        }

        let (site, key) = found?;
        let queue = self.queues.get_mut(&site)?;
        let item = queue.remove(&key);
        if queue.is_empty() {
            self.queues.remove(&site);
        }
        item
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.values().map(BTreeMap::len).sum()
    }
}
