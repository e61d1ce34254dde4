//! Clock bookkeeping of a sequencer.
//!
//! All mutation happens under the sequencer's state lock; nothing here awaits.

use meridian_core::{CausalityClock, IncrementalTimestampGenerator, SiteId, Timestamp};
use std::collections::BTreeMap;

/// The clocks a sequencer maintains, plus its outstanding leases.
#[derive(Debug)]
pub(crate) struct ClockState {
    site_id: SiteId,
    /// Every finalized timestamp: committed, abandoned or expired
    pub(crate) current: CausalityClock,
    /// Finalized timestamps known to be propagated or durable
    pub(crate) stable: CausalityClock,
    /// Client requests already finalized
    pub(crate) client: CausalityClock,
    /// Local commit records already queued for propagation
    pub(crate) received: CausalityClock,
    /// Own timestamps finalized without a commit, not yet reported to peers
    pub(crate) not_used: CausalityClock,
    /// Own timestamps finalized by lease expiry
    pub(crate) expired: CausalityClock,
    generator: IncrementalTimestampGenerator,
    /// Issued but unfinalized own timestamps
    leases: BTreeMap<Timestamp, Lease>,
}

/// An issued timestamp awaiting its commit.
#[derive(Debug, Clone)]
struct Lease {
    issued_ms: u64,
    /// Client request the timestamp was issued for
    client_timestamp: Timestamp,
}

/// Outcome of finalizing one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finalized {
    /// A live lease, or an unseen remote timestamp
    Accepted,
    /// Unknown own timestamp or already finalized
    Rejected,
}

impl ClockState {
    pub(crate) fn new(site_id: SiteId) -> Self {
        Self {
            generator: IncrementalTimestampGenerator::new(site_id.clone()),
            site_id,
            current: CausalityClock::new(),
            stable: CausalityClock::new(),
            client: CausalityClock::new(),
            received: CausalityClock::new(),
            not_used: CausalityClock::new(),
            expired: CausalityClock::new(),
            leases: BTreeMap::new(),
        }
    }

    pub(crate) fn is_own(&self, ts: &Timestamp) -> bool {
        ts.site_id() == &self.site_id
    }

    /// Issue a timestamp for `client_timestamp` and lease it from `now_ms`.
    pub(crate) fn issue(&mut self, now_ms: u64, client_timestamp: &Timestamp) -> Timestamp {
        let ts = self.generator.generate_new();
        self.leases.insert(
            ts.clone(),
            Lease {
                issued_ms: now_ms,
                client_timestamp: client_timestamp.clone(),
            },
        );
        ts
    }

    pub(crate) fn lease_count(&self) -> usize {
        self.leases.len()
    }

    pub(crate) fn has_lease(&self, ts: &Timestamp) -> bool {
        self.leases.contains_key(ts)
    }

    /// Whether an own lease older than `ts` is still outstanding
    pub(crate) fn has_earlier_lease(&self, ts: &Timestamp) -> bool {
        self.leases.keys().any(|leased| leased.precedes(ts))
    }

    pub(crate) fn last_issued_counter(&self) -> i64 {
        self.generator.last_counter()
    }

    /// Finalize a committed timestamp.
    ///
    /// The client timestamp is recorded even when the commit is rejected so
    /// retries of the same client request are recognized as duplicates.
    pub(crate) fn commit(
        &mut self,
        ts: &Timestamp,
        client_timestamp: &Timestamp,
        record_stable: bool,
    ) -> Finalized {
        self.client.record(client_timestamp);

        let accepted = if self.is_own(ts) {
            self.leases.remove(ts).is_some()
        } else {
            !self.current.includes(ts)
        };
        if !accepted {
            return Finalized::Rejected;
        }

        self.current.record(ts);
        if record_stable {
            self.stable.record(ts);
        }
        Finalized::Accepted
    }

    /// Finalize an own timestamp the client gave up on.
    pub(crate) fn abandon(&mut self, ts: &Timestamp, client_timestamp: &Timestamp) -> Finalized {
        if self.leases.remove(ts).is_none() {
            return Finalized::Rejected;
        }
        self.client.record(client_timestamp);
        self.finalize_unused(ts);
        Finalized::Accepted
    }

    /// Finalize every lease issued more than `expiry_ms` before `now_ms`.
    ///
    /// The client request of each expired lease counts as finalized too, so
    /// the client's next request is in order again.
    pub(crate) fn expire_leases(&mut self, now_ms: u64, expiry_ms: u64) -> Vec<Timestamp> {
        let stale: Vec<Timestamp> = self
            .leases
            .iter()
            .filter(|(_, lease)| now_ms.saturating_sub(lease.issued_ms) > expiry_ms)
            .map(|(ts, _)| ts.clone())
            .collect();

        for ts in &stale {
            if let Some(lease) = self.leases.remove(ts) {
                self.client.record(&lease.client_timestamp);
            }
            self.finalize_unused(ts);
            self.expired.record(ts);
        }
        stale
    }

    fn finalize_unused(&mut self, ts: &Timestamp) {
        self.current.record(ts);
        self.stable.record(ts);
        self.not_used.record(ts);
    }

    /// Hand over the unused timestamps accumulated since the last record.
    pub(crate) fn take_not_used(&mut self) -> CausalityClock {
        std::mem::take(&mut self.not_used)
    }

    /// Fold another sequencer's unused timestamps into both state clocks.
    pub(crate) fn absorb_not_used(&mut self, not_used: &CausalityClock) {
        self.current.merge(not_used);
        self.stable.merge(not_used);
    }

    /// Remove an expired timestamp from every clock. Returns `false` when
    /// `ts` was not finalized by expiry.
    pub(crate) fn forget_expired(&mut self, ts: &Timestamp) -> bool {
        if !self.expired.includes(ts) {
            return false;
        }
        self.current.drop_timestamp(ts);
        self.stable.drop_timestamp(ts);
        self.not_used.drop_timestamp(ts);
        self.expired.drop_timestamp(ts);
        true
    }

    /// Adopt persisted clocks after restart.
    pub(crate) fn restore(&mut self, current: &CausalityClock, client: &CausalityClock) {
        self.current.merge(current);
        self.stable.merge(current);
        self.client.merge(client);
        self.generator
            .skip_past(current.get_latest_counter(&self.site_id));
    }

    /// Mirror a primary's commit on a backup.
    pub(crate) fn mirror(&mut self, ts: &Timestamp, client_timestamp: &Timestamp) {
        self.current.record(ts);
        self.stable.record(ts);
        self.client.record(client_timestamp);
        if self.is_own(ts) {
            self.generator.skip_past(ts.counter());
        }
    }
}

/// What this sequencer knows of its peers' states.
#[derive(Debug, Default)]
pub(crate) struct RemoteState {
    clocks: BTreeMap<SiteId, CausalityClock>,
    max_remote: CausalityClock,
}

impl RemoteState {
    /// Merge a peer's reported clock into its entry and into the maximum.
    pub(crate) fn observe(&mut self, site: &SiteId, clock: &CausalityClock) {
        self.clocks.entry(site.clone()).or_default().merge(clock);
        self.max_remote.merge(clock);
    }

    pub(crate) fn clock_of(&self, site: &SiteId) -> Option<&CausalityClock> {
        self.clocks.get(site)
    }

    pub(crate) fn max_remote(&self) -> &CausalityClock {
        &self.max_remote
    }
}
