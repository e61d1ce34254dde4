//! Event identity primitives.
//!
//! A [`Timestamp`] names one event of one site. Within a site timestamps are
//! totally ordered by counter; across sites there is no inherent order and
//! causality is tracked by [`crate::clock::CausalityClock`] instead.
//!
//! A [`TripleTimestamp`] orders the operations generated inside a single
//! transaction. It is derived from the transaction's base timestamp and can be
//! rebased once the transaction receives its global timestamp.

use crate::identifiers::SiteId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a single event: the generating site and its counter.
///
/// The derived `Ord` sorts by site first and counter second. It is a storage
/// order for maps and sets; only timestamps of the same site are causally
/// comparable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    site_id: SiteId,
    counter: i64,
}

impl Timestamp {
    /// Counter that precedes every event of a site.
    pub const MIN_VALUE: i64 = 0;

    /// Create a timestamp
    pub fn new(site_id: impl Into<SiteId>, counter: i64) -> Self {
        Self {
            site_id: site_id.into(),
            counter,
        }
    }

    /// Sentinel timestamp for a site that has produced no events yet.
    pub fn min_for(site_id: impl Into<SiteId>) -> Self {
        Self::new(site_id, Self::MIN_VALUE)
    }

    /// Site that generated the event
    pub fn site_id(&self) -> &SiteId {
        &self.site_id
    }

    /// Per-site sequence number of the event
    pub fn counter(&self) -> i64 {
        self.counter
    }

    /// Whether this names a real event rather than the sentinel or a malformed
    /// negative counter.
    pub fn is_event(&self) -> bool {
        self.counter > Self::MIN_VALUE
    }

    /// True when both timestamps come from the same site and `self` has the
    /// smaller counter.
    pub fn precedes(&self, other: &Timestamp) -> bool {
        self.site_id == other.site_id && self.counter < other.counter
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.site_id, self.counter)
    }
}

/// Operation-level timestamp: a base (transaction) timestamp plus a
/// sub-counter local to that transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TripleTimestamp {
    base: Timestamp,
    secondary: i64,
}

impl TripleTimestamp {
    /// Create a triple timestamp
    pub fn new(base: Timestamp, secondary: i64) -> Self {
        Self { base, secondary }
    }

    /// Timestamp of the owning transaction
    pub fn base(&self) -> &Timestamp {
        &self.base
    }

    /// Position of the operation within its transaction
    pub fn secondary(&self) -> i64 {
        self.secondary
    }

    /// Same operation position under a different base timestamp.
    pub fn with_base_timestamp(&self, base: Timestamp) -> TripleTimestamp {
        TripleTimestamp {
            base,
            secondary: self.secondary,
        }
    }
}

impl fmt::Display for TripleTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.base, self.secondary)
    }
}

/// Issues consecutive timestamps for one site, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementalTimestampGenerator {
    site_id: SiteId,
    last: i64,
}

impl IncrementalTimestampGenerator {
    /// Create a generator whose first timestamp has counter 1
    pub fn new(site_id: impl Into<SiteId>) -> Self {
        Self::resume_after(site_id, Timestamp::MIN_VALUE)
    }

    /// Create a generator that continues after `last`
    pub fn resume_after(site_id: impl Into<SiteId>, last: i64) -> Self {
        Self {
            site_id: site_id.into(),
            last: last.max(Timestamp::MIN_VALUE),
        }
    }

    /// Issue the next timestamp
    pub fn generate_new(&mut self) -> Timestamp {
        self.last += 1;
        Timestamp::new(self.site_id.clone(), self.last)
    }

    /// Advance so that the next issued counter is greater than `counter`.
    pub fn skip_past(&mut self, counter: i64) {
        self.last = self.last.max(counter);
    }

    /// Site this generator issues for
    pub fn site_id(&self) -> &SiteId {
        &self.site_id
    }

    /// Counter of the most recently issued timestamp
    pub fn last_counter(&self) -> i64 {
        self.last
    }
}

/// Issues consecutive triple timestamps under one base timestamp.
#[derive(Debug, Clone)]
pub struct IncrementalTripleTimestampGenerator {
    base: Timestamp,
    last: i64,
}

impl IncrementalTripleTimestampGenerator {
    /// Create a generator for the given base timestamp
    pub fn new(base: Timestamp) -> Self {
        Self { base, last: 0 }
    }

    /// Issue the next triple timestamp
    pub fn generate_new(&mut self) -> TripleTimestamp {
        self.last += 1;
        TripleTimestamp::new(self.base.clone(), self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_starts_after_min_value() {
        let mut gen = IncrementalTimestampGenerator::new("a");
        assert_eq!(gen.generate_new(), Timestamp::new("a", 1));
        assert_eq!(gen.generate_new(), Timestamp::new("a", 2));
        assert_eq!(gen.last_counter(), 2);
    }

    #[test]
    fn generator_resumes_and_skips() {
        let mut gen = IncrementalTimestampGenerator::resume_after("a", 7);
        assert_eq!(gen.generate_new().counter(), 8);
        gen.skip_past(5);
        assert_eq!(gen.generate_new().counter(), 9);
        gen.skip_past(20);
        assert_eq!(gen.generate_new().counter(), 21);
    }

    #[test]
    fn precedes_only_within_site() {
        let a1 = Timestamp::new("a", 1);
        let a2 = Timestamp::new("a", 2);
        let b1 = Timestamp::new("b", 1);
        assert!(a1.precedes(&a2));
        assert!(!a2.precedes(&a1));
        assert!(!a1.precedes(&b1));
    }

    #[test]
    fn sentinel_is_not_an_event() {
        assert!(!Timestamp::min_for("a").is_event());
        assert!(!Timestamp::new("a", -3).is_event());
        assert!(Timestamp::new("a", 1).is_event());
    }

    #[test]
    fn triple_timestamp_rebase_keeps_position() {
        let mut gen = IncrementalTripleTimestampGenerator::new(Timestamp::new("local", 4));
        let first = gen.generate_new();
        let second = gen.generate_new();
        assert!(first < second);

        let rebased = second.with_base_timestamp(Timestamp::new("dc", 10));
        assert_eq!(rebased.base(), &Timestamp::new("dc", 10));
        assert_eq!(rebased.secondary(), 2);
    }
}
