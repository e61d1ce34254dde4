//! Causality tracking with version vectors with exceptions.
//!
//! Each site maps to a high-water counter plus the set of counters below it
//! that are known *not* to have been observed. An event `(s, c)` is included
//! iff `0 < c <= max[s]` and `c` is not among the exceptions of `s`.
//!
//! Every operation here is total. Malformed input such as a non-positive
//! counter degrades to `false` or a no-op instead of an error, so a clock stays
//! usable whatever a peer sends.

use crate::identifiers::SiteId;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Result of comparing two clocks under the causal partial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpClock {
    /// Both clocks include exactly the same events
    Equals,
    /// The receiver includes every event of the argument and more
    Dominates,
    /// The argument includes every event of the receiver and more
    IsDominated,
    /// Each clock includes an event the other lacks
    Concurrent,
}

impl CmpClock {
    /// Fold a per-site comparison into an accumulated one.
    pub fn combine(self, other: CmpClock) -> CmpClock {
        match (self, other) {
            (CmpClock::Equals, x) | (x, CmpClock::Equals) => x,
            (a, b) if a == b => a,
            _ => CmpClock::Concurrent,
        }
    }

    /// Same relation seen from the other side.
    pub fn reverse(self) -> CmpClock {
        match self {
            CmpClock::Dominates => CmpClock::IsDominated,
            CmpClock::IsDominated => CmpClock::Dominates,
            other => other,
        }
    }

    /// `Equals` or `Dominates`
    pub fn is_dominates_or_equals(self) -> bool {
        matches!(self, CmpClock::Equals | CmpClock::Dominates)
    }

    fn from_missing(self_has_extra: bool, other_has_extra: bool) -> CmpClock {
        match (self_has_extra, other_has_extra) {
            (false, false) => CmpClock::Equals,
            (true, false) => CmpClock::Dominates,
            (false, true) => CmpClock::IsDominated,
            (true, true) => CmpClock::Concurrent,
        }
    }
}

/// Per-site state: the high-water counter and the counters below it that are
/// known to be missing, as disjoint, non-adjacent inclusive runs keyed by
/// their first counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct SiteEntry {
    max: i64,
    excluded: BTreeMap<i64, i64>,
}

impl SiteEntry {
    /// The run of exceptions containing `counter`, if any
    fn hole_at(&self, counter: i64) -> Option<(i64, i64)> {
        self.excluded
            .range(..=counter)
            .next_back()
            .filter(|&(_, &end)| end >= counter)
            .map(|(&start, &end)| (start, end))
    }

    fn includes(&self, counter: i64) -> bool {
        counter > Timestamp::MIN_VALUE && counter <= self.max && self.hole_at(counter).is_none()
    }

    fn excluded_count(&self) -> i64 {
        self.excluded
            .iter()
            .fold(0i64, |acc, (&start, &end)| acc.saturating_add(end - start + 1))
    }

    fn included_count(&self) -> i64 {
        self.max - self.excluded_count()
    }

    /// Add `[start, end]` to the exceptions. The run must not overlap an
    /// existing one; adjacent runs are coalesced.
    fn exclude_run(&mut self, mut start: i64, mut end: i64) {
        if start > end {
            return;
        }
        if let Some((&prev_start, &prev_end)) = self.excluded.range(..start).next_back() {
            if prev_end.checked_add(1) == Some(start) {
                self.excluded.remove(&prev_start);
                start = prev_start;
            }
        }
        if let Some(next) = end.checked_add(1) {
            if let Some(next_end) = self.excluded.remove(&next) {
                end = next_end;
            }
        }
        self.excluded.insert(start, end);
    }

    /// Remove `counter` from the exceptions. Returns whether it was one.
    fn fill_hole(&mut self, counter: i64) -> bool {
        let Some((start, end)) = self.hole_at(counter) else {
            return false;
        };
        self.excluded.remove(&start);
        if start < counter {
            self.excluded.insert(start, counter - 1);
        }
        if counter < end {
            self.excluded.insert(counter + 1, end);
        }
        true
    }

    /// Remove every exception at or below `counter`.
    fn fill_through(&mut self, counter: i64) {
        let covered: Vec<(i64, i64)> = self
            .excluded
            .range(..=counter)
            .map(|(&start, &end)| (start, end))
            .collect();
        for (start, end) in covered {
            self.excluded.remove(&start);
            if end > counter {
                self.excluded.insert(counter + 1, end);
            }
        }
    }

    /// Number of exceptions strictly above `counter`
    fn holes_above(&self, counter: i64) -> i64 {
        let Some(floor) = counter.checked_add(1) else {
            return 0;
        };
        self.excluded
            .iter()
            .filter(|&(_, &end)| end >= floor)
            .fold(0i64, |acc, (&start, &end)| {
                acc.saturating_add(end - start.max(floor) + 1)
            })
    }

    /// Whether any counter in `[start, end]` is included
    fn includes_any(&self, start: i64, end: i64) -> bool {
        let start = start.max(Timestamp::MIN_VALUE + 1);
        let end = end.min(self.max);
        if start > end {
            return false;
        }
        !self.hole_at(start).is_some_and(|(_, hole_end)| hole_end >= end)
    }

    /// Counters in `[1, up_to]` this entry does not include, as sorted runs
    fn missing_runs(&self, up_to: i64) -> Vec<(i64, i64)> {
        let mut runs: Vec<(i64, i64)> = self.excluded.iter().map(|(&s, &e)| (s, e)).collect();
        if up_to > self.max {
            match runs.last_mut() {
                Some((_, end)) if *end == self.max => *end = up_to,
                _ => runs.push((self.max + 1, up_to)),
            }
        }
        runs
    }

    /// Whether `self` includes any event that `other` does not.
    fn has_events_missing_from(&self, other: Option<&SiteEntry>) -> bool {
        let Some(other) = other else {
            return self.included_count() > 0;
        };

        if self.max > other.max && self.holes_above(other.max) < self.max - other.max {
            return true;
        }

        other
            .excluded
            .iter()
            .any(|(&start, &end)| self.includes_any(start, end))
    }
}

/// Intersection of two sorted lists of disjoint inclusive runs.
fn intersect_runs(a: &[(i64, i64)], b: &[(i64, i64)]) -> BTreeMap<i64, i64> {
    let mut out = BTreeMap::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].0.max(b[j].0);
        let end = a[i].1.min(b[j].1);
        if start <= end {
            out.insert(start, end);
        }
        if a[i].1 < b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Version vector with exceptions.
///
/// Cloning is a deep copy; callers hand out snapshots freely. Gaps are kept
/// as runs, so skipping far ahead costs one exception entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalityClock {
    entries: BTreeMap<SiteId, SiteEntry>,
}

impl CausalityClock {
    /// Create an empty clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no site has any recorded event
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a single event.
    ///
    /// Returns `true` when the event was not previously included. Recording
    /// past the contiguous frontier extends the high-water mark and turns the
    /// skipped counters into exceptions.
    pub fn record(&mut self, ts: &Timestamp) -> bool {
        let counter = ts.counter();
        if counter <= Timestamp::MIN_VALUE {
            return false;
        }

        let entry = self.entries.entry(ts.site_id().clone()).or_default();
        if counter > entry.max {
            entry.exclude_run(entry.max + 1, counter - 1);
            entry.max = counter;
            true
        } else {
            entry.fill_hole(counter)
        }
    }

    /// Record every event of the site up to and including `ts`.
    pub fn record_all_until(&mut self, ts: &Timestamp) {
        let counter = ts.counter();
        if counter <= Timestamp::MIN_VALUE {
            return;
        }

        let entry = self.entries.entry(ts.site_id().clone()).or_default();
        entry.max = entry.max.max(counter);
        entry.fill_through(counter);
    }

    /// Whether the event is included
    pub fn includes(&self, ts: &Timestamp) -> bool {
        self.entries
            .get(ts.site_id().as_str())
            .is_some_and(|entry| entry.includes(ts.counter()))
    }

    /// High-water timestamp of a site, `MIN_VALUE` if unknown.
    pub fn get_latest(&self, site: &SiteId) -> Timestamp {
        Timestamp::new(site.clone(), self.get_latest_counter(site))
    }

    /// High-water counter of a site, `MIN_VALUE` if unknown.
    pub fn get_latest_counter(&self, site: &SiteId) -> i64 {
        self.entries
            .get(site.as_str())
            .map_or(Timestamp::MIN_VALUE, |entry| entry.max)
    }

    /// Whether any event of the site is included
    pub fn has_event_from(&self, site: &SiteId) -> bool {
        self.entries
            .get(site.as_str())
            .is_some_and(|entry| entry.included_count() > 0)
    }

    /// Compare under the causal partial order. Read-only.
    pub fn compare_to(&self, other: &CausalityClock) -> CmpClock {
        let mut result = CmpClock::Equals;
        for site in self.entries.keys().chain(other.entries.keys()) {
            let mine = self.entries.get(site);
            let theirs = other.entries.get(site);
            let self_extra = mine.is_some_and(|e| e.has_events_missing_from(theirs));
            let other_extra = theirs.is_some_and(|e| e.has_events_missing_from(mine));
            result = result.combine(CmpClock::from_missing(self_extra, other_extra));
            if result == CmpClock::Concurrent {
                break;
            }
        }
        result
    }

    /// Shorthand for `compare_to(other).is_dominates_or_equals()`.
    pub fn dominates_or_equals(&self, other: &CausalityClock) -> bool {
        self.compare_to(other).is_dominates_or_equals()
    }

    /// Replace `self` by the join of both clocks and return how `self`
    /// compared to `other` before the merge.
    pub fn merge(&mut self, other: &CausalityClock) -> CmpClock {
        let before = self.compare_to(other);
        if before.is_dominates_or_equals() {
            return before;
        }

        for (site, theirs) in &other.entries {
            match self.entries.get_mut(site) {
                None => {
                    self.entries.insert(site.clone(), theirs.clone());
                }
                Some(mine) => {
                    // A counter stays missing only if both sides miss it
                    let max = mine.max.max(theirs.max);
                    mine.excluded = intersect_runs(&mine.missing_runs(max), &theirs.missing_runs(max));
                    mine.max = max;
                }
            }
        }
        before
    }

    /// Discard everything known about a site.
    ///
    /// This is the only operation that makes a clock look older. Use it only
    /// when the site's events are independently known to be irrelevant.
    pub fn drop_site(&mut self, site: &SiteId) {
        self.entries.remove(site.as_str());
    }

    /// Exclude exactly one previously included event. An entry left with no
    /// included events is removed altogether.
    pub fn drop_timestamp(&mut self, ts: &Timestamp) {
        let Some(entry) = self.entries.get_mut(ts.site_id().as_str()) else {
            return;
        };
        if !entry.includes(ts.counter()) {
            return;
        }

        entry.exclude_run(ts.counter(), ts.counter());
        if entry.included_count() == 0 {
            self.drop_site(ts.site_id());
        }
    }

    /// Whether any site has a known gap
    pub fn has_exceptions(&self) -> bool {
        self.entries.values().any(|entry| !entry.excluded.is_empty())
    }

    /// Total number of missing counters across all sites
    pub fn exception_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| usize::try_from(entry.excluded_count()).unwrap_or(usize::MAX))
            .fold(0usize, usize::saturating_add)
    }

    /// Compact the representation without changing the included events.
    ///
    /// A run of exceptions ending at a site's high-water mark lowers it;
    /// entries left empty are removed.
    pub fn trim(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some((start, _)) = entry.hole_at(entry.max) {
                entry.excluded.remove(&start);
                entry.max = start - 1;
            }
        }
        self.entries.retain(|_, entry| entry.max > Timestamp::MIN_VALUE);
    }

    /// True when every counter of the site below `ts` is included, so `ts` is
    /// the next event in that site's delivery order (or already delivered).
    pub fn covers_prefix(&self, ts: &Timestamp) -> bool {
        let before = ts.counter().saturating_sub(1);
        if before <= Timestamp::MIN_VALUE {
            return true;
        }
        self.entries.get(ts.site_id().as_str()).is_some_and(|entry| {
            entry.max >= before && entry.excluded.range(..=before).next().is_none()
        })
    }

    /// Sites with an entry in this clock
    pub fn site_ids(&self) -> impl Iterator<Item = &SiteId> {
        self.entries.keys()
    }
}

impl fmt::Display for CausalityClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (site, entry)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{site}:{}", entry.max)?;
        }
        f.write_str("]")?;

        if self.has_exceptions() {
            f.write_str("X:{")?;
            let with_holes = self.entries.iter().filter(|(_, e)| !e.excluded.is_empty());
            for (i, (site, entry)) in with_holes.enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                let holes: Vec<String> = entry
                    .excluded
                    .iter()
                    .map(|(start, end)| {
                        if start == end {
                            start.to_string()
                        } else {
                            format!("{start}-{end}")
                        }
                    })
                    .collect();
                write!(f, "{site}:[{}]", holes.join(","))?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}
