//! Property-based tests for the causality clock algebra.
//!
//! Clocks are built from random event sets over a small universe of sites and
//! counters, so every property can be checked against plain set semantics.
//!
//! ## Properties Verified
//!
//! - Merge is an upper bound of both inputs and the least one
//! - Merge reports the pre-merge comparison
//! - Recording an event makes it included
//! - Dropping an event removes exactly that event
//! - Comparison agrees with set inclusion and is antisymmetric
//! - Dominance is transitive
//! - Trimming never changes the included events

use meridian_core::{CausalityClock, CmpClock, Timestamp};
use proptest::prelude::*;
use std::collections::BTreeSet;

const SITES: [&str; 3] = ["a", "b", "c"];
const MAX_COUNTER: i64 = 12;

fn universe() -> impl Iterator<Item = Timestamp> {
    SITES
        .iter()
        .flat_map(|site| (1..=MAX_COUNTER).map(move |c| Timestamp::new(*site, c)))
}

fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
    (0..SITES.len(), 1..=MAX_COUNTER).prop_map(|(site, counter)| Timestamp::new(SITES[site], counter))
}

fn arb_clock() -> impl Strategy<Value = CausalityClock> {
    prop::collection::vec(arb_timestamp(), 0..20).prop_map(|events| {
        let mut clock = CausalityClock::new();
        for ts in &events {
            clock.record(ts);
        }
        clock
    })
}

fn included(clock: &CausalityClock) -> BTreeSet<Timestamp> {
    universe().filter(|ts| clock.includes(ts)).collect()
}

fn expected_relation(a: &BTreeSet<Timestamp>, b: &BTreeSet<Timestamp>) -> CmpClock {
    match (a.is_superset(b), b.is_superset(a)) {
        (true, true) => CmpClock::Equals,
        (true, false) => CmpClock::Dominates,
        (false, true) => CmpClock::IsDominated,
        (false, false) => CmpClock::Concurrent,
    }
}

proptest! {
    /// Property: merge is the least upper bound
    #[test]
    fn prop_merge_is_least_upper_bound(a in arb_clock(), b in arb_clock()) {
        let mut joined = a.clone();
        joined.merge(&b);

        prop_assert!(joined.dominates_or_equals(&a));
        prop_assert!(joined.dominates_or_equals(&b));

        let expected: BTreeSet<_> = included(&a).union(&included(&b)).cloned().collect();
        prop_assert_eq!(included(&joined), expected, "join must add no extra events");
    }

    /// Property: merge returns how the receiver compared before merging
    #[test]
    fn prop_merge_reports_previous_relation(a in arb_clock(), b in arb_clock()) {
        let before = a.compare_to(&b);
        let mut joined = a.clone();
        prop_assert_eq!(joined.merge(&b), before);
    }

    /// Property: merge is commutative up to equality
    #[test]
    fn prop_merge_commutative(a in arb_clock(), b in arb_clock()) {
        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        prop_assert_eq!(ab.compare_to(&ba), CmpClock::Equals);
    }

    /// Property: recorded events are included
    #[test]
    fn prop_record_then_includes(mut clock in arb_clock(), ts in arb_timestamp()) {
        let before = included(&clock);
        clock.record(&ts);
        prop_assert!(clock.includes(&ts));
        prop_assert!(included(&clock).is_superset(&before));
    }

    /// Property: dropping an included event removes only that event
    #[test]
    fn prop_drop_timestamp_is_isolated(mut clock in arb_clock(), ts in arb_timestamp()) {
        prop_assume!(clock.includes(&ts));
        let mut expected = included(&clock);
        expected.remove(&ts);

        clock.drop_timestamp(&ts);
        prop_assert!(!clock.includes(&ts));
        prop_assert_eq!(included(&clock), expected);
    }

    /// Property: comparison matches set inclusion and is antisymmetric
    #[test]
    fn prop_compare_matches_inclusion(a in arb_clock(), b in arb_clock()) {
        let relation = a.compare_to(&b);
        prop_assert_eq!(relation, expected_relation(&included(&a), &included(&b)));
        prop_assert_eq!(b.compare_to(&a), relation.reverse());
    }

    /// Property: dominance is transitive
    #[test]
    fn prop_dominance_transitive(c in arb_clock(), d1 in arb_clock(), d2 in arb_clock()) {
        let mut b = c.clone();
        b.merge(&d1);
        let mut a = b.clone();
        a.merge(&d2);

        if a.compare_to(&b) == CmpClock::Dominates && b.compare_to(&c) == CmpClock::Dominates {
            prop_assert_eq!(a.compare_to(&c), CmpClock::Dominates);
        }
        prop_assert!(a.dominates_or_equals(&c));
    }

    /// Property: trimming preserves the included events
    #[test]
    fn prop_trim_preserves_events(mut clock in arb_clock(), drops in prop::collection::vec(arb_timestamp(), 0..6)) {
        for ts in &drops {
            clock.drop_timestamp(ts);
        }
        let before = included(&clock);
        clock.trim();
        prop_assert_eq!(included(&clock), before);
    }
}
