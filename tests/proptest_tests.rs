//! Property-based tests using proptest
//!
//! These cover the pure parsing and slot arithmetic with arbitrary inputs,
//! plus the interval-conservation property of the billing fold.

use proptest::prelude::*;
use std::sync::Arc;
use tempfile::TempDir;
use timewarden::protocol::parse_sync_request;
use timewarden::slots::{parse_slot_spec, slot_state, DAY_SECONDS};
use timewarden::{Database, FixedClock, Warden};

/// Non-overlapping day slots as minute boundaries: an even, strictly
/// increasing sequence in 0..=1440 read pairwise as (start, end).
fn arbitrary_slot_minutes() -> impl Strategy<Value = Vec<(u32, u32)>> {
    prop::collection::btree_set(0u32..=1440, 2..=8).prop_map(|set| {
        let sorted: Vec<u32> = set.into_iter().collect();
        sorted[..sorted.len() / 2 * 2]
            .chunks(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    })
}

fn spec_of(slots: &[(u32, u32)]) -> String {
    let fmt = |minutes: u32| format!("{}:{:02}", minutes / 60, minutes % 60);
    slots
        .iter()
        .map(|(start, end)| format!("{}-{}", fmt(*start), fmt(*end)))
        .collect::<Vec<_>>()
        .join(", ")
}

// Arbitrary junk must parse or reject cleanly, never panic
proptest! {
    #[test]
    fn test_slot_spec_parsing_doesnt_panic(spec in ".{0,60}") {
        let _result = parse_slot_spec(&spec);
    }
}

// Well-formed specs parse to exactly the boundaries they were built from
proptest! {
    #[test]
    fn test_valid_slot_specs_parse(slots in arbitrary_slot_minutes()) {
        let parsed = parse_slot_spec(&spec_of(&slots)).unwrap();
        prop_assert_eq!(parsed.len(), slots.len());
        for (slot, (start, end)) in parsed.iter().zip(&slots) {
            prop_assert_eq!(slot.start, start * 60);
            prop_assert_eq!(slot.end, end * 60);
        }
    }
}

// Rendering a parsed spec and parsing it again is a fixed point
proptest! {
    #[test]
    fn test_slot_spec_round_trips(slots in arbitrary_slot_minutes()) {
        let parsed = parse_slot_spec(&spec_of(&slots)).unwrap();
        let rendered = parsed
            .iter()
            .map(|slot| slot.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        prop_assert_eq!(parse_slot_spec(&rendered).unwrap(), parsed);
    }
}

// Slot-state arithmetic invariants at an arbitrary time of day
proptest! {
    #[test]
    fn test_slot_state_invariants(
        slots in arbitrary_slot_minutes(),
        now in 0u32..DAY_SECONDS,
    ) {
        let parsed = parse_slot_spec(&spec_of(&slots)).unwrap();
        let state = slot_state(&parsed, now);

        prop_assert!(state.current_remaining >= 0);
        prop_assert!(state.total_remaining >= state.current_remaining);

        if let Some(current) = state.current {
            prop_assert!(current.start <= now && now < current.end);
            prop_assert_eq!(state.current_remaining, i64::from(current.end - now));
        } else {
            prop_assert_eq!(state.current_remaining, 0);
        }
        if let Some(next) = state.next {
            prop_assert!(next.start > now);
        }

        // The total is exactly what a naive per-slot walk gives
        let naive: i64 = parsed
            .iter()
            .map(|slot| {
                if slot.end <= now {
                    0
                } else {
                    i64::from(slot.end - slot.start.max(now))
                }
            })
            .sum();
        prop_assert_eq!(state.total_remaining, naive);
    }
}

// Sync request bodies round-trip: first line user, every later line a title
proptest! {
    #[test]
    fn test_sync_request_round_trips(
        user in "[a-zA-Z0-9_-]{1,20}",
        titles in prop::collection::vec("[^\r\n]{0,40}", 0..6),
    ) {
        let mut body = user.clone();
        for title in &titles {
            body.push('\n');
            body.push_str(title);
        }
        body.push('\n');

        let request = parse_sync_request(&body).unwrap();
        prop_assert_eq!(request.user, user);
        prop_assert_eq!(request.titles, titles);
    }
}

// Interval conservation: a gap-free sample chain bills exactly the elapsed
// span to the total limit, however the polls are spaced
proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]
    #[test]
    fn test_gap_free_chain_conserves_elapsed_time(
        steps in prop::collection::vec(1i64..=90, 1..24)
    ) {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("warden.db")).unwrap();
        let clock = Arc::new(FixedClock::at_epoch(1_700_000_000));
        let warden = Warden::new(db, clock.clone());
        let titles = vec!["Minecraft".to_string()];

        warden.insert_activity("alice", &titles).unwrap();
        for step in &steps {
            clock.advance(*step);
            warden.insert_activity("alice", &titles).unwrap();
        }

        let total = warden.limits("alice").unwrap()[0].id;
        let spent = warden
            .time_spent_by_limit_and_date("alice", 0, None)
            .unwrap();
        let billed: i64 = spent[&total].values().sum();
        prop_assert_eq!(billed, steps.iter().sum::<i64>());
    }
}
