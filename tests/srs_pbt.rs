//! Property tests for the tier ladder.
//!
//! - Tiers never leave 0..=7, whatever the answer sequence
//! - A correct answer climbs exactly one tier below the top
//! - A miss costs one tier up to tier 2 and two tiers from tier 3
//! - Only graduated tracks have no next review, and scheduled reviews land
//!   strictly after the answer

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use danci_practice::services::srs::{self, SrsState, MAX_TIER};

fn arb_state() -> impl Strategy<Value = SrsState> {
    (0u8..=MAX_TIER, 0u32..50, 0u32..50).prop_map(|(tier, streak, lapses)| SrsState {
        tier,
        streak,
        lapses,
    })
}

fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    (1_600_000_000i64..1_900_000_000i64)
        .prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_tier_stays_in_range(
        start in arb_state(),
        answers in prop::collection::vec(any::<bool>(), 0..64),
    ) {
        let mut state = start;
        for correct in answers {
            state = srs::transition(state, correct);
            prop_assert!(state.tier <= MAX_TIER);
        }
    }

    #[test]
    fn prop_correct_answer_climbs_one(state in arb_state()) {
        let next = srs::transition(state, true);
        prop_assert_eq!(next.tier, (state.tier + 1).min(MAX_TIER));
        prop_assert_eq!(next.streak, state.streak + 1);
        prop_assert_eq!(next.lapses, state.lapses);
    }

    #[test]
    fn prop_miss_penalty_depends_on_tier(state in arb_state()) {
        let next = srs::transition(state, false);
        let expected = if state.tier <= 2 {
            state.tier.saturating_sub(1)
        } else {
            state.tier - 2
        };
        prop_assert_eq!(next.tier, expected);
        prop_assert_eq!(next.streak, 0);
        prop_assert_eq!(next.lapses, state.lapses + 1);
    }

    #[test]
    fn prop_next_review_only_absent_when_graduated(
        state in arb_state(),
        correct in any::<bool>(),
        at in arb_instant(),
    ) {
        let scheduled = srs::review(state, correct, at);
        match scheduled.next_review_at {
            None => prop_assert_eq!(scheduled.state.tier, MAX_TIER),
            Some(next) => {
                prop_assert!(scheduled.state.tier < MAX_TIER);
                prop_assert!(next > at);
            }
        }
    }

    #[test]
    fn prop_higher_tiers_wait_longer(tier in 0u8..MAX_TIER - 1, at in arb_instant()) {
        let lower = srs::next_review_at(tier, at);
        let higher = srs::next_review_at(tier + 1, at);
        prop_assert!(higher > lower);
    }

    #[test]
    fn prop_understanding_is_a_percentage(
        tiers in prop::collection::vec(0u8..=MAX_TIER, 1..8),
    ) {
        let pct = srs::understanding_from_tiers(&tiers);
        prop_assert!((1..=100).contains(&pct));
    }
}

#[test]
fn initial_schedule_waits_for_the_first_interval() {
    let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let scheduled = srs::initial(at);
    assert_eq!(scheduled.state.tier, 0);
    assert_eq!(scheduled.next_review_at, Some(at + Duration::minutes(10)));
}
