//! Tiered spaced-repetition ladder.
//!
//! Every review track sits on a tier from 0 (new) to 7 (graduated). A correct
//! answer climbs one tier, an incorrect one drops one tier below tier 3 and
//! two tiers from tier 3 upward. Tier 7 has no next review.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_TIER: u8 = 7;

/// Highest tier that still receives the gentle penalty on a lapse.
const GENTLE_PENALTY_MAX_TIER: u8 = 2;
const GENTLE_PENALTY: u8 = 1;
const SERIOUS_PENALTY: u8 = 2;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Review delay in seconds for tiers 0..=6. Strictly increasing.
const TIER_INTERVALS_SECS: [i64; MAX_TIER as usize] = [
    10 * MINUTE,
    DAY,
    3 * DAY,
    7 * DAY,
    14 * DAY,
    30 * DAY,
    90 * DAY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("tier {0} is outside 0..=7")]
pub struct InvalidTier(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrsState {
    pub tier: u8,
    pub streak: u32,
    pub lapses: u32,
}

impl SrsState {
    pub const fn new() -> Self {
        Self {
            tier: 0,
            streak: 0,
            lapses: 0,
        }
    }

    pub fn try_new(tier: i64, streak: i64, lapses: i64) -> Result<Self, InvalidTier> {
        let tier = u8::try_from(tier)
            .ok()
            .filter(|t| *t <= MAX_TIER)
            .ok_or(InvalidTier(tier))?;
        Ok(Self {
            tier,
            streak: streak.max(0) as u32,
            lapses: lapses.max(0) as u32,
        })
    }

    pub fn is_graduated(&self) -> bool {
        self.tier == MAX_TIER
    }
}

impl Default for SrsState {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay until the next review after landing on `tier`; `None` once graduated.
pub fn tier_interval(tier: u8) -> Option<Duration> {
    TIER_INTERVALS_SECS
        .get(tier as usize)
        .map(|secs| Duration::seconds(*secs))
}

pub fn demotion_penalty(tier: u8) -> u8 {
    if tier <= GENTLE_PENALTY_MAX_TIER {
        GENTLE_PENALTY
    } else {
        SERIOUS_PENALTY
    }
}

/// Applies one review outcome. Pure over `(tier, streak, lapses)`.
pub fn transition(state: SrsState, correct: bool) -> SrsState {
    debug_assert!(state.tier <= MAX_TIER, "tier out of range: {}", state.tier);

    if correct {
        SrsState {
            tier: (state.tier + 1).min(MAX_TIER),
            streak: state.streak.saturating_add(1),
            lapses: state.lapses,
        }
    } else {
        SrsState {
            tier: state.tier.saturating_sub(demotion_penalty(state.tier)),
            streak: 0,
            lapses: state.lapses.saturating_add(1),
        }
    }
}

pub fn next_review_at(tier: u8, reviewed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    tier_interval(tier).map(|delay| reviewed_at + delay)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub state: SrsState,
    pub next_review_at: Option<DateTime<Utc>>,
}

/// [`transition`] followed by rescheduling from `reviewed_at`.
pub fn review(state: SrsState, correct: bool, reviewed_at: DateTime<Utc>) -> Scheduled {
    let state = transition(state, correct);
    Scheduled {
        state,
        next_review_at: next_review_at(state.tier, reviewed_at),
    }
}

/// Schedule for a brand-new track created by "mark understood".
pub fn initial(created_at: DateTime<Utc>) -> Scheduled {
    let state = SrsState::new();
    Scheduled {
        state,
        next_review_at: next_review_at(state.tier, created_at),
    }
}

/// Understanding percentage implied by a set of track tiers.
pub fn understanding_from_tiers(tiers: &[u8]) -> i64 {
    if tiers.is_empty() {
        return 0;
    }
    let total: u32 = tiers.iter().map(|t| u32::from(*t)).sum();
    let pct = (f64::from(total) / (tiers.len() as f64 * f64::from(MAX_TIER)) * 100.0).round() as i64;
    pct.clamp(1, 100)
}
