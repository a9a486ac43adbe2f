use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::RwLock;
use uuid::Uuid;

pub const INITIAL_SCORE: i32 = 70;
pub const MIN_USABLE_SCORE: i32 = 20;
const MAX_SCORE: i32 = 100;

const SUCCESS_DELTA: i32 = 2;
const FAILURE_DELTA: i32 = -15;
const RATE_LIMIT_DELTA: i32 = -25;
/// Passive recovery: one point per minute since the last update.
const DECAY_PER_MINUTE: i32 = 1;

#[derive(Debug, Clone, Copy)]
struct HealthState {
    score: i32,
    last_update: Instant,
    last_used: Option<Instant>,
}

/// A selector's view of one account at observation time.
#[derive(Debug, Clone, Copy)]
pub struct HealthObservation {
    pub score: i32,
    pub last_used: Option<Instant>,
}

/// Per-OAuth-account health scores. Process-local and lazily seeded;
/// restart resets every account to the initial score.
#[derive(Debug, Default)]
pub struct HealthTracker {
    states: RwLock<HashMap<Uuid, HealthState>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, account_id: Uuid) {
        self.apply(account_id, SUCCESS_DELTA).await;
    }

    pub async fn record_failure(&self, account_id: Uuid) {
        self.apply(account_id, FAILURE_DELTA).await;
    }

    pub async fn record_rate_limit(&self, account_id: Uuid) {
        self.apply(account_id, RATE_LIMIT_DELTA).await;
    }

    /// Current score with passive decay applied; seeds lazily.
    pub async fn observe(&self, account_id: Uuid) -> HealthObservation {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let state = states.entry(account_id).or_insert(HealthState {
            score: INITIAL_SCORE,
            last_update: now,
            last_used: None,
        });
        HealthObservation {
            score: decayed(state, now),
            last_used: state.last_used,
        }
    }

    /// Called by the selector at the moment of selection.
    pub async fn mark_used(&self, account_id: Uuid) {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let state = states.entry(account_id).or_insert(HealthState {
            score: INITIAL_SCORE,
            last_update: now,
            last_used: None,
        });
        state.last_used = Some(now);
    }

    async fn apply(&self, account_id: Uuid, delta: i32) {
        let now = Instant::now();
        let mut states = self.states.write().await;
        let state = states.entry(account_id).or_insert(HealthState {
            score: INITIAL_SCORE,
            last_update: now,
            last_used: None,
        });
        state.score = (decayed(state, now) + delta).clamp(0, MAX_SCORE);
        state.last_update = now;
    }
}

fn decayed(state: &HealthState, now: Instant) -> i32 {
    let minutes = now.duration_since(state.last_update).as_secs() / 60;
    let minutes = i32::try_from(minutes).unwrap_or(i32::MAX);
    state
        .score
        .saturating_add(minutes.saturating_mul(DECAY_PER_MINUTE))
        .clamp(0, MAX_SCORE)
}
