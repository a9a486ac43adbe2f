use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use polygate_storage::{GatewayStore, entities};

use crate::health::{HealthTracker, MIN_USABLE_SCORE};

const SCORE_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.4;
const RECENCY_CAP: f64 = 100.0;

/// Picks the OAuth account to serve one request: healthy accounts ranked
/// by `0.6·score + 0.4·recency`, where recency grows one point per idle
/// minute up to 100. If every account is degraded, the best-scored one is
/// used anyway.
#[derive(Clone)]
pub struct AccountSelector {
    store: GatewayStore,
    health: Arc<HealthTracker>,
}

impl AccountSelector {
    pub fn new(store: GatewayStore, health: Arc<HealthTracker>) -> Self {
        Self { store, health }
    }

    pub async fn select(&self, provider_id: Uuid) -> Option<entities::oauth_accounts::Model> {
        let accounts = self
            .store
            .oauth_accounts_for_provider(provider_id)
            .await
            .ok()?;
        if accounts.is_empty() {
            return None;
        }

        let now = Instant::now();
        let mut scored = Vec::with_capacity(accounts.len());
        for account in accounts {
            let observation = self.health.observe(account.id).await;
            scored.push((account, observation));
        }

        let any_usable = scored
            .iter()
            .any(|(_, observation)| observation.score >= MIN_USABLE_SCORE);

        let chosen = if any_usable {
            // Ties keep the earlier entry; input order is LRU.
            let mut best: Option<(usize, f64)> = None;
            for (index, (_, observation)) in scored.iter().enumerate() {
                if observation.score < MIN_USABLE_SCORE {
                    continue;
                }
                let idle_minutes = observation
                    .last_used
                    .map(|used| now.duration_since(used).as_secs_f64() / 60.0)
                    .unwrap_or(RECENCY_CAP);
                let recency = idle_minutes.min(RECENCY_CAP);
                let composite =
                    SCORE_WEIGHT * f64::from(observation.score) + RECENCY_WEIGHT * recency;
                if best.is_none_or(|(_, best_score)| composite > best_score) {
                    best = Some((index, composite));
                }
            }
            best.map(|(index, _)| index)?
        } else {
            warn!(%provider_id, "all oauth accounts degraded, using best available");
            let mut best = 0;
            for (index, (_, observation)) in scored.iter().enumerate() {
                if observation.score > scored[best].1.score {
                    best = index;
                }
            }
            best
        };

        let account = scored.swap_remove(chosen).0;

        self.health.mark_used(account.id).await;
        let store = self.store.clone();
        let account_id = account.id;
        tokio::spawn(async move {
            if let Err(err) = store
                .touch_oauth_last_used(account_id, OffsetDateTime::now_utc())
                .await
            {
                warn!("failed to persist last_used_at: {err}");
            }
        });

        Some(account)
    }
}
