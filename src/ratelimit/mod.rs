use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::AccountKind;
use crate::store::Store;

/// Account-level and per-key rate limiting (SPEC_FULL.md §4.3, C7
/// RateLimiter). Two independent facilities layered over the same [`Store`]:
/// a sticky "this account got a 429 upstream" flag that self-clears after an
/// hour, and a sliding-window hit counter per arbitrary key (used both for
/// an `ApiKey`'s own request quota and for any other windowed check).
pub struct RateLimiter {
    store: Arc<dyn Store>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Flag `account_id` as rate-limited by the upstream provider as of `at`.
    /// Clears automatically after one hour — see
    /// [`crate::model::AccountCapabilities::rate_limited`].
    pub async fn mark_account_limited(&self, kind: AccountKind, account_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        metrics::counter!("gateway_account_rate_limited_total").increment(1);
        self.store.mark_account_limited(kind, account_id, at).await
    }

    pub async fn clear_account_limited(&self, kind: AccountKind, account_id: &str) -> anyhow::Result<()> {
        self.store.clear_account_limited(kind, account_id).await
    }

    /// Records a hit for `key` and returns whether it falls within `limit`
    /// hits over the trailing `window_secs`.
    pub async fn check(&self, key: &str, window_secs: u64, limit: u64) -> anyhow::Result<bool> {
        if limit == 0 {
            return Ok(true);
        }
        let hits = self.store.sliding_window_hit(key, window_secs).await?;
        let allowed = hits <= limit;
        if allowed {
            metrics::counter!("gateway_rate_limit_allowed_total").increment(1);
        } else {
            metrics::counter!("gateway_rate_limit_rejected_total").increment(1);
        }
        Ok(allowed)
    }
}
