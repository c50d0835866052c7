use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::GatewayError;
use crate::model::{ApiKey, Platform};
use crate::store::Store;

/// What's being admitted: the platform/model/client identity a request
/// presents, independent of which upstream account eventually serves it
/// (that's C5's job).
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub platform: Platform,
    pub requested_model: Option<String>,
    pub client_id: Option<String>,
}

/// RAII concurrency-slot release (SPEC_FULL.md §4.6): dropping the guard
/// decrements the key's in-flight counter exactly once, whether the request
/// completed, errored, or panicked mid-handler.
pub struct AdmissionToken {
    store: Arc<dyn Store>,
    key_id: uuid::Uuid,
    released: AtomicBool,
}

impl AdmissionToken {
    /// Explicit release, so callers that need to await the decrement (e.g.
    /// to log the post-release count) don't have to rely on `Drop` running
    /// on an async executor's teardown path.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.store.concurrency_decr(&self.key_id).await {
            tracing::warn!(error = %err, key_id = %self.key_id, "failed to release concurrency slot");
        }
        metrics::gauge!("gateway_admission_concurrency_in_flight").decrement(1.0);
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = Arc::clone(&self.store);
        let key_id = self.key_id;
        tokio::spawn(async move {
            if let Err(err) = store.concurrency_decr(&key_id).await {
                tracing::warn!(error = %err, key_id = %key_id, "failed to release concurrency slot on drop");
            }
        });
        metrics::gauge!("gateway_admission_concurrency_in_flight").decrement(1.0);
    }
}

pub struct Admitted {
    pub key: ApiKey,
    pub token: AdmissionToken,
}

fn outcome_label(outcome: &Result<Admitted, GatewayError>) -> &'static str {
    match outcome {
        Ok(_) => "admitted",
        Err(GatewayError::MalformedRequest(_)) => "malformed_request",
        Err(GatewayError::Unauthorized) => "unauthorized",
        Err(GatewayError::Disabled) => "disabled",
        Err(GatewayError::Expired) => "expired",
        Err(GatewayError::Forbidden) => "forbidden",
        Err(GatewayError::ModelNotAllowed) => "model_not_allowed",
        Err(GatewayError::ClientNotAllowed) => "client_not_allowed",
        Err(GatewayError::DailyCostExceeded) => "daily_cost_exceeded",
        Err(GatewayError::TokenLimitExceeded) => "token_limit_exceeded",
        Err(GatewayError::RateLimited) => "rate_limited",
        Err(GatewayError::ConcurrencyExceeded) => "concurrency_exceeded",
        Err(_) => "other",
    }
}

/// Gate between an inbound request and the scheduler (SPEC_FULL.md §4.2,
/// C4 KeyAdmission). Every check is a separate early return so the
/// resulting [`GatewayError`] variant pinpoints exactly which rule failed.
pub struct KeyAdmission {
    store: Arc<dyn Store>,
    secret_prefix: String,
    global_pepper: String,
}

impl KeyAdmission {
    pub fn new(store: Arc<dyn Store>, secret_prefix: String, global_pepper: String) -> Self {
        Self { store, secret_prefix, global_pepper }
    }

    fn hash_secret(&self, presented_secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.global_pepper.as_bytes());
        hasher.update(presented_secret.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Resolves a presented secret to its `ApiKey` record, without running
    /// the rest of the admission pipeline (permissions/quota/rate-limit).
    /// Backs `/apiStats/api/get-key-id` and the user-facing stats endpoints,
    /// which authenticate a key but don't admit a relay request.
    pub async fn resolve_key(&self, presented_secret: &str) -> Result<ApiKey, GatewayError> {
        let Some(secret_body) = presented_secret.strip_prefix(self.secret_prefix.as_str()) else {
            return Err(GatewayError::MalformedRequest("missing api key prefix".into()));
        };
        if secret_body.is_empty() {
            return Err(GatewayError::MalformedRequest("empty api key".into()));
        }
        let hashed = self.hash_secret(presented_secret);
        let key = self
            .store
            .find_api_key_by_hash(&hashed)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?
            .ok_or(GatewayError::Unauthorized)?;
        if !key.is_active {
            return Err(GatewayError::Disabled);
        }
        if key.is_expired(Utc::now()) {
            return Err(GatewayError::Expired);
        }
        Ok(key)
    }

    pub async fn admit(&self, presented_secret: &str, request: &AdmissionRequest) -> Result<Admitted, GatewayError> {
        let started = std::time::Instant::now();
        let outcome = self.admit_inner(presented_secret, request).await;
        metrics::histogram!("gateway_admission_duration_seconds").record(started.elapsed().as_secs_f64());
        metrics::counter!("gateway_admission_total", "outcome" => outcome_label(&outcome)).increment(1);
        if outcome.is_ok() {
            metrics::gauge!("gateway_admission_concurrency_in_flight").increment(1.0);
        }
        outcome
    }

    async fn admit_inner(&self, presented_secret: &str, request: &AdmissionRequest) -> Result<Admitted, GatewayError> {
        // 1. prefix check
        let Some(secret_body) = presented_secret.strip_prefix(self.secret_prefix.as_str()) else {
            return Err(GatewayError::MalformedRequest("missing api key prefix".into()));
        };
        if secret_body.is_empty() {
            return Err(GatewayError::MalformedRequest("empty api key".into()));
        }

        // 2. hash + lookup
        let hashed = self.hash_secret(presented_secret);
        let mut key = self
            .store
            .find_api_key_by_hash(&hashed)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?
            .ok_or(GatewayError::Unauthorized)?;

        let now = Utc::now();

        // 3. active / expiry, with lazy disable of an expired-but-active key
        if !key.is_active {
            return Err(GatewayError::Disabled);
        }
        if key.is_expired(now) {
            self.store
                .disable_api_key(&key.id)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            return Err(GatewayError::Expired);
        }

        // 4. permissions / platform
        if !key.permissions.covers(request.platform) {
            return Err(GatewayError::Forbidden);
        }

        // 5. model restriction
        if let Some(model) = &request.requested_model {
            if !key.model_restriction.allows(model) {
                return Err(GatewayError::ModelNotAllowed);
            }
        }

        // 6. client restriction
        if let Some(client_id) = &request.client_id {
            if !key.client_restriction.allows(client_id) {
                return Err(GatewayError::ClientNotAllowed);
            }
        }

        // 7. quota checks
        if key.daily_cost_limit > rust_decimal::Decimal::ZERO {
            let scope = crate::model::CounterScope::Key {
                key_id: key.id.to_string(),
                bucket: crate::model::Bucket::Daily(now.format("%Y-%m-%d").to_string()),
            };
            let counter = self
                .store
                .get_counter(&scope)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            if counter.cost >= key.daily_cost_limit {
                return Err(GatewayError::DailyCostExceeded);
            }
        }
        if key.token_limit > 0 {
            let scope = crate::model::CounterScope::Key { key_id: key.id.to_string(), bucket: crate::model::Bucket::Lifetime };
            let counter = self
                .store
                .get_counter(&scope)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            if counter.all_tokens >= key.token_limit {
                return Err(GatewayError::TokenLimitExceeded);
            }
        }

        // 8. sliding-window rate limit
        if key.rate_limit_requests > 0 {
            let hits = self
                .store
                .sliding_window_hit(&format!("rl:{}", key.id), key.rate_limit_window_sec)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            if hits > key.rate_limit_requests {
                return Err(GatewayError::RateLimited);
            }
        }

        // 9. atomic concurrency reserve, revert on overshoot
        if key.concurrency_limit > 0 {
            let in_flight = self
                .store
                .concurrency_incr(&key.id)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            if in_flight > key.concurrency_limit as i64 {
                self.store
                    .concurrency_decr(&key.id)
                    .await
                    .map_err(|e| GatewayError::InternalError(e.to_string()))?;
                return Err(GatewayError::ConcurrencyExceeded);
            }
        }

        self.store
            .touch_api_key_last_used(&key.id, now)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        key.last_used_at = Some(now);

        let token = AdmissionToken { store: Arc::clone(&self.store), key_id: key.id, released: AtomicBool::new(false) };
        Ok(Admitted { key, token })
    }
}
