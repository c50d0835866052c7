use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::admission::AdmissionToken;
use crate::model::{AccountKind, Bucket, Counter, CounterScope};
use crate::pricing::{CostCalculator, PriceTable, TokenUsage};
use crate::store::Store;

/// Raw token counts observed for one admitted request, as reported (or
/// partially reported, on an aborted request) by the upstream call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObservedUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
}

impl ObservedUsage {
    fn as_token_usage(self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_create_tokens: self.cache_create_tokens,
            cache_read_tokens: self.cache_read_tokens,
        }
    }

    fn total(self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_create_tokens + self.cache_read_tokens
    }
}

/// Thin atomic-increment helper over the store's counter operations
/// (SPEC_FULL.md §4.1, C2 UsageCounter). [`UsageRecorder`] is the only
/// caller; kept separate because the daily-cost read in admission (C4 step
/// 7) and the per-key/per-model writes here both go through this shape.
pub struct UsageCounter {
    store: Arc<dyn Store>,
}

impl UsageCounter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn add(&self, scope: CounterScope, delta: Counter) -> anyhow::Result<Counter> {
        self.store.increment_counter(&scope, &delta).await
    }
}

/// Post-response recording hook, invoked exactly once per admitted request
/// (SPEC_FULL.md §4.6, C8). Owns the [`AdmissionToken`] so the concurrency
/// release obligation is visible at the call site: recording and release
/// happen together, and if the caller drops the recorder without calling
/// [`UsageRecorder::record`] the token's own `Drop` still releases the slot.
pub struct UsageRecorder {
    counters: UsageCounter,
    store: Arc<dyn Store>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { counters: UsageCounter::new(Arc::clone(&store)), store }
    }

    pub async fn record(
        &self,
        token: AdmissionToken,
        key_id: &str,
        account: Option<(AccountKind, &str)>,
        model: &str,
        usage: ObservedUsage,
        price_table: &PriceTable,
    ) -> anyhow::Result<Counter> {
        let now = Utc::now();
        let cost = CostCalculator::cost(price_table, model, usage.as_token_usage()).total_cost;

        let delta = Counter {
            requests: 1,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_create_tokens: usage.cache_create_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            all_tokens: usage.total(),
            cost,
        };

        metrics::counter!("gateway_usage_requests_total").increment(1);
        metrics::counter!("gateway_usage_tokens_total", "category" => "input").increment(usage.input_tokens);
        metrics::counter!("gateway_usage_tokens_total", "category" => "output").increment(usage.output_tokens);
        metrics::counter!("gateway_usage_tokens_total", "category" => "cache_create").increment(usage.cache_create_tokens);
        metrics::counter!("gateway_usage_tokens_total", "category" => "cache_read").increment(usage.cache_read_tokens);
        metrics::counter!("gateway_usage_cost_micros_total", "model" => model.to_string())
            .increment((cost * Decimal::from(1_000_000)).try_into().unwrap_or(0));

        let key_total = self.record_key_counters(key_id, model, &now, delta).await?;

        if let Some((kind, account_id)) = account {
            self.record_account_counters(kind, account_id, &now, delta).await?;
            self.store.touch_account_last_used(kind, account_id, now).await?;
        }

        let key_uuid = uuid::Uuid::parse_str(key_id)?;
        self.store.touch_api_key_last_used(&key_uuid, now).await?;

        token.release().await;

        Ok(key_total)
    }

    async fn record_key_counters(
        &self,
        key_id: &str,
        model: &str,
        now: &DateTime<Utc>,
        delta: Counter,
    ) -> anyhow::Result<Counter> {
        let day = now.format("%Y-%m-%d").to_string();
        let month = now.format("%Y-%m").to_string();

        let lifetime = self
            .counters
            .add(CounterScope::Key { key_id: key_id.to_string(), bucket: Bucket::Lifetime }, delta)
            .await?;
        self.counters
            .add(CounterScope::Key { key_id: key_id.to_string(), bucket: Bucket::Daily(day.clone()) }, delta)
            .await?;
        self.counters
            .add(CounterScope::Key { key_id: key_id.to_string(), bucket: Bucket::Monthly(month.clone()) }, delta)
            .await?;

        self.counters
            .add(
                CounterScope::KeyModel { key_id: key_id.to_string(), model: model.to_string(), bucket: Bucket::Daily(day) },
                delta,
            )
            .await?;
        self.counters
            .add(
                CounterScope::KeyModel { key_id: key_id.to_string(), model: model.to_string(), bucket: Bucket::Monthly(month) },
                delta,
            )
            .await?;

        Ok(lifetime)
    }

    async fn record_account_counters(
        &self,
        kind: AccountKind,
        account_id: &str,
        now: &DateTime<Utc>,
        delta: Counter,
    ) -> anyhow::Result<()> {
        let day = now.format("%Y-%m-%d").to_string();
        let month = now.format("%Y-%m").to_string();

        self.counters
            .add(CounterScope::Account { kind, account_id: account_id.to_string(), bucket: Bucket::Lifetime }, delta)
            .await?;
        self.counters
            .add(CounterScope::Account { kind, account_id: account_id.to_string(), bucket: Bucket::Daily(day) }, delta)
            .await?;
        self.counters
            .add(CounterScope::Account { kind, account_id: account_id.to_string(), bucket: Bucket::Monthly(month) }, delta)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::KeyAdmission;
    use crate::model::{AccountBindings, ClientRestriction, ModelRestriction, Permissions};
    use crate::store::InMemoryStore;
    use uuid::Uuid;

    fn price_table() -> PriceTable {
        use crate::pricing::ModelPrice;
        use rust_decimal_macros::dec;
        let mut table = PriceTable::default();
        table.insert(
            "claude-3-opus",
            ModelPrice {
                input_per_million: dec!(15.0),
                output_per_million: dec!(75.0),
                cache_create_per_million: dec!(0),
                cache_read_per_million: dec!(0),
            },
        );
        table
    }

    #[tokio::test]
    async fn record_increments_key_and_releases_token() {
        let store = Arc::new(InMemoryStore::new());
        let admission = KeyAdmission::new(Arc::clone(&store) as Arc<dyn Store>, "sk-gw-".into(), "pepper".into());
        let key = crate::admission::AdmissionRequest {
            platform: crate::model::Platform::Claude,
            requested_model: None,
            client_id: None,
        };

        let mut api_key = crate::model::ApiKey {
            id: Uuid::new_v4(),
            name: "k".into(),
            hashed_secret: String::new(),
            is_active: true,
            created_at: Utc::now(),
            expires_at: None,
            permissions: Permissions::All,
            token_limit: 0,
            concurrency_limit: 0,
            rate_limit_window_sec: 60,
            rate_limit_requests: 0,
            daily_cost_limit: Decimal::ZERO,
            model_restriction: ModelRestriction::default(),
            client_restriction: ClientRestriction::default(),
            bindings: AccountBindings::default(),
            tags: vec![],
            last_used_at: None,
        };
        let secret = "sk-gw-rec";
        api_key.hashed_secret = format!(
            "{:x}",
            {
                use sha2::{Digest, Sha256};
                let mut h = Sha256::new();
                h.update("pepper".as_bytes());
                h.update(secret.as_bytes());
                h.finalize()
            }
        );
        let key_id = api_key.id;
        store.put_api_key(api_key).await.unwrap();

        let admitted = admission.admit(secret, &key).await.unwrap();

        let recorder = UsageRecorder::new(store.clone() as Arc<dyn Store>);
        let usage = ObservedUsage { input_tokens: 100, output_tokens: 50, ..Default::default() };
        let total = recorder
            .record(admitted.token, &key_id.to_string(), None, "claude-3-opus", usage, &price_table())
            .await
            .unwrap();

        assert_eq!(total.requests, 1);
        assert_eq!(total.input_tokens, 100);
        assert_eq!(total.output_tokens, 50);
        assert!(total.cost > Decimal::ZERO);
    }
}
