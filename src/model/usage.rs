use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::AccountKind;

/// One multi-dimensional usage counter (SPEC_FULL.md §3 `UsageCounters`).
/// Fields are non-negative monotonic integers except `cost`, which is a
/// fixed-precision decimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Counter {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_create_tokens: u64,
    pub cache_read_tokens: u64,
    pub all_tokens: u64,
    pub cost: Decimal,
}

impl Counter {
    pub fn add(&self, other: &Counter) -> Counter {
        Counter {
            requests: self.requests + other.requests,
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
            cache_create_tokens: self.cache_create_tokens + other.cache_create_tokens,
            cache_read_tokens: self.cache_read_tokens + other.cache_read_tokens,
            all_tokens: self.all_tokens + other.all_tokens,
            cost: self.cost + other.cost,
        }
    }
}

/// A delta to apply to a [`Counter`] via an atomic add-and-return at the
/// store. Same shape as `Counter` — kept as a distinct type alias so call
/// sites read as "the amount to add" rather than "the current total".
pub type CounterDelta = Counter;

/// Calendar bucket a counter is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bucket {
    Lifetime,
    /// `YYYY-MM-DD`
    Daily(String),
    /// `YYYY-MM`
    Monthly(String),
}

impl Bucket {
    pub fn as_str(&self) -> &str {
        match self {
            Bucket::Lifetime => "lifetime",
            Bucket::Daily(d) => d,
            Bucket::Monthly(m) => m,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Bucket::Lifetime => "lifetime",
            Bucket::Daily(_) => "daily",
            Bucket::Monthly(_) => "monthly",
        }
    }
}

/// Identifies exactly one counter cell in the persistence layout described
/// in SPEC_FULL.md §6: `usage:<keyId>:model:{daily|monthly}:<model>:<bucket>`
/// for per-key×model counters, with analogous per-key and per-account forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterScope {
    Key { key_id: String, bucket: Bucket },
    KeyModel { key_id: String, model: String, bucket: Bucket },
    Account { kind: AccountKind, account_id: String, bucket: Bucket },
}

impl CounterScope {
    /// Stable store key for this scope, following the `usage:` prefix
    /// convention from the persistence layout.
    pub fn store_key(&self) -> String {
        match self {
            CounterScope::Key { key_id, bucket } => {
                format!("usage:{key_id}:{}:{}", bucket.kind(), bucket.as_str())
            }
            CounterScope::KeyModel { key_id, model, bucket } => {
                format!("usage:{key_id}:model:{}:{model}:{}", bucket.kind(), bucket.as_str())
            }
            CounterScope::Account { kind, account_id, bucket } => {
                format!(
                    "usage:account:{}:{account_id}:{}:{}",
                    kind.as_str(),
                    bucket.kind(),
                    bucket.as_str()
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_add_sums_all_fields() {
        let a = Counter { requests: 1, input_tokens: 10, ..Default::default() };
        let b = Counter { requests: 2, input_tokens: 5, output_tokens: 3, ..Default::default() };
        let sum = a.add(&b);
        assert_eq!(sum.requests, 3);
        assert_eq!(sum.input_tokens, 15);
        assert_eq!(sum.output_tokens, 3);
    }

    #[test]
    fn store_key_is_stable_for_equal_scopes() {
        let a = CounterScope::Key { key_id: "k1".into(), bucket: Bucket::Daily("2026-07-28".into()) };
        let b = CounterScope::Key { key_id: "k1".into(), bucket: Bucket::Daily("2026-07-28".into()) };
        assert_eq!(a.store_key(), b.store_key());
    }

    #[test]
    fn key_model_scope_key_contains_model_and_bucket() {
        let scope = CounterScope::KeyModel {
            key_id: "k1".into(),
            model: "gpt-4o".into(),
            bucket: Bucket::Monthly("2026-07".into()),
        };
        let key = scope.store_key();
        assert!(key.contains("gpt-4o"));
        assert!(key.contains("2026-07"));
        assert!(key.contains("monthly"));
    }
}
