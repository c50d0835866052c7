pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{AccountGroup, AccountKind, ApiKey, Counter, CounterDelta, CounterScope, SessionMapping, UpstreamAccount};

/// Data-store-neutral persistence contract (SPEC_FULL.md §4.7, C1 KeyStore).
///
/// All operations are expected to be reliable and durable at the store; the
/// rest of the system tolerates eventual consistency only for `last_used_at`
/// fields (SPEC_FULL.md §4.7). A networked, durable backend is an external
/// collaborator (SPEC_FULL.md §1) that would implement this trait alongside
/// the [`InMemoryStore`] shipped here.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_api_key(&self, id: &uuid::Uuid) -> anyhow::Result<Option<ApiKey>>;
    async fn find_api_key_by_hash(&self, hashed_secret: &str) -> anyhow::Result<Option<ApiKey>>;
    async fn list_api_keys(&self) -> anyhow::Result<Vec<ApiKey>>;
    async fn put_api_key(&self, key: ApiKey) -> anyhow::Result<()>;
    async fn delete_api_key(&self, id: &uuid::Uuid) -> anyhow::Result<()>;
    async fn touch_api_key_last_used(&self, id: &uuid::Uuid, at: DateTime<Utc>) -> anyhow::Result<()>;
    /// Lazily flip an expired-but-still-`isActive` key to disabled
    /// (SPEC_FULL.md §4.2 step 3).
    async fn disable_api_key(&self, id: &uuid::Uuid) -> anyhow::Result<()>;

    async fn get_account(&self, kind: AccountKind, id: &str) -> anyhow::Result<Option<UpstreamAccount>>;
    async fn put_account(&self, account: UpstreamAccount) -> anyhow::Result<()>;
    async fn list_accounts(&self, kind: AccountKind) -> anyhow::Result<Vec<UpstreamAccount>>;
    async fn touch_account_last_used(&self, kind: AccountKind, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn mark_account_limited(&self, kind: AccountKind, id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;
    async fn clear_account_limited(&self, kind: AccountKind, id: &str) -> anyhow::Result<()>;

    async fn get_group(&self, id: &str) -> anyhow::Result<Option<AccountGroup>>;
    async fn put_group(&self, group: AccountGroup) -> anyhow::Result<()>;

    /// Atomic add-and-return: applies `delta` to the counter at `scope` and
    /// returns the resulting total. Must be a single atomic step at the
    /// store (SPEC_FULL.md §5) — no read-modify-write in the caller.
    async fn increment_counter(&self, scope: &CounterScope, delta: &CounterDelta) -> anyhow::Result<Counter>;
    async fn get_counter(&self, scope: &CounterScope) -> anyhow::Result<Counter>;

    /// Lists every stored counter whose key starts with `key_prefix`, paired
    /// with the trailing segment of its store key (e.g. the model name for a
    /// `usage:<keyId>:model:<period>:` prefix). Backs the per-model usage
    /// breakdown endpoint (SPEC_FULL.md §6).
    async fn list_counters_with_prefix(&self, key_prefix: &str) -> anyhow::Result<Vec<(String, Counter)>>;

    async fn session_get(&self, session_hash: &str) -> anyhow::Result<Option<SessionMapping>>;
    async fn session_set(&self, session_hash: &str, mapping: SessionMapping, ttl_secs: u64) -> anyhow::Result<()>;
    async fn session_delete(&self, session_hash: &str) -> anyhow::Result<()>;

    /// Atomic increment with post-check semantics left to the caller
    /// (SPEC_FULL.md §4.2 step 8): returns the post-increment value.
    async fn concurrency_incr(&self, key_id: &uuid::Uuid) -> anyhow::Result<i64>;
    async fn concurrency_decr(&self, key_id: &uuid::Uuid) -> anyhow::Result<i64>;

    /// Records a hit for `key` "now" and returns the count of hits within
    /// the trailing `window_secs` (SPEC_FULL.md §4.3 per-key sliding window).
    async fn sliding_window_hit(&self, key: &str, window_secs: u64) -> anyhow::Result<u64>;
}
