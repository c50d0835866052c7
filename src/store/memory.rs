use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

use crate::model::{AccountGroup, AccountKind, AccountCapabilities, ApiKey, Counter, CounterDelta, CounterScope, SessionMapping, UpstreamAccount};

use super::Store;

const GC_EXPIRE_SECS: u64 = 3600 * 2;
const GC_INTERVAL_SECS: u64 = 60;
const MAX_SLIDING_WINDOW_ENTRIES: usize = 100_000;
const MAX_SESSION_ENTRIES: usize = 100_000;

struct SessionEntry {
    mapping: SessionMapping,
    expires_at: Instant,
}

/// `DashMap`-backed [`Store`] implementation, grounded in the registry
/// idiom used throughout this codebase's upstream/rate-limit state (one
/// concurrent map per concern, get-or-create fast path, background GC).
/// Suitable for single-node operation and for tests; a durable networked
/// backend is an external collaborator (SPEC_FULL.md §1).
pub struct InMemoryStore {
    api_keys: DashMap<Uuid, ApiKey>,
    hash_index: DashMap<String, Uuid>,
    accounts: DashMap<(AccountKind, String), UpstreamAccount>,
    groups: DashMap<String, AccountGroup>,
    counters: DashMap<String, Counter>,
    sessions: DashMap<String, SessionEntry>,
    concurrency: DashMap<Uuid, Arc<AtomicI64>>,
    sliding_windows: DashMap<String, Mutex<VecDeque<Instant>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            api_keys: DashMap::new(),
            hash_index: DashMap::new(),
            accounts: DashMap::new(),
            groups: DashMap::new(),
            counters: DashMap::new(),
            sessions: DashMap::new(),
            concurrency: DashMap::new(),
            sliding_windows: DashMap::new(),
        }
    }

    /// Spawn the periodic sweep that evicts expired session mappings and
    /// stale sliding-window buckets, mirroring the age-based-retain-plus-
    /// hard-cap GC this codebase uses for other keyed registries.
    pub fn spawn_gc(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(GC_INTERVAL_SECS));
            loop {
                interval.tick().await;
                store.gc_sessions();
                store.gc_sliding_windows();
            }
        });
    }

    fn gc_sessions(&self) {
        let now = Instant::now();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        if self.sessions.len() > MAX_SESSION_ENTRIES {
            tracing::warn!(
                count = self.sessions.len(),
                "session map exceeds soft cap after GC sweep"
            );
        }
    }

    fn gc_sliding_windows(&self) {
        let cutoff = Instant::now() - std::time::Duration::from_secs(GC_EXPIRE_SECS);
        self.sliding_windows.retain(|_, buckets| {
            let mut guard = buckets.lock().unwrap();
            while guard.front().map(|t| *t < cutoff).unwrap_or(false) {
                guard.pop_front();
            }
            !guard.is_empty()
        });
        if self.sliding_windows.len() > MAX_SLIDING_WINDOW_ENTRIES {
            // Force-evict the coldest-looking entries under a hard cap so
            // memory cannot grow unbounded under many distinct keys.
            let excess = self.sliding_windows.len() - MAX_SLIDING_WINDOW_ENTRIES;
            let victims: Vec<String> = self
                .sliding_windows
                .iter()
                .take(excess)
                .map(|e| e.key().clone())
                .collect();
            for key in victims {
                self.sliding_windows.remove(&key);
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_api_key(&self, id: &Uuid) -> anyhow::Result<Option<ApiKey>> {
        Ok(self.api_keys.get(id).map(|e| e.clone()))
    }

    async fn find_api_key_by_hash(&self, hashed_secret: &str) -> anyhow::Result<Option<ApiKey>> {
        let Some(id) = self.hash_index.get(hashed_secret).map(|e| *e) else {
            return Ok(None);
        };
        Ok(self.api_keys.get(&id).map(|e| e.clone()))
    }

    async fn list_api_keys(&self) -> anyhow::Result<Vec<ApiKey>> {
        Ok(self.api_keys.iter().map(|e| e.value().clone()).collect())
    }

    async fn put_api_key(&self, key: ApiKey) -> anyhow::Result<()> {
        self.hash_index.insert(key.hashed_secret.clone(), key.id);
        self.api_keys.insert(key.id, key);
        Ok(())
    }

    async fn delete_api_key(&self, id: &Uuid) -> anyhow::Result<()> {
        if let Some((_, key)) = self.api_keys.remove(id) {
            self.hash_index.remove(&key.hashed_secret);
        }
        Ok(())
    }

    async fn touch_api_key_last_used(&self, id: &Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut key) = self.api_keys.get_mut(id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn disable_api_key(&self, id: &Uuid) -> anyhow::Result<()> {
        if let Some(mut key) = self.api_keys.get_mut(id) {
            key.is_active = false;
        }
        Ok(())
    }

    async fn get_account(&self, kind: AccountKind, id: &str) -> anyhow::Result<Option<UpstreamAccount>> {
        Ok(self.accounts.get(&(kind, id.to_string())).map(|e| e.clone()))
    }

    async fn put_account(&self, account: UpstreamAccount) -> anyhow::Result<()> {
        let key = (account.kind(), account.id().to_string());
        self.accounts.insert(key, account);
        Ok(())
    }

    async fn list_accounts(&self, kind: AccountKind) -> anyhow::Result<Vec<UpstreamAccount>> {
        Ok(self
            .accounts
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn touch_account_last_used(&self, kind: AccountKind, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut acc) = self.accounts.get_mut(&(kind, id.to_string())) {
            acc.common_mut().last_used_at = Some(at);
        }
        Ok(())
    }

    async fn mark_account_limited(&self, kind: AccountKind, id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(mut acc) = self.accounts.get_mut(&(kind, id.to_string())) {
            acc.common_mut().rate_limited_at = Some(at);
        }
        Ok(())
    }

    async fn clear_account_limited(&self, kind: AccountKind, id: &str) -> anyhow::Result<()> {
        if let Some(mut acc) = self.accounts.get_mut(&(kind, id.to_string())) {
            acc.common_mut().rate_limited_at = None;
        }
        Ok(())
    }

    async fn get_group(&self, id: &str) -> anyhow::Result<Option<AccountGroup>> {
        Ok(self.groups.get(id).map(|e| e.clone()))
    }

    async fn put_group(&self, group: AccountGroup) -> anyhow::Result<()> {
        self.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn increment_counter(&self, scope: &CounterScope, delta: &CounterDelta) -> anyhow::Result<Counter> {
        let key = scope.store_key();
        let mut entry = self.counters.entry(key).or_insert_with(Counter::default);
        *entry = entry.add(delta);
        Ok(*entry)
    }

    async fn get_counter(&self, scope: &CounterScope) -> anyhow::Result<Counter> {
        Ok(self.counters.get(&scope.store_key()).map(|e| *e).unwrap_or_default())
    }

    async fn list_counters_with_prefix(&self, key_prefix: &str) -> anyhow::Result<Vec<(String, Counter)>> {
        Ok(self
            .counters
            .iter()
            .filter(|e| e.key().starts_with(key_prefix))
            .map(|e| {
                let suffix = e.key()[key_prefix.len()..].to_string();
                (suffix, *e.value())
            })
            .collect())
    }

    async fn session_get(&self, session_hash: &str) -> anyhow::Result<Option<SessionMapping>> {
        match self.sessions.get(session_hash) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.mapping.clone())),
            Some(_) => {
                drop(self.sessions.remove(session_hash));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn session_set(&self, session_hash: &str, mapping: SessionMapping, ttl_secs: u64) -> anyhow::Result<()> {
        self.sessions.insert(
            session_hash.to_string(),
            SessionEntry {
                mapping,
                expires_at: Instant::now() + std::time::Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn session_delete(&self, session_hash: &str) -> anyhow::Result<()> {
        self.sessions.remove(session_hash);
        Ok(())
    }

    async fn concurrency_incr(&self, key_id: &Uuid) -> anyhow::Result<i64> {
        let counter = self
            .concurrency
            .entry(*key_id)
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone();
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn concurrency_decr(&self, key_id: &Uuid) -> anyhow::Result<i64> {
        let counter = self
            .concurrency
            .entry(*key_id)
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone();
        Ok(counter.fetch_sub(1, Ordering::SeqCst) - 1)
    }

    async fn sliding_window_hit(&self, key: &str, window_secs: u64) -> anyhow::Result<u64> {
        let bucket = self
            .sliding_windows
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut guard = bucket.lock().unwrap();
        let now = Instant::now();
        let cutoff = now - std::time::Duration::from_secs(window_secs);
        while guard.front().map(|t| *t < cutoff).unwrap_or(false) {
            guard.pop_front();
        }
        guard.push_back(now);
        Ok(guard.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bucket;

    fn sample_key() -> ApiKey {
        use crate::model::*;
        ApiKey {
            id: Uuid::new_v4(),
            name: "test".into(),
            hashed_secret: "hash123".into(),
            is_active: true,
            created_at: Utc::now(),
            expires_at: None,
            permissions: Permissions::All,
            token_limit: 0,
            concurrency_limit: 0,
            rate_limit_window_sec: 60,
            rate_limit_requests: 0,
            daily_cost_limit: Default::default(),
            model_restriction: ModelRestriction::default(),
            client_restriction: ClientRestriction::default(),
            bindings: AccountBindings::default(),
            tags: vec![],
            last_used_at: None,
        }
    }

    #[tokio::test]
    async fn list_counters_with_prefix_returns_matching_suffixes() {
        let store = InMemoryStore::new();
        let daily = Bucket::Daily("2026-07-28".into());
        store
            .increment_counter(
                &CounterScope::KeyModel { key_id: "k1".into(), model: "claude-3-opus".into(), bucket: daily.clone() },
                &Counter { requests: 1, ..Default::default() },
            )
            .await
            .unwrap();
        store
            .increment_counter(
                &CounterScope::KeyModel { key_id: "k1".into(), model: "gpt-4o".into(), bucket: daily },
                &Counter { requests: 2, ..Default::default() },
            )
            .await
            .unwrap();

        let results = store.list_counters_with_prefix("usage:k1:model:daily:").await.unwrap();
        assert_eq!(results.len(), 2);
        let total: u64 = results.iter().map(|(_, c)| c.requests).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn put_and_find_by_hash_roundtrip() {
        let store = InMemoryStore::new();
        let key = sample_key();
        let id = key.id;
        store.put_api_key(key).await.unwrap();
        let found = store.find_api_key_by_hash("hash123").await.unwrap().unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn counter_increments_are_cumulative() {
        let store = InMemoryStore::new();
        let scope = CounterScope::Key { key_id: "k1".into(), bucket: Bucket::Lifetime };
        let delta = Counter { requests: 1, input_tokens: 10, ..Default::default() };
        store.increment_counter(&scope, &delta).await.unwrap();
        let total = store.increment_counter(&scope, &delta).await.unwrap();
        assert_eq!(total.requests, 2);
        assert_eq!(total.input_tokens, 20);
    }

    #[tokio::test]
    async fn two_calls_of_a_plus_b_equal_one_call_of_sum() {
        let store_split = InMemoryStore::new();
        let scope = CounterScope::Key { key_id: "k1".into(), bucket: Bucket::Lifetime };
        store_split
            .increment_counter(&scope, &Counter { input_tokens: 3, ..Default::default() })
            .await
            .unwrap();
        let split_total = store_split
            .increment_counter(&scope, &Counter { input_tokens: 4, ..Default::default() })
            .await
            .unwrap();

        let store_combined = InMemoryStore::new();
        let combined_total = store_combined
            .increment_counter(&scope, &Counter { input_tokens: 7, ..Default::default() })
            .await
            .unwrap();

        assert_eq!(split_total.input_tokens, combined_total.input_tokens);
    }

    #[tokio::test]
    async fn concurrency_incr_and_decr() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.concurrency_incr(&id).await.unwrap(), 1);
        assert_eq!(store.concurrency_incr(&id).await.unwrap(), 2);
        assert_eq!(store.concurrency_decr(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn session_set_get_delete() {
        let store = InMemoryStore::new();
        let mapping = SessionMapping { account_id: "a1".into(), account_kind: AccountKind::ClaudeOAuth };
        store.session_set("h1", mapping.clone(), 3600).await.unwrap();
        assert_eq!(store.session_get("h1").await.unwrap(), Some(mapping));
        store.session_delete("h1").await.unwrap();
        assert_eq!(store.session_get("h1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn session_expires_after_ttl() {
        let store = InMemoryStore::new();
        let mapping = SessionMapping { account_id: "a1".into(), account_kind: AccountKind::ClaudeOAuth };
        store.session_set("h1", mapping, 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(store.session_get("h1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sliding_window_counts_within_window_only() {
        let store = InMemoryStore::new();
        for _ in 0..3 {
            store.sliding_window_hit("k1", 60).await.unwrap();
        }
        let count = store.sliding_window_hit("k1", 60).await.unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn mark_and_clear_account_limited() {
        use crate::model::{AccountCommon, AccountStatus, AccountType, ModelSupport};
        let store = InMemoryStore::new();
        let account = UpstreamAccount::ClaudeOAuth {
            common: AccountCommon {
                id: "a1".into(),
                name: "a1".into(),
                is_active: true,
                status: AccountStatus::Active,
                account_type: AccountType::Shared,
                schedulable: true,
                priority: 50,
                last_used_at: None,
                rate_limited_at: None,
                model_support: ModelSupport::default(),
            },
            refresh_token: "r".into(),
        };
        store.put_account(account).await.unwrap();
        store
            .mark_account_limited(AccountKind::ClaudeOAuth, "a1", Utc::now())
            .await
            .unwrap();
        let acc = store.get_account(AccountKind::ClaudeOAuth, "a1").await.unwrap().unwrap();
        assert!(acc.rate_limited(Utc::now()));
        store.clear_account_limited(AccountKind::ClaudeOAuth, "a1").await.unwrap();
        let acc = store.get_account(AccountKind::ClaudeOAuth, "a1").await.unwrap().unwrap();
        assert!(!acc.rate_limited(Utc::now()));
    }
}
