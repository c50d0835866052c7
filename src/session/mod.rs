use std::sync::Arc;

use crate::model::{AccountKind, SessionMapping};
use crate::store::Store;

const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Sticky-session lookup used by the scheduler's rule 3 (SPEC_FULL.md §4.5):
/// `sessionHash -> {accountId, accountKind}`, TTL'd and never refreshed on
/// reuse — a session sticks to the account it first landed on for exactly
/// one hour from creation, not one hour from last use.
pub struct SessionMap {
    store: Arc<dyn Store>,
    ttl_secs: u64,
}

impl SessionMap {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, ttl_secs: DEFAULT_SESSION_TTL_SECS }
    }

    pub async fn get(&self, session_hash: &str) -> anyhow::Result<Option<SessionMapping>> {
        self.store.session_get(session_hash).await
    }

    pub async fn set(&self, session_hash: &str, account_id: &str, account_kind: AccountKind) -> anyhow::Result<()> {
        let mapping = SessionMapping { account_id: account_id.to_string(), account_kind };
        self.store.session_set(session_hash, mapping, self.ttl_secs).await
    }

    pub async fn delete(&self, session_hash: &str) -> anyhow::Result<()> {
        self.store.session_delete(session_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[tokio::test]
    async fn set_then_get_returns_the_same_mapping() {
        let sessions = SessionMap::new(Arc::new(InMemoryStore::new()));
        sessions.set("sess-1", "acc-1", AccountKind::ClaudeOAuth).await.unwrap();
        let mapping = sessions.get("sess-1").await.unwrap().unwrap();
        assert_eq!(mapping.account_id, "acc-1");
        assert_eq!(mapping.account_kind, AccountKind::ClaudeOAuth);
    }

    #[tokio::test]
    async fn delete_clears_the_mapping() {
        let sessions = SessionMap::new(Arc::new(InMemoryStore::new()));
        sessions.set("sess-1", "acc-1", AccountKind::ClaudeOAuth).await.unwrap();
        sessions.delete("sess-1").await.unwrap();
        assert!(sessions.get("sess-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let sessions = SessionMap::new(Arc::new(InMemoryStore::new()));
        assert!(sessions.get("never-seen").await.unwrap().is_none());
    }
}
