use std::sync::Arc;

use chrono::Utc;

use crate::error::GatewayError;
use crate::model::{AccountCapabilities, AccountKind, ApiKey, Binding, Platform, UpstreamAccount};
use crate::session::SessionMap;
use crate::store::Store;

/// The account an incoming request should be routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingOutcome {
    pub account_id: String,
    pub account_kind: AccountKind,
}

/// Selects the upstream account that serves one admitted request
/// (SPEC_FULL.md §4.5, C5 AccountScheduler). Resolution runs the four rules
/// in fixed precedence order and never mixes accounts across kinds within a
/// platform except via an explicit group.
pub struct AccountScheduler {
    store: Arc<dyn Store>,
    sessions: SessionMap,
}

impl AccountScheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let sessions = SessionMap::new(Arc::clone(&store));
        Self { store, sessions }
    }

    pub async fn select(
        &self,
        key: &ApiKey,
        platform: Platform,
        session_hash: Option<&str>,
        requested_model: Option<&str>,
    ) -> Result<SchedulingOutcome, GatewayError> {
        let started = std::time::Instant::now();
        let result = self.select_inner(key, platform, session_hash, requested_model).await;
        metrics::histogram!("gateway_scheduling_duration_seconds").record(started.elapsed().as_secs_f64());
        let (rule, outcome) = match &result {
            Ok((rule, _)) => (*rule, "selected"),
            Err(_) => ("none", "rejected"),
        };
        metrics::counter!("gateway_scheduling_total", "rule" => rule, "outcome" => outcome).increment(1);
        result.map(|(_, outcome)| outcome)
    }

    async fn select_inner(
        &self,
        key: &ApiKey,
        platform: Platform,
        session_hash: Option<&str>,
        requested_model: Option<&str>,
    ) -> Result<(&'static str, SchedulingOutcome), GatewayError> {
        let now = Utc::now();

        // Rule 1: dedicated binding, in fixed per-platform kind order.
        for (kind, binding) in key.bindings.ordered_for_platform(platform) {
            if let Binding::Individual(account_id) = binding {
                match self.load_eligible(kind, account_id, now, requested_model).await? {
                    Some(outcome) => return Ok(("dedicated", outcome)),
                    // A configured dedicated account that's missing or
                    // ineligible falls through to the remaining rules
                    // rather than failing the request outright.
                    None => continue,
                }
            }
        }

        // Rule 2: group binding.
        for (_, binding) in key.bindings.ordered_for_platform(platform) {
            if let Binding::Group(group_id) = binding {
                return self
                    .select_from_group(group_id, platform, now, requested_model)
                    .await
                    .map(|outcome| ("group", outcome));
            }
        }

        // Rule 3: sticky session.
        if let Some(hash) = session_hash {
            if let Some(mapping) = self
                .sessions
                .get(hash)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?
            {
                match self
                    .load_eligible(mapping.account_kind, &mapping.account_id, now, requested_model)
                    .await?
                {
                    Some(outcome) => return Ok(("sticky_session", outcome)),
                    // The mapped account is no longer eligible: delete the
                    // stale mapping rather than leave it for rule 4 to
                    // maybe overwrite.
                    None => self
                        .sessions
                        .delete(hash)
                        .await
                        .map_err(|e| GatewayError::InternalError(e.to_string()))?,
                }
            }
        }

        // Rule 4: shared pool across every account kind for this platform.
        let outcome = self.select_from_shared_pool(platform, now, requested_model).await?;

        if let Some(hash) = session_hash {
            self.sessions
                .set(hash, &outcome.account_id, outcome.account_kind)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        }

        Ok(("shared_pool", outcome))
    }

    async fn load_eligible(
        &self,
        kind: AccountKind,
        account_id: &str,
        at: chrono::DateTime<Utc>,
        requested_model: Option<&str>,
    ) -> Result<Option<SchedulingOutcome>, GatewayError> {
        let account = self
            .store
            .get_account(kind, account_id)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        Ok(account
            .filter(|a| a.eligible(at, requested_model))
            .map(|a| SchedulingOutcome { account_id: a.id().to_string(), account_kind: a.kind() }))
    }

    async fn select_from_group(
        &self,
        group_id: &str,
        platform: Platform,
        at: chrono::DateTime<Utc>,
        requested_model: Option<&str>,
    ) -> Result<SchedulingOutcome, GatewayError> {
        let group = self
            .store
            .get_group(group_id)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?
            .ok_or(GatewayError::GroupMisconfigured)?;
        if group.platform != platform || group.member_ids.is_empty() {
            return Err(GatewayError::GroupMisconfigured);
        }

        let kinds = Self::kinds_for(platform);
        let mut candidates = Vec::new();
        for kind in kinds {
            for member_id in &group.member_ids {
                if let Some(account) = self
                    .store
                    .get_account(kind, member_id)
                    .await
                    .map_err(|e| GatewayError::InternalError(e.to_string()))?
                {
                    if account.eligible(at, requested_model) {
                        candidates.push(account);
                    }
                }
            }
        }

        Self::rank(&mut candidates);
        candidates
            .first()
            .map(|a| SchedulingOutcome { account_id: a.id().to_string(), account_kind: a.kind() })
            .ok_or(GatewayError::NoAvailableAccounts { requested_model: requested_model.map(str::to_string) })
    }

    async fn select_from_shared_pool(
        &self,
        platform: Platform,
        at: chrono::DateTime<Utc>,
        requested_model: Option<&str>,
    ) -> Result<SchedulingOutcome, GatewayError> {
        let mut candidates = Vec::new();
        for kind in Self::kinds_for(platform) {
            let accounts = self
                .store
                .list_accounts(kind)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            candidates.extend(
                accounts
                    .into_iter()
                    .filter(|a| a.account_type() == crate::model::AccountType::Shared)
                    .filter(|a| a.eligible(at, requested_model)),
            );
        }

        Self::rank(&mut candidates);
        candidates
            .first()
            .map(|a| SchedulingOutcome { account_id: a.id().to_string(), account_kind: a.kind() })
            .ok_or(GatewayError::NoAvailableAccounts { requested_model: requested_model.map(str::to_string) })
    }

    fn kinds_for(platform: Platform) -> &'static [AccountKind] {
        match platform {
            Platform::Claude => &[AccountKind::ClaudeOAuth, AccountKind::ClaudeConsole],
            Platform::OpenAi => &[AccountKind::OpenAi],
            Platform::Gemini => &[AccountKind::Gemini],
        }
    }

    /// Stable three-level ranking (SPEC_FULL.md §4.5): lowest `priority`
    /// first, then least-recently-used, then `id` as the final tiebreak so
    /// two equally-idle, equal-priority accounts still resolve
    /// deterministically across calls.
    fn rank(accounts: &mut [UpstreamAccount]) {
        accounts.sort_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| a.last_used_at().cmp(&b.last_used_at()))
                .then_with(|| a.id().cmp(b.id()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AccountBindings, AccountCommon, AccountStatus, AccountType, AccountGroup, ClientRestriction, ModelRestriction, ModelSupport, Permissions};
    use crate::store::InMemoryStore;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn make_account(id: &str, kind: AccountKind, priority: i32, account_type: AccountType) -> UpstreamAccount {
        let common = AccountCommon {
            id: id.to_string(),
            name: id.to_string(),
            is_active: true,
            status: AccountStatus::Active,
            account_type,
            schedulable: true,
            priority,
            last_used_at: None,
            rate_limited_at: None,
            model_support: ModelSupport::default(),
        };
        match kind {
            AccountKind::ClaudeOAuth => UpstreamAccount::ClaudeOAuth { common, refresh_token: "r".into() },
            AccountKind::ClaudeConsole => UpstreamAccount::ClaudeConsole { common, api_key: "k".into() },
            AccountKind::OpenAi => UpstreamAccount::OpenAi { common, api_key: "k".into() },
            AccountKind::Gemini => UpstreamAccount::Gemini { common, api_key: "k".into() },
        }
    }

    fn base_key() -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            name: "k".into(),
            hashed_secret: "h".into(),
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
        }
    }

    #[tokio::test]
    async fn dedicated_binding_wins_over_shared_pool() {
        let store = Arc::new(InMemoryStore::new());
        store.put_account(make_account("dedicated-1", AccountKind::ClaudeOAuth, 10, AccountType::Dedicated)).await.unwrap();
        store.put_account(make_account("shared-1", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();

        let mut key = base_key();
        key.bindings.claude_oauth = Some(Binding::Individual("dedicated-1".into()));

        let scheduler = AccountScheduler::new(store);
        let outcome = scheduler.select(&key, Platform::Claude, None, None).await.unwrap();
        assert_eq!(outcome.account_id, "dedicated-1");
    }

    #[tokio::test]
    async fn shared_pool_picks_lowest_priority_first() {
        let store = Arc::new(InMemoryStore::new());
        store.put_account(make_account("low-prio", AccountKind::ClaudeOAuth, 10, AccountType::Shared)).await.unwrap();
        store.put_account(make_account("high-prio", AccountKind::ClaudeOAuth, 90, AccountType::Shared)).await.unwrap();

        let scheduler = AccountScheduler::new(store);
        let outcome = scheduler.select(&base_key(), Platform::Claude, None, None).await.unwrap();
        assert_eq!(outcome.account_id, "low-prio");
    }

    #[tokio::test]
    async fn sticky_session_reuses_the_first_assigned_account() {
        let store = Arc::new(InMemoryStore::new());
        store.put_account(make_account("acc-a", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();
        store.put_account(make_account("acc-b", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();

        let scheduler = AccountScheduler::new(store);
        let first = scheduler.select(&base_key(), Platform::Claude, Some("sess-1"), None).await.unwrap();
        let second = scheduler.select(&base_key(), Platform::Claude, Some("sess-1"), None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn missing_dedicated_account_falls_through_to_shared_pool() {
        let store = Arc::new(InMemoryStore::new());
        store.put_account(make_account("shared-1", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();

        let mut key = base_key();
        key.bindings.claude_oauth = Some(Binding::Individual("missing".into()));

        let scheduler = AccountScheduler::new(store);
        let outcome = scheduler.select(&key, Platform::Claude, None, None).await.unwrap();
        assert_eq!(outcome.account_id, "shared-1");
    }

    #[tokio::test]
    async fn no_eligible_accounts_errors() {
        let store = Arc::new(InMemoryStore::new());
        let scheduler = AccountScheduler::new(store);
        let err = scheduler.select(&base_key(), Platform::Claude, None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoAvailableAccounts { .. }));
    }

    #[tokio::test]
    async fn group_binding_selects_among_members_only() {
        let store = Arc::new(InMemoryStore::new());
        store.put_account(make_account("member-1", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();
        store.put_account(make_account("non-member", AccountKind::ClaudeOAuth, 0, AccountType::Shared)).await.unwrap();
        store
            .put_group(AccountGroup {
                id: "grp-1".into(),
                name: "grp-1".into(),
                platform: Platform::Claude,
                member_ids: vec!["member-1".into()],
            })
            .await
            .unwrap();

        let mut key = base_key();
        key.bindings.claude_oauth = Some(Binding::Group("grp-1".into()));

        let scheduler = AccountScheduler::new(store);
        let outcome = scheduler.select(&key, Platform::Claude, None, None).await.unwrap();
        assert_eq!(outcome.account_id, "member-1");
    }

    #[tokio::test]
    async fn missing_group_is_misconfigured() {
        let store = Arc::new(InMemoryStore::new());
        let mut key = base_key();
        key.bindings.claude_oauth = Some(Binding::Group("does-not-exist".into()));

        let scheduler = AccountScheduler::new(store);
        let err = scheduler.select(&key, Platform::Claude, None, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::GroupMisconfigured));
    }
}
