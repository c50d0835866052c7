use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    ClaudeOAuth,
    ClaudeConsole,
    OpenAi,
    Gemini,
}

impl AccountKind {
    pub fn platform(self) -> Platform {
        match self {
            AccountKind::ClaudeOAuth | AccountKind::ClaudeConsole => Platform::Claude,
            AccountKind::OpenAi => Platform::OpenAi,
            AccountKind::Gemini => Platform::Gemini,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::ClaudeOAuth => "claude_oauth",
            AccountKind::ClaudeConsole => "claude_console",
            AccountKind::OpenAi => "openai",
            AccountKind::Gemini => "gemini",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Error,
    Blocked,
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Shared,
    Dedicated,
}

/// What models an account can serve. The Console variant of Claude maps a
/// client-facing model id to an upstream model id; everything else is a
/// plain allow-list, where an empty list means "all models".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSupport {
    AllowList(Vec<String>),
    Mapping(HashMap<String, String>),
}

impl Default for ModelSupport {
    fn default() -> Self {
        ModelSupport::AllowList(Vec::new())
    }
}

impl ModelSupport {
    pub fn supports(&self, requested: Option<&str>) -> bool {
        match self {
            ModelSupport::AllowList(models) => {
                models.is_empty() || requested.map(|m| models.iter().any(|x| x == m)).unwrap_or(true)
            }
            ModelSupport::Mapping(map) => {
                map.is_empty() || requested.map(|m| map.contains_key(m)).unwrap_or(true)
            }
        }
    }
}

/// Fields shared by every upstream account variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCommon {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub status: AccountStatus,
    pub account_type: AccountType,
    #[serde(default = "default_true")]
    pub schedulable: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rate_limited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub model_support: ModelSupport,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    50
}

/// One of the upstream provider account families this gateway schedules
/// across. Modeled as a sum type per SPEC_FULL.md Design Note: the scheduler
/// only ever touches the [`AccountCapabilities`] trait, never a variant's
/// credential fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpstreamAccount {
    ClaudeOAuth { common: AccountCommon, refresh_token: String },
    ClaudeConsole { common: AccountCommon, api_key: String },
    OpenAi { common: AccountCommon, api_key: String },
    Gemini { common: AccountCommon, api_key: String },
}

/// Capability surface the scheduler (C5) depends on. One impl per
/// `UpstreamAccount` variant; adding a new provider means adding a variant
/// and an impl, never touching scheduling logic.
pub trait AccountCapabilities {
    fn kind(&self) -> AccountKind;
    fn common(&self) -> &AccountCommon;

    fn id(&self) -> &str {
        &self.common().id
    }

    fn priority(&self) -> i32 {
        self.common().priority
    }

    fn last_used_at(&self) -> Option<DateTime<Utc>> {
        self.common().last_used_at
    }

    fn account_type(&self) -> AccountType {
        self.common().account_type
    }

    fn rate_limited(&self, at: DateTime<Utc>) -> bool {
        match self.common().rate_limited_at {
            Some(marked) => at < marked + Duration::hours(1),
            None => false,
        }
    }

    fn model_supported(&self, requested_model: Option<&str>) -> bool {
        self.common().model_support.supports(requested_model)
    }

    /// The intrinsic eligibility predicate (SPEC_FULL.md §3): does not check
    /// the dedicated-binding/group-membership condition, which is a
    /// property of *how* the scheduler reached this account, not of the
    /// account itself.
    fn eligible(&self, at: DateTime<Utc>, requested_model: Option<&str>) -> bool {
        let common = self.common();
        common.is_active
            && common.status == AccountStatus::Active
            && common.schedulable
            && !self.rate_limited(at)
            && self.model_supported(requested_model)
    }
}

impl AccountCapabilities for UpstreamAccount {
    fn kind(&self) -> AccountKind {
        match self {
            UpstreamAccount::ClaudeOAuth { .. } => AccountKind::ClaudeOAuth,
            UpstreamAccount::ClaudeConsole { .. } => AccountKind::ClaudeConsole,
            UpstreamAccount::OpenAi { .. } => AccountKind::OpenAi,
            UpstreamAccount::Gemini { .. } => AccountKind::Gemini,
        }
    }

    fn common(&self) -> &AccountCommon {
        match self {
            UpstreamAccount::ClaudeOAuth { common, .. } => common,
            UpstreamAccount::ClaudeConsole { common, .. } => common,
            UpstreamAccount::OpenAi { common, .. } => common,
            UpstreamAccount::Gemini { common, .. } => common,
        }
    }
}

impl UpstreamAccount {
    pub fn common_mut(&mut self) -> &mut AccountCommon {
        match self {
            UpstreamAccount::ClaudeOAuth { common, .. } => common,
            UpstreamAccount::ClaudeConsole { common, .. } => common,
            UpstreamAccount::OpenAi { common, .. } => common,
            UpstreamAccount::Gemini { common, .. } => common,
        }
    }
}

/// Named set of accounts of one platform; an `ApiKey` binding of the form
/// `group:<id>` widens the candidate pool to this group's members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountGroup {
    pub id: String,
    pub name: String,
    pub platform: Platform,
    pub member_ids: Vec<String>,
}

/// `sessionHash -> {accountId, accountKind}`, TTL'd at the store layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMapping {
    pub account_id: String,
    pub account_kind: AccountKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(priority: i32, rate_limited_at: Option<DateTime<Utc>>) -> UpstreamAccount {
        UpstreamAccount::ClaudeOAuth {
            common: AccountCommon {
                id: "a1".into(),
                name: "a1".into(),
                is_active: true,
                status: AccountStatus::Active,
                account_type: AccountType::Shared,
                schedulable: true,
                priority,
                last_used_at: None,
                rate_limited_at,
                model_support: ModelSupport::AllowList(vec![]),
            },
            refresh_token: "r".into(),
        }
    }

    #[test]
    fn eligible_when_active_and_not_rate_limited() {
        let acc = account(50, None);
        assert!(acc.eligible(Utc::now(), None));
    }

    #[test]
    fn rate_limited_within_one_hour() {
        let acc = account(50, Some(Utc::now()));
        assert!(!acc.eligible(Utc::now(), None));
    }

    #[test]
    fn rate_limit_clears_after_one_hour() {
        let marked = Utc::now() - Duration::hours(1) - Duration::seconds(1);
        let acc = account(50, Some(marked));
        assert!(acc.eligible(Utc::now(), None));
    }

    #[test]
    fn rate_limit_boundary_still_limited_just_under_an_hour() {
        let marked = Utc::now() - Duration::hours(1) + Duration::seconds(1);
        let acc = account(50, Some(marked));
        assert!(!acc.eligible(Utc::now(), None));
    }

    #[test]
    fn empty_supported_models_allows_everything() {
        let support = ModelSupport::AllowList(vec![]);
        assert!(support.supports(Some("gpt-4o-mini")));
        assert!(support.supports(None));
    }

    #[test]
    fn allow_list_filters_unsupported_models() {
        let support = ModelSupport::AllowList(vec!["gpt-4o".to_string()]);
        assert!(support.supports(Some("gpt-4o")));
        assert!(!support.supports(Some("gpt-4o-mini")));
    }
}
