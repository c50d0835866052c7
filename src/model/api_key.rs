use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountKind, Platform};

/// Which upstream platforms an `ApiKey` is permitted to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    Claude,
    Gemini,
    All,
}

impl Permissions {
    pub fn covers(self, platform: Platform) -> bool {
        match self {
            Permissions::All => true,
            Permissions::Claude => platform == Platform::Claude,
            Permissions::Gemini => platform == Platform::Gemini,
        }
    }
}

/// Resolution of SPEC_FULL.md Open Question 1: the ambiguous `restrictedModels`
/// field becomes an explicit allow/deny mode instead of an inferred one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionMode {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRestriction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_restriction_mode")]
    pub mode: RestrictionMode,
    #[serde(default)]
    pub models: Vec<String>,
}

fn default_restriction_mode() -> RestrictionMode {
    RestrictionMode::Allow
}

impl Default for ModelRestriction {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: RestrictionMode::Allow,
            models: Vec::new(),
        }
    }
}

impl ModelRestriction {
    pub fn allows(&self, requested_model: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let contains = self.models.iter().any(|m| m == requested_model);
        match self.mode {
            RestrictionMode::Allow => contains,
            RestrictionMode::Deny => !contains,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRestriction {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_user_agents: Vec<String>,
}

impl ClientRestriction {
    pub fn allows(&self, client_id: &str) -> bool {
        !self.enabled || self.allowed_user_agents.iter().any(|c| c == client_id)
    }
}

/// A single platform binding on an `ApiKey`: either an individual upstream
/// account id, or a `group:<id>` reference widening the candidate pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Individual(String),
    Group(String),
}

impl Binding {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix("group:") {
            Some(id) => Binding::Group(id.to_string()),
            None => Binding::Individual(raw.to_string()),
        }
    }
}

impl Serialize for Binding {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Binding::Individual(id) => serializer.serialize_str(id),
            Binding::Group(id) => serializer.serialize_str(&format!("group:{id}")),
        }
    }
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Binding::parse(&raw))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountBindings {
    #[serde(default)]
    pub claude_oauth: Option<Binding>,
    #[serde(default)]
    pub claude_console: Option<Binding>,
    #[serde(default)]
    pub openai: Option<Binding>,
    #[serde(default)]
    pub gemini: Option<Binding>,
}

impl AccountBindings {
    /// Bindings in the fixed resolution order of SPEC_FULL.md §4.5 rule 1,
    /// restricted to the kinds applicable to `platform`.
    pub fn ordered_for_platform(&self, platform: Platform) -> Vec<(AccountKind, &Binding)> {
        let mut out = Vec::new();
        match platform {
            Platform::Claude => {
                if let Some(b) = &self.claude_oauth {
                    out.push((AccountKind::ClaudeOAuth, b));
                }
                if let Some(b) = &self.claude_console {
                    out.push((AccountKind::ClaudeConsole, b));
                }
            }
            Platform::OpenAi => {
                if let Some(b) = &self.openai {
                    out.push((AccountKind::OpenAi, b));
                }
            }
            Platform::Gemini => {
                if let Some(b) = &self.gemini {
                    out.push((AccountKind::Gemini, b));
                }
            }
        }
        out
    }
}

/// Logical credential issued to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub hashed_secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub permissions: Permissions,
    #[serde(default)]
    pub token_limit: u64,
    #[serde(default)]
    pub concurrency_limit: u32,
    #[serde(default)]
    pub rate_limit_window_sec: u64,
    #[serde(default)]
    pub rate_limit_requests: u64,
    #[serde(default)]
    pub daily_cost_limit: Decimal,
    #[serde(default)]
    pub model_restriction: ModelRestriction,
    #[serde(default)]
    pub client_restriction: ClientRestriction,
    #[serde(default)]
    pub bindings: AccountBindings,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| at >= e).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_parses_group_prefix() {
        assert_eq!(Binding::parse("group:team-a"), Binding::Group("team-a".into()));
        assert_eq!(Binding::parse("acc-123"), Binding::Individual("acc-123".into()));
    }

    #[test]
    fn permissions_all_covers_every_platform() {
        assert!(Permissions::All.covers(Platform::Claude));
        assert!(Permissions::All.covers(Platform::OpenAi));
        assert!(Permissions::All.covers(Platform::Gemini));
    }

    #[test]
    fn permissions_claude_does_not_cover_openai() {
        assert!(!Permissions::Claude.covers(Platform::OpenAi));
    }

    #[test]
    fn model_restriction_disabled_allows_everything() {
        let r = ModelRestriction::default();
        assert!(r.allows("anything"));
    }

    #[test]
    fn model_restriction_allow_mode() {
        let r = ModelRestriction {
            enabled: true,
            mode: RestrictionMode::Allow,
            models: vec!["gpt-4o".into()],
        };
        assert!(r.allows("gpt-4o"));
        assert!(!r.allows("gpt-4o-mini"));
    }

    #[test]
    fn model_restriction_deny_mode() {
        let r = ModelRestriction {
            enabled: true,
            mode: RestrictionMode::Deny,
            models: vec!["gpt-4o".into()],
        };
        assert!(!r.allows("gpt-4o"));
        assert!(r.allows("gpt-4o-mini"));
    }

    #[test]
    fn expires_at_now_is_expired() {
        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            name: "k".into(),
            hashed_secret: "h".into(),
            is_active: true,
            created_at: now,
            expires_at: Some(now),
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
        assert!(key.is_expired(now));
    }
}
