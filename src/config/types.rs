use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Deserialize a `T` that implements `Default` — treats JSON/TOML `null` the
/// same as a missing field (returns `T::default()`).
#[allow(dead_code)]
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration. Loaded from an optional TOML/JSON file,
/// then overridden by `GATEWAY_*` environment variables, then validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// Prefix every presented API-key secret must begin with, e.g. `"sk-gw-"`.
    #[serde(default = "default_secret_prefix")]
    pub secret_prefix: String,

    /// Pepper mixed into every secret hash alongside the per-key prefix.
    /// Must be set via `GATEWAY_GLOBAL_PEPPER` in production; the default is
    /// only safe for local development.
    #[serde(default = "default_global_pepper")]
    pub global_pepper: String,

    /// Interval between background sweeps: lazy-disable expired keys, evict
    /// stale rate-limit/session entries.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Per-request deadline, covering the full response including streaming.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Path to a JSON price table. Loaded once at startup into an
    /// `ArcSwap<PriceTable>`; absent means every model prices at zero.
    #[serde(default)]
    pub price_table_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            secret_prefix: default_secret_prefix(),
            global_pepper: default_global_pepper(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            price_table_path: None,
        }
    }
}

fn default_secret_prefix() -> String {
    "sk-gw-".to_string()
}

fn default_global_pepper() -> String {
    "change-me-in-production".to_string()
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_admin_listen")]
    pub admin_listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            admin_listen: default_admin_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_admin_listen() -> String {
    "0.0.0.0:9091".to_string()
}

/// Selects the `Store` (C1 KeyStore) implementation the gateway runs
/// against. Only `InMemory` ships in this crate; a durable networked backend
/// is an external collaborator (see SPEC_FULL.md §1) and would add a variant
/// here plus a corresponding `Store` impl without touching any caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Connection string for a networked backend. Unused by `InMemory`;
    /// carried so the config shape does not change when one is added.
    #[serde(default)]
    pub address: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            address: None,
        }
    }
}
