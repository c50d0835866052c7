pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file (if it exists) and apply environment
    /// variable overrides. When the file does not exist, built-in defaults
    /// are used — the gateway starts with zero configuration for local
    /// development (global pepper included, with a loud warning).
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        if config.global_pepper == GatewayConfig::default().global_pepper {
            tracing::warn!(
                "global_pepper is at its default value; set GATEWAY_GLOBAL_PEPPER in production"
            );
        }

        tracing::info!("loaded gateway configuration");
        Ok(config)
    }

    /// Apply `GATEWAY_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEWAY_LISTEN") {
            self.server.listen = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_ADMIN_LISTEN") {
            self.server.admin_listen = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SECRET_PREFIX") {
            self.secret_prefix = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_GLOBAL_PEPPER") {
            self.global_pepper = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_CLEANUP_INTERVAL_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.cleanup_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = v.parse::<u64>() {
                self.request_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_PRICE_TABLE_PATH") {
            self.price_table_path = Some(v.into());
        }
        if let Ok(v) = std::env::var("GATEWAY_STORE_ADDRESS") {
            self.store.address = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret_prefix.is_empty() {
            anyhow::bail!("secret_prefix cannot be empty");
        }
        if self.global_pepper.is_empty() {
            anyhow::bail!("global_pepper cannot be empty");
        }
        if self.cleanup_interval_secs == 0 {
            anyhow::bail!("cleanup_interval_secs must be greater than zero");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        self.server
            .listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid server.listen address {:?}: {e}", self.server.listen))?;
        self.server
            .admin_listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                anyhow::anyhow!(
                    "invalid server.admin_listen address {:?}: {e}",
                    self.server.admin_listen
                )
            })?;
        Ok(())
    }
}
