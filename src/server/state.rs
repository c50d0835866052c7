use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;

use crate::admission::KeyAdmission;
use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::pricing::PriceTable;
use crate::ratelimit::RateLimiter;
use crate::scheduler::AccountScheduler;
use crate::store::{InMemoryStore, Store};
use crate::usage::UsageRecorder;

/// Root aggregate the HTTP layer is built around, replacing the teacher's
/// collection of global singletons with one typed, cheaply cloneable handle
/// (SPEC_FULL.md Design Note: "no global mutable state; an explicit
/// `AppContext`").
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub store: Arc<dyn Store>,
    pub price_table: Arc<ArcSwap<PriceTable>>,
    pub metrics: Metrics,
    pub admission: Arc<KeyAdmission>,
    pub scheduler: Arc<AccountScheduler>,
    pub rate_limiter: Arc<RateLimiter>,
    pub usage: Arc<UsageRecorder>,
}

impl AppContext {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        store.spawn_gc();
        let store: Arc<dyn Store> = store;

        let price_table = match &config.price_table_path {
            Some(path) => load_price_table(path)?,
            None => PriceTable::default(),
        };

        let metrics = Metrics::install();

        let admission = Arc::new(KeyAdmission::new(
            Arc::clone(&store),
            config.secret_prefix.clone(),
            config.global_pepper.clone(),
        ));
        let scheduler = Arc::new(AccountScheduler::new(Arc::clone(&store)));
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&store)));
        let usage = Arc::new(UsageRecorder::new(Arc::clone(&store)));

        Ok(Self {
            config: Arc::new(ArcSwap::new(Arc::new(config))),
            store,
            price_table: Arc::new(ArcSwap::new(Arc::new(price_table))),
            metrics,
            admission,
            scheduler,
            rate_limiter,
            usage,
        })
    }

    /// Reloads the price table from the configured path (Open Question 2
    /// resolution: one callable method, not a background poller).
    pub fn reload_price_table(&self) -> Result<()> {
        let cfg = self.config.load();
        let Some(path) = cfg.price_table_path.as_ref() else {
            return Ok(());
        };
        let table = PriceTable::load(path)?;
        self.price_table.store(Arc::new(table));
        tracing::info!(path = %path.display(), "price table reloaded");
        Ok(())
    }

    /// Readiness check: the store answers a trivial query.
    pub async fn is_ready(&self) -> bool {
        self.store.get_counter(&crate::model::CounterScope::Key {
            key_id: "__readiness_probe__".into(),
            bucket: crate::model::Bucket::Lifetime,
        })
        .await
        .is_ok()
    }
}

fn load_price_table(path: &Path) -> Result<PriceTable> {
    if path.exists() {
        PriceTable::load(path)
    } else {
        tracing::warn!(path = %path.display(), "price table file not found, starting with an empty table");
        Ok(PriceTable::default())
    }
}
