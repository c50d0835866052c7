use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::server::{self, AppContext, NullUpstreamRelay};

/// CLI arguments forwarded from `main()`.
pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
    pub admin_listen: String,
}

/// Gateway lifecycle: init → load config → build context → serve → shutdown.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    init_tracing();

    let config = GatewayConfig::load(&args.config_path)?;
    let ctx = AppContext::new(config).await?;

    let shutdown = Arc::new(Notify::new());
    start_cleanup_loop(&ctx, &shutdown);
    start_admin_server(&ctx, &args);

    tracing::info!(listen = %args.listen, "server: starting gateway");

    let gateway_handle = tokio::spawn({
        let listen = args.listen.clone();
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        let relay: Arc<dyn server::UpstreamRelay> = Arc::new(NullUpstreamRelay);
        async move { server::run_gateway_server(&listen, ctx, relay, shutdown).await }
    });

    wait_for_shutdown(&shutdown).await;

    if let Err(e) = gateway_handle.await {
        tracing::error!("server: gateway task error: {}", e);
    }

    tracing::info!("server: shutdown complete");
    Ok(())
}

fn init_tracing() {
    let (non_blocking, guard) = tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(128_000)
        .lossy(true)
        .finish(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .json(),
        )
        .init();

    std::mem::forget(guard);
}

/// Periodic sweep: lazily disable expired keys so they don't linger in an
/// active-but-expired state between admission attempts (SPEC_FULL.md §3
/// lifecycle note).
fn start_cleanup_loop(ctx: &AppContext, shutdown: &Arc<Notify>) {
    let ctx = ctx.clone();
    let shutdown = shutdown.clone();

    tokio::spawn(async move {
        loop {
            let interval = ctx.config.load().cleanup_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
                _ = shutdown.notified() => return,
            }

            match ctx.store.list_api_keys().await {
                Ok(keys) => {
                    let now = chrono::Utc::now();
                    for key in keys.iter().filter(|k| k.is_active && k.is_expired(now)) {
                        if let Err(e) = ctx.store.disable_api_key(&key.id).await {
                            tracing::warn!(key_id = %key.id, error = %e, "cleanup: failed to disable expired key");
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "cleanup: failed to list api keys"),
            }
        }
    });
}

fn start_admin_server(ctx: &AppContext, args: &BootstrapArgs) {
    let ctx = ctx.clone();
    let admin_addr = args.admin_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = server::run_admin_server(&admin_addr, ctx).await {
            tracing::error!("server: admin failed, error={}", e);
        }
    });
}

async fn wait_for_shutdown(shutdown: &Arc<Notify>) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("server: received SIGINT, shutting down"),
        _ = terminate => tracing::info!("server: received SIGTERM, shutting down"),
    }

    shutdown.notify_waiters();
}
