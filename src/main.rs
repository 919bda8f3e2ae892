use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use whatsapp_relay::api::app_router;
use whatsapp_relay::config::AppConfig;
use whatsapp_relay::gateway::{CloudApiClient, MessagingGateway, UnconfiguredGateway};
use whatsapp_relay::pipeline::{MessageProcessor, RuleTable};
use whatsapp_relay::realtime::{EventBroadcaster, SessionRegistry};
use whatsapp_relay::store::{LibSqlStore, MessageStore};
use whatsapp_relay::tracking::{self, StatusTracker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Keep the appender guard alive for the life of the process.
    let _log_guard = init_tracing(&config);

    eprintln!("📨 WhatsApp Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook:  http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   API:      http://0.0.0.0:{}/api/messages/send", config.port);
    eprintln!("   Realtime: ws://0.0.0.0:{}/ws?viewer_id=...", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn MessageStore> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );

    // ── Rules ────────────────────────────────────────────────────────────
    let rules = load_rules(&config, store.as_ref()).await?;
    info!(count = rules.len(), "Auto-response rules loaded");

    // ── Gateway ──────────────────────────────────────────────────────────
    let gateway: Arc<dyn MessagingGateway> = if config.gateway.is_configured() {
        Arc::new(CloudApiClient::new(&config.gateway).context("failed to build gateway client")?)
    } else {
        let missing = config.gateway.missing();
        warn!(missing = ?missing, "Gateway not configured; sends and handshakes will be refused");
        Arc::new(UnconfiguredGateway::new(missing))
    };

    // ── Pipeline ─────────────────────────────────────────────────────────
    let registry = Arc::new(SessionRegistry::new());
    let tracker = Arc::new(StatusTracker::new());
    let processor = Arc::new(
        MessageProcessor::new(
            gateway,
            rules,
            EventBroadcaster::new(registry),
            Arc::clone(&tracker),
        )
        .with_store(store),
    );

    let _prune_handle = tracking::spawn_prune_task(tracker, config.status_retention);

    // ── Server ───────────────────────────────────────────────────────────
    let app = app_router(processor, &config);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!(port = config.port, "WhatsApp relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("WhatsApp relay stopped");
    Ok(())
}

/// Stdout logging, plus a daily-rolling file when `RELAY_LOG_DIR` is set.
fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer().with_target(false);

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "whatsapp-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stdout).init();
            None
        }
    }
}

/// Rules file, then persisted rules, then the built-in table.
async fn load_rules(config: &AppConfig, store: &dyn MessageStore) -> anyhow::Result<RuleTable> {
    if let Some(path) = &config.rules_path {
        let rules = RuleTable::from_json_file(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?;
        info!(path = %path.display(), "Using rules file");
        return Ok(rules);
    }

    match store.load_rules().await {
        Ok(stored) if !stored.is_empty() => {
            info!("Using persisted rules");
            Ok(RuleTable::new(stored))
        }
        Ok(_) => Ok(RuleTable::default_rules()),
        Err(e) => {
            warn!(error = %e, "Failed to load persisted rules, using defaults");
            Ok(RuleTable::default_rules())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
