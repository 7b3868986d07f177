//! Repliwatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - REPLIWATCH_HOST: Bind address (default: 0.0.0.0)
//! - REPLIWATCH_PORT: Port number (default: 8080)
//! - REPLIWATCH_SCHEDULER_TICK_SECS: Scheduler tick interval (default: 30)
//! - REPLIWATCH_ALERT_THRESHOLD: Consecutive failures before alerting (default: 2)
//! - REPLIWATCH_BASELINE_WINDOW: Volume observations kept per table (default: 10)
//! - REPLIWATCH_STALENESS_SECS: Freshness staleness threshold (default: 600)
//! - REPLIWATCH_ANOMALY_THRESHOLD: Baseline deviation fraction (default: 0.30)
//! - REPLIWATCH_LAG_THRESHOLD_SECS: Replica lag threshold (default: 30)
//! - REPLIWATCH_BACKPRESSURE: Suppress alerts during heavy lag (default: true)
//! - REPLIWATCH_MAX_QUERIES_PER_MINUTE: Default per-connection rate budget (default: 60)
//! - REPLIWATCH_MAX_CONCURRENT_QUERIES: Default concurrency budget (default: 5)
//! - REPLIWATCH_QUERY_TIMEOUT_SECS: Default query timeout (default: 2)
//! - RUST_LOG: Log level (default: info)

use repliwatch::api::{run_server, ServerConfig};
use repliwatch::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repliwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse basic configuration from environment
    let host = std::env::var("REPLIWATCH_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("REPLIWATCH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let scheduler_tick_secs: u64 = std::env::var("REPLIWATCH_SCHEDULER_TICK_SECS")
        .ok()
        .and_then(|t| t.parse().ok())
        .unwrap_or(30);

    let settings = Settings::from_env();

    let config = ServerConfig {
        host,
        port,
        scheduler_tick_secs,
        settings,
    };

    tracing::info!("Repliwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Scheduler tick: {} seconds", config.scheduler_tick_secs);
    tracing::info!(
        "  Alert threshold: {} consecutive failures",
        config.settings.alert_threshold_failures
    );
    tracing::info!(
        "  Baseline window: {} observations",
        config.settings.baseline_window_size
    );
    tracing::info!(
        "  Staleness threshold: {} seconds",
        config.settings.staleness_threshold.as_secs()
    );
    tracing::info!(
        "  Default guardrails: {}/min, {} concurrent, {}s timeout",
        config.settings.default_guardrails.max_queries_per_minute,
        config.settings.default_guardrails.max_concurrent_queries,
        config.settings.default_guardrails.query_timeout.as_secs()
    );

    run_server(config).await
}
