use market_sentinel::config::{shared_policy, AlertPolicy};
use market_sentinel::feed::{spawn_depth_poller, spawn_derivatives_poller, spawn_market_stream};
use market_sentinel::governor::AlertGovernor;
use market_sentinel::notifier::spawn_notifier;
use market_sentinel::signals::SignalEngine;
use market_sentinel::state::EngineState;
use rustls::crypto::ring::default_provider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Detection cadence for book/indicator/funding rules
const MARKET_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Detection cadence for momentum, RVOL, and daily wrap rules
const MOMENTUM_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    init_logging();
    let _ = default_provider().install_default();

    info!("starting market sentinel");

    let state = Arc::new(EngineState::new());
    for symbol in watch_symbols() {
        info!(instrument = %symbol, "watching");
        state.watch(&symbol, "1m");
    }

    let policy = shared_policy(load_policy());
    let outbound = spawn_notifier();
    let governor = Arc::new(AlertGovernor::new(policy, outbound));
    let signals = Arc::new(SignalEngine::new(Arc::clone(&state), governor));

    spawn_market_stream(Arc::clone(&state), Arc::clone(&signals));
    spawn_depth_poller(Arc::clone(&state));
    spawn_derivatives_poller(Arc::clone(&state));

    {
        let signals = Arc::clone(&signals);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MARKET_POLL_INTERVAL);
            loop {
                interval.tick().await;
                signals.poll_market(chrono::Utc::now());
            }
        });
    }
    {
        let signals = Arc::clone(&signals);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MOMENTUM_POLL_INTERVAL);
            loop {
                interval.tick().await;
                signals.poll_momentum(chrono::Utc::now());
            }
        });
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received, stopping"),
        Err(error) => warn!(%error, "failed to listen for shutdown signal"),
    }
}

/// Watched instruments (env: WATCH_SYMBOLS, comma-separated)
fn watch_symbols() -> Vec<String> {
    std::env::var("WATCH_SYMBOLS")
        .unwrap_or_else(|_| "BTCUSDT,ETHUSDT".to_string())
        .split(',')
        .map(|symbol| symbol.trim().to_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect()
}

/// Load the alert policy from the JSON file named by ALERT_POLICY_PATH, or
/// fall back to the defaults (everything enabled, no quiet hours).
fn load_policy() -> AlertPolicy {
    let Ok(path) = std::env::var("ALERT_POLICY_PATH") else {
        return AlertPolicy::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(policy) => {
                info!(%path, "loaded alert policy");
                policy
            }
            Err(error) => {
                warn!(%path, %error, "invalid alert policy file, using defaults");
                AlertPolicy::default()
            }
        },
        Err(error) => {
            warn!(%path, %error, "failed to read alert policy file, using defaults");
            AlertPolicy::default()
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
