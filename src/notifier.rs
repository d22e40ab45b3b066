//! Outbound notifier collaborator.
//!
//! The engine forwards approved alerts to an external notification service
//! over HTTP and expects an immediate acknowledgement; delivery, retries, and
//! history logging are the collaborator's problem. Dispatch is fire-and-forget
//! through an in-process queue so the detection path never blocks on, or sees
//! errors from, the transport.

use crate::types::{AlertCategory, Severity};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Payload POSTed to the notifier service.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundAlert {
    pub title: String,
    pub body: String,
    pub category: AlertCategory,
    pub instrument: String,
    pub severity: Severity,
    pub suggested_cooldown_secs: u64,
}

/// Notifier endpoint URL (env: NOTIFIER_URL)
fn notifier_url() -> String {
    std::env::var("NOTIFIER_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/alert".to_string())
}

/// Spawn the queue processor that drains approved alerts to the notifier.
///
/// Transport failures are logged and swallowed; the caller only ever holds
/// the send half.
pub fn spawn_notifier() -> mpsc::UnboundedSender<OutboundAlert> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_notifier(rx));
    tx
}

async fn run_notifier(mut rx: mpsc::UnboundedReceiver<OutboundAlert>) {
    let url = notifier_url();
    let client = reqwest::Client::new();
    info!(%url, "notifier queue processor started");

    while let Some(alert) = rx.recv().await {
        let result = client
            .post(&url)
            .timeout(Duration::from_secs(10))
            .json(&alert)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(
                    category = %alert.category,
                    instrument = %alert.instrument,
                    "alert forwarded to notifier"
                );
            }
            Ok(response) => {
                warn!(
                    category = %alert.category,
                    status = %response.status(),
                    "notifier rejected alert"
                );
            }
            Err(error) => {
                warn!(
                    category = %alert.category,
                    %error,
                    "notifier unreachable, alert dropped"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_alert_serializes_contract_fields() {
        let alert = OutboundAlert {
            title: "Whale buy".to_string(),
            body: "BTCUSDT $600,000 buy at 50,000".to_string(),
            category: AlertCategory::Whale,
            instrument: "BTCUSDT".to_string(),
            severity: Severity::Warning,
            suggested_cooldown_secs: 60,
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["category"], "whale");
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["suggested_cooldown_secs"], 60);
    }
}
