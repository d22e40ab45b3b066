//! Alert governance.
//!
//! Stateful gate in front of the outbound notifier. Each candidate alert
//! passes, in order: the global kill switch, the per-category enable flag,
//! quiet-hours suppression, and the per-dedup-key cooldown. Only then is the
//! firing timestamp recorded and the alert forwarded. Every drop is silent to
//! the end user but logged for diagnosis.
//!
//! Cooldown state lives only here and is never persisted across restarts;
//! the worst case is one duplicate alert after a restart.

use crate::config::SharedPolicy;
use crate::notifier::OutboundAlert;
use crate::types::{AlertCandidate, AlertCategory};
use chrono::{DateTime, Local, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Dedup key: category + instrument, with an optional price bucket so e.g. a
/// new wall at a different price is not suppressed by an old wall's cooldown.
type DedupKey = (AlertCategory, String, Option<i64>);

/// Why a candidate was dropped, or that it was forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Forwarded,
    DroppedGlobalDisabled,
    DroppedCategoryDisabled,
    DroppedQuietHours,
    DroppedCooldown,
}

pub struct AlertGovernor {
    policy: SharedPolicy,
    outbound: mpsc::UnboundedSender<OutboundAlert>,
    cooldowns: Mutex<HashMap<DedupKey, DateTime<Utc>>>,
}

impl AlertGovernor {
    pub fn new(policy: SharedPolicy, outbound: mpsc::UnboundedSender<OutboundAlert>) -> Self {
        Self {
            policy,
            outbound,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Whether the dedup key is still cooling down. Detection rules call this
    /// before constructing a candidate so suppressed alerts do not also spam
    /// the event feed.
    pub fn on_cooldown(
        &self,
        category: AlertCategory,
        instrument: &str,
        price_bucket: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        let cooldown_secs = self.policy.read().cooldown_secs(category);
        let key = (category, instrument.to_string(), price_bucket);
        let cooldowns = self.cooldowns.lock();
        match cooldowns.get(&key) {
            Some(last) => (now - *last).num_seconds() < cooldown_secs as i64,
            None => false,
        }
    }

    /// Gate and forward a candidate alert using the current wall clock.
    pub fn dispatch(&self, candidate: AlertCandidate) -> DispatchOutcome {
        let local = Local::now();
        let local_minutes = local.hour() * 60 + local.minute();
        self.dispatch_at(candidate, Utc::now(), local_minutes)
    }

    /// Gate and forward with explicit times. The policy is re-read on every
    /// call; the settings surface may have mutated it since the last dispatch.
    pub fn dispatch_at(
        &self,
        candidate: AlertCandidate,
        now: DateTime<Utc>,
        local_minutes: u32,
    ) -> DispatchOutcome {
        let policy = self.policy.read().clone();

        if !policy.global_enabled {
            debug!(category = %candidate.category, "alert dropped: globally disabled");
            return DispatchOutcome::DroppedGlobalDisabled;
        }

        if !policy.category_enabled(candidate.category) {
            debug!(category = %candidate.category, "alert dropped: category disabled");
            return DispatchOutcome::DroppedCategoryDisabled;
        }

        if policy.quiet_hours.contains(local_minutes) {
            debug!(category = %candidate.category, "alert dropped: quiet hours");
            return DispatchOutcome::DroppedQuietHours;
        }

        let cooldown_secs = policy.cooldown_secs(candidate.category);
        let key = (
            candidate.category,
            candidate.instrument.clone(),
            candidate.dedup_price_bucket,
        );
        {
            let mut cooldowns = self.cooldowns.lock();
            if let Some(last) = cooldowns.get(&key) {
                if (now - *last).num_seconds() < cooldown_secs as i64 {
                    debug!(
                        category = %candidate.category,
                        instrument = %candidate.instrument,
                        "alert dropped: cooling down"
                    );
                    return DispatchOutcome::DroppedCooldown;
                }
            }
            cooldowns.insert(key, now);
        }

        let alert = OutboundAlert {
            title: candidate.title,
            body: candidate.body,
            category: candidate.category,
            instrument: candidate.instrument,
            severity: candidate.severity,
            suggested_cooldown_secs: cooldown_secs,
        };
        // Fire-and-forget: a closed queue means the notifier task is gone,
        // which must never propagate back into detection.
        if let Err(error) = self.outbound.send(alert) {
            warn!(%error, "notifier queue closed, alert dropped");
        }
        DispatchOutcome::Forwarded
    }
}
