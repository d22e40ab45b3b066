//! Engine thresholds and the externally-mutable alert policy.
//!
//! Detection thresholds are overridable via environment variables so a
//! deployment can retune without a rebuild; each getter caches its value for
//! the process lifetime.

use crate::types::AlertCategory;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Whale trade threshold in USD notional (env: WHALE_THRESHOLD, default $500,000)
pub fn whale_threshold() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("WHALE_THRESHOLD", 500_000.0))
}

/// Order-book wall threshold in USD notional (env: WALL_THRESHOLD, default $250,000)
pub fn wall_threshold() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("WALL_THRESHOLD", 250_000.0))
}

/// ATR expansion ratio trigger (env: ATR_EXPANSION_RATIO, default 1.3, strict >)
pub fn atr_expansion_ratio() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("ATR_EXPANSION_RATIO", 1.3))
}

/// Open interest shift trigger over the trailing 5 minutes, in percent
/// (env: OI_SHIFT_PCT, default 1.5)
pub fn oi_shift_pct() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("OI_SHIFT_PCT", 1.5))
}

/// Wall proximity trigger as a fraction of price (env: WALL_PROXIMITY_PCT, default 0.25%)
pub fn wall_proximity_pct() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("WALL_PROXIMITY_PCT", 0.25))
}

/// Absolute funding rate trigger, in percent (env: FUNDING_EXTREME_PCT, default 0.05)
pub fn funding_extreme_pct() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("FUNDING_EXTREME_PCT", 0.05))
}

/// Value-area breakout buffer beyond VAH/VAL, in percent (env: VA_BREAKOUT_PCT, default 0.1)
pub fn va_breakout_pct() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("VA_BREAKOUT_PCT", 0.1))
}

/// Whale momentum swing trigger over 15 minutes, USD (env: WHALE_MOMENTUM_USD, default $5M)
pub fn whale_momentum_usd() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("WHALE_MOMENTUM_USD", 5_000_000.0))
}

/// Relative volume multiple trigger (env: RVOL_MULTIPLE, default 3.0)
pub fn rvol_multiple() -> f64 {
    static V: OnceLock<f64> = OnceLock::new();
    *V.get_or_init(|| env_f64("RVOL_MULTIPLE", 3.0))
}

/// Quiet-hours window in local time. Supports wraparound ranges where
/// `start_hour > end_hour` (e.g. 22:00 -> 06:00).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct QuietHours {
    #[serde(default)]
    pub enabled: bool,
    /// Inclusive start, minutes since local midnight
    #[serde(default)]
    pub start_minutes: u32,
    /// Exclusive end, minutes since local midnight
    #[serde(default)]
    pub end_minutes: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_minutes: 22 * 60,
            end_minutes: 6 * 60,
        }
    }
}

impl QuietHours {
    /// Whether `minutes_since_midnight` falls inside the suppression window
    /// `[start, end)`.
    pub fn contains(&self, minutes_since_midnight: u32) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start_minutes <= self.end_minutes {
            minutes_since_midnight >= self.start_minutes
                && minutes_since_midnight < self.end_minutes
        } else {
            // Wraparound window, e.g. 22:00 -> 06:00
            minutes_since_midnight >= self.start_minutes
                || minutes_since_midnight < self.end_minutes
        }
    }
}

fn default_true() -> bool {
    true
}

/// Process-wide alert policy, mutated by the external settings surface and
/// re-read by the governor before every dispatch decision.
///
/// Missing fields default to the safe conservative value: a missing
/// `global_enabled` or category entry means enabled, a missing cooldown means
/// the category's documented default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertPolicy {
    #[serde(default = "default_true")]
    pub global_enabled: bool,
    #[serde(default)]
    pub quiet_hours: QuietHours,
    #[serde(default)]
    pub categories: HashMap<AlertCategory, bool>,
    /// Cooldown overrides in seconds
    #[serde(default)]
    pub cooldowns: HashMap<AlertCategory, u64>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            global_enabled: true,
            quiet_hours: QuietHours::default(),
            categories: HashMap::new(),
            cooldowns: HashMap::new(),
        }
    }
}

impl AlertPolicy {
    pub fn category_enabled(&self, category: AlertCategory) -> bool {
        self.categories.get(&category).copied().unwrap_or(true)
    }

    pub fn cooldown_secs(&self, category: AlertCategory) -> u64 {
        self.cooldowns
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_cooldown_secs())
    }
}

/// Handle shared between the governor and the settings surface.
pub type SharedPolicy = Arc<RwLock<AlertPolicy>>;

pub fn shared_policy(policy: AlertPolicy) -> SharedPolicy {
    Arc::new(RwLock::new(policy))
}
