//! Core market data types shared across the engine.
//!
//! Wire-level messages (exchange JSON payloads) live in [`crate::feed`]; the
//! types here are the normalized internal representation every component
//! consumes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side (Buy or Sell)
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single trade execution, immutable once created.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Trade {
    /// Execution price
    pub price: f64,
    /// Trade size (in base currency)
    pub quantity: f64,
    /// Side of the taker
    pub side: Side,
    /// Time of execution on the exchange
    pub time: DateTime<Utc>,
}

impl Trade {
    /// USD notional value of the trade
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }

    /// Signed notional: positive for taker buys, negative for taker sells
    pub fn signed_notional(&self) -> f64 {
        match self.side {
            Side::Buy => self.notional(),
            Side::Sell => -self.notional(),
        }
    }
}

/// A forced liquidation print.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Liquidation {
    /// Side of the liquidated position's forced order
    pub side: Side,
    /// Average fill price of the forced order
    pub price: f64,
    /// Quantity liquidated
    pub quantity: f64,
    /// Time of liquidation
    pub time: DateTime<Utc>,
}

impl Liquidation {
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// OHLCV candle from the kline stream or REST backfill.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_time: DateTime<Utc>,
    pub is_complete: bool,
}

impl Candle {
    /// Typical price (HLC3), used by VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// Open interest snapshot from the periodic REST poll.
#[derive(Debug, Clone, Copy)]
pub struct OpenInterestSnapshot {
    /// Open interest in base currency contracts
    pub contracts: f64,
    pub time: DateTime<Utc>,
}

/// Funding rate snapshot from the premium index poll.
#[derive(Debug, Clone, Copy)]
pub struct FundingSnapshot {
    /// Current funding rate as a fraction (0.0001 = 0.01%)
    pub rate: f64,
    pub time: DateTime<Utc>,
}

/// Classification of entries in the capped market event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum MarketEventKind {
    Whale,
    Liquidation,
    Wall,
    SmartAlert,
}

impl MarketEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketEventKind::Whale => "whale",
            MarketEventKind::Liquidation => "liquidation",
            MarketEventKind::Wall => "wall",
            MarketEventKind::SmartAlert => "smart_alert",
        }
    }
}

/// A classified market event, appended to the per-instrument capped feed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketEvent {
    pub id: u64,
    pub kind: MarketEventKind,
    pub instrument: String,
    pub price: f64,
    pub quantity: f64,
    pub notional: f64,
    pub side: Option<Side>,
    pub time: DateTime<Utc>,
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Alert categories gated by the governor.
///
/// Serialized names match the keys the settings surface writes into
/// [`crate::config::AlertPolicy::categories`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Whale,
    Liquidation,
    AtrExpansion,
    OiShift,
    WallProximity,
    FundingExtreme,
    ValueAreaBreakout,
    WhaleMomentum,
    RelativeVolume,
    DailyWrap,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Whale => "whale",
            AlertCategory::Liquidation => "liquidation",
            AlertCategory::AtrExpansion => "atr_expansion",
            AlertCategory::OiShift => "oi_shift",
            AlertCategory::WallProximity => "wall_proximity",
            AlertCategory::FundingExtreme => "funding_extreme",
            AlertCategory::ValueAreaBreakout => "value_area_breakout",
            AlertCategory::WhaleMomentum => "whale_momentum",
            AlertCategory::RelativeVolume => "relative_volume",
            AlertCategory::DailyWrap => "daily_wrap",
        }
    }

    /// Default cooldown applied when the policy carries no entry for the
    /// category.
    pub fn default_cooldown_secs(&self) -> u64 {
        match self {
            AlertCategory::Whale => 60,
            AlertCategory::Liquidation => 60,
            AlertCategory::AtrExpansion => 300,
            AlertCategory::OiShift => 600,
            AlertCategory::WallProximity => 900,
            AlertCategory::FundingExtreme => 12 * 3600,
            AlertCategory::ValueAreaBreakout => 3600,
            AlertCategory::WhaleMomentum => 15 * 60,
            AlertCategory::RelativeVolume => 3600,
            AlertCategory::DailyWrap => 24 * 3600,
        }
    }
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity hint forwarded to the outbound notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A notification candidate produced by the detection engine, pending
/// governor approval.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub category: AlertCategory,
    pub instrument: String,
    pub title: String,
    pub body: String,
    pub severity: Severity,
    /// Extra dedup component, e.g. the wall price bucket for wall-proximity
    /// alerts so a new wall at a different price is not suppressed.
    pub dedup_price_bucket: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_display() {
        assert_eq!(Side::Buy.to_string(), "Buy");
        assert_eq!(Side::Sell.to_string(), "Sell");
        assert!(Side::Buy.is_buy());
        assert!(Side::Sell.is_sell());
    }

    #[test]
    fn test_trade_notional() {
        let trade = Trade {
            price: 50_000.0,
            quantity: 2.0,
            side: Side::Sell,
            time: Utc::now(),
        };
        assert_eq!(trade.notional(), 100_000.0);
        assert_eq!(trade.signed_notional(), -100_000.0);
    }

    #[test]
    fn test_category_roundtrip() {
        let json = serde_json::to_string(&AlertCategory::ValueAreaBreakout).unwrap();
        assert_eq!(json, "\"value_area_breakout\"");
        let back: AlertCategory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AlertCategory::ValueAreaBreakout);
    }

    #[test]
    fn test_candle_typical_price() {
        let candle = Candle {
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 100.0,
            start_time: Utc::now(),
            is_complete: true,
        };
        assert!((candle.typical_price() - 32.0 / 3.0).abs() < 1e-12);
    }
}
