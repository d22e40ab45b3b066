//! Signal detection.
//!
//! Classifies discrete market events from the reconciled book, trade and
//! liquidation prints, indicator snapshots, funding/OI polls, and the volume
//! profile. Runs on two cadences: event-driven (per print) and periodic
//! polling. Every rule that fires emits a [`MarketEvent`] into the capped
//! feed and, independently, attempts a notification through the governor.
//!
//! Rules re-check the governor's cooldown before constructing a candidate so
//! a suppressed alert does not also spam the event feed with duplicates.

use crate::config::{
    atr_expansion_ratio, funding_extreme_pct, oi_shift_pct, rvol_multiple, va_breakout_pct,
    wall_proximity_pct, whale_momentum_usd, whale_threshold,
};
use crate::context::{classify, ContextInputs, MarketContext};
use crate::governor::AlertGovernor;
use crate::profile::bucket_size_for_price;
use crate::state::{EngineState, InstrumentState};
use crate::types::{
    AlertCandidate, AlertCategory, Liquidation, MarketEvent, MarketEventKind, Severity, Side,
    Trade,
};
use chrono::{DateTime, Duration, Local, Timelike, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Where price sits relative to the value area, tracked for breakout
/// transition detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueAreaPosition {
    Unknown,
    Inside,
    Above,
    Below,
}

/// Per-instrument tracking state owned by the detection engine. This is the
/// only state the periodic checks mutate; market state is read-only to them.
#[derive(Debug)]
struct Tracking {
    va_position: ValueAreaPosition,
    prev_whale_flow_15m: Option<f64>,
    last_daily_wrap: Option<DateTime<Utc>>,
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            va_position: ValueAreaPosition::Unknown,
            prev_whale_flow_15m: None,
            last_daily_wrap: None,
        }
    }
}

/// Gather the context classifier's inputs from one instrument's state.
fn context_inputs(state: &InstrumentState, now: DateTime<Utc>) -> Option<ContextInputs> {
    let price = state.last_price().or_else(|| state.book().mid_price())?;
    let indicators = state.indicators();
    Some(ContextInputs {
        price,
        ema_21: indicators.ema_21,
        ema_50: indicators.ema_50,
        atr_ratio: indicators.atr_ratio(),
        oi_change_15m_pct: state.oi_change_pct(now, 15 * 60),
        spread_pct: state.book().spread_pct(),
        nearest_bid_wall: state.book().bid_walls().first().map(|level| level.price),
        nearest_ask_wall: state.book().ask_walls().first().map(|level| level.price),
        poc: state.profile_levels().map(|levels| levels.poc),
        vwap: indicators.vwap,
        micro_trend: state.micro_trend(5 * 60),
    })
}

/// Strict-greater ATR expansion trigger: a ratio of exactly the threshold
/// does not fire.
fn atr_expansion_triggered(ratio: f64) -> bool {
    ratio > atr_expansion_ratio()
}

fn rvol_triggered(current: f64, trailing_average: f64) -> bool {
    trailing_average > 0.0 && current >= rvol_multiple() * trailing_average
}

pub struct SignalEngine {
    state: Arc<EngineState>,
    governor: Arc<AlertGovernor>,
    whale_usd: f64,
    tracking: Mutex<HashMap<String, Tracking>>,
}

impl SignalEngine {
    pub fn new(state: Arc<EngineState>, governor: Arc<AlertGovernor>) -> Self {
        Self {
            state,
            governor,
            whale_usd: whale_threshold(),
            tracking: Mutex::new(HashMap::new()),
        }
    }

    /// Override the whale notional threshold (used by tests and by
    /// deployments that tune per-venue).
    pub fn with_whale_threshold(mut self, usd: f64) -> Self {
        self.whale_usd = usd;
        self
    }

    fn dispatch(&self, candidate: AlertCandidate, now: DateTime<Utc>) {
        let local = Local::now();
        let local_minutes = local.hour() * 60 + local.minute();
        self.governor.dispatch_at(candidate, now, local_minutes);
    }

    /// Classify the instrument's current market context on demand.
    pub fn market_context(&self, symbol: &str, now: DateTime<Utc>) -> Option<MarketContext> {
        self.state
            .with_instrument(symbol, |state| {
                context_inputs(state, now).map(|inputs| classify(&inputs))
            })
            .flatten()
    }

    // === Event-driven cadence ===

    /// Ingest a trade print. Whale trades (notional >= threshold) emit a
    /// market event, accumulate into the net whale flow, and attempt a
    /// notification.
    pub fn on_trade(&self, symbol: &str, trade: Trade) {
        let notional = trade.notional();
        let is_whale = notional >= self.whale_usd;
        let (price, quantity, side, time) = (trade.price, trade.quantity, trade.side, trade.time);
        let signed = trade.signed_notional();

        self.state.with_instrument_mut(symbol, |state| {
            state.record_trade(trade);
            if is_whale {
                state.record_whale_flow(time, signed);
                state.push_event(MarketEvent {
                    id: 0,
                    kind: MarketEventKind::Whale,
                    instrument: symbol.to_string(),
                    price,
                    quantity,
                    notional,
                    side: Some(side),
                    time,
                    title: Some(format!("Whale {}", side)),
                    message: Some(format!(
                        "{} ${:.0} {} at {}",
                        symbol, notional, side, price
                    )),
                });
            }
        });

        if is_whale {
            info!(instrument = symbol, notional, %side, "whale trade");
            self.dispatch(
                AlertCandidate {
                    category: AlertCategory::Whale,
                    instrument: symbol.to_string(),
                    title: format!("Whale {}", side),
                    body: format!("{} ${:.0} {} at {}", symbol, notional, side, price),
                    severity: Severity::Warning,
                    dedup_price_bucket: None,
                },
                time,
            );
        }
    }

    /// Ingest a forced-liquidation print.
    pub fn on_liquidation(&self, symbol: &str, liquidation: Liquidation) {
        let notional = liquidation.notional();
        let (price, quantity, side, time) = (
            liquidation.price,
            liquidation.quantity,
            liquidation.side,
            liquidation.time,
        );

        self.state.with_instrument_mut(symbol, |state| {
            state.push_event(MarketEvent {
                id: 0,
                kind: MarketEventKind::Liquidation,
                instrument: symbol.to_string(),
                price,
                quantity,
                notional,
                side: Some(side),
                time,
                title: Some("Liquidation".to_string()),
                message: Some(format!(
                    "{} ${:.0} {} liquidation at {}",
                    symbol, notional, side, price
                )),
            });
        });

        self.dispatch(
            AlertCandidate {
                category: AlertCategory::Liquidation,
                instrument: symbol.to_string(),
                title: "Liquidation".to_string(),
                body: format!("{} ${:.0} {} liquidation at {}", symbol, notional, side, price),
                severity: if notional >= 1_000_000.0 {
                    Severity::Critical
                } else {
                    Severity::Info
                },
                dedup_price_bucket: None,
            },
            time,
        );
    }

    // === Periodic cadence ===

    /// Fast periodic checks (every 5-15s): ATR expansion, OI spike/flush,
    /// wall proximity, funding extreme, value-area breakout.
    pub fn poll_market(&self, now: DateTime<Utc>) {
        for symbol in self.state.watched() {
            self.check_atr_expansion(&symbol, now);
            self.check_oi_shift(&symbol, now);
            self.check_wall_proximity(&symbol, now);
            self.check_funding_extreme(&symbol, now);
            self.check_value_area_breakout(&symbol, now);
        }
    }

    /// Slower periodic checks (every 60s): whale momentum shift, relative
    /// volume anomaly, daily wrap.
    pub fn poll_momentum(&self, now: DateTime<Utc>) {
        for symbol in self.state.watched() {
            self.check_whale_momentum(&symbol, now);
            self.check_relative_volume(&symbol, now);
            self.check_daily_wrap(&symbol, now);
        }
    }

    fn emit_smart_alert(
        &self,
        symbol: &str,
        category: AlertCategory,
        kind: MarketEventKind,
        price: f64,
        severity: Severity,
        dedup_price_bucket: Option<i64>,
        title: String,
        body: String,
        now: DateTime<Utc>,
    ) {
        self.state.with_instrument_mut(symbol, |state| {
            state.push_event(MarketEvent {
                id: 0,
                kind,
                instrument: symbol.to_string(),
                price,
                quantity: 0.0,
                notional: 0.0,
                side: None,
                time: now,
                title: Some(title.clone()),
                message: Some(body.clone()),
            });
        });
        info!(instrument = symbol, category = %category, %body, "signal fired");
        self.dispatch(
            AlertCandidate {
                category,
                instrument: symbol.to_string(),
                title,
                body,
                severity,
                dedup_price_bucket,
            },
            now,
        );
    }

    fn check_atr_expansion(&self, symbol: &str, now: DateTime<Utc>) {
        if self
            .governor
            .on_cooldown(AlertCategory::AtrExpansion, symbol, None, now)
        {
            return;
        }
        let Some((ratio, price)) = self.state.with_instrument(symbol, |state| {
            state
                .indicators()
                .atr_ratio()
                .zip(state.last_price())
        }).flatten() else {
            return;
        };
        if !atr_expansion_triggered(ratio) {
            return;
        }
        self.emit_smart_alert(
            symbol,
            AlertCategory::AtrExpansion,
            MarketEventKind::SmartAlert,
            price,
            Severity::Info,
            None,
            "ATR expansion".to_string(),
            format!("{} ATR at {:.2}x its average, volatility expanding", symbol, ratio),
            now,
        );
    }

    fn check_oi_shift(&self, symbol: &str, now: DateTime<Utc>) {
        if self
            .governor
            .on_cooldown(AlertCategory::OiShift, symbol, None, now)
        {
            return;
        }
        let Some((change, price)) = self
            .state
            .with_instrument(symbol, |state| {
                state.oi_change_pct(now, 5 * 60).zip(state.last_price())
            })
            .flatten()
        else {
            return;
        };
        if change.abs() <= oi_shift_pct() {
            return;
        }
        let direction = if change > 0.0 { "spike" } else { "flush" };
        self.emit_smart_alert(
            symbol,
            AlertCategory::OiShift,
            MarketEventKind::SmartAlert,
            price,
            Severity::Info,
            None,
            format!("Open interest {}", direction),
            format!("{} OI {:+.2}% over 5m", symbol, change),
            now,
        );
    }

    fn check_wall_proximity(&self, symbol: &str, now: DateTime<Utc>) {
        let Some((price, nearest)) = self
            .state
            .with_instrument(symbol, |state| {
                let price = state.last_price().or_else(|| state.book().mid_price())?;
                let bid_wall = state.book().bid_walls().first().copied();
                let ask_wall = state.book().ask_walls().first().copied();
                let nearest = match (bid_wall, ask_wall) {
                    (Some(bid), Some(ask)) => {
                        if (price - bid.price).abs() <= (ask.price - price).abs() {
                            Some((Side::Buy, bid))
                        } else {
                            Some((Side::Sell, ask))
                        }
                    }
                    (Some(bid), None) => Some((Side::Buy, bid)),
                    (None, Some(ask)) => Some((Side::Sell, ask)),
                    (None, None) => None,
                }?;
                Some((price, nearest))
            })
            .flatten()
        else {
            return;
        };

        let (wall_side, wall) = nearest;
        let distance_pct = (wall.price - price).abs() / price * 100.0;
        if distance_pct > wall_proximity_pct() {
            return;
        }

        // Dedup on the wall's price bucket: a new wall at a different price
        // is its own key.
        let bucket = (wall.price / bucket_size_for_price(wall.price)).round() as i64;
        if self
            .governor
            .on_cooldown(AlertCategory::WallProximity, symbol, Some(bucket), now)
        {
            return;
        }

        let label = match wall_side {
            Side::Buy => "bid wall",
            Side::Sell => "ask wall",
        };
        self.emit_smart_alert(
            symbol,
            AlertCategory::WallProximity,
            MarketEventKind::Wall,
            wall.price,
            Severity::Info,
            Some(bucket),
            "Wall proximity".to_string(),
            format!(
                "{} price {} within {:.3}% of ${:.0} {} at {}",
                symbol,
                price,
                distance_pct,
                wall.notional(),
                label,
                wall.price
            ),
            now,
        );
    }

    fn check_funding_extreme(&self, symbol: &str, now: DateTime<Utc>) {
        if self
            .governor
            .on_cooldown(AlertCategory::FundingExtreme, symbol, None, now)
        {
            return;
        }
        let Some((funding, price)) = self
            .state
            .with_instrument(symbol, |state| {
                state.funding().zip(state.last_price())
            })
            .flatten()
        else {
            return;
        };
        let rate_pct = funding.rate * 100.0;
        if rate_pct.abs() < funding_extreme_pct() {
            return;
        }
        self.emit_smart_alert(
            symbol,
            AlertCategory::FundingExtreme,
            MarketEventKind::SmartAlert,
            price,
            Severity::Warning,
            None,
            "Funding extreme".to_string(),
            format!("{} funding rate {:+.4}%", symbol, rate_pct),
            now,
        );
    }

    fn check_value_area_breakout(&self, symbol: &str, now: DateTime<Utc>) {
        let Some((price, levels)) = self
            .state
            .with_instrument(symbol, |state| {
                state.last_price().zip(state.profile_levels())
            })
            .flatten()
        else {
            return;
        };

        let buffer = va_breakout_pct() / 100.0;
        let position = if price > levels.vah * (1.0 + buffer) {
            ValueAreaPosition::Above
        } else if price < levels.val * (1.0 - buffer) {
            ValueAreaPosition::Below
        } else if price <= levels.vah && price >= levels.val {
            ValueAreaPosition::Inside
        } else {
            // Inside the buffer band: keep the previous classification
            ValueAreaPosition::Unknown
        };

        let transition = {
            let mut tracking = self.tracking.lock();
            let entry = tracking.entry(symbol.to_string()).or_default();
            let was_inside = entry.va_position == ValueAreaPosition::Inside;
            if position != ValueAreaPosition::Unknown {
                entry.va_position = position;
            }
            was_inside
                && matches!(
                    position,
                    ValueAreaPosition::Above | ValueAreaPosition::Below
                )
        };
        if !transition {
            return;
        }

        if self
            .governor
            .on_cooldown(AlertCategory::ValueAreaBreakout, symbol, None, now)
        {
            return;
        }

        let (direction, boundary) = if position == ValueAreaPosition::Above {
            ("above VAH", levels.vah)
        } else {
            ("below VAL", levels.val)
        };
        self.emit_smart_alert(
            symbol,
            AlertCategory::ValueAreaBreakout,
            MarketEventKind::SmartAlert,
            price,
            Severity::Info,
            None,
            "Value area breakout".to_string(),
            format!("{} broke {} ({}) at {}", symbol, direction, boundary, price),
            now,
        );
    }

    fn check_whale_momentum(&self, symbol: &str, now: DateTime<Utc>) {
        let Some(flow) = self
            .state
            .with_instrument(symbol, |state| state.net_whale_flow(now, 15 * 60))
        else {
            return;
        };

        let swing = {
            let mut tracking = self.tracking.lock();
            let entry = tracking.entry(symbol.to_string()).or_default();
            let swing = entry.prev_whale_flow_15m.map(|prev| flow - prev);
            entry.prev_whale_flow_15m = Some(flow);
            swing
        };
        let Some(swing) = swing else { return };
        if swing.abs() < whale_momentum_usd() {
            return;
        }

        if self
            .governor
            .on_cooldown(AlertCategory::WhaleMomentum, symbol, None, now)
        {
            return;
        }

        let price = self
            .state
            .with_instrument(symbol, |state| state.last_price())
            .flatten()
            .unwrap_or(0.0);
        let direction = if swing > 0.0 { "buying" } else { "selling" };
        self.emit_smart_alert(
            symbol,
            AlertCategory::WhaleMomentum,
            MarketEventKind::SmartAlert,
            price,
            Severity::Warning,
            None,
            "Whale momentum shift".to_string(),
            format!(
                "{} 15m whale net flow swung ${:.1}M toward {}",
                symbol,
                swing.abs() / 1_000_000.0,
                direction
            ),
            now,
        );
    }

    fn check_relative_volume(&self, symbol: &str, now: DateTime<Utc>) {
        if self
            .governor
            .on_cooldown(AlertCategory::RelativeVolume, symbol, None, now)
        {
            return;
        }
        let Some(((current, average), price)) = self
            .state
            .with_instrument(symbol, |state| {
                state.rvol_inputs(now).zip(state.last_price())
            })
            .flatten()
        else {
            return;
        };
        if !rvol_triggered(current, average) {
            return;
        }
        self.emit_smart_alert(
            symbol,
            AlertCategory::RelativeVolume,
            MarketEventKind::SmartAlert,
            price,
            Severity::Info,
            None,
            "Relative volume anomaly".to_string(),
            format!(
                "{} 5m volume ${:.0} is {:.1}x its trailing average",
                symbol,
                current,
                current / average
            ),
            now,
        );
    }

    /// Fires once per UTC day shortly after 00:00, guarded additionally by a
    /// 23h minimum gap to tolerate the polling granularity.
    fn check_daily_wrap(&self, symbol: &str, now: DateTime<Utc>) {
        if now.hour() != 0 || now.minute() >= 5 {
            return;
        }
        {
            let mut tracking = self.tracking.lock();
            let entry = tracking.entry(symbol.to_string()).or_default();
            if let Some(last) = entry.last_daily_wrap {
                if now - last < Duration::hours(23) {
                    return;
                }
            }
            entry.last_daily_wrap = Some(now);
        }

        if self
            .governor
            .on_cooldown(AlertCategory::DailyWrap, symbol, None, now)
        {
            return;
        }

        let Some((flow_24h, oi_change, price, funding)) =
            self.state.with_instrument(symbol, |state| {
                (
                    state.net_whale_flow(now, 24 * 3600),
                    state.oi_change_pct(now, 24 * 3600),
                    state.last_price(),
                    state.funding(),
                )
            })
        else {
            return;
        };

        let mut body = format!(
            "{} daily wrap: whale flow {:+.1}M, OI {}, close {}, funding {}",
            symbol,
            flow_24h / 1_000_000.0,
            oi_change
                .map(|c| format!("{:+.2}%", c))
                .unwrap_or_else(|| "n/a".to_string()),
            price
                .map(|p| format!("{}", p))
                .unwrap_or_else(|| "n/a".to_string()),
            funding
                .map(|f| format!("{:+.4}%", f.rate * 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
        );
        if let Some(context) = self.market_context(symbol, now) {
            body.push_str(" | ");
            body.push_str(&context.summary());
        }
        self.emit_smart_alert(
            symbol,
            AlertCategory::DailyWrap,
            MarketEventKind::SmartAlert,
            price.unwrap_or(0.0),
            Severity::Info,
            None,
            "Daily wrap".to_string(),
            body,
            now,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::BookLevel;
    use crate::config::{shared_policy, AlertPolicy};
    use crate::notifier::OutboundAlert;
    use crate::types::FundingSnapshot;
    use tokio::sync::mpsc::{self, error::TryRecvError};

    fn harness() -> (
        Arc<EngineState>,
        SignalEngine,
        mpsc::UnboundedReceiver<OutboundAlert>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(EngineState::new());
        let governor = Arc::new(AlertGovernor::new(shared_policy(AlertPolicy::default()), tx));
        let engine = SignalEngine::new(Arc::clone(&state), governor);
        (state, engine, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundAlert>) -> Vec<OutboundAlert> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(alert) => out.push(alert),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return out,
            }
        }
    }

    fn trade(price: f64, quantity: f64, side: Side) -> Trade {
        Trade {
            price,
            quantity,
            side,
            time: Utc::now(),
        }
    }

    #[test]
    fn test_atr_expansion_boundary_is_strict() {
        // ATR=130 over ATR-SMA=100 is exactly 1.3: no alert. 131 fires.
        assert!(!atr_expansion_triggered(130.0 / 100.0));
        assert!(atr_expansion_triggered(131.0 / 100.0));
    }

    #[test]
    fn test_rvol_trigger_threshold() {
        assert!(rvol_triggered(300.0, 100.0));
        assert!(rvol_triggered(301.0, 100.0));
        assert!(!rvol_triggered(299.0, 100.0));
        assert!(!rvol_triggered(300.0, 0.0));
    }

    #[test]
    fn test_whale_trades_one_dispatch_three_events() {
        let (state, engine, mut rx) = harness();
        let engine = engine.with_whale_threshold(300_000.0);
        state.watch("BTCUSDT", "1m");

        // Three whale buys inside the 60s whale cooldown window
        engine.on_trade("BTCUSDT", trade(60_000.0, 10.0, Side::Buy)); // $600k
        engine.on_trade("BTCUSDT", trade(40_000.0, 10.0, Side::Buy)); // $400k
        engine.on_trade("BTCUSDT", trade(55_000.0, 10.0, Side::Buy)); // $550k

        // Exactly one notification (the first); all three are in the feed
        assert_eq!(drain(&mut rx).len(), 1);
        let events = state
            .with_instrument("BTCUSDT", |s| s.events().len())
            .unwrap();
        assert_eq!(events, 3);

        // All three accumulated into the net whale flow
        let flow = state
            .with_instrument("BTCUSDT", |s| s.net_whale_flow(Utc::now(), 900))
            .unwrap();
        assert!((flow - 1_550_000.0).abs() < 1.0);
    }

    #[test]
    fn test_small_trade_is_not_a_whale() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        engine.on_trade("BTCUSDT", trade(50_000.0, 0.1, Side::Buy)); // $5k
        assert!(drain(&mut rx).is_empty());
        let events = state
            .with_instrument("BTCUSDT", |s| s.events().len())
            .unwrap();
        assert_eq!(events, 0);
    }

    #[test]
    fn test_liquidation_event_and_alert() {
        let (state, engine, mut rx) = harness();
        state.watch("ETHUSDT", "1m");
        engine.on_liquidation(
            "ETHUSDT",
            Liquidation {
                side: Side::Sell,
                price: 3_000.0,
                quantity: 500.0,
                time: Utc::now(),
            },
        );
        let alerts = drain(&mut rx);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::Liquidation);
        assert_eq!(alerts[0].severity, Severity::Critical); // $1.5M
        let kind = state
            .with_instrument("ETHUSDT", |s| s.events().back().unwrap().kind)
            .unwrap();
        assert_eq!(kind, MarketEventKind::Liquidation);
    }

    #[test]
    fn test_oi_shift_fires_and_cools_down() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
            s.record_open_interest(crate::types::OpenInterestSnapshot {
                contracts: 1_000.0,
                time: now - Duration::minutes(4),
            });
            s.record_open_interest(crate::types::OpenInterestSnapshot {
                contracts: 1_020.0, // +2% in 4 minutes
                time: now,
            });
        });

        engine.poll_market(now);
        let alerts = drain(&mut rx);
        assert_eq!(
            alerts
                .iter()
                .filter(|a| a.category == AlertCategory::OiShift)
                .count(),
            1
        );

        // Second poll inside the cooldown emits nothing new
        engine.poll_market(now + Duration::seconds(10));
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::OiShift));
    }

    #[test]
    fn test_wall_proximity_alert() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
            // Ask wall $500M notional, 0.1% above price
            s.apply_depth_snapshot(
                vec![BookLevel::new(49_000.0, 0.1)],
                vec![BookLevel::new(50_050.0, 10_000.0)],
                1,
            );
        });

        engine.poll_market(now);
        let alerts = drain(&mut rx);
        let wall_alerts: Vec<_> = alerts
            .iter()
            .filter(|a| a.category == AlertCategory::WallProximity)
            .collect();
        assert_eq!(wall_alerts.len(), 1);

        let kinds: Vec<MarketEventKind> = state
            .with_instrument("BTCUSDT", |s| {
                s.events().iter().map(|e| e.kind).collect()
            })
            .unwrap();
        assert!(kinds.contains(&MarketEventKind::Wall));
    }

    #[test]
    fn test_funding_extreme_boundary_inclusive() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
            s.record_funding(FundingSnapshot {
                rate: -0.0005, // -0.05%: trigger is inclusive
                time: now,
            });
        });
        engine.poll_market(now);
        assert!(drain(&mut rx)
            .iter()
            .any(|a| a.category == AlertCategory::FundingExtreme));
    }

    #[test]
    fn test_funding_below_threshold_silent() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
            s.record_funding(FundingSnapshot {
                rate: 0.0004, // 0.04%
                time: now,
            });
        });
        engine.poll_market(now);
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::FundingExtreme));
    }

    #[test]
    fn test_value_area_breakout_requires_inside_transition() {
        let (state, engine, mut rx) = harness();
        state.watch("SOLUSDT", "1m");
        let now = Utc::now();

        // Build a profile with the value area spanning 101-103; the last
        // print lands on the POC so price starts inside
        state.with_instrument_mut("SOLUSDT", |s| {
            for (price, qty) in [
                (100.0, 10.0),
                (104.0, 20.0),
                (101.0, 40.0),
                (103.0, 50.0),
                (102.0, 90.0),
            ] {
                s.record_trade(trade(price, qty, Side::Buy));
            }
        });

        // First poll: price inside the value area, position learned, no alert
        engine.poll_market(now);
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::ValueAreaBreakout));

        // Price pushes beyond VAH plus the 0.1% buffer
        state.with_instrument_mut("SOLUSDT", |s| {
            s.record_trade(trade(106.0, 0.1, Side::Buy));
        });
        engine.poll_market(now + Duration::seconds(10));
        let alerts = drain(&mut rx);
        assert_eq!(
            alerts
                .iter()
                .filter(|a| a.category == AlertCategory::ValueAreaBreakout)
                .count(),
            1
        );

        // Still outside: no inside->outside transition, no repeat
        engine.poll_market(now + Duration::seconds(20));
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::ValueAreaBreakout));
    }

    #[test]
    fn test_whale_momentum_swing() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();

        // Baseline reading with no whale flow
        engine.poll_momentum(now);
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::WhaleMomentum));

        // $6M of whale buying lands inside the window
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
            s.record_whale_flow(now, 6_000_000.0);
        });
        engine.poll_momentum(now + Duration::seconds(60));
        let alerts = drain(&mut rx);
        assert_eq!(
            alerts
                .iter()
                .filter(|a| a.category == AlertCategory::WhaleMomentum)
                .count(),
            1
        );
    }

    #[test]
    fn test_daily_wrap_gap_guard() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
        });

        let midnight = Utc::now()
            .date_naive()
            .and_hms_opt(0, 1, 0)
            .unwrap()
            .and_utc();

        engine.poll_momentum(midnight);
        assert_eq!(
            drain(&mut rx)
                .iter()
                .filter(|a| a.category == AlertCategory::DailyWrap)
                .count(),
            1
        );

        // A second tick in the same midnight window is blocked by the gap guard
        engine.poll_momentum(midnight + Duration::minutes(1));
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::DailyWrap));

        // The next midnight (24h later, >= 23h gap) fires again
        engine.poll_momentum(midnight + Duration::hours(24));
        assert_eq!(
            drain(&mut rx)
                .iter()
                .filter(|a| a.category == AlertCategory::DailyWrap)
                .count(),
            1
        );
    }

    #[test]
    fn test_market_context_needs_a_price() {
        let (state, engine, _rx) = harness();
        state.watch("BTCUSDT", "1m");
        let now = Utc::now();
        assert!(engine.market_context("BTCUSDT", now).is_none());

        state.with_instrument_mut("BTCUSDT", |s| {
            s.record_trade(trade(50_000.0, 0.01, Side::Buy));
        });
        let context = engine.market_context("BTCUSDT", now).unwrap();
        // No candle history yet: no trend information
        assert_eq!(context.regime.label(), "RANGE");
    }

    #[test]
    fn test_non_midnight_tick_never_wraps() {
        let (state, engine, mut rx) = harness();
        state.watch("BTCUSDT", "1m");
        let afternoon = Utc::now()
            .date_naive()
            .and_hms_opt(15, 30, 0)
            .unwrap()
            .and_utc();
        engine.poll_momentum(afternoon);
        assert!(drain(&mut rx)
            .iter()
            .all(|a| a.category != AlertCategory::DailyWrap));
    }
}
