//! Engine-owned per-instrument derived state.
//!
//! The source system kept everything in one globally-accessible mutable
//! store; here each watched instrument owns an [`InstrumentState`] inside the
//! engine's map, exposed through read accessors and narrow mutation methods.
//! Writers (the fast-stream task, the deep-snapshot poller, the OI/funding
//! pollers) serialize through the engine lock and publish fully-formed
//! replacements, so readers never observe a partial merge.

use crate::book::{BookLevel, DepthCache, ReconciledBook};
use crate::indicators::IndicatorSnapshot;
use crate::profile::{SessionLevels, VolumeDelta, VolumeProfile};
use crate::types::{Candle, FundingSnapshot, MarketEvent, OpenInterestSnapshot, Trade};
use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Bounded FIFO trade tape capacity per instrument
const TRADE_TAPE_CAP: usize = 2_000;
/// Market event feed capacity per instrument (oldest dropped)
const EVENT_FEED_CAP: usize = 100;
/// Candle buffer capacity (enough for EMA-50 warmup with headroom)
const CANDLE_CAP: usize = 500;
/// Price history retention for micro-trend classification
const PRICE_RETENTION_SECS: i64 = 15 * 60;
/// Whale net-flow retention (daily wrap reads the full 24h window)
const WHALE_FLOW_RETENTION_SECS: i64 = 24 * 3600 + 300;
/// Open interest history retention (daily wrap reads the full 24h window)
const OI_RETENTION_SECS: i64 = 24 * 3600 + 300;
/// RVOL bucket width
pub const RVOL_BUCKET_SECS: i64 = 300;
/// Trailing RVOL buckets kept in addition to the in-progress one
pub const RVOL_TRAILING_BUCKETS: usize = 12;

/// All derived state for one watched instrument.
#[derive(Debug)]
pub struct InstrumentState {
    pub symbol: String,
    /// Governing observation timeframe; changing it is a session boundary
    timeframe: String,

    depth: DepthCache,
    book: ReconciledBook,

    profile: VolumeProfile,

    candles: VecDeque<Candle>,
    indicators: IndicatorSnapshot,

    tape: VecDeque<Trade>,
    events: VecDeque<MarketEvent>,
    next_event_id: u64,

    /// Signed whale notional records: +notional for BUY, -notional for SELL
    whale_flow: VecDeque<(DateTime<Utc>, f64)>,

    oi_history: VecDeque<OpenInterestSnapshot>,
    funding: Option<FundingSnapshot>,

    price_history: VecDeque<(DateTime<Utc>, f64)>,

    /// 5-minute volume buckets for RVOL: (bucket start, accumulated notional)
    rvol_buckets: VecDeque<(DateTime<Utc>, f64)>,
}

impl InstrumentState {
    pub fn new(symbol: String, timeframe: String) -> Self {
        Self {
            symbol,
            timeframe,
            depth: DepthCache::default(),
            book: ReconciledBook::default(),
            profile: VolumeProfile::default(),
            candles: VecDeque::with_capacity(CANDLE_CAP),
            indicators: IndicatorSnapshot::default(),
            tape: VecDeque::with_capacity(TRADE_TAPE_CAP),
            events: VecDeque::with_capacity(EVENT_FEED_CAP),
            next_event_id: 0,
            whale_flow: VecDeque::new(),
            oi_history: VecDeque::new(),
            funding: None,
            price_history: VecDeque::new(),
            rvol_buckets: VecDeque::with_capacity(RVOL_TRAILING_BUCKETS + 1),
        }
    }

    // === Order book ===

    /// Replace the deep cache and republish the reconciled book.
    pub fn apply_depth_snapshot(
        &mut self,
        bids: Vec<BookLevel>,
        asks: Vec<BookLevel>,
        snapshot_id: u64,
    ) {
        if self.depth.apply_snapshot(bids, asks, snapshot_id) {
            self.book = self.depth.reconcile();
        }
    }

    /// Apply a fast partial-depth push and republish the reconciled book.
    pub fn apply_depth_delta(
        &mut self,
        bid_updates: Vec<BookLevel>,
        ask_updates: Vec<BookLevel>,
        update_id: u64,
    ) {
        self.depth.apply_delta(bid_updates, ask_updates, update_id);
        self.book = self.depth.reconcile();
    }

    pub fn book(&self) -> &ReconciledBook {
        &self.book
    }

    // === Trades / profile ===

    /// Ingest a trade print: tape, price history, volume profile, RVOL bucket.
    pub fn record_trade(&mut self, trade: Trade) {
        self.price_history.push_back((trade.time, trade.price));
        self.profile.record_trade(&trade);
        self.bump_rvol_bucket(trade.time, trade.notional());

        self.tape.push_back(trade);
        while self.tape.len() > TRADE_TAPE_CAP {
            self.tape.pop_front();
        }

        self.prune(Utc::now());
    }

    pub fn last_price(&self) -> Option<f64> {
        self.price_history.back().map(|&(_, price)| price)
    }

    pub fn profile_levels(&self) -> Option<SessionLevels> {
        self.profile.levels()
    }

    pub fn volume_delta(&self) -> VolumeDelta {
        self.profile.delta()
    }

    pub fn profile(&self) -> &VolumeProfile {
        &self.profile
    }

    pub fn tape(&self) -> &VecDeque<Trade> {
        &self.tape
    }

    /// Price change over the trailing `secs`, as a fraction of the older
    /// price. Used by the level-interaction micro-trend.
    pub fn micro_trend(&self, secs: i64) -> Option<f64> {
        let (now, latest) = *self.price_history.back()?;
        let cutoff = now - Duration::seconds(secs);
        let (_, reference) = *self
            .price_history
            .iter()
            .find(|(time, _)| *time >= cutoff)?;
        if reference > 0.0 {
            Some((latest - reference) / reference)
        } else {
            None
        }
    }

    // === Session / timeframe ===

    pub fn timeframe(&self) -> &str {
        &self.timeframe
    }

    /// Switch the governing timeframe. A change is a session boundary: the
    /// profile, its derived levels, and the volume delta all reset.
    pub fn set_timeframe(&mut self, timeframe: String) {
        if self.timeframe != timeframe {
            debug!(
                instrument = %self.symbol,
                from = %self.timeframe,
                to = %timeframe,
                "timeframe change, resetting session profile"
            );
            self.timeframe = timeframe;
            self.profile.reset();
        }
    }

    // === Candles / indicators ===

    /// Ingest a closed or in-progress candle and recompute indicators. An
    /// update for the current in-progress candle replaces it in place.
    pub fn push_candle(&mut self, candle: Candle) {
        match self.candles.back_mut() {
            Some(last) if last.start_time == candle.start_time => *last = candle,
            _ => {
                self.candles.push_back(candle);
                while self.candles.len() > CANDLE_CAP {
                    self.candles.pop_front();
                }
            }
        }
        let series: Vec<Candle> = self.candles.iter().cloned().collect();
        self.indicators = IndicatorSnapshot::compute(&series);
    }

    pub fn indicators(&self) -> IndicatorSnapshot {
        self.indicators
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    // === Events ===

    /// Append to the capped event feed and return the assigned id.
    pub fn push_event(&mut self, mut event: MarketEvent) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        event.id = id;
        self.events.push_back(event);
        while self.events.len() > EVENT_FEED_CAP {
            self.events.pop_front();
        }
        id
    }

    pub fn events(&self) -> &VecDeque<MarketEvent> {
        &self.events
    }

    // === Whale flow ===

    /// Accumulate a whale trade's signed notional into the running net flow.
    pub fn record_whale_flow(&mut self, time: DateTime<Utc>, signed_notional: f64) {
        self.whale_flow.push_back((time, signed_notional));
    }

    /// Net whale flow over the trailing `secs`.
    pub fn net_whale_flow(&self, now: DateTime<Utc>, secs: i64) -> f64 {
        let cutoff = now - Duration::seconds(secs);
        self.whale_flow
            .iter()
            .filter(|(time, _)| *time >= cutoff)
            .map(|(_, notional)| notional)
            .sum()
    }

    // === Open interest / funding ===

    pub fn record_open_interest(&mut self, snapshot: OpenInterestSnapshot) {
        self.oi_history.push_back(snapshot);
    }

    pub fn latest_open_interest(&self) -> Option<OpenInterestSnapshot> {
        self.oi_history.back().copied()
    }

    /// Percentage change in open interest over the trailing `secs`, relative
    /// to the oldest snapshot inside the window.
    pub fn oi_change_pct(&self, now: DateTime<Utc>, secs: i64) -> Option<f64> {
        let cutoff = now - Duration::seconds(secs);
        let oldest = self.oi_history.iter().find(|s| s.time >= cutoff)?;
        let latest = self.oi_history.back()?;
        if oldest.time == latest.time || oldest.contracts <= 0.0 {
            return None;
        }
        Some((latest.contracts - oldest.contracts) / oldest.contracts * 100.0)
    }

    pub fn record_funding(&mut self, snapshot: FundingSnapshot) {
        self.funding = Some(snapshot);
    }

    pub fn funding(&self) -> Option<FundingSnapshot> {
        self.funding
    }

    // === RVOL ===

    fn bump_rvol_bucket(&mut self, time: DateTime<Utc>, notional: f64) {
        let bucket_start = time
            .duration_trunc(Duration::seconds(RVOL_BUCKET_SECS))
            .unwrap_or(time);
        match self.rvol_buckets.back_mut() {
            Some((start, volume)) if *start == bucket_start => *volume += notional,
            _ => {
                self.rvol_buckets.push_back((bucket_start, notional));
                while self.rvol_buckets.len() > RVOL_TRAILING_BUCKETS + 1 {
                    self.rvol_buckets.pop_front();
                }
            }
        }
    }

    /// Volume of the 5-minute bucket containing `now` and the trailing
    /// average of the prior completed buckets. The current bucket is derived
    /// from the poll time, so a trade lull reads as zero volume rather than
    /// replaying the last filled bucket. Returns `None` with fewer than 3
    /// prior buckets of history.
    pub fn rvol_inputs(&self, now: DateTime<Utc>) -> Option<(f64, f64)> {
        let bucket_start = now
            .duration_trunc(Duration::seconds(RVOL_BUCKET_SECS))
            .unwrap_or(now);
        let mut current = 0.0;
        let mut sum = 0.0;
        let mut count = 0usize;
        for &(start, volume) in &self.rvol_buckets {
            if start == bucket_start {
                current = volume;
            } else if start < bucket_start {
                sum += volume;
                count += 1;
            }
        }
        if count < 3 {
            return None;
        }
        Some((current, sum / count as f64))
    }

    // === Retention ===

    fn prune(&mut self, now: DateTime<Utc>) {
        let price_cutoff = now - Duration::seconds(PRICE_RETENTION_SECS);
        while self
            .price_history
            .front()
            .is_some_and(|(time, _)| *time < price_cutoff)
        {
            self.price_history.pop_front();
        }

        let whale_cutoff = now - Duration::seconds(WHALE_FLOW_RETENTION_SECS);
        while self
            .whale_flow
            .front()
            .is_some_and(|(time, _)| *time < whale_cutoff)
        {
            self.whale_flow.pop_front();
        }

        let oi_cutoff = now - Duration::seconds(OI_RETENTION_SECS);
        while self
            .oi_history
            .front()
            .is_some_and(|snapshot| snapshot.time < oi_cutoff)
        {
            self.oi_history.pop_front();
        }
    }
}

/// The engine's instrument map. One entry per watched instrument; watching
/// and unwatching never disturbs the other entries.
#[derive(Debug, Default)]
pub struct EngineState {
    instruments: RwLock<HashMap<String, InstrumentState>>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching an instrument. No-op if already watched.
    pub fn watch(&self, symbol: &str, timeframe: &str) {
        let mut instruments = self.instruments.write();
        instruments
            .entry(symbol.to_string())
            .or_insert_with(|| InstrumentState::new(symbol.to_string(), timeframe.to_string()));
    }

    /// Stop watching an instrument, dropping its derived state.
    pub fn unwatch(&self, symbol: &str) {
        self.instruments.write().remove(symbol);
    }

    pub fn watched(&self) -> Vec<String> {
        self.instruments.read().keys().cloned().collect()
    }

    pub fn is_watched(&self, symbol: &str) -> bool {
        self.instruments.read().contains_key(symbol)
    }

    /// Run a closure with mutable access to one instrument's state.
    pub fn with_instrument_mut<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&mut InstrumentState) -> R,
    ) -> Option<R> {
        let mut instruments = self.instruments.write();
        instruments.get_mut(symbol).map(f)
    }

    /// Run a closure with read access to one instrument's state.
    pub fn with_instrument<R>(
        &self,
        symbol: &str,
        f: impl FnOnce(&InstrumentState) -> R,
    ) -> Option<R> {
        let instruments = self.instruments.read();
        instruments.get(symbol).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketEventKind, Side};

    fn trade_at(price: f64, quantity: f64, time: DateTime<Utc>) -> Trade {
        Trade {
            price,
            quantity,
            side: Side::Buy,
            time,
        }
    }

    fn event(instrument: &str) -> MarketEvent {
        MarketEvent {
            id: 0,
            kind: MarketEventKind::Whale,
            instrument: instrument.to_string(),
            price: 100.0,
            quantity: 1.0,
            notional: 100.0,
            side: Some(Side::Buy),
            time: Utc::now(),
            title: None,
            message: None,
        }
    }

    #[test]
    fn test_event_feed_capped_at_100() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        for _ in 0..150 {
            state.push_event(event("BTCUSDT"));
        }
        assert_eq!(state.events().len(), 100);
        // Oldest dropped: the first surviving id is 50
        assert_eq!(state.events().front().unwrap().id, 50);
        assert_eq!(state.events().back().unwrap().id, 149);
    }

    #[test]
    fn test_timeframe_change_resets_profile() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        state.record_trade(trade_at(50_000.0, 1.0, Utc::now()));
        assert!(state.profile_levels().is_some());

        state.set_timeframe("15m".into());
        assert!(state.profile_levels().is_none());
        assert_eq!(state.volume_delta().delta(), 0.0);

        // Same timeframe again is not a session boundary
        state.record_trade(trade_at(50_000.0, 1.0, Utc::now()));
        state.set_timeframe("15m".into());
        assert!(state.profile_levels().is_some());
    }

    #[test]
    fn test_whale_flow_windowing() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        let now = Utc::now();
        state.record_whale_flow(now - Duration::minutes(20), 1_000_000.0);
        state.record_whale_flow(now - Duration::minutes(5), 600_000.0);
        state.record_whale_flow(now - Duration::minutes(1), -200_000.0);

        assert_eq!(state.net_whale_flow(now, 15 * 60), 400_000.0);
        assert_eq!(state.net_whale_flow(now, 30 * 60), 1_400_000.0);
    }

    #[test]
    fn test_oi_change_pct() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        let now = Utc::now();
        state.record_open_interest(OpenInterestSnapshot {
            contracts: 1_000.0,
            time: now - Duration::minutes(4),
        });
        state.record_open_interest(OpenInterestSnapshot {
            contracts: 1_020.0,
            time: now,
        });
        let change = state.oi_change_pct(now, 5 * 60).unwrap();
        assert!((change - 2.0).abs() < 1e-9);

        // Window too short to cover the older snapshot
        assert!(state.oi_change_pct(now, 60).is_none());
    }

    #[test]
    fn test_rvol_requires_history() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        let base = Utc::now()
            .duration_trunc(Duration::seconds(RVOL_BUCKET_SECS))
            .unwrap();
        // Two prior buckets only: not enough
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(600)));
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(300)));
        state.record_trade(trade_at(100.0, 1.0, base));
        assert!(state.rvol_inputs(base).is_none());

        // Third prior bucket unlocks the signal inputs
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(900)));
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(600)));
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(300)));
        state.record_trade(trade_at(100.0, 6.0, base));
        let (current, average) = state.rvol_inputs(base).unwrap();
        assert_eq!(current, 600.0);
        assert!((average - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_rvol_trade_lull_reads_zero_not_stale_bucket() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        let base = Utc::now()
            .duration_trunc(Duration::seconds(RVOL_BUCKET_SECS))
            .unwrap();
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(900)));
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(600)));
        state.record_trade(trade_at(100.0, 1.0, base - Duration::seconds(300)));
        state.record_trade(trade_at(100.0, 6.0, base));

        // One bucket later with no trades: the burst at `base` has completed
        // and rolled into the trailing average, the live bucket is empty
        let (current, average) = state
            .rvol_inputs(base + Duration::seconds(RVOL_BUCKET_SECS))
            .unwrap();
        assert_eq!(current, 0.0);
        assert!((average - 225.0).abs() < 1e-9);
    }

    #[test]
    fn test_in_progress_candle_replaced() {
        let mut state = InstrumentState::new("BTCUSDT".into(), "1m".into());
        let start = Utc::now();
        let mut candle = Candle {
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            start_time: start,
            is_complete: false,
        };
        state.push_candle(candle.clone());
        candle.close = 101.0;
        state.push_candle(candle);
        assert_eq!(state.candle_count(), 1);
    }

    #[test]
    fn test_engine_watch_unwatch_isolated() {
        let engine = EngineState::new();
        engine.watch("BTCUSDT", "1m");
        engine.watch("ETHUSDT", "1m");
        engine
            .with_instrument_mut("BTCUSDT", |state| {
                state.record_trade(trade_at(50_000.0, 1.0, Utc::now()))
            })
            .unwrap();

        engine.unwatch("ETHUSDT");
        assert!(!engine.is_watched("ETHUSDT"));
        // The other instrument's state is untouched
        let levels = engine
            .with_instrument("BTCUSDT", |state| state.profile_levels())
            .unwrap();
        assert!(levels.is_some());
    }
}
