//! Market Sentinel - real-time market microstructure analytics and alerting
//!
//! Ingests Binance USD-M futures market data (order book depth, aggregate
//! trades, forced liquidations, klines, open interest, funding) for a set of
//! watched instruments and maintains per-instrument derived state:
//! - a reconciled order book merging deep REST snapshots with the fast
//!   partial-depth stream,
//! - a session volume profile with POC / value area levels,
//! - technical indicators (EMA, RSI, ATR, VWAP) over a rolling candle window.
//!
//! A signal detection engine classifies discrete events (whale trades,
//! liquidations, volatility expansion, OI shifts, wall proximity, funding
//! extremes, value-area breakouts, volume anomalies) and forwards them
//! through an alert governor (global/category switches, quiet hours,
//! per-key cooldowns) to an external notifier service.

pub mod book;
pub mod config;
pub mod context;
pub mod error;
pub mod feed;
pub mod governor;
pub mod indicators;
pub mod notifier;
pub mod profile;
pub mod signals;
pub mod state;
pub mod types;

pub use book::{merge, BookLevel, BookSide, DepthCache, ReconciledBook};
pub use config::{shared_policy, AlertPolicy, QuietHours, SharedPolicy};
pub use context::{classify, ContextInputs, MarketContext};
pub use error::EngineError;
pub use governor::{AlertGovernor, DispatchOutcome};
pub use indicators::IndicatorSnapshot;
pub use notifier::{spawn_notifier, OutboundAlert};
pub use profile::{SessionLevels, VolumeDelta, VolumeProfile};
pub use signals::SignalEngine;
pub use state::{EngineState, InstrumentState};
pub use types::{
    AlertCandidate, AlertCategory, Candle, FundingSnapshot, Liquidation, MarketEvent,
    MarketEventKind, OpenInterestSnapshot, Severity, Side, Trade,
};
