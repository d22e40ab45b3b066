//! Binance USD-M futures ingestion.
//!
//! Three long-lived tasks feed the engine:
//! - the combined WebSocket stream (partial depth, aggregate trades, forced
//!   liquidations, 1m klines) with live SUBSCRIBE/UNSUBSCRIBE management as
//!   the watch-set changes,
//! - the deep REST depth snapshot poller (every 15s per instrument),
//! - the open interest / premium index poller (every 60s per instrument).
//!
//! Prices and quantities arrive as decimal strings and are parsed through
//! `Decimal` at the wire seam before entering the f64 analytics path. A
//! malformed message is logged and dropped; ingestion never stops for one
//! bad payload.

use crate::book::BookLevel;
use crate::error::EngineError;
use crate::signals::SignalEngine;
use crate::state::EngineState;
use crate::types::{Candle, Liquidation, Side, Trade};
use chrono::{DateTime, Utc};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const DEPTH_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DERIVATIVES_POLL_INTERVAL: Duration = Duration::from_secs(60);
const SUBSCRIPTION_RESYNC_INTERVAL: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const KLINE_BACKFILL_LIMIT: u32 = 500;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// REST base URL (env: BINANCE_REST_URL)
fn rest_base() -> String {
    std::env::var("BINANCE_REST_URL")
        .unwrap_or_else(|_| "https://fapi.binance.com".to_string())
}

/// Combined stream endpoint (env: BINANCE_WS_URL)
fn ws_url() -> String {
    std::env::var("BINANCE_WS_URL")
        .unwrap_or_else(|_| "wss://fstream.binance.com/stream".to_string())
}

// === Wire types ===

fn dec_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn ms_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// One `["price", "quantity"]` pair as the exchange sends it.
#[derive(Debug, Deserialize)]
struct RawLevel(Decimal, Decimal);

impl RawLevel {
    fn level(&self) -> BookLevel {
        BookLevel::new(dec_f64(self.0), dec_f64(self.1))
    }
}

/// Deep order book snapshot from `GET /fapi/v1/depth`.
#[derive(Debug, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
}

impl DepthSnapshot {
    pub fn levels(&self) -> (Vec<BookLevel>, Vec<BookLevel>) {
        (
            self.bids.iter().map(RawLevel::level).collect(),
            self.asks.iter().map(RawLevel::level).collect(),
        )
    }
}

/// Envelope of the combined stream: `{"stream": "...", "data": {...}}`.
#[derive(Debug, Deserialize)]
struct CombinedMessage {
    stream: String,
    data: serde_json::Value,
}

/// Partial-depth push (`<symbol>@depth20@100ms`).
#[derive(Debug, Deserialize)]
struct DepthUpdate {
    #[serde(rename = "u")]
    final_update_id: u64,
    #[serde(rename = "b", default)]
    bids: Vec<RawLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<RawLevel>,
}

/// Aggregate trade push (`<symbol>@aggTrade`).
#[derive(Debug, Deserialize)]
struct AggTradeEvent {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
    /// Whether the buyer is the maker; the taker side is the opposite
    #[serde(rename = "m")]
    buyer_is_maker: bool,
}

/// Forced liquidation push (`<symbol>@forceOrder`).
#[derive(Debug, Deserialize)]
struct ForceOrderEvent {
    #[serde(rename = "o")]
    order: ForceOrder,
}

#[derive(Debug, Deserialize)]
struct ForceOrder {
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "ap")]
    average_price: Decimal,
    #[serde(rename = "q")]
    quantity: Decimal,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Kline push (`<symbol>@kline_1m`).
#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    start_time: i64,
    #[serde(rename = "o")]
    open: Decimal,
    #[serde(rename = "h")]
    high: Decimal,
    #[serde(rename = "l")]
    low: Decimal,
    #[serde(rename = "c")]
    close: Decimal,
    #[serde(rename = "v")]
    volume: Decimal,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: Decimal,
    time: i64,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: Decimal,
    time: i64,
}

/// Kline REST response row, a positional array
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,    // 0: open time
    String, // 1: open
    String, // 2: high
    String, // 3: low
    String, // 4: close
    String, // 5: volume
    i64,    // 6: close time
    String, // 7: quote asset volume
    i64,    // 8: number of trades
    String, // 9: taker buy base volume
    String, // 10: taker buy quote volume
    String, // 11: ignore
);

fn kline_to_candle(kline: &BinanceKline, now: DateTime<Utc>) -> Option<Candle> {
    Some(Candle {
        open: kline.1.parse().ok()?,
        high: kline.2.parse().ok()?,
        low: kline.3.parse().ok()?,
        close: kline.4.parse().ok()?,
        volume: kline.5.parse().ok()?,
        start_time: DateTime::from_timestamp_millis(kline.0)?,
        is_complete: ms_to_utc(kline.6) < now,
    })
}

fn parse_side(raw: &str) -> Result<Side, EngineError> {
    match raw {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(EngineError::Parse(format!("unknown side: {}", other))),
    }
}

/// Stream names for one instrument on the combined endpoint.
fn streams_for(symbol: &str) -> Vec<String> {
    let lower = symbol.to_lowercase();
    vec![
        format!("{}@depth20@100ms", lower),
        format!("{}@aggTrade", lower),
        format!("{}@forceOrder", lower),
        format!("{}@kline_1m", lower),
    ]
}

// === Message routing ===

/// Route one combined-stream text frame into engine state.
///
/// Control frames (subscription acks) are ignored. Frames for instruments no
/// longer watched are dropped; unsubscription is asynchronous and stragglers
/// are expected.
pub fn route_message(
    state: &EngineState,
    signals: &SignalEngine,
    text: &str,
) -> Result<(), EngineError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("stream").is_none() {
        debug!("control frame: {}", text);
        return Ok(());
    }
    let envelope: CombinedMessage = serde_json::from_value(value)?;
    let Some((raw_symbol, kind)) = envelope.stream.split_once('@') else {
        return Err(EngineError::Parse(format!(
            "unrecognized stream: {}",
            envelope.stream
        )));
    };
    let symbol = raw_symbol.to_uppercase();
    if !state.is_watched(&symbol) {
        debug!(instrument = %symbol, "frame for unwatched instrument dropped");
        return Ok(());
    }

    match kind {
        kind if kind.starts_with("depth") => {
            let update: DepthUpdate = serde_json::from_value(envelope.data)?;
            let bids: Vec<BookLevel> = update.bids.iter().map(RawLevel::level).collect();
            let asks: Vec<BookLevel> = update.asks.iter().map(RawLevel::level).collect();
            state.with_instrument_mut(&symbol, |instrument| {
                instrument.apply_depth_delta(bids, asks, update.final_update_id)
            });
        }
        "aggTrade" => {
            let event: AggTradeEvent = serde_json::from_value(envelope.data)?;
            let trade = Trade {
                price: dec_f64(event.price),
                quantity: dec_f64(event.quantity),
                side: if event.buyer_is_maker {
                    Side::Sell
                } else {
                    Side::Buy
                },
                time: ms_to_utc(event.trade_time),
            };
            signals.on_trade(&symbol, trade);
        }
        "forceOrder" => {
            let event: ForceOrderEvent = serde_json::from_value(envelope.data)?;
            let liquidation = Liquidation {
                side: parse_side(&event.order.side)?,
                price: dec_f64(event.order.average_price),
                quantity: dec_f64(event.order.quantity),
                time: ms_to_utc(event.order.trade_time),
            };
            signals.on_liquidation(&symbol, liquidation);
        }
        kind if kind.starts_with("kline") => {
            let event: KlineEvent = serde_json::from_value(envelope.data)?;
            let kline = event.kline;
            let candle = Candle {
                open: dec_f64(kline.open),
                high: dec_f64(kline.high),
                low: dec_f64(kline.low),
                close: dec_f64(kline.close),
                volume: dec_f64(kline.volume),
                start_time: ms_to_utc(kline.start_time),
                is_complete: kline.is_closed,
            };
            state.with_instrument_mut(&symbol, |instrument| instrument.push_candle(candle));
        }
        other => {
            debug!(stream = %other, "unhandled stream kind");
        }
    }
    Ok(())
}

// === WebSocket task ===

/// Spawn the combined-stream task: connect, keep subscriptions in sync with
/// the watch-set, route every frame, reconnect with backfill on failure.
pub fn spawn_market_stream(
    state: Arc<EngineState>,
    signals: Arc<SignalEngine>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = ws_url();
        info!(%url, "starting market stream");

        loop {
            match connect_async(&url).await {
                Ok((ws_stream, _)) => {
                    info!("market stream connected");

                    // Candle history is lost across reconnects from the
                    // stream's perspective; backfill before consuming pushes
                    for symbol in state.watched() {
                        match backfill_klines(&state, &symbol).await {
                            Ok(count) => {
                                info!(instrument = %symbol, count, "kline backfill complete")
                            }
                            Err(error) => {
                                warn!(instrument = %symbol, %error, "kline backfill failed")
                            }
                        }
                    }

                    let (mut write, mut read) = ws_stream.split();
                    let mut subscribed: HashSet<String> = HashSet::new();
                    let mut request_id: u64 = 0;
                    let mut resync = tokio::time::interval(SUBSCRIPTION_RESYNC_INTERVAL);

                    loop {
                        tokio::select! {
                            _ = resync.tick() => {
                                if let Err(error) = resync_subscriptions(
                                    &mut write,
                                    &state,
                                    &mut subscribed,
                                    &mut request_id,
                                )
                                .await
                                {
                                    warn!(%error, "subscription update failed, reconnecting");
                                    break;
                                }
                            }
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Err(error) = route_message(&state, &signals, &text) {
                                        warn!(%error, "dropping malformed stream frame");
                                    }
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!("market stream closed by server");
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(error)) => {
                                    let error = EngineError::from(error);
                                    if error.is_terminal() {
                                        error!(%error, "terminal market stream error");
                                        break;
                                    }
                                    warn!(%error, "transient market stream error");
                                }
                            }
                        }
                    }
                }
                Err(error) => {
                    error!(%error, "failed to connect to market stream");
                }
            }

            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    })
}

/// Diff the live subscription set against the watch-set and send
/// SUBSCRIBE/UNSUBSCRIBE frames for the difference.
async fn resync_subscriptions(
    write: &mut WsSink,
    state: &EngineState,
    subscribed: &mut HashSet<String>,
    request_id: &mut u64,
) -> Result<(), EngineError> {
    let desired: HashSet<String> = state
        .watched()
        .iter()
        .flat_map(|symbol| streams_for(symbol))
        .collect();

    let to_add: Vec<String> = desired.difference(subscribed).cloned().collect();
    let to_remove: Vec<String> = subscribed.difference(&desired).cloned().collect();

    if !to_add.is_empty() {
        *request_id += 1;
        let frame = serde_json::json!({
            "method": "SUBSCRIBE",
            "params": to_add,
            "id": *request_id,
        });
        info!(streams = ?frame["params"], "subscribing");
        write.send(Message::Text(frame.to_string().into())).await?;
    }
    if !to_remove.is_empty() {
        *request_id += 1;
        let frame = serde_json::json!({
            "method": "UNSUBSCRIBE",
            "params": to_remove,
            "id": *request_id,
        });
        info!(streams = ?frame["params"], "unsubscribing");
        write.send(Message::Text(frame.to_string().into())).await?;
    }

    *subscribed = desired;
    Ok(())
}

// === REST pollers ===

async fn fetch_depth_snapshot(
    client: &reqwest::Client,
    symbol: &str,
) -> Result<DepthSnapshot, EngineError> {
    let url = format!("{}/fapi/v1/depth?symbol={}&limit=1000", rest_base(), symbol);
    let snapshot = client
        .get(&url)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(snapshot)
}

/// Spawn the deep depth snapshot poller (15s cadence per instrument).
pub fn spawn_depth_poller(state: Arc<EngineState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(DEPTH_POLL_INTERVAL);
        loop {
            interval.tick().await;
            for symbol in state.watched() {
                match fetch_depth_snapshot(&client, &symbol).await {
                    Ok(snapshot) => {
                        let (bids, asks) = snapshot.levels();
                        state.with_instrument_mut(&symbol, |instrument| {
                            instrument.apply_depth_snapshot(bids, asks, snapshot.last_update_id)
                        });
                    }
                    Err(error) => {
                        warn!(instrument = %symbol, %error, "depth snapshot fetch failed");
                    }
                }
            }
        }
    })
}

/// Spawn the open interest / funding poller (60s cadence per instrument).
pub fn spawn_derivatives_poller(state: Arc<EngineState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(DERIVATIVES_POLL_INTERVAL);
        loop {
            interval.tick().await;
            for symbol in state.watched() {
                match fetch_open_interest(&client, &symbol).await {
                    Ok(snapshot) => {
                        state.with_instrument_mut(&symbol, |instrument| {
                            instrument.record_open_interest(snapshot)
                        });
                    }
                    Err(error) => {
                        warn!(instrument = %symbol, %error, "open interest fetch failed");
                    }
                }
                match fetch_funding(&client, &symbol).await {
                    Ok(snapshot) => {
                        state.with_instrument_mut(&symbol, |instrument| {
                            instrument.record_funding(snapshot)
                        });
                    }
                    Err(error) => {
                        warn!(instrument = %symbol, %error, "premium index fetch failed");
                    }
                }
            }
        }
    })
}

async fn fetch_open_interest(
    client: &reqwest::Client,
    symbol: &str,
) -> Result<crate::types::OpenInterestSnapshot, EngineError> {
    let url = format!("{}/fapi/v1/openInterest?symbol={}", rest_base(), symbol);
    let response: OpenInterestResponse = client
        .get(&url)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(crate::types::OpenInterestSnapshot {
        contracts: dec_f64(response.open_interest),
        time: ms_to_utc(response.time),
    })
}

async fn fetch_funding(
    client: &reqwest::Client,
    symbol: &str,
) -> Result<crate::types::FundingSnapshot, EngineError> {
    let url = format!("{}/fapi/v1/premiumIndex?symbol={}", rest_base(), symbol);
    let response: PremiumIndexResponse = client
        .get(&url)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(crate::types::FundingSnapshot {
        rate: dec_f64(response.last_funding_rate),
        time: ms_to_utc(response.time),
    })
}

/// Backfill recent 1m candles so indicators have warmup history before live
/// kline pushes take over.
pub async fn backfill_klines(state: &EngineState, symbol: &str) -> Result<usize, EngineError> {
    let url = format!(
        "{}/fapi/v1/klines?symbol={}&interval=1m&limit={}",
        rest_base(),
        symbol,
        KLINE_BACKFILL_LIMIT
    );
    let client = reqwest::Client::new();
    let klines: Vec<BinanceKline> = client
        .get(&url)
        .timeout(HTTP_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let now = Utc::now();
    let candles: Vec<Candle> = klines
        .iter()
        .filter_map(|kline| kline_to_candle(kline, now))
        .collect();
    let count = candles.len();
    state.with_instrument_mut(symbol, |instrument| {
        for candle in candles {
            instrument.push_candle(candle);
        }
    });
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{shared_policy, AlertPolicy};
    use crate::governor::AlertGovernor;
    use crate::types::MarketEventKind;
    use tokio::sync::mpsc;

    fn harness() -> (Arc<EngineState>, SignalEngine) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let state = Arc::new(EngineState::new());
        let governor = Arc::new(AlertGovernor::new(shared_policy(AlertPolicy::default()), tx));
        let signals = SignalEngine::new(Arc::clone(&state), governor);
        (state, signals)
    }

    #[test]
    fn test_route_agg_trade_to_tape() {
        let (state, signals) = harness();
        state.watch("BTCUSDT", "1m");

        let frame = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1700000000100,"s":"BTCUSDT","a":42,"p":"50000.0","q":"12.0","f":1,"l":1,"T":1700000000000,"m":false}}"#;
        route_message(&state, &signals, frame).unwrap();

        state
            .with_instrument("BTCUSDT", |instrument| {
                assert_eq!(instrument.tape().len(), 1);
                let trade = instrument.tape().back().unwrap();
                assert_eq!(trade.price, 50_000.0);
                assert_eq!(trade.side, Side::Buy);
                // $600k notional is a whale: one feed event
                assert_eq!(instrument.events().len(), 1);
                assert_eq!(instrument.events()[0].kind, MarketEventKind::Whale);
            })
            .unwrap();
    }

    #[test]
    fn test_route_depth_update_over_snapshot() {
        let (state, signals) = harness();
        state.watch("BTCUSDT", "1m");

        let snapshot: DepthSnapshot = serde_json::from_str(
            r#"{"lastUpdateId":100,"E":1,"T":1,"bids":[["100.0","2.0"],["99.0","5.0"]],"asks":[["101.0","1.0"],["102.0","5.0"]]}"#,
        )
        .unwrap();
        let (bids, asks) = snapshot.levels();
        state.with_instrument_mut("BTCUSDT", |instrument| {
            instrument.apply_depth_snapshot(bids, asks, snapshot.last_update_id)
        });

        let frame = r#"{"stream":"btcusdt@depth20@100ms","data":{"e":"depthUpdate","E":2,"T":2,"s":"BTCUSDT","U":101,"u":101,"pu":100,"b":[["100.0","3.0"]],"a":[["101.0","0.5"]]}}"#;
        route_message(&state, &signals, frame).unwrap();

        state
            .with_instrument("BTCUSDT", |instrument| {
                let book = instrument.book();
                // Fast levels win at the touch, deep tail survives beyond
                assert_eq!(book.best_bid().unwrap().quantity, 3.0);
                assert_eq!(book.best_ask().unwrap().quantity, 0.5);
                assert_eq!(book.bids.len(), 2);
                assert_eq!(book.asks.len(), 2);
            })
            .unwrap();
    }

    #[test]
    fn test_route_force_order() {
        let (state, signals) = harness();
        state.watch("ETHUSDT", "1m");

        let frame = r#"{"stream":"ethusdt@forceOrder","data":{"e":"forceOrder","E":1700000000100,"o":{"s":"ETHUSDT","S":"SELL","o":"LIMIT","q":"500","p":"2990","ap":"3000","T":1700000000000}}}"#;
        route_message(&state, &signals, frame).unwrap();

        state
            .with_instrument("ETHUSDT", |instrument| {
                assert_eq!(instrument.events().len(), 1);
                let event = &instrument.events()[0];
                assert_eq!(event.kind, MarketEventKind::Liquidation);
                assert_eq!(event.notional, 1_500_000.0);
                assert_eq!(event.side, Some(Side::Sell));
            })
            .unwrap();
    }

    #[test]
    fn test_route_kline_replaces_in_progress() {
        let (state, signals) = harness();
        state.watch("BTCUSDT", "1m");

        let open = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":1,"s":"BTCUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"100","h":"101","l":"99","c":"100.5","v":"10","x":false}}}"#;
        route_message(&state, &signals, open).unwrap();
        let updated = r#"{"stream":"btcusdt@kline_1m","data":{"e":"kline","E":2,"s":"BTCUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","o":"100","h":"102","l":"99","c":"101.5","v":"15","x":true}}}"#;
        route_message(&state, &signals, updated).unwrap();

        state
            .with_instrument("BTCUSDT", |instrument| {
                assert_eq!(instrument.candle_count(), 1);
            })
            .unwrap();
    }

    #[test]
    fn test_malformed_payload_is_parse_error() {
        let (state, signals) = harness();
        state.watch("BTCUSDT", "1m");

        let frame = r#"{"stream":"btcusdt@aggTrade","data":{"p":"not-a-price","q":"1","T":0,"m":false}}"#;
        let error = route_message(&state, &signals, frame).unwrap_err();
        assert!(matches!(error, EngineError::Parse(_)));
        assert!(!error.is_terminal());

        // Nothing entered the tape
        let tape_len = state
            .with_instrument("BTCUSDT", |instrument| instrument.tape().len())
            .unwrap();
        assert_eq!(tape_len, 0);
    }

    #[test]
    fn test_unwatched_instrument_frame_dropped() {
        let (state, signals) = harness();
        let frame = r#"{"stream":"dogeusdt@aggTrade","data":{"e":"aggTrade","p":"0.1","q":"10","T":0,"m":true}}"#;
        // Silently dropped, not an error
        route_message(&state, &signals, frame).unwrap();
    }

    #[test]
    fn test_control_frame_ignored() {
        let (state, signals) = harness();
        route_message(&state, &signals, r#"{"result":null,"id":1}"#).unwrap();
    }

    #[test]
    fn test_streams_for_symbol() {
        let streams = streams_for("BTCUSDT");
        assert_eq!(
            streams,
            vec![
                "btcusdt@depth20@100ms",
                "btcusdt@aggTrade",
                "btcusdt@forceOrder",
                "btcusdt@kline_1m",
            ]
        );
    }

    #[test]
    fn test_backfill_kline_row_conversion() {
        let row: BinanceKline = serde_json::from_str(
            r#"[1700000000000,"100.0","101.0","99.0","100.5","12.5",1700000059999,"1250.0",42,"6.0","600.0","0"]"#,
        )
        .unwrap();
        let now = ms_to_utc(1_700_000_120_000);
        let candle = kline_to_candle(&row, now).unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.close, 100.5);
        assert_eq!(candle.volume, 12.5);
        assert!(candle.is_complete);
        assert_eq!(candle.start_time, ms_to_utc(1_700_000_000_000));
    }
}
