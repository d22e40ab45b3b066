//! Technical indicator pipeline.
//!
//! Stateless pure functions over a candle series. The engine recomputes these
//! on every closed or in-progress candle update and publishes the latest
//! values into the instrument state for the detection engine and the context
//! classifier.

use crate::types::Candle;

/// Exponential moving average of the latest value.
///
/// Seeded with a simple average of the first `period` values, then smoothed
/// with k = 2 / (period + 1).
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut current: f64 = values[..period].iter().sum::<f64>() / period as f64;
    for value in &values[period..] {
        current = value * k + current * (1.0 - k);
    }
    Some(current)
}

/// Simple moving average over the trailing `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Relative Strength Index with Wilder smoothing.
///
/// When the smoothed average loss is zero the series has no down moves and
/// RSI is pinned at 100.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// True range of a candle given the previous close.
fn true_range(candle: &Candle, prev_close: Option<f64>) -> f64 {
    match prev_close {
        Some(prev) => (candle.high - candle.low)
            .max((candle.high - prev).abs())
            .max((candle.low - prev).abs()),
        None => candle.high - candle.low,
    }
}

/// Average True Range series, one value per candle from index `period - 1`.
///
/// Seeded as a simple average of the first `period` true ranges, then
/// Wilder-smoothed.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period {
        return Vec::new();
    }

    let mut trs = Vec::with_capacity(candles.len());
    let mut prev_close = None;
    for candle in candles {
        trs.push(true_range(candle, prev_close));
        prev_close = Some(candle.close);
    }

    let mut out = Vec::with_capacity(candles.len() - period + 1);
    let mut current: f64 = trs[..period].iter().sum::<f64>() / period as f64;
    out.push(current);
    for tr in &trs[period..] {
        current = (current * (period as f64 - 1.0) + tr) / period as f64;
        out.push(current);
    }
    out
}

/// Latest Average True Range value.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    atr_series(candles, period).last().copied()
}

/// Session VWAP: cumulative typical price x volume over cumulative volume.
///
/// Falls back to the latest typical price when cumulative volume is zero.
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    let last = candles.last()?;
    let mut sum_pv = 0.0;
    let mut sum_v = 0.0;
    for candle in candles {
        sum_pv += candle.typical_price() * candle.volume;
        sum_v += candle.volume;
    }
    if sum_v > 0.0 {
        Some(sum_pv / sum_v)
    } else {
        Some(last.typical_price())
    }
}

/// Latest indicator values published into the instrument state.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorSnapshot {
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    /// SMA(14) of the trailing ATR series, denominator of the expansion ratio
    pub atr_sma_14: Option<f64>,
    pub sma_20: Option<f64>,
    pub vwap: Option<f64>,
}

impl IndicatorSnapshot {
    /// Recompute everything from the candle series.
    pub fn compute(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let atrs = atr_series(candles, 14);
        Self {
            ema_21: ema(&closes, 21),
            ema_50: ema(&closes, 50),
            rsi_14: rsi(&closes, 14),
            atr_14: atrs.last().copied(),
            atr_sma_14: sma(&atrs, 14),
            sma_20: sma(&closes, 20),
            vwap: vwap(candles),
        }
    }

    /// ATR / ATR-SMA expansion ratio, when both legs are available.
    pub fn atr_ratio(&self) -> Option<f64> {
        match (self.atr_14, self.atr_sma_14) {
            (Some(atr), Some(base)) if base > 0.0 => Some(atr / base),
            _ => None,
        }
    }
}
