//! Session volume profile.
//!
//! Accumulates trade notional into a price-bucketed histogram per
//! instrument/session and derives the point of control (POC) and value-area
//! bounds (VAH/VAL) on every trade. The histogram is an ordered map keyed by
//! integer bucket index because the POC/value-area computation requires
//! ordered iteration.

use crate::types::{Side, Trade};
use std::collections::BTreeMap;

/// Bucket size by price magnitude: coarse buckets for high-priced
/// instruments, fine buckets for sub-$1 instruments. Fixed for the session
/// once established.
pub fn bucket_size_for_price(price: f64) -> f64 {
    if price >= 10_000.0 {
        100.0
    } else if price >= 1_000.0 {
        10.0
    } else if price >= 100.0 {
        1.0
    } else if price >= 1.0 {
        0.1
    } else {
        0.001
    }
}

/// Cumulative buy/sell notional since the last session reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeDelta {
    pub buy_volume: f64,
    pub sell_volume: f64,
}

impl VolumeDelta {
    pub fn delta(&self) -> f64 {
        self.buy_volume - self.sell_volume
    }
}

/// Derived session levels, recomputed on every trade ingestion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLevels {
    pub poc: f64,
    pub vah: f64,
    pub val: f64,
}

/// Price-bucketed volume histogram for the current session.
#[derive(Debug, Clone, Default)]
pub struct VolumeProfile {
    bucket_size: Option<f64>,
    histogram: BTreeMap<i64, f64>,
    total_volume: f64,
    delta: VolumeDelta,
    levels: Option<SessionLevels>,
}

impl VolumeProfile {
    /// Bucket size in use, established by the first trade of the session.
    pub fn bucket_size(&self) -> Option<f64> {
        self.bucket_size
    }

    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    pub fn delta(&self) -> VolumeDelta {
        self.delta
    }

    pub fn levels(&self) -> Option<SessionLevels> {
        self.levels
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Bucket index for a price under the session's established bucket size.
    pub fn bucket_index(&self, price: f64) -> Option<i64> {
        self.bucket_size.map(|size| (price / size).round() as i64)
    }

    /// Accumulate a trade into the histogram and recompute POC/VAH/VAL.
    pub fn record_trade(&mut self, trade: &Trade) {
        let size = *self
            .bucket_size
            .get_or_insert_with(|| bucket_size_for_price(trade.price));

        let notional = trade.notional();
        match trade.side {
            Side::Buy => self.delta.buy_volume += notional,
            Side::Sell => self.delta.sell_volume += notional,
        }

        let bucket = (trade.price / size).round() as i64;
        *self.histogram.entry(bucket).or_insert(0.0) += notional;
        self.total_volume += notional;

        self.levels = self.compute_levels();
    }

    /// Full reset on a session boundary (timeframe change). The bucket size
    /// is re-established by the next trade.
    pub fn reset(&mut self) {
        self.bucket_size = None;
        self.histogram.clear();
        self.total_volume = 0.0;
        self.delta = VolumeDelta::default();
        self.levels = None;
    }

    /// POC = bucket with maximum volume, ties resolved to the lowest price.
    /// Value area: walk outward from POC toward the neighboring bucket with
    /// more volume (ties prefer the downward bucket) until >= 70% of total
    /// session volume is enclosed or both directions are exhausted.
    fn compute_levels(&self) -> Option<SessionLevels> {
        let size = self.bucket_size?;
        if self.histogram.is_empty() || self.total_volume <= 0.0 {
            return None;
        }

        let buckets: Vec<(i64, f64)> = self.histogram.iter().map(|(&k, &v)| (k, v)).collect();

        // BTreeMap iterates lowest price first, so strict > keeps the first
        // (lowest-price) max bucket on ties.
        let mut poc_pos = 0;
        for (pos, &(_, volume)) in buckets.iter().enumerate() {
            if volume > buckets[poc_pos].1 {
                poc_pos = pos;
            }
        }

        let target = self.total_volume * 0.70;
        let mut lo = poc_pos;
        let mut hi = poc_pos;
        let mut enclosed = buckets[poc_pos].1;

        while enclosed < target && (lo > 0 || hi + 1 < buckets.len()) {
            let down = if lo > 0 { Some(buckets[lo - 1].1) } else { None };
            let up = if hi + 1 < buckets.len() {
                Some(buckets[hi + 1].1)
            } else {
                None
            };

            match (down, up) {
                (Some(d), Some(u)) if u > d => {
                    hi += 1;
                    enclosed += u;
                }
                (Some(d), _) => {
                    lo -= 1;
                    enclosed += d;
                }
                (None, Some(u)) => {
                    hi += 1;
                    enclosed += u;
                }
                (None, None) => break,
            }
        }

        Some(SessionLevels {
            poc: buckets[poc_pos].0 as f64 * size,
            vah: buckets[hi].0 as f64 * size,
            val: buckets[lo].0 as f64 * size,
        })
    }
}
