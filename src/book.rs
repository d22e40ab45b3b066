//! Order-book reconciliation.
//!
//! Merges a periodic deep REST snapshot (thousands of levels, refreshed every
//! 15s) with the high-frequency partial-depth stream (top-of-book levels,
//! pushed every 100ms) into one consistent two-sided book per instrument.
//!
//! The merge is asymmetric: the fast stream is authoritative near the touch
//! (freshest), the deep snapshot is authoritative beyond the fast stream's
//! coverage (stale but orders of magnitude more levels). The merged book is
//! published as one wholesale replacement so readers never observe a partial
//! merge.

use crate::config::wall_threshold;
use serde::{Deserialize, Serialize};

/// A single price level with resting quantity.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct BookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl BookLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    /// USD notional resting at this level.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Which side of the book a level sequence belongs to.
///
/// Bids are ordered descending by price, asks ascending; in both cases the
/// first element is nearest the touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bids,
    Asks,
}

/// Merge one side of the deep snapshot with the fast partial-depth levels.
///
/// The fast levels win from the touch down to their furthest level
/// (`boundary`); deep levels strictly beyond the boundary are appended
/// unchanged. Both inputs must already be in touch-first order.
pub fn merge(deep: &[BookLevel], fast: &[BookLevel], side: BookSide) -> Vec<BookLevel> {
    if fast.is_empty() {
        return deep.to_vec();
    }
    if deep.is_empty() {
        return fast.to_vec();
    }

    let boundary = fast[fast.len() - 1].price;
    let mut merged = fast.to_vec();
    merged.extend(deep.iter().copied().filter(|level| match side {
        BookSide::Bids => level.price < boundary,
        BookSide::Asks => level.price > boundary,
    }));
    merged
}

/// The reconciled two-sided book, replaced wholesale on every reconciliation.
#[derive(Debug, Clone, Default)]
pub struct ReconciledBook {
    /// Descending by price, best bid first
    pub bids: Vec<BookLevel>,
    /// Ascending by price, best ask first
    pub asks: Vec<BookLevel>,
    /// Deep snapshot id this book was reconciled against
    pub sequence_id: u64,
}

impl ReconciledBook {
    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / 2.0),
            _ => None,
        }
    }

    /// Bid-ask spread as a percentage of the mid price.
    pub fn spread_pct(&self) -> Option<f64> {
        let bid = self.best_bid()?.price;
        let ask = self.best_ask()?.price;
        let mid = (bid + ask) / 2.0;
        if mid > 0.0 {
            Some((ask - bid) / mid * 100.0)
        } else {
            None
        }
    }

    /// Bid levels whose notional exceeds the wall threshold, nearest first.
    pub fn bid_walls(&self) -> Vec<BookLevel> {
        let threshold = wall_threshold();
        self.bids
            .iter()
            .copied()
            .filter(|level| level.notional() >= threshold)
            .collect()
    }

    /// Ask levels whose notional exceeds the wall threshold, nearest first.
    pub fn ask_walls(&self) -> Vec<BookLevel> {
        let threshold = wall_threshold();
        self.asks
            .iter()
            .copied()
            .filter(|level| level.notional() >= threshold)
            .collect()
    }
}

/// Per-instrument cache of the latest deep snapshot and fast partial-depth
/// levels, reconciled on every update from either source.
#[derive(Debug, Clone, Default)]
pub struct DepthCache {
    deep_bids: Vec<BookLevel>,
    deep_asks: Vec<BookLevel>,
    snapshot_id: u64,
    fast_bids: Vec<BookLevel>,
    fast_asks: Vec<BookLevel>,
    update_id: u64,
}

fn sort_side(levels: &mut Vec<BookLevel>, side: BookSide) {
    levels.retain(|level| level.quantity > 0.0);
    match side {
        BookSide::Bids => levels.sort_by(|a, b| b.price.total_cmp(&a.price)),
        BookSide::Asks => levels.sort_by(|a, b| a.price.total_cmp(&b.price)),
    }
    levels.dedup_by(|a, b| a.price == b.price);
}

impl DepthCache {
    /// Replace the deep cache with a fresh snapshot.
    ///
    /// Snapshots arriving out of order (stale `snapshot_id`) are ignored; the
    /// previous cache remains authoritative.
    pub fn apply_snapshot(
        &mut self,
        mut bids: Vec<BookLevel>,
        mut asks: Vec<BookLevel>,
        snapshot_id: u64,
    ) -> bool {
        if snapshot_id <= self.snapshot_id && self.snapshot_id != 0 {
            return false;
        }
        sort_side(&mut bids, BookSide::Bids);
        sort_side(&mut asks, BookSide::Asks);
        self.deep_bids = bids;
        self.deep_asks = asks;
        self.snapshot_id = snapshot_id;
        true
    }

    /// Apply a fast partial-depth push.
    ///
    /// An empty level array means "no new data for that side this tick" and
    /// never erases the current fast-side cache. Deltas arriving out of order
    /// (stale `update_id`) are ignored, as with snapshots.
    pub fn apply_delta(
        &mut self,
        mut bid_updates: Vec<BookLevel>,
        mut ask_updates: Vec<BookLevel>,
        update_id: u64,
    ) {
        if update_id <= self.update_id && self.update_id != 0 {
            return;
        }
        if !bid_updates.is_empty() {
            sort_side(&mut bid_updates, BookSide::Bids);
            self.fast_bids = bid_updates;
        }
        if !ask_updates.is_empty() {
            sort_side(&mut ask_updates, BookSide::Asks);
            self.fast_asks = ask_updates;
        }
        self.update_id = update_id;
    }

    /// Reconcile the cached deep and fast levels into a fully-formed book.
    pub fn reconcile(&self) -> ReconciledBook {
        ReconciledBook {
            bids: merge(&self.deep_bids, &self.fast_bids, BookSide::Bids),
            asks: merge(&self.deep_asks, &self.fast_asks, BookSide::Asks),
            sequence_id: self.snapshot_id,
        }
    }
}
