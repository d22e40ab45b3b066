//! Market context classification.
//!
//! A pure, read-only combination of derived state into a small enum-valued
//! summary: regime, volatility, positioning, execution quality, and level
//! interaction. Recomputed on demand (periodic summary or ad hoc) and never
//! mutates engine state.

/// Inputs gathered from the instrument's derived state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInputs {
    pub price: f64,
    pub ema_21: Option<f64>,
    pub ema_50: Option<f64>,
    /// ATR / ATR-SMA expansion ratio
    pub atr_ratio: Option<f64>,
    /// Open interest change over the trailing 15 minutes, in percent
    pub oi_change_15m_pct: Option<f64>,
    /// Bid-ask spread as a percentage of price
    pub spread_pct: Option<f64>,
    /// Nearest bid wall price, if any
    pub nearest_bid_wall: Option<f64>,
    /// Nearest ask wall price, if any
    pub nearest_ask_wall: Option<f64>,
    pub poc: Option<f64>,
    pub vwap: Option<f64>,
    /// Short-term price change as a fraction (positive = drifting up)
    pub micro_trend: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    Uptrend,
    Downtrend,
    Range,
}

impl Regime {
    pub fn label(&self) -> &'static str {
        match self {
            Regime::Uptrend => "UPTREND",
            Regime::Downtrend => "DOWNTREND",
            Regime::Range => "RANGE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendStrength {
    Strong,
    Weak,
}

impl TrendStrength {
    pub fn label(&self) -> &'static str {
        match self {
            TrendStrength::Strong => "STRONG",
            TrendStrength::Weak => "WEAK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Volatility {
    /// Ratio < 0.75: compression, high breakout risk
    Compacting,
    #[default]
    Normal,
    /// Ratio > 1.25: expansion
    Expansion,
}

impl Volatility {
    pub fn label(&self) -> &'static str {
        match self {
            Volatility::Compacting => "COMPACTING",
            Volatility::Normal => "NORMAL",
            Volatility::Expansion => "EXPANSION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Positioning {
    ActiveLongBuilding,
    ActiveShortBuilding,
    ShortCoveringRally,
    LongLiquidations,
    #[default]
    Insignificant,
}

impl Positioning {
    pub fn label(&self) -> &'static str {
        match self {
            Positioning::ActiveLongBuilding => "ACTIVE LONG BUILDING",
            Positioning::ActiveShortBuilding => "ACTIVE SHORT BUILDING",
            Positioning::ShortCoveringRally => "SHORT-COVERING RALLY",
            Positioning::LongLiquidations => "LONG LIQUIDATIONS",
            Positioning::Insignificant => "FLAT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpreadQuality {
    Tight,
    Good,
    Poor,
    #[default]
    Unknown,
}

impl SpreadQuality {
    pub fn label(&self) -> &'static str {
        match self {
            SpreadQuality::Tight => "TIGHT",
            SpreadQuality::Good => "GOOD",
            SpreadQuality::Poor => "POOR",
            SpreadQuality::Unknown => "UNKNOWN",
        }
    }
}

/// Execution conditions: spread quality plus distance to the nearest walls.
#[derive(Debug, Clone, Copy, Default)]
pub struct Execution {
    pub spread: SpreadQuality,
    /// Distance to the nearest bid wall as a percentage of price
    pub bid_wall_distance_pct: Option<f64>,
    /// Distance to the nearest ask wall as a percentage of price
    pub ask_wall_distance_pct: Option<f64>,
}

/// Reference levels considered by the level-interaction classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    SupportWall,
    ResistanceWall,
    Poc,
    Vwap,
}

impl LevelKind {
    pub fn label(&self) -> &'static str {
        match self {
            LevelKind::SupportWall => "SUPPORT WALL",
            LevelKind::ResistanceWall => "RESISTANCE WALL",
            LevelKind::Poc => "POC",
            LevelKind::Vwap => "VWAP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelInteraction {
    /// Within 0.05% of the level
    Testing { kind: LevelKind, level: f64 },
    /// 0.05%-0.2% away, drifting toward the level
    Approaching { kind: LevelKind, level: f64 },
    /// 0.05%-0.2% away, drifting away from the level
    Rejecting { kind: LevelKind, level: f64 },
    /// No qualifying level within 0.2%
    InVacuum,
}

impl LevelInteraction {
    pub fn label(&self) -> &'static str {
        match self {
            LevelInteraction::Testing { .. } => "TESTING",
            LevelInteraction::Approaching { .. } => "APPROACHING",
            LevelInteraction::Rejecting { .. } => "REJECTING",
            LevelInteraction::InVacuum => "IN VACUUM",
        }
    }
}

/// The full classified context.
#[derive(Debug, Clone, Copy)]
pub struct MarketContext {
    pub regime: Regime,
    pub strength: TrendStrength,
    pub volatility: Volatility,
    pub positioning: Positioning,
    pub execution: Execution,
    pub level_interaction: LevelInteraction,
}

impl MarketContext {
    pub fn summary(&self) -> String {
        format!(
            "{} ({}) | vol {} | {} | spread {} | {}",
            self.regime.label(),
            self.strength.label(),
            self.volatility.label(),
            self.positioning.label(),
            self.execution.spread.label(),
            self.level_interaction.label(),
        )
    }
}

/// Classify the full market context from the gathered inputs.
pub fn classify(inputs: &ContextInputs) -> MarketContext {
    MarketContext {
        regime: classify_regime(inputs),
        strength: classify_strength(inputs),
        volatility: classify_volatility(inputs.atr_ratio),
        positioning: classify_positioning(inputs),
        execution: classify_execution(inputs),
        level_interaction: classify_level_interaction(inputs),
    }
}

fn classify_regime(inputs: &ContextInputs) -> Regime {
    match (inputs.ema_21, inputs.ema_50) {
        (Some(ema_21), Some(ema_50)) => {
            if inputs.price > ema_21 && ema_21 > ema_50 {
                Regime::Uptrend
            } else if inputs.price < ema_21 && ema_21 < ema_50 {
                Regime::Downtrend
            } else {
                Regime::Range
            }
        }
        _ => Regime::Range,
    }
}

fn classify_strength(inputs: &ContextInputs) -> TrendStrength {
    match (inputs.ema_21, inputs.ema_50) {
        (Some(ema_21), Some(ema_50)) if ema_50 > 0.0 => {
            if ((ema_21 - ema_50) / ema_50).abs() * 100.0 > 0.15 {
                TrendStrength::Strong
            } else {
                TrendStrength::Weak
            }
        }
        _ => TrendStrength::Weak,
    }
}

fn classify_volatility(atr_ratio: Option<f64>) -> Volatility {
    match atr_ratio {
        Some(ratio) if ratio < 0.75 => Volatility::Compacting,
        Some(ratio) if ratio > 1.25 => Volatility::Expansion,
        Some(_) => Volatility::Normal,
        None => Volatility::Normal,
    }
}

fn classify_positioning(inputs: &ContextInputs) -> Positioning {
    let (oi_change, ema_21) = match (inputs.oi_change_15m_pct, inputs.ema_21) {
        (Some(oi), Some(ema)) => (oi, ema),
        _ => return Positioning::Insignificant,
    };
    if oi_change.abs() <= 0.5 {
        return Positioning::Insignificant;
    }
    let price_up = inputs.price >= ema_21;
    match (oi_change > 0.0, price_up) {
        (true, true) => Positioning::ActiveLongBuilding,
        (true, false) => Positioning::ActiveShortBuilding,
        (false, true) => Positioning::ShortCoveringRally,
        (false, false) => Positioning::LongLiquidations,
    }
}

fn classify_execution(inputs: &ContextInputs) -> Execution {
    let spread = match inputs.spread_pct {
        Some(pct) if pct < 0.01 => SpreadQuality::Tight,
        Some(pct) if pct > 0.05 => SpreadQuality::Poor,
        Some(_) => SpreadQuality::Good,
        None => SpreadQuality::Unknown,
    };
    let distance = |level: Option<f64>| {
        level.and_then(|l| {
            if inputs.price > 0.0 {
                Some((inputs.price - l).abs() / inputs.price * 100.0)
            } else {
                None
            }
        })
    };
    Execution {
        spread,
        bid_wall_distance_pct: distance(inputs.nearest_bid_wall),
        ask_wall_distance_pct: distance(inputs.nearest_ask_wall),
    }
}

/// Among the nearest support/resistance wall, POC, and VWAP, pick the nearest
/// level within 0.2% of price. The source only checked the most recently
/// iterated qualifying level; this always classifies against the nearest.
fn classify_level_interaction(inputs: &ContextInputs) -> LevelInteraction {
    if inputs.price <= 0.0 {
        return LevelInteraction::InVacuum;
    }

    let candidates = [
        (LevelKind::SupportWall, inputs.nearest_bid_wall),
        (LevelKind::ResistanceWall, inputs.nearest_ask_wall),
        (LevelKind::Poc, inputs.poc),
        (LevelKind::Vwap, inputs.vwap),
    ];

    let mut nearest: Option<(LevelKind, f64, f64)> = None;
    for (kind, level) in candidates {
        let Some(level) = level else { continue };
        let distance_pct = (inputs.price - level).abs() / inputs.price * 100.0;
        if distance_pct > 0.2 {
            continue;
        }
        if nearest.map_or(true, |(_, _, best)| distance_pct < best) {
            nearest = Some((kind, level, distance_pct));
        }
    }

    let Some((kind, level, distance_pct)) = nearest else {
        return LevelInteraction::InVacuum;
    };

    if distance_pct <= 0.05 {
        return LevelInteraction::Testing { kind, level };
    }

    // 0.05%-0.2% band: direction of the short-term drift relative to the
    // level's position decides approaching vs rejecting.
    let trend = inputs.micro_trend.unwrap_or(0.0);
    let level_above = level > inputs.price;
    let toward = (level_above && trend > 0.0) || (!level_above && trend < 0.0);
    if toward {
        LevelInteraction::Approaching { kind, level }
    } else {
        LevelInteraction::Rejecting { kind, level }
    }
}
