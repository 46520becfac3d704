//! Per-market decision state machine and outcomes

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::common::types::{EnrichedOrder, Market, Side};

/// Lifecycle of one market within a user's cycle
///
/// `Start → SignalFetched → Sized → {Hold | BuyPending | SellPending}
/// → {OrderPlaced | OrderFailed} → Reported`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CycleState {
    Start,
    SignalFetched,
    Sized,
    Hold,
    BuyPending,
    SellPending,
    OrderPlaced,
    OrderFailed,
    Reported,
}

impl CycleState {
    /// Whether `next` may follow `self`
    ///
    /// Any state but `Reported` may close with `Reported`, which is how
    /// skipped markets end.
    pub fn can_transition_to(self, next: CycleState) -> bool {
        use CycleState::*;
        if next == Reported {
            return self != Reported;
        }
        matches!(
            (self, next),
            (Start, SignalFetched)
                | (SignalFetched, Sized)
                | (Sized, Hold)
                | (Sized, BuyPending)
                | (Sized, SellPending)
                | (BuyPending, OrderPlaced)
                | (BuyPending, OrderFailed)
                | (SellPending, OrderPlaced)
                | (SellPending, OrderFailed)
        )
    }
}

/// Direction decided for a market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Hold,
    Buy,
    Sell,
}

impl Decision {
    pub fn side(self) -> Option<Side> {
        match self {
            Decision::Hold => None,
            Decision::Buy => Some(Side::Buy),
            Decision::Sell => Some(Side::Sell),
        }
    }

    pub fn pending_state(self) -> CycleState {
        match self {
            Decision::Hold => CycleState::Hold,
            Decision::Buy => CycleState::BuyPending,
            Decision::Sell => CycleState::SellPending,
        }
    }
}

/// Non-fatal condition that makes the engine skip a market
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Anomaly {
    /// The asset already exceeds the whole (capped) portfolio
    AnomalousSizing { relative_size: Decimal },
    /// Free quote balance is below what the BUY needs
    InsufficientFunds { required: Decimal, available: Decimal },
    /// No signal could be produced for the market
    SignalUnavailable { reason: String },
    /// Price, step or balance lookups failed while sizing
    SizingFailed { reason: String },
    /// Quantity is zero or below the minimum notional
    OrderTooSmall { quantity: Decimal, notional: Decimal, min_notional: Decimal },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Anomaly::AnomalousSizing { relative_size } => {
                write!(f, "relative size {} exceeds the portfolio", relative_size)
            }
            Anomaly::InsufficientFunds { required, available } => {
                write!(f, "needs {} of quote balance, {} available", required, available)
            }
            Anomaly::SignalUnavailable { reason } => write!(f, "signal unavailable: {}", reason),
            Anomaly::SizingFailed { reason } => write!(f, "sizing failed: {}", reason),
            Anomaly::OrderTooSmall {
                quantity,
                notional,
                min_notional,
            } => write!(
                f,
                "order of {} ({} notional) is below the minimum of {}",
                quantity, notional, min_notional
            ),
        }
    }
}

/// Decide what to do with one market
///
/// Relative sizes that round (two decimals, half to even) above 1 are
/// anomalous. A distance to target equal to the tolerance still holds.
pub fn decide(
    relative_size: Decimal,
    signal: Decimal,
    weight: Decimal,
    tolerance: Decimal,
) -> Result<Decision, Anomaly> {
    let rounded = relative_size.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    if rounded > Decimal::ONE {
        return Err(Anomaly::AnomalousSizing { relative_size });
    }

    let target = signal * weight;
    if (relative_size - target).abs() <= tolerance {
        Ok(Decision::Hold)
    } else if target > relative_size {
        Ok(Decision::Buy)
    } else {
        Ok(Decision::Sell)
    }
}

/// Final outcome of one market
#[derive(Debug, Clone, PartialEq)]
pub enum MarketOutcome {
    Hold,
    Skipped(Anomaly),
    DryRun { side: Side, quantity: Decimal },
    OrderPlaced(Box<EnrichedOrder>),
    OrderFailed { side: Side, quantity: Decimal, error: String },
}

impl MarketOutcome {
    pub fn is_order(&self) -> bool {
        matches!(self, MarketOutcome::OrderPlaced(_))
    }
}

/// What happened to one configured market
#[derive(Debug, Clone, PartialEq)]
pub struct MarketReport {
    pub portfolio_config_id: i64,
    pub market: Market,
    pub signal: Option<Decimal>,
    pub relative_size: Option<Decimal>,
    pub outcome: MarketOutcome,
    /// States visited, in order
    pub states: Vec<CycleState>,
}

impl MarketReport {
    pub fn new(portfolio_config_id: i64, market: Market) -> Self {
        Self {
            portfolio_config_id,
            market,
            signal: None,
            relative_size: None,
            outcome: MarketOutcome::Hold,
            states: vec![CycleState::Start],
        }
    }

    /// Record a state change
    pub fn advance(&mut self, next: CycleState) {
        if let Some(current) = self.states.last().copied() {
            debug_assert!(
                current.can_transition_to(next),
                "illegal transition {:?} -> {:?}",
                current,
                next
            );
        }
        self.states.push(next);
    }

    pub fn state(&self) -> CycleState {
        self.states.last().copied().unwrap_or(CycleState::Start)
    }

    /// Close the report with an outcome
    pub fn finish(mut self, outcome: MarketOutcome) -> Self {
        self.outcome = outcome;
        self.advance(CycleState::Reported);
        self
    }

    /// Close the report with a skip
    pub fn skip(self, anomaly: Anomaly) -> Self {
        self.finish(MarketOutcome::Skipped(anomaly))
    }
}
