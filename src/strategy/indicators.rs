//! Indicators and the built-in strategies built on them

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::traits::SignalStrategy;
use crate::common::types::Bar;

/// Simple moving average of the last `period` closes
pub fn sma(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let sum: Decimal = bars[bars.len() - period..].iter().map(|b| b.close).sum();
    Some(sum / Decimal::from(period))
}

/// Holds the full target weight whenever data exists
#[derive(Debug, Clone, Default)]
pub struct HoldStrategy;

impl SignalStrategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }

    fn compute(&self, bars: &[Bar]) -> Option<Decimal> {
        bars.last().map(|_| Decimal::ONE)
    }
}

/// Fully invested while the fast SMA is above the slow SMA, else flat
#[derive(Debug, Clone)]
pub struct SmaCrossStrategy {
    fast: usize,
    slow: usize,
}

impl SmaCrossStrategy {
    pub fn new(fast: usize, slow: usize) -> Self {
        Self { fast, slow }
    }
}

impl Default for SmaCrossStrategy {
    fn default() -> Self {
        Self::new(20, 50)
    }
}

impl SignalStrategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn compute(&self, bars: &[Bar]) -> Option<Decimal> {
        let fast = sma(bars, self.fast)?;
        let slow = sma(bars, self.slow)?;
        Some(if fast > slow { Decimal::ONE } else { dec!(0) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bars(closes: &[i64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| Bar {
                date: start + Duration::days(i as i64),
                open: Decimal::from(*c),
                high: Decimal::from(*c),
                low: Decimal::from(*c),
                close: Decimal::from(*c),
                volume: Decimal::ONE,
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let data = bars(&[1, 2, 3, 4]);
        assert_eq!(sma(&data, 2), Some(dec!(3.5)));
        assert_eq!(sma(&data, 4), Some(dec!(2.5)));
        assert_eq!(sma(&data, 5), None);
        assert_eq!(sma(&data, 0), None);
    }

    #[test]
    fn test_hold_needs_data() {
        assert_eq!(HoldStrategy.compute(&[]), None);
        assert_eq!(HoldStrategy.compute(&bars(&[5])), Some(Decimal::ONE));
    }

    #[test]
    fn test_sma_cross_signal() {
        let strategy = SmaCrossStrategy::new(2, 4);
        assert_eq!(strategy.compute(&bars(&[1, 2, 3, 4])), Some(Decimal::ONE));
        assert_eq!(strategy.compute(&bars(&[4, 3, 2, 1])), Some(Decimal::ZERO));
        assert_eq!(strategy.compute(&bars(&[1, 2, 3])), None);
    }
}
