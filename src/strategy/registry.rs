//! Name to strategy lookup

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::indicators::{HoldStrategy, SmaCrossStrategy};
use super::traits::BoxedStrategy;
use crate::common::types::Bar;

/// Strategies available to portfolio configurations, keyed by name
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, BoxedStrategy>,
}

impl StrategyRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `hold` and `sma_cross`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HoldStrategy));
        registry.register(Box::new(SmaCrossStrategy::default()));
        registry
    }

    /// Add a strategy, replacing any previous one with the same name
    pub fn register(&mut self, strategy: BoxedStrategy) {
        self.strategies.insert(strategy.name().to_string(), strategy);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Latest signal of the named strategy, `None` when unknown or undecided
    pub fn signal(&self, name: &str, bars: &[Bar]) -> Option<Decimal> {
        self.strategies.get(name)?.compute(bars)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::traits::SignalStrategy;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct Fixed;

    impl SignalStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn compute(&self, _bars: &[Bar]) -> Option<Decimal> {
            Some(dec!(0.3))
        }
    }

    fn one_bar() -> Vec<Bar> {
        vec![Bar {
            date: Utc::now(),
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
        }]
    }

    #[test]
    fn test_builtins() {
        let registry = StrategyRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["hold", "sma_cross"]);
        assert_eq!(registry.signal("hold", &one_bar()), Some(Decimal::ONE));
    }

    #[test]
    fn test_unknown_strategy_has_no_signal() {
        let registry = StrategyRegistry::with_builtins();
        assert!(!registry.contains("moon"));
        assert_eq!(registry.signal("moon", &one_bar()), None);
    }

    #[test]
    fn test_register_custom() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(Fixed));
        assert_eq!(registry.signal("fixed", &[]), Some(dec!(0.3)));
    }
}
