use rust_decimal::Decimal;

use crate::common::types::Bar;

/// Signal strategy trait
///
/// Strategies turn a history of bars into a signal, the fraction of a
/// market's target weight that should currently be held.
///
/// # Implementation Notes
///
/// - `compute` is pure and synchronous, no I/O
/// - Bars arrive in ascending date order
/// - The returned value is the signal for the most recent bar
///
/// # Example
///
/// ```ignore
/// struct AlwaysHalf;
///
/// impl SignalStrategy for AlwaysHalf {
///     fn name(&self) -> &str { "always_half" }
///
///     fn compute(&self, bars: &[Bar]) -> Option<Decimal> {
///         bars.last().map(|_| dec!(0.5))
///     }
/// }
/// ```
pub trait SignalStrategy: Send + Sync {
    /// Name used in portfolio configurations
    fn name(&self) -> &str;

    /// Signal for the latest bar
    ///
    /// # Returns
    /// * `None` - Not enough data to produce a signal
    /// * `Some(signal)` - Usually within `[0, 1]`
    fn compute(&self, bars: &[Bar]) -> Option<Decimal>;
}

/// Boxed strategy for dynamic dispatch
pub type BoxedStrategy = Box<dyn SignalStrategy>;
