//! Signal strategies feeding the rebalance engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  ExchangeAdapter.get_ohlcv(market, timeframe)               │
//! │       │  bars, ascending                                    │
//! │       ▼                                                     │
//! │  StrategyRegistry.signal(config.strategy, bars)             │
//! │       │  Option<Decimal>                                    │
//! │       ▼                                                     │
//! │  RebalanceEngine: target = signal * weight                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`SignalStrategy`]: Trait for implementing strategies
//! - [`StrategyRegistry`]: Lookup by the name stored in a portfolio configuration
//! - [`HoldStrategy`], [`SmaCrossStrategy`]: Built-ins

mod indicators;
mod registry;
mod traits;

pub use indicators::{sma, HoldStrategy, SmaCrossStrategy};
pub use registry::StrategyRegistry;
pub use traits::{BoxedStrategy, SignalStrategy};
