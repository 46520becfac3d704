//! Portfolio rebalancing
//!
//! [`PortfolioOrchestrator`] loads the active users and runs one task per
//! user. Each task captures a [`PortfolioSnapshot`] and hands every
//! configured market to the [`RebalanceEngine`], which decides between
//! hold, buy and sell and sizes orders with the functions in [`quantity`].

pub mod decision;
pub mod engine;
pub mod orchestrator;
pub mod quantity;
pub mod snapshot;

pub use decision::{decide, Anomaly, CycleState, Decision, MarketOutcome, MarketReport};
pub use engine::RebalanceEngine;
pub use orchestrator::{CycleReport, PortfolioOrchestrator, SnapshotReport, UserOutcome, UserReport};
pub use snapshot::{AssetPosition, PortfolioSnapshot};
