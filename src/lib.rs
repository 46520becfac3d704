//! Portfolio Rebalancer Library
//!
//! Rebalances spot portfolios on Binance, Bybit and KuCoin towards
//! signal-weighted targets. Exchange differences stay behind
//! [`ExchangeAdapter`]; the decision logic lives in [`rebalance`].

pub mod common;
pub mod config;
pub mod credentials;
pub mod exchanges;
pub mod notify;
pub mod rebalance;
pub mod storage;
pub mod strategy;

// Re-export commonly used types
pub use common::errors::{ExchangeError, RebalanceError, RebalanceResult, Result};
pub use common::traits::{CredentialStore, ExchangeAdapter, Notifier, Persistence};
pub use common::types::{
    AccountConnection, ActiveUser, AssetBalance, BalanceSnapshot, Bar, Credentials,
    EnrichedOrder, ExchangeKind, Market, Notification, OrderRequest, OrderResult, OrderType,
    PortfolioConfig, Side, TimeInForce,
};
pub use config::types::{AppConfig, InsufficientFundsPolicy, RebalanceSettings};
pub use credentials::{FernetCredentialStore, JsonCredentialStore};
pub use exchanges::{AdapterFactory, BinanceClient, BybitClient, KucoinClient, LiveAdapterFactory};
pub use notify::{LogNotifier, WebhookNotifier};
pub use rebalance::{
    CycleReport, MarketOutcome, MarketReport, PortfolioOrchestrator, PortfolioSnapshot,
    RebalanceEngine, SnapshotReport, UserOutcome,
};
pub use storage::PgStore;

// Strategy types
pub use strategy::{BoxedStrategy, SignalStrategy, StrategyRegistry};
