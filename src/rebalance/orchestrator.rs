//! Per-user cycle driver

use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::decision::MarketReport;
use super::engine::RebalanceEngine;
use super::snapshot::PortfolioSnapshot;
use crate::common::errors::{RebalanceError, RebalanceResult};
use crate::common::traits::{CredentialStore, ExchangeAdapter, Notifier, Persistence};
use crate::common::types::{
    AccountConnection, ActiveUser, BalanceSnapshot, ExchangeKind, Notification,
};
use crate::config::types::RebalanceSettings;
use crate::exchanges::AdapterFactory;
use crate::notify::json_to_html;
use crate::strategy::StrategyRegistry;

/// How one user's cycle ended
#[derive(Debug, Clone, PartialEq)]
pub enum UserOutcome {
    /// Every configured market went through the engine
    Completed(Vec<MarketReport>),
    /// Spot trading is disabled for the API key
    ApiInactive,
    /// Account value is below the configured minimum
    InsufficientBalance { balance: Decimal, minimum: Decimal },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserReport {
    pub user_id: i64,
    pub email: String,
    pub exchange_name: String,
    pub outcome: UserOutcome,
}

/// Result of one scheduled run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub users: Vec<UserReport>,
}

impl CycleReport {
    /// Orders placed across all users
    pub fn orders_placed(&self) -> usize {
        self.users
            .iter()
            .filter_map(|u| match &u.outcome {
                UserOutcome::Completed(markets) => Some(markets),
                _ => None,
            })
            .flatten()
            .filter(|m| m.outcome.is_order())
            .count()
    }

    pub fn failed_users(&self) -> usize {
        self.users
            .iter()
            .filter(|u| matches!(u.outcome, UserOutcome::Failed(_)))
            .count()
    }
}

/// Result of the balance-history routine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotReport {
    pub saved: usize,
    pub failed: usize,
}

/// Fans the cycle out over active users
///
/// Each user runs in its own task. Users share only the immutable
/// collaborators held here.
#[derive(Clone)]
pub struct PortfolioOrchestrator {
    persistence: Arc<dyn Persistence>,
    credentials: Arc<dyn CredentialStore>,
    factory: Arc<dyn AdapterFactory>,
    notifier: Arc<dyn Notifier>,
    strategies: Arc<StrategyRegistry>,
    settings: Arc<RebalanceSettings>,
}

impl PortfolioOrchestrator {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        credentials: Arc<dyn CredentialStore>,
        factory: Arc<dyn AdapterFactory>,
        notifier: Arc<dyn Notifier>,
        strategies: Arc<StrategyRegistry>,
        settings: Arc<RebalanceSettings>,
    ) -> Self {
        Self {
            persistence,
            credentials,
            factory,
            notifier,
            strategies,
            settings,
        }
    }

    /// Run one rebalancing cycle over every active user
    pub async fn run_cycle(&self) -> RebalanceResult<CycleReport> {
        let users = self.persistence.load_active_users().await?;
        info!(
            "Starting cycle for {} users (dry run: {})",
            users.len(),
            self.settings.dry_run
        );

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_users.max(1)));
        let mut tasks = JoinSet::new();

        for user in users {
            let orchestrator = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = orchestrator.process_user(&user).await;
                UserReport {
                    user_id: user.user_id,
                    email: user.email,
                    exchange_name: user.exchange_name,
                    outcome,
                }
            });
        }

        let mut report = CycleReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(user_report) => report.users.push(user_report),
                Err(e) => error!("User task aborted: {}", e),
            }
        }
        report.users.sort_by_key(|u| u.user_id);

        info!(
            "Cycle finished: {} users, {} orders, {} failures",
            report.users.len(),
            report.orders_placed(),
            report.failed_users()
        );
        Ok(report)
    }

    #[instrument(skip(self, user), fields(user_id = user.user_id, exchange = %user.exchange_name))]
    async fn process_user(&self, user: &ActiveUser) -> UserOutcome {
        match self.rebalance_user(user).await {
            Ok(outcome) => outcome,
            Err(RebalanceError::InsufficientBalance { balance, minimum }) => {
                UserOutcome::InsufficientBalance { balance, minimum }
            }
            Err(RebalanceError::Auth(reason)) => {
                warn!("Skipping user {}: {}", user.user_id, reason);
                UserOutcome::ApiInactive
            }
            Err(e) => {
                error!("Cycle failed for user {}: {}", user.user_id, e);
                UserOutcome::Failed(e.to_string())
            }
        }
    }

    async fn rebalance_user(&self, user: &ActiveUser) -> RebalanceResult<UserOutcome> {
        let exchange = self.connect(&user.exchange_name, &user.credentials)?;

        self.ensure_trading_enabled(user, exchange.as_ref()).await?;

        let balance = exchange.get_balance_in_usd().await?;
        if balance < self.settings.min_balance_usd {
            info!(
                "Balance {} below the minimum of {}",
                balance, self.settings.min_balance_usd
            );
            self.notify_quietly(Notification::user(
                user.email.as_str(),
                "Portfolio not rebalanced",
                format!(
                    "Your {} account holds {} USD, below the {} USD needed for rebalancing.",
                    exchange.kind(),
                    balance.round_dp(2),
                    self.settings.min_balance_usd
                ),
            ))
            .await;
            return Err(RebalanceError::InsufficientBalance {
                balance,
                minimum: self.settings.min_balance_usd,
            });
        }

        let configs = self
            .persistence
            .load_portfolio_configs(user.user_id, exchange.kind().as_str())
            .await?;
        let configs: Vec<_> = configs.into_iter().filter(|c| c.active).collect();
        if configs.is_empty() {
            info!("No active portfolio configuration");
            return Ok(UserOutcome::Completed(Vec::new()));
        }

        let snapshot =
            PortfolioSnapshot::capture(exchange.as_ref(), &configs, &exchange.quote_asset())
                .await?;
        info!(
            "Portfolio worth {} over {} markets",
            snapshot.worth.round_dp(2),
            configs.len()
        );

        let engine = RebalanceEngine::new(
            exchange,
            Arc::clone(&self.persistence),
            Arc::clone(&self.notifier),
            Arc::clone(&self.strategies),
            Arc::clone(&self.settings),
        );
        let reports = engine.run_markets(user, &configs, &snapshot).await?;
        Ok(UserOutcome::Completed(reports))
    }

    /// Decrypt credentials and build the adapter for one account
    fn connect(
        &self,
        exchange_name: &str,
        blob: &str,
    ) -> RebalanceResult<Arc<dyn ExchangeAdapter>> {
        let kind = ExchangeKind::from_str(exchange_name)?;
        let credentials = self.credentials.decrypt(blob)?;
        Ok(self.factory.create(kind, &credentials)?)
    }

    async fn ensure_trading_enabled(
        &self,
        user: &ActiveUser,
        exchange: &dyn ExchangeAdapter,
    ) -> RebalanceResult<()> {
        let reason = match exchange.is_spot_trading_enabled().await {
            Ok(true) => return Ok(()),
            Ok(false) => "spot trading is not enabled".to_string(),
            Err(e) => format!("permission check failed: {}", e),
        };

        let key_info = match exchange.get_api_key_information().await {
            Ok(info) => info,
            Err(e) => serde_json::Value::String(format!("unavailable ({})", e)),
        };
        let notification = Notification::admin(
            format!("API key inactive for user {}", user.user_id),
            format!(
                "User {} ({}) on {}: {}.\nAPI key information: {}",
                user.user_id,
                user.email,
                exchange.kind(),
                reason,
                serde_json::to_string_pretty(&key_info).unwrap_or_default()
            ),
        )
        .with_html(json_to_html(&key_info));
        self.notify_quietly(notification).await;
        Err(RebalanceError::Auth(reason))
    }

    /// Record the current balance of every connected account
    pub async fn snapshot_balances(&self) -> RebalanceResult<SnapshotReport> {
        let connections = self.persistence.load_account_connections().await?;
        let mut report = SnapshotReport::default();

        for connection in &connections {
            match self.snapshot_connection(connection).await {
                Ok(()) => report.saved += 1,
                Err(e) => {
                    warn!(
                        "Balance snapshot failed for connection {} ({}): {}",
                        connection.account_connection_id, connection.email, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Balance snapshots: {} saved, {} failed",
            report.saved, report.failed
        );
        Ok(report)
    }

    async fn snapshot_connection(&self, connection: &AccountConnection) -> RebalanceResult<()> {
        let exchange = self.connect(&connection.exchange_name, &connection.credentials)?;
        let assets = exchange.get_balance_assets().await?;
        let balance_usd = exchange.get_balance_in_usd().await?;

        self.persistence
            .save_balance_snapshot(&BalanceSnapshot {
                account_connection_id: connection.account_connection_id,
                datetime: Utc::now(),
                balance_usd,
                assets,
            })
            .await
    }

    async fn notify_quietly(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Notification '{}' not delivered: {}", notification.subject, e);
        }
    }
}
