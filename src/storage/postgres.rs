//! Postgres-backed persistence

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::common::errors::RebalanceResult;
use crate::common::traits::Persistence;
use crate::common::types::{
    AccountConnection, ActiveUser, BalanceSnapshot, EnrichedOrder, PortfolioConfig,
};
use crate::config::types::DatabaseConfig;

const ACTIVE_USERS: &str = r#"
    SELECT u.id AS user_id,
           u.email,
           ac.id AS account_connection_id,
           ac.credentials,
           e.name AS exchange_name,
           COALESCE(u.order_notification, false) AS order_notification
    FROM portfolios p
    JOIN account_connections ac ON p.account_connection_id = ac.id
    JOIN users u ON ac.user_id = u.id
    JOIN exchanges e ON ac.exchange_id = e.id
    WHERE p.active = true
"#;

const PORTFOLIO_CONFIGS: &str = r#"
    SELECT pc.id AS portfolio_config_id,
           m.base,
           m.quote,
           pc.weight,
           s.name AS strategy,
           pc.active
    FROM portfolio_configs pc
    JOIN portfolios p ON pc.portfolio_id = p.id
    JOIN account_connections ac ON p.account_connection_id = ac.id
    JOIN users u ON ac.user_id = u.id
    JOIN markets m ON pc.market_id = m.id
    JOIN exchanges e ON m.exchange_id = e.id
    JOIN strategies s ON pc.strategy_id = s.id
    WHERE pc.active = true AND u.id = $1 AND lower(e.name) = lower($2)
    ORDER BY pc.id
"#;

const ACCOUNT_CONNECTIONS: &str = r#"
    SELECT ac.id AS account_connection_id,
           u.email,
           e.name AS exchange_name,
           ac.credentials
    FROM account_connections ac
    JOIN users u ON ac.user_id = u.id
    JOIN exchanges e ON ac.exchange_id = e.id
"#;

const INSERT_ORDER: &str = r#"
    INSERT INTO orders (
        portfolio_config_id, exchange, exchange_order_id, datetime, market, side,
        signal, type, quantity, quote_quantity, fee, balance, price, original_data
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
"#;

const INSERT_BALANCE: &str = r#"
    INSERT INTO balance_history (account_connection_id, datetime, balance_usd, assets)
    VALUES ($1, $2, $3, $4)
"#;

#[derive(Debug, FromRow)]
struct ActiveUserRow {
    user_id: i64,
    email: String,
    account_connection_id: i64,
    credentials: String,
    exchange_name: String,
    order_notification: bool,
}

impl From<ActiveUserRow> for ActiveUser {
    fn from(row: ActiveUserRow) -> Self {
        Self {
            user_id: row.user_id,
            email: row.email,
            account_connection_id: row.account_connection_id,
            exchange_name: row.exchange_name,
            credentials: row.credentials,
            order_notification: row.order_notification,
        }
    }
}

#[derive(Debug, FromRow)]
struct PortfolioConfigRow {
    portfolio_config_id: i64,
    base: String,
    quote: String,
    weight: Decimal,
    strategy: String,
    active: bool,
}

impl From<PortfolioConfigRow> for PortfolioConfig {
    fn from(row: PortfolioConfigRow) -> Self {
        Self {
            portfolio_config_id: row.portfolio_config_id,
            base: row.base.to_uppercase(),
            quote: row.quote.to_uppercase(),
            weight: row.weight,
            strategy: row.strategy,
            active: row.active,
        }
    }
}

#[derive(Debug, FromRow)]
struct AccountConnectionRow {
    account_connection_id: i64,
    email: String,
    exchange_name: String,
    credentials: String,
}

impl From<AccountConnectionRow> for AccountConnection {
    fn from(row: AccountConnectionRow) -> Self {
        Self {
            account_connection_id: row.account_connection_id,
            email: row.email,
            exchange_name: row.exchange_name,
            credentials: row.credentials,
        }
    }
}

/// Column values of one `orders` row
#[derive(Debug, Clone, PartialEq)]
struct OrderRecord {
    portfolio_config_id: i64,
    exchange: String,
    exchange_order_id: String,
    datetime: DateTime<Utc>,
    market: String,
    side: String,
    signal: Decimal,
    order_type: String,
    quantity: Decimal,
    quote_quantity: Decimal,
    fee: Decimal,
    balance: Option<Decimal>,
    price: Decimal,
    original_data: serde_json::Value,
}

impl From<&EnrichedOrder> for OrderRecord {
    fn from(enriched: &EnrichedOrder) -> Self {
        let order = &enriched.order;
        Self {
            portfolio_config_id: enriched.portfolio_config_id,
            exchange: enriched.exchange.to_string(),
            exchange_order_id: order.exchange_order_id.clone(),
            datetime: order.datetime,
            market: order.market.canonical(),
            side: order.side.to_string(),
            signal: enriched.signal,
            order_type: order.order_type.to_string(),
            quantity: order.quantity,
            quote_quantity: order.quote_quantity,
            fee: order.fee,
            balance: enriched.balance_usd,
            price: order.price,
            original_data: order.original_data.clone(),
        }
    }
}

/// Persistence over a shared connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open a pool for the configured database
    pub async fn connect(config: &DatabaseConfig) -> RebalanceResult<Self> {
        // Heroku-style urls use the short scheme
        let url = config.url.replacen("postgres://", "postgresql://", 1);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&url)
            .await?;
        info!("Connected to database ({} connections max)", config.max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Persistence for PgStore {
    #[instrument(skip(self))]
    async fn load_active_users(&self) -> RebalanceResult<Vec<ActiveUser>> {
        let rows: Vec<ActiveUserRow> = sqlx::query_as(ACTIVE_USERS).fetch_all(&self.pool).await?;
        debug!("Loaded {} active users", rows.len());
        Ok(rows.into_iter().map(ActiveUser::from).collect())
    }

    #[instrument(skip(self))]
    async fn load_portfolio_configs(
        &self,
        user_id: i64,
        exchange_name: &str,
    ) -> RebalanceResult<Vec<PortfolioConfig>> {
        let rows: Vec<PortfolioConfigRow> = sqlx::query_as(PORTFOLIO_CONFIGS)
            .bind(user_id)
            .bind(exchange_name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(PortfolioConfig::from).collect())
    }

    #[instrument(skip(self, order), fields(order_id = %order.order.exchange_order_id))]
    async fn save_order(&self, order: &EnrichedOrder) -> RebalanceResult<()> {
        let record = OrderRecord::from(order);
        sqlx::query(INSERT_ORDER)
            .bind(record.portfolio_config_id)
            .bind(record.exchange)
            .bind(record.exchange_order_id)
            .bind(record.datetime)
            .bind(record.market)
            .bind(record.side)
            .bind(record.signal)
            .bind(record.order_type)
            .bind(record.quantity)
            .bind(record.quote_quantity)
            .bind(record.fee)
            .bind(record.balance)
            .bind(record.price)
            .bind(Json(record.original_data))
            .execute(&self.pool)
            .await?;
        info!("Order added to database");
        Ok(())
    }

    #[instrument(skip(self, snapshot), fields(connection = snapshot.account_connection_id))]
    async fn save_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> RebalanceResult<()> {
        sqlx::query(INSERT_BALANCE)
            .bind(snapshot.account_connection_id)
            .bind(snapshot.datetime)
            .bind(snapshot.balance_usd)
            .bind(Json(snapshot.assets.clone()))
            .execute(&self.pool)
            .await?;
        debug!("Balance data added to database");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_account_connections(&self) -> RebalanceResult<Vec<AccountConnection>> {
        let rows: Vec<AccountConnectionRow> =
            sqlx::query_as(ACCOUNT_CONNECTIONS).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(AccountConnection::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{ExchangeKind, Market, OrderResult, OrderType, Side};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_record_columns() {
        let enriched = EnrichedOrder {
            order: OrderResult {
                exchange_order_id: "28457".to_string(),
                datetime: Utc::now(),
                market: Market::new("eth", "usdt"),
                side: Side::Sell,
                order_type: OrderType::Market,
                quantity: dec!(0.15),
                quote_quantity: dec!(300),
                fee: dec!(0.3),
                price: dec!(2000),
                original_data: serde_json::json!({"orderId": 28457}),
            },
            portfolio_config_id: 4,
            signal: dec!(0),
            exchange: ExchangeKind::Kucoin,
            balance_usd: None,
        };

        let record = OrderRecord::from(&enriched);
        assert_eq!(record.exchange, "Kucoin");
        assert_eq!(record.market, "ETHUSDT");
        assert_eq!(record.side, "SELL");
        assert_eq!(record.order_type, "MARKET");
        assert_eq!(record.balance, None);
        assert_eq!(record.original_data["orderId"], 28457);
    }

    #[test]
    fn test_config_row_uppercases_assets() {
        let config = PortfolioConfig::from(PortfolioConfigRow {
            portfolio_config_id: 9,
            base: "eth".to_string(),
            quote: "usdt".to_string(),
            weight: dec!(0.25),
            strategy: "sma_cross".to_string(),
            active: true,
        });
        assert_eq!(config.market().unwrap(), Market::new("ETH", "USDT"));
    }
}
