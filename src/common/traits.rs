//! Trait definitions for exchange adapters and rebalancing collaborators

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use super::errors::{ExchangeError, RebalanceResult, Result};
use super::types::{
    is_asset_symbol, looks_like_market, AccountConnection, ActiveUser, AssetBalance,
    BalanceSnapshot, Bar, Credentials, EnrichedOrder, ExchangeKind, Market, Notification,
    OrderRequest, OrderResult, PortfolioConfig,
};

/// Uniform interface over a spot exchange account (Binance, Bybit, KuCoin)
///
/// Every adapter normalizes the exchange's naming, numeric formats and
/// order payloads into the shared types in [`crate::common::types`].
/// The USD-valuation helpers are provided once here on top of the
/// exchange-specific primitives.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange this adapter talks to
    fn kind(&self) -> ExchangeKind;

    /// Stablecoin used as quote and priced at 1
    fn quote_asset(&self) -> String;

    /// Canonical market to the exchange's wire name
    fn encode_market(&self, market: &Market) -> String;

    /// Exchange wire name back to a canonical market
    fn decode_market(&self, raw: &str) -> Result<Market>;

    /// Raw permission metadata of the API key
    async fn get_api_key_information(&self) -> Result<Value>;

    /// Whether the API key may trade on the spot market
    async fn is_spot_trading_enabled(&self) -> Result<bool>;

    /// Positive balances only
    async fn get_balance_assets(&self) -> Result<Vec<AssetBalance>>;

    /// Canonical names of every market currently open for trading
    async fn get_tickers(&self) -> Result<Vec<String>>;

    /// OHLCV bars in strictly ascending date order
    ///
    /// # Arguments
    /// * `timeframe` - Canonical timeframe (`1m`, `1h`, `1d`, ...)
    /// * `start`/`end` - Either both or neither must be given
    async fn get_ohlcv(
        &self,
        market: &Market,
        timeframe: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>>;

    /// Last traded price in the quote asset
    async fn get_ticker_price(&self, market: &Market) -> Result<Decimal>;

    /// Quantity step size of the market
    async fn get_ticker_precision(&self, market: &Market) -> Result<Decimal>;

    /// Minimum order notional in the quote asset
    async fn get_ticker_min_notional(&self, market: &Market) -> Result<Decimal>;

    /// Submit an order and return the fully populated result
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult>;

    /// Raw open orders, optionally filtered by market
    async fn get_open_orders(&self, market: Option<Market>) -> Result<Vec<Value>>;

    /// Cancel an open order, returning the raw exchange acknowledgement
    async fn cancel_order(&self, market: &Market, order_id: &str) -> Result<Value>;

    /// Total account worth in USD
    ///
    /// Assets without a quote market are skipped with a warning.
    async fn get_balance_in_usd(&self) -> Result<Decimal> {
        let quote = self.quote_asset();
        let mut total = Decimal::ZERO;

        for asset in self.get_balance_assets().await? {
            if asset.symbol.eq_ignore_ascii_case(&quote) {
                total += asset.total_qty;
                continue;
            }

            let market = match Market::parse(&format!("{}-{}", asset.symbol, quote)) {
                Ok(market) => market,
                Err(_) => {
                    warn!("Skipping {}: cannot form a market against {}", asset.symbol, quote);
                    continue;
                }
            };

            match self.get_ticker_price(&market).await {
                Ok(price) => total += asset.total_qty * price,
                Err(ExchangeError::PriceUnavailable(_)) => {
                    warn!("Skipping {} in USD balance: no price for {}", asset.symbol, market);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    /// Free quantity of a bare asset symbol, zero when not held
    async fn get_symbol_qty(&self, symbol: &str) -> Result<Decimal> {
        let quote = self.quote_asset();
        let symbol = symbol.trim().to_uppercase();

        if symbol != quote {
            if !is_asset_symbol(&symbol) || looks_like_market(&symbol) {
                return Err(ExchangeError::InvalidSymbol(format!(
                    "{} looks like a market, not an asset",
                    symbol
                )));
            }
            let market = Market::new(symbol.as_str(), quote.as_str()).canonical();
            let tickers = self.get_tickers().await?;
            if !tickers.iter().any(|t| *t == market) {
                return Err(ExchangeError::InvalidSymbol(format!(
                    "{} is not listed on {}",
                    symbol,
                    self.kind()
                )));
            }
        }

        let balances = self.get_balance_assets().await?;
        Ok(balances
            .iter()
            .find(|b| b.symbol.eq_ignore_ascii_case(&symbol))
            .map(|b| b.free_qty)
            .unwrap_or(Decimal::ZERO))
    }

    /// USD value of the free quantity of a bare asset symbol
    async fn get_symbol_usd_value(&self, symbol: &str) -> Result<Decimal> {
        let qty = self.get_symbol_qty(symbol).await?;
        let quote = self.quote_asset();
        if symbol.eq_ignore_ascii_case(&quote) {
            return Ok(qty);
        }
        let price = self
            .get_ticker_price(&Market::new(symbol.trim(), quote.as_str()))
            .await?;
        Ok(qty * price)
    }
}

/// Storage of users, portfolio configurations, orders and balance history
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Users with an active subscription and a connected account
    async fn load_active_users(&self) -> RebalanceResult<Vec<ActiveUser>>;

    /// Active portfolio rows of a user on one exchange
    async fn load_portfolio_configs(
        &self,
        user_id: i64,
        exchange_name: &str,
    ) -> RebalanceResult<Vec<PortfolioConfig>>;

    async fn save_order(&self, order: &EnrichedOrder) -> RebalanceResult<()>;

    async fn save_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> RebalanceResult<()>;

    /// Every connected account, active or not
    async fn load_account_connections(&self) -> RebalanceResult<Vec<AccountConnection>>;
}

/// Turns a stored credential blob into usable credentials
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn decrypt(&self, blob: &str) -> RebalanceResult<Credentials>;
}

/// Delivers notifications to users and the operator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> RebalanceResult<()>;
}
