//! Unified types used across all exchange adapters and the rebalancing core

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::{ExchangeError, Result};

/// Quote assets a canonical market string may end with. The first entry is
/// the portfolio's stablecoin, priced at exactly 1.
pub const KNOWN_QUOTES: &[&str] = &["USDT", "USDC"];

/// Default quote stablecoin
pub const DEFAULT_QUOTE: &str = "USDT";

/// Supported exchanges, resolved once from the persisted exchange name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeKind {
    Binance,
    Bybit,
    Kucoin,
}

impl ExchangeKind {
    /// Name as stored in the `exchanges` table
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Binance => "Binance",
            ExchangeKind::Bybit => "Bybit",
            ExchangeKind::Kucoin => "Kucoin",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(ExchangeKind::Binance),
            "bybit" => Ok(ExchangeKind::Bybit),
            "kucoin" => Ok(ExchangeKind::Kucoin),
            other => Err(ExchangeError::Configuration(format!(
                "unknown exchange '{}'",
                other
            ))),
        }
    }
}

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = ExchangeError;

    /// Accepts any casing (`buy`, `Buy`, `BUY`)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            _ => Err(ExchangeError::InvalidResponse(format!("unknown side '{}'", s))),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            _ => Err(ExchangeError::InvalidResponse(format!(
                "unknown order type '{}'",
                s
            ))),
        }
    }
}

/// Time in force for LIMIT orders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Ioc => "IOC",
            TimeInForce::Fok => "FOK",
        }
    }
}

/// A tradable base/quote pair in canonical form (`ETHUSDT`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Market {
    pub base: String,
    pub quote: String,
}

impl Market {
    /// Build a market from already-separated assets
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Parse and validate a market string before it reaches the network.
    ///
    /// Accepts the canonical form (`ETHUSDT`) as well as separated forms
    /// (`ETH-USDT`, `eth_usdt`, `ETH/USDT`). The quote must be one of
    /// [`KNOWN_QUOTES`].
    pub fn parse(input: &str) -> Result<Self> {
        let cleaned = input.trim().to_uppercase();
        let invalid = || ExchangeError::InvalidMarket(input.to_string());

        let (base, quote) = match cleaned.split_once(['-', '_', '/']) {
            Some((base, quote)) => (base.to_string(), quote.to_string()),
            None => {
                let quote = KNOWN_QUOTES
                    .iter()
                    .find(|q| cleaned.len() > q.len() && cleaned.ends_with(*q))
                    .ok_or_else(invalid)?;
                let base = cleaned[..cleaned.len() - quote.len()].to_string();
                (base, quote.to_string())
            }
        };

        if !is_asset_symbol(&base) || !KNOWN_QUOTES.contains(&quote.as_str()) {
            return Err(invalid());
        }
        Ok(Self { base, quote })
    }

    /// Canonical concatenated form
    pub fn canonical(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

impl From<Market> for String {
    fn from(market: Market) -> Self {
        market.canonical()
    }
}

impl TryFrom<String> for Market {
    type Error = ExchangeError;

    fn try_from(value: String) -> Result<Self> {
        Market::parse(&value)
    }
}

/// True when `symbol` is a plain alphanumeric asset code
pub fn is_asset_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_alphanumeric())
}

/// True when `symbol` reads like a market pair rather than a bare asset
pub fn looks_like_market(symbol: &str) -> bool {
    let upper = symbol.to_uppercase();
    upper.contains(['-', '_', '/'])
        || KNOWN_QUOTES
            .iter()
            .any(|q| upper.len() > q.len() && upper.ends_with(q))
}

/// Balance of one held asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub symbol: String,
    /// Free plus locked quantity
    pub total_qty: Decimal,
    /// Quantity available for trading, never above `total_qty`
    pub free_qty: Decimal,
}

impl AssetBalance {
    /// Build a balance, clamping `free_qty` to `total_qty`
    pub fn new(symbol: impl Into<String>, total_qty: Decimal, free_qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            total_qty,
            free_qty: free_qty.min(total_qty),
        }
    }

    /// USD value of the free quantity at `price`
    pub fn usd_value(&self, price: Decimal) -> Decimal {
        self.free_qty * price
    }
}

/// One OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Order intent handed to an adapter
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub market: Market,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub time_in_force: Option<TimeInForce>,
}

impl OrderRequest {
    /// MARKET order intent
    pub fn market(market: Market, side: Side, quantity: Decimal) -> Self {
        Self {
            market,
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            time_in_force: None,
        }
    }

    /// LIMIT order intent (good-till-cancelled unless overridden)
    pub fn limit(market: Market, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            market,
            side,
            quantity,
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
        }
    }

    /// Reject intents no exchange would accept
    pub fn validate(&self) -> Result<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type == OrderType::Limit {
            match self.price {
                Some(price) if price > Decimal::ZERO => {}
                _ => {
                    return Err(ExchangeError::InvalidOrder(
                        "LIMIT orders require a positive price".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Time in force to send, if the order type needs one
    pub fn effective_time_in_force(&self) -> Option<TimeInForce> {
        match self.order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(self.time_in_force.unwrap_or(TimeInForce::Gtc)),
        }
    }
}

/// Normalized order record returned by every adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub exchange_order_id: String,
    pub datetime: DateTime<Utc>,
    pub market: Market,
    pub side: Side,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Executed base quantity
    pub quantity: Decimal,
    /// Executed quote quantity
    pub quote_quantity: Decimal,
    /// Fee expressed in the quote asset
    pub fee: Decimal,
    /// Average execution price
    pub price: Decimal,
    /// Raw exchange payload, kept verbatim
    pub original_data: serde_json::Value,
}

/// Order result enriched by the engine before persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedOrder {
    pub order: OrderResult,
    pub portfolio_config_id: i64,
    pub signal: Decimal,
    pub exchange: ExchangeKind,
    /// Account value right after the trade, when it could be fetched
    pub balance_usd: Option<Decimal>,
}

/// Portfolio configuration row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConfig {
    pub portfolio_config_id: i64,
    pub base: String,
    pub quote: String,
    /// Target fraction of portfolio worth, in [0, 1]
    pub weight: Decimal,
    pub strategy: String,
    pub active: bool,
}

impl PortfolioConfig {
    pub fn market(&self) -> Result<Market> {
        Market::parse(&format!("{}-{}", self.base, self.quote))
    }
}

/// Active user row as loaded from persistence
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveUser {
    pub user_id: i64,
    pub email: String,
    pub account_connection_id: i64,
    pub exchange_name: String,
    /// Encrypted credential blob
    pub credentials: String,
    pub order_notification: bool,
}

/// Account connection row used by the balance-history routine
#[derive(Debug, Clone, PartialEq)]
pub struct AccountConnection {
    pub account_connection_id: i64,
    pub email: String,
    pub exchange_name: String,
    pub credentials: String,
}

/// Decrypted credential dictionary
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub api_passphrase: Option<String>,
    #[serde(default)]
    pub subaccount: Option<String>,
    #[serde(default)]
    pub main_api_key: Option<String>,
    #[serde(default)]
    pub main_api_secret: Option<String>,
    #[serde(default)]
    pub main_api_passphrase: Option<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"***")
            .field("subaccount", &self.subaccount)
            .finish_non_exhaustive()
    }
}

/// Daily balance record for one account connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_connection_id: i64,
    pub datetime: DateTime<Utc>,
    pub balance_usd: Decimal,
    pub assets: Vec<AssetBalance>,
}

/// Message handed to a notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// `None` addresses the operator
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    /// Rich alternative of `body` for transports that render HTML
    #[serde(default)]
    pub html_body: Option<String>,
}

impl Notification {
    /// Message for the operator
    pub fn admin(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipient: None,
            subject: subject.into(),
            body: body.into(),
            html_body: None,
        }
    }

    /// Message for a specific user
    pub fn user(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            recipient: Some(recipient.into()),
            subject: subject.into(),
            body: body.into(),
            html_body: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html_body = Some(html.into());
        self
    }
}
