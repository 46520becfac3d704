//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::common::errors::{RebalanceError, RebalanceResult};
use crate::common::types::DEFAULT_QUOTE;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Per-exchange endpoint settings
    #[serde(default)]
    pub exchanges: ExchangesConfig,
    /// Rebalancing behaviour
    #[serde(default)]
    pub rebalance: RebalanceSettings,
    /// Database configuration (required by the default persistence)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Notification delivery
    #[serde(default)]
    pub notifier: NotifierConfig,
    /// Credential decryption
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    /// Check invariants the loader cannot express
    pub fn validate(&self) -> RebalanceResult<()> {
        self.rebalance.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangesConfig {
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub bybit: BybitConfig,
    #[serde(default)]
    pub kucoin: KucoinConfig,
}

/// Binance endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    #[serde(default = "default_binance_rest_url")]
    pub rest_url: String,
    /// Validity window of signed requests
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_url: default_binance_rest_url(),
            recv_window_ms: default_recv_window(),
        }
    }
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

/// Bybit (v5 API) endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BybitConfig {
    #[serde(default = "default_bybit_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Wait between order creation and the order-history lookup
    #[serde(default = "default_bybit_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            rest_url: default_bybit_rest_url(),
            recv_window_ms: default_recv_window(),
            settle_delay_ms: default_bybit_settle_delay(),
        }
    }
}

fn default_bybit_rest_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_bybit_settle_delay() -> u64 {
    15_000
}

/// KuCoin endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KucoinConfig {
    #[serde(default = "default_kucoin_rest_url")]
    pub rest_url: String,
    /// Wait between order creation and the order-detail lookup
    #[serde(default = "default_kucoin_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for KucoinConfig {
    fn default() -> Self {
        Self {
            rest_url: default_kucoin_rest_url(),
            settle_delay_ms: default_kucoin_settle_delay(),
        }
    }
}

fn default_kucoin_rest_url() -> String {
    "https://api.kucoin.com".to_string()
}

fn default_kucoin_settle_delay() -> u64 {
    5_000
}

fn default_recv_window() -> u64 {
    5_000
}

/// What to do when a BUY needs more quote balance than is free
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsufficientFundsPolicy {
    /// Report the shortfall and leave the market untouched
    #[default]
    Skip,
    /// Report the shortfall and buy what the free balance allows
    MaxAffordable,
}

/// Rebalancing behaviour shared by the orchestrator and engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceSettings {
    /// Maximum distance between current and target relative size that
    /// still counts as balanced
    #[serde(default = "default_tolerance")]
    pub tolerance: Decimal,
    /// Compute and log orders without submitting them
    #[serde(default)]
    pub dry_run: bool,
    /// Accounts worth less than this are skipped
    #[serde(default = "default_min_balance")]
    pub min_balance_usd: Decimal,
    /// Upper bound on the worth that weights apply to (unbounded when unset)
    #[serde(default)]
    pub portfolio_cap: Option<Decimal>,
    #[serde(default)]
    pub insufficient_funds: InsufficientFundsPolicy,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Timeframe of the bars fed to strategies
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    #[serde(default = "default_max_concurrent_users")]
    pub max_concurrent_users: usize,
}

impl Default for RebalanceSettings {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            dry_run: false,
            min_balance_usd: default_min_balance(),
            portfolio_cap: None,
            insufficient_funds: InsufficientFundsPolicy::default(),
            quote_asset: default_quote_asset(),
            timeframe: default_timeframe(),
            max_concurrent_users: default_max_concurrent_users(),
        }
    }
}

impl RebalanceSettings {
    pub fn validate(&self) -> RebalanceResult<()> {
        if self.tolerance < Decimal::ZERO || self.tolerance > Decimal::ONE {
            return Err(RebalanceError::Configuration(format!(
                "rebalance.tolerance must be in [0, 1], got {}",
                self.tolerance
            )));
        }
        if self.min_balance_usd <= Decimal::ZERO {
            return Err(RebalanceError::Configuration(format!(
                "rebalance.min_balance_usd must be positive, got {}",
                self.min_balance_usd
            )));
        }
        if let Some(cap) = self.portfolio_cap {
            if cap <= Decimal::ZERO {
                return Err(RebalanceError::Configuration(format!(
                    "rebalance.portfolio_cap must be positive, got {}",
                    cap
                )));
            }
        }
        if self.quote_asset.trim().is_empty() {
            return Err(RebalanceError::Configuration(
                "rebalance.quote_asset must not be empty".to_string(),
            ));
        }
        if self.max_concurrent_users == 0 {
            return Err(RebalanceError::Configuration(
                "rebalance.max_concurrent_users must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_tolerance() -> Decimal {
    dec!(0.05)
}

fn default_min_balance() -> Decimal {
    dec!(50)
}

fn default_quote_asset() -> String {
    DEFAULT_QUOTE.to_string()
}

fn default_timeframe() -> String {
    "1d".to_string()
}

fn default_max_concurrent_users() -> usize {
    8
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    30
}

/// Where notifications go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// JSON webhook receiving every notification; log only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Operator address used for admin notifications
    #[serde(default)]
    pub admin_recipient: Option<String>,
    /// SMTP relay; takes precedence over the webhook
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// SMTP relay reached over implicit TLS
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address
    pub from: String,
}

fn default_smtp_port() -> u16 {
    465
}

/// Key for the encrypted credential column
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Fernet key; the `ENCRYPTION_KEY` environment variable is used when unset
    #[serde(default)]
    pub encryption_key: Option<String>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rebalance.tolerance, dec!(0.05));
        assert_eq!(config.rebalance.min_balance_usd, dec!(50));
        assert_eq!(config.rebalance.insufficient_funds, InsufficientFundsPolicy::Skip);
        assert_eq!(config.exchanges.bybit.settle_delay_ms, 15_000);
        assert_eq!(config.exchanges.kucoin.settle_delay_ms, 5_000);
    }

    #[test]
    fn test_validate_rejects_bad_tolerance() {
        let mut settings = RebalanceSettings::default();
        settings.tolerance = dec!(1.5);
        assert!(matches!(
            settings.validate(),
            Err(RebalanceError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency_and_empty_quote() {
        let mut settings = RebalanceSettings::default();
        settings.max_concurrent_users = 0;
        assert!(settings.validate().is_err());

        let mut settings = RebalanceSettings::default();
        settings.quote_asset = "  ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_policy_deserializes_snake_case() {
        let policy: InsufficientFundsPolicy = serde_json::from_str("\"max_affordable\"").unwrap();
        assert_eq!(policy, InsufficientFundsPolicy::MaxAffordable);
    }
}
