//! Error types for the application

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type alias for exchange adapter operations
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Result type alias for rebalancing cycle and collaborator operations
pub type RebalanceResult<T> = std::result::Result<T, RebalanceError>;

/// Errors raised by an exchange adapter
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Request signing or credential errors
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The API key is valid but lacks a required permission
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A bare asset symbol was malformed or is not listed
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// A market string could not be parsed into base/quote
    #[error("Invalid market: {0}")]
    InvalidMarket(String),

    /// No price is available for the market (delisted or never quoted)
    #[error("Price unavailable for {0}")]
    PriceUnavailable(String),

    /// Timeframe has no mapping on this exchange
    #[error("Unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),

    /// Date range arguments were inconsistent
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    /// Order request rejected before submission
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Error payload returned by the exchange itself
    #[error("Exchange API error {code}: {message}")]
    Api { code: String, message: String },

    /// The exchange accepted the order but its fill could not be read back
    #[error("Order {order_id} was placed but could not be confirmed: {reason}")]
    OrderUnconfirmed { order_id: String, reason: String },

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised while running a rebalancing cycle
#[derive(Error, Debug)]
pub enum RebalanceError {
    /// Exchange adapter failure that could not be handled locally
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// API key inactive or spot trading disabled
    #[error("API key is not active: {0}")]
    Auth(String),

    /// Account balance is below the configured minimum
    #[error("Balance {balance} is below the minimum of {minimum}")]
    InsufficientBalance { balance: Decimal, minimum: Decimal },

    /// Credential blob could not be decrypted or decoded
    #[error("Credential error: {0}")]
    Credentials(String),

    /// Failure reading from or writing to the persistence layer
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Notification delivery failure
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<sqlx::Error> for RebalanceError {
    fn from(err: sqlx::Error) -> Self {
        RebalanceError::Persistence(err.to_string())
    }
}
