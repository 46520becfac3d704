//! Binance REST payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Error code for an unknown symbol
pub const INVALID_SYMBOL_CODE: i64 = -1121;

/// Entry of `POST /sapi/v3/asset/getUserAsset`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAsset {
    pub asset: String,
    pub free: String,
    pub locked: String,
    #[serde(default)]
    pub freeze: Option<String>,
}

/// `GET /api/v3/exchangeInfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Filters vary in shape by `filterType`
    #[serde(default)]
    pub filters: Vec<Value>,
}

impl SymbolInfo {
    /// Find a filter by type
    pub fn filter(&self, filter_type: &str) -> Option<&Value> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(Value::as_str) == Some(filter_type))
    }
}

/// `GET /api/v3/ticker/price`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: String,
}

/// `POST /api/v3/order` with `newOrderRespType=FULL`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub transact_time: i64,
    pub executed_qty: String,
    pub cummulative_quote_qty: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub fills: Vec<Fill>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub commission_asset: String,
}
