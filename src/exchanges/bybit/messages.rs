//! Bybit v5 REST payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Common v5 response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: Value,
}

/// `GET /v5/account/wallet-balance`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBalanceResult {
    #[serde(default)]
    pub list: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletAccount {
    #[serde(default)]
    pub account_type: String,
    #[serde(default)]
    pub coin: Vec<WalletCoin>,
}

/// Numeric fields may be empty strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletCoin {
    pub coin: String,
    #[serde(default)]
    pub wallet_balance: String,
    #[serde(default)]
    pub available_to_withdraw: String,
    #[serde(default)]
    pub locked: String,
}

/// `GET /v5/market/instruments-info`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentsResult {
    #[serde(default)]
    pub list: Vec<Instrument>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub symbol: String,
    #[serde(default)]
    pub base_coin: String,
    #[serde(default)]
    pub quote_coin: String,
    pub status: String,
    pub lot_size_filter: LotSizeFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    pub base_precision: String,
    pub min_order_amt: String,
}

/// `GET /v5/market/kline`, rows newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub list: Vec<Vec<String>>,
}

/// `GET /v5/market/tickers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickersResult {
    #[serde(default)]
    pub list: Vec<Ticker>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_price: String,
}

/// `POST /v5/order/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateResult {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
}

/// Order request body for `POST /v5/order/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateRequest {
    pub category: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
}

/// `GET /v5/order/history` and `GET /v5/order/realtime`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListResult {
    #[serde(default)]
    pub list: Vec<Value>,
    #[serde(default)]
    pub next_page_cursor: String,
}

/// Executed order as reported by the order history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub cum_exec_qty: String,
    #[serde(default)]
    pub cum_exec_value: String,
    #[serde(default)]
    pub cum_exec_fee: String,
    #[serde(default)]
    pub created_time: String,
}

/// `GET /v5/asset/transfer/query-inter-transfer-list` and
/// `GET /v5/asset/transfer/query-universal-transfer-list`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferListResult {
    #[serde(default)]
    pub list: Vec<TransferRecord>,
    #[serde(default)]
    pub next_page_cursor: String,
}

/// One transfer; member ids are only present on universal transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(default)]
    pub transfer_id: String,
    pub coin: String,
    pub amount: String,
    pub from_account_type: String,
    pub to_account_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub from_member_id: Option<Value>,
    #[serde(default)]
    pub to_member_id: Option<Value>,
}
