//! KuCoin REST payloads

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Success code of the response envelope
pub const SUCCESS_CODE: &str = "200000";

/// Common response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Entry of `GET /api/v1/accounts`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    pub currency: String,
    #[serde(rename = "type", default)]
    pub account_type: String,
    pub balance: String,
    pub available: String,
    #[serde(default)]
    pub holds: Option<String>,
}

/// Entry of `GET /api/v2/symbols`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolEntry {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub base_increment: String,
    pub quote_min_size: String,
    pub enable_trading: bool,
}

/// `GET /api/v1/market/orderbook/level1`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level1 {
    #[serde(default)]
    pub price: Option<String>,
}

/// Entry of `GET /api/v1/sub/api-key`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubApiKey {
    pub api_key: String,
    #[serde(default)]
    pub sub_name: String,
    /// Comma separated, e.g. `General,Spot`
    #[serde(default)]
    pub permission: String,
}

/// `POST /api/v1/orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
}

/// Order request body for `POST /api/v1/orders`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreateRequest {
    pub client_oid: String,
    pub side: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<String>,
}

/// `GET /api/v1/orders/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub deal_size: String,
    pub deal_funds: String,
    pub fee: String,
    #[serde(default)]
    pub fee_currency: String,
    pub created_at: i64,
}

/// Paginated list payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub items: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_detail_deserializes() {
        let detail: OrderDetail = serde_json::from_value(json!({
            "id": "5c35c02703aa673ceec2a168",
            "symbol": "ETH-USDT",
            "opType": "DEAL",
            "type": "market",
            "side": "buy",
            "price": "0",
            "size": "0.1",
            "dealFunds": "200",
            "dealSize": "0.1",
            "fee": "0.2",
            "feeCurrency": "USDT",
            "isActive": false,
            "createdAt": 1547026472000i64
        }))
        .unwrap();
        assert_eq!(detail.order_type, "market");
        assert_eq!(detail.created_at, 1_547_026_472_000);
    }

    #[test]
    fn test_level1_null_price() {
        let level1: Level1 = serde_json::from_value(json!({"price": null})).unwrap();
        assert!(level1.price.is_none());
    }
}
