//! Common test utilities and fixtures
#![allow(dead_code)]

use portfolio_rebalancer::common::types::Credentials;
use portfolio_rebalancer::config::types::{BinanceConfig, BybitConfig, KucoinConfig};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";
pub const API_SECRET: &str = "test-api-secret";

/// Key and secret only
pub fn credentials() -> Credentials {
    Credentials::new(API_KEY, API_SECRET)
}

/// KuCoin sub-account credentials with the main account keys
pub fn kucoin_credentials() -> Credentials {
    Credentials {
        api_passphrase: Some("sub-pass".to_string()),
        subaccount: Some("rebalancer".to_string()),
        main_api_key: Some("main-key".to_string()),
        main_api_secret: Some("main-secret".to_string()),
        main_api_passphrase: Some("main-pass".to_string()),
        ..credentials()
    }
}

pub fn binance_config(server: &MockServer) -> BinanceConfig {
    BinanceConfig {
        rest_url: server.uri(),
        ..BinanceConfig::default()
    }
}

/// Bybit config pointing at the mock without the post-order wait
pub fn bybit_config(server: &MockServer) -> BybitConfig {
    BybitConfig {
        rest_url: server.uri(),
        settle_delay_ms: 0,
        ..BybitConfig::default()
    }
}

pub fn kucoin_config(server: &MockServer) -> KucoinConfig {
    KucoinConfig {
        rest_url: server.uri(),
        settle_delay_ms: 0,
    }
}

/// Sample exchange payloads
pub mod payloads {
    use super::*;

    pub static BINANCE_EXCHANGE_INFO: Lazy<Value> = Lazy::new(|| {
        json!({
            "timezone": "UTC",
            "symbols": [{
                "symbol": "ETHUSDT",
                "status": "TRADING",
                "baseAsset": "ETH",
                "quoteAsset": "USDT",
                "filters": [
                    {"filterType": "PRICE_FILTER", "tickSize": "0.01000000"},
                    {"filterType": "LOT_SIZE", "minQty": "0.00010000", "stepSize": "0.00010000"},
                    {"filterType": "NOTIONAL", "minNotional": "5.00000000"}
                ]
            }]
        })
    });

    pub fn binance_user_assets() -> Value {
        json!([
            {"asset": "ETH", "free": "0.5", "locked": "0.1", "freeze": "0"},
            {"asset": "USDT", "free": "100", "locked": "0", "freeze": "0"},
            {"asset": "NOPE", "free": "3", "locked": "0", "freeze": "0"},
            {"asset": "BNB", "free": "0", "locked": "0", "freeze": "0"}
        ])
    }

    pub fn binance_market_buy() -> Value {
        json!({
            "symbol": "ETHUSDT",
            "orderId": 28457,
            "orderListId": -1,
            "clientOrderId": "x-rebalance-1",
            "transactTime": 1700000000000i64,
            "price": "0.00000000",
            "origQty": "0.10000000",
            "executedQty": "0.10000000",
            "cummulativeQuoteQty": "200.00000000",
            "status": "FILLED",
            "timeInForce": "GTC",
            "type": "MARKET",
            "side": "BUY",
            "fills": [
                {"price": "2000.00", "qty": "0.06", "commission": "0.00006", "commissionAsset": "ETH", "tradeId": 1},
                {"price": "2000.00", "qty": "0.04", "commission": "0.00004", "commissionAsset": "ETH", "tradeId": 2}
            ]
        })
    }

    /// Bybit v5 success envelope
    pub fn bybit_ok(result: Value) -> Value {
        json!({"retCode": 0, "retMsg": "OK", "result": result, "retExtInfo": {}, "time": 1700000000000i64})
    }

    /// KuCoin success envelope
    pub fn kucoin_ok(data: Value) -> Value {
        json!({"code": "200000", "data": data})
    }
}
