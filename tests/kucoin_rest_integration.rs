//! Integration tests for the KuCoin adapter against a mocked REST API
//!
//! ```
//! cargo test --test kucoin_rest_integration
//! ```

mod common;

use common::payloads::kucoin_ok;
use portfolio_rebalancer::common::errors::ExchangeError;
use portfolio_rebalancer::common::traits::ExchangeAdapter;
use portfolio_rebalancer::common::types::{Credentials, Market, OrderRequest, OrderType, Side};
use portfolio_rebalancer::exchanges::KucoinClient;
use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio_test::assert_err;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> KucoinClient {
    KucoinClient::new(&common::kucoin_config(server), &common::kucoin_credentials())
        .expect("Failed to create KuCoin client")
}

async fn mount_symbols(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/v2/symbols"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!([
            {
                "symbol": "ETH-USDT",
                "name": "ETH-USDT",
                "baseCurrency": "ETH",
                "quoteCurrency": "USDT",
                "baseMinSize": "0.0001",
                "quoteMinSize": "0.1",
                "baseIncrement": "0.0000001",
                "quoteIncrement": "0.000001",
                "enableTrading": true
            },
            {
                "symbol": "OLD-USDT",
                "name": "OLD-USDT",
                "baseCurrency": "OLD",
                "quoteCurrency": "USDT",
                "baseMinSize": "1",
                "quoteMinSize": "1",
                "baseIncrement": "1",
                "quoteIncrement": "0.01",
                "enableTrading": false
            }
        ]))))
        .mount(server)
        .await;
}

#[test]
fn test_missing_subaccount_credentials_are_rejected() {
    let config = portfolio_rebalancer::config::types::KucoinConfig::default();
    let result = KucoinClient::new(&config, &Credentials::new("key", "secret"));
    assert!(matches!(result, Err(ExchangeError::Authentication(_))));
}

// ============================================================================
// Market data
// ============================================================================

#[tokio::test]
async fn test_get_ticker_price_uses_dashed_symbol() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/market/orderbook/level1"))
        .and(query_param("symbol", "ETH-USDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "time": 1700000000000i64,
            "sequence": "1550467636704",
            "price": "1999.98",
            "size": "0.17",
            "bestBid": "1999.97",
            "bestBidSize": "0.5",
            "bestAsk": "1999.98",
            "bestAskSize": "1.2"
        }))))
        .mount(&server)
        .await;

    let price = client(&server)
        .get_ticker_price(&Market::new("ETH", "USDT"))
        .await
        .unwrap();
    assert_eq!(price, dec!(1999.98));
}

#[tokio::test]
async fn test_empty_level1_is_price_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/market/orderbook/level1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "200000", "data": null})))
        .mount(&server)
        .await;

    let result = client(&server)
        .get_ticker_price(&Market::new("NOPE", "USDT"))
        .await;
    assert!(matches!(result, Err(ExchangeError::PriceUnavailable(_))), "{:?}", result);
}

#[tokio::test]
async fn test_symbol_increments_and_tickers() {
    let server = MockServer::start().await;
    mount_symbols(&server).await;

    let client = client(&server);
    let market = Market::new("ETH", "USDT");
    assert_eq!(client.get_ticker_precision(&market).await.unwrap(), dec!(0.0000001));
    assert_eq!(client.get_ticker_min_notional(&market).await.unwrap(), dec!(0.1));
    assert_eq!(client.get_tickers().await.unwrap(), vec!["ETHUSDT".to_string()]);

    let missing = client.get_ticker_precision(&Market::new("BTC", "USDT")).await;
    assert!(matches!(missing, Err(ExchangeError::InvalidMarket(_))));
}

#[tokio::test]
async fn test_candles_are_reordered() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/market/candles"))
        .and(query_param("type", "1day"))
        .and(query_param("symbol", "ETH-USDT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!([
            ["1700086400", "2010", "2040", "2050", "2000", "900", "1830000"],
            ["1700000000", "2000", "2010", "2020", "1980", "1200", "2412000"]
        ]))))
        .mount(&server)
        .await;

    let bars = client(&server)
        .get_ohlcv(&Market::new("ETH", "USDT"), "1d", None, None)
        .await
        .unwrap();
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].date.timestamp(), 1_700_000_000);
    // open, close, high, low ordering of the wire format
    assert_eq!(bars[1].close, dec!(2040));
    assert_eq!(bars[1].high, dec!(2050));
}

// ============================================================================
// Account
// ============================================================================

#[tokio::test]
async fn test_trade_account_balances() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts"))
        .and(query_param("type", "trade"))
        .and(header("KC-API-KEY", common::API_KEY))
        .and(header("KC-API-KEY-VERSION", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!([
            {"id": "1", "currency": "USDT", "type": "trade", "balance": "250.5", "available": "240.5", "holds": "10"},
            {"id": "2", "currency": "ETH", "type": "trade", "balance": "0.2", "available": "0.2", "holds": "0"},
            {"id": "3", "currency": "KCS", "type": "trade", "balance": "0", "available": "0", "holds": "0"}
        ]))))
        .mount(&server)
        .await;

    let assets = client(&server).get_balance_assets().await.unwrap();
    assert_eq!(assets.len(), 2);
    let usdt = assets.iter().find(|a| a.symbol == "USDT").unwrap();
    assert_eq!(usdt.total_qty, dec!(250.5));
    assert_eq!(usdt.free_qty, dec!(240.5));
}

#[tokio::test]
async fn test_permissions_are_read_with_main_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/sub/api-key"))
        .and(query_param("subName", "rebalancer"))
        .and(header("KC-API-KEY", "main-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!([{
            "subName": "rebalancer",
            "remark": "bot",
            "apiKey": common::API_KEY,
            "apiVersion": 2,
            "permission": "General,Spot",
            "ipWhitelist": "",
            "createdAt": 1700000000000i64
        }]))))
        .mount(&server)
        .await;

    assert!(client(&server).is_spot_trading_enabled().await.unwrap());
}

#[tokio::test]
async fn test_permission_error_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/accounts"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "code": "400007",
            "msg": "Access denied, require more permission."
        })))
        .mount(&server)
        .await;

    let result = client(&server).get_balance_assets().await;
    assert!(matches!(result, Err(ExchangeError::PermissionDenied(_))), "{:?}", result);
}

// ============================================================================
// Orders
// ============================================================================

#[test_log::test(tokio::test)]
async fn test_market_sell_reads_order_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .and(body_partial_json(json!({
            "side": "sell",
            "symbol": "ETH-USDT",
            "type": "market",
            "size": "0.15"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "orderId": "5bd6e9286d99522a52e458de"
        }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/orders/5bd6e9286d99522a52e458de"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "id": "5bd6e9286d99522a52e458de",
            "symbol": "ETH-USDT",
            "opType": "DEAL",
            "type": "market",
            "side": "sell",
            "size": "0.15",
            "dealSize": "0.15",
            "dealFunds": "300",
            "fee": "0.3",
            "feeCurrency": "USDT",
            "isActive": false,
            "createdAt": 1700000000000i64
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let request = OrderRequest::market(Market::new("ETH", "USDT"), Side::Sell, dec!(0.15));
    let order = client(&server).place_order(&request).await.unwrap();

    assert_eq!(order.exchange_order_id, "5bd6e9286d99522a52e458de");
    assert_eq!(order.market, Market::new("ETH", "USDT"));
    assert_eq!(order.side, Side::Sell);
    assert_eq!(order.order_type, OrderType::Market);
    assert_eq!(order.price, dec!(2000));
    assert_eq!(order.fee, dec!(0.3));
}

#[tokio::test]
async fn test_unreadable_order_detail_is_unconfirmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "orderId": "5c35c02703aa673ceec2a168"
        }))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/orders/5c35c02703aa673ceec2a168"))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .mount(&server)
        .await;

    let request = OrderRequest::market(Market::new("ETH", "USDT"), Side::Buy, dec!(0.1));
    let err = assert_err!(client(&server).place_order(&request).await);
    assert!(
        matches!(err, ExchangeError::OrderUnconfirmed { ref order_id, .. } if order_id == "5c35c02703aa673ceec2a168"),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_open_orders_are_active_page_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/orders"))
        .and(query_param("status", "active"))
        .and(query_param("symbol", "ETH-USDT"))
        .and(header("KC-API-KEY", common::API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "currentPage": 1,
            "pageSize": 50,
            "totalNum": 1,
            "totalPage": 1,
            "items": [{
                "id": "5c35c02703aa673ceec2a168",
                "symbol": "ETH-USDT",
                "type": "limit",
                "side": "buy",
                "price": "1800",
                "size": "0.5",
                "isActive": true
            }]
        }))))
        .mount(&server)
        .await;

    let orders = client(&server)
        .get_open_orders(Some(Market::new("ETH", "USDT")))
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["id"], "5c35c02703aa673ceec2a168");
}

#[tokio::test]
async fn test_cancel_order() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/orders/5c35c02703aa673ceec2a168"))
        .and(header("KC-API-KEY", common::API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(kucoin_ok(json!({
            "cancelledOrderIds": ["5c35c02703aa673ceec2a168"]
        }))))
        .expect(1)
        .mount(&server)
        .await;

    let cancelled = client(&server)
        .cancel_order(&Market::new("ETH", "USDT"), "5c35c02703aa673ceec2a168")
        .await
        .unwrap();
    assert_eq!(cancelled["cancelledOrderIds"][0], "5c35c02703aa673ceec2a168");
}

#[tokio::test]
async fn test_cancel_unknown_order_keeps_exchange_message() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/orders/missing"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "400100",
            "msg": "order not exist."
        })))
        .mount(&server)
        .await;

    let err = assert_err!(
        client(&server)
            .cancel_order(&Market::new("ETH", "USDT"), "missing")
            .await
    );
    assert!(matches!(err, ExchangeError::Api { ref code, .. } if code == "400100"));
    assert!(err.to_string().contains("order not exist."));
}
