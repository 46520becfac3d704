//! Bybit spot adapter (unified trading account)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::auth::generate_auth_headers;
use super::messages::*;
use crate::common::errors::{ExchangeError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{
    AssetBalance, Bar, Credentials, ExchangeKind, Market, OrderRequest, OrderResult, OrderType,
    Side, DEFAULT_QUOTE,
};
use crate::config::types::BybitConfig;
use crate::exchanges::http::{
    self, build_client, encode_query, format_quantity, parse_decimal, parse_decimal_or_zero,
    read_body, status_error, validate_range,
};

/// Map a canonical timeframe to a Bybit kline interval
pub fn map_timeframe(timeframe: &str) -> Result<&'static str> {
    let interval = match timeframe {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        "1M" => "M",
        other => return Err(ExchangeError::UnsupportedTimeframe(other.to_string())),
    };
    Ok(interval)
}

/// Bybit spot account adapter
#[derive(Debug, Clone)]
pub struct BybitClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    settle_delay: Duration,
    quote_asset: String,
}

impl BybitClient {
    /// Create a new client with the default 30 second timeout
    pub fn new(config: &BybitConfig, credentials: &Credentials) -> Result<Self> {
        Self::with_timeout(config, credentials, Duration::from_secs(30))
    }

    /// Create a new client with a custom timeout
    pub fn with_timeout(
        config: &BybitConfig,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(ExchangeError::Authentication(
                "Bybit requires api_key and api_secret".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(timeout)?,
            base_url: http::normalize_base_url(&config.rest_url),
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            quote_asset: DEFAULT_QUOTE.to_string(),
        })
    }

    /// Use another stablecoin as quote asset
    pub fn with_quote_asset(mut self, quote: &str) -> Self {
        self.quote_asset = quote.to_uppercase();
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let query = encode_query(params);
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!("Fetching {}", url);

        let mut request = self.client.get(&url);
        if signed {
            let headers =
                generate_auth_headers(&self.api_key, &self.api_secret, self.recv_window_ms, &query)?;
            request = headers.apply_to_request(request);
        }
        let response = request.send().await?;
        let result = Self::unwrap_envelope(response).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let payload = serde_json::to_string(body)?;
        debug!("Posting to {}: {}", url, payload);

        let headers =
            generate_auth_headers(&self.api_key, &self.api_secret, self.recv_window_ms, &payload)?;
        let response = headers
            .apply_to_request(self.client.post(&url))
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await?;
        let result = Self::unwrap_envelope(response).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn unwrap_envelope(response: reqwest::Response) -> Result<Value> {
        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let envelope: Envelope = serde_json::from_str(&body)?;
        match envelope.ret_code {
            0 => Ok(envelope.result),
            10003 | 10004 | 10005 | 33004 => Err(ExchangeError::Authentication(envelope.ret_msg)),
            code => Err(ExchangeError::Api {
                code: code.to_string(),
                message: envelope.ret_msg,
            }),
        }
    }

    async fn instrument(&self, market: &Market) -> Result<Instrument> {
        let result: InstrumentsResult = self
            .get(
                "/v5/market/instruments-info",
                &[
                    ("category", "spot".to_string()),
                    ("symbol", self.encode_market(market)),
                ],
                false,
            )
            .await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::InvalidMarket(market.canonical()))
    }

    async fn order_detail(&self, order_id: &str) -> Result<Value> {
        let result: OrderListResult = self
            .get(
                "/v5/order/history",
                &[
                    ("category", "spot".to_string()),
                    ("orderId", order_id.to_string()),
                ],
                true,
            )
            .await?;
        result
            .list
            .into_iter()
            .find(|o| o.get("orderId").and_then(Value::as_str) == Some(order_id))
            .ok_or_else(|| {
                ExchangeError::InvalidResponse(format!("Order {} not found in history", order_id))
            })
    }

    /// Update permissions or the IP allow-list of a sub-account API key
    ///
    /// `changes` is sent as is, e.g. `{"apikey": "...", "ips": "*"}`.
    #[instrument(skip(self, changes))]
    pub async fn modify_sub_api_key(&self, changes: &Value) -> Result<Value> {
        self.post("/v5/user/update-sub-api", changes).await
    }

    /// Deposits to and withdrawals from the unified account, oldest first
    ///
    /// Merges internal transfers (between accounts of this member) with
    /// universal transfers (between members).
    #[instrument(skip(self))]
    pub async fn get_net_transfers(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<NetTransfer>> {
        let mut params = Vec::new();
        if let Some((start, end)) = validate_range(start, end)? {
            params.push(("startTime", start.timestamp_millis().to_string()));
            params.push(("endTime", end.timestamp_millis().to_string()));
        }
        params.push(("limit", "50".to_string()));

        let internal: TransferListResult = self
            .get("/v5/asset/transfer/query-inter-transfer-list", &params, true)
            .await?;
        let universal: TransferListResult = self
            .get("/v5/asset/transfer/query-universal-transfer-list", &params, true)
            .await?;
        let user_id = self
            .get_api_key_information()
            .await?
            .get("userID")
            .and_then(member_id)
            .ok_or_else(|| ExchangeError::InvalidResponse("query-api has no userID".to_string()))?;

        let mut transfers = Vec::new();
        for record in internal.list {
            transfers.extend(net_transfer(record, &user_id, true)?);
        }
        for record in universal.list {
            transfers.extend(net_transfer(record, &user_id, false)?);
        }
        transfers.sort_by_key(|t| t.date);
        Ok(transfers)
    }

    fn normalize_order(&self, raw: Value) -> Result<OrderResult> {
        let detail: OrderDetail = serde_json::from_value(raw.clone())?;

        let side: Side = detail.side.parse()?;
        let order_type: OrderType = detail.order_type.parse()?;
        let price = parse_decimal_or_zero(&detail.avg_price, "avgPrice")?;
        let mut fee = parse_decimal_or_zero(&detail.cum_exec_fee, "cumExecFee")?;
        // market buys are charged in the base coin
        if side == Side::Buy && order_type == OrderType::Market {
            fee *= price;
        }
        let created: i64 = detail
            .created_time
            .parse()
            .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid createdTime: {}", e)))?;

        Ok(OrderResult {
            exchange_order_id: detail.order_id,
            datetime: http::datetime_from_millis(created)?,
            market: self.decode_market(&detail.symbol)?,
            side,
            order_type,
            quantity: parse_decimal_or_zero(&detail.cum_exec_qty, "cumExecQty")?,
            quote_quantity: parse_decimal_or_zero(&detail.cum_exec_value, "cumExecValue")?,
            fee,
            price,
            original_data: raw,
        })
    }
}

const UNIFIED: &str = "UNIFIED";

/// Funds moved into (positive) or out of (negative) the unified account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetTransfer {
    pub date: DateTime<Utc>,
    pub status: String,
    pub coin: String,
    pub net_amount: Decimal,
}

fn member_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Net effect of one transfer on the unified account of `user_id`
///
/// Internal transfers stay within the member; transfers that do not touch
/// the unified account yield `None`.
fn net_transfer(record: TransferRecord, user_id: &str, internal: bool) -> Result<Option<NetTransfer>> {
    let (from_member, to_member) = if internal {
        (Some(user_id.to_string()), Some(user_id.to_string()))
    } else {
        (
            record.from_member_id.as_ref().and_then(member_id),
            record.to_member_id.as_ref().and_then(member_id),
        )
    };
    let amount = parse_decimal(&record.amount, "amount")?;

    let mut net = None;
    if to_member.as_deref() == Some(user_id) && record.to_account_type == UNIFIED {
        net = Some(amount);
    }
    if from_member.as_deref() == Some(user_id) && record.from_account_type == UNIFIED {
        net = Some(-amount);
    }
    let Some(net_amount) = net else {
        return Ok(None);
    };

    let millis: i64 = record
        .timestamp
        .parse()
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid transfer timestamp: {}", e)))?;
    Ok(Some(NetTransfer {
        date: http::datetime_from_millis(millis)?,
        status: record.status,
        coin: record.coin.to_uppercase(),
        net_amount,
    }))
}

fn wire_side(side: Side) -> &'static str {
    match side {
        Side::Buy => "Buy",
        Side::Sell => "Sell",
    }
}

fn wire_order_type(order_type: OrderType) -> &'static str {
    match order_type {
        OrderType::Market => "Market",
        OrderType::Limit => "Limit",
    }
}

fn parse_kline(row: &[String]) -> Result<Bar> {
    if row.len() < 6 {
        return Err(ExchangeError::InvalidResponse(format!(
            "Kline has {} cells, expected at least 6",
            row.len()
        )));
    }
    let start: i64 = row[0]
        .parse()
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid kline time: {}", e)))?;
    Ok(Bar {
        date: http::datetime_from_millis(start)?,
        open: parse_decimal(&row[1], "open")?,
        high: parse_decimal(&row[2], "high")?,
        low: parse_decimal(&row[3], "low")?,
        close: parse_decimal(&row[4], "close")?,
        volume: parse_decimal(&row[5], "volume")?,
    })
}

#[async_trait]
impl ExchangeAdapter for BybitClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Bybit
    }

    fn quote_asset(&self) -> String {
        self.quote_asset.clone()
    }

    fn encode_market(&self, market: &Market) -> String {
        market.canonical()
    }

    fn decode_market(&self, raw: &str) -> Result<Market> {
        Market::parse(raw)
    }

    #[instrument(skip(self))]
    async fn get_api_key_information(&self) -> Result<Value> {
        self.get("/v5/user/query-api", &[], true).await
    }

    #[instrument(skip(self))]
    async fn is_spot_trading_enabled(&self) -> Result<bool> {
        let info = self.get_api_key_information().await?;
        let spot = info
            .pointer("/permissions/Spot")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ExchangeError::InvalidResponse("query-api has no Spot permissions".to_string())
            })?;
        Ok(spot.iter().any(|p| p.as_str() == Some("SpotTrade")))
    }

    #[instrument(skip(self))]
    async fn get_balance_assets(&self) -> Result<Vec<AssetBalance>> {
        let result: WalletBalanceResult = self
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED".to_string())],
                true,
            )
            .await?;

        let mut balances = Vec::new();
        for account in result.list {
            for coin in account.coin {
                let total = parse_decimal_or_zero(&coin.wallet_balance, "walletBalance")?;
                if total <= Decimal::ZERO {
                    continue;
                }
                let free = if coin.available_to_withdraw.trim().is_empty() {
                    total - parse_decimal_or_zero(&coin.locked, "locked")?
                } else {
                    parse_decimal(&coin.available_to_withdraw, "availableToWithdraw")?
                };
                balances.push(AssetBalance::new(
                    coin.coin.to_uppercase(),
                    total,
                    free.max(Decimal::ZERO),
                ));
            }
        }
        Ok(balances)
    }

    #[instrument(skip(self))]
    async fn get_tickers(&self) -> Result<Vec<String>> {
        let result: InstrumentsResult = self
            .get(
                "/v5/market/instruments-info",
                &[("category", "spot".to_string())],
                false,
            )
            .await?;
        Ok(result
            .list
            .into_iter()
            .filter(|i| i.status == "Trading")
            .map(|i| i.symbol)
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_ohlcv(
        &self,
        market: &Market,
        timeframe: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>> {
        let interval = map_timeframe(timeframe)?;
        let range = validate_range(start, end)?;

        let mut params = vec![
            ("category", "spot".to_string()),
            ("symbol", self.encode_market(market)),
            ("interval", interval.to_string()),
        ];
        if let Some((start, end)) = range {
            params.push(("start", start.timestamp_millis().to_string()));
            params.push(("end", end.timestamp_millis().to_string()));
        }
        params.push(("limit", http::DEFAULT_KLINE_LIMIT.to_string()));

        let result: KlineResult = self.get("/v5/market/kline", &params, false).await?;
        let bars = result
            .list
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(http::into_ascending(bars))
    }

    #[instrument(skip(self))]
    async fn get_ticker_price(&self, market: &Market) -> Result<Decimal> {
        let result: Result<TickersResult> = self
            .get(
                "/v5/market/tickers",
                &[
                    ("category", "spot".to_string()),
                    ("symbol", self.encode_market(market)),
                ],
                false,
            )
            .await;
        match result {
            Ok(tickers) => match tickers.list.first() {
                Some(ticker) if !ticker.last_price.is_empty() => {
                    parse_decimal(&ticker.last_price, "lastPrice")
                }
                _ => Err(ExchangeError::PriceUnavailable(market.canonical())),
            },
            Err(ExchangeError::Api { message, .. })
                if message.to_lowercase().contains("symbol invalid")
                    || message.to_lowercase().contains("not supported symbols") =>
            {
                Err(ExchangeError::PriceUnavailable(market.canonical()))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_ticker_precision(&self, market: &Market) -> Result<Decimal> {
        let instrument = self.instrument(market).await?;
        parse_decimal(&instrument.lot_size_filter.base_precision, "basePrecision")
    }

    #[instrument(skip(self))]
    async fn get_ticker_min_notional(&self, market: &Market) -> Result<Decimal> {
        let instrument = self.instrument(market).await?;
        parse_decimal(&instrument.lot_size_filter.min_order_amt, "minOrderAmt")
    }

    #[instrument(skip(self))]
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        request.validate()?;

        let body = OrderCreateRequest {
            category: "spot".to_string(),
            symbol: self.encode_market(&request.market),
            side: wire_side(request.side).to_string(),
            order_type: wire_order_type(request.order_type).to_string(),
            qty: format_quantity(request.quantity),
            market_unit: match request.order_type {
                OrderType::Market => Some("baseCoin".to_string()),
                OrderType::Limit => None,
            },
            price: request.price.map(format_quantity),
            time_in_force: request
                .effective_time_in_force()
                .map(|tif| tif.as_str().to_string()),
        };

        let created: OrderCreateResult = self
            .post("/v5/order/create", &serde_json::to_value(&body)?)
            .await?;
        if created.order_id.is_empty() {
            return Err(ExchangeError::InvalidResponse(
                "Order accepted without an order id".to_string(),
            ));
        }

        debug!(
            "Order {} created, waiting {:?} before reading its fills",
            created.order_id, self.settle_delay
        );
        tokio::time::sleep(self.settle_delay).await;

        self.order_detail(&created.order_id)
            .await
            .and_then(|raw| self.normalize_order(raw))
            .map_err(|e| ExchangeError::OrderUnconfirmed {
                order_id: created.order_id.clone(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn get_open_orders(&self, market: Option<Market>) -> Result<Vec<Value>> {
        let mut params = vec![("category", "spot".to_string())];
        if let Some(market) = market {
            params.push(("symbol", self.encode_market(&market)));
        }
        let result: OrderListResult = self.get("/v5/order/realtime", &params, true).await?;
        Ok(result.list)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, market: &Market, order_id: &str) -> Result<Value> {
        let body = serde_json::json!({
            "category": "spot",
            "symbol": self.encode_market(market),
            "orderId": order_id,
        });
        self.post("/v5/order/cancel", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn client() -> BybitClient {
        BybitClient::new(&BybitConfig::default(), &Credentials::new("key", "secret")).unwrap()
    }

    #[test]
    fn test_market_round_trip() {
        let client = client();
        let market = Market::parse("ETHUSDT").unwrap();
        assert_eq!(client.decode_market(&client.encode_market(&market)).unwrap(), market);
    }

    #[test]
    fn test_timeframe_table() {
        assert_eq!(map_timeframe("1h").unwrap(), "60");
        assert_eq!(map_timeframe("1d").unwrap(), "D");
        assert_eq!(map_timeframe("1M").unwrap(), "M");
        assert!(matches!(
            map_timeframe("8h"),
            Err(ExchangeError::UnsupportedTimeframe(_))
        ));
    }

    #[test]
    fn test_normalize_market_buy_converts_fee() {
        let raw = json!({
            "orderId": "1321003749386327552",
            "symbol": "ETHUSDT",
            "side": "Buy",
            "orderType": "Market",
            "avgPrice": "2000",
            "cumExecQty": "0.1",
            "cumExecValue": "200",
            "cumExecFee": "0.0001",
            "createdTime": "1672211918471"
        });
        let order = client().normalize_order(raw.clone()).unwrap();
        assert_eq!(order.side, Side::Buy);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.fee, dec!(0.2));
        assert_eq!(order.quantity, dec!(0.1));
        assert_eq!(order.original_data, raw);
    }

    #[test]
    fn test_normalize_sell_keeps_fee_in_quote() {
        let raw = json!({
            "orderId": "42",
            "symbol": "ETHUSDT",
            "side": "Sell",
            "orderType": "Market",
            "avgPrice": "2000",
            "cumExecQty": "0.1",
            "cumExecValue": "200",
            "cumExecFee": "0.2",
            "createdTime": "1672211918471"
        });
        let order = client().normalize_order(raw).unwrap();
        assert_eq!(order.fee, dec!(0.2));
        assert_eq!(order.side.to_string(), "SELL");
    }
}
