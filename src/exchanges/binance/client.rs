//! Binance spot adapter

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::auth::{signed_query, API_KEY_HEADER};
use super::messages::*;
use crate::common::errors::{ExchangeError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{
    AssetBalance, Bar, Credentials, ExchangeKind, Market, OrderRequest, OrderResult,
    DEFAULT_QUOTE,
};
use crate::config::types::BinanceConfig;
use crate::exchanges::http::{
    self, average_price, build_client, decimal_from_value, encode_query, format_quantity,
    i64_from_value, parse_decimal, read_body, status_error, validate_range,
};

const TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Map a canonical timeframe to a Binance kline interval
pub fn map_timeframe(timeframe: &str) -> Result<&'static str> {
    TIMEFRAMES
        .iter()
        .find(|tf| **tf == timeframe)
        .copied()
        .ok_or_else(|| ExchangeError::UnsupportedTimeframe(timeframe.to_string()))
}

/// Binance spot account adapter
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
    quote_asset: String,
}

impl BinanceClient {
    /// Create a new client with the default 30 second timeout
    pub fn new(config: &BinanceConfig, credentials: &Credentials) -> Result<Self> {
        Self::with_timeout(config, credentials, Duration::from_secs(30))
    }

    /// Create a new client with a custom timeout
    pub fn with_timeout(
        config: &BinanceConfig,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(ExchangeError::Authentication(
                "Binance requires api_key and api_secret".to_string(),
            ));
        }

        Ok(Self {
            client: build_client(timeout)?,
            base_url: http::normalize_base_url(&config.rest_url),
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            recv_window_ms: config.recv_window_ms,
            quote_asset: DEFAULT_QUOTE.to_string(),
        })
    }

    /// Use another stablecoin as quote asset
    pub fn with_quote_asset(mut self, quote: &str) -> Self {
        self.quote_asset = quote.to_uppercase();
        self
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, encode_query(params))
        };
        debug!("Fetching {}", url);

        let response = self.client.get(&url).send().await?;
        let body = Self::handle_response(response).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value> {
        let query = signed_query(
            &self.api_secret,
            params,
            self.recv_window_ms,
            http::timestamp_ms(),
        )?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!("Signed {} {}", method, path);

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: Response) -> Result<Value> {
        let (status, body) = read_body(response).await?;
        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<BinanceErrorBody>(&body) {
                return Err(map_api_error(err));
            }
            return Err(status_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn symbol_info(&self, market: &Market) -> Result<SymbolInfo> {
        let info: ExchangeInfo = self
            .public_get(
                "/api/v3/exchangeInfo",
                &[("symbol", self.encode_market(market))],
            )
            .await?;
        info.symbols
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::InvalidMarket(market.canonical()))
    }

    async fn normalize_order(&self, raw: Value) -> Result<OrderResult> {
        let response: OrderResponse = serde_json::from_value(raw.clone())?;

        let market = self.decode_market(&response.symbol)?;
        let quantity = parse_decimal(&response.executed_qty, "executedQty")?;
        let quote_quantity = parse_decimal(&response.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let fee = self.fee_in_quote(&market, &response.fills).await?;

        Ok(OrderResult {
            exchange_order_id: response.order_id.to_string(),
            datetime: http::datetime_from_millis(response.transact_time)?,
            market,
            side: response.side.parse()?,
            order_type: response.order_type.parse()?,
            quantity,
            quote_quantity,
            fee,
            price: average_price(quote_quantity, quantity),
            original_data: raw,
        })
    }

    /// Sum fill commissions converted to the quote asset
    async fn fee_in_quote(&self, market: &Market, fills: &[Fill]) -> Result<Decimal> {
        let mut fee = Decimal::ZERO;
        for fill in fills {
            let commission = parse_decimal(&fill.commission, "commission")?;
            if commission.is_zero() {
                continue;
            }
            let asset = fill.commission_asset.to_uppercase();
            if asset == market.quote {
                fee += commission;
            } else if asset == market.base {
                fee += commission * parse_decimal(&fill.price, "fill price")?;
            } else {
                let fee_market = Market::new(asset.as_str(), market.quote.as_str());
                match self.get_ticker_price(&fee_market).await {
                    Ok(price) => fee += commission * price,
                    Err(e) => warn!("Cannot convert {} {} fee to quote: {}", commission, asset, e),
                }
            }
        }
        Ok(fee)
    }
}

fn map_api_error(err: BinanceErrorBody) -> ExchangeError {
    match err.code {
        -2014 | -2015 | -1022 => ExchangeError::Authentication(err.msg),
        _ => ExchangeError::Api {
            code: err.code.to_string(),
            message: err.msg,
        },
    }
}

fn parse_kline(row: &[Value]) -> Result<Bar> {
    if row.len() < 6 {
        return Err(ExchangeError::InvalidResponse(format!(
            "Kline has {} cells, expected at least 6",
            row.len()
        )));
    }
    Ok(Bar {
        date: http::datetime_from_millis(i64_from_value(&row[0], "open time")?)?,
        open: decimal_from_value(&row[1], "open")?,
        high: decimal_from_value(&row[2], "high")?,
        low: decimal_from_value(&row[3], "low")?,
        close: decimal_from_value(&row[4], "close")?,
        volume: decimal_from_value(&row[5], "volume")?,
    })
}

#[async_trait]
impl ExchangeAdapter for BinanceClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Binance
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
        self.signed_request(Method::GET, "/sapi/v1/account/apiRestrictions", &[])
            .await
    }

    #[instrument(skip(self))]
    async fn is_spot_trading_enabled(&self) -> Result<bool> {
        let info = self.get_api_key_information().await?;
        info.get("enableSpotAndMarginTrading")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                ExchangeError::InvalidResponse(
                    "apiRestrictions has no enableSpotAndMarginTrading".to_string(),
                )
            })
    }

    #[instrument(skip(self))]
    async fn get_balance_assets(&self) -> Result<Vec<AssetBalance>> {
        let raw = self
            .signed_request(Method::POST, "/sapi/v3/asset/getUserAsset", &[])
            .await?;
        let assets: Vec<UserAsset> = serde_json::from_value(raw)?;

        let mut balances = Vec::with_capacity(assets.len());
        for asset in assets {
            let free = parse_decimal(&asset.free, "free")?;
            let locked = parse_decimal(&asset.locked, "locked")?;
            let total = free + locked;
            if total > Decimal::ZERO {
                balances.push(AssetBalance::new(asset.asset.to_uppercase(), total, free));
            }
        }
        Ok(balances)
    }

    #[instrument(skip(self))]
    async fn get_tickers(&self) -> Result<Vec<String>> {
        let info: ExchangeInfo = self.public_get("/api/v3/exchangeInfo", &[]).await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
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
            ("symbol", self.encode_market(market)),
            ("interval", interval.to_string()),
        ];
        if let Some((start, end)) = range {
            params.push(("startTime", start.timestamp_millis().to_string()));
            params.push(("endTime", end.timestamp_millis().to_string()));
        }
        params.push(("limit", http::DEFAULT_KLINE_LIMIT.to_string()));

        let rows: Vec<Vec<Value>> = self.public_get("/api/v3/klines", &params).await?;
        let bars = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(http::into_ascending(bars))
    }

    #[instrument(skip(self))]
    async fn get_ticker_price(&self, market: &Market) -> Result<Decimal> {
        let result: Result<TickerPrice> = self
            .public_get("/api/v3/ticker/price", &[("symbol", self.encode_market(market))])
            .await;
        match result {
            Ok(ticker) => parse_decimal(&ticker.price, "price"),
            Err(ExchangeError::Api { code, .. }) if code == INVALID_SYMBOL_CODE.to_string() => {
                Err(ExchangeError::PriceUnavailable(market.canonical()))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_ticker_precision(&self, market: &Market) -> Result<Decimal> {
        let info = self.symbol_info(market).await?;
        let step = info
            .filter("LOT_SIZE")
            .and_then(|f| f.get("stepSize"))
            .ok_or_else(|| {
                ExchangeError::InvalidResponse(format!("No LOT_SIZE filter for {}", market))
            })?;
        decimal_from_value(step, "stepSize")
    }

    #[instrument(skip(self))]
    async fn get_ticker_min_notional(&self, market: &Market) -> Result<Decimal> {
        let info = self.symbol_info(market).await?;
        let min_notional = info
            .filter("NOTIONAL")
            .or_else(|| info.filter("MIN_NOTIONAL"))
            .and_then(|f| f.get("minNotional"))
            .ok_or_else(|| {
                ExchangeError::InvalidResponse(format!("No NOTIONAL filter for {}", market))
            })?;
        decimal_from_value(min_notional, "minNotional")
    }

    #[instrument(skip(self))]
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        request.validate()?;

        let mut params = vec![
            ("symbol", self.encode_market(&request.market)),
            ("side", request.side.to_string()),
            ("type", request.order_type.to_string()),
            ("quantity", format_quantity(request.quantity)),
        ];
        if let Some(tif) = request.effective_time_in_force() {
            params.push(("timeInForce", tif.as_str().to_string()));
        }
        if let Some(price) = request.price {
            params.push(("price", format_quantity(price)));
        }
        params.push(("newOrderRespType", "FULL".to_string()));

        let raw = self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await?;
        let order_id = raw
            .get("orderId")
            .map(|id| id.to_string())
            .unwrap_or_default();
        self.normalize_order(raw)
            .await
            .map_err(|e| ExchangeError::OrderUnconfirmed {
                order_id,
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn get_open_orders(&self, market: Option<Market>) -> Result<Vec<Value>> {
        let params: Vec<(&str, String)> = market
            .map(|m| vec![("symbol", self.encode_market(&m))])
            .unwrap_or_default();
        let raw = self
            .signed_request(Method::GET, "/api/v3/openOrders", &params)
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, market: &Market, order_id: &str) -> Result<Value> {
        self.signed_request(
            Method::DELETE,
            "/api/v3/order",
            &[
                ("symbol", self.encode_market(market)),
                ("orderId", order_id.to_string()),
            ],
        )
        .await
    }
}
