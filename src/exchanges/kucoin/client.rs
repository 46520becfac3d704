//! KuCoin spot adapter for sub-account trading keys

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};

use super::auth::generate_auth_headers;
use super::messages::*;
use crate::common::errors::{ExchangeError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{
    AssetBalance, Bar, Credentials, ExchangeKind, Market, OrderRequest, OrderResult, DEFAULT_QUOTE,
};
use crate::config::types::KucoinConfig;
use crate::exchanges::http::{
    self, average_price, build_client, encode_query, format_quantity, parse_decimal, read_body,
    status_error, validate_range,
};

/// Error code for an unknown trading pair
const UNKNOWN_PAIR_CODE: &str = "900001";

static CLIENT_OID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Map a canonical timeframe to a KuCoin candle type
pub fn map_timeframe(timeframe: &str) -> Result<&'static str> {
    let kline_type = match timeframe {
        "1m" => "1min",
        "3m" => "3min",
        "5m" => "5min",
        "15m" => "15min",
        "30m" => "30min",
        "1h" => "1hour",
        "2h" => "2hour",
        "4h" => "4hour",
        "6h" => "6hour",
        "12h" => "12hour",
        "1d" => "1day",
        "1w" => "1week",
        other => return Err(ExchangeError::UnsupportedTimeframe(other.to_string())),
    };
    Ok(kline_type)
}

/// Which key pair signs a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signer {
    Public,
    Trading,
    /// Main account, needed to read sub-account API keys
    Main,
}

#[derive(Debug, Clone)]
struct KeyPair {
    api_key: String,
    api_secret: String,
    passphrase: String,
}

/// KuCoin spot adapter
///
/// Trading keys belong to a sub-account; the main account keys are only
/// used to look up the sub-account key's permissions.
#[derive(Debug, Clone)]
pub struct KucoinClient {
    client: Client,
    base_url: String,
    trading: KeyPair,
    main: KeyPair,
    subaccount: String,
    settle_delay: Duration,
    quote_asset: String,
}

impl KucoinClient {
    /// Create a new client with the default 30 second timeout
    pub fn new(config: &KucoinConfig, credentials: &Credentials) -> Result<Self> {
        Self::with_timeout(config, credentials, Duration::from_secs(30))
    }

    /// Create a new client with a custom timeout
    pub fn with_timeout(
        config: &KucoinConfig,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| -> Result<String> {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ExchangeError::Authentication(format!("KuCoin requires {}", name)))
        };

        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(ExchangeError::Authentication(
                "KuCoin requires api_key and api_secret".to_string(),
            ));
        }

        let trading = KeyPair {
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            passphrase: required(&credentials.api_passphrase, "api_passphrase")?,
        };
        let subaccount = required(&credentials.subaccount, "subaccount")?;
        let main = KeyPair {
            api_key: required(&credentials.main_api_key, "main_api_key")?,
            api_secret: required(&credentials.main_api_secret, "main_api_secret")?,
            passphrase: required(&credentials.main_api_passphrase, "main_api_passphrase")?,
        };

        Ok(Self {
            client: build_client(timeout)?,
            base_url: http::normalize_base_url(&config.rest_url),
            trading,
            main,
            subaccount,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            quote_asset: DEFAULT_QUOTE.to_string(),
        })
    }

    /// Use another stablecoin as quote asset
    pub fn with_quote_asset(mut self, quote: &str) -> Self {
        self.quote_asset = quote.to_uppercase();
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        body: Option<&Value>,
        signer: Signer,
    ) -> Result<T> {
        let endpoint = if params.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, encode_query(params))
        };
        let url = format!("{}{}", self.base_url, endpoint);
        let payload = match body {
            Some(body) => serde_json::to_string(body)?,
            None => String::new(),
        };
        debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        let keys = match signer {
            Signer::Public => None,
            Signer::Trading => Some(&self.trading),
            Signer::Main => Some(&self.main),
        };
        if let Some(keys) = keys {
            let headers = generate_auth_headers(
                &keys.api_key,
                &keys.api_secret,
                &keys.passphrase,
                method.as_str(),
                &endpoint,
                &payload,
            )?;
            request = headers.apply_to_request(request);
        }
        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(payload);
        }

        let response = request.send().await?;
        let data = Self::unwrap_envelope(response).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn unwrap_envelope(response: reqwest::Response) -> Result<Value> {
        let (status, body) = read_body(response).await?;
        let envelope = match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => return Err(status_error(status, &body)),
            Err(e) => return Err(e.into()),
        };
        if envelope.code == SUCCESS_CODE {
            return Ok(envelope.data);
        }
        let message = envelope.msg.unwrap_or_default();
        match envelope.code.as_str() {
            "400001" | "400002" | "400003" | "400004" | "400005" => {
                Err(ExchangeError::Authentication(message))
            }
            "400007" => Err(ExchangeError::PermissionDenied(message)),
            code => Err(ExchangeError::Api {
                code: code.to_string(),
                message,
            }),
        }
    }

    async fn symbols(&self) -> Result<Vec<SymbolEntry>> {
        self.request(Method::GET, "/api/v2/symbols", &[], None, Signer::Public)
            .await
    }

    async fn symbol_entry(&self, market: &Market) -> Result<SymbolEntry> {
        let wire = self.encode_market(market);
        self.symbols()
            .await?
            .into_iter()
            .find(|s| s.symbol == wire)
            .ok_or_else(|| ExchangeError::InvalidMarket(market.canonical()))
    }

    fn normalize_order(&self, raw: Value) -> Result<OrderResult> {
        let detail: OrderDetail = serde_json::from_value(raw.clone())?;
        let market = self.decode_market(&detail.symbol)?;

        let quantity = parse_decimal(&detail.deal_size, "dealSize")?;
        let quote_quantity = parse_decimal(&detail.deal_funds, "dealFunds")?;
        let price = average_price(quote_quantity, quantity);
        let mut fee = parse_decimal(&detail.fee, "fee")?;
        if detail.fee_currency.eq_ignore_ascii_case(&market.base) {
            fee *= price;
        }

        Ok(OrderResult {
            exchange_order_id: detail.id,
            datetime: http::datetime_from_millis(detail.created_at)?,
            market,
            side: detail.side.parse()?,
            order_type: detail.order_type.parse()?,
            quantity,
            quote_quantity,
            fee,
            price,
            original_data: raw,
        })
    }
}

fn next_client_oid() -> String {
    let seq = CLIENT_OID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("rb{}{:06}", http::timestamp_ms(), seq % 1_000_000)
}

/// Candle cells are `[time(s), open, close, high, low, volume, turnover]`
fn parse_candle(row: &[String]) -> Result<Bar> {
    if row.len() < 6 {
        return Err(ExchangeError::InvalidResponse(format!(
            "Candle has {} cells, expected at least 6",
            row.len()
        )));
    }
    let start: i64 = row[0]
        .parse()
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid candle time: {}", e)))?;
    Ok(Bar {
        date: http::datetime_from_secs(start)?,
        open: parse_decimal(&row[1], "open")?,
        close: parse_decimal(&row[2], "close")?,
        high: parse_decimal(&row[3], "high")?,
        low: parse_decimal(&row[4], "low")?,
        volume: parse_decimal(&row[5], "volume")?,
    })
}

#[async_trait]
impl ExchangeAdapter for KucoinClient {
    fn kind(&self) -> ExchangeKind {
        ExchangeKind::Kucoin
    }

    fn quote_asset(&self) -> String {
        self.quote_asset.clone()
    }

    fn encode_market(&self, market: &Market) -> String {
        format!("{}-{}", market.base, market.quote)
    }

    fn decode_market(&self, raw: &str) -> Result<Market> {
        Market::parse(raw)
    }

    #[instrument(skip(self))]
    async fn get_api_key_information(&self) -> Result<Value> {
        let keys: Vec<Value> = self
            .request(
                Method::GET,
                "/api/v1/sub/api-key",
                &[
                    ("subName", self.subaccount.clone()),
                    ("apiKey", self.trading.api_key.clone()),
                ],
                None,
                Signer::Main,
            )
            .await?;
        keys.into_iter()
            .find(|k| k.get("apiKey").and_then(Value::as_str) == Some(self.trading.api_key.as_str()))
            .ok_or_else(|| {
                ExchangeError::Authentication(format!(
                    "API key not found in subaccount {}",
                    self.subaccount
                ))
            })
    }

    #[instrument(skip(self))]
    async fn is_spot_trading_enabled(&self) -> Result<bool> {
        let info: SubApiKey = serde_json::from_value(self.get_api_key_information().await?)?;
        Ok(info.permission.split(',').any(|p| p.trim() == "Spot"))
    }

    #[instrument(skip(self))]
    async fn get_balance_assets(&self) -> Result<Vec<AssetBalance>> {
        let accounts: Vec<AccountEntry> = self
            .request(
                Method::GET,
                "/api/v1/accounts",
                &[("type", "trade".to_string())],
                None,
                Signer::Trading,
            )
            .await?;

        let mut balances = Vec::new();
        for account in accounts {
            let total = parse_decimal(&account.balance, "balance")?;
            if total <= Decimal::ZERO {
                continue;
            }
            let free = parse_decimal(&account.available, "available")?;
            balances.push(AssetBalance::new(account.currency.to_uppercase(), total, free));
        }
        Ok(balances)
    }

    #[instrument(skip(self))]
    async fn get_tickers(&self) -> Result<Vec<String>> {
        Ok(self
            .symbols()
            .await?
            .into_iter()
            .filter(|s| s.enable_trading)
            .filter_map(|s| self.decode_market(&s.symbol).ok())
            .map(|m| m.canonical())
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
        let kline_type = map_timeframe(timeframe)?;
        let range = validate_range(start, end)?;

        let mut params = vec![
            ("symbol", self.encode_market(market)),
            ("type", kline_type.to_string()),
        ];
        if let Some((start, end)) = range {
            params.push(("startAt", start.timestamp().to_string()));
            params.push(("endAt", end.timestamp().to_string()));
        }

        let rows: Vec<Vec<String>> = self
            .request(Method::GET, "/api/v1/market/candles", &params, None, Signer::Public)
            .await?;
        let bars = rows
            .iter()
            .map(|row| parse_candle(row))
            .collect::<Result<Vec<_>>>()?;
        Ok(http::into_ascending(bars))
    }

    #[instrument(skip(self))]
    async fn get_ticker_price(&self, market: &Market) -> Result<Decimal> {
        let result: Result<Option<Level1>> = self
            .request(
                Method::GET,
                "/api/v1/market/orderbook/level1",
                &[("symbol", self.encode_market(market))],
                None,
                Signer::Public,
            )
            .await;
        match result {
            Ok(Some(Level1 { price: Some(price) })) => parse_decimal(&price, "price"),
            Ok(_) => Err(ExchangeError::PriceUnavailable(market.canonical())),
            Err(ExchangeError::Api { code, .. }) if code == UNKNOWN_PAIR_CODE => {
                Err(ExchangeError::PriceUnavailable(market.canonical()))
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn get_ticker_precision(&self, market: &Market) -> Result<Decimal> {
        let entry = self.symbol_entry(market).await?;
        parse_decimal(&entry.base_increment, "baseIncrement")
    }

    #[instrument(skip(self))]
    async fn get_ticker_min_notional(&self, market: &Market) -> Result<Decimal> {
        let entry = self.symbol_entry(market).await?;
        parse_decimal(&entry.quote_min_size, "quoteMinSize")
    }

    #[instrument(skip(self))]
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResult> {
        request.validate()?;

        let body = OrderCreateRequest {
            client_oid: next_client_oid(),
            side: request.side.to_string().to_lowercase(),
            symbol: self.encode_market(&request.market),
            order_type: request.order_type.to_string().to_lowercase(),
            size: format_quantity(request.quantity),
            price: request.price.map(format_quantity),
            time_in_force: request
                .effective_time_in_force()
                .map(|tif| tif.as_str().to_string()),
        };

        let created: OrderCreated = self
            .request(
                Method::POST,
                "/api/v1/orders",
                &[],
                Some(&serde_json::to_value(&body)?),
                Signer::Trading,
            )
            .await?;

        debug!(
            "Order {} created, waiting {:?} before reading its fills",
            created.order_id, self.settle_delay
        );
        tokio::time::sleep(self.settle_delay).await;

        let detail: Result<Value> = self
            .request(
                Method::GET,
                &format!("/api/v1/orders/{}", created.order_id),
                &[],
                None,
                Signer::Trading,
            )
            .await;
        detail
            .and_then(|raw| self.normalize_order(raw))
            .map_err(|e| ExchangeError::OrderUnconfirmed {
                order_id: created.order_id.clone(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    async fn get_open_orders(&self, market: Option<Market>) -> Result<Vec<Value>> {
        let mut params = vec![("status", "active".to_string())];
        if let Some(market) = market {
            params.push(("symbol", self.encode_market(&market)));
        }
        let page: Page = self
            .request(Method::GET, "/api/v1/orders", &params, None, Signer::Trading)
            .await?;
        Ok(page.items)
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, _market: &Market, order_id: &str) -> Result<Value> {
        self.request(
            Method::DELETE,
            &format!("/api/v1/orders/{}", order_id),
            &[],
            None,
            Signer::Trading,
        )
        .await
    }
}
