//! HTTP and parsing helpers shared by the exchange adapters

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Response};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::common::errors::{ExchangeError, Result};
use crate::common::types::Bar;

/// Default number of bars requested when no range is given
pub const DEFAULT_KLINE_LIMIT: u32 = 200;

/// Build the HTTP client used by an adapter
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ExchangeError::Configuration(e.to_string()))
}

/// Normalize a configured base URL
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Current Unix timestamp in milliseconds
pub fn timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Read the body of a response, returning it with the status code
pub async fn read_body(response: Response) -> Result<(reqwest::StatusCode, String)> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// Error for a non-success status whose body carried no exchange error
pub fn status_error(status: reqwest::StatusCode, body: &str) -> ExchangeError {
    ExchangeError::InvalidResponse(format!("Server returned status {}: {}", status, body))
}

/// URL-encode query parameters in the given order
pub fn encode_query(params: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Parse a decimal string, accepting scientific notation
pub fn parse_decimal(value: &str, field: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| ExchangeError::InvalidResponse(format!("Invalid {} '{}': {}", field, value, e)))
}

/// Like [`parse_decimal`] but treats an empty string as zero
pub fn parse_decimal_or_zero(value: &str, field: &str) -> Result<Decimal> {
    if value.trim().is_empty() {
        return Ok(Decimal::ZERO);
    }
    parse_decimal(value, field)
}

/// Parse a JSON cell that may be a number or a numeric string
pub fn decimal_from_value(value: &Value, field: &str) -> Result<Decimal> {
    match value {
        Value::String(s) => parse_decimal(s, field),
        Value::Number(n) => parse_decimal(&n.to_string(), field),
        other => Err(ExchangeError::InvalidResponse(format!(
            "Invalid {}: expected number, got {}",
            field, other
        ))),
    }
}

/// Parse a JSON cell holding an integer timestamp (number or string)
pub fn i64_from_value(value: &Value, field: &str) -> Result<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| ExchangeError::InvalidResponse(format!("Invalid {}: {}", field, value)))
}

pub fn datetime_from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("Invalid timestamp: {}", ms)))
}

pub fn datetime_from_secs(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ExchangeError::InvalidResponse(format!("Invalid timestamp: {}", secs)))
}

/// Check that a date range is either complete and ordered or absent
pub fn validate_range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) if start <= end => Ok(Some((start, end))),
        (Some(start), Some(end)) => Err(ExchangeError::InvalidDateRange(format!(
            "start {} is after end {}",
            start, end
        ))),
        _ => Err(ExchangeError::InvalidDateRange(
            "start and end must be given together".to_string(),
        )),
    }
}

/// Sort bars by date and drop duplicate timestamps
pub fn into_ascending(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|bar| bar.date);
    bars.dedup_by_key(|bar| bar.date);
    bars
}

/// Average execution price, zero when nothing was executed
pub fn average_price(quote_quantity: Decimal, quantity: Decimal) -> Decimal {
    if quantity.is_zero() {
        Decimal::ZERO
    } else {
        quote_quantity / quantity
    }
}

/// Decimal formatted for an order payload, without trailing zeros
pub fn format_quantity(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn bar(ms: i64, close: Decimal) -> Bar {
        Bar {
            date: datetime_from_millis(ms).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ONE,
        }
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("0.00100000", "qty").unwrap(), dec!(0.001));
        assert_eq!(parse_decimal("1e-8", "qty").unwrap(), dec!(0.00000001));
        assert!(parse_decimal("", "qty").is_err());
        assert_eq!(parse_decimal_or_zero("", "qty").unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_decimal_from_mixed_cells() {
        assert_eq!(decimal_from_value(&json!("1.5"), "open").unwrap(), dec!(1.5));
        assert_eq!(decimal_from_value(&json!(2), "open").unwrap(), dec!(2));
        assert!(decimal_from_value(&json!(null), "open").is_err());
        assert_eq!(i64_from_value(&json!("1700000000"), "t").unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_validate_range() {
        let now = Utc::now();
        let earlier = now - ChronoDuration::days(1);
        assert!(validate_range(None, None).unwrap().is_none());
        assert!(validate_range(Some(earlier), Some(now)).unwrap().is_some());
        assert!(matches!(
            validate_range(Some(now), None),
            Err(ExchangeError::InvalidDateRange(_))
        ));
        assert!(matches!(
            validate_range(Some(now), Some(earlier)),
            Err(ExchangeError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn test_into_ascending_sorts_and_dedups() {
        let bars = vec![bar(3000, dec!(3)), bar(1000, dec!(1)), bar(2000, dec!(2)), bar(1000, dec!(1))];
        let sorted = into_ascending(bars);
        let closes: Vec<Decimal> = sorted.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![dec!(1), dec!(2), dec!(3)]);
    }

    #[test]
    fn test_encode_query_keeps_order() {
        let query = encode_query(&[("symbol", "ETHUSDT".to_string()), ("limit", "200".to_string())]);
        assert_eq!(query, "symbol=ETHUSDT&limit=200");
    }

    #[test]
    fn test_format_quantity_strips_zeros() {
        assert_eq!(format_quantity(dec!(0.12300)), "0.123");
        assert_eq!(format_quantity(dec!(7.0)), "7");
    }
}
