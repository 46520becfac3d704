//! Request signing for the Binance API

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{ExchangeError, Result};
use crate::exchanges::http::encode_query;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Hex-encoded HMAC-SHA256 of a query string
pub fn sign_query(secret: &str, query: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build a signed query string
///
/// `recvWindow` and `timestamp` are appended to `params` before signing,
/// and the signature goes last.
pub fn signed_query(
    secret: &str,
    params: &[(&str, String)],
    recv_window_ms: u64,
    timestamp_ms: i64,
) -> Result<String> {
    let mut all: Vec<(&str, String)> = params.to_vec();
    all.push(("recvWindow", recv_window_ms.to_string()));
    all.push(("timestamp", timestamp_ms.to_string()));

    let query = encode_query(&all);
    let signature = sign_query(secret, &query)?;
    Ok(format!("{}&signature={}", query, signature))
}
