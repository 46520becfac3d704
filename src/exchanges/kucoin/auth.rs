//! Authentication utilities for the KuCoin API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{ExchangeError, Result};

type HmacSha256 = Hmac<Sha256>;

/// API key version whose passphrase is sent signed
pub const KEY_VERSION: &str = "2";

fn hmac_base64(secret: &str, message: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Base64 HMAC-SHA256 of `timestamp + METHOD + endpoint + body`
///
/// # Arguments
/// * `endpoint` - Path including the query string
/// * `body` - JSON body, empty for GET and DELETE
pub fn sign_request(
    secret: &str,
    timestamp_ms: i64,
    method: &str,
    endpoint: &str,
    body: &str,
) -> Result<String> {
    let message = format!("{}{}{}{}", timestamp_ms, method.to_uppercase(), endpoint, body);
    hmac_base64(secret, &message)
}

/// Passphrase signed with the secret, as required by key version 2
pub fn sign_passphrase(secret: &str, passphrase: &str) -> Result<String> {
    hmac_base64(secret, passphrase)
}

/// Generate authentication headers for a request
pub fn generate_auth_headers(
    api_key: &str,
    api_secret: &str,
    passphrase: &str,
    method: &str,
    endpoint: &str,
    body: &str,
) -> Result<AuthHeaders> {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let signature = sign_request(api_secret, timestamp, method, endpoint, body)?;

    Ok(AuthHeaders {
        api_key: api_key.to_string(),
        signature,
        timestamp,
        passphrase: sign_passphrase(api_secret, passphrase)?,
    })
}

/// Authentication headers for KuCoin requests
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub api_key: String,
    pub signature: String,
    pub timestamp: i64,
    /// Signed passphrase
    pub passphrase: String,
}

impl AuthHeaders {
    /// Add authentication headers to a reqwest RequestBuilder
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("KC-API-KEY", &self.api_key)
            .header("KC-API-SIGN", &self.signature)
            .header("KC-API-TIMESTAMP", self.timestamp.to_string())
            .header("KC-API-PASSPHRASE", &self.passphrase)
            .header("KC-API-KEY-VERSION", KEY_VERSION)
    }
}
