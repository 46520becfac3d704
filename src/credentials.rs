//! Credential decoding
//!
//! Account connections store the exchange keys as a JSON dictionary,
//! normally encrypted as a Fernet token with the deployment's key.

use fernet::Fernet;
use tracing::warn;

use crate::common::errors::{RebalanceError, RebalanceResult};
use crate::common::traits::CredentialStore;
use crate::common::types::Credentials;
use crate::config::types::CredentialsConfig;

fn parse_credentials(json: &str) -> RebalanceResult<Credentials> {
    let credentials: Credentials = serde_json::from_str(json)
        .map_err(|e| RebalanceError::Credentials(format!("unreadable credentials: {}", e)))?;
    if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
        return Err(RebalanceError::Credentials(
            "api_key and api_secret are required".to_string(),
        ));
    }
    Ok(credentials)
}

/// Reads credential blobs stored as the plain JSON dictionary
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCredentialStore;

impl CredentialStore for JsonCredentialStore {
    fn decrypt(&self, blob: &str) -> RebalanceResult<Credentials> {
        parse_credentials(blob)
    }
}

/// Decrypts Fernet tokens holding the JSON dictionary
pub struct FernetCredentialStore {
    fernet: Fernet,
}

impl FernetCredentialStore {
    /// `key` is the url-safe base64 encoded 32 byte Fernet key
    pub fn new(key: &str) -> RebalanceResult<Self> {
        let fernet = Fernet::new(key.trim()).ok_or_else(|| {
            RebalanceError::Configuration("encryption key is not a valid Fernet key".to_string())
        })?;
        Ok(Self { fernet })
    }

    /// Decrypt a token to its plaintext
    pub fn decrypt_text(&self, token: &str) -> RebalanceResult<String> {
        let plain = self.fernet.decrypt(token.trim()).map_err(|_| {
            RebalanceError::Credentials("token could not be decrypted with the configured key".to_string())
        })?;
        String::from_utf8(plain)
            .map_err(|e| RebalanceError::Credentials(format!("decrypted credentials are not UTF-8: {}", e)))
    }

    /// Encrypt a plaintext, used to provision connections
    pub fn encrypt_text(&self, plain: &str) -> String {
        self.fernet.encrypt(plain.as_bytes())
    }
}

impl CredentialStore for FernetCredentialStore {
    fn decrypt(&self, blob: &str) -> RebalanceResult<Credentials> {
        parse_credentials(&self.decrypt_text(blob)?)
    }
}

/// Pick the credential store for the configured key
///
/// Without a key the blobs are read as plain JSON.
pub fn from_config(config: &CredentialsConfig) -> RebalanceResult<Box<dyn CredentialStore>> {
    match config.encryption_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(key) => Ok(Box::new(FernetCredentialStore::new(key)?)),
        None => {
            warn!("No encryption key configured, reading credentials as plain JSON");
            Ok(Box::new(JsonCredentialStore))
        }
    }
}
