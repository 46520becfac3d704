//! Exchange adapters and the factory that builds them per user

pub mod binance;
pub mod bybit;
pub mod http;
pub mod kucoin;

use std::sync::Arc;
use std::time::Duration;

use crate::common::errors::Result;
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{Credentials, ExchangeKind};
use crate::config::types::ExchangesConfig;

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use kucoin::KucoinClient;

/// Builds an adapter for one user's account
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        kind: ExchangeKind,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>>;
}

/// Factory talking to the real exchange endpoints
#[derive(Debug, Clone)]
pub struct LiveAdapterFactory {
    config: ExchangesConfig,
    quote_asset: String,
    timeout: Duration,
}

impl LiveAdapterFactory {
    pub fn new(config: ExchangesConfig, quote_asset: &str, timeout: Duration) -> Self {
        Self {
            config,
            quote_asset: quote_asset.to_string(),
            timeout,
        }
    }
}

impl AdapterFactory for LiveAdapterFactory {
    fn create(
        &self,
        kind: ExchangeKind,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ExchangeAdapter>> {
        let adapter: Arc<dyn ExchangeAdapter> = match kind {
            ExchangeKind::Binance => Arc::new(
                BinanceClient::with_timeout(&self.config.binance, credentials, self.timeout)?
                    .with_quote_asset(&self.quote_asset),
            ),
            ExchangeKind::Bybit => Arc::new(
                BybitClient::with_timeout(&self.config.bybit, credentials, self.timeout)?
                    .with_quote_asset(&self.quote_asset),
            ),
            ExchangeKind::Kucoin => Arc::new(
                KucoinClient::with_timeout(&self.config.kucoin, credentials, self.timeout)?
                    .with_quote_asset(&self.quote_asset),
            ),
        };
        Ok(adapter)
    }
}
