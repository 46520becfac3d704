//! Point-in-time view of a user's portfolio assets

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::common::errors::{ExchangeError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{Market, PortfolioConfig};

/// One portfolio asset as seen at capture time
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPosition {
    pub free_qty: Decimal,
    pub price: Decimal,
    /// `free_qty * price`
    pub usd_value: Decimal,
}

/// Balances and prices of the configured assets, captured once per user
///
/// Every market of the user's cycle is sized against the same snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioSnapshot {
    pub quote: String,
    positions: HashMap<String, AssetPosition>,
    /// Sum of the portfolio assets' USD values
    pub worth: Decimal,
}

impl PortfolioSnapshot {
    /// Capture the configured bases and the quote asset
    ///
    /// Balances come from a single `get_balance_assets` call. An asset
    /// without a price is kept at zero value.
    pub async fn capture(
        exchange: &dyn ExchangeAdapter,
        configs: &[PortfolioConfig],
        quote: &str,
    ) -> Result<Self> {
        let quote = quote.to_uppercase();
        let balances = exchange.get_balance_assets().await?;

        let mut assets: Vec<String> = configs.iter().map(|c| c.base.to_uppercase()).collect();
        assets.push(quote.clone());
        assets.sort();
        assets.dedup();

        let mut positions = HashMap::with_capacity(assets.len());
        for asset in assets {
            let free_qty = balances
                .iter()
                .find(|b| b.symbol.eq_ignore_ascii_case(&asset))
                .map(|b| b.free_qty)
                .unwrap_or(Decimal::ZERO);

            let price = if asset == quote {
                Decimal::ONE
            } else {
                let market = Market::new(asset.as_str(), quote.as_str());
                match exchange.get_ticker_price(&market).await {
                    Ok(price) => price,
                    Err(ExchangeError::PriceUnavailable(_)) => {
                        warn!("No price for {}, valuing it at zero", market);
                        Decimal::ZERO
                    }
                    Err(e) => return Err(e),
                }
            };

            positions.insert(
                asset,
                AssetPosition {
                    free_qty,
                    price,
                    usd_value: free_qty * price,
                },
            );
        }

        let worth = positions.values().map(|p| p.usd_value).sum();
        debug!("Captured snapshot worth {} over {} assets", worth, positions.len());

        Ok(Self {
            quote,
            positions,
            worth,
        })
    }

    /// Build a snapshot from known positions
    pub fn from_positions(quote: &str, positions: HashMap<String, AssetPosition>) -> Self {
        let worth = positions.values().map(|p| p.usd_value).sum();
        Self {
            quote: quote.to_uppercase(),
            positions,
            worth,
        }
    }

    pub fn position(&self, asset: &str) -> Option<&AssetPosition> {
        self.positions.get(&asset.to_uppercase())
    }

    /// Free quantity of an asset, zero when not part of the snapshot
    pub fn free_qty(&self, asset: &str) -> Decimal {
        self.position(asset).map(|p| p.free_qty).unwrap_or(Decimal::ZERO)
    }

    /// USD value of an asset, zero when not part of the snapshot
    pub fn usd_value(&self, asset: &str) -> Decimal {
        self.position(asset).map(|p| p.usd_value).unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockExchangeAdapter;
    use crate::common::types::AssetBalance;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    fn config(id: i64, base: &str) -> PortfolioConfig {
        PortfolioConfig {
            portfolio_config_id: id,
            base: base.to_string(),
            quote: "USDT".to_string(),
            weight: dec!(0.2),
            strategy: "hold".to_string(),
            active: true,
        }
    }

    #[tokio::test]
    async fn test_capture_values_configured_assets_only() {
        let mut exchange = MockExchangeAdapter::new();
        exchange.expect_get_balance_assets().times(1).returning(|| {
            Ok(vec![
                AssetBalance::new("USDT", dec!(850), dec!(850)),
                AssetBalance::new("ETH", dec!(0.075), dec!(0.075)),
                AssetBalance::new("DOGE", dec!(1000), dec!(1000)),
            ])
        });
        exchange
            .expect_get_ticker_price()
            .with(eq(Market::new("ETH", "USDT")))
            .times(1)
            .returning(|_| Ok(dec!(2000)));
        exchange
            .expect_get_ticker_price()
            .with(eq(Market::new("BTC", "USDT")))
            .times(1)
            .returning(|_| Ok(dec!(40000)));

        let configs = vec![config(1, "ETH"), config(2, "BTC")];
        let snapshot = PortfolioSnapshot::capture(&exchange, &configs, "USDT")
            .await
            .unwrap();

        assert_eq!(snapshot.worth, dec!(1000));
        assert_eq!(snapshot.usd_value("ETH"), dec!(150));
        assert_eq!(snapshot.free_qty("BTC"), Decimal::ZERO);
        assert!(snapshot.position("DOGE").is_none());
    }

    #[tokio::test]
    async fn test_capture_values_unpriced_asset_at_zero() {
        let mut exchange = MockExchangeAdapter::new();
        exchange.expect_get_balance_assets().returning(|| {
            Ok(vec![
                AssetBalance::new("USDT", dec!(100), dec!(100)),
                AssetBalance::new("LUNA", dec!(5), dec!(5)),
            ])
        });
        exchange
            .expect_get_ticker_price()
            .returning(|m| Err(ExchangeError::PriceUnavailable(m.canonical())));

        let snapshot = PortfolioSnapshot::capture(&exchange, &[config(1, "LUNA")], "USDT")
            .await
            .unwrap();
        assert_eq!(snapshot.worth, dec!(100));
        assert_eq!(snapshot.free_qty("LUNA"), dec!(5));
    }
}
