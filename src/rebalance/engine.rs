//! Per-market rebalancing for one user

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use super::decision::{decide, Anomaly, CycleState, Decision, MarketOutcome, MarketReport};
use super::quantity::{buy_delta, relative_size, sell_delta, target_quantity, truncate_to_step};
use super::snapshot::PortfolioSnapshot;
use crate::common::errors::{ExchangeError, RebalanceError, RebalanceResult};
use crate::common::traits::{ExchangeAdapter, Notifier, Persistence};
use crate::common::types::{
    ActiveUser, EnrichedOrder, Market, Notification, OrderRequest, OrderResult, PortfolioConfig,
    Side,
};
use crate::config::types::{InsufficientFundsPolicy, RebalanceSettings};
use crate::notify::json_to_html;
use crate::strategy::StrategyRegistry;

/// Drives each configured market of one user from signal to report
pub struct RebalanceEngine {
    exchange: Arc<dyn ExchangeAdapter>,
    persistence: Arc<dyn Persistence>,
    notifier: Arc<dyn Notifier>,
    strategies: Arc<StrategyRegistry>,
    settings: Arc<RebalanceSettings>,
}

impl RebalanceEngine {
    pub fn new(
        exchange: Arc<dyn ExchangeAdapter>,
        persistence: Arc<dyn Persistence>,
        notifier: Arc<dyn Notifier>,
        strategies: Arc<StrategyRegistry>,
        settings: Arc<RebalanceSettings>,
    ) -> Self {
        Self {
            exchange,
            persistence,
            notifier,
            strategies,
            settings,
        }
    }

    /// Run every configuration in order against one snapshot
    ///
    /// Stops at the first persistence failure.
    pub async fn run_markets(
        &self,
        user: &ActiveUser,
        configs: &[PortfolioConfig],
        snapshot: &PortfolioSnapshot,
    ) -> RebalanceResult<Vec<MarketReport>> {
        let mut reports = Vec::with_capacity(configs.len());
        for config in configs {
            reports.push(self.run_market(user, config, snapshot).await?);
        }
        Ok(reports)
    }

    /// Rebalance a single market
    ///
    /// Anomalies and order failures end up in the report. Only a failure
    /// to persist a placed order is returned as an error.
    #[instrument(skip(self, user, snapshot), fields(user_id = user.user_id, config_id = config.portfolio_config_id))]
    pub async fn run_market(
        &self,
        user: &ActiveUser,
        config: &PortfolioConfig,
        snapshot: &PortfolioSnapshot,
    ) -> RebalanceResult<MarketReport> {
        let market = match config.market() {
            Ok(market) => market,
            Err(e) => {
                let report = MarketReport::new(
                    config.portfolio_config_id,
                    Market::new(config.base.as_str(), config.quote.as_str()),
                );
                warn!("Skipping configuration with invalid market: {}", e);
                return Ok(report.skip(Anomaly::SizingFailed {
                    reason: e.to_string(),
                }));
            }
        };
        let mut report = MarketReport::new(config.portfolio_config_id, market.clone());

        // Signal
        let signal = match self.fetch_signal(&market, &config.strategy).await {
            Ok(signal) => signal,
            Err(anomaly) => {
                warn!("{}: {}", market, anomaly);
                return Ok(report.skip(anomaly));
            }
        };
        report.signal = Some(signal);
        report.advance(CycleState::SignalFetched);

        // Relative size and decision
        let rel_size = relative_size(
            snapshot.usd_value(&market.base),
            snapshot.worth,
            self.settings.portfolio_cap,
        );
        report.relative_size = Some(rel_size);
        report.advance(CycleState::Sized);

        let decision = match decide(rel_size, signal, config.weight, self.settings.tolerance) {
            Ok(decision) => decision,
            Err(anomaly) => {
                warn!("{}: {}", market, anomaly);
                self.notify_quietly(Notification::admin(
                    format!("Anomalous position size on {}", market),
                    format!(
                        "User {} ({}) on {}: {}. No order was placed.",
                        user.user_id,
                        user.email,
                        self.exchange.kind(),
                        anomaly
                    ),
                ))
                .await;
                return Ok(report.skip(anomaly));
            }
        };
        info!(
            "{}: relative size {:.4}, target {:.4}, decision {:?}",
            market,
            rel_size,
            signal * config.weight,
            decision
        );
        report.advance(decision.pending_state());

        let side = match decision.side() {
            Some(side) => side,
            None => return Ok(report.finish(MarketOutcome::Hold)),
        };

        // Sizing
        let (quantity, price) = match self
            .size_order(user, side, &market, config, signal, snapshot)
            .await
        {
            Ok(sized) => sized,
            Err(anomaly) => {
                match &anomaly {
                    Anomaly::OrderTooSmall { .. } => debug!("{}: {}", market, anomaly),
                    _ => warn!("{}: {}", market, anomaly),
                }
                return Ok(report.skip(anomaly));
            }
        };

        if self.settings.dry_run {
            info!("Dry run: would {} {} {}", side, quantity, market);
            return Ok(report.finish(MarketOutcome::DryRun { side, quantity }));
        }

        // Submission
        let request = OrderRequest::market(market.clone(), side, quantity);
        let order = match self.exchange.place_order(&request).await {
            Ok(order) => order,
            Err(ExchangeError::OrderUnconfirmed { order_id, reason }) => {
                warn!(
                    "Order {} on {} placed without a readable fill: {}",
                    order_id, market, reason
                );
                self.notify_quietly(Notification::admin(
                    format!("Order on {} placed but unconfirmed", market),
                    format!(
                        "User {} ({}) on {}: order {} ({} {} {}) was accepted but its fill \
                         could not be read: {}. It is recorded at the sizing price of {}.",
                        user.user_id,
                        user.email,
                        self.exchange.kind(),
                        order_id,
                        side,
                        quantity,
                        market,
                        reason,
                        price
                    ),
                ))
                .await;
                unconfirmed_order(&request, price, order_id, reason)
            }
            Err(e) => {
                error!("Order {} {} {} failed: {}", side, quantity, market, e);
                report.advance(CycleState::OrderFailed);
                self.notify_quietly(Notification::admin(
                    format!("Order failed on {}", market),
                    format!(
                        "User {} ({}) on {}: {} {} {} failed: {}",
                        user.user_id,
                        user.email,
                        self.exchange.kind(),
                        side,
                        quantity,
                        market,
                        e
                    ),
                ))
                .await;
                return Ok(report.finish(MarketOutcome::OrderFailed {
                    side,
                    quantity,
                    error: e.to_string(),
                }));
            }
        };
        info!(
            "Order {} placed: {} {} {} at {}",
            order.exchange_order_id, order.side, order.quantity, order.market, order.price
        );
        report.advance(CycleState::OrderPlaced);

        // Reporting
        let balance_usd = match self.exchange.get_balance_in_usd().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                warn!("Could not read balance after order: {}", e);
                None
            }
        };
        let enriched = EnrichedOrder {
            order,
            portfolio_config_id: config.portfolio_config_id,
            signal,
            exchange: self.exchange.kind(),
            balance_usd,
        };

        if let Err(e) = self.persistence.save_order(&enriched).await {
            error!(
                "Failed to save order {}: {}",
                enriched.order.exchange_order_id, e
            );
            let record = serde_json::to_value(&enriched).unwrap_or_default();
            self.notify_quietly(
                Notification::admin(
                    "Order could not be saved",
                    format!(
                        "Order {} for user {} was placed but not saved: {}\n{}",
                        enriched.order.exchange_order_id,
                        user.user_id,
                        e,
                        serde_json::to_string_pretty(&record).unwrap_or_default()
                    ),
                )
                .with_html(json_to_html(&record)),
            )
            .await;
            return Err(RebalanceError::Persistence(e.to_string()));
        }

        if user.order_notification {
            self.notify_quietly(order_notification(user, &enriched)).await;
        }

        Ok(report.finish(MarketOutcome::OrderPlaced(Box::new(enriched))))
    }

    async fn fetch_signal(&self, market: &Market, strategy: &str) -> Result<Decimal, Anomaly> {
        if !self.strategies.contains(strategy) {
            return Err(Anomaly::SignalUnavailable {
                reason: format!("unknown strategy '{}'", strategy),
            });
        }
        let bars = self
            .exchange
            .get_ohlcv(market, &self.settings.timeframe, None, None)
            .await
            .map_err(|e| Anomaly::SignalUnavailable {
                reason: e.to_string(),
            })?;
        self.strategies
            .signal(strategy, &bars)
            .ok_or_else(|| Anomaly::SignalUnavailable {
                reason: format!("'{}' produced no signal from {} bars", strategy, bars.len()),
            })
    }

    async fn size_order(
        &self,
        user: &ActiveUser,
        side: Side,
        market: &Market,
        config: &PortfolioConfig,
        signal: Decimal,
        snapshot: &PortfolioSnapshot,
    ) -> Result<(Decimal, Decimal), Anomaly> {
        let sizing_failed = |e: ExchangeError| Anomaly::SizingFailed {
            reason: e.to_string(),
        };

        let price = self
            .exchange
            .get_ticker_price(market)
            .await
            .map_err(sizing_failed)?;
        let step = self
            .exchange
            .get_ticker_precision(market)
            .await
            .map_err(sizing_failed)?;

        let target = target_quantity(
            snapshot.worth,
            config.weight,
            signal,
            self.settings.portfolio_cap,
            price,
        );
        let current = snapshot.free_qty(&market.base);

        let quantity = match side {
            Side::Buy => {
                let mut quantity = truncate_to_step(buy_delta(target, current), step);
                let required = quantity * price;
                let available = self
                    .exchange
                    .get_symbol_qty(&market.quote)
                    .await
                    .map_err(sizing_failed)?;

                if required > available {
                    let anomaly = Anomaly::InsufficientFunds {
                        required,
                        available,
                    };
                    warn!("{}: {}", market, anomaly);
                    self.notify_quietly(Notification::admin(
                        format!("Insufficient {} balance for {}", market.quote, market),
                        format!(
                            "User {} ({}) on {}: {}",
                            user.user_id,
                            user.email,
                            self.exchange.kind(),
                            anomaly
                        ),
                    ))
                    .await;

                    match self.settings.insufficient_funds {
                        InsufficientFundsPolicy::Skip => return Err(anomaly),
                        InsufficientFundsPolicy::MaxAffordable => {
                            quantity = if price > Decimal::ZERO {
                                truncate_to_step(available / price, step)
                            } else {
                                Decimal::ZERO
                            };
                            info!("{}: buying the affordable {} instead", market, quantity);
                        }
                    }
                }
                quantity
            }
            Side::Sell => {
                let held = truncate_to_step(current, step);
                truncate_to_step(sell_delta(target, current), step).min(held)
            }
        };

        let notional = quantity * price;
        if quantity <= Decimal::ZERO {
            return Err(Anomaly::OrderTooSmall {
                quantity,
                notional,
                min_notional: Decimal::ZERO,
            });
        }
        let min_notional = self
            .exchange
            .get_ticker_min_notional(market)
            .await
            .map_err(sizing_failed)?;
        if notional < min_notional {
            return Err(Anomaly::OrderTooSmall {
                quantity,
                notional,
                min_notional,
            });
        }
        Ok((quantity, price))
    }

    /// Deliver a notification, logging instead of failing
    async fn notify_quietly(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Notification '{}' not delivered: {}", notification.subject, e);
        }
    }
}

/// Record built from the request for an order the exchange accepted
/// but did not report back
fn unconfirmed_order(
    request: &OrderRequest,
    price: Decimal,
    order_id: String,
    reason: String,
) -> OrderResult {
    let original_data = serde_json::json!({
        "orderId": order_id.as_str(),
        "unconfirmed": reason,
    });
    OrderResult {
        exchange_order_id: order_id,
        datetime: Utc::now(),
        market: request.market.clone(),
        side: request.side,
        order_type: request.order_type,
        quantity: request.quantity,
        quote_quantity: request.quantity * price,
        fee: Decimal::ZERO,
        price,
        original_data,
    }
}

fn order_notification(user: &ActiveUser, order: &EnrichedOrder) -> Notification {
    let o = &order.order;
    Notification::user(
        user.email.as_str(),
        format!("{} {} on {}", o.side, o.market, order.exchange),
        format!(
            "Order {} executed: {} {} {} at {} ({} {} total, fee {}). Signal {}.",
            o.exchange_order_id,
            o.side,
            o.quantity,
            o.market.base,
            o.price,
            o.quote_quantity,
            o.market.quote,
            o.fee,
            order.signal
        ),
    )
    .with_html(json_to_html(&serde_json::to_value(order).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::{MockExchangeAdapter, MockNotifier, MockPersistence};
    use crate::common::types::{Bar, ExchangeKind, OrderType};
    use crate::rebalance::snapshot::AssetPosition;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn user(order_notification: bool) -> ActiveUser {
        ActiveUser {
            user_id: 7,
            email: "trader@example.com".to_string(),
            account_connection_id: 70,
            exchange_name: "Binance".to_string(),
            credentials: "{}".to_string(),
            order_notification,
        }
    }

    fn eth_config(weight: Decimal) -> PortfolioConfig {
        PortfolioConfig {
            portfolio_config_id: 11,
            base: "ETH".to_string(),
            quote: "USDT".to_string(),
            weight,
            strategy: "hold".to_string(),
            active: true,
        }
    }

    /// Worth 1000: `eth_value` USD of ETH, rest in USDT
    fn snapshot(eth_value: Decimal, eth_price: Decimal) -> PortfolioSnapshot {
        let usdt = dec!(1000) - eth_value;
        PortfolioSnapshot::from_positions(
            "USDT",
            HashMap::from([
                (
                    "ETH".to_string(),
                    AssetPosition {
                        free_qty: eth_value / eth_price,
                        price: eth_price,
                        usd_value: eth_value,
                    },
                ),
                (
                    "USDT".to_string(),
                    AssetPosition {
                        free_qty: usdt,
                        price: Decimal::ONE,
                        usd_value: usdt,
                    },
                ),
            ]),
        )
    }

    fn settings(tolerance: Decimal) -> RebalanceSettings {
        RebalanceSettings {
            tolerance,
            ..RebalanceSettings::default()
        }
    }

    fn bars() -> Vec<Bar> {
        vec![Bar {
            date: Utc::now(),
            open: dec!(2000),
            high: dec!(2000),
            low: dec!(2000),
            close: dec!(2000),
            volume: dec!(1),
        }]
    }

    fn filled(side: Side, quantity: Decimal, price: Decimal) -> OrderResult {
        OrderResult {
            exchange_order_id: "1001".to_string(),
            datetime: Utc::now(),
            market: Market::new("ETH", "USDT"),
            side,
            order_type: OrderType::Market,
            quantity,
            quote_quantity: quantity * price,
            fee: dec!(0.05),
            price,
            original_data: serde_json::json!({"orderId": 1001}),
        }
    }

    fn market_data(exchange: &mut MockExchangeAdapter, price: Decimal) {
        exchange.expect_kind().return_const(ExchangeKind::Binance);
        exchange.expect_get_ohlcv().returning(|_, _, _, _| Ok(bars()));
        exchange
            .expect_get_ticker_price()
            .returning(move |_| Ok(price));
        exchange
            .expect_get_ticker_precision()
            .returning(|_| Ok(dec!(0.0001)));
        exchange
            .expect_get_ticker_min_notional()
            .returning(|_| Ok(dec!(5)));
    }

    fn engine(
        exchange: MockExchangeAdapter,
        persistence: MockPersistence,
        notifier: MockNotifier,
        settings: RebalanceSettings,
    ) -> RebalanceEngine {
        RebalanceEngine::new(
            Arc::new(exchange),
            Arc::new(persistence),
            Arc::new(notifier),
            Arc::new(StrategyRegistry::with_builtins()),
            Arc::new(settings),
        )
    }

    #[test_log::test(tokio::test)]
    async fn test_buy_scenario_places_truncated_order() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange
            .expect_get_symbol_qty()
            .with(eq("USDT"))
            .returning(|_| Ok(dec!(850)));
        // 1000 * 0.2 / 2000 = 0.1 target, 0.075 held
        exchange
            .expect_place_order()
            .withf(|r: &OrderRequest| {
                r.side == Side::Buy && r.quantity == dec!(0.025) && r.order_type == OrderType::Market
            })
            .times(1)
            .returning(|r| Ok(filled(r.side, r.quantity, dec!(2000))));
        exchange
            .expect_get_balance_in_usd()
            .returning(|| Ok(dec!(999.95)));

        let mut persistence = MockPersistence::new();
        persistence
            .expect_save_order()
            .withf(|o: &EnrichedOrder| {
                o.portfolio_config_id == 11
                    && o.signal == Decimal::ONE
                    && o.exchange == ExchangeKind::Binance
                    && o.balance_usd == Some(dec!(999.95))
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n: &Notification| n.recipient.as_deref() == Some("trader@example.com"))
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(exchange, persistence, notifier, settings(dec!(0.03)));
        let report = engine
            .run_market(&user(true), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();

        assert_eq!(report.relative_size, Some(dec!(0.15)));
        assert!(report.outcome.is_order());
        assert_eq!(
            report.states,
            vec![
                CycleState::Start,
                CycleState::SignalFetched,
                CycleState::Sized,
                CycleState::BuyPending,
                CycleState::OrderPlaced,
                CycleState::Reported,
            ]
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_anomalous_size_skips_without_order() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_place_order().never();

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n: &Notification| n.recipient.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(exchange, MockPersistence::new(), notifier, settings(dec!(0.03)));
        // ETH worth 1050 of a 1000 portfolio
        let snapshot = PortfolioSnapshot::from_positions(
            "USDT",
            HashMap::from([(
                "ETH".to_string(),
                AssetPosition {
                    free_qty: dec!(0.525),
                    price: dec!(2000),
                    usd_value: dec!(1050),
                },
            )]),
        );
        let capped = RebalanceSettings {
            portfolio_cap: Some(dec!(1000)),
            ..settings(dec!(0.03))
        };
        let engine = RebalanceEngine { settings: Arc::new(capped), ..engine };

        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot)
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            MarketOutcome::Skipped(Anomaly::AnomalousSizing {
                relative_size: dec!(1.05)
            })
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_hold_within_tolerance() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_place_order().never();

        let engine = engine(exchange, MockPersistence::new(), MockNotifier::new(), settings(dec!(0.05)));
        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot(dec!(170), dec!(2000)))
            .await
            .unwrap();
        assert_eq!(report.outcome, MarketOutcome::Hold);
        assert_eq!(report.state(), CycleState::Reported);
    }

    #[test_log::test(tokio::test)]
    async fn test_dry_run_sizes_without_submitting() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange.expect_place_order().never();

        let dry = RebalanceSettings {
            dry_run: true,
            ..settings(dec!(0.03))
        };
        let engine = engine(exchange, MockPersistence::new(), MockNotifier::new(), dry);
        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            MarketOutcome::DryRun {
                side: Side::Buy,
                quantity: dec!(0.025)
            }
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_insufficient_funds_skip_policy() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(20)));
        exchange.expect_place_order().never();

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let engine = engine(exchange, MockPersistence::new(), notifier, settings(dec!(0.03)));
        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            MarketOutcome::Skipped(Anomaly::InsufficientFunds {
                required: dec!(50),
                available: dec!(20)
            })
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_insufficient_funds_max_affordable_policy() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(20)));
        exchange
            .expect_place_order()
            .withf(|r: &OrderRequest| r.quantity == dec!(0.01))
            .times(1)
            .returning(|r| Ok(filled(r.side, r.quantity, dec!(2000))));
        exchange.expect_get_balance_in_usd().returning(|| Ok(dec!(1000)));

        let mut persistence = MockPersistence::new();
        persistence.expect_save_order().times(1).returning(|_| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier.expect_notify().returning(|_| Ok(()));

        let policy = RebalanceSettings {
            insufficient_funds: InsufficientFundsPolicy::MaxAffordable,
            ..settings(dec!(0.03))
        };
        let engine = engine(exchange, persistence, notifier, policy);
        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(report.outcome.is_order());
    }

    #[test_log::test(tokio::test)]
    async fn test_sell_capped_at_holding() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        // zero weight liquidates the position
        exchange
            .expect_place_order()
            .withf(|r: &OrderRequest| r.side == Side::Sell && r.quantity == dec!(0.15))
            .times(1)
            .returning(|r| Ok(filled(r.side, r.quantity, dec!(2000))));
        exchange.expect_get_balance_in_usd().returning(|| Ok(dec!(1000)));

        let mut persistence = MockPersistence::new();
        persistence.expect_save_order().times(1).returning(|_| Ok(()));

        let engine = engine(exchange, persistence, MockNotifier::new(), settings(dec!(0.03)));
        let report = engine
            .run_market(&user(false), &eth_config(Decimal::ZERO), &snapshot(dec!(300), dec!(2000)))
            .await
            .unwrap();
        assert!(report.outcome.is_order());
    }

    #[test_log::test(tokio::test)]
    async fn test_order_below_min_notional_is_skipped() {
        let mut exchange = MockExchangeAdapter::new();
        exchange.expect_kind().return_const(ExchangeKind::Binance);
        exchange.expect_get_ohlcv().returning(|_, _, _, _| Ok(bars()));
        exchange.expect_get_ticker_price().returning(|_| Ok(dec!(2000)));
        exchange.expect_get_ticker_precision().returning(|_| Ok(dec!(0.0001)));
        exchange.expect_get_ticker_min_notional().returning(|_| Ok(dec!(100)));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange.expect_place_order().never();

        let engine = engine(exchange, MockPersistence::new(), MockNotifier::new(), settings(dec!(0.03)));
        let report = engine
            .run_market(&user(false), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(matches!(
            report.outcome,
            MarketOutcome::Skipped(Anomaly::OrderTooSmall { .. })
        ));
    }

    #[test_log::test(tokio::test)]
    async fn test_order_failure_is_reported_not_raised() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange.expect_place_order().times(1).returning(|_| {
            Err(ExchangeError::Api {
                code: "-2010".to_string(),
                message: "Account has insufficient balance".to_string(),
            })
        });

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(1).returning(|_| Ok(()));

        let engine = engine(exchange, MockPersistence::new(), notifier, settings(dec!(0.03)));
        let report = engine
            .run_market(&user(true), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(matches!(report.outcome, MarketOutcome::OrderFailed { side: Side::Buy, .. }));
        assert!(report.states.contains(&CycleState::OrderFailed));
    }

    #[test_log::test(tokio::test)]
    async fn test_unconfirmed_order_is_still_recorded() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange.expect_place_order().times(1).returning(|_| {
            Err(ExchangeError::OrderUnconfirmed {
                order_id: "777".to_string(),
                reason: "Order 777 not found in history".to_string(),
            })
        });
        exchange
            .expect_get_balance_in_usd()
            .returning(|| Ok(dec!(1000)));

        let mut persistence = MockPersistence::new();
        persistence
            .expect_save_order()
            .withf(|o: &EnrichedOrder| {
                o.order.exchange_order_id == "777"
                    && o.order.quantity == dec!(0.025)
                    && o.order.price == dec!(2000)
                    && o.order.quote_quantity == dec!(50)
                    && o.order.fee.is_zero()
                    && o.order.original_data["orderId"] == "777"
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n: &Notification| n.recipient.is_none() && n.subject.contains("unconfirmed"))
            .times(1)
            .returning(|_| Ok(()));
        // the user mail carries the order as an HTML table
        notifier
            .expect_notify()
            .withf(|n: &Notification| {
                n.recipient.is_some()
                    && n.html_body
                        .as_deref()
                        .map_or(false, |html| html.contains("<td>777</td>"))
            })
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(exchange, persistence, notifier, settings(dec!(0.03)));
        let report = engine
            .run_market(&user(true), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(report.outcome.is_order());
        assert!(report.states.contains(&CycleState::OrderPlaced));
    }

    #[test_log::test(tokio::test)]
    async fn test_persistence_failure_escalates() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange
            .expect_place_order()
            .returning(|r| Ok(filled(r.side, r.quantity, dec!(2000))));
        exchange
            .expect_get_balance_in_usd()
            .returning(|| Err(ExchangeError::InvalidResponse("timeout".to_string())));

        let mut persistence = MockPersistence::new();
        persistence
            .expect_save_order()
            .withf(|o: &EnrichedOrder| o.balance_usd.is_none())
            .returning(|_| Err(RebalanceError::Persistence("connection reset".to_string())));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n: &Notification| n.recipient.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let engine = engine(exchange, persistence, notifier, settings(dec!(0.03)));
        let result = engine
            .run_market(&user(true), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await;
        assert!(matches!(result, Err(RebalanceError::Persistence(_))));
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_notifier_does_not_abort() {
        let mut exchange = MockExchangeAdapter::new();
        market_data(&mut exchange, dec!(2000));
        exchange.expect_get_symbol_qty().returning(|_| Ok(dec!(850)));
        exchange
            .expect_place_order()
            .returning(|r| Ok(filled(r.side, r.quantity, dec!(2000))));
        exchange.expect_get_balance_in_usd().returning(|| Ok(dec!(1000)));

        let mut persistence = MockPersistence::new();
        persistence.expect_save_order().returning(|_| Ok(()));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(|_| Err(RebalanceError::Notification("smtp down".to_string())));

        let engine = engine(exchange, persistence, notifier, settings(dec!(0.03)));
        let report = engine
            .run_market(&user(true), &eth_config(dec!(0.2)), &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(report.outcome.is_order());
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_strategy_skips_market() {
        let mut exchange = MockExchangeAdapter::new();
        exchange.expect_get_ohlcv().never();
        exchange.expect_place_order().never();

        let engine = engine(exchange, MockPersistence::new(), MockNotifier::new(), settings(dec!(0.03)));
        let config = PortfolioConfig {
            strategy: "moon".to_string(),
            ..eth_config(dec!(0.2))
        };
        let report = engine
            .run_market(&user(false), &config, &snapshot(dec!(150), dec!(2000)))
            .await
            .unwrap();
        assert!(matches!(
            report.outcome,
            MarketOutcome::Skipped(Anomaly::SignalUnavailable { .. })
        ));
    }
}
