//! Order sizing arithmetic
//!
//! All functions are pure and never round a quantity up: an order sized
//! here can never exceed what the raw arithmetic allows.

use rust_decimal::Decimal;

/// Largest multiple of `step` not greater than `raw`
///
/// A non-positive step cannot size anything and yields zero.
pub fn truncate_to_step(raw: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let truncated = (raw / step).floor() * step;
    truncated.round_dp(step.scale()).normalize()
}

/// Worth the weights apply to, bounded by the optional cap
pub fn effective_worth(worth: Decimal, cap: Option<Decimal>) -> Decimal {
    match cap {
        Some(cap) => worth.min(cap),
        None => worth,
    }
}

/// Share of the (capped) portfolio worth held in one asset
pub fn relative_size(value: Decimal, worth: Decimal, cap: Option<Decimal>) -> Decimal {
    let worth = effective_worth(worth, cap);
    if worth <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    value / worth
}

/// Base quantity the market should hold at target
///
/// `min(cap, worth) * weight * signal / price`, zero for a non-positive price.
pub fn target_quantity(
    worth: Decimal,
    weight: Decimal,
    signal: Decimal,
    cap: Option<Decimal>,
    price: Decimal,
) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    effective_worth(worth, cap) * weight * signal / price
}

/// Quantity to buy to reach `target`
pub fn buy_delta(target: Decimal, current: Decimal) -> Decimal {
    target - current
}

/// Quantity to sell to come down to `target`
pub fn sell_delta(target: Decimal, current: Decimal) -> Decimal {
    current - target
}
