//! Order totals.
//!
//! Every money value leaving this module is rounded half away from zero to
//! two decimal places and rescaled so it always renders with two fraction
//! digits. Line subtotals are rounded first and the order subtotal is their
//! sum, so `Σ line_subtotals == subtotal` and
//! `total_amount == subtotal + tax + delivery_fee - discount` hold exactly.

use once_cell::sync::Lazy;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::PricingConfig;
use crate::entities::ShippingMethod;

/// Percent-off codes known to the storefront
static COUPONS: Lazy<HashMap<&'static str, Decimal>> = Lazy::new(|| {
    HashMap::from([
        ("SAVE10", dec!(10)),
        ("WELCOME5", dec!(5)),
        ("SPRING15", dec!(15)),
    ])
});

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("line {index} has invalid quantity {quantity}")]
    InvalidQuantity { index: usize, quantity: i32 },

    #[error("line {index} has a negative unit price")]
    NegativePrice { index: usize },

    #[error("order total would be negative ({0})")]
    NegativeTotal(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

/// Money rules, usually built from [`PricingConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    pub standard_delivery_fee: Decimal,
    pub discount_threshold: Decimal,
    pub discount_percent: Decimal,
    pub tax_rate: Decimal,
}

impl From<&PricingConfig> for PricingPolicy {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            standard_delivery_fee: cfg.standard_delivery_fee,
            discount_threshold: cfg.discount_threshold,
            discount_percent: cfg.discount_percent,
            tax_rate: cfg.tax_rate,
        }
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CouponOutcome {
    NotProvided,
    Applied { code: String, percent: Decimal },
    Invalid { code: String },
}

impl CouponOutcome {
    /// Code to persist on the order; unknown codes are not stored
    pub fn applied_code(&self) -> Option<&str> {
        match self {
            CouponOutcome::Applied { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub line_subtotals: Vec<Decimal>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub delivery_fee: Decimal,
    pub total_amount: Decimal,
    pub coupon: CouponOutcome,
}

pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Resolves a customer-entered coupon code against the registry
pub fn lookup_coupon(code: Option<&str>) -> CouponOutcome {
    let normalized = match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => code.to_uppercase(),
        None => return CouponOutcome::NotProvided,
    };

    match COUPONS.get(normalized.as_str()) {
        Some(percent) => CouponOutcome::Applied {
            code: normalized,
            percent: *percent,
        },
        None => CouponOutcome::Invalid { code: normalized },
    }
}

pub fn delivery_fee(method: ShippingMethod, policy: &PricingPolicy) -> Decimal {
    match method {
        ShippingMethod::FreeShipping => round_money(Decimal::ZERO),
        ShippingMethod::Standard => round_money(policy.standard_delivery_fee),
    }
}

/// Computes the totals for a set of priced lines
pub fn quote(
    lines: &[PriceLine],
    shipping_method: ShippingMethod,
    coupon_code: Option<&str>,
    policy: &PricingPolicy,
) -> Result<Quote, PricingError> {
    let mut line_subtotals = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.quantity < 1 {
            return Err(PricingError::InvalidQuantity {
                index,
                quantity: line.quantity,
            });
        }
        if line.unit_price.is_sign_negative() && !line.unit_price.is_zero() {
            return Err(PricingError::NegativePrice { index });
        }
        line_subtotals.push(round_money(line.unit_price * Decimal::from(line.quantity)));
    }

    let subtotal = round_money(line_subtotals.iter().copied().sum());

    let mut percent_off = Decimal::ZERO;
    if subtotal >= policy.discount_threshold {
        percent_off += policy.discount_percent;
    }
    let coupon = lookup_coupon(coupon_code);
    if let CouponOutcome::Applied { percent, .. } = &coupon {
        percent_off += *percent;
    }
    let discount = round_money(subtotal * percent_off / dec!(100));

    let taxable = (subtotal - discount).max(Decimal::ZERO);
    let tax = round_money(taxable * policy.tax_rate);
    let delivery_fee = delivery_fee(shipping_method, policy);

    let total_amount = subtotal + tax + delivery_fee - discount;
    if total_amount.is_sign_negative() && !total_amount.is_zero() {
        return Err(PricingError::NegativeTotal(total_amount));
    }

    Ok(Quote {
        line_subtotals,
        subtotal,
        discount,
        tax,
        delivery_fee,
        total_amount: round_money(total_amount),
        coupon,
    })
}
