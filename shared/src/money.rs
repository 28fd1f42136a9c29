//! Amount helpers shared by the order and payment services.
//!
//! Amounts travel as `f64` on the wire and are stored as `NUMERIC(12, 2)`.

use bigdecimal::BigDecimal;
use num_traits::{FromPrimitive, ToPrimitive};

/// Largest difference at which two amounts still count as equal.
pub const AMOUNT_TOLERANCE: f64 = 0.01;

// Absorbs binary rounding noise such as 100.01 - 100.0 = 0.010000000000005.
const EPSILON: f64 = 1e-9;

pub fn amounts_match(a: f64, b: f64) -> bool {
    (a - b).abs() <= AMOUNT_TOLERANCE + EPSILON
}

/// Rounds to whole cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Converts to a two-decimal `BigDecimal`. `None` for NaN and infinities.
pub fn to_decimal(amount: f64) -> Option<BigDecimal> {
    BigDecimal::from_f64(amount).map(|d| d.round(2))
}

pub fn from_decimal(amount: &BigDecimal) -> Option<f64> {
    amount.to_f64()
}
