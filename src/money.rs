//! Exact decimal parsing and canonical formatting.
//!
//! Monetary values are [`rust_decimal::Decimal`] end to end. Nothing passes
//! through binary floating point, so two runs (or two implementations) that
//! agree on the arithmetic agree on every output byte.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Fraction digits of every monetary output column.
pub const MONEY_SCALE: u32 = 2;

/// Parse a plain decimal literal such as `12.50` or `-3`.
///
/// Exponent notation, digit separators and empty input are rejected.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    if s.is_empty() || s.contains(['e', 'E', ',', '_']) {
        return None;
    }
    Decimal::from_str(s).ok()
}

/// Round half-to-even to [`MONEY_SCALE`] digits and fix the scale, so the
/// textual form always carries exactly two fraction digits.
pub fn round_money(d: Decimal) -> Decimal {
    let mut r = d.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven);
    r.rescale(MONEY_SCALE);
    r
}

/// Canonical text: fixed two fraction digits, no exponent, no grouping.
pub fn format_money(d: Decimal) -> String {
    let r = round_money(d);
    if r.is_zero() {
        // avoid "-0.00"
        return "0.00".to_string();
    }
    r.to_string()
}
