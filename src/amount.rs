//! Decimal-string amount handling shared by the Gateway and the emulator's
//! Terminal State Core.
//!
//! Amounts are never represented as `f64` anywhere in this crate; every
//! stored or wire amount is a base-10 string with exactly two fractional
//! digits, built on [`rust_decimal::Decimal`] so normalization never
//! round-trips through binary floating point.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Failure parsing a caller-supplied amount.
#[derive(Debug, Error)]
pub enum AmountError {
    /// The input could not be parsed as a decimal number.
    #[error("invalid amount '{0}'")]
    Invalid(String),
}

/// Parse `raw` (accepting either a JSON number rendered as text or a decimal
/// string) and normalize it to exactly two fractional digits, using
/// half-away-from-zero rounding.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if `raw` does not parse as a decimal.
pub fn normalize(raw: &str) -> Result<String, AmountError> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|_err| AmountError::Invalid(raw.to_owned()))?;
    Ok(format_two_fractional(value))
}

/// Normalize a [`serde_json::Value`] amount, accepting either a JSON number
/// or a string.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if the value is neither a number nor a
/// string, or does not parse as a decimal.
pub fn normalize_json(value: &serde_json::Value) -> Result<String, AmountError> {
    match value {
        serde_json::Value::String(s) => normalize(s),
        serde_json::Value::Number(n) => normalize(&n.to_string()),
        other => Err(AmountError::Invalid(other.to_string())),
    }
}

/// Round `value` to two fractional digits, half away from zero, and render
/// it with a fixed two-decimal layout.
#[must_use]
pub fn format_two_fractional(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    format!("{rounded:.2}")
}

/// Parse a stored/wire amount string into a [`Decimal`] for arithmetic.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if `raw` does not parse as a decimal.
pub fn parse(raw: &str) -> Result<Decimal, AmountError> {
    raw.trim().parse().map_err(|_err| AmountError::Invalid(raw.to_owned()))
}

/// Add two stored amount strings and format the result with two fractional
/// digits.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if either operand does not parse.
pub fn add(a: &str, b: &str) -> Result<String, AmountError> {
    Ok(format_two_fractional(parse(a)? + parse(b)?))
}

/// Subtract `b` from `a` and format the result with two fractional digits.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if either operand does not parse.
pub fn sub(a: &str, b: &str) -> Result<String, AmountError> {
    Ok(format_two_fractional(parse(a)? - parse(b)?))
}

/// Compare two stored amount strings numerically.
///
/// # Errors
/// Returns [`AmountError::Invalid`] if either operand does not parse.
pub fn compare(a: &str, b: &str) -> Result<std::cmp::Ordering, AmountError> {
    Ok(parse(a)?.cmp(&parse(b)?))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("10", "10.00")]
    #[case("10.005", "10.01")]
    #[case("10.004", "10.00")]
    #[case("-1.005", "-1.01")]
    #[case("100", "100.00")]
    fn normalizes_to_two_fractional_digits(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize(input).expect("valid"), expected);
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(normalize("not-a-number").is_err());
    }

    #[test]
    fn normalizes_json_number_and_string() {
        assert_eq!(normalize_json(&serde_json::json!("10")).expect("ok"), "10.00");
        assert_eq!(normalize_json(&serde_json::json!(10.5)).expect("ok"), "10.50");
    }

    #[test]
    fn add_and_sub_preserve_two_fractional_digits() {
        assert_eq!(add("10.00", "20.00").expect("ok"), "30.00");
        assert_eq!(sub("155.00", "100.00").expect("ok"), "55.00");
    }
}
