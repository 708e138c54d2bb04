//! Currency converter: per-line exchange-rate application into the base currency.

use core::fmt;
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use tally_core::ValueObject;

use crate::error::{LedgerError, LedgerResult};

/// Decimal places kept on base-currency amounts.
pub const BASE_SCALE: u32 = 2;

/// Most decimal places a stored line amount may carry (`NUMERIC(19,4)`).
pub const AMOUNT_SCALE: u32 = 4;

/// Most decimal places a stored exchange rate may carry (`NUMERIC(19,8)`).
pub const RATE_SCALE: u32 = 8;

/// ISO 4217 alphabetic currency code, always upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(code: &str) -> LedgerResult<Self> {
        let trimmed = code.trim();
        if trimmed.len() != 3 || !trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(LedgerError::validation(format!(
                "invalid currency code '{code}'"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for CurrencyCode {}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CurrencyCode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

/// Round a monetary value half-up to `BASE_SCALE` places.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(BASE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Significant decimal places of `value`, ignoring trailing zeros.
pub fn significant_scale(value: Decimal) -> u32 {
    value.normalize().scale()
}

/// Convert a document-currency amount to the base currency.
///
/// Uses the rate captured on the line, never a freshly fetched one, so posted
/// history replays to the same cents.
pub fn to_base(amount: Decimal, exchange_rate: Decimal) -> LedgerResult<Decimal> {
    if exchange_rate <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "exchange rate must be positive (got {exchange_rate})"
        )));
    }
    let product = amount.checked_mul(exchange_rate).ok_or_else(|| {
        LedgerError::validation(format!("amount {amount} x rate {exchange_rate} overflows"))
    })?;
    Ok(round_money(product))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn converts_and_rounds_half_up() {
        assert_eq!(to_base(dec!(50), dec!(1.10)).unwrap(), dec!(55.00));
        assert_eq!(to_base(dec!(10.005), dec!(1)).unwrap(), dec!(10.01));
        assert_eq!(to_base(dec!(0.125), dec!(1)).unwrap(), dec!(0.13));
        assert_eq!(to_base(dec!(33.33), dec!(0.333333)).unwrap(), dec!(11.11));
    }

    #[test]
    fn base_currency_rate_is_identity() {
        assert_eq!(to_base(dec!(100.00), Decimal::ONE).unwrap(), dec!(100.00));
    }

    #[test]
    fn trailing_zeros_do_not_count_towards_scale() {
        assert_eq!(significant_scale(dec!(10.50000)), 1);
        assert_eq!(significant_scale(dec!(0.00001)), 5);
        assert_eq!(significant_scale(dec!(42)), 0);
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(matches!(to_base(dec!(1), dec!(0)), Err(LedgerError::Validation(_))));
        assert!(matches!(to_base(dec!(1), dec!(-1.2)), Err(LedgerError::Validation(_))));
    }

    #[test]
    fn currency_codes_are_normalised() {
        assert_eq!(CurrencyCode::parse(" eur ").unwrap().as_str(), "EUR");
        assert!(CurrencyCode::parse("EURO").is_err());
        assert!(CurrencyCode::parse("E1R").is_err());
    }
}
