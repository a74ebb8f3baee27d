use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// ISO-4217 currency code, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

#[derive(Debug, Error, PartialEq)]
pub enum MoneyError {
    #[error("invalid currency code '{0}'")]
    InvalidCurrency(String),

    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(Currency, Currency),

    #[error("amount must not be negative")]
    Negative,

    #[error("decimal overflow")]
    Overflow,
}

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A monetary amount with two fractional digits, bound to a currency.
/// Arithmetic across currencies is rejected, never coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: Currency,
}

impl Money {
    /// Builds a non-negative amount, rounded half-to-even to 2 decimals.
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, MoneyError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(MoneyError::Negative);
        }
        Ok(Self {
            amount: round2(amount),
            currency,
        })
    }

    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: Decimal::ZERO,
            currency,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency.clone(),
        })
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        if amount.is_sign_negative() {
            return Err(MoneyError::Negative);
        }
        Ok(Money {
            amount,
            currency: self.currency.clone(),
        })
    }

    pub fn checked_mul(&self, qty: i64) -> Result<Money, MoneyError> {
        let amount = self
            .amount
            .checked_mul(Decimal::from(qty))
            .ok_or(MoneyError::Overflow)?;
        if amount.is_sign_negative() {
            return Err(MoneyError::Negative);
        }
        Ok(Money {
            amount: round2(amount),
            currency: self.currency.clone(),
        })
    }

    /// Same-currency comparison; cross-currency ordering is an error.
    pub fn checked_cmp(&self, other: &Money) -> Result<std::cmp::Ordering, MoneyError> {
        self.require_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }

    /// The smaller of two same-currency amounts.
    pub fn clamp_to(&self, ceiling: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(ceiling)?;
        Ok(if self.amount > ceiling.amount {
            ceiling.clone()
        } else {
            self.clone()
        })
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.clone(),
                other.currency.clone(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Banker's rounding to two fractional digits.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn usd(s: &str) -> Money {
        Money::new(d(s), Currency::new("USD").unwrap()).unwrap()
    }

    #[test]
    fn test_currency_normalizes_case() {
        assert_eq!(Currency::new("usd").unwrap().as_str(), "USD");
        assert!(Currency::new("US").is_err());
        assert!(Currency::new("12A").is_err());
    }

    #[test]
    fn test_rejects_negative_amounts() {
        let c = Currency::new("USD").unwrap();
        assert_eq!(Money::new(d("-1.00"), c), Err(MoneyError::Negative));
    }

    #[test]
    fn test_rounds_half_to_even() {
        assert_eq!(round2(d("10.005")), d("10.00"));
        assert_eq!(round2(d("10.015")), d("10.02"));
        assert_eq!(round2(d("10.025")), d("10.02"));
    }

    #[test]
    fn test_cross_currency_arithmetic_is_rejected() {
        let a = usd("10.00");
        let b = Money::new(d("10.00"), Currency::new("KES").unwrap()).unwrap();
        assert!(matches!(
            a.checked_add(&b),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
        assert!(a.checked_cmp(&b).is_err());
    }

    #[test]
    fn test_sub_below_zero_is_rejected() {
        let a = usd("5.00");
        let b = usd("10.00");
        assert_eq!(a.checked_sub(&b), Err(MoneyError::Negative));
    }

    #[test]
    fn test_clamp_to_ceiling() {
        let paid = usd("300.00");
        let due = usd("200.00");
        assert_eq!(paid.clamp_to(&due).unwrap(), due);
        assert_eq!(usd("50.00").clamp_to(&due).unwrap(), usd("50.00"));
    }
}
