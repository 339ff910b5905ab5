use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const CURRENCY_CODE: &str = "CNY";

//--------------------------------------       Money         ---------------------------------------------------------
/// A monetary amount, stored as a whole number of cents.
///
/// Gateways report amounts as decimal strings. [`Money::from_str`] rounds anything past the second decimal place
/// half-up (away from zero), so `"100.004"` and `"100.00"` compare equal, while `"100.005"` becomes `100.01`.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole currency units, e.g. `Money::from_units(12)` is 12.00
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `None` if the result does not fit.
    pub fn checked_mul(self, rhs: i64) -> Option<Self> {
        self.0.checked_mul(rhs).map(Self)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// The two-decimal representation used on the wire, e.g. `"1234.50"`.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_decimal_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Value is not a valid monetary amount: {0}")]
pub struct MoneyParseError(String);

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MoneyParseError(s.to_string());
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        let units = if whole.is_empty() { 0 } else { whole.parse::<i64>().map_err(|_| err())? };
        let mut frac_digits = frac.bytes().map(|b| i64::from(b - b'0'));
        let tenths = frac_digits.next().unwrap_or(0);
        let hundredths = frac_digits.next().unwrap_or(0);
        let round_up = frac_digits.next().map(|d| d >= 5).unwrap_or(false);
        let cents = units
            .checked_mul(100)
            .and_then(|c| c.checked_add(tenths * 10 + hundredths + i64::from(round_up)))
            .ok_or_else(err)?;
        Ok(Self(if negative { -cents } else { cents }))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_two_decimals() {
        assert_eq!(Money::from_str("100.00").unwrap(), Money::from_cents(10_000));
        assert_eq!(Money::from_str("0.5").unwrap(), Money::from_cents(50));
        assert_eq!(Money::from_str("12").unwrap(), Money::from_units(12));
        assert_eq!(Money::from_str(" 7.01 ").unwrap(), Money::from_cents(701));
        assert_eq!(Money::from_str("-3.10").unwrap(), Money::from_cents(-310));
    }

    #[test]
    fn parse_rounds_half_up() {
        assert_eq!(Money::from_str("100.004").unwrap(), Money::from_cents(10_000));
        assert_eq!(Money::from_str("100.005").unwrap(), Money::from_cents(10_001));
        assert_eq!(Money::from_str("0.999").unwrap(), Money::from_cents(100));
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in ["", ".", "abc", "1.2.3", "1,00", "--1", "1e3"] {
            assert!(Money::from_str(s).is_err(), "{s} should not parse");
        }
    }

    #[test]
    fn formatting() {
        assert_eq!(Money::from_cents(10_000).to_string(), "100.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn arithmetic() {
        let mut total: Money = [Money::from_cents(150), Money::from_cents(250)].into_iter().sum();
        assert_eq!(total, Money::from_units(4));
        total -= Money::from_cents(100);
        assert_eq!(total * 2, Money::from_units(6));
        assert_eq!(-total, Money::from_cents(-300));
    }

    #[test]
    fn checked_arithmetic() {
        assert_eq!(Money::from_cents(250).checked_mul(4), Some(Money::from_cents(1_000)));
        assert_eq!(Money::from_cents(i64::MAX / 2 + 1).checked_mul(2), None);
        assert_eq!(Money::from_cents(1).checked_add(Money::from_cents(2)), Some(Money::from_cents(3)));
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
    }

    #[test]
    fn serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(1999)).unwrap();
        assert_eq!(json, "1999");
    }
}
