//! Fixed-point money helpers.
//!
//! Every monetary figure in the engine is an integer number of cents, every
//! percentage an integer number of hundredths of a percent and every quantity
//! an integer number of hundredths of a unit. Products are computed in `i128`
//! and rounded once, half away from zero, back to cents.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Signed money amount represented as **integer cents**.
///
/// # Examples
///
/// ```rust
/// use ledger_engine::Money;
///
/// let amount = Money::new(12_34);
/// assert_eq!(amount.cents(), 1234);
/// assert_eq!(amount.to_string(), "12.34");
/// assert_eq!("10,5".parse::<Money>().unwrap().cents(), 1050);
/// assert!("12.345".parse::<Money>().is_err());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Creates a new amount from integer cents.
    #[must_use]
    pub const fn new(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the raw value in cents.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition (returns `None` on overflow).
    #[must_use]
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    /// Checked subtraction (returns `None` on overflow).
    #[must_use]
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// `max(self, 0)`.
    #[must_use]
    pub fn clamp_non_negative(self) -> Money {
        Money(self.0.max(0))
    }

    /// Converts a floating point amount (in currency units) into cents.
    ///
    /// NaN and infinities coerce to zero; values outside the `i64` cent range
    /// saturate.
    #[must_use]
    pub fn coerce_f64(value: f64) -> Money {
        if !value.is_finite() {
            return Money::ZERO;
        }
        let cents = (value * 100.0).round();
        if cents >= i64::MAX as f64 {
            Money(i64::MAX)
        } else if cents <= i64::MIN as f64 {
            Money(i64::MIN)
        } else {
            Money(cents as i64)
        }
    }

    /// `round2(self × numerator / denominator)`.
    ///
    /// Returns `None` when `denominator` is zero or the result does not fit.
    #[must_use]
    pub fn mul_div(self, numerator: i64, denominator: i64) -> Option<Money> {
        div_round_half_away(
            i128::from(self.0) * i128::from(numerator),
            i128::from(denominator),
        )
        .and_then(|v| i64::try_from(v).ok())
        .map(Money)
    }
}

/// Integer division rounding half away from zero.
fn div_round_half_away(numerator: i128, denominator: i128) -> Option<i128> {
    if denominator == 0 {
        return None;
    }
    let (n, d) = if denominator < 0 {
        (-numerator, -denominator)
    } else {
        (numerator, denominator)
    };
    let q = n / d;
    let r = n % d;
    if r.abs() * 2 >= d {
        Some(if n < 0 { q - 1 } else { q + 1 })
    } else {
        Some(q)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Money> for i64 {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Self::Output {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl FromStr for Money {
    type Err = EngineError;

    /// Parses a decimal string into cents.
    ///
    /// Accepts `.` or `,` as decimal separator and an optional leading `+`/`-`.
    /// Rejects more than two fractional digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed2(s, "amount").map(Money)
    }
}

/// Parses a decimal string with at most two fractional digits into hundredths.
fn parse_fixed2(s: &str, label: &str) -> Result<i64, EngineError> {
    let invalid = || EngineError::Validation(format!("invalid {label}: {s:?}"));

    let trimmed = s.trim();
    let (negative, rest) = if let Some(stripped) = trimmed.strip_prefix('-') {
        (true, stripped.trim())
    } else if let Some(stripped) = trimmed.strip_prefix('+') {
        (false, stripped.trim())
    } else {
        (false, trimmed)
    };
    if rest.is_empty() {
        return Err(invalid());
    }

    let rest = rest.replace(',', ".");
    let mut parts = rest.split('.');
    let whole_str = parts.next().ok_or_else(invalid)?;
    let frac_str = parts.next();
    if parts.next().is_some() {
        return Err(invalid());
    }
    if whole_str.is_empty() || !whole_str.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let whole: i64 = whole_str.parse().map_err(|_| invalid())?;

    let frac: i64 = match frac_str {
        None | Some("") => 0,
        Some(frac) => {
            if !frac.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            match frac.len() {
                1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
                2 => frac.parse::<i64>().map_err(|_| invalid())?,
                _ => {
                    return Err(EngineError::Validation(format!(
                        "invalid {label}: too many decimals"
                    )));
                }
            }
        }
    };

    let total = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(|| EngineError::Validation(format!("{label} too large")))?;
    Ok(if negative { -total } else { total })
}

/// A percentage in hundredths of a percent (`1900` = 19.00 %).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Percent(i64);

impl Percent {
    pub const ZERO: Percent = Percent(0);
    pub const HUNDRED: Percent = Percent(100_00);

    #[must_use]
    pub const fn from_hundredths(value: i64) -> Self {
        Self(value)
    }

    /// Whole percent, e.g. `Percent::whole(19)`.
    #[must_use]
    pub const fn whole(value: i64) -> Self {
        Self(value * 100)
    }

    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }

    /// `round2(amount × self / 100)`.
    #[must_use]
    pub fn apply(self, amount: Money) -> Money {
        amount
            .mul_div(self.0, 100_00)
            .unwrap_or(if (amount.cents() < 0) ^ (self.0 < 0) {
                Money(i64::MIN)
            } else {
                Money(i64::MAX)
            })
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", Money(self.0))
    }
}

impl FromStr for Percent {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed2(s.trim().trim_end_matches('%'), "percent").map(Percent)
    }
}

/// A quantity (hours, pieces) in hundredths of a unit.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(i64);

impl Quantity {
    #[must_use]
    pub const fn from_hundredths(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn whole(value: i64) -> Self {
        Self(value * 100)
    }

    #[must_use]
    pub const fn hundredths(self) -> i64 {
        self.0
    }

    /// `round2(self × rate)`.
    pub fn times(self, rate: Money) -> Result<Money, EngineError> {
        rate.mul_div(self.0, 100)
            .ok_or_else(|| EngineError::Validation("quantity × rate overflows".to_string()))
    }
}

impl FromStr for Quantity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed2(s, "quantity").map(Quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_two_decimals() {
        assert_eq!(Money::new(0).to_string(), "0.00");
        assert_eq!(Money::new(1).to_string(), "0.01");
        assert_eq!(Money::new(1050).to_string(), "10.50");
        assert_eq!(Money::new(-1050).to_string(), "-10.50");
    }

    #[test]
    fn parse_accepts_dot_or_comma() {
        assert_eq!("10".parse::<Money>().unwrap().cents(), 1000);
        assert_eq!("10.5".parse::<Money>().unwrap().cents(), 1050);
        assert_eq!("10,50".parse::<Money>().unwrap().cents(), 1050);
        assert_eq!("-0.01".parse::<Money>().unwrap().cents(), -1);
        assert_eq!("  2.30 ".parse::<Money>().unwrap().cents(), 230);
    }

    #[test]
    fn parse_rejects_more_than_two_decimals() {
        assert!("12.345".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
    }

    #[test]
    fn percent_rounds_half_away_from_zero() {
        // 0.05 * 50% = 0.025 -> 0.03
        assert_eq!(Percent::whole(50).apply(Money::new(5)), Money::new(3));
        assert_eq!(Percent::whole(50).apply(Money::new(-5)), Money::new(-3));
        // 0.04 * 50% = 0.02
        assert_eq!(Percent::whole(50).apply(Money::new(4)), Money::new(2));
        assert_eq!(Percent::whole(19).apply(Money::new(1000_00)), Money::new(190_00));
        assert_eq!("12.5%".parse::<Percent>().unwrap(), Percent::from_hundredths(1250));
    }

    #[test]
    fn quantity_times_rate() {
        let qty: Quantity = "1.5".parse().unwrap();
        assert_eq!(qty.times(Money::new(85_00)).unwrap(), Money::new(127_50));
        // 0.33h * 10.00 = 3.30
        assert_eq!(
            Quantity::from_hundredths(33).times(Money::new(10_00)).unwrap(),
            Money::new(3_30)
        );
    }

    #[test]
    fn coerce_f64_is_safe() {
        assert_eq!(Money::coerce_f64(f64::NAN), Money::ZERO);
        assert_eq!(Money::coerce_f64(f64::INFINITY), Money::ZERO);
        assert_eq!(Money::coerce_f64(0.125), Money::new(13));
        assert_eq!(Money::coerce_f64(-0.125), Money::new(-13));
        assert_eq!(Money::coerce_f64(1e30), Money::new(i64::MAX));
    }

    #[test]
    fn mul_div_rejects_zero_denominator() {
        assert_eq!(Money::new(100).mul_div(1, 0), None);
        assert_eq!(Money::new(100).mul_div(1, 3), Some(Money::new(33)));
        assert_eq!(Money::new(200).mul_div(1, 3), Some(Money::new(67)));
    }
}
