//! USD amounts with ledger semantics.
//!
//! Every stored or compared amount is rounded to 4 decimal places, half-up.
//! The wrapper keeps the rounding rule in one place so no call site can
//! accidentally persist an unrounded value.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A USD amount at 4-decimal scale, half-up rounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Usd(Decimal);

impl Usd {
    pub const ZERO: Usd = Usd(Decimal::ZERO);

    /// Wrap and round to 4 decimals (half-up).
    pub fn new(value: Decimal) -> Self {
        Usd(value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Build from integer micro-dollar-ish cents: `Usd::from_scaled(52, 2)` == 0.52.
    pub fn from_scaled(mantissa: i64, scale: u32) -> Self {
        Usd::new(Decimal::new(mantissa, scale))
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn abs(&self) -> Usd {
        Usd::new(self.0.abs())
    }

    /// Multiply by a plain decimal factor (commission rates, star rates).
    pub fn mul(&self, factor: Decimal) -> Usd {
        Usd::new(self.0 * factor)
    }

    /// Parse a stored TEXT column. Database values are trusted to be decimals;
    /// anything else is a corruption we surface loudly.
    pub fn parse_db(s: &str) -> crate::Result<Usd> {
        Decimal::from_str(s)
            .map(Usd::new)
            .map_err(|e| crate::QuillError::Database(format!("bad decimal {s:?}: {e}")))
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Fixed 4-dp representation — this is the canonical DB encoding.
        write!(f, "{:.4}", self.0)
    }
}

impl FromStr for Usd {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Decimal::from_str(s).map(Usd::new)
    }
}

impl From<Decimal> for Usd {
    fn from(d: Decimal) -> Self {
        Usd::new(d)
    }
}

impl Add for Usd {
    type Output = Usd;
    fn add(self, rhs: Usd) -> Usd {
        Usd::new(self.0 + rhs.0)
    }
}

impl AddAssign for Usd {
    fn add_assign(&mut self, rhs: Usd) {
        *self = *self + rhs;
    }
}

impl Sub for Usd {
    type Output = Usd;
    fn sub(self, rhs: Usd) -> Usd {
        Usd::new(self.0 - rhs.0)
    }
}

impl SubAssign for Usd {
    fn sub_assign(&mut self, rhs: Usd) {
        *self = *self - rhs;
    }
}

impl Neg for Usd {
    type Output = Usd;
    fn neg(self) -> Usd {
        Usd::new(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_up_at_fourth_decimal() {
        assert_eq!(Usd::new(dec!(0.00005)).inner(), dec!(0.0001));
        assert_eq!(Usd::new(dec!(0.00004)).inner(), dec!(0.0000));
        assert_eq!(Usd::new(dec!(-0.00005)).inner(), dec!(-0.0001));
    }

    #[test]
    fn display_is_fixed_four_decimals() {
        assert_eq!(Usd::new(dec!(1.3)).to_string(), "1.3000");
        assert_eq!(Usd::new(dec!(0)).to_string(), "0.0000");
        assert_eq!(Usd::new(dec!(-0.08)).to_string(), "-0.0800");
    }

    #[test]
    fn arithmetic_stays_rounded() {
        let a = Usd::new(dec!(0.001));
        let b = Usd::new(dec!(0.05));
        assert_eq!((a - b).to_string(), "-0.0490");
    }

    #[test]
    fn parse_db_roundtrip() {
        let v = Usd::new(dec!(12.3456));
        assert_eq!(Usd::parse_db(&v.to_string()).unwrap(), v);
    }

    #[test]
    fn negative_detection() {
        assert!(Usd::new(dec!(-0.0001)).is_negative());
        assert!(!Usd::ZERO.is_negative());
        assert!(!Usd::new(dec!(0.0001)).is_negative());
    }
}
