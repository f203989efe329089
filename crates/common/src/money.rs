//! Decimal-exact currency amounts.

use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of fractional digits kept for currency amounts.
pub const CURRENCY_SCALE: u32 = 2;

/// A monetary amount in the wallet currency.
///
/// Backed by [`Decimal`] so that pricing and ledger arithmetic never go
/// through floating point. Serializes as a decimal string (`"257.00"`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero amount.
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Largest amount a ledger column holds (`NUMERIC(18, 2)`).
    pub const MAX: Money = Money(Decimal::from_parts(
        0xA763_FFFF,
        0x0DE0_B6B3,
        0,
        false,
        CURRENCY_SCALE,
    ));

    /// Wraps a decimal amount.
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates an amount from whole currency units.
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::new(units, 0))
    }

    /// Creates an amount from hundredths (`from_minor(2550)` is 25.50).
    pub fn from_minor(minor: i64) -> Self {
        Self(Decimal::new(minor, CURRENCY_SCALE))
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    /// Returns the underlying decimal.
    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True when the amount has no digits below a cent.
    pub fn is_whole_cents(&self) -> bool {
        self.0.normalize().scale() <= CURRENCY_SCALE
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Multiplies by an item quantity.
    pub fn multiply(&self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }

    /// Applies a rate (e.g. a tax rate) and rounds half away from zero to cents.
    pub fn apply_rate(&self, rate: Decimal) -> Self {
        Self(self.0 * rate).round()
    }

    /// Rounds to cents, half away from zero.
    pub fn round(&self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Returns the smaller of two amounts.
    pub fn min(self, other: Self) -> Self {
        if self <= other { self } else { other }
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::str::FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<Decimal>().map(Self)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
