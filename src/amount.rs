//! Fixed-point currency amounts
//!
//! Balances, transfer amounts, and fees are all [`Amount`]s: unsigned
//! integers counting base units at eight decimal places. Integer base units
//! keep arithmetic exact where a binary fixed-point or float representation
//! would drift on decimal fractions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::NodeError;

/// Base units per whole coin (eight decimal places).
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Divisor for basis-point fee rates.
const BASIS_POINT_SCALE: u128 = 10_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_units(units: u64) -> Self {
        Amount(units)
    }

    /// Whole-coin constructor. Panics on overflow, so reserve it for
    /// compile-time-known constants like the block reward.
    pub const fn from_coins(coins: u64) -> Self {
        Amount(coins * UNITS_PER_COIN)
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Fee at the given basis-point rate, rounded down to a base unit.
    pub fn fee(&self, basis_points: u64) -> Amount {
        let fee = self.0 as u128 * basis_points as u128 / BASIS_POINT_SCALE;
        // The product of a u64 amount and a validated rate below 10_000
        // divided back down always fits.
        Amount(fee as u64)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / UNITS_PER_COIN, self.0 % UNITS_PER_COIN)
    }
}

impl FromStr for Amount {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || NodeError::InvalidAmount(s.to_string());

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(bad());
        }
        if frac.len() > 8 {
            return Err(bad());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(bad());
        }

        let whole_units = if whole.is_empty() {
            0
        } else {
            whole
                .parse::<u64>()
                .ok()
                .and_then(|w| w.checked_mul(UNITS_PER_COIN))
                .ok_or_else(bad)?
        };

        let mut padded = frac.to_string();
        while padded.len() < 8 {
            padded.push('0');
        }
        let frac_units: u64 = padded.parse().map_err(|_| bad())?;

        whole_units.checked_add(frac_units).map(Amount).ok_or_else(bad)
    }
}
