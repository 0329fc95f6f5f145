// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-point money and exact split arithmetic.
//!
//! All amounts are signed integer counts of a currency's minor unit (cents
//! for a scale of 2). Decimal values only appear at the edges, where
//! [`Money::from_decimal`] refuses anything that is not a whole number of
//! minor units.
//!
//! There are no arithmetic operators on [`Money`]. Every sum and difference
//! goes through the `checked_*` methods so an overflow surfaces as
//! [`LedgerError::InvalidAmount`] instead of wrapping.
//!
//! # Example
//!
//! ```
//! use trip_ledger::{Money, split_equal};
//!
//! let shares = split_equal(Money(100), 3).unwrap();
//! assert_eq!(shares, vec![Money(34), Money(33), Money(33)]);
//! ```

use crate::LedgerError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest supported number of fractional digits per major unit.
pub const MAX_SCALE: u32 = 18;

/// An amount of money in integer minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Converts a major-unit decimal (e.g. `12.34`) into minor units.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] if `value` has more fractional digits
    /// than `scale`, if `scale` exceeds [`MAX_SCALE`], or if the result does
    /// not fit in an `i64`.
    pub fn from_decimal(value: Decimal, scale: u32) -> Result<Self, LedgerError> {
        if scale > MAX_SCALE {
            return Err(LedgerError::InvalidAmount);
        }
        let factor = 10i64.checked_pow(scale).ok_or(LedgerError::InvalidAmount)?;
        let minor = value
            .checked_mul(Decimal::from(factor))
            .ok_or(LedgerError::InvalidAmount)?;
        if !minor.fract().is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        minor.to_i64().map(Money).ok_or(LedgerError::InvalidAmount)
    }

    /// Converts back into a major-unit decimal with exactly `scale` digits.
    pub fn to_decimal(self, scale: u32) -> Result<Decimal, LedgerError> {
        if scale > MAX_SCALE {
            return Err(LedgerError::InvalidAmount);
        }
        Decimal::try_new(self.0, scale).map_err(|_| LedgerError::InvalidAmount)
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// Sums without wrapping.
    ///
    /// Intermediate totals are widened, so only a final result outside the
    /// `i64` range yields `None`; the order of the terms never matters.
    pub fn checked_sum<I>(iter: I) -> Option<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        let total = iter
            .into_iter()
            .try_fold(0i128, |acc, amount| acc.checked_add(i128::from(amount.0)))?;
        i64::try_from(total).ok().map(Money)
    }

    /// Magnitude in minor units. Defined for every value, `i64::MIN` included.
    pub fn unsigned_abs(self) -> u64 {
        self.0.unsigned_abs()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Splits `total` into `n` shares that differ by at most one minor unit.
///
/// Every share is `total / n`; the first `total % n` shares get one extra
/// unit. Callers pass participants in ascending id order, so the lowest ids
/// absorb the remainder.
///
/// # Errors
///
/// - [`LedgerError::EmptyRoster`] if `n == 0`.
/// - [`LedgerError::InvalidAmount`] if `total` is negative.
pub fn split_equal(total: Money, n: usize) -> Result<Vec<Money>, LedgerError> {
    if n == 0 {
        return Err(LedgerError::EmptyRoster);
    }
    if total.is_negative() {
        return Err(LedgerError::InvalidAmount);
    }
    let count = i64::try_from(n).map_err(|_| LedgerError::InvalidAmount)?;
    let base = total.0 / count;
    // remainder < n, so the cast back to usize is lossless
    let extra = (total.0 % count) as usize;

    let shares: Vec<Money> = (0..n)
        .map(|i| if i < extra { Money(base + 1) } else { Money(base) })
        .collect();

    debug_assert_eq!(Money::checked_sum(shares.iter().copied()), Some(total));
    Ok(shares)
}
