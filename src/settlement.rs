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

//! Settlement planning.
//!
//! Turns net balances into point-to-point transfers that zero every
//! balance. Greedy: always pair the largest creditor with the largest debtor
//! and move the smaller of the two magnitudes. Equal magnitudes are taken in
//! ascending participant id.
//!
//! Every round zeroes at least one side and the final round zeroes both, so
//! `n` non-zero balances settle in at most `n - 1` transfers. This is not
//! the minimum transfer count for every topology.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use trip_ledger::{Money, Transfer, UserId, plan_settlement};
//!
//! let balances = BTreeMap::from([
//!     (UserId(1), Money(66)),
//!     (UserId(2), Money(-33)),
//!     (UserId(3), Money(-33)),
//! ]);
//! let plan = plan_settlement(&balances).unwrap();
//! assert_eq!(plan, vec![
//!     Transfer { from: UserId(2), to: UserId(1), amount: Money(33) },
//!     Transfer { from: UserId(3), to: UserId(1), amount: Money(33) },
//! ]);
//! ```

use crate::LedgerError;
use crate::base::UserId;
use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// A payment of `amount` from a debtor to a creditor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: UserId,
    pub to: UserId,
    pub amount: Money,
}

/// Max-heap entry: largest magnitude first, then lowest id.
///
/// Magnitudes are unsigned so a balance of `i64::MIN` still has one.
type Party = (u64, Reverse<UserId>);

/// Plans the transfers that bring every balance to zero.
///
/// Pure: nothing is recorded. Callers that execute a transfer record it
/// with [`crate::ExpenseLedger::record_transfer`].
///
/// # Errors
///
/// - [`LedgerError::Imbalanced`] - balances do not sum to zero.
/// - [`LedgerError::InvalidAmount`] - the drift itself does not fit in an `i64`.
pub fn plan_settlement(balances: &BTreeMap<UserId, Money>) -> Result<Vec<Transfer>, LedgerError> {
    let drift = Money::checked_sum(balances.values().copied()).ok_or(LedgerError::InvalidAmount)?;
    if !drift.is_zero() {
        return Err(LedgerError::Imbalanced { drift });
    }

    let mut creditors: BinaryHeap<Party> = BinaryHeap::new();
    let mut debtors: BinaryHeap<Party> = BinaryHeap::new();
    for (participant, balance) in balances {
        if balance.is_positive() {
            creditors.push((balance.unsigned_abs(), Reverse(*participant)));
        } else if balance.is_negative() {
            debtors.push((balance.unsigned_abs(), Reverse(*participant)));
        }
    }

    let mut transfers = Vec::with_capacity(creditors.len() + debtors.len());
    while let (Some((credit, Reverse(creditor))), Some((debt, Reverse(debtor)))) =
        (creditors.pop(), debtors.pop())
    {
        // Bounded by a positive i64 balance, so it always converts back.
        let amount = credit.min(debt);
        transfers.push(Transfer {
            from: debtor,
            to: creditor,
            amount: Money(i64::try_from(amount).map_err(|_| LedgerError::InvalidAmount)?),
        });

        if credit > amount {
            creditors.push((credit - amount, Reverse(creditor)));
        }
        if debt > amount {
            debtors.push((debt - amount, Reverse(debtor)));
        }
    }

    debug_assert!(
        creditors.is_empty() && debtors.is_empty(),
        "Invariant violated: settlement left unmatched balances"
    );
    Ok(transfers)
}

/// Replays transfers against balances: the payer moves up, the payee down.
///
/// # Errors
///
/// [`LedgerError::InvalidAmount`] if a replayed balance leaves the `i64`
/// range. Nothing is returned in that case.
pub fn apply_transfers(
    balances: &BTreeMap<UserId, Money>,
    transfers: &[Transfer],
) -> Result<BTreeMap<UserId, Money>, LedgerError> {
    let mut result = balances.clone();
    for transfer in transfers {
        let payer = result.entry(transfer.from).or_default();
        *payer = payer
            .checked_add(transfer.amount)
            .ok_or(LedgerError::InvalidAmount)?;
        let payee = result.entry(transfer.to).or_default();
        *payee = payee
            .checked_sub(transfer.amount)
            .ok_or(LedgerError::InvalidAmount)?;
    }
    Ok(result)
}
