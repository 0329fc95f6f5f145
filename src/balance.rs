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

//! Net balances derived from the expense log.
//!
//! Balances are never stored. They are recomputed from the immutable
//! expenses on every call, so they cannot drift from the ledger.
//!
//! For each participant: `net = paid as payer - owed through splits`.
//! Positive means the group owes them money; negative means they owe.
//!
//! Paid markers on splits do not change the result. A repayment only shows
//! up once it is recorded as its own expense
//! (see [`ExpenseLedger::record_transfer`]).

use crate::LedgerError;
use crate::base::{TripId, UserId};
use crate::expense::Expense;
use crate::ledger::ExpenseLedger;
use crate::money::Money;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-participant totals behind a net balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BalanceLine {
    pub paid: Money,
    pub owed: Money,
    pub net: Money,
}

/// Computes `{paid, owed, net}` for every participant of a trip.
///
/// Participants are the current roster plus anyone who left but is still
/// referenced by an expense, so the nets always cover the whole ledger.
///
/// # Errors
///
/// - [`LedgerError::UnknownTrip`] - trip is not known to the roster.
/// - [`LedgerError::InvalidAmount`] - a total overflowed.
/// - [`LedgerError::Imbalanced`] - nets do not sum to zero.
/// - [`LedgerError::Timeout`] - trip log not readable in time.
pub fn balance_sheet(
    ledger: &ExpenseLedger,
    trip: TripId,
) -> Result<BTreeMap<UserId, BalanceLine>, LedgerError> {
    let members = ledger.roster().participants(trip)?;
    let expenses = ledger.snapshot(trip)?;
    sheet_from_expenses(&members, &expenses)
}

/// Net balance of every participant of a trip, keyed in ascending id order.
///
/// The values always sum to zero; a ledger that would violate this is
/// reported as [`LedgerError::Imbalanced`] rather than returned.
pub fn compute_balances(
    ledger: &ExpenseLedger,
    trip: TripId,
) -> Result<BTreeMap<UserId, Money>, LedgerError> {
    let sheet = balance_sheet(ledger, trip)?;
    Ok(sheet
        .into_iter()
        .map(|(participant, line)| (participant, line.net))
        .collect())
}

/// Folds a set of expenses into a balance sheet.
pub fn sheet_from_expenses(
    members: &[UserId],
    expenses: &[Expense],
) -> Result<BTreeMap<UserId, BalanceLine>, LedgerError> {
    let mut sheet: BTreeMap<UserId, BalanceLine> = members
        .iter()
        .map(|member| (*member, BalanceLine::default()))
        .collect();

    for expense in expenses {
        let payer = sheet.entry(expense.payer).or_default();
        payer.paid = payer
            .paid
            .checked_add(expense.amount)
            .ok_or(LedgerError::InvalidAmount)?;

        for split in &expense.splits {
            let debtor = sheet.entry(split.participant).or_default();
            debtor.owed = debtor
                .owed
                .checked_add(split.amount)
                .ok_or(LedgerError::InvalidAmount)?;
        }
    }

    for line in sheet.values_mut() {
        line.net = line
            .paid
            .checked_sub(line.owed)
            .ok_or(LedgerError::InvalidAmount)?;
    }

    let drift = Money::checked_sum(sheet.values().map(|line| line.net))
        .ok_or(LedgerError::InvalidAmount)?;
    debug_assert!(drift.is_zero(), "Invariant violated: balances drift by {drift}");
    if !drift.is_zero() {
        return Err(LedgerError::Imbalanced { drift });
    }

    Ok(sheet)
}
