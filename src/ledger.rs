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

//! Expense ledger.
//!
//! Each trip owns an append-only log of expenses behind its own
//! [`RwLock`]. An expense and its complete split set are built and validated
//! before the write lock is taken and pushed as a single element, so a reader
//! never observes an expense without its splits.
//!
//! # Thread Safety
//!
//! Trips are independent: writers on different trips never contend. Within a
//! trip, writers serialize on the log lock, which also fixes creation order.

use crate::LedgerError;
use crate::base::{ExpenseId, TripId, UserId};
use crate::expense::{Category, Expense, NewExpense, SplitPolicy};
use crate::roster::Roster;
use crate::settlement::Transfer;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

type TripLog = Arc<RwLock<Vec<Expense>>>;

/// Append-only store of expenses, one log per trip.
pub struct ExpenseLedger {
    roster: Arc<dyn Roster>,
    trips: DashMap<TripId, TripLog>,
    /// Expense id to `(trip, position in the trip log)`.
    index: DashMap<ExpenseId, (TripId, usize)>,
    next_id: AtomicU64,
    lock_timeout: Option<Duration>,
}

impl ExpenseLedger {
    pub fn new(roster: Arc<dyn Roster>) -> Self {
        Self {
            roster,
            trips: DashMap::new(),
            index: DashMap::new(),
            next_id: AtomicU64::new(1),
            lock_timeout: None,
        }
    }

    /// Bounds how long a writer waits for a busy trip.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn roster(&self) -> &Arc<dyn Roster> {
        &self.roster
    }

    /// Records an expense and its splits as one unit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount <= 0`, or a negative custom share.
    /// - [`LedgerError::UnknownTrip`] - trip is not known to the roster.
    /// - [`LedgerError::UnknownParticipant`] - payer or split target not in the trip.
    /// - [`LedgerError::DuplicateSplitTarget`] - custom split lists a participant twice.
    /// - [`LedgerError::SplitMismatch`] - custom split does not sum to `amount`.
    /// - [`LedgerError::EmptyRoster`] - equal split over a trip with no members.
    /// - [`LedgerError::Timeout`] - trip lock not acquired in time; nothing written.
    pub fn add_expense(&self, request: NewExpense) -> Result<Expense, LedgerError> {
        let trip = request.trip;
        let payer = request.payer;
        let amount = request.amount;

        let result = self.insert(request);
        match &result {
            Ok(expense) => debug!(
                trip = %trip,
                expense = %expense.id,
                payer = %payer,
                amount = %amount,
                splits = expense.splits.len(),
                "expense recorded"
            ),
            Err(error) => warn!(
                trip = %trip,
                payer = %payer,
                amount = %amount,
                %error,
                "expense rejected"
            ),
        }
        result
    }

    fn insert(&self, request: NewExpense) -> Result<Expense, LedgerError> {
        if !request.amount.is_positive() {
            return Err(LedgerError::InvalidAmount);
        }

        // Membership is read once; later roster changes never touch these splits.
        let members = self.roster.participants(request.trip)?;
        if !members.contains(&request.payer) {
            return Err(LedgerError::UnknownParticipant(request.payer));
        }
        let splits = request.split.resolve(request.amount, &members)?;

        let log = self.trip_log(request.trip);
        let mut expenses = self.write(&log)?;

        let id = ExpenseId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let expense = Expense {
            id,
            trip: request.trip,
            payer: request.payer,
            amount: request.amount,
            description: request.description,
            category: request.category,
            created_at: Utc::now(),
            settled_at: None,
            splits,
        };
        expense.assert_invariants();

        self.index.insert(id, (request.trip, expenses.len()));
        expenses.push(expense.clone());
        Ok(expense)
    }

    /// Records an executed settlement transfer as an offsetting expense.
    ///
    /// The debtor (`transfer.from`) becomes the payer and the creditor
    /// (`transfer.to`) owes the whole amount, which moves both balances
    /// toward zero by `transfer.amount`.
    pub fn record_transfer(
        &self,
        trip: TripId,
        transfer: &Transfer,
    ) -> Result<Expense, LedgerError> {
        let request = NewExpense {
            trip,
            payer: transfer.from,
            amount: transfer.amount,
            description: format!("Settlement {} -> {}", transfer.from, transfer.to),
            category: Category::Settlement,
            split: SplitPolicy::Custom(vec![(transfer.to, transfer.amount)]),
        };
        self.add_expense(request)
    }

    /// Marks one participant's split of an expense as paid.
    ///
    /// Idempotent. Returns `true` if the split changed state. Other splits of
    /// the same expense are untouched.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the expense or the split does not exist.
    pub fn mark_split_paid(
        &self,
        expense_id: ExpenseId,
        participant: UserId,
    ) -> Result<bool, LedgerError> {
        let (trip, position) = self
            .index
            .get(&expense_id)
            .map(|entry| *entry)
            .ok_or(LedgerError::NotFound)?;
        let log = self
            .trips
            .get(&trip)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)?;

        let mut expenses = self.write(&log)?;
        let expense = expenses
            .get_mut(position)
            .ok_or(LedgerError::NotFound)?;
        let changed = expense.mark_split_paid(participant, Utc::now())?;

        debug!(
            trip = %trip,
            expense = %expense_id,
            participant = %participant,
            changed,
            "split marked paid"
        );
        Ok(changed)
    }

    /// Looks up a single expense.
    pub fn expense(&self, expense_id: ExpenseId) -> Result<Expense, LedgerError> {
        let (trip, position) = self
            .index
            .get(&expense_id)
            .map(|entry| *entry)
            .ok_or(LedgerError::NotFound)?;
        let log = self
            .trips
            .get(&trip)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)?;
        let expenses = self.read(&log)?;
        expenses.get(position).cloned().ok_or(LedgerError::NotFound)
    }

    /// Lazily walks the trip's expenses in creation order.
    ///
    /// The cursor covers the expenses that existed when it was created and
    /// can be rewound to replay them.
    pub fn list_expenses(&self, trip: TripId) -> ExpenseCursor {
        let log = self
            .trips
            .get(&trip)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_default();
        ExpenseCursor::new(log)
    }

    /// Consistent copy of every expense of the trip.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Timeout`] if the trip log is not readable in time.
    pub fn snapshot(&self, trip: TripId) -> Result<Vec<Expense>, LedgerError> {
        let Some(log) = self.trips.get(&trip).map(|entry| Arc::clone(entry.value())) else {
            return Ok(Vec::new());
        };
        let expenses = self.read(&log)?;
        Ok(expenses.clone())
    }

    fn trip_log(&self, trip: TripId) -> TripLog {
        // Clone the Arc so the map shard is released before the log is locked.
        Arc::clone(self.trips.entry(trip).or_default().value())
    }

    fn read<'a>(
        &self,
        log: &'a RwLock<Vec<Expense>>,
    ) -> Result<RwLockReadGuard<'a, Vec<Expense>>, LedgerError> {
        match self.lock_timeout {
            Some(timeout) => log.try_read_for(timeout).ok_or(LedgerError::Timeout),
            None => Ok(log.read()),
        }
    }

    fn write<'a>(
        &self,
        log: &'a RwLock<Vec<Expense>>,
    ) -> Result<RwLockWriteGuard<'a, Vec<Expense>>, LedgerError> {
        match self.lock_timeout {
            Some(timeout) => log.try_write_for(timeout).ok_or(LedgerError::Timeout),
            None => Ok(log.write()),
        }
    }
}

/// Restartable, lazy iterator over a trip's expenses.
///
/// Each step takes the read lock just long enough to clone one expense.
#[derive(Debug, Clone)]
pub struct ExpenseCursor {
    log: TripLog,
    position: usize,
    end: usize,
}

impl ExpenseCursor {
    fn new(log: TripLog) -> Self {
        let end = log.read().len();
        Self {
            log,
            position: 0,
            end,
        }
    }

    /// Starts again from the first expense.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Number of expenses covered by this cursor.
    pub fn total(&self) -> usize {
        self.end
    }
}

impl Iterator for ExpenseCursor {
    type Item = Expense;

    fn next(&mut self) -> Option<Expense> {
        if self.position >= self.end {
            return None;
        }
        let expense = self.log.read().get(self.position).cloned();
        self.position += 1;
        expense
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;
    use crate::roster::InMemoryRoster;

    fn ledger_with_members(members: &[u32]) -> ExpenseLedger {
        let roster = InMemoryRoster::new();
        for member in members {
            roster.join(TripId(1), UserId(*member));
        }
        ExpenseLedger::new(Arc::new(roster))
    }

    #[test]
    fn ids_increase_with_creation() {
        let ledger = ledger_with_members(&[1, 2]);
        let first = ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(10), "a"))
            .unwrap();
        let second = ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(2), Money(10), "b"))
            .unwrap();
        assert!(first.id < second.id);
        assert!(first.created_at <= second.created_at);
    }

    #[test]
    fn cursor_is_bounded_and_rewindable() {
        let ledger = ledger_with_members(&[1, 2]);
        for i in 1..=3 {
            ledger
                .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(i), "x"))
                .unwrap();
        }

        let mut cursor = ledger.list_expenses(TripId(1));
        ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(99), "late"))
            .unwrap();

        let amounts: Vec<Money> = cursor.by_ref().map(|expense| expense.amount).collect();
        assert_eq!(amounts, vec![Money(1), Money(2), Money(3)]);
        assert_eq!(cursor.next(), None);

        cursor.rewind();
        assert_eq!(cursor.count(), 3);
    }

    #[test]
    fn cursor_for_unknown_trip_is_empty() {
        let ledger = ledger_with_members(&[1]);
        assert_eq!(ledger.list_expenses(TripId(42)).count(), 0);
    }

    #[test]
    fn timed_out_writer_applies_nothing() {
        let ledger =
            ledger_with_members(&[1, 2]).with_lock_timeout(Some(Duration::from_millis(10)));
        ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(10), "first"))
            .unwrap();

        let log = ledger.trip_log(TripId(1));
        let held = log.read();
        let result =
            ledger.add_expense(NewExpense::equal(TripId(1), UserId(1), Money(10), "blocked"));
        drop(held);

        assert_eq!(result, Err(LedgerError::Timeout));
        assert_eq!(ledger.list_expenses(TripId(1)).count(), 1);
    }

    #[test]
    fn expense_lookup() {
        let ledger = ledger_with_members(&[1, 2]);
        let recorded = ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(10), "a"))
            .unwrap();
        assert_eq!(ledger.expense(recorded.id).unwrap(), recorded);
        assert_eq!(ledger.expense(ExpenseId(999)), Err(LedgerError::NotFound));
    }

    #[test]
    fn reads_behind_a_busy_writer_time_out() {
        let ledger =
            ledger_with_members(&[1, 2]).with_lock_timeout(Some(Duration::from_millis(10)));
        let recorded = ledger
            .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(10), "first"))
            .unwrap();

        let log = ledger.trip_log(TripId(1));
        let held = log.write();
        assert_eq!(ledger.expense(recorded.id), Err(LedgerError::Timeout));
        assert_eq!(ledger.snapshot(TripId(1)), Err(LedgerError::Timeout));
        drop(held);

        assert_eq!(ledger.snapshot(TripId(1)).unwrap(), vec![recorded]);
    }
}
