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

//! Expenses and the per-participant splits they create.
//!
//! An expense is immutable once recorded. The only thing that ever changes
//! is the settlement marker on its splits (and, once every split is marked,
//! on the expense itself):
//!
//! ```text
//!  split (unpaid) ──mark paid──► split (paid, settled_at)
//!  all splits paid ────────────► expense.settled_at
//! ```
//!
//! A paid marker is bookkeeping only. It never removes the obligation from
//! the balances; a real repayment is recorded as a new offsetting expense.

use crate::LedgerError;
use crate::base::{ExpenseId, TripId, UserId};
use crate::money::{Money, split_equal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Food,
    Lodging,
    Transport,
    Activity,
    Shopping,
    /// Repayment recorded from a settlement transfer.
    Settlement,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Lodging => "lodging",
            Self::Transport => "transport",
            Self::Activity => "activity",
            Self::Shopping => "shopping",
            Self::Settlement => "settlement",
            Self::Other => "other",
        }
    }
}

impl From<&str> for Category {
    /// Case-insensitive; anything unrecognised is [`Category::Other`].
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "food" => Self::Food,
            "lodging" => Self::Lodging,
            "transport" => Self::Transport,
            "activity" => Self::Activity,
            "shopping" => Self::Shopping,
            "settlement" => Self::Settlement,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an expense is divided among participants.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "shares", rename_all = "lowercase")]
pub enum SplitPolicy {
    /// Divide over every current trip participant, remainder to the lowest ids.
    #[default]
    Equal,
    /// Caller-supplied shares; must add up to the expense amount exactly.
    Custom(Vec<(UserId, Money)>),
}

impl SplitPolicy {
    /// Produces the split set for an expense of `amount`.
    ///
    /// `members` is the trip roster in ascending id order.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EmptyRoster`] - equal split over an empty trip.
    /// - [`LedgerError::UnknownParticipant`] - custom share for a non-member.
    /// - [`LedgerError::DuplicateSplitTarget`] - same participant listed twice.
    /// - [`LedgerError::InvalidAmount`] - a negative custom share.
    /// - [`LedgerError::SplitMismatch`] - custom shares do not sum to `amount`.
    pub fn resolve(
        &self,
        amount: Money,
        members: &[UserId],
    ) -> Result<Vec<ExpenseSplit>, LedgerError> {
        match self {
            Self::Equal => {
                let shares = split_equal(amount, members.len())?;
                Ok(members
                    .iter()
                    .zip(shares)
                    .map(|(participant, share)| ExpenseSplit::new(*participant, share))
                    .collect())
            }
            Self::Custom(shares) => {
                let mut seen = HashSet::with_capacity(shares.len());
                for (participant, share) in shares {
                    if !members.contains(participant) {
                        return Err(LedgerError::UnknownParticipant(*participant));
                    }
                    if !seen.insert(*participant) {
                        return Err(LedgerError::DuplicateSplitTarget(*participant));
                    }
                    if share.is_negative() {
                        return Err(LedgerError::InvalidAmount);
                    }
                }

                let actual = Money::checked_sum(shares.iter().map(|(_, share)| *share))
                    .ok_or(LedgerError::InvalidAmount)?;
                if actual != amount {
                    return Err(LedgerError::SplitMismatch {
                        expected: amount,
                        actual,
                    });
                }

                let mut splits: Vec<ExpenseSplit> = shares
                    .iter()
                    .map(|(participant, share)| ExpenseSplit::new(*participant, *share))
                    .collect();
                splits.sort_by_key(|split| split.participant);
                Ok(splits)
            }
        }
    }
}

/// Request to record a new expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExpense {
    pub trip: TripId,
    pub payer: UserId,
    pub amount: Money,
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub split: SplitPolicy,
}

impl NewExpense {
    /// Equal split over the current roster, category [`Category::Other`].
    pub fn equal(
        trip: TripId,
        payer: UserId,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            trip,
            payer,
            amount,
            description: description.into(),
            category: Category::Other,
            split: SplitPolicy::Equal,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    pub fn with_split(mut self, split: SplitPolicy) -> Self {
        self.split = split;
        self
    }
}

/// The share of one expense owed by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseSplit {
    pub participant: UserId,
    pub amount: Money,
    pub paid: bool,
    pub settled_at: Option<DateTime<Utc>>,
}

impl ExpenseSplit {
    fn new(participant: UserId, amount: Money) -> Self {
        Self {
            participant,
            amount,
            paid: false,
            settled_at: None,
        }
    }
}

/// A recorded expense together with its full split set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub trip: TripId,
    pub payer: UserId,
    pub amount: Money,
    pub description: String,
    pub category: Category,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
    pub splits: Vec<ExpenseSplit>,
}

impl Expense {
    pub(crate) fn assert_invariants(&self) {
        debug_assert!(
            self.amount.is_positive(),
            "Invariant violated: expense {} has non-positive amount {}",
            self.id,
            self.amount
        );
        debug_assert_eq!(
            Money::checked_sum(self.splits.iter().map(|split| split.amount)),
            Some(self.amount),
            "Invariant violated: splits of expense {} do not sum to its amount",
            self.id
        );
    }

    pub fn split_for(&self, participant: UserId) -> Option<&ExpenseSplit> {
        self.splits
            .iter()
            .find(|split| split.participant == participant)
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    /// Marks one split paid. Idempotent: an already paid split keeps its
    /// original timestamp.
    ///
    /// Returns `true` if the split changed.
    pub(crate) fn mark_split_paid(
        &mut self,
        participant: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let split = self
            .splits
            .iter_mut()
            .find(|split| split.participant == participant)
            .ok_or(LedgerError::NotFound)?;
        if split.paid {
            return Ok(false);
        }
        split.paid = true;
        split.settled_at = Some(at);

        if self.settled_at.is_none() && self.splits.iter().all(|split| split.paid) {
            self.settled_at = Some(at);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<UserId> {
        vec![UserId(1), UserId(2), UserId(3)]
    }

    #[test]
    fn equal_split_follows_roster_order() {
        let splits = SplitPolicy::Equal.resolve(Money(100), &members()).unwrap();
        let shares: Vec<(UserId, Money)> = splits
            .iter()
            .map(|split| (split.participant, split.amount))
            .collect();
        assert_eq!(
            shares,
            vec![
                (UserId(1), Money(34)),
                (UserId(2), Money(33)),
                (UserId(3), Money(33)),
            ]
        );
        assert!(splits.iter().all(|split| !split.paid));
    }

    #[test]
    fn equal_split_over_empty_roster() {
        assert_eq!(
            SplitPolicy::Equal.resolve(Money(100), &[]),
            Err(LedgerError::EmptyRoster)
        );
    }

    #[test]
    fn custom_split_must_match_amount() {
        let policy = SplitPolicy::Custom(vec![(UserId(1), Money(5)), (UserId(2), Money(4))]);
        assert_eq!(
            policy.resolve(Money(10), &members()),
            Err(LedgerError::SplitMismatch {
                expected: Money(10),
                actual: Money(9),
            })
        );
    }

    #[test]
    fn custom_split_rejects_non_member() {
        let policy = SplitPolicy::Custom(vec![(UserId(1), Money(5)), (UserId(9), Money(5))]);
        assert_eq!(
            policy.resolve(Money(10), &members()),
            Err(LedgerError::UnknownParticipant(UserId(9)))
        );
    }

    #[test]
    fn custom_split_rejects_duplicates() {
        let policy = SplitPolicy::Custom(vec![(UserId(1), Money(5)), (UserId(1), Money(5))]);
        assert_eq!(
            policy.resolve(Money(10), &members()),
            Err(LedgerError::DuplicateSplitTarget(UserId(1)))
        );
    }

    #[test]
    fn custom_split_rejects_negative_share() {
        let policy = SplitPolicy::Custom(vec![(UserId(1), Money(15)), (UserId(2), Money(-5))]);
        assert_eq!(
            policy.resolve(Money(10), &members()),
            Err(LedgerError::InvalidAmount)
        );
    }

    #[test]
    fn custom_split_allows_zero_shares_and_sorts() {
        let policy = SplitPolicy::Custom(vec![
            (UserId(3), Money(0)),
            (UserId(1), Money(5)),
            (UserId(2), Money(5)),
        ]);
        let splits = policy.resolve(Money(10), &members()).unwrap();
        let order: Vec<UserId> = splits.iter().map(|split| split.participant).collect();
        assert_eq!(order, members());
    }

    #[test]
    fn category_parsing_is_lenient() {
        assert_eq!(Category::from("Food"), Category::Food);
        assert_eq!(Category::from(" transport "), Category::Transport);
        assert_eq!(Category::from("souvenirs"), Category::Other);
        assert_eq!(Category::Lodging.to_string(), "lodging");
    }

    #[test]
    fn marking_every_split_settles_the_expense() {
        let mut expense = Expense {
            id: ExpenseId(1),
            trip: TripId(1),
            payer: UserId(1),
            amount: Money(10),
            description: "Taxi".into(),
            category: Category::Transport,
            created_at: Utc::now(),
            settled_at: None,
            splits: SplitPolicy::Equal
                .resolve(Money(10), &[UserId(1), UserId(2)])
                .unwrap(),
        };
        let now = Utc::now();

        assert!(expense.mark_split_paid(UserId(1), now).unwrap());
        assert!(!expense.is_settled());
        assert!(!expense.mark_split_paid(UserId(1), now).unwrap());
        assert!(expense.mark_split_paid(UserId(2), now).unwrap());
        assert!(expense.is_settled());
        assert_eq!(
            expense.mark_split_paid(UserId(3), now),
            Err(LedgerError::NotFound)
        );
    }
}
