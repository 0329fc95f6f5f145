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

//! Trip accounting engine.
//!
//! The [`Engine`] bundles the trip roster, the expense ledger and the
//! proposal voting engine behind one `&self` API that mirrors what the
//! request layer exposes:
//!
//! | Request | Method |
//! |---------|--------|
//! | `POST expense` | [`Engine::add_expense`] |
//! | `POST expense/{id}/settle` | [`Engine::settle_split`] |
//! | `GET trip/{id}/balances` | [`Engine::balances`] |
//! | `GET trip/{id}/settlement-plan` | [`Engine::settlement_plan`] |
//! | `POST activity/{id}/proposal` | [`Engine::create_proposal`] |
//! | `POST activity/{id}/vote` | [`Engine::cast_vote`] |
//! | `GET activity/{id}/winning-proposal` | [`Engine::winning_proposal`] |
//!
//! # Thread Safety
//!
//! Share it as `Arc<Engine>`. Writes to one trip (or one activity) are
//! serialized; different trips and activities proceed in parallel.

use crate::LedgerError;
use crate::balance::{self, BalanceLine};
use crate::base::{ActivityId, ExpenseId, ProposalId, TripId, UserId};
use crate::config::EngineConfig;
use crate::expense::{Expense, ExpenseSplit, NewExpense};
use crate::ledger::{ExpenseCursor, ExpenseLedger};
use crate::money::Money;
use crate::roster::{InMemoryRoster, Roster};
use crate::settlement::{self, Transfer};
use crate::voting::{BudgetProposal, NewProposal, ProposalStanding, VoteOutcome, VotingEngine};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Result of recording an expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpenseReceipt {
    pub expense_id: ExpenseId,
    pub splits: Vec<ExpenseSplit>,
}

impl From<Expense> for ExpenseReceipt {
    fn from(expense: Expense) -> Self {
        Self {
            expense_id: expense.id,
            splits: expense.splits,
        }
    }
}

/// Current leader of an activity's vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WinningProposal {
    pub proposal_id: ProposalId,
    pub amount: Money,
    pub votes: usize,
}

impl From<ProposalStanding> for WinningProposal {
    fn from(standing: ProposalStanding) -> Self {
        Self {
            proposal_id: standing.proposal.id,
            amount: standing.proposal.amount,
            votes: standing.votes,
        }
    }
}

/// Accounting and voting core for group trips.
///
/// # Invariants
///
/// - Splits of every expense sum exactly to the expense amount.
/// - Balances of a trip sum to zero.
/// - A participant backs at most one proposal per activity.
pub struct Engine {
    roster: Arc<InMemoryRoster>,
    ledger: ExpenseLedger,
    voting: VotingEngine,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with default configuration and no trips.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let roster = Arc::new(InMemoryRoster::new());
        let shared: Arc<dyn Roster> = roster.clone();
        Engine {
            roster,
            ledger: ExpenseLedger::new(shared).with_lock_timeout(config.lock_timeout),
            voting: VotingEngine::new().with_lock_timeout(config.lock_timeout),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ExpenseLedger {
        &self.ledger
    }

    pub fn voting(&self) -> &VotingEngine {
        &self.voting
    }

    /// Converts a major-unit decimal using the configured currency scale.
    pub fn parse_amount(&self, value: Decimal) -> Result<Money, LedgerError> {
        Money::from_decimal(value, self.config.currency_scale)
    }

    /// Formats minor units as a major-unit decimal.
    pub fn format_amount(&self, amount: Money) -> Result<Decimal, LedgerError> {
        amount.to_decimal(self.config.currency_scale)
    }

    // === Roster ===

    /// Adds a participant to a trip. Returns `false` if already a member.
    pub fn join_trip(&self, trip: TripId, user: UserId) -> bool {
        self.roster.join(trip, user)
    }

    pub fn leave_trip(&self, trip: TripId, user: UserId) -> Result<(), LedgerError> {
        self.roster.leave(trip, user)
    }

    pub fn participants(&self, trip: TripId) -> Result<Vec<UserId>, LedgerError> {
        self.roster.participants(trip)
    }

    // === Ledger ===

    /// Records an expense and returns its id and split set.
    ///
    /// See [`ExpenseLedger::add_expense`] for the error cases.
    pub fn add_expense(&self, request: NewExpense) -> Result<ExpenseReceipt, LedgerError> {
        self.ledger.add_expense(request).map(ExpenseReceipt::from)
    }

    /// Marks one participant's split paid. Idempotent.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - no such expense, or no split for `participant`.
    /// - [`LedgerError::Timeout`] - trip lock not acquired in time.
    pub fn settle_split(
        &self,
        expense: ExpenseId,
        participant: UserId,
    ) -> Result<bool, LedgerError> {
        self.ledger.mark_split_paid(expense, participant)
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown id, [`LedgerError::Timeout`]
    /// if the trip is busy past the deadline.
    pub fn expense(&self, expense: ExpenseId) -> Result<Expense, LedgerError> {
        self.ledger.expense(expense)
    }

    pub fn list_expenses(&self, trip: TripId) -> ExpenseCursor {
        self.ledger.list_expenses(trip)
    }

    /// Net balance per participant, recomputed from the ledger.
    ///
    /// See [`balance::balance_sheet`] for the error cases.
    pub fn balances(&self, trip: TripId) -> Result<BTreeMap<UserId, Money>, LedgerError> {
        balance::compute_balances(&self.ledger, trip)
    }

    pub fn balance_sheet(
        &self,
        trip: TripId,
    ) -> Result<BTreeMap<UserId, BalanceLine>, LedgerError> {
        balance::balance_sheet(&self.ledger, trip)
    }

    /// Transfers that would settle the trip right now.
    ///
    /// # Errors
    ///
    /// Any error from [`Engine::balances`], plus [`LedgerError::Imbalanced`]
    /// from the planner.
    pub fn settlement_plan(&self, trip: TripId) -> Result<Vec<Transfer>, LedgerError> {
        let balances = self.balances(trip)?;
        settlement::plan_settlement(&balances)
    }

    /// Records an executed transfer as an offsetting expense.
    pub fn record_transfer(
        &self,
        trip: TripId,
        transfer: &Transfer,
    ) -> Result<ExpenseReceipt, LedgerError> {
        self.ledger
            .record_transfer(trip, transfer)
            .map(ExpenseReceipt::from)
    }

    // === Voting ===

    /// Opens a new proposal on an activity.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative amount.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn create_proposal(&self, request: NewProposal) -> Result<BudgetProposal, LedgerError> {
        self.voting.create_proposal(request)
    }

    /// Casts or moves `participant`'s single vote on `activity`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownProposal`] - proposal unknown, inactive, or on
    ///   another activity.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn cast_vote(
        &self,
        activity: ActivityId,
        participant: UserId,
        proposal: ProposalId,
    ) -> Result<VoteOutcome, LedgerError> {
        self.voting.cast_vote(activity, participant, proposal)
    }

    /// Withdraws `participant`'s vote and returns the proposal it was on.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - the participant has no vote there.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn retract_vote(
        &self,
        activity: ActivityId,
        participant: UserId,
    ) -> Result<ProposalId, LedgerError> {
        self.voting.retract_vote(activity, participant)
    }

    /// Closes a proposal to voting. Only its creator may do this.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownProposal`] - no such proposal.
    /// - [`LedgerError::Unauthorized`] - `requester` is not the creator.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn deactivate_proposal(
        &self,
        proposal: ProposalId,
        requester: UserId,
    ) -> Result<(), LedgerError> {
        self.voting.deactivate_proposal(proposal, requester)
    }

    /// Active proposal with the most votes; ties go to the earliest created.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoProposals`] - nothing is open for voting.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn winning_proposal(&self, activity: ActivityId) -> Result<WinningProposal, LedgerError> {
        self.voting
            .winning_proposal(activity)
            .map(WinningProposal::from)
    }

    /// Every proposal of the activity with its current vote count.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Timeout`] if the ballot lock is not acquired in time.
    pub fn proposals(&self, activity: ActivityId) -> Result<Vec<ProposalStanding>, LedgerError> {
        self.voting.proposals(activity)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
