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

//! # Trip Ledger
//!
//! Shared accounting for group trips: record expenses paid by one
//! participant on behalf of the group, split them exactly, derive each
//! participant's net balance, and plan the transfers that settle the trip.
//! A small voting engine lets participants pick among priced proposals for
//! an activity.
//!
//! ## Core Components
//!
//! - [`Money`] / [`split_equal`]: integer minor units and exact splitting
//! - [`ExpenseLedger`]: append-only expenses with immutable split sets
//! - [`compute_balances`]: net positions derived from the ledger on demand
//! - [`plan_settlement`]: greedy largest-creditor/largest-debtor transfer plan
//! - [`VotingEngine`]: budget proposals with one vote per participant
//! - [`Engine`]: all of the above behind one thread-safe facade
//!
//! ## Example
//!
//! ```
//! use trip_ledger::{Engine, Money, NewExpense, TripId, UserId};
//!
//! let engine = Engine::new();
//! for user in 1..=3 {
//!     engine.join_trip(TripId(1), UserId(user));
//! }
//!
//! engine
//!     .add_expense(NewExpense::equal(TripId(1), UserId(1), Money(100), "Dinner"))
//!     .unwrap();
//!
//! let balances = engine.balances(TripId(1)).unwrap();
//! assert_eq!(balances[&UserId(1)], Money(66));
//! assert_eq!(engine.settlement_plan(TripId(1)).unwrap().len(), 2);
//! ```
//!
//! ## Thread Safety
//!
//! Every trip and every activity has its own lock, so requests for different
//! trips run in parallel while writes to the same trip are serialized.

pub mod balance;
mod base;
pub mod config;
mod engine;
pub mod error;
pub mod expense;
pub mod ledger;
mod money;
pub mod roster;
pub mod settlement;
pub mod voting;

pub use balance::{BalanceLine, balance_sheet, compute_balances};
pub use base::{ActivityId, ExpenseId, ProposalId, TripId, UserId};
pub use config::EngineConfig;
pub use engine::{Engine, ExpenseReceipt, WinningProposal};
pub use error::LedgerError;
pub use expense::{Category, Expense, ExpenseSplit, NewExpense, SplitPolicy};
pub use ledger::{ExpenseCursor, ExpenseLedger};
pub use money::{MAX_SCALE, Money, split_equal};
pub use roster::{InMemoryRoster, Roster};
pub use settlement::{Transfer, apply_transfers, plan_settlement};
pub use voting::{
    BudgetProposal, NewProposal, ProposalStanding, VoteChange, VoteEvent, VoteOutcome,
    VotingEngine,
};
