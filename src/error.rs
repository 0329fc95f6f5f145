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

//! Error types for the ledger and voting core.

use crate::base::{ProposalId, TripId, UserId};
use crate::money::Money;
use thiserror::Error;

/// Ledger and voting errors.
///
/// Every operation validates before it writes, so any of these errors
/// means nothing was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is out of range or not a whole number of minor units
    #[error("invalid amount")]
    InvalidAmount,

    /// Custom split does not add up to the expense amount
    #[error("split total {actual} does not match expense amount {expected}")]
    SplitMismatch { expected: Money, actual: Money },

    /// Payer or split target is not a member of the trip
    #[error("participant {0} is not a member of the trip")]
    UnknownParticipant(UserId),

    /// The roster has no record of the trip
    #[error("trip {0} not found")]
    UnknownTrip(TripId),

    /// Proposal is unknown, inactive, or belongs to another activity
    #[error("proposal {0} not found or not open for voting")]
    UnknownProposal(ProposalId),

    /// Referenced expense or split does not exist
    #[error("not found")]
    NotFound,

    /// Requester is not allowed to perform the operation
    #[error("not authorized")]
    Unauthorized,

    /// Activity has no active proposal
    #[error("no active proposals")]
    NoProposals,

    /// Custom split names the same participant twice
    #[error("participant {0} appears more than once in the split")]
    DuplicateSplitTarget(UserId),

    /// Equal split requested over an empty roster
    #[error("trip has no participants")]
    EmptyRoster,

    /// Balances do not sum to zero
    #[error("balances do not sum to zero (drift {drift})")]
    Imbalanced { drift: Money },

    /// Lock could not be acquired before the configured deadline
    #[error("timed out waiting for the trip or activity lock")]
    Timeout,
}
