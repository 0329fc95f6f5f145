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

//! Trip membership as seen by the ledger.
//!
//! The roster is owned by trip management. The ledger only reads it, through
//! the [`Roster`] trait, to validate payers and split targets and to decide
//! who shares an equal split.

use crate::LedgerError;
use crate::base::{TripId, UserId};
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Source of truth for who currently belongs to a trip.
pub trait Roster: Send + Sync {
    /// Current participants of `trip` in ascending id order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::UnknownTrip`] if the trip does not exist.
    fn participants(&self, trip: TripId) -> Result<Vec<UserId>, LedgerError>;
}

/// Concurrent in-memory roster.
#[derive(Debug, Default)]
pub struct InMemoryRoster {
    trips: DashMap<TripId, BTreeSet<UserId>>,
}

impl InMemoryRoster {
    pub fn new() -> Self {
        Self {
            trips: DashMap::new(),
        }
    }

    /// Adds `user` to `trip`, creating the trip on first use.
    ///
    /// Returns `false` if the user was already a member.
    pub fn join(&self, trip: TripId, user: UserId) -> bool {
        self.trips.entry(trip).or_default().insert(user)
    }

    /// Removes `user` from `trip`.
    ///
    /// Existing splits that reference the user are untouched.
    pub fn leave(&self, trip: TripId, user: UserId) -> Result<(), LedgerError> {
        let mut members = self
            .trips
            .get_mut(&trip)
            .ok_or(LedgerError::UnknownTrip(trip))?;
        if members.remove(&user) {
            Ok(())
        } else {
            Err(LedgerError::UnknownParticipant(user))
        }
    }

    pub fn is_member(&self, trip: TripId, user: UserId) -> bool {
        self.trips
            .get(&trip)
            .is_some_and(|members| members.contains(&user))
    }
}

impl Roster for InMemoryRoster {
    fn participants(&self, trip: TripId) -> Result<Vec<UserId>, LedgerError> {
        self.trips
            .get(&trip)
            .map(|members| members.iter().copied().collect())
            .ok_or(LedgerError::UnknownTrip(trip))
    }
}
