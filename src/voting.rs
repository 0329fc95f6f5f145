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

//! Budget-proposal voting.
//!
//! Each activity has a ballot: its proposals, one vote record per
//! participant, and a history of vote changes. Vote counts are always
//! derived from the records, never kept as separate counters, so changing a
//! vote is a single record update and one participant can never be counted
//! on two proposals.
//!
//! The winning proposal is a query, not stored state: the active proposal
//! with the most votes, then the earliest created, then the lowest id.
//!
//! # Thread Safety
//!
//! Every ballot sits behind its own [`Mutex`]; votes on different activities
//! never contend.

use crate::LedgerError;
use crate::base::{ActivityId, ProposalId, UserId};
use crate::money::Money;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A priced option for an activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetProposal {
    pub id: ProposalId,
    pub activity: ActivityId,
    pub creator: UserId,
    pub title: String,
    pub amount: Money,
    /// ISO code, stored as given. No conversion happens in this crate.
    pub currency: String,
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to create a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProposal {
    pub activity: ActivityId,
    pub creator: UserId,
    pub title: String,
    pub amount: Money,
    pub currency: String,
    #[serde(default)]
    pub inclusions: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

/// A proposal together with its current vote count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalStanding {
    pub proposal: BudgetProposal,
    pub votes: usize,
}

/// What a [`VotingEngine::cast_vote`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// First vote of this participant on the activity.
    Cast,
    /// Vote moved from another proposal.
    Changed { from: ProposalId },
    /// Same proposal as before; nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VoteChange {
    Cast { proposal: ProposalId },
    Changed { from: ProposalId, to: ProposalId },
    Retracted { proposal: ProposalId },
}

/// One entry of an activity's vote history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoteEvent {
    pub participant: UserId,
    pub change: VoteChange,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Ballot {
    proposals: BTreeMap<ProposalId, BudgetProposal>,
    /// The vote table: at most one record per participant.
    votes: HashMap<UserId, ProposalId>,
    voters: HashSet<UserId>,
    history: Vec<VoteEvent>,
}

impl Ballot {
    fn tally(&self) -> HashMap<ProposalId, usize> {
        let mut counts = HashMap::with_capacity(self.proposals.len());
        for proposal in self.votes.values() {
            *counts.entry(*proposal).or_insert(0) += 1;
        }
        counts
    }

    fn standing(
        &self,
        proposal: &BudgetProposal,
        tally: &HashMap<ProposalId, usize>,
    ) -> ProposalStanding {
        ProposalStanding {
            proposal: proposal.clone(),
            votes: tally.get(&proposal.id).copied().unwrap_or(0),
        }
    }

    fn winning(&self) -> Option<ProposalStanding> {
        let tally = self.tally();
        self.proposals
            .values()
            .filter(|proposal| proposal.active)
            .max_by_key(|proposal| {
                (
                    tally.get(&proposal.id).copied().unwrap_or(0),
                    Reverse(proposal.created_at),
                    Reverse(proposal.id),
                )
            })
            .map(|proposal| self.standing(proposal, &tally))
    }

    fn assert_invariants(&self) {
        let tally = self.tally();
        let active_votes: usize = self
            .proposals
            .values()
            .filter(|proposal| proposal.active)
            .map(|proposal| tally.get(&proposal.id).copied().unwrap_or(0))
            .sum();
        debug_assert!(
            active_votes <= self.voters.len(),
            "Invariant violated: {active_votes} active votes from {} voters",
            self.voters.len()
        );
    }
}

/// Proposals and votes for every activity.
#[derive(Debug)]
pub struct VotingEngine {
    ballots: DashMap<ActivityId, Arc<Mutex<Ballot>>>,
    /// Proposal id to the activity it belongs to.
    owners: DashMap<ProposalId, ActivityId>,
    next_id: AtomicU64,
    lock_timeout: Option<Duration>,
}

impl VotingEngine {
    pub fn new() -> Self {
        Self {
            ballots: DashMap::new(),
            owners: DashMap::new(),
            next_id: AtomicU64::new(1),
            lock_timeout: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Adds a proposal to an activity. A zero amount is a valid free tier.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - negative amount.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn create_proposal(&self, request: NewProposal) -> Result<BudgetProposal, LedgerError> {
        if request.amount.is_negative() {
            warn!(activity = %request.activity, amount = %request.amount, "proposal rejected");
            return Err(LedgerError::InvalidAmount);
        }

        let ballot = self.ballot(request.activity);
        let mut ballot = self.lock(&ballot)?;

        let id = ProposalId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let proposal = BudgetProposal {
            id,
            activity: request.activity,
            creator: request.creator,
            title: request.title,
            amount: request.amount,
            currency: request.currency.trim().to_uppercase(),
            inclusions: request.inclusions,
            exclusions: request.exclusions,
            active: true,
            created_at: Utc::now(),
        };
        ballot.proposals.insert(id, proposal.clone());
        self.owners.insert(id, request.activity);

        debug!(
            activity = %proposal.activity,
            proposal = %id,
            creator = %proposal.creator,
            amount = %proposal.amount,
            "proposal created"
        );
        Ok(proposal)
    }

    /// Records `participant`'s choice for `activity`.
    ///
    /// A previous vote on another proposal is moved in the same critical
    /// section, so counts never show the participant on both or neither.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownProposal`] - proposal is unknown, inactive, or
    ///   belongs to a different activity.
    /// - [`LedgerError::Timeout`] - ballot lock not acquired in time.
    pub fn cast_vote(
        &self,
        activity: ActivityId,
        participant: UserId,
        proposal: ProposalId,
    ) -> Result<VoteOutcome, LedgerError> {
        let ballot = self
            .ballots
            .get(&activity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownProposal(proposal))?;
        let mut ballot = self.lock(&ballot)?;

        if !ballot.proposals.get(&proposal).is_some_and(|p| p.active) {
            warn!(
                activity = %activity,
                participant = %participant,
                proposal = %proposal,
                "vote rejected"
            );
            return Err(LedgerError::UnknownProposal(proposal));
        }

        let outcome = match ballot.votes.insert(participant, proposal) {
            None => VoteOutcome::Cast,
            Some(previous) if previous == proposal => VoteOutcome::Unchanged,
            Some(previous) => VoteOutcome::Changed { from: previous },
        };

        let change = match outcome {
            VoteOutcome::Cast => Some(VoteChange::Cast { proposal }),
            VoteOutcome::Changed { from } => Some(VoteChange::Changed { from, to: proposal }),
            VoteOutcome::Unchanged => None,
        };
        if let Some(change) = change {
            ballot.voters.insert(participant);
            ballot.history.push(VoteEvent {
                participant,
                change,
                at: Utc::now(),
            });
        }
        ballot.assert_invariants();

        debug!(
            activity = %activity,
            participant = %participant,
            proposal = %proposal,
            ?outcome,
            "vote cast"
        );
        Ok(outcome)
    }

    /// Withdraws `participant`'s vote on `activity`.
    ///
    /// Returns the proposal the vote was on.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the participant has no vote there.
    pub fn retract_vote(
        &self,
        activity: ActivityId,
        participant: UserId,
    ) -> Result<ProposalId, LedgerError> {
        let ballot = self
            .ballots
            .get(&activity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NotFound)?;
        let mut ballot = self.lock(&ballot)?;

        let proposal = ballot
            .votes
            .remove(&participant)
            .ok_or(LedgerError::NotFound)?;
        ballot.history.push(VoteEvent {
            participant,
            change: VoteChange::Retracted { proposal },
            at: Utc::now(),
        });

        debug!(
            activity = %activity,
            participant = %participant,
            proposal = %proposal,
            "vote retracted"
        );
        Ok(proposal)
    }

    /// Closes a proposal to voting. Only its creator may do this.
    ///
    /// Votes already on it are kept for history but no longer compete for
    /// the win. Deactivating twice is a no-op.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::UnknownProposal`] - no such proposal.
    /// - [`LedgerError::Unauthorized`] - `requester` is not the creator.
    pub fn deactivate_proposal(
        &self,
        proposal: ProposalId,
        requester: UserId,
    ) -> Result<(), LedgerError> {
        let activity = self
            .owners
            .get(&proposal)
            .map(|entry| *entry)
            .ok_or(LedgerError::UnknownProposal(proposal))?;
        let ballot = self
            .ballots
            .get(&activity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::UnknownProposal(proposal))?;
        let mut ballot = self.lock(&ballot)?;

        let entry = ballot
            .proposals
            .get_mut(&proposal)
            .ok_or(LedgerError::UnknownProposal(proposal))?;
        if entry.creator != requester {
            warn!(proposal = %proposal, requester = %requester, "deactivation refused");
            return Err(LedgerError::Unauthorized);
        }
        entry.active = false;

        debug!(activity = %activity, proposal = %proposal, "proposal deactivated");
        Ok(())
    }

    /// Current leader among the activity's active proposals.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NoProposals`] if nothing is open for voting.
    pub fn winning_proposal(&self, activity: ActivityId) -> Result<ProposalStanding, LedgerError> {
        let ballot = self
            .ballots
            .get(&activity)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LedgerError::NoProposals)?;
        let ballot = self.lock(&ballot)?;
        ballot.winning().ok_or(LedgerError::NoProposals)
    }

    /// Every proposal of the activity, active or not, in creation order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Timeout`] if the ballot lock is not acquired in time.
    pub fn proposals(&self, activity: ActivityId) -> Result<Vec<ProposalStanding>, LedgerError> {
        self.read(activity, Vec::new(), |ballot| {
            let tally = ballot.tally();
            ballot
                .proposals
                .values()
                .map(|proposal| ballot.standing(proposal, &tally))
                .collect()
        })
    }

    pub fn proposal(&self, proposal: ProposalId) -> Result<ProposalStanding, LedgerError> {
        let activity = self
            .owners
            .get(&proposal)
            .map(|entry| *entry)
            .ok_or(LedgerError::UnknownProposal(proposal))?;
        self.read(activity, None, |ballot| {
            ballot
                .proposals
                .get(&proposal)
                .map(|found| ballot.standing(found, &ballot.tally()))
        })?
        .ok_or(LedgerError::UnknownProposal(proposal))
    }

    /// The proposal `participant` currently backs, if any.
    pub fn vote_of(
        &self,
        activity: ActivityId,
        participant: UserId,
    ) -> Result<Option<ProposalId>, LedgerError> {
        self.read(activity, None, |ballot| ballot.votes.get(&participant).copied())
    }

    /// Chronological vote changes for the activity.
    pub fn history(&self, activity: ActivityId) -> Result<Vec<VoteEvent>, LedgerError> {
        self.read(activity, Vec::new(), |ballot| ballot.history.clone())
    }

    /// Number of distinct participants who ever voted on the activity.
    pub fn voter_count(&self, activity: ActivityId) -> Result<usize, LedgerError> {
        self.read(activity, 0, |ballot| ballot.voters.len())
    }

    /// Runs `query` under the ballot lock; `empty` for an unknown activity.
    fn read<T>(
        &self,
        activity: ActivityId,
        empty: T,
        query: impl FnOnce(&Ballot) -> T,
    ) -> Result<T, LedgerError> {
        let Some(ballot) = self
            .ballots
            .get(&activity)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(empty);
        };
        let guard = self.lock(&ballot)?;
        Ok(query(&guard))
    }

    fn ballot(&self, activity: ActivityId) -> Arc<Mutex<Ballot>> {
        Arc::clone(self.ballots.entry(activity).or_default().value())
    }

    fn lock<'a>(&self, ballot: &'a Mutex<Ballot>) -> Result<MutexGuard<'a, Ballot>, LedgerError> {
        match self.lock_timeout {
            Some(timeout) => ballot.try_lock_for(timeout).ok_or(LedgerError::Timeout),
            None => Ok(ballot.lock()),
        }
    }
}

impl Default for VotingEngine {
    fn default() -> Self {
        Self::new()
    }
}
