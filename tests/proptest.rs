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

//! Property-based tests for the ledger, settlement and voting invariants.

use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};
use trip_ledger::{
    ActivityId, Engine, Money, NewExpense, NewProposal, SplitPolicy, TripId, UserId,
    apply_transfers, plan_settlement, split_equal,
};

const TRIP: TripId = TripId(1);

// =============================================================================
// Arbitrary Strategies
// =============================================================================

/// Positive amount in minor units.
fn arb_amount() -> impl Strategy<Value = i64> {
    1i64..=10_000_000i64
}

/// An expense against a roster of `members` users: payer index, amount, and
/// either an equal split or custom weights turned into exact shares.
fn arb_expense(members: usize) -> impl Strategy<Value = (usize, i64, Option<Vec<u8>>)> {
    (
        0..members,
        arb_amount(),
        prop::option::of(prop::collection::vec(any::<u8>(), members)),
    )
}

/// Balance map that sums to zero: random values for all but the last
/// participant, who absorbs the negation.
fn arb_balances() -> impl Strategy<Value = BTreeMap<UserId, Money>> {
    prop::collection::vec(-1_000_000i64..=1_000_000i64, 1..30).prop_map(|values| {
        let mut balances: BTreeMap<UserId, Money> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (UserId(i as u32), Money(*v)))
            .collect();
        let sum: i64 = values.iter().sum();
        balances.insert(UserId(values.len() as u32), Money(-sum));
        balances
    })
}

/// Distributes `amount` over `weights` exactly (rest goes to the first slot).
fn shares_from_weights(amount: i64, weights: &[u8]) -> Vec<(UserId, Money)> {
    let total: i64 = weights.iter().map(|w| i64::from(*w)).sum();
    let mut shares: Vec<(UserId, Money)> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let share = if total == 0 { 0 } else { amount * i64::from(*w) / total };
            (UserId(i as u32 + 1), Money(share))
        })
        .collect();
    let assigned: i64 = shares.iter().map(|(_, share)| share.0).sum();
    let first = &mut shares[0].1;
    *first = Money(first.0 + amount - assigned);
    shares
}

// =============================================================================
// Split Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Shares add up exactly and differ by at most one minor unit.
    #[test]
    fn split_is_exact(total in 1i64..=1_000_000_000i64, n in 1usize..=50) {
        let shares = split_equal(Money(total), n).unwrap();

        prop_assert_eq!(shares.len(), n);
        prop_assert_eq!(Money::checked_sum(shares.iter().copied()), Some(Money(total)));
        let max = shares.iter().max().unwrap();
        let min = shares.iter().min().unwrap();
        prop_assert!(max.0 - min.0 <= 1);
        prop_assert!(shares.iter().all(|share| !share.is_negative()));
        // Larger shares come first.
        prop_assert!(shares.windows(2).all(|pair| pair[0] >= pair[1]));
    }
}

// =============================================================================
// Ledger Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Balances sum to zero after any sequence of expenses.
    #[test]
    fn balances_are_conserved(
        members in 1usize..=8,
        expenses in prop::collection::vec(arb_expense(8), 1..25),
    ) {
        let engine = Engine::new();
        for user in 1..=members {
            engine.join_trip(TRIP, UserId(user as u32));
        }

        for (payer, amount, weights) in expenses {
            let payer = UserId((payer % members) as u32 + 1);
            let split = match weights {
                Some(weights) => {
                    SplitPolicy::Custom(shares_from_weights(amount, &weights[..members]))
                }
                None => SplitPolicy::Equal,
            };
            let request = NewExpense::equal(TRIP, payer, Money(amount), "prop").with_split(split);
            engine.add_expense(request).unwrap();
        }

        let balances = engine.balances(TRIP).unwrap();
        prop_assert_eq!(Money::checked_sum(balances.values().copied()), Some(Money::ZERO));

        for expense in engine.list_expenses(TRIP) {
            let split_total = Money::checked_sum(expense.splits.iter().map(|split| split.amount));
            prop_assert_eq!(split_total, Some(expense.amount));
        }
    }

    /// Rejected expenses never leave a trace in the ledger.
    #[test]
    fn rejected_expenses_write_nothing(
        amount in arb_amount(),
        off_by in 1i64..=100,
    ) {
        let engine = Engine::new();
        engine.join_trip(TRIP, UserId(1));
        engine.join_trip(TRIP, UserId(2));

        let request = NewExpense::equal(TRIP, UserId(1), Money(amount), "bad")
            .with_split(SplitPolicy::Custom(vec![
                (UserId(1), Money(amount)),
                (UserId(2), Money(off_by)),
            ]));
        prop_assert!(engine.add_expense(request).is_err());
        prop_assert_eq!(engine.list_expenses(TRIP).count(), 0);
    }
}

// =============================================================================
// Settlement Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Replaying the plan zeroes every balance within the n - 1 bound.
    #[test]
    fn settlement_zeroes_balances(balances in arb_balances()) {
        let plan = plan_settlement(&balances).unwrap();
        let non_zero = balances.values().filter(|b| !b.is_zero()).count();

        prop_assert!(plan.len() <= non_zero.saturating_sub(1));
        prop_assert!(plan.iter().all(|transfer| transfer.amount.is_positive()));
        prop_assert!(plan.iter().all(|transfer| transfer.from != transfer.to));

        let settled = apply_transfers(&balances, &plan).unwrap();
        prop_assert!(settled.values().all(|b| b.is_zero()));
    }

    /// Same input, same plan.
    #[test]
    fn settlement_is_deterministic(balances in arb_balances()) {
        prop_assert_eq!(plan_settlement(&balances).unwrap(), plan_settlement(&balances).unwrap());
    }

    /// Nothing to settle means no transfers.
    #[test]
    fn all_zero_needs_no_transfers(n in 0usize..20) {
        let balances: BTreeMap<UserId, Money> =
            (0..n).map(|i| (UserId(i as u32), Money::ZERO)).collect();
        prop_assert!(plan_settlement(&balances).unwrap().is_empty());
    }
}

// =============================================================================
// Voting Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Active vote counts never exceed the number of distinct voters, and
    /// every voter is counted on exactly the proposal they last chose.
    #[test]
    fn votes_are_exclusive(
        proposal_count in 1usize..6,
        votes in prop::collection::vec((0u32..10, 0usize..6), 1..60),
    ) {
        let engine = Engine::new();
        let activity = ActivityId(1);
        let ids: Vec<_> = (0..proposal_count)
            .map(|i| {
                engine
                    .create_proposal(NewProposal {
                        activity,
                        creator: UserId(0),
                        title: format!("Tier {i}"),
                        amount: Money(i as i64 * 100),
                        currency: "USD".to_string(),
                        inclusions: vec![],
                        exclusions: vec![],
                    })
                    .unwrap()
                    .id
            })
            .collect();

        let mut last = BTreeMap::new();
        let mut voters = HashSet::new();
        for (voter, choice) in votes {
            let proposal = ids[choice % proposal_count];
            engine.cast_vote(activity, UserId(voter), proposal).unwrap();
            last.insert(voter, proposal);
            voters.insert(voter);
        }

        let standings = engine.proposals(activity).unwrap();
        let total: usize = standings.iter().map(|s| s.votes).sum();
        prop_assert!(total <= voters.len());
        prop_assert_eq!(total, last.len());
        for standing in &standings {
            let expected = last.values().filter(|id| **id == standing.proposal.id).count();
            prop_assert_eq!(standing.votes, expected);
        }

        let winner = engine.winning_proposal(activity).unwrap();
        prop_assert!(standings.iter().all(|s| s.votes <= winner.votes));
    }
}
