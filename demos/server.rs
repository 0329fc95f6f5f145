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

//! Minimal REST API over the trip ledger engine.
//!
//! Run with: `cargo run --example server`
//!
//! Amounts are integer minor units (cents).
//!
//! ```bash
//! # Roster (stand-in for trip management)
//! curl -X POST http://localhost:3000/trips/1/participants \
//!   -H "Content-Type: application/json" -d '{"user_id": 1}'
//!
//! # Expense, equal split
//! curl -X POST http://localhost:3000/expenses \
//!   -H "Content-Type: application/json" \
//!   -d '{"trip_id": 1, "payer_id": 1, "amount": 10000,
//!        "description": "Dinner", "category": "food"}'
//!
//! # Expense, custom split
//! curl -X POST http://localhost:3000/expenses \
//!   -H "Content-Type: application/json" \
//!   -d '{"trip_id": 1, "payer_id": 2, "amount": 1000, "description": "Taxi",
//!        "split_policy": {"type": "custom", "shares": [[1, 500], [2, 500]]}}'
//!
//! # Balances and settlement plan
//! curl http://localhost:3000/trips/1/balances
//! curl http://localhost:3000/trips/1/settlement-plan
//!
//! # Proposals and votes
//! curl -X POST http://localhost:3000/activities/7/proposals \
//!   -H "Content-Type: application/json" \
//!   -d '{"creator_id": 1, "title": "Basic", "amount": 2500, "currency": "EUR"}'
//! curl -X POST http://localhost:3000/activities/7/votes \
//!   -H "Content-Type: application/json" -d '{"participant_id": 2, "proposal_id": 1}'
//! curl http://localhost:3000/activities/7/winning-proposal
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trip_ledger::{
    ActivityId, Category, Engine, ExpenseId, ExpenseReceipt, LedgerError, Money, NewExpense,
    NewProposal, ProposalId, SplitPolicy, Transfer, TripId, UserId, WinningProposal,
};

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub user_id: u32,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub trip_id: u32,
    pub payer_id: u32,
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub split_policy: SplitPolicy,
}

impl ExpenseRequest {
    fn into_new_expense(self) -> NewExpense {
        NewExpense {
            trip: TripId(self.trip_id),
            payer: UserId(self.payer_id),
            amount: Money(self.amount),
            description: self.description,
            category: self.category,
            split: self.split_policy,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SettleRequest {
    pub participant_id: u32,
}

#[derive(Debug, Deserialize)]
pub struct ProposalRequest {
    pub creator_id: u32,
    pub title: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub inclusions: Vec<String>,
    #[serde(default)]
    pub exclusions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub participant_id: u32,
    pub proposal_id: u64,
}

#[derive(Debug, Serialize)]
pub struct ProposalCreated {
    pub proposal_id: ProposalId,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the engine.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::SplitMismatch { .. } => (StatusCode::BAD_REQUEST, "SPLIT_MISMATCH"),
            LedgerError::DuplicateSplitTarget(_) => {
                (StatusCode::BAD_REQUEST, "DUPLICATE_SPLIT_TARGET")
            }
            LedgerError::UnknownParticipant(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_PARTICIPANT")
            }
            LedgerError::UnknownTrip(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TRIP"),
            LedgerError::UnknownProposal(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PROPOSAL"),
            LedgerError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            LedgerError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            LedgerError::NoProposals => (StatusCode::NOT_FOUND, "NO_PROPOSALS"),
            LedgerError::EmptyRoster => (StatusCode::UNPROCESSABLE_ENTITY, "EMPTY_ROSTER"),
            LedgerError::Imbalanced { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "IMBALANCED"),
            LedgerError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /trips/{id}/participants - Add a participant to a trip.
async fn join_trip(
    State(state): State<AppState>,
    Path(trip): Path<u32>,
    Json(request): Json<JoinRequest>,
) -> StatusCode {
    if state.engine.join_trip(TripId(trip), UserId(request.user_id)) {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

/// POST /expenses - Record an expense and its splits.
async fn create_expense(
    State(state): State<AppState>,
    Json(request): Json<ExpenseRequest>,
) -> Result<(StatusCode, Json<ExpenseReceipt>), AppError> {
    let receipt = state.engine.add_expense(request.into_new_expense())?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /expenses/{id}/settle - Mark one split paid.
async fn settle_split(
    State(state): State<AppState>,
    Path(expense): Path<u64>,
    Json(request): Json<SettleRequest>,
) -> Result<Json<OkResponse>, AppError> {
    state
        .engine
        .settle_split(ExpenseId(expense), UserId(request.participant_id))?;
    Ok(Json(OkResponse { ok: true }))
}

/// GET /trips/{id}/balances - Net balance per participant.
async fn get_balances(
    State(state): State<AppState>,
    Path(trip): Path<u32>,
) -> Result<Json<BTreeMap<UserId, Money>>, AppError> {
    Ok(Json(state.engine.balances(TripId(trip))?))
}

/// GET /trips/{id}/settlement-plan - Transfers that settle the trip.
async fn get_settlement_plan(
    State(state): State<AppState>,
    Path(trip): Path<u32>,
) -> Result<Json<Vec<Transfer>>, AppError> {
    Ok(Json(state.engine.settlement_plan(TripId(trip))?))
}

/// POST /activities/{id}/proposals - Create a budget proposal.
async fn create_proposal(
    State(state): State<AppState>,
    Path(activity): Path<u32>,
    Json(request): Json<ProposalRequest>,
) -> Result<(StatusCode, Json<ProposalCreated>), AppError> {
    let proposal = state.engine.create_proposal(NewProposal {
        activity: ActivityId(activity),
        creator: UserId(request.creator_id),
        title: request.title,
        amount: Money(request.amount),
        currency: request.currency,
        inclusions: request.inclusions,
        exclusions: request.exclusions,
    })?;
    Ok((
        StatusCode::CREATED,
        Json(ProposalCreated {
            proposal_id: proposal.id,
        }),
    ))
}

/// POST /activities/{id}/votes - Cast or change a vote.
async fn cast_vote(
    State(state): State<AppState>,
    Path(activity): Path<u32>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<OkResponse>, AppError> {
    state.engine.cast_vote(
        ActivityId(activity),
        UserId(request.participant_id),
        ProposalId(request.proposal_id),
    )?;
    Ok(Json(OkResponse { ok: true }))
}

/// GET /activities/{id}/winning-proposal - Current leader.
async fn get_winning_proposal(
    State(state): State<AppState>,
    Path(activity): Path<u32>,
) -> Result<Json<WinningProposal>, AppError> {
    Ok(Json(state.engine.winning_proposal(ActivityId(activity))?))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/trips/{id}/participants", post(join_trip))
        .route("/trips/{id}/balances", get(get_balances))
        .route("/trips/{id}/settlement-plan", get(get_settlement_plan))
        .route("/expenses", post(create_expense))
        .route("/expenses/{id}/settle", post(settle_split))
        .route("/activities/{id}/proposals", post(create_proposal))
        .route("/activities/{id}/votes", post(cast_vote))
        .route("/activities/{id}/winning-proposal", get(get_winning_proposal))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trip_ledger=debug,server=info")),
        )
        .init();

    let state = AppState {
        engine: Arc::new(Engine::new()),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!(address = "127.0.0.1:3000", "trip ledger API listening");

    axum::serve(listener, app).await
}
