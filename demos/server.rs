//! REST API server example for the referral ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /agents` - Register an agent (onboarded straight to active)
//! - `GET  /agents` / `GET /agents/{id}` - Balance snapshots
//! - `POST /referral-codes` - Register a referral code
//! - `POST /referrals/use` - Inbound referral usage event (webhook)
//! - `POST /earnings/{id}/confirm` / `POST /earnings/{id}/cancel`
//! - `POST /agents/{id}/payouts` - Agent requests a payout
//! - `GET  /agents/{id}/payouts` - Agent's payout history
//! - `POST /payouts/{id}/cancel` - Agent cancels a pending payout
//! - `POST /admin/payouts/{id}/approve|review|reject|process|complete`
//! - `POST /admin/payouts/bulk-process` - Batch transition with per-item isolation
//! - `GET  /admin/payouts` - Paginated listing (`status`, `agent`, `offset`, `limit`)
//! - `GET  /admin/payouts/export` - CSV projection
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST http://localhost:3000/agents \
//!   -H "Content-Type: application/json" \
//!   -d '{"agent_id": 1, "commission_rate": "0.05", "tier": "gold"}'
//!
//! curl -X POST http://localhost:3000/referral-codes \
//!   -H "Content-Type: application/json" \
//!   -d '{"code": "AGT-1", "agent_id": 1}'
//!
//! curl -X POST http://localhost:3000/referrals/use \
//!   -H "Content-Type: application/json" \
//!   -d '{"code": "AGT-1", "reference_id": "order-1001", "base_amount": "2000.00"}'
//!
//! curl -X POST http://localhost:3000/agents/1/payouts \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": "60.00", "details": {"method": "airtime_topup", "phone_number": "+254700000001"}}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use referral_ledger_rs::{
    AgentId, AgentStatus, AgentTier, BulkAction, BulkCoordinator, BulkOutcome, Earning,
    EarningEngine, EarningId, LedgerError, LedgerStore, Page, PaymentDetails, Payout,
    PayoutFilter, PayoutId, PayoutService, PayoutStatus, ReferralCode, ReferralUsage,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub agent_id: u64,
    pub commission_rate: Decimal,
    pub tier: AgentTier,
}

#[derive(Debug, Deserialize)]
pub struct RegisterCodeRequest {
    pub code: String,
    pub agent_id: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_usages: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    pub code: String,
    pub reference_id: String,
    pub base_amount: Decimal,
    pub referred_user_name: Option<String>,
    pub referred_user_email: Option<String>,
    pub referred_user_phone: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CancelEarningRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: Decimal,
    pub details: PaymentDetails,
}

#[derive(Debug, Deserialize)]
pub struct NotesRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub transaction_id: String,
    pub fees: Option<Decimal>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub payout_ids: Vec<u64>,
    pub action: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub batch_reference: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<PayoutStatus>,
    pub agent: Option<u64>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PayoutListResponse {
    pub items: Vec<Payout>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerStore>,
    pub engine: Arc<EarningEngine>,
    pub payouts: Arc<PayoutService>,
    pub bulk: Arc<BulkCoordinator>,
}

impl AppState {
    pub fn new() -> Self {
        let ledger = Arc::new(LedgerStore::new());
        let engine = Arc::new(EarningEngine::new(Arc::clone(&ledger)));
        let payouts = Arc::new(PayoutService::new(Arc::clone(&ledger)));
        let bulk = Arc::new(BulkCoordinator::new(Arc::clone(&payouts)));
        Self {
            ledger,
            engine,
            payouts,
            bulk,
        }
    }
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
            LedgerError::BelowMinimumPayout { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "BELOW_MINIMUM_PAYOUT")
            }
            LedgerError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_FUNDS")
            }
            LedgerError::AgentNotFound(_) => (StatusCode::NOT_FOUND, "AGENT_NOT_FOUND"),
            LedgerError::DuplicateAgent(_) => (StatusCode::CONFLICT, "DUPLICATE_AGENT"),
            LedgerError::AgentNotActive(_) => (StatusCode::FORBIDDEN, "AGENT_NOT_ACTIVE"),
            LedgerError::InvalidAgentTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_AGENT_TRANSITION")
            }
            LedgerError::EarningNotFound(_) => (StatusCode::NOT_FOUND, "EARNING_NOT_FOUND"),
            LedgerError::AlreadyFinalized(_) => (StatusCode::CONFLICT, "ALREADY_FINALIZED"),
            LedgerError::PayoutNotFound(_) => (StatusCode::NOT_FOUND, "PAYOUT_NOT_FOUND"),
            LedgerError::DuplicateReference(_) => (StatusCode::CONFLICT, "DUPLICATE_REFERENCE"),
            LedgerError::InvalidCode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_CODE"),
            LedgerError::InvalidStateTransition { .. } => {
                (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
            }
            LedgerError::InvalidPaymentDetails(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_PAYMENT_DETAILS")
            }
            LedgerError::ReservationSettled(_)
            | LedgerError::ReservationReleased(_)
            | LedgerError::ReservationNotFound(_) => (StatusCode::CONFLICT, "RESERVATION_CONFLICT"),
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

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            code: "BAD_REQUEST".to_string(),
        }),
    )
}

// === Agent Handlers ===

/// POST /agents - Register an agent and onboard it to active.
async fn register_agent(
    State(state): State<AppState>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<StatusCode, AppError> {
    let agent_id = AgentId(request.agent_id);
    state
        .ledger
        .register_agent(agent_id, request.commission_rate, request.tier)?;
    state
        .ledger
        .set_agent_status(agent_id, AgentStatus::CodeGenerated)?;
    state
        .ledger
        .set_agent_status(agent_id, AgentStatus::CredentialsSent)?;
    state.ledger.set_agent_status(agent_id, AgentStatus::Active)?;
    Ok(StatusCode::CREATED)
}

/// GET /agents/{id} - Balance snapshot of one agent.
async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<referral_ledger_rs::AgentBalances>, AppError> {
    Ok(Json(state.ledger.snapshot(AgentId(id))?))
}

/// GET /agents - Balance snapshots of all agents.
async fn list_agents(State(state): State<AppState>) -> Json<Vec<referral_ledger_rs::AgentBalances>> {
    Json(state.ledger.snapshots())
}

// === Referral Handlers ===

/// POST /referral-codes - Register a referral code.
async fn register_code(
    State(state): State<AppState>,
    Json(request): Json<RegisterCodeRequest>,
) -> Result<StatusCode, AppError> {
    let mut code = ReferralCode::new(request.code, AgentId(request.agent_id));
    code.expires_at = request.expires_at;
    code.max_usages = request.max_usages;
    state.engine.register_code(code)?;
    Ok(StatusCode::CREATED)
}

/// POST /referrals/use - Inbound usage event.
///
/// Replays of an already-processed reference id return 200 with the
/// original earning instead of an error, so at-least-once webhook
/// delivery is safe.
async fn use_referral(
    State(state): State<AppState>,
    Json(request): Json<UsageRequest>,
) -> Result<(StatusCode, Json<Earning>), AppError> {
    let usage = ReferralUsage {
        reference_id: request.reference_id.clone(),
        base_amount: request.base_amount,
        referred_user_name: request.referred_user_name,
        referred_user_email: request.referred_user_email,
        referred_user_phone: request.referred_user_phone,
        occurred_at: request.occurred_at.unwrap_or_else(Utc::now),
    };

    match state.engine.record_usage(&request.code, usage) {
        Ok(earning) => Ok((StatusCode::CREATED, Json(earning))),
        Err(LedgerError::DuplicateReference(reference)) => {
            let earning = state
                .ledger
                .earning_by_reference(&reference)
                .ok_or(LedgerError::DuplicateReference(reference))?;
            Ok((StatusCode::OK, Json(earning)))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /earnings/{id}/confirm
async fn confirm_earning(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Earning>, AppError> {
    Ok(Json(state.engine.confirm(EarningId(id))?))
}

/// POST /earnings/{id}/cancel
async fn cancel_earning(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CancelEarningRequest>,
) -> Result<Json<Earning>, AppError> {
    Ok(Json(state.engine.cancel(EarningId(id), request.reason)?))
}

// === Payout Handlers ===

/// POST /agents/{id}/payouts - Agent requests a payout.
async fn request_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<Payout>), AppError> {
    let payout = state
        .payouts
        .request(AgentId(id), request.amount, request.details)?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// GET /agents/{id}/payouts - Agent's payout history.
async fn agent_payouts(State(state): State<AppState>, Path(id): Path<u64>) -> Json<Vec<Payout>> {
    Json(state.ledger.payouts_for_agent(AgentId(id)))
}

/// POST /payouts/{id}/cancel - Agent cancels before processing starts.
async fn cancel_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.cancel(PayoutId(id))?))
}

/// POST /admin/payouts/{id}/approve
async fn approve_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<NotesRequest>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.approve(PayoutId(id), request.notes)?))
}

/// POST /admin/payouts/{id}/review
async fn review_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.set_to_review(PayoutId(id), request.message)?))
}

/// POST /admin/payouts/{id}/reject
async fn reject_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.reject(
        PayoutId(id),
        request.reason,
        request.notes,
    )?))
}

/// POST /admin/payouts/{id}/process
async fn process_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<NotesRequest>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.process(PayoutId(id), request.notes)?))
}

/// POST /admin/payouts/{id}/complete
async fn complete_payout(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<Payout>, AppError> {
    Ok(Json(state.payouts.complete(
        PayoutId(id),
        request.transaction_id,
        request.fees,
        request.notes,
    )?))
}

/// POST /admin/payouts/bulk-process
async fn bulk_process(
    State(state): State<AppState>,
    Json(request): Json<BulkRequest>,
) -> Result<Json<BulkOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let action = match request.action.as_str() {
        "approve" => BulkAction::Approve {
            notes: request.notes,
        },
        "reject" => BulkAction::Reject {
            reason: request
                .reason
                .ok_or_else(|| bad_request("reject requires a reason"))?,
            notes: request.notes,
        },
        "process" => BulkAction::Process {
            notes: request.notes,
        },
        "complete" => BulkAction::Complete {
            batch_reference: request
                .batch_reference
                .ok_or_else(|| bad_request("complete requires a batch_reference"))?,
        },
        _ => return Err(bad_request("unknown bulk action")),
    };

    let ids: Vec<PayoutId> = request.payout_ids.into_iter().map(PayoutId).collect();
    Ok(Json(state.bulk.bulk_process(&ids, action)))
}

/// GET /admin/payouts - Paginated payout listing.
async fn list_payouts(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<PayoutListResponse> {
    let page = Page {
        offset: query.offset.unwrap_or(0),
        limit: query.limit.unwrap_or(50),
    };
    let filter = PayoutFilter {
        agent: query.agent.map(AgentId),
        status: query.status,
    };
    let (items, total) = state.ledger.list_payouts(filter, page);
    Json(PayoutListResponse {
        items,
        total,
        offset: page.offset,
        limit: page.limit,
    })
}

/// Flat payout row for the CSV export.
#[derive(Debug, Serialize)]
struct ExportRow {
    payout: PayoutId,
    agent: AgentId,
    amount: Decimal,
    fees: Decimal,
    net_amount: Decimal,
    method: referral_ledger_rs::PayoutMethod,
    status: PayoutStatus,
    requested_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    transaction_id: Option<String>,
    rejection_reason: Option<String>,
}

/// GET /admin/payouts/export - CSV projection of the payout ledger.
async fn export_payouts(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let filter = PayoutFilter {
        agent: query.agent.map(AgentId),
        status: query.status,
    };
    let (items, _) = state.ledger.list_payouts(
        filter,
        Page {
            offset: 0,
            limit: usize::MAX,
        },
    );

    let mut wtr = csv::Writer::from_writer(Vec::new());
    for payout in items {
        wtr.serialize(ExportRow {
            payout: payout.id,
            agent: payout.agent_id,
            amount: payout.amount,
            fees: payout.fees,
            net_amount: payout.net_amount,
            method: payout.method,
            status: payout.status,
            requested_at: payout.requested_at,
            completed_at: payout.completed_at,
            transaction_id: payout.transaction_id,
            rejection_reason: payout.rejection_reason,
        })
        .expect("csv serialization of export rows");
    }
    let body = String::from_utf8(wtr.into_inner().expect("csv writer flush"))
        .expect("csv output is utf-8");

    ([(header::CONTENT_TYPE, "text/csv")], body).into_response()
}

// === Router ===

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/agents", post(register_agent).get(list_agents))
        .route("/agents/{id}", get(get_agent))
        .route("/referral-codes", post(register_code))
        .route("/referrals/use", post(use_referral))
        .route("/earnings/{id}/confirm", post(confirm_earning))
        .route("/earnings/{id}/cancel", post(cancel_earning))
        .route("/agents/{id}/payouts", post(request_payout).get(agent_payouts))
        .route("/payouts/{id}/cancel", post(cancel_payout))
        .route("/admin/payouts", get(list_payouts))
        .route("/admin/payouts/export", get(export_payouts))
        .route("/admin/payouts/bulk-process", post(bulk_process))
        .route("/admin/payouts/{id}/approve", post(approve_payout))
        .route("/admin/payouts/{id}/review", post(review_payout))
        .route("/admin/payouts/{id}/reject", post(reject_payout))
        .route("/admin/payouts/{id}/process", post(process_payout))
        .route("/admin/payouts/{id}/complete", post(complete_payout))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    let state = AppState::new();
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Referral ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /agents                         - Register an agent");
    println!("  GET  /agents                         - List agent balances");
    println!("  POST /referral-codes                 - Register a referral code");
    println!("  POST /referrals/use                  - Record a referral usage event");
    println!("  POST /agents/:id/payouts             - Request a payout");
    println!("  POST /admin/payouts/:id/approve      - Approve a payout");
    println!("  POST /admin/payouts/bulk-process     - Bulk transition payouts");
    println!("  GET  /admin/payouts                  - List payouts (paginated)");
    println!("  GET  /admin/payouts/export           - Export payouts as CSV");

    axum::serve(listener, app).await.unwrap();
}
