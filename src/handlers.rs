// HTTP request handlers for the wager ledger API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::error;

use crate::app_state::SharedState;
use crate::compliance::RiskLimits;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::TransactionFilter;
use crate::models::*;
use crate::service::WageringService;
use crate::wagers::{CreateWager, Resolution, WagerOutcome};

// ===== ERROR MAPPING =====

/// `LedgerError` rendered as `{ success: false, code, error }`
#[derive(Debug)]
pub struct ApiError(pub LedgerError);

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LedgerError::WalletNotFound(_)
            | LedgerError::TransactionNotFound(_)
            | LedgerError::WagerNotFound(_)
            | LedgerError::DisputeNotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InvalidStateTransition(_)
            | LedgerError::ChargebackPendingReview(_)
            | LedgerError::EscrowUnderflow { .. } => StatusCode::CONFLICT,
            LedgerError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            LedgerError::InvalidAmount(_)
            | LedgerError::ComplianceLimitExceeded(_)
            | LedgerError::SelfExcluded { .. }
            | LedgerError::UnsupportedCurrency(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::ExchangeRateUnavailable(_) | LedgerError::LockTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            LedgerError::ReconciliationDiscrepancy(_) | LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if !self.0.is_rejection() {
            error!(code = self.0.code(), error = %self.0, "❌ request failed");
        }
        let body = ErrorResponse {
            success: false,
            code: self.0.code().to_string(),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Ledger calls take row locks and may wait out the lock timeout, so they run
/// on the blocking pool rather than an async worker
pub(crate) async fn blocking<T, F>(state: &SharedState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&WageringService) -> LedgerResult<T> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(&service))
        .await
        .map_err(|e| LedgerError::Storage(format!("ledger task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ===== HEALTH =====

pub async fn health_check() -> &'static str {
    "Wager Ledger - Online ✅"
}

// ===== WALLETS =====

/// POST /wallets
pub async fn create_wallet(State(state): State<SharedState>, Json(req): Json<CreateWalletRequest>) -> ApiResult {
    let wallet = blocking(&state, move |svc| svc.get_or_create_wallet(&req.user_id)).await?;
    Ok(Json(json!(WalletResponse::from(wallet))))
}

/// GET /wallets/:user_id
pub async fn get_wallet(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let wallet = blocking(&state, move |svc| svc.get_wallet(&user_id)).await?;
    Ok(Json(json!(WalletResponse::from(wallet))))
}

// ===== JOURNAL =====

/// POST /transactions
pub async fn record_transaction(State(state): State<SharedState>, Json(req): Json<RecordTransactionRequest>) -> ApiResult {
    let tx = blocking(&state, move |svc| {
        svc.record_transaction(&req.wallet_id, req.tx_type, req.amount, req.status, req.metadata, req.external_ref)
    })
    .await?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// GET /transactions
pub async fn get_transaction_history(
    State(state): State<SharedState>,
    Query(filter): Query<TransactionFilter>,
) -> ApiResult {
    let transactions = blocking(&state, move |svc| svc.get_transaction_history(&filter)).await?;
    Ok(Json(json!({
        "success": true,
        "count": transactions.len(),
        "transactions": transactions,
    })))
}

/// GET /transactions/:id
pub async fn get_transaction(State(state): State<SharedState>, Path(tx_id): Path<String>) -> ApiResult {
    let tx = blocking(&state, move |svc| svc.get_transaction(&tx_id)).await?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// POST /transactions/:id/settle
pub async fn settle_transaction(
    State(state): State<SharedState>,
    Path(tx_id): Path<String>,
    Json(req): Json<SettleRequest>,
) -> ApiResult {
    let tx = blocking(&state, move |svc| svc.settle_transaction(&tx_id, req.status)).await?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// POST /transactions/:id/chargeback
pub async fn handle_chargeback(State(state): State<SharedState>, Path(tx_id): Path<String>) -> ApiResult {
    let outcome = blocking(&state, move |svc| svc.handle_chargeback(&tx_id)).await?;
    Ok(Json(json!({ "success": true, "outcome": outcome })))
}

// ===== CASHIER =====

/// POST /cashier/deposits
pub async fn request_deposit(State(state): State<SharedState>, Json(req): Json<DepositRequest>) -> ApiResult {
    let currency = req.currency.unwrap_or(state.service.config().base_currency);
    let tx = state
        .service
        .request_deposit(&req.user_id, req.amount, currency, req.external_ref)
        .await?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// POST /cashier/withdrawals
pub async fn request_withdrawal(State(state): State<SharedState>, Json(req): Json<WithdrawalRequest>) -> ApiResult {
    let tx = blocking(&state, move |svc| svc.request_withdrawal(&req.user_id, req.amount, req.external_ref)).await?;
    Ok(Json(json!({ "success": true, "transaction": tx })))
}

/// GET /rates
pub async fn get_rates(State(state): State<SharedState>) -> ApiResult {
    Ok(Json(json!({
        "success": true,
        "base": state.service.rates.base(),
        "rates": state.service.rates.quotes(),
    })))
}

// ===== WAGERS =====

/// POST /wagers
pub async fn create_wager(State(state): State<SharedState>, Json(req): Json<CreateWager>) -> ApiResult {
    let wager = blocking(&state, move |svc| svc.create_wager(req)).await?;
    Ok(Json(json!({ "success": true, "wager": wager })))
}

/// GET /wagers/:id
pub async fn get_wager(State(state): State<SharedState>, Path(wager_id): Path<String>) -> ApiResult {
    let wager = blocking(&state, move |svc| svc.wagers.get_wager(&wager_id)).await?;
    Ok(Json(json!({ "success": true, "wager": wager })))
}

/// POST /wagers/:id/complete
pub async fn complete_wager(
    State(state): State<SharedState>,
    Path(wager_id): Path<String>,
    Json(outcome): Json<WagerOutcome>,
) -> ApiResult {
    let wager = blocking(&state, move |svc| svc.complete_wager(&wager_id, outcome)).await?;
    Ok(Json(json!({ "success": true, "wager": wager })))
}

/// POST /wagers/:id/cancel
pub async fn cancel_wager(State(state): State<SharedState>, Path(wager_id): Path<String>) -> ApiResult {
    let wager = blocking(&state, move |svc| svc.cancel_wager(&wager_id)).await?;
    Ok(Json(json!({ "success": true, "wager": wager })))
}

/// POST /wagers/:id/disputes
pub async fn create_dispute(
    State(state): State<SharedState>,
    Path(wager_id): Path<String>,
    Json(req): Json<CreateDisputeRequest>,
) -> ApiResult {
    let dispute = blocking(&state, move |svc| svc.create_dispute(&wager_id, &req.note)).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

/// GET /disputes/:id
pub async fn get_dispute(State(state): State<SharedState>, Path(dispute_id): Path<String>) -> ApiResult {
    let dispute = blocking(&state, move |svc| svc.wagers.get_dispute(&dispute_id)).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

/// POST /disputes/:id/resolve
pub async fn resolve_dispute(
    State(state): State<SharedState>,
    Path(dispute_id): Path<String>,
    Json(resolution): Json<Resolution>,
) -> ApiResult {
    let dispute = blocking(&state, move |svc| svc.resolve_dispute(&dispute_id, resolution)).await?;
    Ok(Json(json!({ "success": true, "dispute": dispute })))
}

/// GET /users/:user_id/wagers
pub async fn list_user_wagers(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let user = user_id.clone();
    let (wagers, disputes) = blocking(&state, move |svc| {
        Ok((svc.wagers.list_wagers(&user)?, svc.wagers.list_disputes(&user)?))
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "wagers": wagers,
        "disputes": disputes,
    })))
}

/// GET /users/:user_id/stats
pub async fn get_wager_stats(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let user = user_id.clone();
    let stats = blocking(&state, move |svc| svc.get_wager_stats(&user)).await?;
    Ok(Json(json!({ "success": true, "user_id": user_id, "stats": stats })))
}

// ===== COMPLIANCE =====

/// POST /compliance/evaluate
pub async fn evaluate_compliance(State(state): State<SharedState>, Json(req): Json<EvaluateRequest>) -> ApiResult {
    let decision = blocking(&state, move |svc| svc.evaluate_compliance(&req.user_id, req.amount, &req.kind)).await?;
    Ok(Json(json!({
        "success": true,
        "allowed": decision.is_allowed(),
        "result": decision,
    })))
}

/// GET /users/:user_id/compliance
pub async fn get_compliance_state(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.compliance_state(&user_id)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// PUT /users/:user_id/limits
pub async fn set_limits(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(limits): Json<RiskLimits>,
) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.set_limits(&user_id, limits)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// POST /users/:user_id/self-exclusion
pub async fn self_exclude(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<UntilRequest>,
) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.self_exclude(&user_id, req.until)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// POST /users/:user_id/cooling-off
pub async fn start_cooling_off(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<UntilRequest>,
) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.start_cooling_off(&user_id, req.until)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// PUT /users/:user_id/eligibility
pub async fn set_eligibility(
    State(state): State<SharedState>,
    Path(user_id): Path<String>,
    Json(req): Json<EligibilityRequest>,
) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.set_eligibility(&user_id, req.eligible)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// POST /users/:user_id/session/start
pub async fn start_session(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.start_session(&user_id)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// POST /users/:user_id/session/end
pub async fn end_session(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let minutes = blocking(&state, move |svc| svc.compliance.end_session(&user_id)).await?;
    Ok(Json(json!({ "success": true, "session_minutes": minutes })))
}

/// POST /users/:user_id/chargeback-hold/clear
pub async fn clear_chargeback_hold(State(state): State<SharedState>, Path(user_id): Path<String>) -> ApiResult {
    let compliance = blocking(&state, move |svc| svc.compliance.clear_chargeback_hold(&user_id)).await?;
    Ok(Json(json!({ "success": true, "compliance": compliance })))
}

/// GET /risk/flags
pub async fn list_risk_flags(State(state): State<SharedState>, Query(query): Query<FlagsQuery>) -> ApiResult {
    let flags = blocking(&state, move |svc| svc.compliance.list_flags(query.open_only)).await?;
    Ok(Json(json!({ "success": true, "count": flags.len(), "flags": flags })))
}

/// POST /risk/flags/:id/acknowledge
pub async fn acknowledge_risk_flag(
    State(state): State<SharedState>,
    Path(flag_id): Path<String>,
    Json(req): Json<AcknowledgeRequest>,
) -> ApiResult {
    let flag = blocking(&state, move |svc| svc.compliance.acknowledge_flag(&flag_id, &req.operator)).await?;
    Ok(Json(json!({ "success": true, "flag": flag })))
}

// ===== ESCROW =====

/// GET /escrow
pub async fn list_escrow_accounts(State(state): State<SharedState>) -> ApiResult {
    let accounts = blocking(&state, move |svc| svc.escrow.list_accounts()).await?;
    Ok(Json(json!({ "success": true, "accounts": accounts })))
}

/// GET /escrow/:account
pub async fn get_escrow_account(State(state): State<SharedState>, Path(account_id): Path<String>) -> ApiResult {
    let id = account_id.clone();
    let (balance, account) = blocking(&state, move |svc| {
        Ok((svc.get_escrow_balance(&id)?, svc.escrow.get_escrow_account(&id)?))
    })
    .await?;
    Ok(Json(json!({
        "success": true,
        "account_id": account_id,
        "balance": balance,
        "account": account,
    })))
}

/// GET /escrow/:account/history
pub async fn get_escrow_history(State(state): State<SharedState>, Path(account_id): Path<String>) -> ApiResult {
    let id = account_id.clone();
    let history = blocking(&state, move |svc| svc.escrow.get_escrow_history(&id)).await?;
    Ok(Json(json!({ "success": true, "account_id": account_id, "history": history })))
}

/// POST /escrow/:account/deposit
pub async fn add_to_escrow(
    State(state): State<SharedState>,
    Path(account_id): Path<String>,
    Json(req): Json<EscrowMovementRequest>,
) -> ApiResult {
    let (entry, balance) = blocking(&state, move |svc| {
        let entry = svc.add_to_escrow(&account_id, req.amount, req.reference)?;
        Ok((entry, svc.get_escrow_balance(&account_id)?))
    })
    .await?;
    Ok(Json(json!({ "success": true, "entry": entry, "balance": balance })))
}

/// POST /escrow/:account/withdraw
pub async fn remove_from_escrow(
    State(state): State<SharedState>,
    Path(account_id): Path<String>,
    Json(req): Json<EscrowMovementRequest>,
) -> ApiResult {
    let (entry, balance) = blocking(&state, move |svc| {
        let entry = svc.remove_from_escrow(&account_id, req.amount, req.reference)?;
        Ok((entry, svc.get_escrow_balance(&account_id)?))
    })
    .await?;
    Ok(Json(json!({ "success": true, "entry": entry, "balance": balance })))
}

// ===== AUDIT =====

/// POST /audit/reconcile
pub async fn run_reconciliation(State(state): State<SharedState>) -> ApiResult {
    let report = blocking(&state, |svc| Ok(svc.reconcile())).await?;
    Ok(Json(json!({
        "success": true,
        "clean": report.is_clean(),
        "report": report,
    })))
}

/// GET /audit/reports/latest
pub async fn latest_reconciliation(State(state): State<SharedState>) -> ApiResult {
    let report = state.service.reconciler.last_report();
    Ok(Json(json!({ "success": true, "report": report })))
}

/// GET /audit/jobs
pub async fn job_status(State(state): State<SharedState>) -> ApiResult {
    Ok(Json(json!({ "success": true, "jobs": state.scheduler.status() })))
}
