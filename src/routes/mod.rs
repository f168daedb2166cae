// Routes module - assembles every HTTP endpoint into one router
// Payment-rail callbacks live in their own sub-module

pub mod webhooks;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::SharedState;
use crate::handlers::*;

pub use webhooks::payment_webhook;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))
        // ===== WALLET ENDPOINTS =====
        .route("/wallets", post(create_wallet))
        .route("/wallets/:user_id", get(get_wallet))
        // ===== JOURNAL ENDPOINTS =====
        .route("/transactions", get(get_transaction_history).post(record_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/settle", post(settle_transaction))
        .route("/transactions/:id/chargeback", post(handle_chargeback))
        // ===== CASHIER ENDPOINTS =====
        .route("/cashier/deposits", post(request_deposit))
        .route("/cashier/withdrawals", post(request_withdrawal))
        .route("/rates", get(get_rates))
        .route("/webhooks/payments", post(payment_webhook))
        // ===== WAGER ENDPOINTS =====
        .route("/wagers", post(create_wager))
        .route("/wagers/:id", get(get_wager))
        .route("/wagers/:id/complete", post(complete_wager))
        .route("/wagers/:id/cancel", post(cancel_wager))
        .route("/wagers/:id/disputes", post(create_dispute))
        .route("/disputes/:id", get(get_dispute))
        .route("/disputes/:id/resolve", post(resolve_dispute))
        // ===== PER-USER ENDPOINTS =====
        .route("/users/:user_id/wagers", get(list_user_wagers))
        .route("/users/:user_id/stats", get(get_wager_stats))
        .route("/users/:user_id/compliance", get(get_compliance_state))
        .route("/users/:user_id/limits", put(set_limits))
        .route("/users/:user_id/self-exclusion", post(self_exclude))
        .route("/users/:user_id/cooling-off", post(start_cooling_off))
        .route("/users/:user_id/eligibility", put(set_eligibility))
        .route("/users/:user_id/session/start", post(start_session))
        .route("/users/:user_id/session/end", post(end_session))
        .route("/users/:user_id/chargeback-hold/clear", post(clear_chargeback_hold))
        // ===== COMPLIANCE & RISK ENDPOINTS =====
        .route("/compliance/evaluate", post(evaluate_compliance))
        .route("/risk/flags", get(list_risk_flags))
        .route("/risk/flags/:id/acknowledge", post(acknowledge_risk_flag))
        // ===== ESCROW ENDPOINTS =====
        .route("/escrow", get(list_escrow_accounts))
        .route("/escrow/:account", get(get_escrow_account))
        .route("/escrow/:account/history", get(get_escrow_history))
        .route("/escrow/:account/deposit", post(add_to_escrow))
        .route("/escrow/:account/withdraw", post(remove_from_escrow))
        // ===== AUDIT ENDPOINTS =====
        .route("/audit/reconcile", post(run_reconciliation))
        .route("/audit/reports/latest", get(latest_reconciliation))
        .route("/audit/jobs", get(job_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
