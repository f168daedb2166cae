// Payment-rail webhooks
// The rails are the only source of truth for deposit and withdrawal completion

use axum::{extract::State, response::Json};
use serde_json::json;
use tracing::info;

use crate::app_state::SharedState;
use crate::handlers::{blocking, ApiResult};
use crate::models::PaymentEvent;

/// POST /webhooks/payments
/// `{"event":"settled","transaction_id":"tx_…","status":"completed"}` or
/// `{"event":"chargeback","transaction_id":"tx_…"}`
pub async fn payment_webhook(State(state): State<SharedState>, Json(event): Json<PaymentEvent>) -> ApiResult {
    match event {
        PaymentEvent::Settled { transaction_id, status } => {
            info!(tx = %transaction_id, status = status.as_str(), "📬 payment webhook received");
            let tx = blocking(&state, move |svc| svc.settle_transaction(&transaction_id, status)).await?;
            Ok(Json(json!({ "success": true, "transaction": tx })))
        }
        PaymentEvent::Chargeback { transaction_id } => {
            info!(tx = %transaction_id, "📬 chargeback webhook received");
            let outcome = blocking(&state, move |svc| svc.handle_chargeback(&transaction_id)).await?;
            Ok(Json(json!({ "success": true, "outcome": outcome })))
        }
    }
}
