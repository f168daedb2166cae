// In-process tests of the REST surface

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio_test::assert_ok;
use tower::ServiceExt;

use wager_ledger::{build_router, AppState, Currency, LedgerConfig, StaticRateProvider, Store, SystemClock, WageringService};

fn app_with(config: LedgerConfig) -> Router {
    let store = Arc::new(Store::new(config.lock_timeout));
    let provider = Arc::new(StaticRateProvider::new(HashMap::from([(Currency::Gbp, dec!(1.25))])));
    let service = WageringService::new(config, store, Arc::new(SystemClock), provider);
    build_router(AppState::shared(service))
}

fn app() -> Router {
    app_with(LedgerConfig::default())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(b) => Body::from(b.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

/// Pending deposit settled by the payment webhook
async fn funded(app: &Router, user: &str, amount: &str) {
    let (status, body) = call(app, "POST", "/cashier/deposits", Some(json!({ "user_id": user, "amount": amount }))).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let tx_id = body["transaction"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        app,
        "POST",
        "/webhooks/payments",
        Some(json!({ "event": "settled", "transaction_id": tx_id, "status": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("Online"));
}

#[tokio::test]
async fn test_wallet_and_deposit_flow() {
    let app = app();
    let (status, body) = call(&app, "POST", "/wallets", Some(json!({ "user_id": "alice" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["wallet"]["balance"], "0");

    funded(&app, "alice", "100").await;

    let (status, body) = call(&app, "GET", "/wallets/alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wallet"]["balance"], "100");
    assert_eq!(body["available"], "100");

    let (status, body) = call(&app, "GET", "/transactions?user_id=alice&tx_type=deposit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["transactions"][0]["status"], "completed");
}

#[tokio::test]
async fn test_foreign_currency_deposit() {
    let app = app();
    let (status, body) = call(
        &app,
        "POST",
        "/cashier/deposits",
        Some(json!({ "user_id": "bob", "amount": "40", "currency": "GBP" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["transaction"]["amount"], "50.00");
    assert_eq!(body["transaction"]["metadata"]["original_currency"], "GBP");

    let (status, body) = call(
        &app,
        "POST",
        "/cashier/deposits",
        Some(json!({ "user_id": "bob", "amount": "40", "currency": "AUD" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "exchange_rate_unavailable");
}

#[tokio::test]
async fn test_wager_lifecycle_over_http() {
    let app = app();
    funded(&app, "carol", "100").await;

    let (status, body) = call(
        &app,
        "POST",
        "/wagers",
        Some(json!({ "user_id": "carol", "game_id": "crash", "amount": "30", "potential_win": "90" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let wager_id = body["wager"]["id"].as_str().unwrap().to_string();

    let (_, escrow) = call(&app, "GET", "/escrow/wager_stakes:crash", None).await;
    assert_eq!(escrow["balance"], "30");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wagers/{}/complete", wager_id),
        Some(json!({ "result": "lost" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wager"]["status"], "lost");

    let (status, body) = call(
        &app,
        "POST",
        &format!("/wagers/{}/disputes", wager_id),
        Some(json!({ "note": "game froze" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let dispute_id = body["dispute"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/disputes/{}/resolve", dispute_id),
        Some(json!({ "decision": "partial", "refund": "10" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dispute"]["status"], "partial");

    let (_, wallet) = call(&app, "GET", "/wallets/carol", None).await;
    assert_eq!(wallet["wallet"]["balance"], "80");

    let (_, stats) = call(&app, "GET", "/users/carol/stats", None).await;
    assert_eq!(stats["stats"]["wagers_lost"], 1);

    let (status, report) = call(&app, "POST", "/audit/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["clean"], true);
}

#[tokio::test]
async fn test_error_mapping() {
    let app = app();
    funded(&app, "dave", "20").await;

    let (status, body) = call(
        &app,
        "POST",
        "/wagers",
        Some(json!({ "user_id": "dave", "game_id": "g", "amount": "50", "potential_win": "100" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "insufficient_balance");

    let (status, body) = call(&app, "GET", "/wagers/wager_missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "wager_not_found");

    let (status, body) = call(
        &app,
        "POST",
        "/escrow/prize_pool/withdraw",
        Some(json!({ "amount": "5" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "escrow_underflow");

    let (status, body) = call(
        &app,
        "POST",
        "/cashier/withdrawals",
        Some(json!({ "user_id": "dave", "amount": "-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "invalid_amount");
}

#[tokio::test]
async fn test_compliance_endpoints() {
    let mut config = LedgerConfig::default();
    config.risk.default_limits.deposit.daily = Some(dec!(150));
    let app = app_with(config);
    funded(&app, "erin", "100").await;

    let (status, body) = call(
        &app,
        "POST",
        "/compliance/evaluate",
        Some(json!({ "user_id": "erin", "amount": "80", "kind": "deposit" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);
    assert_eq!(body["result"]["reason"]["reason"], "daily deposit limit");

    let (status, body) = call(
        &app,
        "POST",
        "/compliance/evaluate",
        Some(json!({ "user_id": "erin", "amount": "10", "kind": "wager", "game_id": "g" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, _) = call(
        &app,
        "POST",
        "/users/erin/self-exclusion",
        Some(json!({ "until": "2099-01-01T00:00:00Z" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        "POST",
        "/wagers",
        Some(json!({ "user_id": "erin", "game_id": "g", "amount": "10", "potential_win": "20" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "self_excluded");

    // A self-excluded player can still cash out
    let (status, _) = call(
        &app,
        "POST",
        "/cashier/withdrawals",
        Some(json!({ "user_id": "erin", "amount": "50" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, "GET", "/users/erin/compliance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_ok!(chrono::DateTime::parse_from_rfc3339(
        body["compliance"]["self_excluded_until"].as_str().unwrap()
    ));
}

#[tokio::test]
async fn test_chargeback_webhook_flags_user() {
    let app = app();
    funded(&app, "frank", "60").await;
    let (_, history) = call(&app, "GET", "/transactions?user_id=frank", None).await;
    let deposit_id = history["transactions"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        "/webhooks/payments",
        Some(json!({ "event": "chargeback", "transaction_id": deposit_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"]["flag"]["severity"], "critical");

    let (_, flags) = call(&app, "GET", "/risk/flags?open_only=true", None).await;
    assert_eq!(flags["count"], 1);
    let flag_id = flags["flags"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        &app,
        "POST",
        &format!("/risk/flags/{}/acknowledge", flag_id),
        Some(json!({ "operator": "ops@casino" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flag"]["acknowledged_by"], "ops@casino");

    let (_, flags) = call(&app, "GET", "/risk/flags?open_only=true", None).await;
    assert_eq!(flags["count"], 0);
}

#[tokio::test]
async fn test_locked_row_does_not_stall_other_requests() {
    let mut config = LedgerConfig::default();
    config.lock_timeout = std::time::Duration::from_millis(300);
    let store = Arc::new(Store::new(config.lock_timeout));
    let provider = Arc::new(StaticRateProvider::new(HashMap::new()));
    let service = WageringService::new(config, store.clone(), Arc::new(SystemClock), provider);
    let app = build_router(AppState::shared(service));

    let (status, _) = call(&app, "POST", "/wallets", Some(json!({ "user_id": "zoe" }))).await;
    assert_eq!(status, StatusCode::OK);
    let wallet_id = store.wallet_id_for_user("zoe").unwrap();
    let cell = store.wallet_cell(&wallet_id).unwrap();
    let guard = cell.lock();

    let started = std::time::Instant::now();
    let stalled = tokio::spawn({
        let app = app.clone();
        async move { call(&app, "GET", "/wallets/zoe", None).await }
    });
    tokio::task::yield_now().await;

    let (status, _) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(started.elapsed() < std::time::Duration::from_millis(250));

    let (status, body) = stalled.await.unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    drop(guard);
}
