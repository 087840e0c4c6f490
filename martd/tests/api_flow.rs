//! End-to-end API tests against an in-memory store and a stub accrual oracle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use mart_accrual::AccrualClient;
use mart_store::{MemoryStore, Store};
use martd::api::{create_router, AppState};
use martd::auth::TokenKeys;
use martd::{Reconciler, ReconcilerConfig};

// =============================================================================
// Stub oracle
// =============================================================================

/// Scripted oracle answers: number -> (status, accrual).
type OracleScript = HashMap<String, (&'static str, Option<f64>)>;

async fn oracle_handler(
    State(script): State<Arc<OracleScript>>,
    Path(number): Path<String>,
) -> Response {
    match script.get(&number) {
        Some((status, Some(accrual))) => {
            Json(json!({ "order": number, "status": status, "accrual": accrual })).into_response()
        }
        Some((status, None)) => {
            Json(json!({ "order": number, "status": status })).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_oracle(script: OracleScript) -> SocketAddr {
    let app = Router::new()
        .route("/api/orders/:number", get(oracle_handler))
        .with_state(Arc::new(script));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

// =============================================================================
// App harness
// =============================================================================

struct App {
    addr: SocketAddr,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
}

impl App {
    /// Start the API over an in-memory store, pointed at the given oracle.
    async fn start(oracle: SocketAddr) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState {
            store: store.clone(),
            accrual: Arc::new(AccrualClient::new(&oracle.to_string())),
            tokens: Arc::new(TokenKeys::new("integration-secret", Duration::from_secs(3600))),
            shutting_down: Arc::new(AtomicBool::new(false)),
        };

        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            store,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Register a user and return their session token.
    async fn register(&self, login: &str) -> String {
        let response = self
            .client
            .post(self.url("/api/user/register"))
            .json(&json!({ "login": login, "password": "secret-pw" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body: Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }

    async fn submit_order(&self, token: &str, number: &str) -> reqwest::StatusCode {
        self.client
            .post(self.url("/api/user/orders"))
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(number.to_string())
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_user_journey() {
    let oracle = spawn_oracle(HashMap::from([(
        "12345678903".to_string(),
        ("PROCESSED", Some(729.98)),
    )]))
    .await;
    let app = App::start(oracle).await;

    let token = app.register("alice").await;

    // Submit: oracle already settled it, so the fast path credits directly.
    assert_eq!(
        app.submit_order(&token, "12345678903").await,
        reqwest::StatusCode::ACCEPTED
    );

    // Resubmission by the same user is idempotent.
    assert_eq!(
        app.submit_order(&token, "12345678903").await,
        reqwest::StatusCode::OK
    );

    let response = app.get(&token, "/api/user/orders").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let orders: Value = response.json().await.unwrap();
    assert_eq!(orders.as_array().unwrap().len(), 1);
    assert_eq!(orders[0]["number"], "12345678903");
    assert_eq!(orders[0]["status"], "PROCESSED");
    assert!((orders[0]["accrual"].as_f64().unwrap() - 729.98).abs() < 1e-9);

    let balance: Value = app.get(&token, "/api/user/balance").await.json().await.unwrap();
    assert!((balance["current"].as_f64().unwrap() - 729.98).abs() < 1e-9);
    assert_eq!(balance["withdrawn"].as_f64().unwrap(), 0.0);

    // Withdraw against another (Luhn-valid) number.
    let response = app
        .client
        .post(app.url("/api/user/balance/withdraw"))
        .bearer_auth(&token)
        .json(&json!({ "order": "2377225624", "sum": 150.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let balance: Value = app.get(&token, "/api/user/balance").await.json().await.unwrap();
    assert!((balance["current"].as_f64().unwrap() - 579.98).abs() < 1e-9);
    assert_eq!(balance["withdrawn"].as_f64().unwrap(), 150.0);

    let response = app.get(&token, "/api/user/withdrawals").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let withdrawals: Value = response.json().await.unwrap();
    assert_eq!(withdrawals.as_array().unwrap().len(), 1);
    assert_eq!(withdrawals[0]["order"], "2377225624");

    // More than the remaining balance is refused.
    let response = app
        .client
        .post(app.url("/api/user/balance/withdraw"))
        .bearer_auth(&token)
        .json(&json!({ "order": "2377225624", "sum": 10000.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn test_order_ownership_is_first_writer_wins() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;

    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    assert_eq!(
        app.submit_order(&alice, "79927398713").await,
        reqwest::StatusCode::ACCEPTED
    );
    assert_eq!(
        app.submit_order(&alice, "79927398713").await,
        reqwest::StatusCode::OK
    );
    assert_eq!(
        app.submit_order(&bob, "79927398713").await,
        reqwest::StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn test_order_number_validation() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;
    let token = app.register("alice").await;

    // Non-numeric: malformed.
    assert_eq!(
        app.submit_order(&token, "1234abcd").await,
        reqwest::StatusCode::BAD_REQUEST
    );

    // Digits that fail the Luhn check.
    assert_eq!(
        app.submit_order(&token, "12345678902").await,
        reqwest::StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;

    for path in [
        "/api/user/orders",
        "/api/user/balance",
        "/api/user/withdrawals",
    ] {
        let status = app.client.get(app.url(path)).send().await.unwrap().status();
        assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED, "path {path}");
    }

    let status = app
        .client
        .get(app.url("/api/user/orders"))
        .bearer_auth("bogus-token")
        .send()
        .await
        .unwrap()
        .status();
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_lists_answer_no_content() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;
    let token = app.register("alice").await;

    let response = app.get(&token, "/api/user/orders").await;
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = app.get(&token, "/api/user/withdrawals").await;
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_register_and_login() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;

    app.register("carol").await;

    // Duplicate login is refused.
    let response = app
        .client
        .post(app.url("/api/user/register"))
        .json(&json!({ "login": "carol", "password": "another" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CONFLICT);

    // Wrong password.
    let response = app
        .client
        .post(app.url("/api/user/login"))
        .json(&json!({ "login": "carol", "password": "wrong" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Correct credentials yield a working token.
    let response = app
        .client
        .post(app.url("/api/user/login"))
        .json(&json!({ "login": "carol", "password": "secret-pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap();

    let response = app.get(token, "/api/user/balance").await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_token_cookie_is_accepted() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;
    let token = app.register("alice").await;

    let response = app
        .client
        .get(app.url("/api/user/balance"))
        .header(header::COOKIE, format!("token={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_reconciler_settles_parked_order() {
    // The API's oracle knows nothing, so the submission parks the order.
    let blind_oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(blind_oracle).await;
    let token = app.register("alice").await;

    assert_eq!(
        app.submit_order(&token, "12345678903").await,
        reqwest::StatusCode::ACCEPTED
    );

    let orders: Value = app.get(&token, "/api/user/orders").await.json().await.unwrap();
    assert_eq!(orders[0]["status"], "NEW");

    // The reconciler consults an oracle that has since settled the order.
    let settled_oracle = spawn_oracle(HashMap::from([(
        "12345678903".to_string(),
        ("PROCESSED", Some(500.0)),
    )]))
    .await;
    let reconciler = Reconciler::new(
        app.store.clone(),
        Arc::new(AccrualClient::new(&settled_oracle.to_string())),
        ReconcilerConfig {
            poll_interval: Duration::from_millis(20),
        },
        CancellationToken::new(),
    );

    let stats = reconciler.run_once().await.unwrap();
    assert_eq!(stats.finalized, 1);

    let orders: Value = app.get(&token, "/api/user/orders").await.json().await.unwrap();
    assert_eq!(orders[0]["status"], "PROCESSED");
    assert!((orders[0]["accrual"].as_f64().unwrap() - 500.0).abs() < 1e-9);

    let balance: Value = app.get(&token, "/api/user/balance").await.json().await.unwrap();
    assert_eq!(balance["current"].as_f64().unwrap(), 500.0);
}

#[tokio::test]
async fn test_withdraw_rejects_bad_target_number() {
    let oracle = spawn_oracle(HashMap::new()).await;
    let app = App::start(oracle).await;
    let token = app.register("alice").await;

    let response = app
        .client
        .post(app.url("/api/user/balance/withdraw"))
        .bearer_auth(&token)
        .json(&json!({ "order": "not-a-number", "sum": 10.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);

    let response = app
        .client
        .post(app.url("/api/user/balance/withdraw"))
        .bearer_auth(&token)
        .json(&json!({ "order": "12345678902", "sum": 10.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_balance_precision_survives_roundtrip() {
    let oracle = spawn_oracle(HashMap::from([(
        "4561261212345467".to_string(),
        ("PROCESSED", Some(0.1)),
    )]))
    .await;
    let app = App::start(oracle).await;
    let token = app.register("alice").await;

    assert_eq!(
        app.submit_order(&token, "4561261212345467").await,
        reqwest::StatusCode::ACCEPTED
    );

    let balance = app.store.balances().get(1).await.unwrap();
    assert_eq!(balance.current, Decimal::new(1, 1));
}
