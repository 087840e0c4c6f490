//! HTTP API for the Mart daemon.
//!
//! Provides REST endpoints for:
//! - Registration and login
//! - Order submission and listing
//! - Balance, withdrawal, withdrawal history
//! - Health check
//!
//! Everything under `/api/user` except register/login requires a session
//! token. During shutdown the API answers 503 so load balancers drain traffic;
//! `/health` stays reachable.

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use mart_accrual::AccrualClient;
use mart_domain::{Order, OrderNumber, Withdrawal};
use mart_store::{Store, StoreError};

use crate::auth::{self, CurrentUser, TokenKeys};
use crate::submission::{self, SubmissionError, SubmissionOutcome};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub accrual: Arc<AccrualClient>,
    pub tokens: Arc<TokenKeys>,
    pub shutting_down: Arc<AtomicBool>,
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Login or registration credentials.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

/// Session token, also delivered via header and cookie.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// One order in the user's list.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: String,
    #[serde(
        with = "rust_decimal::serde::float_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub accrual: Option<Decimal>,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            number: order.number,
            status: order.status.as_str().to_string(),
            accrual: order.accrual,
            uploaded_at: order.uploaded_at,
        }
    }
}

/// Current balance and lifetime withdrawn total.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

/// Request to spend points against an order number.
#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
}

/// One withdrawal in the user's history.
#[derive(Debug, Serialize)]
pub struct WithdrawalResponse {
    pub order: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sum: Decimal,
    pub processed_at: chrono::DateTime<chrono::Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.order_number,
            sum: w.sum,
            processed_at: w.processed_at,
        }
    }
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn store_error_response(e: StoreError) -> ApiError {
    warn!(error = %e, "Store error in API handler");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/user/orders", post(submit_order_handler))
        .route("/api/user/orders", get(list_orders_handler))
        .route("/api/user/balance", get(balance_handler))
        .route("/api/user/balance/withdraw", post(withdraw_handler))
        .route("/api/user/withdrawals", get(withdrawals_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let api = Router::new()
        .route("/api/user/register", post(register_handler))
        .route("/api/user/login", post(login_handler))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            reject_during_shutdown,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Middleware answering 503 once shutdown has begun.
async fn reject_during_shutdown(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.shutting_down.load(Ordering::SeqCst) {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    next.run(request).await
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Register a new user and log them in.
async fn register_handler(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<Response, ApiError> {
    if creds.login.trim().is_empty() || creds.password.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "login and password must not be empty",
        ));
    }

    let hash = auth::hash_password(&creds.password)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let user_id = match state.store.users().create(creds.login.trim(), &hash).await {
        Ok(id) => id,
        Err(e) if e.is_duplicate() => {
            return Err(error_response(StatusCode::CONFLICT, "login already taken"));
        }
        Err(e) => return Err(store_error_response(e)),
    };

    info!(user_id, login = %creds.login.trim(), "User registered");
    session_response(&state.tokens, user_id)
}

/// Authenticate an existing user.
async fn login_handler(
    State(state): State<AppState>,
    Json(creds): Json<Credentials>,
) -> Result<Response, ApiError> {
    let user = state
        .store
        .users()
        .find_by_login(creds.login.trim())
        .await
        .map_err(store_error_response)?;

    // Unknown login and wrong password get the same flat 401.
    let Some(user) = user else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid login or password",
        ));
    };

    let ok = auth::verify_password(&creds.password, &user.password_hash)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !ok {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid login or password",
        ));
    }

    session_response(&state.tokens, user.id)
}

/// Issue a session token via body, `Authorization` header, and cookie.
fn session_response(tokens: &TokenKeys, user_id: i64) -> Result<Response, ApiError> {
    let token = tokens
        .issue(user_id)
        .map_err(|e| error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let mut response = Json(TokenResponse {
        token: token.clone(),
    })
    .into_response();

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
        headers.insert(header::AUTHORIZATION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("token={token}; HttpOnly; Path=/")) {
        headers.insert(header::SET_COOKIE, value);
    }

    Ok(response)
}

/// Submit an order number for accrual.
///
/// The body is the bare number as text, not JSON.
async fn submit_order_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    body: String,
) -> Result<StatusCode, ApiError> {
    match submission::submit_order(state.store.as_ref(), &state.accrual, user.0, &body).await {
        Ok(SubmissionOutcome::AlreadyOwned) => Ok(StatusCode::OK),
        Ok(SubmissionOutcome::Accepted) => Ok(StatusCode::ACCEPTED),
        Err(SubmissionError::Format) => Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid order number format",
        )),
        Err(SubmissionError::Checksum) => Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid order number checksum",
        )),
        Err(SubmissionError::OwnedByOther) => Err(error_response(
            StatusCode::CONFLICT,
            "order number belongs to another user",
        )),
        Err(SubmissionError::Store(e)) => Err(store_error_response(e)),
        Err(SubmissionError::Accrual(e)) => {
            warn!(error = %e, "Accrual oracle error during submission");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "accrual service error",
            ))
        }
    }
}

/// List the user's orders, newest first. Empty list answers 204.
async fn list_orders_handler(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, ApiError> {
    let orders = state
        .store
        .orders()
        .find_by_user(user.0)
        .await
        .map_err(store_error_response)?;

    if orders.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<OrderResponse> = orders.into_iter().map(OrderResponse::from).collect();
    Ok(Json(body).into_response())
}

/// Current balance.
async fn balance_handler(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = state
        .store
        .balances()
        .get(user.0)
        .await
        .map_err(store_error_response)?;

    Ok(Json(BalanceResponse {
        current: balance.current,
        withdrawn: balance.withdrawn,
    }))
}

/// Spend points against an order number.
async fn withdraw_handler(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<WithdrawRequest>,
) -> Result<StatusCode, ApiError> {
    // The target number only has to be well formed; it need not exist in
    // the order ledger.
    let number = OrderNumber::parse(&request.order).map_err(|_| {
        error_response(StatusCode::UNPROCESSABLE_ENTITY, "invalid order number")
    })?;

    if request.sum <= Decimal::ZERO {
        return Err(error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "sum must be positive",
        ));
    }

    match state
        .store
        .balances()
        .withdraw(user.0, number.as_str(), request.sum)
        .await
    {
        Ok(()) => Ok(StatusCode::OK),
        Err(StoreError::InsufficientFunds { .. }) => Err(error_response(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient balance",
        )),
        Err(e) => Err(store_error_response(e)),
    }
}

/// Withdrawal history, oldest first. Empty list answers 204.
async fn withdrawals_handler(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Response, ApiError> {
    let withdrawals = state
        .store
        .balances()
        .withdrawals(user.0)
        .await
        .map_err(store_error_response)?;

    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let body: Vec<WithdrawalResponse> = withdrawals
        .into_iter()
        .map(WithdrawalResponse::from)
        .collect();
    Ok(Json(body).into_response())
}
