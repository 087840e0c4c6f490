//! Shared test helpers: an in-process accrual oracle stub.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Scripted oracle response for one order number.
#[derive(Debug, Clone)]
pub enum StubAccrual {
    Processed(Decimal),
    Invalid,
    Registered,
    Processing,
    NoContent,
    RateLimited(u64),
    ServerError,
}

/// Start a stub oracle on an ephemeral port and return its address.
///
/// Numbers not present in `stubs` get 404, matching an oracle that has
/// never heard of the order.
pub async fn spawn_oracle(stubs: HashMap<String, StubAccrual>) -> SocketAddr {
    let state = Arc::new(stubs);
    let app = Router::new()
        .route("/api/orders/:number", get(stub_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub oracle");
    let addr = listener.local_addr().expect("stub oracle addr");

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    addr
}

async fn stub_handler(
    State(stubs): State<Arc<HashMap<String, StubAccrual>>>,
    Path(number): Path<String>,
) -> Response {
    match stubs.get(&number) {
        Some(StubAccrual::Processed(amount)) => Json(json!({
            "order": number,
            "status": "PROCESSED",
            "accrual": amount.to_f64().unwrap_or(0.0),
        }))
        .into_response(),
        Some(StubAccrual::Invalid) => {
            Json(json!({ "order": number, "status": "INVALID" })).into_response()
        }
        Some(StubAccrual::Registered) => {
            Json(json!({ "order": number, "status": "REGISTERED" })).into_response()
        }
        Some(StubAccrual::Processing) => {
            Json(json!({ "order": number, "status": "PROCESSING" })).into_response()
        }
        Some(StubAccrual::NoContent) => StatusCode::NO_CONTENT.into_response(),
        Some(StubAccrual::RateLimited(secs)) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, secs.to_string())],
            "No more than N requests per minute allowed",
        )
            .into_response(),
        Some(StubAccrual::ServerError) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
