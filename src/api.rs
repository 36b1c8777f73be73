//! REST surface for the engine.
//!
//! Used by the binary's `serve` mode and by integration tests. The router is
//! `Router<()>` with `Extension` state so it plugs straight into
//! `axum::serve`. One engine per process, behind a mutex; the matching actor
//! is whichever request holds the lock.

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::{Arc, Mutex};

use crate::engine::{Engine, EngineStats};
use crate::types::{OrderId, OrderRequest, Price, Trade};

/// Shared app state: the engine behind a mutex.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<Engine>>,
}

/// Builds app state around an existing engine (e.g. one with limits already
/// configured).
pub fn create_app_state(engine: Engine) -> AppState {
    AppState {
        engine: Arc::new(Mutex::new(engine)),
    }
}

/// Builds the REST router with the given state.
pub fn create_router_with_state(state: AppState) -> Router<()> {
    Router::new()
        .route("/health", get(health))
        .route("/orders", post(submit_order))
        .route("/orders/cancel", post(cancel_order))
        .route("/book", get(book_snapshot))
        .layer(Extension(state))
}

/// Convenience: router over a fresh default engine.
pub fn create_router(engine: Engine) -> Router<()> {
    create_router_with_state(create_app_state(engine))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn lock_engine(state: &AppState) -> std::sync::MutexGuard<'_, Engine> {
    match state.engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn submit_order(
    Extension(state): Extension<AppState>,
    Json(request): Json<OrderRequest>,
) -> Response {
    let mut engine = lock_engine(&state);
    let trades = engine.add_order(request);
    #[derive(serde::Serialize)]
    struct Out {
        trades: Vec<Trade>,
        best_bid: Price,
        best_ask: Price,
    }
    let out = Out {
        best_bid: engine.best_bid(),
        best_ask: engine.best_ask(),
        trades,
    };
    (StatusCode::OK, Json(out)).into_response()
}

#[derive(serde::Deserialize)]
struct CancelRequest {
    order_id: OrderId,
}

async fn cancel_order(
    Extension(state): Extension<AppState>,
    Json(body): Json<CancelRequest>,
) -> Response {
    let mut engine = lock_engine(&state);
    let canceled = engine.cancel_order(body.order_id);
    #[derive(serde::Serialize)]
    struct Out {
        canceled: bool,
    }
    (StatusCode::OK, Json(Out { canceled })).into_response()
}

async fn book_snapshot(Extension(state): Extension<AppState>) -> Response {
    let engine = lock_engine(&state);
    #[derive(serde::Serialize)]
    struct Out {
        best_bid: Price,
        best_ask: Price,
        bid_levels: usize,
        ask_levels: usize,
        order_count: usize,
        pending_stops: usize,
        stats: EngineStats,
    }
    let out = Out {
        best_bid: engine.best_bid(),
        best_ask: engine.best_ask(),
        bid_levels: engine.bid_levels(),
        ask_levels: engine.ask_levels(),
        order_count: engine.order_count(),
        pending_stops: engine.stop_manager().pending_stop_count(),
        stats: engine.stats(),
    };
    (StatusCode::OK, Json(out)).into_response()
}
