// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::types::{AccountMode, EngineMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/positions/:id/close", post(close_position))
        .route("/api/v1/treasury", get(treasury))
        .route("/api/v1/settlements", get(settlements))
        .route("/api/v1/risk", get(risk_state))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/agents", get(agents))
        .route("/api/v1/agents/:id/weight", post(set_agent_weight))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/control/account-mode", post(control_account_mode))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/trade-journal/stats", get(trade_journal_stats))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    Json(snapshot)
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let positions = state.position_store.open_positions();
    Json(positions)
}

async fn close_position(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    match state.executor.close_manual(&id).await {
        Ok(position) => {
            state.increment_version();
            Ok(Json(position))
        }
        Err(e) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )),
    }
}

// =============================================================================
// Treasury / settlements (authenticated)
// =============================================================================

async fn treasury(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.snapshot())
}

async fn settlements(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.settlement_history(200))
}

// =============================================================================
// Risk (authenticated)
// =============================================================================

async fn risk_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.risk_engine.get_state())
}

// =============================================================================
// Decisions (authenticated)
// =============================================================================

async fn decisions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.consensus.decision_history(200))
}

// =============================================================================
// Agents (authenticated)
// =============================================================================

async fn agents(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = state.runtime_config.read().agents.clone();
    let weights: Vec<serde_json::Value> = registry
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "group": a.group,
                "strategy": a.strategy,
                "configured_weight": a.weight,
                "live_weight": state.consensus.weight_of(&a.id),
            })
        })
        .collect();
    Json(weights)
}

#[derive(Deserialize)]
struct WeightUpdate {
    weight: f64,
}

async fn set_agent_weight(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<WeightUpdate>,
) -> impl IntoResponse {
    state.consensus.update_weight(&id, update.weight);
    state.increment_version();
    info!(agent_id = %id, weight = update.weight, "agent weight updated via API");
    Json(serde_json::json!({ "id": id, "weight": update.weight }))
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    engine_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = EngineMode::Paused;
    }
    state.increment_version();
    info!("trading PAUSED via API");

    Json(ControlResponse {
        engine_mode: "Paused".to_string(),
        message: "trading paused".to_string(),
    })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = EngineMode::Running;
    }
    state.increment_version();
    info!("trading RESUMED via API");

    Json(ControlResponse {
        engine_mode: "Running".to_string(),
        message: "trading resumed".to_string(),
    })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.engine_mode = EngineMode::Killed;
    }
    state.risk_engine.kill();
    state.increment_version();
    warn!("trading KILLED via API");

    Json(ControlResponse {
        engine_mode: "Killed".to_string(),
        message: "trading killed, manual restart required".to_string(),
    })
}

#[derive(Deserialize)]
struct AccountModeRequest {
    account_mode: String,
    #[serde(default)]
    confirm_live: bool,
}

#[derive(Serialize)]
struct AccountModeResponse {
    account_mode: String,
}

async fn control_account_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountModeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mode = match req.account_mode.to_lowercase().as_str() {
        "paper" => AccountMode::Paper,
        "live" => {
            if !req.confirm_live {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "switching to Live mode requires confirm_live: true",
                    })),
                ));
            }
            warn!("switching to LIVE account mode via API");
            AccountMode::Live
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": format!("invalid account mode '{}', use 'paper' or 'live'", req.account_mode),
                })),
            ));
        }
    };

    {
        let mut config = state.runtime_config.write();
        config.account_mode = mode;
    }
    state.increment_version();
    info!(account_mode = %mode, "account mode changed via API");

    Ok(Json(AccountModeResponse {
        account_mode: mode.to_string(),
    }))
}

// =============================================================================
// Heartbeat (authenticated)
// =============================================================================

async fn heartbeat(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    *state.last_ws_user_event.write() = std::time::Instant::now();
    state.increment_version();

    Json(serde_json::json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Trade Journal (authenticated)
// =============================================================================

async fn trade_journal(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let closed = state.position_store.closed_positions(500);
    Json(closed)
}

async fn trade_journal_stats(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    match snapshot.journal_stats {
        Some(stats) => Json(serde_json::to_value(stats).unwrap_or_default()),
        None => Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": "0",
            "profit_factor": 0.0,
        })),
    }
}
