/**
 * API REST PONWATCH - Surface web du moniteur
 *
 * RÔLE : Exposer l'inventaire au dashboard et permettre de déclencher
 * une passe de scan. Le web ne voit jamais les échecs bruts du scan :
 * une liste d'OLT (éventuellement vide), des stats agrégées, et un
 * accusé de déclenchement.
 *
 * SÉCURITÉ : Header x-api-key obligatoire sur toutes les routes sauf
 * /health, validé en middleware avant tout traitement.
 */

use crate::inventory::InventoryStore;
use crate::models::{AggregateStats, OltInfo, OnuInfo};
use crate::scanner::ScanCommand;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InventoryStore>,
    pub scan_tx: mpsc::Sender<ScanCommand>,
}

async fn require_api_key(req: Request, next: Next) -> Result<Response, StatusCode> {
    if req.uri().path().starts_with("/health") {
        return Ok(next.run(req).await);
    }

    let expected = std::env::var("PONWATCH_API_KEY").unwrap_or_default();
    if expected.is_empty() {
        warn!("PONWATCH_API_KEY non définie - accès API refusé");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/olts", get(list_olts))
        .route("/olts/{ip}", get(get_olt))
        .route("/olts/{ip}/onus", get(list_onus))
        .route("/scan", post(trigger_scan))
        .route("/refresh", post(trigger_refresh))
        .route("/stats", get(get_stats))
        .with_state(app_state)
        .layer(middleware::from_fn(require_api_key))
}

// GET /olts (liste)
async fn list_olts(State(app): State<AppState>) -> Json<Vec<OltInfo>> {
    Json(app.store.list_olts())
}

// GET /olts/:ip (détail + séries récentes)
async fn get_olt(
    State(app): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    app.store.olt_for_web(&ip).map(Json).ok_or(StatusCode::NOT_FOUND)
}

// GET /olts/:ip/onus
async fn list_onus(
    State(app): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<Vec<OnuInfo>>, StatusCode> {
    if app.store.get_olt(&ip).is_none() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(app.store.list_onus(&ip)))
}

// POST /scan (fire-and-forget, la passe tourne en arrière-plan)
async fn trigger_scan(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match app.scan_tx.try_send(ScanCommand::Scan) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "started": true })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "started": false, "msg": "scan déjà en file" })),
        ),
    }
}

// POST /refresh (relecture des OLT déjà connues, sans rebalayer les plages)
async fn trigger_refresh(State(app): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match app.scan_tx.try_send(ScanCommand::Refresh) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "started": true })),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "started": false, "msg": "rafraîchissement déjà en file" })),
        ),
    }
}

// GET /stats (vue agrégée pour le dashboard)
async fn get_stats(State(app): State<AppState>) -> Json<AggregateStats> {
    Json(app.store.stats())
}
