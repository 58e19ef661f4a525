use axum::{
    extract::State,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use anyhow::Result;
use chrono::Local;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::services::ServeDir;

use thermostat_core::{HvacMode, Notification, Preset, ZoneStatus};

use crate::{ServerContext, STALE_AFTER_SECS};

#[derive(Clone)]
pub struct WebState {
    pub ctx: Arc<ServerContext>,
    pub static_dir: PathBuf,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub zones: Vec<ZoneStatusView>,
    pub notifications: Vec<Notification>,
}

/// Zone state plus station liveness for the status page.
#[derive(Serialize)]
pub struct ZoneStatusView {
    #[serde(flatten)]
    pub zone: ZoneStatus,
    pub sensor_available: bool,
    pub outdoor_available: bool,
    pub relay_available: bool,
    /// Last state the relay station reported, if it ever did.
    pub relay_on: Option<bool>,
}

#[derive(Deserialize)]
pub struct SetTargetRequest {
    zone: String,
    temperature: f64,
}

#[derive(Deserialize)]
pub struct SetModeRequest {
    zone: String,
    mode: String,
}

#[derive(Deserialize)]
pub struct SetPresetRequest {
    zone: String,
    preset: String,
}

#[derive(Deserialize)]
pub struct SetPauseRequest {
    zone: String,
    requested: bool,
}

#[derive(Deserialize)]
pub struct ResetLearningRequest {
    zone: String,
}

pub async fn serve(ctx: Arc<ServerContext>, bind: String, static_dir: PathBuf) -> Result<()> {
    let state = WebState {
        ctx,
        static_dir: static_dir.clone(),
    };

    let app = Router::new()
        .route("/", get(serve_status_page))
        .route("/api/status", get(get_status))
        .route("/api/set_target", post(set_target))
        .route("/api/set_mode", post(set_mode))
        .route("/api/set_preset", post(set_preset))
        .route("/api/set_pause", post(set_pause))
        .route("/api/reset_learning", post(reset_learning))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CompressionLayer::new())
        .with_state(state);

    info!("web interface on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn serve_status_page(State(state): State<WebState>) -> Html<String> {
    let path = state.static_dir.join("status.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(content) => Html(content),
        Err(err) => {
            error!("reading {}: {}", path.display(), err);
            Html("Error loading page".to_string())
        }
    }
}

async fn get_status(State(state): State<WebState>) -> Json<StatusResponse> {
    Json(build_status(&state.ctx))
}

pub fn build_status(ctx: &ServerContext) -> StatusResponse {
    let now = Local::now().timestamp();
    let seen = ctx.station_seen.lock().unwrap();
    let relays = ctx.relay_reported.lock().unwrap();
    let fresh = |id: &str| seen.get(id).map_or(false, |&ts| now - ts < STALE_AFTER_SECS);

    let zones = ctx
        .zones
        .iter()
        .map(|rt| ZoneStatusView {
            zone: rt.zone.lock().unwrap().status(),
            sensor_available: fresh(&rt.indoor_sensor),
            outdoor_available: fresh(&rt.outdoor_sensor),
            relay_available: fresh(&rt.relay_addr),
            relay_on: relays.get(&rt.relay_addr).copied(),
        })
        .collect();

    let notifications = ctx.notifications.lock().unwrap().values().cloned().collect();
    StatusResponse {
        zones,
        notifications,
    }
}

fn unknown_zone(name: &str) -> Json<Value> {
    warn!("api request for unknown zone {}", name);
    Json(json!({
        "success": false,
        "error": format!("unknown zone {}", name)
    }))
}

async fn set_target(
    State(state): State<WebState>,
    Json(request): Json<SetTargetRequest>,
) -> Json<Value> {
    let rt = match state.ctx.zone_by_name(&request.zone) {
        Some(rt) => rt,
        None => return unknown_zone(&request.zone),
    };
    let effects = {
        let mut zone = rt.zone.lock().unwrap();
        zone.set_target_temp(request.temperature, Local::now())
    };
    state.ctx.apply_effects(rt, effects);
    Json(json!({ "success": true }))
}

async fn set_mode(
    State(state): State<WebState>,
    Json(request): Json<SetModeRequest>,
) -> Json<Value> {
    let rt = match state.ctx.zone_by_name(&request.zone) {
        Some(rt) => rt,
        None => return unknown_zone(&request.zone),
    };
    let mode = match HvacMode::from_name(&request.mode) {
        Some(mode) => mode,
        None => {
            warn!("unrecognized hvac mode {}", request.mode);
            return Json(json!({
                "success": false,
                "error": format!("unrecognized hvac mode {}", request.mode)
            }));
        }
    };
    let effects = {
        let mut zone = rt.zone.lock().unwrap();
        zone.set_hvac_mode(mode, Local::now())
    };
    state.ctx.apply_effects(rt, effects);
    Json(json!({ "success": true }))
}

async fn set_preset(
    State(state): State<WebState>,
    Json(request): Json<SetPresetRequest>,
) -> Json<Value> {
    let rt = match state.ctx.zone_by_name(&request.zone) {
        Some(rt) => rt,
        None => return unknown_zone(&request.zone),
    };
    let preset = match Preset::from_name(&request.preset) {
        Some(preset) => preset,
        None => {
            warn!("unrecognized preset {}", request.preset);
            return Json(json!({
                "success": false,
                "error": format!("unrecognized preset {}", request.preset)
            }));
        }
    };
    let effects = {
        let mut zone = rt.zone.lock().unwrap();
        zone.set_preset(preset, Local::now())
    };
    state.ctx.apply_effects(rt, effects);
    Json(json!({ "success": true }))
}

async fn set_pause(
    State(state): State<WebState>,
    Json(request): Json<SetPauseRequest>,
) -> Json<Value> {
    let rt = match state.ctx.zone_by_name(&request.zone) {
        Some(rt) => rt,
        None => return unknown_zone(&request.zone),
    };
    rt.zone
        .lock()
        .unwrap()
        .request_pause(request.requested, Local::now());
    Json(json!({ "success": true }))
}

async fn reset_learning(
    State(state): State<WebState>,
    Json(request): Json<ResetLearningRequest>,
) -> Json<Value> {
    let rt = match state.ctx.zone_by_name(&request.zone) {
        Some(rt) => rt,
        None => return unknown_zone(&request.zone),
    };
    let effects = {
        let mut zone = rt.zone.lock().unwrap();
        zone.reset_learning(Local::now())
    };
    state.ctx.apply_effects(rt, effects);
    Json(json!({ "success": true }))
}
