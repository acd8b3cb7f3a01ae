//! HTTP request handlers
//!
//! REST endpoints over the engine handle. Every handler is a thin
//! translation: parse the body, call the engine, report the outcome.

use crate::api::server::AppContext;
use crate::engine::{EngineStatus, TrackChangeFlags};
use crate::error::Error;
use crate::pipeline::OutputDetails;
use crate::post_processing::EQ_BAND_COUNT;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use segue_common::events::EngineState;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Default scope length when the query leaves it out
const DEFAULT_SCOPE_CHUNK_LENGTH: usize = 512;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub url: String,
    #[serde(default)]
    pub change: Vec<String>,
    #[serde(default)]
    pub force_stop_at_end: bool,
    #[serde(default)]
    pub begin_nanosec: u64,
    #[serde(default)]
    pub end_nanosec: u64,
}

#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    pub url: String,
    #[serde(default)]
    pub force_stop_at_end: bool,
    #[serde(default)]
    pub begin_nanosec: u64,
    #[serde(default)]
    pub end_nanosec: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlayRequest {
    #[serde(default)]
    pub offset_nanosec: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub stop_after: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub offset_nanosec: u64,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    volume: u8, // 0-100 user-facing scale
}

#[derive(Debug, Serialize)]
pub struct VolumeResponse {
    volume: u8,
}

#[derive(Debug, Deserialize)]
pub struct EqualizerRequest {
    pub preamp: i32,
    pub gains: [i32; EQ_BAND_COUNT],
}

#[derive(Debug, Deserialize)]
pub struct EqualizerEnabledRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub balance: f32,
}

#[derive(Debug, Serialize)]
pub struct PositionResponse {
    position_nanosec: u64,
    length_nanosec: u64,
    state: EngineState,
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    chunk_length: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ScopeResponse {
    samples: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct OutputsResponse {
    outputs: Vec<OutputDetails>,
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Engine error as an HTTP response
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadRequest(_) | Error::InvalidState(_) => StatusCode::BAD_REQUEST,
            Error::Construction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EngineGone => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }
        let body = ErrorResponse {
            status: "error".to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "segue-engine".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Audio Endpoints
// ============================================================================

/// GET /audio/outputs - Output sinks the backend offers
pub async fn list_outputs(State(ctx): State<AppContext>) -> ApiResult<OutputsResponse> {
    let outputs = ctx.engine.outputs().await?;
    info!("Found {} outputs", outputs.len());
    Ok(Json(OutputsResponse { outputs }))
}

/// GET /audio/volume - Current user volume
pub async fn get_volume(State(ctx): State<AppContext>) -> ApiResult<VolumeResponse> {
    let status = ctx.engine.status().await?;
    Ok(Json(VolumeResponse {
        volume: status.volume,
    }))
}

/// POST /audio/volume - Set user volume (0-100)
pub async fn set_volume(
    State(ctx): State<AppContext>,
    Json(req): Json<VolumeRequest>,
) -> ApiResult<VolumeResponse> {
    if req.volume > 100 {
        return Err(Error::BadRequest(format!("volume {} is above 100", req.volume)).into());
    }
    ctx.engine.set_volume(req.volume).await?;
    Ok(Json(VolumeResponse { volume: req.volume }))
}

/// POST /audio/equalizer - Set preamp and band gains (-100..=100)
pub async fn set_equalizer(
    State(ctx): State<AppContext>,
    Json(req): Json<EqualizerRequest>,
) -> ApiResult<StatusResponse> {
    ctx.engine
        .set_equalizer_parameters(req.preamp, req.gains)
        .await?;
    Ok(StatusResponse::ok())
}

/// POST /audio/equalizer/enabled
pub async fn set_equalizer_enabled(
    State(ctx): State<AppContext>,
    Json(req): Json<EqualizerEnabledRequest>,
) -> ApiResult<StatusResponse> {
    ctx.engine.set_equalizer_enabled(req.enabled).await?;
    Ok(StatusResponse::ok())
}

/// POST /audio/balance - Stereo balance, -1.0 (left) to 1.0 (right)
pub async fn set_balance(
    State(ctx): State<AppContext>,
    Json(req): Json<BalanceRequest>,
) -> ApiResult<StatusResponse> {
    if !req.balance.is_finite() {
        return Err(Error::BadRequest("balance must be a finite number".to_string()).into());
    }
    ctx.engine.set_stereo_balance(req.balance).await?;
    Ok(StatusResponse::ok())
}

// ============================================================================
// Playback Endpoints
// ============================================================================

/// POST /playback/load - Make a track current, crossfading if configured
pub async fn load(
    State(ctx): State<AppContext>,
    Json(req): Json<LoadRequest>,
) -> ApiResult<StatusResponse> {
    let change = TrackChangeFlags::from_names(&req.change)?;
    info!(url = %req.url, "Load request");
    ctx.engine
        .load(
            &req.url,
            change,
            req.force_stop_at_end,
            req.begin_nanosec,
            req.end_nanosec,
        )
        .await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/preload - Prepare the next track for a gapless switch
pub async fn preload(
    State(ctx): State<AppContext>,
    Json(req): Json<PreloadRequest>,
) -> ApiResult<StatusResponse> {
    info!(url = %req.url, "Preload request");
    ctx.engine
        .start_preloading(
            &req.url,
            req.force_stop_at_end,
            req.begin_nanosec,
            req.end_nanosec,
        )
        .await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/play - Start the current track, optionally at an offset
///
/// The body is optional.
pub async fn play(
    State(ctx): State<AppContext>,
    req: Option<Json<PlayRequest>>,
) -> ApiResult<StatusResponse> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    ctx.engine.play(req.offset_nanosec).await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/pause
pub async fn pause(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.engine.pause().await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/unpause
pub async fn unpause(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.engine.unpause().await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/stop - Stop now, or after the current track with
/// `stop_after`
pub async fn stop(
    State(ctx): State<AppContext>,
    req: Option<Json<StopRequest>>,
) -> ApiResult<StatusResponse> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    ctx.engine.stop(req.stop_after).await?;
    Ok(StatusResponse::ok())
}

/// POST /playback/seek - Debounced seek within the current track
pub async fn seek(
    State(ctx): State<AppContext>,
    Json(req): Json<SeekRequest>,
) -> ApiResult<StatusResponse> {
    ctx.engine.seek(req.offset_nanosec).await?;
    Ok(StatusResponse::ok())
}

/// GET /playback/state - Full engine status snapshot
pub async fn get_playback_state(State(ctx): State<AppContext>) -> ApiResult<EngineStatus> {
    Ok(Json(ctx.engine.status().await?))
}

/// GET /playback/position
pub async fn get_position(State(ctx): State<AppContext>) -> ApiResult<PositionResponse> {
    let status = ctx.engine.status().await?;
    Ok(Json(PositionResponse {
        position_nanosec: status.position_nanosec,
        length_nanosec: status.length_nanosec,
        state: status.state,
    }))
}

/// GET /playback/scope?chunk_length=N - Most recent samples for visualisers
pub async fn get_scope(
    State(ctx): State<AppContext>,
    Query(query): Query<ScopeQuery>,
) -> ApiResult<ScopeResponse> {
    let chunk_length = query.chunk_length.unwrap_or(DEFAULT_SCOPE_CHUNK_LENGTH);
    let samples = ctx.engine.scope(chunk_length).await?;
    Ok(Json(ScopeResponse { samples }))
}

// ============================================================================
// Settings Endpoints
// ============================================================================

/// POST /settings/reload - Re-read engine settings
pub async fn reload_settings(State(ctx): State<AppContext>) -> ApiResult<StatusResponse> {
    ctx.engine.reload_settings().await?;
    Ok(StatusResponse::ok())
}
