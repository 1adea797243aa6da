//! Defines the Axum API routes and handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::backlash::BacklashError;
use crate::focuser::{Focuser, FocuserError, FocuserStatus};
use crate::hardware::SensorError;
use crate::motion::MotionError;
use crate::web::models::{
    BacklashRequest, EnabledRequest, ErrorResponse, MoveAbsoluteRequest, MoveRelativeRequest, MoveResponse,
    PresetRequest, PresetsResponse, SyncRequest,
};

pub type AppState = Focuser;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(focuser: AppState) -> Router {
    Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/move/absolute", post(move_absolute))
        .route("/api/v1/move/relative", post(move_relative))
        .route("/api/v1/sync", post(sync))
        .route("/api/v1/abort", post(abort))
        .route("/api/v1/backlash", post(set_backlash))
        .route("/api/v1/backlash/enabled", post(set_backlash_enabled))
        .route("/api/v1/thermal", post(set_thermal))
        .route("/api/v1/presets", get(get_presets))
        .route("/api/v1/presets/{index}", post(set_preset))
        .route("/api/v1/presets/{index}/goto", post(goto_preset))
        .with_state(focuser)
}

/// A `FocuserError` rendered as a JSON error body.
pub struct ApiError(FocuserError);

impl From<FocuserError> for ApiError {
    fn from(error: FocuserError) -> Self {
        Self(error)
    }
}

pub fn status_code(error: &FocuserError) -> StatusCode {
    match error {
        FocuserError::NotConnected | FocuserError::Motion(MotionError::NotConnected) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        FocuserError::Motion(MotionError::Busy | MotionError::Declined | MotionError::Refused(_))
        | FocuserError::Backlash(BacklashError::Declined(_)) => StatusCode::CONFLICT,
        FocuserError::Motion(MotionError::OutOfRange { .. } | MotionError::Config(_))
        | FocuserError::Backlash(BacklashError::PeriodOutOfRange { .. })
        | FocuserError::Thermal(_)
        | FocuserError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        FocuserError::Link(_)
        | FocuserError::Motion(MotionError::Link(_))
        | FocuserError::Backlash(BacklashError::Link(_))
        | FocuserError::Sensor(SensorError::Link(_)) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        tracing::warn!("API request failed ({}): {}", status, self.0);
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

async fn get_status(State(focuser): State<AppState>) -> Json<FocuserStatus> {
    Json(focuser.status().await)
}

async fn move_absolute(
    State(focuser): State<AppState>,
    Json(payload): Json<MoveAbsoluteRequest>,
) -> Result<(StatusCode, Json<MoveResponse>), ApiError> {
    let result = focuser.move_absolute(payload.target).await?;
    Ok((StatusCode::ACCEPTED, Json(MoveResponse { result })))
}

async fn move_relative(
    State(focuser): State<AppState>,
    Json(payload): Json<MoveRelativeRequest>,
) -> Result<(StatusCode, Json<MoveResponse>), ApiError> {
    let result = focuser.move_relative(payload.direction, payload.ticks).await?;
    Ok((StatusCode::ACCEPTED, Json(MoveResponse { result })))
}

async fn sync(State(focuser): State<AppState>, Json(payload): Json<SyncRequest>) -> Result<StatusCode, ApiError> {
    focuser.sync(payload.ticks).await?;
    Ok(StatusCode::OK)
}

async fn abort(State(focuser): State<AppState>) -> Result<StatusCode, ApiError> {
    focuser.abort().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn set_backlash(
    State(focuser): State<AppState>,
    Json(payload): Json<BacklashRequest>,
) -> Result<StatusCode, ApiError> {
    focuser.set_backlash_config(payload.steps, payload.period_us).await?;
    Ok(StatusCode::OK)
}

async fn set_backlash_enabled(
    State(focuser): State<AppState>,
    Json(payload): Json<EnabledRequest>,
) -> Result<StatusCode, ApiError> {
    focuser.set_backlash_enabled(payload.enabled).await?;
    Ok(StatusCode::OK)
}

async fn set_thermal(State(focuser): State<AppState>, Json(payload): Json<EnabledRequest>) -> StatusCode {
    focuser.set_temperature_compensation(payload.enabled).await;
    StatusCode::OK
}

async fn get_presets(State(focuser): State<AppState>) -> Json<PresetsResponse> {
    Json(PresetsResponse { positions: focuser.presets().await.to_vec() })
}

async fn set_preset(
    State(focuser): State<AppState>,
    Path(index): Path<usize>,
    Json(payload): Json<PresetRequest>,
) -> Result<StatusCode, ApiError> {
    focuser.set_preset(index, payload.position).await?;
    Ok(StatusCode::OK)
}

async fn goto_preset(
    State(focuser): State<AppState>,
    Path(index): Path<usize>,
) -> Result<(StatusCode, Json<MoveResponse>), ApiError> {
    let result = focuser.goto_preset(index).await?;
    Ok((StatusCode::ACCEPTED, Json(MoveResponse { result })))
}
