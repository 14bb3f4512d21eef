use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::admin::{AdjustMode, AdminConsole, AdminError};
use super::domain::{ActionId, Period, SubjectId};
use super::lifecycle::{AckStatus, CandidateLifecycle, PipelineEvent, ReviewAction};

/// Shared handles for the pipeline endpoints.
#[derive(Clone)]
pub struct PipelineApi {
    pub lifecycle: Arc<CandidateLifecycle>,
    pub admin: Arc<AdminConsole>,
}

/// Router builder exposing event intake, reviewer actions, and admin maintenance.
pub fn pipeline_router(api: PipelineApi) -> Router {
    Router::new()
        .route("/api/v1/events", post(event_handler))
        .route("/api/v1/reviews", post(review_handler))
        .route("/api/v1/admin/stats/refresh", post(refresh_stats_handler))
        .route("/api/v1/admin/stats/:period", get(monthly_report_handler))
        .route("/api/v1/admin/bans", get(list_bans_handler))
        .route("/api/v1/admin/bans/:subject_id", delete(clear_ban_handler))
        .route(
            "/api/v1/admin/interviewers/:interviewer_id/count",
            post(adjust_count_handler),
        )
        .route(
            "/api/v1/admin/candidates/by-interviewer",
            get(candidates_by_interviewer_handler),
        )
        .route("/api/v1/admin/actions", get(list_actions_handler))
        .route("/api/v1/admin/actions/:action_id", delete(cancel_action_handler))
        .with_state(api)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, axum::Json(payload)).into_response()
}

fn admin_error_response(error: AdminError) -> Response {
    let status = match error {
        AdminError::Gateway(_) | AdminError::Projection(_) => StatusCode::BAD_GATEWAY,
        AdminError::InvalidPeriod(_) => StatusCode::BAD_REQUEST,
        AdminError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, error.to_string())
}

pub(crate) async fn event_handler(
    State(api): State<PipelineApi>,
    axum::Json(event): axum::Json<PipelineEvent>,
) -> Response {
    api.lifecycle.handle(event).await;
    (StatusCode::ACCEPTED, axum::Json(json!({ "status": "accepted" }))).into_response()
}

pub(crate) async fn review_handler(
    State(api): State<PipelineApi>,
    axum::Json(action): axum::Json<ReviewAction>,
) -> Response {
    let acknowledgement = api.lifecycle.perform(action, Utc::now()).await;
    let status = match acknowledgement.status {
        AckStatus::Succeeded | AckStatus::PartiallySucceeded => StatusCode::OK,
        AckStatus::Failed => StatusCode::CONFLICT,
    };
    (status, axum::Json(acknowledgement)).into_response()
}

async fn refresh_stats_handler(State(api): State<PipelineApi>) -> Response {
    match api.admin.refresh_stats_now(Utc::now()).await {
        Ok(months) => (StatusCode::OK, axum::Json(json!({ "months": months }))).into_response(),
        Err(error) => admin_error_response(error),
    }
}

async fn monthly_report_handler(
    State(api): State<PipelineApi>,
    Path(period): Path<String>,
) -> Response {
    let period = match period.parse::<Period>() {
        Ok(period) => period,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    match api.admin.monthly_report(period).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => admin_error_response(error),
    }
}

async fn list_bans_handler(State(api): State<PipelineApi>) -> Response {
    match api.admin.list_bans(Utc::now()).await {
        Ok(bans) => (StatusCode::OK, axum::Json(bans)).into_response(),
        Err(error) => admin_error_response(error),
    }
}

async fn clear_ban_handler(
    State(api): State<PipelineApi>,
    Path(subject_id): Path<u64>,
) -> Response {
    match api.admin.clear_ban(SubjectId(subject_id)).await {
        Ok(true) => (StatusCode::OK, axum::Json(json!({ "removed": true }))).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "no exclusion recorded for subject"),
        Err(error) => admin_error_response(error),
    }
}

#[derive(Debug, Deserialize)]
pub struct AdjustCountRequest {
    pub mode: AdjustMode,
    pub count: usize,
    #[serde(default)]
    pub period: Option<Period>,
}

async fn adjust_count_handler(
    State(api): State<PipelineApi>,
    Path(interviewer_id): Path<u64>,
    axum::Json(request): axum::Json<AdjustCountRequest>,
) -> Response {
    let period = request
        .period
        .unwrap_or_else(|| api.admin.current_period(Utc::now()));
    match api
        .admin
        .adjust_interview_count(SubjectId(interviewer_id), request.mode, request.count, period)
        .await
    {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => admin_error_response(error),
    }
}

async fn candidates_by_interviewer_handler(State(api): State<PipelineApi>) -> Response {
    match api.admin.list_candidates_by_interviewer().await {
        Ok(groups) => (StatusCode::OK, axum::Json(groups)).into_response(),
        Err(error) => admin_error_response(error),
    }
}

async fn list_actions_handler(State(api): State<PipelineApi>) -> Response {
    (StatusCode::OK, axum::Json(api.admin.list_actions())).into_response()
}

async fn cancel_action_handler(
    State(api): State<PipelineApi>,
    Path(action_id): Path<String>,
) -> Response {
    let id = match action_id.parse::<ActionId>() {
        Ok(id) => id,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, error.to_string()),
    };
    match api.admin.cancel_action(id).await {
        Ok(true) => (StatusCode::OK, axum::Json(json!({ "cancelled": true }))).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "no queued action with that id"),
        Err(error) => admin_error_response(error),
    }
}
