use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};

use crate::dto::{RateLimitDecisionResponse, RateLimitRequest};
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn check_handler(
    State(state): State<AppState>,
    Json(payload): Json<RateLimitRequest>,
) -> ApiResult<Response> {
    let decision = state
        .rate_limit_service
        .check(payload.identifier.as_str(), payload.action.as_str())
        .await?;

    if decision.blocked {
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, decision.retry_after_seconds.to_string())],
            Json(RateLimitDecisionResponse::from(decision)),
        )
            .into_response());
    }

    Ok(Json(RateLimitDecisionResponse::from(decision)).into_response())
}

pub async fn status_handler(
    State(state): State<AppState>,
    Json(payload): Json<RateLimitRequest>,
) -> ApiResult<Json<RateLimitDecisionResponse>> {
    let decision = state
        .rate_limit_service
        .status(payload.identifier.as_str(), payload.action.as_str())
        .await?;

    Ok(Json(RateLimitDecisionResponse::from(decision)))
}

pub async fn reset_handler(
    State(state): State<AppState>,
    Json(payload): Json<RateLimitRequest>,
) -> ApiResult<StatusCode> {
    state
        .rate_limit_service
        .reset(payload.identifier.as_str(), payload.action.as_str())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
