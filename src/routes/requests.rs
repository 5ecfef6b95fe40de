use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{CreateRequestBody, CreateRequestResponse, RequestStatusResponse};
use crate::models::notification::{RequestCreated, RequestEvent};
use crate::models::request::NewRequest;
use crate::routes::error::ApiError;
use crate::services::notifier::StatusNotifier;
use crate::services::retry;

/// POST /api/v1/requests: persist a new analysis request and enqueue it.
pub async fn create_request(
    State(state): State<AppState>,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<CreateRequestResponse>), ApiError> {
    body.validate()?;

    let request = state
        .store
        .create_request(&NewRequest {
            user_prompt: body.user_prompt,
            image_references: body.image_references,
        })
        .await?;

    let event = RequestEvent::RequestCreated(RequestCreated {
        id: request.id,
        status: request.status,
        created_at: request.created_at,
    });
    if let Err(e) = state.notifier.notify(event).await {
        tracing::warn!(request_id = request.id, error = %e, "Failed to broadcast request creation");
    }

    state.queue.enqueue(request.id)?;
    tracing::info!(request_id = request.id, "Analysis request submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRequestResponse {
            id: request.id,
            status: request.status,
            message: "Request queued for analysis".to_string(),
        }),
    ))
}

/// GET /api/v1/requests/{id}: current status and result.
pub async fn get_request_status(
    State(state): State<AppState>,
    Path(request_id): Path<i32>,
) -> Result<Json<RequestStatusResponse>, ApiError> {
    let request = state
        .store
        .get_request(request_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Request with ID {request_id} not found")))?;

    Ok(Json(RequestStatusResponse {
        id: request.id,
        status: request.status,
        error_message: request.error_message,
        result: request.result,
        updated_at: request.updated_at,
    }))
}

/// POST /api/v1/requests/{id}/regenerate: queue a new request copied from an existing one.
pub async fn regenerate_request(
    State(state): State<AppState>,
    Path(request_id): Path<i32>,
) -> Result<(StatusCode, Json<CreateRequestResponse>), ApiError> {
    let request = retry::regenerate_request(
        state.store.as_ref(),
        &state.queue,
        state.notifier.as_ref(),
        request_id,
    )
    .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateRequestResponse {
            id: request.id,
            status: request.status,
            message: format!("Regenerated from request {request_id}, queued for analysis"),
        }),
    ))
}
