use axum::extract::{Path, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{BatchRetryBody, BatchRetryResponse};
use crate::models::notification::RequestUpdate;
use crate::routes::error::ApiError;
use crate::services::retry;

/// POST /api/v1/admin/requests/{id}/retry: requeue one request (operator override allowed).
pub async fn retry_request(
    State(state): State<AppState>,
    Path(request_id): Path<i32>,
) -> Result<Json<RequestUpdate>, ApiError> {
    let update = retry::retry_request(
        state.store.as_ref(),
        &state.queue,
        state.notifier.as_ref(),
        request_id,
    )
    .await?;
    Ok(Json(update))
}

/// POST /api/v1/admin/requests/batch-retry: requeue every Failed request in the list.
pub async fn batch_retry(
    State(state): State<AppState>,
    Json(body): Json<BatchRetryBody>,
) -> Result<Json<BatchRetryResponse>, ApiError> {
    body.validate()?;
    let response = retry::retry_batch(
        state.store.as_ref(),
        &state.queue,
        state.notifier.as_ref(),
        &body.request_ids,
    )
    .await;
    Ok(Json(response))
}
