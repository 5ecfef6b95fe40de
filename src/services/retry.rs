//! Operator-triggered retries (`Failed -> Queued`, then back onto the work queue)
//! and regeneration of an analysis as a new request.

use tracing::{info, warn};

use crate::models::api::{BatchFailure, BatchRetryResponse};
use crate::models::notification::{RequestCreated, RequestEvent, RequestUpdate};
use crate::models::request::{AnalysisRequest, NewRequest, RequestStatus};
use crate::services::notifier::{publish_update, StatusNotifier};
use crate::services::queue::{QueueError, WorkQueue};
use crate::services::store::{RequestStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("Request {0} not found")]
    NotFound(i32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Requeue one request.
///
/// Retrying a request that is not `Failed` is allowed as an operator override;
/// it is logged and then proceeds.
pub async fn retry_request(
    store: &dyn RequestStore,
    queue: &WorkQueue,
    notifier: &dyn StatusNotifier,
    request_id: i32,
) -> Result<RequestUpdate, RetryError> {
    let request = store
        .get_request(request_id)
        .await?
        .ok_or(RetryError::NotFound(request_id))?;

    if request.status != RequestStatus::Failed {
        warn!(
            request_id,
            status = %request.status,
            "Retrying request that is not in Failed state, proceeding anyway"
        );
    }

    requeue(store, queue, notifier, request_id).await
}

/// Requeue many requests. Only `Failed` requests are retried here; the rest are reported.
pub async fn retry_batch(
    store: &dyn RequestStore,
    queue: &WorkQueue,
    notifier: &dyn StatusNotifier,
    request_ids: &[i32],
) -> BatchRetryResponse {
    let mut response = BatchRetryResponse::default();

    for &request_id in request_ids {
        let request = match store.get_request(request_id).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                response.failed.push(BatchFailure {
                    id: request_id,
                    reason: "Not found".to_string(),
                });
                continue;
            }
            Err(e) => {
                response.failed.push(BatchFailure {
                    id: request_id,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if request.status != RequestStatus::Failed {
            warn!(request_id, status = %request.status, "Batch retry skipped: not in Failed state");
            response.failed.push(BatchFailure {
                id: request_id,
                reason: format!("Not in Failed state (status: {})", request.status),
            });
            continue;
        }

        match requeue(store, queue, notifier, request_id).await {
            Ok(_) => response.succeeded.push(request_id),
            Err(e) => response.failed.push(BatchFailure {
                id: request_id,
                reason: e.to_string(),
            }),
        }
    }

    info!(
        succeeded = response.succeeded.len(),
        failed = response.failed.len(),
        "Batch retry finished"
    );
    response
}

/// Start a fresh analysis from an existing request's prompt and images.
///
/// The source row is never modified, whatever its status; the copy gets a new id
/// and goes through the normal `Queued` path.
pub async fn regenerate_request(
    store: &dyn RequestStore,
    queue: &WorkQueue,
    notifier: &dyn StatusNotifier,
    request_id: i32,
) -> Result<AnalysisRequest, RetryError> {
    let original = store
        .get_request(request_id)
        .await?
        .ok_or(RetryError::NotFound(request_id))?;
    if queue.is_closed() {
        return Err(QueueError::Closed(request_id).into());
    }

    let created = store
        .create_request(&NewRequest {
            user_prompt: original.user_prompt,
            image_references: original.image_references,
        })
        .await?;

    let event = RequestEvent::RequestCreated(RequestCreated {
        id: created.id,
        status: created.status,
        created_at: created.created_at,
    });
    if let Err(e) = notifier.notify(event).await {
        warn!(request_id = created.id, error = %e, "Failed to broadcast regenerated request");
    }

    queue.enqueue(created.id)?;
    info!(
        original_id = request_id,
        request_id = created.id,
        "Regenerated analysis request queued"
    );
    Ok(created)
}

async fn requeue(
    store: &dyn RequestStore,
    queue: &WorkQueue,
    notifier: &dyn StatusNotifier,
    request_id: i32,
) -> Result<RequestUpdate, RetryError> {
    // Nothing would pick the row up again before a restart.
    if queue.is_closed() {
        return Err(QueueError::Closed(request_id).into());
    }

    let updated_at = store
        .update_status(request_id, RequestStatus::Queued, None)
        .await?;
    let update = RequestUpdate {
        id: request_id,
        status: RequestStatus::Queued,
        updated_at,
        error_message: None,
    };
    publish_update(notifier, update.clone()).await;

    queue.enqueue(request_id)?;
    info!(request_id, "Request re-queued for analysis");
    Ok(update)
}
