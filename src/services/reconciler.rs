//! Startup reconciliation of requests interrupted by a previous crash.
//!
//! The work queue lives in memory, so after a restart nothing will ever pick up
//! a request that was left `Queued` or `Processing`. Before the worker pool
//! starts, every such request is failed explicitly.

use tracing::{error, info, warn};

use crate::models::notification::RequestUpdate;
use crate::models::request::RequestStatus;
use crate::services::notifier::{publish_update, StatusNotifier};
use crate::services::store::{RequestStore, StoreError};

pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Requests found in an in-flight status.
    pub found: usize,
    /// Requests moved to Failed.
    pub failed: Vec<i32>,
    /// Requests whose update could not be written.
    pub errors: Vec<i32>,
}

/// Fail every request left `Queued` or `Processing`, one notification each.
///
/// A second call with no new in-flight rows finds nothing and does nothing.
pub async fn reconcile_interrupted(
    store: &dyn RequestStore,
    notifier: &dyn StatusNotifier,
) -> Result<ReconcileReport, StoreError> {
    info!("Checking for interrupted (Queued or Processing) requests");
    let ids = store.ids_with_status(&RequestStatus::IN_FLIGHT).await?;

    let mut report = ReconcileReport {
        found: ids.len(),
        ..ReconcileReport::default()
    };
    if ids.is_empty() {
        info!("No interrupted requests found");
        return Ok(report);
    }

    warn!(count = ids.len(), "Found interrupted requests, marking as Failed");
    for id in ids {
        match store
            .update_status(id, RequestStatus::Failed, Some(INTERRUPTED_MESSAGE))
            .await
        {
            Ok(updated_at) => {
                publish_update(
                    notifier,
                    RequestUpdate {
                        id,
                        status: RequestStatus::Failed,
                        updated_at,
                        error_message: Some(INTERRUPTED_MESSAGE.to_string()),
                    },
                )
                .await;
                report.failed.push(id);
            }
            Err(e) => {
                error!(request_id = id, error = %e, "Failed to mark interrupted request as Failed");
                report.errors.push(id);
            }
        }
    }

    info!(
        failed = report.failed.len(),
        errors = report.errors.len(),
        "Interrupted request reconciliation finished"
    );
    Ok(report)
}
