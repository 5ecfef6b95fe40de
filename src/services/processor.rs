use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::models::notification::RequestUpdate;
use crate::models::request::RequestStatus;
use crate::models::settings::AnalysisSettings;
use crate::services::executor::AttemptExecutor;
use crate::services::gate::GateError;
use crate::services::notifier::{publish_update, StatusNotifier};
use crate::services::scheduler::{exhausted_message, AttemptScheduler};
use crate::services::store::{FinalOutcome, RequestStore, SettingsSource, StoreError};

/// What processing did with one dequeued request.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed,
    Failed(String),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NotFound,
    NotSchedulable(RequestStatus),
}

/// Worker-level failures. Attempt failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Admission error: {0}")]
    Gate(#[from] GateError),
}

impl ProcessError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::Store(e) => e.kind(),
            ProcessError::Gate(_) => "GateClosed",
        }
    }
}

/// Drives one request through the state machine:
/// `Queued|Failed -> Processing -> Completed|Failed`.
pub struct RequestProcessor {
    store: Arc<dyn RequestStore>,
    settings: Arc<dyn SettingsSource>,
    notifier: Arc<dyn StatusNotifier>,
    scheduler: AttemptScheduler,
}

impl RequestProcessor {
    pub fn new(
        store: Arc<dyn RequestStore>,
        settings: Arc<dyn SettingsSource>,
        notifier: Arc<dyn StatusNotifier>,
        executor: Arc<dyn AttemptExecutor>,
    ) -> Self {
        Self {
            store,
            settings,
            notifier,
            scheduler: AttemptScheduler::new(executor),
        }
    }

    /// Process one request. The caller must already hold a gate permit.
    pub async fn process(&self, request_id: i32) -> Result<ProcessOutcome, ProcessError> {
        let started = Instant::now();
        info!(request_id, "Starting analysis processing");

        let Some(request) = self.store.get_request(request_id).await? else {
            error!(request_id, "Request not found for processing");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotFound));
        };
        if !request.status.is_schedulable() {
            warn!(request_id, status = %request.status, "Request is not schedulable, skipping");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotSchedulable(request.status)));
        }

        // Fresh snapshot per request: later edits only affect later requests.
        let snapshot = self.settings.load_settings().await?;
        let settings = match AnalysisSettings::from_snapshot(&snapshot) {
            Ok(settings) => settings,
            Err(e) => {
                let message = e.to_string();
                error!(request_id, error = %message, "Invalid analysis settings, failing request");
                self.finish(request_id, FinalOutcome::Failed(message.clone())).await?;
                metrics::counter!("analysis_requests_failed_total").increment(1);
                return Ok(ProcessOutcome::Failed(message));
            }
        };
        info!(
            request_id,
            parallelism = settings.parallelism,
            total_attempts = settings.total_attempts,
            timeout_secs = settings.attempt_timeout.as_secs_f64(),
            "Loaded settings snapshot"
        );

        // Status may have moved while this worker waited for admission.
        let Some(request) = self.store.get_request(request_id).await? else {
            error!(request_id, "Request disappeared before processing");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotFound));
        };
        if !request.status.is_schedulable() {
            warn!(request_id, status = %request.status, "Request status changed before processing, skipping");
            return Ok(ProcessOutcome::Skipped(SkipReason::NotSchedulable(request.status)));
        }

        self.transition(request_id, RequestStatus::Processing, None).await?;

        let total_attempts = settings.total_attempts;
        let report = self
            .scheduler
            .run(Arc::new(request), Arc::new(settings))
            .await;

        let outcome = match report.result {
            Some(payload) => FinalOutcome::Completed(payload),
            None => FinalOutcome::Failed(
                report
                    .last_error
                    .unwrap_or_else(|| exhausted_message(total_attempts)),
            ),
        };
        self.finish(request_id, outcome.clone()).await?;

        metrics::histogram!("analysis_processing_seconds").record(started.elapsed().as_secs_f64());

        Ok(match outcome {
            FinalOutcome::Completed(_) => {
                metrics::counter!("analysis_requests_completed_total").increment(1);
                info!(
                    request_id,
                    attempts = report.attempts_launched,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Processing completed"
                );
                ProcessOutcome::Completed
            }
            FinalOutcome::Failed(message) => {
                metrics::counter!("analysis_requests_failed_total").increment(1);
                error!(
                    request_id,
                    attempts = report.attempts_launched,
                    reason = %message,
                    "Processing failed"
                );
                ProcessOutcome::Failed(message)
            }
        })
    }

    /// Force a request to Failed after a worker-level failure so it cannot stay stuck.
    ///
    /// Only requests still `Processing` or `Queued` are touched. Returns whether a
    /// transition happened.
    pub async fn fail_after_error(&self, request_id: i32, kind: &str) -> Result<bool, StoreError> {
        let Some(request) = self.store.get_request(request_id).await? else {
            return Ok(false);
        };
        if !RequestStatus::IN_FLIGHT.contains(&request.status) {
            return Ok(false);
        }

        let message = format!("Critical processing error: {kind}");
        self.transition(request_id, RequestStatus::Failed, Some(&message))
            .await?;
        metrics::counter!("analysis_requests_failed_total").increment(1);
        warn!(request_id, reason = %message, "Marked request as Failed after critical error");
        Ok(true)
    }

    async fn transition(
        &self,
        request_id: i32,
        status: RequestStatus,
        error_message: Option<&str>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let updated_at = self
            .store
            .update_status(request_id, status, error_message)
            .await?;
        publish_update(
            self.notifier.as_ref(),
            RequestUpdate {
                id: request_id,
                status,
                updated_at,
                error_message: error_message.map(str::to_string),
            },
        )
        .await;
        Ok(updated_at)
    }

    async fn finish(&self, request_id: i32, outcome: FinalOutcome) -> Result<(), StoreError> {
        let updated_at = self.store.finalize(request_id, &outcome).await?;
        publish_update(
            self.notifier.as_ref(),
            RequestUpdate {
                id: request_id,
                status: outcome.status(),
                updated_at,
                error_message: outcome.error_message().map(str::to_string),
            },
        )
        .await;
        Ok(())
    }
}
