//! Race-to-first-success attempt scheduling.
//!
//! For one request, up to `parallelism` attempts run at once and at most
//! `total_attempts` are ever launched. The first attempt to finish with a
//! valid payload wins, whatever its launch order, and every other attempt
//! still in flight is signalled to stop. Failed attempts are replaced while
//! budget remains.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::request::AnalysisRequest;
use crate::models::settings::AnalysisSettings;
use crate::services::executor::{AttemptExecutor, AttemptOutcome};

pub const INVALID_RESPONSE_MESSAGE: &str = "Failed to parse valid JSON response from the analysis API.";

/// Message used when the budget ran out without any attempt reporting a cause.
pub fn exhausted_message(total_attempts: usize) -> String {
    format!("Failed to get valid JSON response after {total_attempts} attempts.")
}

/// Result of one scheduling round. Exactly one of `result` / `last_error` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleReport {
    pub result: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub attempts_launched: usize,
}

struct ActiveAttempt {
    number: usize,
    cancel: CancellationToken,
}

/// Runs attempts for a request through an [`AttemptExecutor`].
#[derive(Clone)]
pub struct AttemptScheduler {
    executor: Arc<dyn AttemptExecutor>,
}

impl AttemptScheduler {
    pub fn new(executor: Arc<dyn AttemptExecutor>) -> Self {
        Self { executor }
    }

    pub async fn run(
        &self,
        request: Arc<AnalysisRequest>,
        settings: Arc<AnalysisSettings>,
    ) -> ScheduleReport {
        let request_id = request.id;
        let budget = settings.total_attempts.max(1);
        let parallelism = settings.parallelism.clamp(1, budget);

        // Cancels every attempt of this round if the scheduler itself is dropped.
        let round = CancellationToken::new();
        let _round_guard = round.clone().drop_guard();

        let mut attempts: JoinSet<AttemptOutcome> = JoinSet::new();
        let mut active: HashMap<Id, ActiveAttempt> = HashMap::new();
        let mut launched = 0usize;
        let mut result: Option<serde_json::Value> = None;
        let mut last_error: Option<String> = None;

        // Stop on a winner, or once the budget is spent and nothing is left in flight.
        while result.is_none() && (launched < budget || !active.is_empty()) {
            while active.len() < parallelism && launched < budget {
                launched += 1;
                info!(
                    request_id,
                    attempt = launched,
                    budget,
                    in_flight = active.len() + 1,
                    parallelism,
                    "Launching attempt"
                );

                let cancel = round.child_token();
                let executor = Arc::clone(&self.executor);
                let request = Arc::clone(&request);
                let settings = Arc::clone(&settings);
                let token = cancel.clone();
                let handle = attempts.spawn(async move {
                    executor.execute(&request, &settings, token).await
                });
                active.insert(
                    handle.id(),
                    ActiveAttempt {
                        number: launched,
                        cancel,
                    },
                );
            }

            if active.is_empty() {
                warn!(request_id, "No active attempts to wait for, stopping");
                break;
            }

            debug!(request_id, active = active.len(), "Waiting for the first attempt to finish");
            let Some(joined) = attempts.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((task_id, outcome)) => {
                    let Some(attempt) = active.remove(&task_id) else {
                        continue;
                    };
                    metrics::counter!("analysis_attempts_total", "outcome" => outcome.label())
                        .increment(1);

                    match outcome {
                        AttemptOutcome::Valid(payload) => {
                            info!(request_id, attempt = attempt.number, "Attempt succeeded with valid JSON");
                            result = Some(payload);
                            last_error = None;
                        }
                        AttemptOutcome::Invalid { raw } => {
                            let snippet: String = raw.chars().take(100).collect();
                            error!(request_id, attempt = attempt.number, snippet = %snippet, "Attempt failed: invalid JSON");
                            last_error = Some(INVALID_RESPONSE_MESSAGE.to_string());
                        }
                        AttemptOutcome::Transport(err) => {
                            error!(request_id, attempt = attempt.number, error = %err, "Attempt failed: API error");
                            last_error = Some(format!("API call failed: {}", err.kind()));
                        }
                        AttemptOutcome::Cancelled => {
                            warn!(request_id, attempt = attempt.number, "Attempt was cancelled before finishing");
                            last_error = Some(format!("Attempt {} was cancelled", attempt.number));
                        }
                    }
                }
                Err(join_err) => {
                    let Some(attempt) = active.remove(&join_err.id()) else {
                        continue;
                    };
                    metrics::counter!("analysis_attempts_total", "outcome" => "internal_error")
                        .increment(1);
                    if join_err.is_panic() {
                        error!(request_id, attempt = attempt.number, "Attempt panicked");
                        last_error = Some(format!("Internal error processing attempt {}", attempt.number));
                    } else {
                        warn!(request_id, attempt = attempt.number, "Attempt task was aborted");
                        last_error = Some(format!("Attempt {} was cancelled", attempt.number));
                    }
                }
            }
        }

        if !active.is_empty() {
            info!(request_id, remaining = active.len(), "Cancelling remaining attempts");
            for (_, attempt) in active.drain() {
                attempt.cancel.cancel();
            }
        }
        // Losers wind down on their own once they see the cancelled token.
        attempts.detach_all();

        if result.is_none() && last_error.is_none() {
            last_error = Some(exhausted_message(budget));
        }

        ScheduleReport {
            result,
            last_error,
            attempts_launched: launched,
        }
    }
}
