//! In-memory collaborators for exercising the engine without PostgreSQL or a live API.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use code_checker::models::notification::{RequestEvent, RequestUpdate};
use code_checker::models::request::{AnalysisRequest, NewRequest, RequestStatus};
use code_checker::models::settings::{
    AnalysisSettings, SettingsSnapshot, KEY_API_KEY, KEY_MODEL, KEY_PARALLELISM,
    KEY_SYSTEM_PROMPT, KEY_TIMEOUT_SECS, KEY_TOTAL_ATTEMPTS,
};
use code_checker::services::executor::{AttemptError, AttemptExecutor, AttemptOutcome};
use code_checker::services::notifier::{NotifyError, StatusNotifier};
use code_checker::services::store::{FinalOutcome, RequestStore, SettingsSource, StoreError};

/// Settings snapshot with every required key present.
pub fn snapshot(parallelism: i64, total_attempts: i64) -> SettingsSnapshot {
    let mut snapshot = SettingsSnapshot::default();
    snapshot.insert(KEY_API_KEY, "sk-test");
    snapshot.insert(KEY_MODEL, "gpt-test");
    snapshot.insert(KEY_SYSTEM_PROMPT, "Review this code and answer in JSON.");
    snapshot.insert(KEY_TIMEOUT_SECS, 30);
    snapshot.insert(KEY_PARALLELISM, parallelism);
    snapshot.insert(KEY_TOTAL_ATTEMPTS, total_attempts);
    snapshot
}

pub fn settings(parallelism: i64, total_attempts: i64) -> AnalysisSettings {
    AnalysisSettings::from_snapshot(&snapshot(parallelism, total_attempts))
        .expect("test settings are complete")
}

pub fn request(id: i32) -> AnalysisRequest {
    let now = Utc::now();
    AnalysisRequest {
        id,
        user_prompt: Some("fn main() {}".to_string()),
        image_references: Vec::new(),
        status: RequestStatus::Queued,
        error_message: None,
        result: None,
        is_success: false,
        created_at: now,
        updated_at: now,
    }
}

/// Poll `condition` until it holds or a second of (possibly paused) time has passed.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    next_id: i32,
    rows: BTreeMap<i32, AnalysisRequest>,
    failing_updates: HashSet<i32>,
}

/// Request store and settings source backed by a map.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    settings: Mutex<SettingsSnapshot>,
}

impl InMemoryStore {
    pub fn new(settings: SettingsSnapshot) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(StoreState::default()),
            settings: Mutex::new(settings),
        })
    }

    /// Insert a row directly in the given status.
    pub fn seed(&self, status: RequestStatus) -> i32 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut row = request(id);
        row.status = status;
        state.rows.insert(id, row);
        id
    }

    pub fn row(&self, id: i32) -> AnalysisRequest {
        self.state.lock().unwrap().rows[&id].clone()
    }

    pub fn status(&self, id: i32) -> RequestStatus {
        self.row(id).status
    }

    pub fn set_settings(&self, settings: SettingsSnapshot) {
        *self.settings.lock().unwrap() = settings;
    }

    /// Make every status write for `id` fail.
    pub fn fail_updates_for(&self, id: i32) {
        self.state.lock().unwrap().failing_updates.insert(id);
    }

    fn write(
        &self,
        id: i32,
        apply: impl FnOnce(&mut AnalysisRequest),
    ) -> Result<DateTime<Utc>, StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.failing_updates.contains(&id) {
            return Err(StoreError::Corrupt(format!("injected write failure for {id}")));
        }
        let row = state.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply(row);
        row.updated_at = Utc::now();
        Ok(row.updated_at)
    }
}

#[async_trait]
impl RequestStore for InMemoryStore {
    async fn create_request(&self, new: &NewRequest) -> Result<AnalysisRequest, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut row = request(id);
        row.user_prompt = new.user_prompt.clone();
        row.image_references = new.image_references.clone();
        state.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn get_request(&self, id: i32) -> Result<Option<AnalysisRequest>, StoreError> {
        Ok(self.state.lock().unwrap().rows.get(&id).cloned())
    }

    async fn update_status(
        &self,
        id: i32,
        status: RequestStatus,
        error_message: Option<&str>,
    ) -> Result<DateTime<Utc>, StoreError> {
        self.write(id, |row| {
            row.status = status;
            row.error_message = match status {
                RequestStatus::Failed => error_message.map(str::to_string),
                _ => None,
            };
        })
    }

    async fn finalize(&self, id: i32, outcome: &FinalOutcome) -> Result<DateTime<Utc>, StoreError> {
        self.write(id, |row| {
            row.status = outcome.status();
            match outcome {
                FinalOutcome::Completed(payload) => {
                    row.result = Some(payload.clone());
                    row.is_success = true;
                    row.error_message = None;
                }
                FinalOutcome::Failed(message) => {
                    row.result = None;
                    row.is_success = false;
                    row.error_message = Some(message.clone());
                }
            }
        })
    }

    async fn ids_with_status(&self, statuses: &[RequestStatus]) -> Result<Vec<i32>, StoreError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|row| statuses.contains(&row.status))
            .map(|row| row.id)
            .collect())
    }
}

#[async_trait]
impl SettingsSource for InMemoryStore {
    async fn load_settings(&self) -> Result<SettingsSnapshot, StoreError> {
        Ok(self.settings.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Records every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<RequestEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<RequestUpdate> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RequestEvent::RequestUpdated(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids announced through `request_created` events.
    pub fn created_ids(&self) -> Vec<i32> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                RequestEvent::RequestCreated(created) => Some(created.id),
                _ => None,
            })
            .collect()
    }

    pub fn statuses_for(&self, id: i32) -> Vec<RequestStatus> {
        self.updates()
            .into_iter()
            .filter(|update| update.id == id)
            .map(|update| update.status)
            .collect()
    }
}

#[async_trait]
impl StatusNotifier for RecordingNotifier {
    async fn notify(&self, event: RequestEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// What one scripted attempt does once launched.
#[derive(Debug, Clone)]
pub enum Step {
    /// Sleep, then return the outcome unless cancelled first.
    Finish {
        after: Duration,
        outcome: AttemptOutcome,
    },
    /// Run until cancelled.
    Hang,
    Panic,
}

pub fn valid(after_ms: u64, payload: Value) -> Step {
    Step::Finish {
        after: Duration::from_millis(after_ms),
        outcome: AttemptOutcome::Valid(payload),
    }
}

pub fn invalid(after_ms: u64) -> Step {
    Step::Finish {
        after: Duration::from_millis(after_ms),
        outcome: AttemptOutcome::Invalid {
            raw: "this is not json".to_string(),
        },
    }
}

pub fn transport(after_ms: u64, error: AttemptError) -> Step {
    Step::Finish {
        after: Duration::from_millis(after_ms),
        outcome: AttemptOutcome::Transport(error),
    }
}

pub fn ok_payload(tag: &str) -> Value {
    json!({ "summary": tag, "issues": [] })
}

/// Plays back one step per launched attempt, in launch order, and records concurrency.
pub struct ScriptedExecutor {
    script: Vec<Step>,
    fallback: Step,
    launched: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    cancelled: Mutex<Vec<usize>>,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedExecutor {
    /// Attempts past the end of `script` repeat `fallback`.
    pub fn new(script: Vec<Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script,
            fallback,
            launched: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    /// Every attempt behaves the same.
    pub fn repeating(step: Step) -> Arc<Self> {
        Self::new(Vec::new(), step)
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Attempt numbers (1-based, launch order) that observed cancellation.
    pub fn cancelled(&self) -> Vec<usize> {
        let mut numbers = self.cancelled.lock().unwrap().clone();
        numbers.sort_unstable();
        numbers
    }

    fn record_cancelled(&self, number: usize) -> AttemptOutcome {
        self.cancelled.lock().unwrap().push(number);
        AttemptOutcome::Cancelled
    }
}

#[async_trait]
impl AttemptExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _request: &AnalysisRequest,
        _settings: &AnalysisSettings,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        let number = self.launched.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self
            .script
            .get(number - 1)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        let _guard = RunningGuard(&self.running);

        match step {
            Step::Panic => panic!("scripted panic in attempt {number}"),
            Step::Hang => {
                cancel.cancelled().await;
                self.record_cancelled(number)
            }
            Step::Finish { after, outcome } => {
                tokio::select! {
                    _ = cancel.cancelled() => self.record_cancelled(number),
                    _ = tokio::time::sleep(after) => outcome,
                }
            }
        }
    }
}
