//! Collaborator seams the engine consumes: request persistence and settings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::request::{AnalysisRequest, NewRequest, RequestStatus};
use crate::models::settings::SettingsSnapshot;

/// Terminal result of one processing round.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

impl FinalOutcome {
    pub fn status(&self) -> RequestStatus {
        match self {
            FinalOutcome::Completed(_) => RequestStatus::Completed,
            FinalOutcome::Failed(_) => RequestStatus::Failed,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            FinalOutcome::Completed(_) => None,
            FinalOutcome::Failed(message) => Some(message),
        }
    }
}

/// Read-modify-write access to request rows.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn create_request(&self, new: &NewRequest) -> Result<AnalysisRequest, StoreError>;

    async fn get_request(&self, id: i32) -> Result<Option<AnalysisRequest>, StoreError>;

    /// Persist a status change, returning the row's new `updated_at`.
    async fn update_status(
        &self,
        id: i32,
        status: RequestStatus,
        error_message: Option<&str>,
    ) -> Result<DateTime<Utc>, StoreError>;

    async fn finalize(&self, id: i32, outcome: &FinalOutcome) -> Result<DateTime<Utc>, StoreError>;

    async fn ids_with_status(&self, statuses: &[RequestStatus]) -> Result<Vec<i32>, StoreError>;
}

/// Source of the dynamic settings snapshot, read once per request.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load_settings(&self) -> Result<SettingsSnapshot, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request {0} not found")]
    NotFound(i32),

    #[error("Stored data is invalid: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DatabaseError",
            StoreError::NotFound(_) => "NotFound",
            StoreError::Corrupt(_) => "CorruptData",
        }
    }
}
