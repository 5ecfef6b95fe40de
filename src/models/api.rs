use garde::Validate;
use serde::{Deserialize, Serialize};

use super::request::RequestStatus;

/// Body of `POST /api/v1/requests`.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateRequestBody {
    #[garde(length(max = 100_000))]
    pub user_prompt: Option<String>,

    #[serde(default)]
    #[garde(length(max = 10), inner(length(min = 1, max = 512)))]
    pub image_references: Vec<String>,
}

/// Response after submitting an analysis request.
#[derive(Debug, Serialize)]
pub struct CreateRequestResponse {
    pub id: i32,
    pub status: RequestStatus,
    pub message: String,
}

/// Response for querying request status.
#[derive(Debug, Serialize)]
pub struct RequestStatusResponse {
    pub id: i32,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Body of `POST /api/v1/admin/requests/batch-retry`.
#[derive(Debug, Deserialize, Validate)]
pub struct BatchRetryBody {
    #[garde(length(min = 1, max = 500))]
    pub request_ids: Vec<i32>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct BatchFailure {
    pub id: i32,
    pub reason: String,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct BatchRetryResponse {
    pub succeeded: Vec<i32>,
    pub failed: Vec<BatchFailure>,
}
