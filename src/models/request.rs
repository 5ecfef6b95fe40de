use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of an analysis request.
///
/// `Queued -> Processing -> {Completed | Failed}`, and `Failed -> Queued` on retry.
/// Completed is terminal: regenerating an analysis creates a new request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Statuses a worker may pick up and move to `Processing`.
    pub fn is_schedulable(self) -> bool {
        matches!(self, RequestStatus::Queued | RequestStatus::Failed)
    }

    /// Statuses a live process never leaves behind after a restart.
    pub const IN_FLIGHT: [RequestStatus; 2] = [RequestStatus::Queued, RequestStatus::Processing];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Queued => "Queued",
            RequestStatus::Processing => "Processing",
            RequestStatus::Completed => "Completed",
            RequestStatus::Failed => "Failed",
        }
    }
}

/// An analysis request as read from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: i32,
    pub user_prompt: Option<String>,
    pub image_references: Vec<String>,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub is_success: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a new request.
#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub user_prompt: Option<String>,
    pub image_references: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            RequestStatus::Queued,
            RequestStatus::Processing,
            RequestStatus::Completed,
            RequestStatus::Failed,
        ] {
            assert_eq!(RequestStatus::from_str(status.as_str()).unwrap(), status);
            assert_eq!(status.to_string(), status.as_str());
        }
        assert!(RequestStatus::from_str("pending").is_err());
    }

    #[test]
    fn test_schedulable_statuses() {
        assert!(RequestStatus::Queued.is_schedulable());
        assert!(RequestStatus::Failed.is_schedulable());
        assert!(!RequestStatus::Processing.is_schedulable());
        assert!(!RequestStatus::Completed.is_schedulable());
    }

    #[test]
    fn test_status_serializes_capitalized() {
        let json = serde_json::to_string(&RequestStatus::Processing).unwrap();
        assert_eq!(json, "\"Processing\"");
    }
}
