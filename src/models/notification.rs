use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestStatus;

/// Event pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RequestEvent {
    RequestCreated(RequestCreated),
    RequestUpdated(RequestUpdate),
}

/// One status transition of a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestUpdate {
    pub id: i32,
    pub status: RequestStatus,
    pub updated_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestCreated {
    pub id: i32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}
