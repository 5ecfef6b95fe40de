use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::warn;

use crate::models::request::{AnalysisRequest, NewRequest, RequestStatus};
use crate::services::store::{FinalOutcome, StoreError};

fn request_from_row(row: &PgRow) -> Result<AnalysisRequest, StoreError> {
    let id: i32 = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    let status = RequestStatus::from_str(&status_str)
        .map_err(|_| StoreError::Corrupt(format!("request {id} has unknown status '{status_str}'")))?;

    let image_references = match row.try_get::<Option<serde_json::Value>, _>("image_references")? {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                other => {
                    warn!(request_id = id, reference = %other, "Skipping non-string image reference");
                    None
                }
            })
            .collect(),
        Some(serde_json::Value::Null) | None => Vec::new(),
        Some(other) => {
            warn!(request_id = id, value = %other, "image_references is not a list, ignoring");
            Vec::new()
        }
    };

    Ok(AnalysisRequest {
        id,
        user_prompt: row.try_get("user_prompt")?,
        image_references,
        status,
        error_message: row.try_get("error_message")?,
        result: row.try_get("gpt_raw_response")?,
        is_success: row.try_get("is_success")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new request in `Queued` state.
pub async fn create_request(pool: &PgPool, new: &NewRequest) -> Result<AnalysisRequest, StoreError> {
    let references = serde_json::to_value(&new.image_references)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let row = sqlx::query(
        r#"
        INSERT INTO requests (user_prompt, image_references, status)
        VALUES ($1, $2, 'Queued')
        RETURNING id, user_prompt, image_references, status, error_message,
                  gpt_raw_response, is_success, created_at, updated_at
        "#,
    )
    .bind(new.user_prompt.as_deref())
    .bind(references)
    .fetch_one(pool)
    .await?;

    request_from_row(&row)
}

/// Get a request by ID
pub async fn get_request(pool: &PgPool, id: i32) -> Result<Option<AnalysisRequest>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT id, user_prompt, image_references, status, error_message,
               gpt_raw_response, is_success, created_at, updated_at
        FROM requests
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(request_from_row).transpose()
}

/// Update status (and error message) in one statement, returning the new `updated_at`.
///
/// Any status other than `Failed` clears the error message.
pub async fn update_status(
    pool: &PgPool,
    id: i32,
    status: RequestStatus,
    error_message: Option<&str>,
) -> Result<DateTime<Utc>, StoreError> {
    let error_message = if status == RequestStatus::Failed {
        error_message
    } else {
        None
    };

    let row = sqlx::query(
        r#"
        UPDATE requests
        SET status = $1,
            error_message = $2,
            updated_at = NOW()
        WHERE id = $3
        RETURNING updated_at
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(r.try_get("updated_at")?),
        None => Err(StoreError::NotFound(id)),
    }
}

/// Write the terminal outcome of a processing round.
pub async fn finalize_request(
    pool: &PgPool,
    id: i32,
    outcome: &FinalOutcome,
) -> Result<DateTime<Utc>, StoreError> {
    let (status, result, error, is_success) = match outcome {
        FinalOutcome::Completed(payload) => (RequestStatus::Completed, Some(payload), None, true),
        FinalOutcome::Failed(message) => (RequestStatus::Failed, None, Some(message.as_str()), false),
    };

    let row = sqlx::query(
        r#"
        UPDATE requests
        SET status = $1,
            gpt_raw_response = $2,
            error_message = $3,
            is_success = $4,
            updated_at = NOW()
        WHERE id = $5
        RETURNING updated_at
        "#,
    )
    .bind(status.as_str())
    .bind(result)
    .bind(error)
    .bind(is_success)
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(r.try_get("updated_at")?),
        None => Err(StoreError::NotFound(id)),
    }
}

/// IDs of requests currently in any of `statuses`, oldest first.
pub async fn ids_with_status(
    pool: &PgPool,
    statuses: &[RequestStatus],
) -> Result<Vec<i32>, StoreError> {
    let names: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

    let rows = sqlx::query(
        r#"
        SELECT id
        FROM requests
        WHERE status = ANY($1)
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(names)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| r.try_get("id").map_err(StoreError::from))
        .collect()
}

/// All stored settings as raw `(key, value)` text pairs.
pub async fn settings_rows(pool: &PgPool) -> Result<Vec<(String, String)>, StoreError> {
    let rows = sqlx::query("SELECT key, value FROM settings")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|r| Ok((r.try_get("key")?, r.try_get("value")?)))
        .collect()
}
