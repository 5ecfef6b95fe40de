use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::queries;
use crate::models::request::{AnalysisRequest, NewRequest, RequestStatus};
use crate::models::settings::SettingsSnapshot;
use crate::services::store::{FinalOutcome, RequestStore, SettingsSource, StoreError};

/// PostgreSQL-backed request store and settings source.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn create_request(&self, new: &NewRequest) -> Result<AnalysisRequest, StoreError> {
        queries::create_request(&self.pool, new).await
    }

    async fn get_request(&self, id: i32) -> Result<Option<AnalysisRequest>, StoreError> {
        queries::get_request(&self.pool, id).await
    }

    async fn update_status(
        &self,
        id: i32,
        status: RequestStatus,
        error_message: Option<&str>,
    ) -> Result<DateTime<Utc>, StoreError> {
        queries::update_status(&self.pool, id, status, error_message).await
    }

    async fn finalize(&self, id: i32, outcome: &FinalOutcome) -> Result<DateTime<Utc>, StoreError> {
        queries::finalize_request(&self.pool, id, outcome).await
    }

    async fn ids_with_status(&self, statuses: &[RequestStatus]) -> Result<Vec<i32>, StoreError> {
        queries::ids_with_status(&self.pool, statuses).await
    }
}

#[async_trait]
impl SettingsSource for PgStore {
    async fn load_settings(&self) -> Result<SettingsSnapshot, StoreError> {
        let rows = queries::settings_rows(&self.pool).await?;
        Ok(SettingsSnapshot::from_stored(rows))
    }
}
