use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    gate::ConcurrencyGate, notifier::BroadcastNotifier, queue::WorkQueue, store::RequestStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub store: Arc<dyn RequestStore>,
    pub queue: Arc<WorkQueue>,
    pub gate: Arc<ConcurrencyGate>,
    pub notifier: Arc<BroadcastNotifier>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        store: Arc<dyn RequestStore>,
        queue: Arc<WorkQueue>,
        gate: Arc<ConcurrencyGate>,
        notifier: Arc<BroadcastNotifier>,
    ) -> Self {
        Self {
            db,
            store,
            queue,
            gate,
            notifier,
        }
    }
}
