use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Capacity of the concurrency gate and size of the worker pool.
    /// Read once at startup; changing it requires a restart.
    #[serde(default = "default_max_concurrent_analysis_tasks")]
    pub max_concurrent_analysis_tasks: i64,

    /// Upper bound on how long shutdown waits for the queue to drain.
    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,

    /// Root directory image references are resolved under.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Buffered events per WebSocket subscriber before the slowest one starts lagging.
    #[serde(default = "default_notification_buffer")]
    pub notification_buffer: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_max_concurrent_analysis_tasks() -> i64 {
    5
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    30
}

fn default_data_dir() -> String {
    "/app/data".to_string()
}

fn default_notification_buffer() -> usize {
    256
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Gate capacity, with invalid values raised to 1.
    pub fn analysis_concurrency(&self) -> usize {
        if self.max_concurrent_analysis_tasks < 1 {
            tracing::warn!(
                configured = self.max_concurrent_analysis_tasks,
                "Invalid MAX_CONCURRENT_ANALYSIS_TASKS, defaulting to 1"
            );
            1
        } else {
            self.max_concurrent_analysis_tasks as usize
        }
    }

    pub fn shutdown_drain_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_timeout_secs)
    }
}
