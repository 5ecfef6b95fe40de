use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

pub const KEY_API_KEY: &str = "openai_api_key";
pub const KEY_BASE_URL: &str = "openai_base_url";
pub const KEY_MODEL: &str = "openai_model";
pub const KEY_SYSTEM_PROMPT: &str = "system_prompt";
pub const KEY_TIMEOUT_SECS: &str = "request_timeout_seconds";
pub const KEY_PARALLELISM: &str = "parallel_openai_requests_per_prompt";
pub const KEY_TOTAL_ATTEMPTS: &str = "max_total_openai_attempts_per_prompt";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: f64 = 180.0;
const DEFAULT_PARALLELISM: usize = 1;
const DEFAULT_TOTAL_ATTEMPTS: usize = 3;

/// Raw key/value settings read fresh for one request.
#[derive(Debug, Clone, Default)]
pub struct SettingsSnapshot {
    values: HashMap<String, Value>,
}

impl SettingsSnapshot {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Decode stored text values: JSON objects/arrays, `true`/`false`, otherwise raw strings.
    pub fn from_stored<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let values = rows
            .into_iter()
            .map(|(key, raw)| {
                let value = decode_stored_value(&raw);
                (key, value)
            })
            .collect();
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Non-empty string value for `key`.
    fn text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Null | Value::String(_) => None,
            other => Some(other.to_string()),
        }
    }
}

fn decode_stored_value(raw: &str) -> Value {
    if raw.starts_with('{') || raw.starts_with('[') {
        return serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Settings that make a snapshot unusable for a request. Never retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("API key is not configured in settings")]
    MissingApiKey,

    #[error("Model is not configured in settings")]
    MissingModel,

    #[error("System prompt is not configured in settings")]
    MissingSystemPrompt,
}

/// Validated view of a snapshot, as consumed by the scheduler and executor.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt: String,
    pub attempt_timeout: Duration,
    /// Attempts allowed in flight at once (N). Never exceeds `total_attempts`.
    pub parallelism: usize,
    /// Attempt budget for one request (M).
    pub total_attempts: usize,
}

impl AnalysisSettings {
    pub fn from_snapshot(snapshot: &SettingsSnapshot) -> Result<Self, ConfigError> {
        let system_prompt = snapshot
            .text(KEY_SYSTEM_PROMPT)
            .ok_or(ConfigError::MissingSystemPrompt)?;
        let api_key = snapshot.text(KEY_API_KEY).ok_or(ConfigError::MissingApiKey)?;
        let model = snapshot.text(KEY_MODEL).ok_or(ConfigError::MissingModel)?;
        let base_url = snapshot
            .text(KEY_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let attempt_timeout = match snapshot.get(KEY_TIMEOUT_SECS) {
            None => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
            Some(raw) => match as_f64(raw)
                .filter(|secs| *secs > 0.0)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            {
                Some(timeout) => timeout,
                None => {
                    warn!(value = %raw, "Invalid {KEY_TIMEOUT_SECS}, using default {DEFAULT_TIMEOUT_SECS}s");
                    Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)
                }
            },
        };

        let parallelism = positive_count(snapshot, KEY_PARALLELISM, DEFAULT_PARALLELISM);
        let total_attempts = positive_count(snapshot, KEY_TOTAL_ATTEMPTS, DEFAULT_TOTAL_ATTEMPTS);

        // The budget wins: N is lowered to M rather than M raised to N, so a
        // configured attempt limit is never exceeded.
        let parallelism = if parallelism > total_attempts {
            warn!(
                parallelism,
                total_attempts,
                "Parallelism exceeds attempt budget, lowering parallelism to budget instead of raising total attempts"
            );
            total_attempts
        } else {
            parallelism
        };

        Ok(Self {
            api_key,
            model,
            base_url,
            system_prompt,
            attempt_timeout,
            parallelism,
            total_attempts,
        })
    }
}

/// Reads a count setting; missing uses `default`, unparseable uses `default`, `< 1` becomes 1.
fn positive_count(snapshot: &SettingsSnapshot, key: &str, default: usize) -> usize {
    let Some(raw) = snapshot.get(key) else {
        return default;
    };
    match as_i64(raw) {
        Some(n) if n >= 1 => n as usize,
        Some(n) => {
            warn!(key, value = n, "Setting is less than 1, using 1");
            1
        }
        None => {
            warn!(key, value = %raw, default, "Invalid setting, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_snapshot() -> SettingsSnapshot {
        let mut s = SettingsSnapshot::default();
        s.insert(KEY_API_KEY, "sk-test");
        s.insert(KEY_MODEL, "gpt-4o");
        s.insert(KEY_SYSTEM_PROMPT, "Review this code.");
        s
    }

    #[test]
    fn test_defaults_apply() {
        let settings = AnalysisSettings::from_snapshot(&base_snapshot()).unwrap();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.attempt_timeout, Duration::from_secs(180));
        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.total_attempts, 3);
    }

    #[test]
    fn test_missing_required_settings() {
        let mut s = base_snapshot();
        s.insert(KEY_SYSTEM_PROMPT, "   ");
        assert_eq!(
            AnalysisSettings::from_snapshot(&s).unwrap_err(),
            ConfigError::MissingSystemPrompt
        );

        let mut s = base_snapshot();
        s.insert(KEY_API_KEY, Value::Null);
        assert_eq!(AnalysisSettings::from_snapshot(&s).unwrap_err(), ConfigError::MissingApiKey);

        let mut s = base_snapshot();
        s.insert(KEY_MODEL, "");
        assert_eq!(AnalysisSettings::from_snapshot(&s).unwrap_err(), ConfigError::MissingModel);
    }

    #[test]
    fn test_parallelism_clamped_to_budget() {
        let mut s = base_snapshot();
        s.insert(KEY_PARALLELISM, "5");
        s.insert(KEY_TOTAL_ATTEMPTS, json!(2));
        let settings = AnalysisSettings::from_snapshot(&s).unwrap();
        assert_eq!(settings.parallelism, 2);
        assert_eq!(settings.total_attempts, 2);
    }

    #[test]
    fn test_invalid_counts_and_timeout() {
        let mut s = base_snapshot();
        s.insert(KEY_PARALLELISM, "zero");
        s.insert(KEY_TOTAL_ATTEMPTS, "-4");
        s.insert(KEY_TIMEOUT_SECS, "-1");
        let settings = AnalysisSettings::from_snapshot(&s).unwrap();
        assert_eq!(settings.parallelism, 1);
        assert_eq!(settings.total_attempts, 1);
        assert_eq!(settings.attempt_timeout, Duration::from_secs(180));

        s.insert(KEY_TIMEOUT_SECS, "1e30");
        let settings = AnalysisSettings::from_snapshot(&s).unwrap();
        assert_eq!(settings.attempt_timeout, Duration::from_secs(180));

        s.insert(KEY_TIMEOUT_SECS, "2.5");
        let settings = AnalysisSettings::from_snapshot(&s).unwrap();
        assert_eq!(settings.attempt_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_stored_values_are_decoded() {
        let snapshot = SettingsSnapshot::from_stored(vec![
            ("flags".to_string(), r#"{"a": 1}"#.to_string()),
            ("enabled".to_string(), "true".to_string()),
            ("broken".to_string(), "{not json".to_string()),
            ("plain".to_string(), "hello".to_string()),
        ]);
        assert_eq!(snapshot.get("flags"), Some(&json!({"a": 1})));
        assert_eq!(snapshot.get("enabled"), Some(&json!(true)));
        assert_eq!(snapshot.get("broken"), Some(&json!("{not json")));
        assert_eq!(snapshot.get("plain"), Some(&json!("hello")));
    }
}
