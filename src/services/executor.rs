use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::request::AnalysisRequest;
use crate::models::settings::AnalysisSettings;

/// Typed result of one attempt. Executors never signal failure any other way.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Content parsed into a JSON object.
    Valid(Value),
    /// Content came back but is not a JSON object.
    Invalid { raw: String },
    Transport(AttemptError),
    /// The attempt observed its cancellation token and stopped without a result.
    Cancelled,
}

impl AttemptOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Valid(_) => "valid",
            AttemptOutcome::Invalid { .. } => "invalid",
            AttemptOutcome::Transport(_) => "transport_error",
            AttemptOutcome::Cancelled => "cancelled",
        }
    }
}

/// Transport/API failure classification for one attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    #[error("response content is empty")]
    EmptyResponse,

    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),

    #[error("server error (HTTP {0})")]
    Server(u16),

    #[error("API rejected the request (HTTP {0})")]
    Api(u16),

    #[error("could not decode API response: {0}")]
    Decode(String),

    #[error("could not build API request: {0}")]
    Request(String),
}

impl AttemptError {
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::EmptyResponse => "EmptyResponse",
            AttemptError::Timeout => "Timeout",
            AttemptError::Connection(_) => "ConnectionError",
            AttemptError::RateLimited(_) => "RateLimitError",
            AttemptError::Server(_) => "ServerError",
            AttemptError::Api(_) => "ApiStatusError",
            AttemptError::Decode(_) => "DecodeError",
            AttemptError::Request(_) => "RequestError",
        }
    }
}

/// Performs one call to the external analysis API.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &AnalysisRequest,
        settings: &AnalysisSettings,
        cancel: CancellationToken,
    ) -> AttemptOutcome;
}

/// Build a fresh HTTP client for one attempt. Clients are never shared across attempts.
pub fn make_client(settings: &AnalysisSettings) -> Result<Client, AttemptError> {
    Client::builder()
        .timeout(settings.attempt_timeout)
        .build()
        .map_err(|e| AttemptError::Request(e.to_string()))
}

/// Classify message content returned by the API.
pub fn classify_content(content: Option<&str>) -> AttemptOutcome {
    let raw = match content {
        Some(text) if !text.trim().is_empty() => text,
        _ => return AttemptOutcome::Transport(AttemptError::EmptyResponse),
    };

    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => AttemptOutcome::Valid(value),
        _ => AttemptOutcome::Invalid {
            raw: raw.to_string(),
        },
    }
}

/// Map a non-success HTTP status to its failure class.
pub fn classify_status(status: StatusCode) -> Option<AttemptError> {
    if status.is_success() {
        None
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        Some(AttemptError::RateLimited(status.as_u16()))
    } else if status.is_server_error() {
        Some(AttemptError::Server(status.as_u16()))
    } else {
        Some(AttemptError::Api(status.as_u16()))
    }
}

fn classify_transport(err: &reqwest::Error) -> AttemptError {
    if err.is_timeout() {
        AttemptError::Timeout
    } else if err.is_decode() {
        AttemptError::Decode(err.to_string())
    } else if err.is_builder() {
        AttemptError::Request(err.to_string())
    } else {
        AttemptError::Connection(err.to_string())
    }
}

/// Accept only normalized relative paths made of plain components.
pub fn sanitize_reference(reference: &str) -> Option<PathBuf> {
    if reference.is_empty() || reference.contains("..") || reference.contains('\\') {
        return None;
    }

    let path = Path::new(reference);
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }

    if parts.join("/") != reference {
        return None;
    }
    Some(path.to_path_buf())
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Executor for OpenAI-compatible chat-completions endpoints.
pub struct ChatCompletionsExecutor {
    data_dir: PathBuf,
}

impl ChatCompletionsExecutor {
    /// `data_dir` is the root image references are resolved under.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Encode one referenced image as a data-URI content part. Unusable references are skipped.
    async fn image_part(&self, request_id: i32, reference: &str) -> Option<Value> {
        let Some(relative) = sanitize_reference(reference) else {
            warn!(request_id, reference, "Rejected unsafe image reference");
            return None;
        };

        let path = self.data_dir.join(relative);
        let (root, resolved) = match (
            tokio::fs::canonicalize(&self.data_dir).await,
            tokio::fs::canonicalize(&path).await,
        ) {
            (Ok(root), Ok(resolved)) => (root, resolved),
            (_, Err(e)) => {
                error!(request_id, path = %path.display(), error = %e, "Image file not found");
                return None;
            }
            (Err(e), _) => {
                error!(request_id, data_dir = %self.data_dir.display(), error = %e, "Data directory unavailable");
                return None;
            }
        };
        if !resolved.starts_with(&root) {
            error!(request_id, reference, "Image reference resolves outside data directory");
            return None;
        }

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(request_id, path = %resolved.display(), error = %e, "Failed to read image file");
                return None;
            }
        };

        let mime = image::guess_format(&bytes)
            .map(|format| format.to_mime_type())
            .unwrap_or_else(|_| {
                warn!(request_id, reference, "Could not detect image type, defaulting to image/png");
                "image/png"
            });
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

        Some(json!({
            "type": "image_url",
            "image_url": { "url": format!("data:{mime};base64,{encoded}"), "detail": "high" }
        }))
    }

    /// System message with the prompt template, then the user's text and images.
    pub async fn build_messages(&self, request: &AnalysisRequest, system_prompt: &str) -> Value {
        let text = format!(
            "User Prompt:\n{}",
            request.user_prompt.as_deref().unwrap_or("Not provided.")
        );
        let mut user_content = vec![json!({ "type": "text", "text": text })];

        for reference in &request.image_references {
            if let Some(part) = self.image_part(request.id, reference).await {
                user_content.push(part);
            }
        }
        debug!(
            request_id = request.id,
            images = user_content.len() - 1,
            "Built analysis messages"
        );

        json!([
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_content }
        ])
    }

    async fn call(&self, request: &AnalysisRequest, settings: &AnalysisSettings) -> AttemptOutcome {
        let messages = self.build_messages(request, &settings.system_prompt).await;

        let client = match make_client(settings) {
            Ok(client) => client,
            Err(e) => return AttemptOutcome::Transport(e),
        };

        let url = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
        let body = json!({
            "model": settings.model,
            "messages": messages,
            "response_format": { "type": "json_object" }
        });

        info!(request_id = request.id, model = %settings.model, "Calling analysis API");

        let response = match client
            .post(&url)
            .bearer_auth(&settings.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = classify_transport(&e);
                error!(request_id = request.id, error = %e, kind = err.kind(), "Analysis API call failed");
                return AttemptOutcome::Transport(err);
            }
        };

        if let Some(err) = classify_status(response.status()) {
            error!(request_id = request.id, status = %response.status(), kind = err.kind(), "Analysis API returned an error status");
            return AttemptOutcome::Transport(err);
        }

        let completion: ChatCompletion = match response.json().await {
            Ok(completion) => completion,
            Err(e) => {
                error!(request_id = request.id, error = %e, "Failed to decode analysis API response");
                return AttemptOutcome::Transport(classify_transport(&e));
            }
        };

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content);

        let outcome = classify_content(content.as_deref());
        match &outcome {
            AttemptOutcome::Invalid { raw } => {
                let snippet: String = raw.chars().take(200).collect();
                error!(request_id = request.id, snippet = %snippet, "Response is not a valid JSON object");
            }
            AttemptOutcome::Transport(err) => {
                warn!(request_id = request.id, kind = err.kind(), "Analysis API returned no content");
            }
            _ => info!(request_id = request.id, "Parsed JSON analysis response"),
        }
        outcome
    }
}

#[async_trait]
impl AttemptExecutor for ChatCompletionsExecutor {
    async fn execute(
        &self,
        request: &AnalysisRequest,
        settings: &AnalysisSettings,
        cancel: CancellationToken,
    ) -> AttemptOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => AttemptOutcome::Cancelled,
            outcome = tokio::time::timeout(settings.attempt_timeout, self.call(request, settings)) => {
                outcome.unwrap_or(AttemptOutcome::Transport(AttemptError::Timeout))
            }
        }
    }
}
