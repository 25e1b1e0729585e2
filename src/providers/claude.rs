use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::retry::{is_rate_limited, retry_after};
use super::{ServiceFuture, TranslationService};
use crate::error::TranslationFault;
use crate::languages::Direction;
use crate::translations::{PromptKind, render_system_prompt, render_user_prompt};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct ClaudeTranslator {
    key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    base_url: String,
    client: reqwest::Client,
}

impl ClaudeTranslator {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4000,
            temperature: 0.3,
            base_url: base_url(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Per-request HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, system: &str, user: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": system,
            "messages": [
                {"role": "user", "content": user}
            ]
        })
    }

    async fn send(&self, system: String, user: String) -> Result<String, TranslationFault> {
        let body = self.request_body(&system, &user);
        debug!("Claude request ({} chars) to {}", user.chars().count(), self.model);
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", self.key.as_str())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let retry_after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        if status.is_success() {
            return extract_text(&text);
        }
        Err(classify_status(status, retry_after, &text))
    }
}

impl TranslationService for ClaudeTranslator {
    fn translate<'a>(&'a self, text: &'a str, direction: Direction) -> ServiceFuture<'a> {
        Box::pin(async move {
            let system = render_system_prompt(direction, PromptKind::Text)
                .map_err(|err| TranslationFault::Other(format!("{:#}", err)))?;
            let user = render_user_prompt(text)
                .map_err(|err| TranslationFault::Other(format!("{:#}", err)))?;
            self.send(system, user).await
        })
    }

    fn translate_grouped<'a>(&'a self, span_json: &'a str, direction: Direction) -> ServiceFuture<'a> {
        Box::pin(async move {
            let system = render_system_prompt(direction, PromptKind::Grouped)
                .map_err(|err| TranslationFault::Other(format!("{:#}", err)))?;
            self.send(system, span_json.to_string()).await
        })
    }
}

fn base_url() -> String {
    std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn classify_transport(err: reqwest::Error) -> TranslationFault {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        TranslationFault::ConnectionFailed(err.to_string())
    } else {
        TranslationFault::Other(err.to_string())
    }
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> TranslationFault {
    let message = format!(
        "Claude API error ({}): {}",
        status,
        extract_claude_error(body).unwrap_or_else(|| body.to_string())
    );
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return TranslationFault::Unauthenticated(message);
    }
    if is_rate_limited(status, body) {
        return TranslationFault::RateLimited {
            message,
            retry_after,
        };
    }
    TranslationFault::Other(message)
}

fn extract_text(body: &str) -> Result<String, TranslationFault> {
    let payload: ClaudeResponse = serde_json::from_str(body).map_err(|err| {
        TranslationFault::Other(format!("failed to parse Claude response JSON: {}", err))
    })?;
    let texts = payload
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>();
    if texts.is_empty() {
        return Err(TranslationFault::Other(
            "no text content returned from Claude".to_string(),
        ));
    }
    Ok(texts.join("").trim().to_string())
}

fn extract_claude_error(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<ClaudeError>,
    }

    #[derive(Deserialize)]
    struct ClaudeError {
        #[serde(rename = "type")]
        kind: Option<String>,
        message: Option<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    let error = parsed.error?;
    let mut parts = Vec::new();
    if let Some(message) = error.message
        && !message.trim().is_empty()
    {
        parts.push(message);
    }
    if let Some(kind) = error.kind
        && !kind.trim().is_empty()
    {
        parts.push(format!("type: {}", kind));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;
    use insta::assert_snapshot;

    #[test]
    fn text_blocks_are_joined() {
        let payload = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/claude_text_response.json"
        ));
        assert_snapshot!(extract_text(payload).unwrap(), @"課題の背景");
    }

    #[test]
    fn response_without_text_is_other_fault() {
        let err = extract_text(r#"{"content":[{"type":"tool_use"}]}"#).unwrap_err();
        assert_eq!(err.kind(), FaultKind::Other);
        let err = extract_text("<html>").unwrap_err();
        assert_eq!(err.kind(), FaultKind::Other);
    }

    #[test]
    fn statuses_map_to_fault_kinds() {
        let auth = classify_status(
            StatusCode::UNAUTHORIZED,
            None,
            r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#,
        );
        assert_eq!(auth.kind(), FaultKind::Unauthenticated);
        assert_snapshot!(
            auth.to_string(),
            @"translation service rejected credentials: Claude API error (401 Unauthorized): invalid x-api-key | type: authentication_error"
        );

        let limited = classify_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(12)),
            "{}",
        );
        assert_eq!(limited.kind(), FaultKind::RateLimited);
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(12)));

        let other = classify_status(StatusCode::BAD_REQUEST, None, "bad");
        assert_eq!(other.kind(), FaultKind::Other);
    }

    #[test]
    fn request_body_carries_settings() {
        let translator = ClaudeTranslator::new("sk-ant-test")
            .with_model("claude-test")
            .with_max_tokens(128)
            .with_temperature(0.5);
        let body = translator.request_body("system", "Task");
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["messages"][0]["content"], "Task");
        assert_eq!(body["system"], "system");
    }

    #[test]
    fn blank_model_keeps_default() {
        assert_eq!(ClaudeTranslator::new("k").with_model("  ").model(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_failure() {
        let translator = ClaudeTranslator::new("sk-ant-test")
            .with_base_url("http://127.0.0.1:9/v1/messages")
            .with_timeout(Duration::from_secs(2));
        let err = translator
            .translate("Task", Direction::EnToJa)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FaultKind::ConnectionFailed);
    }
}
