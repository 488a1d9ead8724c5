//! LLM API interaction behind a rate governor, with bounded retries.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait for "send text, get text back"
//! - [`GeminiClient`]: `AskAsync` over the Gemini `generateContent` endpoint
//! - [`Invoker`]: the only caller of an `AskAsync` backend; truncates the
//!   prompt to its token budget, consults the [`SharedGovernor`] before every
//!   attempt and classifies the final failure as an [`InvokeError`]
//!
//! # Retry Strategy
//!
//! - At most `max_attempts` attempts (3 by default); a throttled attempt
//!   counts as an attempt
//! - Throttled: sleep for the wait the governor reports
//! - Transient failure: sleep a fixed backoff (2 seconds by default)
//! - Quota or billing failure: give up immediately

use crate::budget::truncate_to_budget;
use crate::error::InvokeError;
use crate::governor::{RateDecision, SharedGovernor};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration as StdDuration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

/// Default number of attempts per invocation.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Header carrying the Gemini API key.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Substrings (matched case-insensitively) that mark a provider error as a
/// quota or billing condition.
const QUOTA_MARKERS: &[&str] = &["quota", "billing"];

/// Trait for async LLM interaction.
///
/// Implementors send text to a model and return its response. Errors are
/// opaque; the [`Invoker`] classifies them by message.
pub trait AskAsync {
    /// The type of response returned by the LLM.
    type Response;

    /// Send text to the LLM and receive a response.
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>>;
}

/// Whether a provider error message reports a quota or billing condition.
pub fn is_quota_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// A single logical "ask the model" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub prompt: String,
    pub max_attempts: usize,
    /// Approximate token ceiling; longer prompts are cut on a word boundary.
    pub token_budget: Option<usize>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            token_budget: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_token_budget(mut self, token_budget: usize) -> Self {
        self.token_budget = Some(token_budget);
        self
    }
}

/// Governed, retrying front for an [`AskAsync`] backend.
pub struct Invoker<T> {
    /// The underlying LLM client.
    inner: T,
    /// Process-wide call counter shared with every other invoker.
    governor: SharedGovernor,
    /// Fixed sleep between a transient failure and the next attempt.
    retry_backoff: StdDuration,
}

impl<T> fmt::Debug for Invoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invoker")
            .field("governor", &self.governor)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl<T> Invoker<T>
where
    T: AskAsync<Response = String>,
{
    pub fn new(inner: T, governor: SharedGovernor, retry_backoff: StdDuration) -> Self {
        Self {
            inner,
            governor,
            retry_backoff,
        }
    }

    pub fn governor(&self) -> &SharedGovernor {
        &self.governor
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &T {
        &self.inner
    }

    /// Run one logical model call to completion.
    ///
    /// The prompt is first cut to `request.token_budget`, if set. Each attempt
    /// then asks the shared governor for a slot; a denied attempt sleeps for
    /// the reported wait and still counts against `max_attempts`.
    ///
    /// # Arguments
    ///
    /// * `request` - Prompt, attempt ceiling and optional token budget
    ///
    /// # Returns
    ///
    /// The model's text on the first successful attempt, or:
    ///
    /// - [`InvokeError::QuotaExceeded`] as soon as a failure mentions quota or
    ///   billing (never retried)
    /// - [`InvokeError::RateExhausted`] when the final attempt is throttled
    /// - [`InvokeError::TransientUpstream`] with the last error message when
    ///   every attempt failed
    ///
    /// # Retry Behavior
    ///
    /// Transient failures sleep `retry_backoff` before the next attempt.
    /// Nothing here panics on upstream failure.
    #[instrument(level = "info", skip_all, fields(max_attempts = request.max_attempts))]
    pub async fn invoke(&self, request: InvocationRequest) -> Result<String, InvokeError> {
        let total_t0 = Instant::now();
        let prompt = match request.token_budget {
            Some(budget) => {
                let cut = truncate_to_budget(&request.prompt, budget);
                if cut.len() != request.prompt.len() {
                    info!(
                        budget,
                        original_bytes = request.prompt.len(),
                        truncated_bytes = cut.len(),
                        "Prompt truncated to token budget"
                    );
                }
                cut
            }
            None => request.prompt.as_str().into(),
        };
        let max_attempts = request.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let last = attempt >= max_attempts;

            if let RateDecision::Denied { wait_secs } = self.governor.try_acquire(Instant::now()) {
                if last {
                    error!(attempt, max = max_attempts, wait_secs, "Throttled on final attempt");
                    return Err(InvokeError::RateExhausted { wait_secs });
                }
                warn!(attempt, max = max_attempts, wait_secs, "Throttled; waiting for a free slot");
                sleep(StdDuration::from_secs(wait_secs)).await;
                continue;
            }

            let attempt_t0 = Instant::now();
            let message = match self.inner.ask(&prompt).await {
                Ok(text) => {
                    info!(
                        attempt,
                        elapsed_ms_total = total_t0.elapsed().as_millis(),
                        "Model call succeeded"
                    );
                    return Ok(text);
                }
                Err(e) => e.to_string(),
            };
            let attempt_ms = attempt_t0.elapsed().as_millis();

            if is_quota_error(&message) {
                error!(attempt, elapsed_ms_attempt = attempt_ms, error = %message, "Quota exceeded; not retrying");
                return Err(InvokeError::QuotaExceeded { message });
            }
            if last {
                error!(
                    attempt,
                    max = max_attempts,
                    elapsed_ms_total = total_t0.elapsed().as_millis(),
                    error = %message,
                    "Model call exhausted retries"
                );
                return Err(InvokeError::TransientUpstream { message });
            }
            warn!(
                attempt,
                max = max_attempts,
                elapsed_ms_attempt = attempt_ms,
                delay = ?self.retry_backoff,
                error = %message,
                "Model call failed; backing off"
            );
            sleep(self.retry_backoff).await;
        }
    }
}

/// `generateContent` request body.
#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Gemini `generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Build a client whose every call is bounded by `timeout`.
    pub fn new(
        api_base: &str,
        model: &str,
        api_key: &str,
        timeout: StdDuration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    /// The key travels in a header so it never appears in the request URL.
    fn request(&self, body: &GenerateContentRequest<'_>) -> RequestBuilder {
        self.http
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
    }
}

impl AskAsync for GeminiClient {
    type Response = String;

    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, text: &str) -> Result<Self::Response, Box<dyn Error>> {
        let t0 = Instant::now();
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text }],
            }],
        };

        let response = self.request(&body).send().await.map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let raw = response.text().await.map_err(reqwest::Error::without_url)?;
        let dt = t0.elapsed();

        if !status.is_success() {
            let detail = match serde_json::from_str::<ErrorEnvelope>(&raw) {
                Ok(envelope) => format!("{} ({})", envelope.error.message, envelope.error.status),
                Err(_) => raw,
            };
            warn!(elapsed_ms = dt.as_millis(), status = status.as_u16(), "API call failed");
            return Err(format!("Gemini API HTTP {}: {}", status.as_u16(), detail).into());
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw)?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or("Gemini response contained no candidates")?;
        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
            return Err(format!("Gemini returned no text (finish reason: {reason})").into());
        }

        debug!(elapsed_ms = dt.as_millis(), bytes = text.len(), "API call returned");
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::budget::TRUNCATION_MARKER;
    use crate::governor::GovernorLimits;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses in order and records every prompt it saw.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedModel {
        responses: Mutex<VecDeque<Result<String, String>>>,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl AskAsync for ScriptedModel {
        type Response = String;

        async fn ask(&self, text: &str) -> Result<String, Box<dyn Error>> {
            self.prompts.lock().unwrap().push(text.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(message.into()),
                None => Err("script exhausted".into()),
            }
        }
    }

    fn invoker(model: ScriptedModel, per_minute: usize) -> Invoker<ScriptedModel> {
        let governor = SharedGovernor::new(GovernorLimits {
            per_minute,
            per_day: 10_000,
        });
        Invoker::new(model, governor, StdDuration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let inv = invoker(ScriptedModel::new(vec![Ok("hello")]), 30);
        let out = inv.invoke(InvocationRequest::new("hi")).await;
        assert_eq!(out, Ok("hello".to_string()));
        assert_eq!(inv.inner.calls(), 1);
        assert_eq!(inv.governor().snapshot().minute_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_error_is_not_retried() {
        let inv = invoker(
            ScriptedModel::new(vec![Err("429 You exceeded your current QUOTA"), Ok("never")]),
            30,
        );
        let out = inv.invoke(InvocationRequest::new("hi")).await;
        assert!(matches!(out, Err(InvokeError::QuotaExceeded { .. })));
        assert_eq!(inv.inner.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let inv = invoker(
            ScriptedModel::new(vec![Err("HTTP 503"), Err("connection reset"), Ok("third time")]),
            30,
        );
        let t0 = Instant::now();
        let out = inv.invoke(InvocationRequest::new("hi").with_max_attempts(3)).await;
        assert_eq!(out, Ok("third time".to_string()));
        assert_eq!(inv.inner.calls(), 3);
        assert_eq!(inv.governor().snapshot().minute_calls, 3);
        assert!(t0.elapsed() >= StdDuration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_reports_last_error() {
        let inv = invoker(
            ScriptedModel::new(vec![Err("first"), Err("second"), Err("third")]),
            30,
        );
        let out = inv.invoke(InvocationRequest::new("hi")).await;
        assert_eq!(
            out,
            Err(InvokeError::TransientUpstream { message: "third".into() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_attempt_waits_then_calls() {
        let inv = invoker(ScriptedModel::new(vec![Ok("one"), Ok("two")]), 1);
        assert!(inv.invoke(InvocationRequest::new("a")).await.is_ok());

        let t0 = Instant::now();
        let out = inv.invoke(InvocationRequest::new("b").with_max_attempts(2)).await;
        assert_eq!(out, Ok("two".to_string()));
        assert!(t0.elapsed() >= StdDuration::from_secs(60));
        assert_eq!(inv.inner.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_exhausted_on_final_attempt() {
        let inv = invoker(ScriptedModel::new(vec![Ok("one")]), 1);
        assert!(inv.invoke(InvocationRequest::new("a")).await.is_ok());

        let out = inv.invoke(InvocationRequest::new("b").with_max_attempts(1)).await;
        assert_eq!(out, Err(InvokeError::RateExhausted { wait_secs: 60 }));
        assert_eq!(inv.inner.calls(), 1);
        assert_eq!(inv.governor().snapshot().minute_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_truncated_before_sending() {
        let inv = invoker(ScriptedModel::new(vec![Ok("ok")]), 30);
        let prompt = vec!["word"; 100].join(" ");
        inv.invoke(InvocationRequest::new(prompt).with_token_budget(13))
            .await
            .unwrap();
        let sent = inv.inner.prompts.lock().unwrap()[0].clone();
        assert_eq!(sent.split_whitespace().count(), 10);
        assert!(sent.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_quota_markers() {
        assert!(is_quota_error("Quota exceeded for metric"));
        assert!(is_quota_error("billing account disabled"));
        assert!(!is_quota_error("HTTP 503 service unavailable"));
    }

    #[test]
    fn test_candidate_text_is_joined() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"Hello "},{"text":"world"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .map(|c| c.parts.iter().filter_map(|p| p.text.clone()).collect())
            .unwrap_or_default();
        assert_eq!(text, "Hello world");
        assert_eq!(parsed.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: "hi" }],
            }],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"contents": [{"parts": [{"text": "hi"}]}]})
        );
    }

    #[test]
    fn test_api_key_sent_as_header_not_query() {
        let client = GeminiClient::new(
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-pro",
            "SECRET_KEY_123",
            StdDuration::from_secs(5),
        )
        .unwrap();
        let body = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: "hi" }],
            }],
        };
        let request = client.request(&body).build().unwrap();
        assert_eq!(request.url().query(), None);
        assert!(!request.url().as_str().contains("SECRET_KEY_123"));
        assert_eq!(
            request.headers().get(API_KEY_HEADER).and_then(|v| v.to_str().ok()),
            Some("SECRET_KEY_123")
        );
    }

    #[tokio::test]
    async fn test_transport_error_does_not_leak_api_key() {
        // Nothing listens on the discard port, so the send itself fails.
        let client = GeminiClient::new(
            "http://127.0.0.1:9",
            "m",
            "SECRET_KEY_123",
            StdDuration::from_secs(2),
        )
        .unwrap();
        let governor = SharedGovernor::new(GovernorLimits {
            per_minute: 30,
            per_day: 10_000,
        });
        let inv = Invoker::new(client, governor, StdDuration::from_millis(10));

        let err = inv
            .invoke(InvocationRequest::new("hi").with_max_attempts(1))
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::TransientUpstream { .. }));
        assert!(!err.to_string().contains("SECRET_KEY_123"), "{err}");
    }

    #[test]
    fn test_endpoint_trims_base() {
        let client = GeminiClient::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            "gemini-1.5-pro",
            "k",
            StdDuration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent"
        );
    }
}
