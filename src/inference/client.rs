use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::followups::extract_follow_ups;
use super::types::{
    AnalysisResult, ApiError, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};
use crate::config::{ApiKey, Config};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;

const QUERY_TEMPERATURE: f32 = 0.7;
const ANALYSIS_TEMPERATURE: f32 = 0.5;

const QUERY_SYSTEM_PROMPT: &str =
    "You are a research assistant that generates effective web search queries.";
const ANALYSIS_SYSTEM_PROMPT: &str =
    "You are a research analyst. Extract key insights and suggest follow-up questions.";

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference API rate limit exceeded")]
    RateLimited,

    #[error("inference API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("inference backend returned no usable completion")]
    EmptyCompletion,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Abstraction over the language-inference backend: query expansion and
/// content analysis. Implemented by `OpenAiClient` for production; mock
/// implementations used in tests.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Generates up to `n` candidate search queries for a research prompt.
    /// The backend may return fewer than `n`.
    async fn generate_queries(&self, prompt: &str, n: usize)
    -> Result<Vec<String>, InferenceError>;

    /// Summarizes `content` against the research `query` and mines follow-up
    /// questions from the summary.
    async fn analyze(&self, content: &str, query: &str)
    -> Result<AnalysisResult, InferenceError>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            api_key: config.inference_api_key.clone(),
            model: config.model.clone(),
            base_url: config.inference_base_url.clone(),
        }
    }

    async fn complete(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key.0)
            .header("User-Agent", crate::USER_AGENT)
            .json(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("inference API rate limited");
            return Err(InferenceError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            if let Ok(body) = serde_json::from_str::<ChatCompletionResponse>(&text)
                && let Some(err) = &body.error
            {
                let classified = classify_api_error(status.as_u16(), err);
                warn!(error = %classified, "inference API error");
                return Err(classified);
            }
            let snippet = text.get(..200).unwrap_or(&text);
            warn!(status = %status, "inference API error (no structured body)");
            return Err(InferenceError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let body: ChatCompletionResponse = response.json().await?;
        debug!(model = %self.model, "chat completion succeeded");

        if let Some(err) = &body.error {
            let classified = classify_api_error(status.as_u16(), err);
            warn!(error = %classified, "inference API error in 200 response");
            return Err(classified);
        }

        Ok(body)
    }

    async fn complete_with_retry(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, InferenceError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.complete(request).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retriable(&e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        let delay_ms = jittered_backoff(attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms, "retrying after transient inference error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(InferenceError::RateLimited))
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn generate_queries(
        &self,
        prompt: &str,
        n: usize,
    ) -> Result<Vec<String>, InferenceError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(QUERY_SYSTEM_PROMPT),
                ChatMessage::user(format!("Generate {n} distinct search queries for: {prompt}")),
            ],
            temperature: QUERY_TEMPERATURE,
            n: Some(n as u32),
        };

        let response = self.complete_with_retry(&request).await?;
        let queries: Vec<String> = choice_texts(response).into_iter().take(n).collect();
        if queries.is_empty() {
            return Err(InferenceError::EmptyCompletion);
        }
        debug!(count = queries.len(), "generated search queries");
        Ok(queries)
    }

    async fn analyze(
        &self,
        content: &str,
        query: &str,
    ) -> Result<AnalysisResult, InferenceError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
                ChatMessage::user(format!(
                    "Research query: {query}\n\nContent:\n{content}\n\n\
                     Extract key insights and suggest follow-up questions."
                )),
            ],
            temperature: ANALYSIS_TEMPERATURE,
            n: None,
        };

        let response = self.complete_with_retry(&request).await?;
        let summary = choice_texts(response)
            .into_iter()
            .next()
            .ok_or(InferenceError::EmptyCompletion)?;
        let follow_ups = extract_follow_ups(&summary);
        debug!(follow_ups = follow_ups.len(), "content analyzed");
        Ok(AnalysisResult { summary, follow_ups })
    }
}

/// Non-empty completion texts, in choice order.
fn choice_texts(response: ChatCompletionResponse) -> Vec<String> {
    response
        .choices
        .unwrap_or_default()
        .into_iter()
        .filter_map(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

fn is_retriable(e: &InferenceError) -> bool {
    matches!(
        e,
        InferenceError::RateLimited
            | InferenceError::Api {
                code: 500..=599,
                ..
            }
    )
}

/// Equal jitter backoff: base/2 + rand(0, base/2).
fn jittered_backoff(attempt: u32) -> u64 {
    let base = INITIAL_BACKOFF_MS * 2u64.pow(attempt);
    let half = base / 2;
    half + fastrand::u64(..half.max(1))
}

fn classify_api_error(status: u16, err: &ApiError) -> InferenceError {
    let message = err
        .message
        .clone()
        .unwrap_or_else(|| "Unknown error".to_string());

    match status {
        429 => InferenceError::RateLimited,
        code => InferenceError::Api { code, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{Choice, ChoiceMessage};

    fn make_response(texts: &[&str]) -> ChatCompletionResponse {
        ChatCompletionResponse {
            choices: Some(
                texts
                    .iter()
                    .map(|t| Choice {
                        message: ChoiceMessage {
                            content: Some(t.to_string()),
                        },
                    })
                    .collect(),
            ),
            error: None,
        }
    }

    #[test]
    fn choice_texts_skips_empty_candidates() {
        let texts = choice_texts(make_response(&["first", "", "  ", "second"]));
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[test]
    fn choice_texts_empty_response() {
        let response = ChatCompletionResponse {
            choices: None,
            error: None,
        };
        assert!(choice_texts(response).is_empty());
    }

    #[test]
    fn classify_429_as_rate_limited() {
        let err = ApiError {
            message: Some("Too many requests".into()),
            kind: None,
        };
        assert!(matches!(
            classify_api_error(429, &err),
            InferenceError::RateLimited
        ));
    }

    #[test]
    fn classify_other_as_api_error() {
        let err = ApiError {
            message: Some("Invalid model".into()),
            kind: Some("invalid_request_error".into()),
        };
        match classify_api_error(400, &err) {
            InferenceError::Api { code, message } => {
                assert_eq!(code, 400);
                assert_eq!(message, "Invalid model");
            }
            other => panic!("expected Api error, got: {other:?}"),
        }
    }

    #[test]
    fn server_errors_are_retriable() {
        assert!(is_retriable(&InferenceError::RateLimited));
        assert!(is_retriable(&InferenceError::Api {
            code: 503,
            message: "overloaded".into()
        }));
        assert!(!is_retriable(&InferenceError::Api {
            code: 400,
            message: "bad request".into()
        }));
        assert!(!is_retriable(&InferenceError::EmptyCompletion));
    }
}
