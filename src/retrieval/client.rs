use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{
    ExtractParameters, ExtractedContent, SearchParameters, SearchResponse, SourceRecord,
    ToolCallRequest, ToolCallResponse,
};
use crate::config::{ApiKey, Config};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

const SEARCH_TIME_RANGE: &str = "month";
const EXTRACT_MODE: &str = "clean";

pub const WEB_SEARCH_TOOL: &str = "web_search";
pub const CONTENT_EXTRACTOR_TOOL: &str = "content_extractor";

pub fn default_tools() -> Vec<String> {
    vec![
        WEB_SEARCH_TOOL.to_string(),
        CONTENT_EXTRACTOR_TOOL.to_string(),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval tool \"{0}\" not enabled for this request")]
    ToolDisabled(&'static str),

    #[error("invalid URL: must be HTTP(S)")]
    InvalidScheme,

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("retrieval API rate limit exceeded")]
    RateLimited,

    #[error("retrieval API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Abstraction over the content-retrieval backend: web search and page
/// content extraction. Implemented by `McpClient` for production; mock
/// implementations used in tests.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Runs a web search and returns a summary plus ranked source records.
    async fn search(&self, query: &str, max_results: usize)
    -> Result<SearchResponse, RetrievalError>;

    /// Extracts readable text from one URL.
    async fn extract(&self, url: &str) -> Result<ExtractedContent, RetrievalError>;
}

/// Client for an MCP-style tool server exposing `web_search` and
/// `content_extractor` behind a single `/tools/call` endpoint.
#[derive(Clone)]
pub struct McpClient {
    http: Client,
    api_key: ApiKey,
    base_url: String,
    tools: Vec<String>,
}

impl McpClient {
    pub fn new(http: Client, config: &Config, tools: &[String]) -> Self {
        Self {
            http,
            api_key: config.retrieval_api_key.clone(),
            base_url: config.retrieval_base_url.clone(),
            tools: tools.to_vec(),
        }
    }

    fn require_tool(&self, name: &'static str) -> Result<(), RetrievalError> {
        if self.tools.iter().any(|t| t == name) {
            Ok(())
        } else {
            Err(RetrievalError::ToolDisabled(name))
        }
    }

    async fn call_tool<P: Serialize + Sync>(
        &self,
        request: &ToolCallRequest<P>,
    ) -> Result<ToolCallResponse, RetrievalError> {
        let url = format!("{}/tools/call", self.base_url);

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
            warn!(tool = request.tool, "retrieval API rate limited");
            return Err(RetrievalError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet = text.get(..200).unwrap_or(&text);
            warn!(tool = request.tool, status = %status, "retrieval API error");
            return Err(RetrievalError::Api {
                code: status.as_u16(),
                message: format!("HTTP {status}: {snippet}"),
            });
        }

        let body: ToolCallResponse = response.json().await?;
        debug!(tool = request.tool, "tool call succeeded");
        Ok(body)
    }

    async fn call_tool_with_retry<P: Serialize + Sync>(
        &self,
        request: &ToolCallRequest<P>,
    ) -> Result<ToolCallResponse, RetrievalError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.call_tool(request).await {
                Ok(response) => return Ok(response),
                Err(e) if is_retriable(&e) => {
                    last_err = Some(e);
                    if attempt + 1 < MAX_RETRIES {
                        let delay_ms = jittered_backoff(attempt);
                        debug!(
                            attempt = attempt + 1,
                            delay_ms, "retrying after transient retrieval error"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(RetrievalError::RateLimited))
    }
}

#[async_trait]
impl RetrievalClient for McpClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<SearchResponse, RetrievalError> {
        self.require_tool(WEB_SEARCH_TOOL)?;

        let request = ToolCallRequest {
            tool: WEB_SEARCH_TOOL,
            parameters: SearchParameters {
                query: query.to_string(),
                num_results: max_results,
                time_range: SEARCH_TIME_RANGE,
            },
        };

        let body = self.call_tool_with_retry(&request).await?;
        debug!(query, sources = body.sources.len(), "web search complete");
        Ok(SearchResponse {
            content: body.content,
            sources: body.sources,
        })
    }

    async fn extract(&self, url: &str) -> Result<ExtractedContent, RetrievalError> {
        self.require_tool(CONTENT_EXTRACTOR_TOOL)?;
        validate_url(url)?;

        let request = ToolCallRequest {
            tool: CONTENT_EXTRACTOR_TOOL,
            parameters: ExtractParameters {
                url: url.to_string(),
                extract_mode: EXTRACT_MODE,
            },
        };

        let body = self.call_tool_with_retry(&request).await?;
        debug!(url, bytes = body.content.len(), "content extracted");
        Ok(ExtractedContent {
            text: body.content,
            source: SourceRecord {
                url: url.to_string(),
                metadata: body.metadata,
            },
        })
    }
}

fn validate_url(raw: &str) -> Result<(), RetrievalError> {
    let parsed = url::Url::parse(raw)?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(RetrievalError::InvalidScheme),
    }
}

fn is_retriable(e: &RetrievalError) -> bool {
    matches!(
        e,
        RetrievalError::RateLimited
            | RetrievalError::Api {
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


#[cfg(test)]
mod http_tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> McpClient {
        let config = Config::for_tests("http://unused", &server.uri());
        McpClient::new(Client::new(), &config, &default_tools())
    }

    #[tokio::test]
    async fn search_returns_content_and_sources() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/call"))
            .and(body_partial_json(serde_json::json!({
                "tool": "web_search",
                "parameters": {"query": "rust atomics", "num_results": 5, "time_range": "month"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "search summary",
                "metadata": {},
                "sources": [
                    {"url": "https://a.com", "title": "A"},
                    {"url": "https://b.com", "title": "B"}
                ]
            })))
            .mount(&server)
            .await;

        let response = client_for(&server).search("rust atomics", 5).await.unwrap();

        assert_eq!(response.content, "search summary");
        assert_eq!(response.sources.len(), 2);
        assert_eq!(response.sources[0].url, "https://a.com");
        assert_eq!(response.sources[0].metadata["title"], "A");
    }

    #[tokio::test]
    async fn extract_attributes_content_to_requested_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/call"))
            .and(body_partial_json(serde_json::json!({
                "tool": "content_extractor",
                "parameters": {"url": "https://a.com/page", "extract_mode": "clean"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "page text",
                "metadata": {"title": "A page"}
            })))
            .mount(&server)
            .await;

        let extracted = client_for(&server)
            .extract("https://a.com/page")
            .await
            .unwrap();

        assert_eq!(extracted.text, "page text");
        assert_eq!(extracted.source.url, "https://a.com/page");
        assert_eq!(extracted.source.metadata["title"], "A page");
    }

    #[tokio::test]
    async fn extract_empty_content_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/call"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "",
                "metadata": {}
            })))
            .mount(&server)
            .await;

        let extracted = client_for(&server).extract("https://a.com").await.unwrap();
        assert!(extracted.text.is_empty());
        assert_eq!(extracted.source.url, "https://a.com");
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tools/call"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let result = client_for(&server).search("query", 5).await;
        match result {
            Err(RetrievalError::Api { code: 403, message }) => {
                assert!(message.contains("forbidden"));
            }
            other => panic!("expected Api(403), got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_tool_is_rejected_without_network_call() {
        let server = MockServer::start().await;
        let config = Config::for_tests("http://unused", &server.uri());
        let client = McpClient::new(Client::new(), &config, &[WEB_SEARCH_TOOL.to_string()]);

        let result = client.extract("https://a.com").await;
        assert!(matches!(
            result,
            Err(RetrievalError::ToolDisabled(CONTENT_EXTRACTOR_TOOL))
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
