//! Thin HTTP surface over the deep-search core: request validation,
//! per-request client construction, and error-to-status mapping.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::inference::OpenAiClient;
use crate::retrieval::{self, McpClient};
use crate::search::{self, SearchError, SearchParams, SearchResult};

const SUPPORTED_LLM_PROVIDER: &str = "openai";

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchRequestBody {
    pub query: String,
    #[serde(default = "default_depth")]
    pub depth: u32,
    #[serde(default = "default_breadth")]
    pub breadth: usize,
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    #[serde(default = "retrieval::default_tools")]
    pub mcp_tools: Vec<String>,
    #[serde(default)]
    pub dedupe: bool,
}

fn default_depth() -> u32 {
    1
}

fn default_breadth() -> usize {
    3
}

fn default_provider() -> String {
    SUPPORTED_LLM_PROVIDER.to_string()
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn search(State(state): State<AppState>, Json(body): Json<SearchRequestBody>) -> Response {
    let query = body.query.clone();
    match run_search(&state, body).await {
        Ok(result) => {
            info!(
                %query,
                sources = result.sources.len(),
                failures = result.failures.len(),
                "search request complete"
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn run_search(
    state: &AppState,
    body: SearchRequestBody,
) -> Result<SearchResult, SearchError> {
    if body.query.trim().is_empty() {
        return Err(SearchError::InvalidRequest(
            "query must not be empty".to_string(),
        ));
    }
    if body.llm_provider != SUPPORTED_LLM_PROVIDER {
        return Err(SearchError::InvalidRequest(format!(
            "unsupported llm_provider \"{}\" (supported: {SUPPORTED_LLM_PROVIDER})",
            body.llm_provider
        )));
    }

    // One client pair per request, built over the shared connection pool and
    // dropped on every exit path.
    let inference = OpenAiClient::new(state.http.clone(), &state.config);
    let retrieval = McpClient::new(state.http.clone(), &state.config, &body.mcp_tools);

    let params = SearchParams {
        breadth: body.breadth,
        top_k_sources: state.config.top_k_sources,
        dedupe: body.dedupe,
    };
    search::run(&inference, &retrieval, &body.query, body.depth, &params).await
}

fn error_response(e: &SearchError) -> Response {
    let status = match e {
        SearchError::InvalidRequest(_) => {
            warn!(error = %e, "rejected search request");
            StatusCode::BAD_REQUEST
        }
        SearchError::Inference(_) | SearchError::Retrieval(_) => {
            error!(error = %e, "search request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorBody {
        detail: e.to_string(),
    }))
        .into_response()
}
