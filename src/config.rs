use std::env;

const DEFAULT_MODEL: &str = "gpt-4-turbo";
const DEFAULT_INFERENCE_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_RETRIEVAL_BASE_URL: &str = "https://api.mcp.example.com";
const DEFAULT_TOP_K_SOURCES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY not set")]
    InferenceKeyNotSet,

    #[error("MCP_API_KEY not set")]
    RetrievalKeyNotSet,

    #[error("invalid {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// API credential whose Debug output never leaks the secret.
#[derive(Clone)]
pub struct ApiKey(pub(crate) String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model: String,
    pub inference_api_key: ApiKey,
    pub inference_base_url: String,
    pub retrieval_api_key: ApiKey,
    pub retrieval_base_url: String,
    /// Top-K cutoff: how many sources of each search response are deep-fetched.
    pub top_k_sources: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let inference_api_key =
            required_key("OPENAI_API_KEY").ok_or(ConfigError::InferenceKeyNotSet)?;
        let retrieval_api_key =
            required_key("MCP_API_KEY").ok_or(ConfigError::RetrievalKeyNotSet)?;

        let top_k_sources = match trimmed_var("DEEPSEARCH_TOP_K") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|k| *k >= 1)
                .ok_or(ConfigError::InvalidValue {
                    name: "DEEPSEARCH_TOP_K",
                    value: raw,
                })?,
            None => DEFAULT_TOP_K_SOURCES,
        };

        Ok(Self {
            model: trimmed_var("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            inference_api_key,
            inference_base_url: trimmed_var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_INFERENCE_BASE_URL.to_string()),
            retrieval_api_key,
            retrieval_base_url: trimmed_var("MCP_SERVER_URL")
                .unwrap_or_else(|| DEFAULT_RETRIEVAL_BASE_URL.to_string()),
            top_k_sources,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(inference_base_url: &str, retrieval_base_url: &str) -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            inference_api_key: ApiKey("test-key".to_string()),
            inference_base_url: inference_base_url.to_string(),
            retrieval_api_key: ApiKey("test-key".to_string()),
            retrieval_base_url: retrieval_base_url.to_string(),
            top_k_sources: DEFAULT_TOP_K_SOURCES,
        }
    }
}

fn trimmed_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_key(name: &str) -> Option<ApiKey> {
    trimmed_var(name).map(ApiKey)
}
