use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct ToolCallRequest<P> {
    pub tool: &'static str,
    pub parameters: P,
}

#[derive(Debug, Serialize)]
pub struct SearchParameters {
    pub query: String,
    pub num_results: usize,
    pub time_range: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ExtractParameters {
    pub url: String,
    pub extract_mode: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
}

/// A discovered source: its URL plus whatever metadata the retrieval backend
/// attached (title, score, published date, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub url: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl SourceRecord {
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            metadata: Map::new(),
        }
    }
}

#[derive(Debug)]
pub struct SearchResponse {
    pub content: String,
    pub sources: Vec<SourceRecord>,
}

/// Text extracted from one page. Empty text is valid: it represents a page
/// with no extractable content.
#[derive(Debug)]
pub struct ExtractedContent {
    pub text: String,
    pub source: SourceRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_record_captures_arbitrary_metadata() {
        let record: SourceRecord = serde_json::from_str(
            r#"{"url": "https://a.com", "title": "A", "score": 0.9}"#,
        )
        .unwrap();

        assert_eq!(record.url, "https://a.com");
        assert_eq!(record.metadata["title"], "A");
        assert_eq!(record.metadata["score"], 0.9);
    }

    #[test]
    fn source_record_round_trips_metadata() {
        let record: SourceRecord =
            serde_json::from_str(r#"{"url": "https://a.com", "title": "A"}"#).unwrap();
        let rendered = serde_json::to_value(&record).unwrap();
        assert_eq!(rendered["url"], "https://a.com");
        assert_eq!(rendered["title"], "A");
    }

    #[test]
    fn tool_call_response_defaults_missing_fields() {
        let response: ToolCallResponse = serde_json::from_str("{}").unwrap();
        assert!(response.content.is_empty());
        assert!(response.metadata.is_empty());
        assert!(response.sources.is_empty());
    }
}
