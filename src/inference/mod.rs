//! Language-inference backend: search-query expansion and content analysis
//! over an OpenAI-compatible chat-completions API.

pub mod client;
pub(crate) mod followups;
pub mod types;

pub use client::{InferenceClient, InferenceError, OpenAiClient};
pub use types::AnalysisResult;
