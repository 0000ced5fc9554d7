//! The deep-search core: recursive depth/breadth-bounded orchestration of
//! query expansion, retrieval, and analysis.

pub mod orchestrator;

pub use orchestrator::{run, BranchFailure, FailureStage, SearchError, SearchParams, SearchResult};
