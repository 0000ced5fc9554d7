use std::collections::HashSet;

use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use tracing::{debug, warn};

use crate::inference::{InferenceClient, InferenceError};
use crate::retrieval::{RetrievalClient, RetrievalError, SourceRecord};

const SEARCH_RESULTS_PER_QUERY: usize = 5;
const CONTENT_SEPARATOR: &str = "\n\n";

/// Per-request tuning knobs. Immutable across a traversal; only the depth
/// counter changes between levels.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Fan-out width: max sub-queries per expansion and max follow-ups
    /// recursed into per level.
    pub breadth: usize,
    /// How many sources of each search response are deep-fetched.
    pub top_k_sources: usize,
    /// Deduplicate source URLs and follow-up questions across the traversal.
    /// Off by default: duplicates are part of the baseline contract.
    pub dedupe: bool,
}

/// Aggregate of one recursion level and everything below it.
#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub sources: Vec<SourceRecord>,
    pub follow_ups: Vec<String>,
    pub depth: u32,
    /// Branches that failed without aborting the traversal.
    pub failures: Vec<BranchFailure>,
}

#[derive(Debug, Serialize)]
pub struct BranchFailure {
    pub stage: FailureStage,
    /// The query, URL, or follow-up the failed branch was working on.
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Search,
    Extract,
    Analyze,
    Recurse,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
}

/// Runs a deep search: expands `query` into up to `breadth` sub-queries,
/// searches and extracts content for each, analyzes every extracted page,
/// then recurses into the first `breadth` follow-up questions until `depth`
/// is exhausted. Returns the aggregate of the whole recursion tree.
pub async fn run<I, R>(
    inference: &I,
    retrieval: &R,
    query: &str,
    depth: u32,
    params: &SearchParams,
) -> Result<SearchResult, SearchError>
where
    I: InferenceClient + ?Sized,
    R: RetrievalClient + ?Sized,
{
    if depth < 1 {
        return Err(SearchError::InvalidRequest(
            "depth must be at least 1".to_string(),
        ));
    }
    if params.breadth < 1 {
        return Err(SearchError::InvalidRequest(
            "breadth must be at least 1".to_string(),
        ));
    }
    run_level(inference, retrieval, query.to_string(), depth, params).await
}

/// One level of the traversal. Boxed so the async recursion has a known size.
///
/// Each level owns its accumulators exclusively; children hand their results
/// back by value and the parent folds them in launch order, so concurrent
/// sibling branches never share mutable state.
fn run_level<'a, I, R>(
    inference: &'a I,
    retrieval: &'a R,
    query: String,
    depth: u32,
    params: &'a SearchParams,
) -> BoxFuture<'a, Result<SearchResult, SearchError>>
where
    I: InferenceClient + ?Sized,
    R: RetrievalClient + ?Sized,
{
    Box::pin(async move {
        debug!(%query, depth, "running search level");

        let queries = inference.generate_queries(&query, params.breadth).await?;
        if queries.is_empty() {
            warn!(%query, "query expansion produced nothing; continuing with empty branch");
        }

        let mut acc = Accumulator::new(params.dedupe);

        // Fan out one search per sub-query, join on the whole batch.
        let search_outcomes = join_all(
            queries
                .iter()
                .map(|q| retrieval.search(q, SEARCH_RESULTS_PER_QUERY)),
        )
        .await;

        let mut responses = Vec::new();
        let mut search_errors = Vec::new();
        for (q, outcome) in queries.iter().zip(search_outcomes) {
            match outcome {
                Ok(response) => responses.push(response),
                Err(e) => search_errors.push((q.clone(), e)),
            }
        }
        if responses.is_empty() && !search_errors.is_empty() {
            let (failed_query, e) = search_errors.swap_remove(0);
            warn!(query = %failed_query, error = %e, "every search in the batch failed");
            return Err(e.into());
        }
        for (failed_query, e) in search_errors {
            acc.record_failure(FailureStage::Search, failed_query, &e);
        }

        // Per response, in launch order: keep its sources, then deep-fetch
        // the top-K distinct URLs and analyze each page.
        for response in responses {
            let targets = top_k_urls(&response.sources, params.top_k_sources);
            acc.push_sources(response.sources);

            let extractions = join_all(targets.iter().map(|url| retrieval.extract(url))).await;
            for (target, outcome) in targets.iter().zip(extractions) {
                match outcome {
                    Ok(blob) => {
                        match inference.analyze(&blob.text, &query).await {
                            Ok(analysis) => acc.push_follow_ups(analysis.follow_ups),
                            Err(e) => acc.record_failure(FailureStage::Analyze, target.clone(), &e),
                        }
                        acc.push_content(blob.text);
                    }
                    Err(e) => acc.record_failure(FailureStage::Extract, target.clone(), &e),
                }
            }
        }

        // Recurse into the first `breadth` follow-ups with one less depth.
        if depth > 1 && !acc.follow_ups.is_empty() {
            let selected: Vec<String> = acc
                .follow_ups
                .iter()
                .take(params.breadth)
                .cloned()
                .collect();
            debug!(
                count = selected.len(),
                child_depth = depth - 1,
                "recursing into follow-ups"
            );

            let child_outcomes = join_all(
                selected
                    .iter()
                    .map(|f| run_level(inference, retrieval, f.clone(), depth - 1, params)),
            )
            .await;

            for (follow_up, outcome) in selected.iter().zip(child_outcomes) {
                match outcome {
                    Ok(child) => acc.fold_child(child),
                    Err(e) => acc.record_failure(FailureStage::Recurse, follow_up.clone(), &e),
                }
            }
        }

        // One last summarizing pass over everything gathered at and below
        // this level. Its own follow-ups are discarded.
        let joined = acc.contents.join(CONTENT_SEPARATOR);
        let final_analysis = inference.analyze(&joined, &query).await?;

        debug!(
            sources = acc.sources.len(),
            follow_ups = acc.follow_ups.len(),
            failures = acc.failures.len(),
            "search level complete"
        );

        Ok(SearchResult {
            content: final_analysis.summary,
            sources: acc.sources,
            follow_ups: acc.follow_ups,
            depth,
            failures: acc.failures,
        })
    })
}

/// First `k` distinct, non-empty URLs of a search response.
fn top_k_urls(sources: &[SourceRecord], k: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .take(k)
        .filter(|s| !s.url.is_empty() && seen.insert(s.url.clone()))
        .map(|s| s.url.clone())
        .collect()
}

/// Local accumulation buffers for one recursion level.
struct Accumulator {
    dedupe: bool,
    contents: Vec<String>,
    sources: Vec<SourceRecord>,
    follow_ups: Vec<String>,
    failures: Vec<BranchFailure>,
    seen_urls: HashSet<String>,
    seen_follow_ups: HashSet<String>,
}

impl Accumulator {
    fn new(dedupe: bool) -> Self {
        Self {
            dedupe,
            contents: Vec::new(),
            sources: Vec::new(),
            follow_ups: Vec::new(),
            failures: Vec::new(),
            seen_urls: HashSet::new(),
            seen_follow_ups: HashSet::new(),
        }
    }

    /// Empty strings are skipped so they cannot pad the final join.
    fn push_content(&mut self, text: String) {
        if !text.is_empty() {
            self.contents.push(text);
        }
    }

    fn push_sources(&mut self, new: Vec<SourceRecord>) {
        for source in new {
            if self.dedupe
                && (source.url.is_empty() || !self.seen_urls.insert(source.url.clone()))
            {
                continue;
            }
            self.sources.push(source);
        }
    }

    fn push_follow_ups(&mut self, new: Vec<String>) {
        for follow_up in new {
            if self.dedupe && !self.seen_follow_ups.insert(follow_up.clone()) {
                continue;
            }
            self.follow_ups.push(follow_up);
        }
    }

    fn fold_child(&mut self, child: SearchResult) {
        self.push_content(child.content);
        self.push_sources(child.sources);
        self.push_follow_ups(child.follow_ups);
        self.failures.extend(child.failures);
    }

    fn record_failure(
        &mut self,
        stage: FailureStage,
        subject: String,
        error: &dyn std::fmt::Display,
    ) {
        warn!(stage = ?stage, %subject, error = %error, "branch failed (continuing)");
        self.failures.push(BranchFailure {
            stage,
            subject,
            detail: error.to_string(),
        });
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    fn source(url: &str) -> SourceRecord {
        SourceRecord::bare(url)
    }

    #[test]
    fn top_k_takes_first_k() {
        let sources: Vec<_> = ["https://a.com", "https://b.com", "https://c.com", "https://d.com"]
            .iter()
            .map(|u| source(u))
            .collect();
        assert_eq!(
            top_k_urls(&sources, 3),
            vec!["https://a.com", "https://b.com", "https://c.com"]
        );
    }

    #[test]
    fn top_k_skips_duplicates_within_cutoff() {
        let sources = vec![source("https://a.com"), source("https://a.com"), source("https://b.com")];
        assert_eq!(top_k_urls(&sources, 3), vec!["https://a.com", "https://b.com"]);
    }

    #[test]
    fn top_k_skips_empty_urls() {
        let sources = vec![source(""), source("https://a.com")];
        assert_eq!(top_k_urls(&sources, 2), vec!["https://a.com"]);
    }

    #[test]
    fn accumulator_keeps_duplicates_by_default() {
        let mut acc = Accumulator::new(false);
        acc.push_sources(vec![source("https://a.com"), source("https://a.com")]);
        acc.push_follow_ups(vec!["q".to_string(), "q".to_string()]);
        assert_eq!(acc.sources.len(), 2);
        assert_eq!(acc.follow_ups.len(), 2);
    }

    #[test]
    fn accumulator_dedupes_when_enabled() {
        let mut acc = Accumulator::new(true);
        acc.push_sources(vec![source("https://a.com"), source("https://a.com"), source("https://b.com")]);
        acc.push_follow_ups(vec!["q".to_string(), "q".to_string(), "r".to_string()]);
        assert_eq!(acc.sources.len(), 2);
        assert_eq!(acc.follow_ups, vec!["q", "r"]);
    }

    #[test]
    fn empty_content_never_accumulated() {
        let mut acc = Accumulator::new(false);
        acc.push_content(String::new());
        acc.push_content("real".to_string());
        acc.push_content(String::new());
        assert_eq!(acc.contents.join(CONTENT_SEPARATOR), "real");
    }
}
