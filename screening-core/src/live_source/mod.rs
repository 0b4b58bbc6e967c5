//! Live sanctions source queried per search

pub mod capture;
pub mod eu_map;

pub use capture::{
    capture_from_config, CaptureContext, EvidenceCapture, HtmlSnapshotCapture,
    RenderServiceCapture,
};
pub use eu_map::EuSanctionsMapConnector;

use crate::error::Result;
use crate::normalizer::{match_key, NormalizedName};
use crate::types::{Candidate, MatchSet, Warning};
use async_trait::async_trait;
use std::collections::HashSet;

/// One live-source query
#[derive(Debug, Clone)]
pub struct LiveQuery {
    pub name: NormalizedName,
    /// Continuation scope: only suggestions equal to the name count as matches
    pub exact: bool,
}

#[derive(Debug, Clone)]
pub struct LiveQueryResult {
    pub matches: MatchSet,
    /// Suggestions that are not definite matches
    pub candidates: Vec<Candidate>,
    /// Raw responses kept for the evidence bundle
    pub raw: serde_json::Value,
    /// Partial failures that did not void the matches
    pub warnings: Vec<Warning>,
}

#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn query(&self, query: &LiveQuery) -> Result<LiveQueryResult>;

    /// Public page showing the search, used for evidence capture
    fn deep_link(&self, query: &str) -> String;

    async fn health_check(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Split name suggestions into definite matches and candidates.
///
/// A suggestion is definite when its key contains, or is contained in, the query key. In exact
/// scope the keys must be equal. Candidates are de-duplicated by key and keep source order.
pub fn classify_suggestions(
    query_key: &str,
    suggestions: Vec<String>,
    exact: bool,
) -> (Vec<String>, Vec<Candidate>) {
    let mut definite = Vec::new();
    let mut candidates = Vec::new();
    let mut seen = HashSet::new();

    for suggestion in suggestions {
        let key = match_key(&suggestion);
        if key.is_empty() || !seen.insert(key.clone()) {
            continue;
        }

        let is_definite = if exact {
            key == query_key
        } else {
            key.contains(query_key) || query_key.contains(key.as_str())
        };

        if is_definite {
            definite.push(suggestion);
        } else {
            candidates.push(Candidate { name: suggestion });
        }
    }

    (definite, candidates)
}
