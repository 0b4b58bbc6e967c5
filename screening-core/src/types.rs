use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Person,
    Entity,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Person => "person",
            SearchType::Entity => "entity",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound screening request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub name: String,
    #[serde(default)]
    pub search_type: SearchType,
}

/// Second-phase request naming one candidate from a disambiguation envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub selected_candidate_name: String,
    #[serde(default)]
    pub search_type: SearchType,
}

/// Sanctions data source. Declaration order is the merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// EU Sanctions Map (live source)
    Eu,
    /// UN Security Council consolidated list (cached source)
    Un,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Eu => "EU",
            SourceId::Un => "UN",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListEntryKind {
    Individual,
    Entity,
}

/// One record of the consolidated list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListEntry {
    pub data_id: Option<String>,
    pub name: String,
    pub reference_number: Option<String>,
    pub listed_on: Option<String>,
    pub un_list_type: Option<String>,
    pub comments: String,
    pub kind: ListEntryKind,
}

/// Sanctions regime returned by the live source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeMatch {
    pub id: Option<String>,
    pub acronym: Option<String>,
    pub description: Option<String>,
    pub country: Option<String>,
    pub measures: Vec<String>,
}

/// A single source's match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceMatch {
    PersonMatch { name: String },
    Regime(RegimeMatch),
    ListEntry(ListEntry),
}

impl SourceMatch {
    /// Display label used by narratives and evidence documents
    pub fn label(&self) -> String {
        match self {
            SourceMatch::PersonMatch { name } => name.clone(),
            SourceMatch::Regime(regime) => regime
                .acronym
                .clone()
                .or_else(|| regime.description.clone())
                .unwrap_or_else(|| "unnamed regime".to_string()),
            SourceMatch::ListEntry(entry) => entry.name.clone(),
        }
    }
}

/// Ordered matches of one source for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub source: SourceId,
    pub matches: Vec<SourceMatch>,
    /// All matches seen, including the ones cut by a cap
    pub total_matches: usize,
    pub found: bool,
}

impl MatchSet {
    pub fn new(source: SourceId, matches: Vec<SourceMatch>) -> Self {
        let total_matches = matches.len();
        Self {
            source,
            matches,
            total_matches,
            found: total_matches > 0,
        }
    }

    /// Keep the first `cap` matches in source order while counting all of them
    pub fn capped(source: SourceId, mut matches: Vec<SourceMatch>, cap: usize) -> Self {
        let total_matches = matches.len();
        matches.truncate(cap);
        Self {
            source,
            matches,
            total_matches,
            found: total_matches > 0,
        }
    }

    pub fn empty(source: SourceId) -> Self {
        Self::new(source, Vec::new())
    }
}

/// Availability of a source for one search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    Ok,
    /// Served from a list snapshot older than the refresh window
    Stale { fetched_at: DateTime<Utc> },
    Timeout { seconds: u64 },
    Unavailable { reason: String },
}

impl SourceStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, SourceStatus::Ok | SourceStatus::Stale { .. })
    }
}

/// Per-source section of the result envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: SourceId,
    pub found: bool,
    pub matches: Vec<SourceMatch>,
    pub total_matches: usize,
    pub status: SourceStatus,
    pub latency_ms: u64,
}

impl SourceReport {
    pub fn from_match_set(set: MatchSet, status: SourceStatus, latency_ms: u64) -> Self {
        Self {
            source: set.source,
            found: set.found,
            matches: set.matches,
            total_matches: set.total_matches,
            status,
            latency_ms,
        }
    }

    /// An unavailable source reports `found=false` with its failure status, never a clean miss
    pub fn unavailable(source: SourceId, status: SourceStatus, latency_ms: u64) -> Self {
        Self {
            source,
            found: false,
            matches: Vec::new(),
            total_matches: 0,
            status,
            latency_ms,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Screenshot,
    RawXmlOrJson,
    SummaryText,
    AuditLog,
    ListReport,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Screenshot => "screenshot",
            EvidenceKind::RawXmlOrJson => "raw_xml_or_json",
            EvidenceKind::SummaryText => "summary_text",
            EvidenceKind::AuditLog => "audit_log",
            EvidenceKind::ListReport => "list_report",
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact of the evidence bundle, keyed under the search folder by `file_name`
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceArtifact {
    pub kind: EvidenceKind,
    pub file_name: String,
    pub content_type: String,
    pub content: Bytes,
}

impl EvidenceArtifact {
    pub fn new(
        kind: EvidenceKind,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            content_type: content_type.into(),
            content: content.into(),
        }
    }

    pub fn storage_key(&self, folder_key: &str) -> String {
        format!("{}/{}", folder_key.trim_end_matches('/'), self.file_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::Medium => "MEDIUM",
            RiskTier::High => "HIGH",
            RiskTier::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    Summarizer,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub narrative: String,
    /// Rules that produced the tier
    pub factors: Vec<String>,
    pub narrative_source: NarrativeSource,
}

/// Non-fatal degradation surfaced to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    SourceUnavailable { source: SourceId, reason: String },
    /// Source answered but part of its detail is missing
    SourceDegraded { source: SourceId, reason: String },
    ListCacheStale { fetched_at: DateTime<Utc> },
    SummarizationUnavailable { reason: String },
    EvidenceCaptureFailed { reason: String },
    PersistenceDegraded { failed: Vec<String>, reason: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::SourceUnavailable { source, reason } => {
                write!(f, "{} source unavailable: {}", source, reason)
            }
            Warning::SourceDegraded { source, reason } => {
                write!(f, "{} source answered partially: {}", source, reason)
            }
            Warning::ListCacheStale { fetched_at } => {
                write!(
                    f,
                    "UN list served from stale snapshot fetched at {}",
                    fetched_at.to_rfc3339()
                )
            }
            Warning::SummarizationUnavailable { reason } => {
                write!(f, "summarization unavailable: {}", reason)
            }
            Warning::EvidenceCaptureFailed { reason } => {
                write!(f, "evidence capture failed: {}", reason)
            }
            Warning::PersistenceDegraded { failed, reason } => {
                write!(f, "persistence degraded for [{}]: {}", failed.join(", "), reason)
            }
        }
    }
}

/// Final screening result handed to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub query: String,
    pub normalized_query: String,
    pub search_type: SearchType,
    pub selected_candidate: Option<String>,
    pub eu: SourceReport,
    pub un: SourceReport,
    pub risk: RiskAssessment,
    pub evidence_urls: BTreeMap<EvidenceKind, String>,
    pub evidence_ttl_seconds: u64,
    pub audit_folder: String,
    pub warnings: Vec<Warning>,
    pub searched_at: DateTime<Utc>,
}

impl ResultEnvelope {
    pub fn eu_found(&self) -> bool {
        self.eu.found
    }

    pub fn un_found(&self) -> bool {
        self.un.found
    }

    pub fn has_persistence_warning(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::PersistenceDegraded { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
}

/// Intermediate result: the caller must pick one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisambiguationEnvelope {
    pub query: String,
    pub search_type: SearchType,
    pub candidates: Vec<Candidate>,
    pub eu: SourceReport,
    pub un: SourceReport,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScreeningOutcome {
    Final(ResultEnvelope),
    Disambiguation(DisambiguationEnvelope),
}

impl ScreeningOutcome {
    pub fn into_final(self) -> Option<ResultEnvelope> {
        match self {
            ScreeningOutcome::Final(envelope) => Some(envelope),
            ScreeningOutcome::Disambiguation(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capped_match_set_counts_everything() {
        let matches = (0..8)
            .map(|i| SourceMatch::PersonMatch {
                name: format!("name {}", i),
            })
            .collect();
        let set = MatchSet::capped(SourceId::Un, matches, 5);

        assert_eq!(set.matches.len(), 5);
        assert_eq!(set.total_matches, 8);
        assert!(set.found);
        assert_eq!(set.matches[0].label(), "name 0");
    }

    #[test]
    fn test_empty_match_set_not_found() {
        let set = MatchSet::empty(SourceId::Eu);
        assert!(!set.found);
        assert_eq!(set.total_matches, 0);
    }

    #[test]
    fn test_source_order_is_eu_then_un() {
        assert!(SourceId::Eu < SourceId::Un);
    }

    #[test]
    fn test_outcome_serialization_tags() {
        let report = SourceReport::unavailable(
            SourceId::Eu,
            SourceStatus::Timeout { seconds: 10 },
            10_000,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["state"], "timeout");
        assert_eq!(json["found"], false);

        let regime = SourceMatch::Regime(RegimeMatch {
            id: Some("42".to_string()),
            acronym: Some("RUS".to_string()),
            description: None,
            country: Some("Russia".to_string()),
            measures: vec!["Asset freeze".to_string()],
        });
        let json = serde_json::to_value(&regime).unwrap();
        assert_eq!(json["type"], "regime");
        assert_eq!(json["acronym"], "RUS");
    }

    #[test]
    fn test_risk_tier_ordering() {
        assert!(RiskTier::Critical > RiskTier::High);
        assert!(RiskTier::High > RiskTier::Medium);
        assert!(RiskTier::Medium > RiskTier::Low);
        assert_eq!(serde_json::to_string(&RiskTier::High).unwrap(), "\"HIGH\"");
    }
}
