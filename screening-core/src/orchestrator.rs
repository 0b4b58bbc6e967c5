//! Search orchestration
//!
//! ```text
//! NORMALIZING -> QUERYING (EU + UN in parallel) -> MERGING -> [DISAMBIGUATION]
//!             -> ANALYZING -> PERSISTING -> DONE
//! ```
//!
//! Invalid input and the loss of both sources end in FAILED. Every other failure is recorded in
//! the envelope and the search continues.

use crate::audit::{AuditLogger, AuditRecord, ScreeningAudit, SourceAudit, AUDIT_LOG_FILE};
use crate::clock::Clock;
use crate::config::ScreeningConfig;
use crate::error::{Error, Result};
use crate::evidence::{folder_key, EvidenceStore, StoredArtifact};
use crate::list_cache::{
    list_report, ConsolidatedListCache, HttpListFetcher, ListLookup, SnapshotInfo,
};
use crate::live_source::{
    capture_from_config, CaptureContext, EuSanctionsMapConnector, EvidenceCapture, LiveQuery,
    LiveQueryResult, LiveSource,
};
use crate::metrics::{SCREENING_REQUESTS_TOTAL, SOURCE_REQUESTS_TOTAL, SOURCE_REQUEST_DURATION};
use crate::normalizer::{normalize, NormalizedName};
use crate::risk::summarizer::describe_status;
use crate::risk::{summarizer_from_config, RiskAnalyzer, Summarizer};
use crate::types::{
    Candidate, DisambiguationEnvelope, EvidenceArtifact, EvidenceKind, ResultEnvelope,
    RiskAssessment, ScreeningOutcome, SearchRequest, SearchType, SelectionRequest, SourceId,
    SourceReport, SourceStatus, Warning,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Extra time the list lookup gets on top of the download timeout (parsing, storage copy)
const LIST_PROCESSING_MARGIN_SECONDS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Normalizing,
    Querying,
    Merging,
    Disambiguation,
    Analyzing,
    Persisting,
    Done,
    Failed,
}

/// Per-operation time budgets
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub live_query: Duration,
    pub list_lookup: Duration,
    pub capture: Duration,
    pub summary: Duration,
}

impl Timeouts {
    pub fn from_config(config: &ScreeningConfig) -> Self {
        Self {
            live_query: Duration::from_secs(config.live_source.timeout_secs),
            list_lookup: Duration::from_secs(
                config.list_source.fetch_timeout_secs + LIST_PROCESSING_MARGIN_SECONDS,
            ),
            capture: Duration::from_secs(config.capture.timeout_secs),
            summary: Duration::from_secs(config.summarizer.timeout_secs),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&ScreeningConfig::default())
    }
}

/// Capabilities the orchestrator is assembled from
pub struct Components {
    pub list_cache: Arc<ConsolidatedListCache>,
    pub live_source: Arc<dyn LiveSource>,
    pub capture: Arc<dyn EvidenceCapture>,
    pub summarizer: Arc<dyn Summarizer>,
    pub evidence: EvidenceStore,
    pub clock: Arc<dyn Clock>,
}

/// Dependency health
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub list_cache_ready: bool,
    pub list_fetched_at: Option<DateTime<Utc>>,
    pub storage_reachable: bool,
    pub live_source_reachable: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.list_cache_ready && self.storage_reachable && self.live_source_reachable
    }
}

/// Both sources' answers for one query
struct Gathered {
    eu: SourceReport,
    un: SourceReport,
    candidates: Vec<Candidate>,
    live_raw: serde_json::Value,
    list_snapshot: Option<SnapshotInfo>,
    list_stale: bool,
    warnings: Vec<Warning>,
}

pub struct SearchOrchestrator {
    list_cache: Arc<ConsolidatedListCache>,
    live_source: Arc<dyn LiveSource>,
    analyzer: RiskAnalyzer,
    persister: Arc<Persister>,
    clock: Arc<dyn Clock>,
    timeouts: Timeouts,
}

impl SearchOrchestrator {
    pub fn new(components: Components, timeouts: Timeouts) -> Self {
        let Components {
            list_cache,
            live_source,
            capture,
            summarizer,
            evidence,
            clock,
        } = components;

        Self {
            list_cache,
            live_source,
            analyzer: RiskAnalyzer::new(summarizer, timeouts.summary),
            persister: Arc::new(Persister {
                audit: AuditLogger::new(evidence.clone()),
                evidence,
                capture,
                capture_timeout: timeouts.capture,
            }),
            clock,
            timeouts,
        }
    }

    /// Wire the production capabilities from configuration
    pub fn from_config(config: &ScreeningConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let evidence = EvidenceStore::from_config(config, clock.clone())?;

        let fetcher = Arc::new(HttpListFetcher::new(
            config.list_source.url.clone(),
            config.list_source.fetch_timeout_secs,
        )?);
        let list_cache = Arc::new(
            ConsolidatedListCache::new(
                fetcher,
                clock.clone(),
                chrono::Duration::hours(config.list_source.max_age_hours),
                config.list_source.match_cap,
            )
            .with_backing_store(evidence.object_store()),
        );

        let components = Components {
            list_cache,
            live_source: Arc::new(EuSanctionsMapConnector::new(&config.live_source)?),
            capture: capture_from_config(&config.capture)?,
            summarizer: summarizer_from_config(&config.summarizer)?,
            evidence,
            clock,
        };

        Ok(Self::new(components, Timeouts::from_config(config)))
    }

    pub fn list_cache(&self) -> &Arc<ConsolidatedListCache> {
        &self.list_cache
    }

    /// Screen a name. Person searches with several near-miss candidates and no definite match
    /// return a disambiguation envelope instead of a result.
    pub async fn search(&self, request: SearchRequest) -> Result<ScreeningOutcome> {
        let name = self.normalize(&request.name, request.search_type)?;
        let gathered = self.gather(&name, false).await?;

        // Suggestions carry no type, so every near miss counts as a person candidate
        if request.search_type == SearchType::Person
            && !gathered.eu.found
            && !gathered.un.found
            && gathered.candidates.len() > 1
        {
            self.transition(&name, SearchState::Disambiguation);
            SCREENING_REQUESTS_TOTAL
                .with_label_values(&[name.search_type.as_str(), "disambiguation"])
                .inc();
            info!(
                "Screening '{}' needs disambiguation between {} candidates",
                name.display,
                gathered.candidates.len()
            );

            return Ok(ScreeningOutcome::Disambiguation(DisambiguationEnvelope {
                message: format!(
                    "{} listed names resemble '{}'. Select one to continue.",
                    gathered.candidates.len(),
                    name.display
                ),
                query: name.display.clone(),
                search_type: name.search_type,
                candidates: gathered.candidates,
                eu: gathered.eu,
                un: gathered.un,
            }));
        }

        let envelope = self.finish(&name, None, gathered).await;
        Ok(ScreeningOutcome::Final(envelope))
    }

    /// Continue a disambiguated search scoped to exactly one candidate
    pub async fn select(&self, request: SelectionRequest) -> Result<ResultEnvelope> {
        let name = self.normalize(&request.selected_candidate_name, request.search_type)?;
        let gathered = self.gather(&name, true).await?;
        Ok(self
            .finish(&name, Some(name.display.clone()), gathered)
            .await)
    }

    pub async fn health(&self) -> HealthReport {
        let (storage, live) = tokio::join!(
            self.persister.evidence.health_check(),
            tokio::time::timeout(self.timeouts.live_query, self.live_source.health_check()),
        );

        if let Err(e) = &storage {
            warn!("Storage health check failed: {}", e);
        }
        let live_source_reachable = matches!(live, Ok(Ok(())));
        if !live_source_reachable {
            warn!("{} health check failed", self.live_source.name());
        }

        HealthReport {
            list_cache_ready: self.list_cache.is_ready().await,
            list_fetched_at: self.list_cache.snapshot_info().await.map(|s| s.fetched_at),
            storage_reachable: storage.is_ok(),
            live_source_reachable,
        }
    }

    fn transition(&self, name: &NormalizedName, state: SearchState) {
        debug!("Screening '{}' -> {:?}", name.key, state);
    }

    fn normalize(&self, raw: &str, search_type: SearchType) -> Result<NormalizedName> {
        debug!("Screening request -> {:?}", SearchState::Normalizing);
        normalize(raw, search_type).map_err(|e| {
            debug!("Screening request -> {:?}: {}", SearchState::Failed, e);
            SCREENING_REQUESTS_TOTAL
                .with_label_values(&[search_type.as_str(), "invalid_input"])
                .inc();
            e
        })
    }

    async fn gather(&self, name: &NormalizedName, exact: bool) -> Result<Gathered> {
        self.transition(name, SearchState::Querying);

        let live_query = LiveQuery {
            name: name.clone(),
            exact,
        };
        let eu = async {
            let started = Instant::now();
            let result =
                tokio::time::timeout(self.timeouts.live_query, self.live_source.query(&live_query))
                    .await;
            (result, started.elapsed())
        };
        let un = async {
            let started = Instant::now();
            let result =
                tokio::time::timeout(self.timeouts.list_lookup, self.list_cache.lookup(name)).await;
            (result, started.elapsed())
        };
        let ((eu_result, eu_elapsed), (un_result, un_elapsed)) = tokio::join!(eu, un);

        self.transition(name, SearchState::Merging);
        let mut warnings = Vec::new();

        let eu_outcome = flatten_timeout(eu_result, SourceId::Eu, self.timeouts.live_query);
        let (eu, candidates, live_raw) = match eu_outcome {
            Ok(LiveQueryResult {
                matches,
                candidates,
                raw,
                warnings: live_warnings,
            }) => {
                warnings.extend(live_warnings);
                (
                    SourceReport::from_match_set(matches, SourceStatus::Ok, millis(eu_elapsed)),
                    candidates,
                    raw,
                )
            }
            Err(e) => {
                let status = status_from_error(&e);
                warnings.push(Warning::SourceUnavailable {
                    source: SourceId::Eu,
                    reason: e.to_string(),
                });
                (
                    SourceReport::unavailable(SourceId::Eu, status, millis(eu_elapsed)),
                    Vec::new(),
                    serde_json::Value::Null,
                )
            }
        };

        let un_outcome = flatten_timeout(un_result, SourceId::Un, self.timeouts.list_lookup);
        let (un, list_snapshot, list_stale) = match un_outcome {
            Ok(ListLookup {
                matches,
                snapshot,
                stale,
            }) => {
                let status = if stale {
                    warnings.push(Warning::ListCacheStale {
                        fetched_at: snapshot.fetched_at,
                    });
                    SourceStatus::Stale {
                        fetched_at: snapshot.fetched_at,
                    }
                } else {
                    SourceStatus::Ok
                };
                (
                    SourceReport::from_match_set(matches, status, millis(un_elapsed)),
                    Some(snapshot),
                    stale,
                )
            }
            Err(e) => {
                let status = status_from_error(&e);
                warnings.push(Warning::SourceUnavailable {
                    source: SourceId::Un,
                    reason: e.to_string(),
                });
                (
                    SourceReport::unavailable(SourceId::Un, status, millis(un_elapsed)),
                    None,
                    false,
                )
            }
        };

        record_source_metrics(&eu, eu_elapsed);
        record_source_metrics(&un, un_elapsed);

        if !eu.is_available() && !un.is_available() {
            self.transition(name, SearchState::Failed);
            SCREENING_REQUESTS_TOTAL
                .with_label_values(&[name.search_type.as_str(), "both_unavailable"])
                .inc();
            let err = Error::BothSourcesUnavailable {
                eu: describe_status(&eu.status),
                un: describe_status(&un.status),
            };
            error!("Screening '{}' failed: {}", name.display, err);
            return Err(err);
        }

        Ok(Gathered {
            eu,
            un,
            candidates,
            live_raw,
            list_snapshot,
            list_stale,
            warnings,
        })
    }

    async fn finish(
        &self,
        name: &NormalizedName,
        selected_candidate: Option<String>,
        gathered: Gathered,
    ) -> ResultEnvelope {
        let Gathered {
            eu,
            un,
            candidates,
            live_raw,
            list_snapshot,
            list_stale,
            mut warnings,
        } = gathered;

        self.transition(name, SearchState::Analyzing);
        let (risk, risk_warning) = self.analyzer.assess(name, &eu, &un, &candidates).await;
        warnings.extend(risk_warning);

        self.transition(name, SearchState::Persisting);
        let searched_at = self.clock.now();
        let folder = folder_key(&name.path_segment, searched_at);

        let raw_data = json!({
            "query": name.display,
            "normalized_query": name.key,
            "search_type": name.search_type,
            "selected_candidate": selected_candidate,
            "searched_at": searched_at,
            "eu": {"report": eu, "raw": live_raw},
            "un": {"report": un, "snapshot": list_snapshot, "stale": list_stale},
            "candidates": candidates,
            "risk": risk,
            "warnings": warnings,
        });

        let capture = eu.found.then(|| CaptureContext {
            query: name.display.clone(),
            search_type: name.search_type,
            deep_link: self.live_source.deep_link(&name.display),
            matches: eu.matches.clone(),
            captured_at: searched_at,
        });

        let un_report = list_report(
            &name.display,
            name.search_type,
            &un,
            list_snapshot.as_ref(),
            searched_at,
        );

        let audit = ScreeningAudit {
            query: name.display.clone(),
            normalized_query: name.key.clone(),
            search_type: name.search_type,
            selected_candidate: selected_candidate.clone(),
            sources: [&eu, &un]
                .iter()
                .map(|r| SourceAudit {
                    source: r.source,
                    found: r.found,
                    total_matches: r.total_matches,
                    status: r.status.clone(),
                    latency_ms: r.latency_ms,
                })
                .collect(),
            list_snapshot,
            list_stale,
            tier: risk.tier,
            factors: risk.factors.clone(),
            narrative_source: risk.narrative_source,
            artifacts: Vec::new(),
            failed_artifacts: Vec::new(),
            warnings: warnings.clone(),
        };

        let job = PersistJob {
            folder: folder.clone(),
            searched_at,
            capture,
            artifacts: vec![
                un_report,
                raw_data_artifact(&raw_data),
                summary_artifact(&name.display, &risk),
            ],
            audit,
        };

        // Spawned so a started write completes even if the caller goes away
        let persister = self.persister.clone();
        let persisted = match tokio::spawn(async move { persister.persist(job).await }).await {
            Ok(persisted) => persisted,
            Err(e) => {
                error!("Persistence task for {} aborted: {}", folder, e);
                Persisted {
                    evidence_urls: BTreeMap::new(),
                    warnings: vec![Warning::PersistenceDegraded {
                        failed: vec![folder.clone()],
                        reason: e.to_string(),
                    }],
                }
            }
        };
        warnings.extend(persisted.warnings);

        self.transition(name, SearchState::Done);
        SCREENING_REQUESTS_TOTAL
            .with_label_values(&[name.search_type.as_str(), "final"])
            .inc();
        info!(
            "Screening '{}' ({}) done: EU found={}, UN found={}, tier={}, {} warning(s)",
            name.display,
            name.search_type,
            eu.found,
            un.found,
            risk.tier,
            warnings.len()
        );

        ResultEnvelope {
            query: name.display.clone(),
            normalized_query: name.key.clone(),
            search_type: name.search_type,
            selected_candidate,
            eu,
            un,
            risk,
            evidence_urls: persisted.evidence_urls,
            evidence_ttl_seconds: self.persister.evidence.presign_ttl_secs(),
            audit_folder: folder,
            warnings,
            searched_at,
        }
    }
}

/// Work handed to the persistence task
struct PersistJob {
    folder: String,
    searched_at: DateTime<Utc>,
    capture: Option<CaptureContext>,
    artifacts: Vec<EvidenceArtifact>,
    audit: ScreeningAudit,
}

struct Persisted {
    evidence_urls: BTreeMap<EvidenceKind, String>,
    warnings: Vec<Warning>,
}

/// Writes the evidence bundle and the audit record
struct Persister {
    evidence: EvidenceStore,
    audit: AuditLogger,
    capture: Arc<dyn EvidenceCapture>,
    capture_timeout: Duration,
}

impl Persister {
    async fn persist(&self, job: PersistJob) -> Persisted {
        let PersistJob {
            folder,
            searched_at,
            capture,
            mut artifacts,
            mut audit,
        } = job;
        let mut warnings = Vec::new();

        if let Some(context) = capture {
            match tokio::time::timeout(self.capture_timeout, self.capture.capture(&context)).await
            {
                Ok(Ok(artifact)) => artifacts.insert(0, artifact),
                Ok(Err(e)) => {
                    warn!("Evidence capture via {} failed: {}", self.capture.name(), e);
                    warnings.push(Warning::EvidenceCaptureFailed {
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        "Evidence capture via {} timed out after {:?}",
                        self.capture.name(),
                        self.capture_timeout
                    );
                    warnings.push(Warning::EvidenceCaptureFailed {
                        reason: format!("timed out after {:?}", self.capture_timeout),
                    });
                }
            }
        }

        let mut stored: Vec<StoredArtifact> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut last_error = String::new();

        for artifact in &artifacts {
            match self.evidence.put(&folder, artifact).await {
                Ok(s) => stored.push(s),
                Err(e) => {
                    error!("Evidence {} not stored: {}", artifact.file_name, e);
                    failed.push(artifact.file_name.clone());
                    last_error = e.to_string();
                }
            }
        }

        audit.artifacts = stored.clone();
        audit.failed_artifacts = failed.clone();
        audit.warnings.extend(warnings.iter().cloned());

        let appended = match AuditRecord::screening(&folder, searched_at, &audit) {
            Ok(record) => self.audit.append(&folder, record).await,
            Err(e) => Err(e),
        };
        match appended {
            Ok(s) => stored.push(s),
            Err(e) => {
                failed.push(AUDIT_LOG_FILE.to_string());
                last_error = e.to_string();
            }
        }

        let mut evidence_urls = BTreeMap::new();
        for artifact in &stored {
            match self.evidence.presign(&artifact.key) {
                Ok(presigned) => {
                    evidence_urls.insert(artifact.kind, presigned.url);
                }
                Err(e) => {
                    error!("Could not presign {}: {}", artifact.key, e);
                    failed.push(artifact.key.clone());
                    last_error = e.to_string();
                }
            }
        }

        if !failed.is_empty() {
            warnings.push(Warning::PersistenceDegraded {
                failed,
                reason: last_error,
            });
        }

        Persisted {
            evidence_urls,
            warnings,
        }
    }
}

fn raw_data_artifact(raw_data: &serde_json::Value) -> EvidenceArtifact {
    let body = serde_json::to_vec_pretty(raw_data)
        .unwrap_or_else(|_| raw_data.to_string().into_bytes());
    EvidenceArtifact::new(
        EvidenceKind::RawXmlOrJson,
        "raw_data.json",
        "application/json",
        body,
    )
}

fn summary_artifact(query: &str, risk: &RiskAssessment) -> EvidenceArtifact {
    let mut text = format!(
        "Sanctions screening summary\nQuery: {}\nRisk tier: {}\n\n{}\n\nRules applied:\n",
        query, risk.tier, risk.narrative
    );
    for factor in &risk.factors {
        text.push_str("- ");
        text.push_str(factor);
        text.push('\n');
    }
    EvidenceArtifact::new(
        EvidenceKind::SummaryText,
        "summary.txt",
        "text/plain; charset=utf-8",
        text,
    )
}

fn flatten_timeout<T>(
    result: std::result::Result<Result<T>, tokio::time::error::Elapsed>,
    source: SourceId,
    budget: Duration,
) -> Result<T> {
    match result {
        Ok(inner) => inner,
        Err(_) => Err(Error::SourceTimeout {
            source_id: source,
            seconds: budget.as_secs(),
        }),
    }
}

fn status_from_error(err: &Error) -> SourceStatus {
    match err {
        Error::SourceTimeout { seconds, .. } => SourceStatus::Timeout { seconds: *seconds },
        Error::SourceUnavailable { reason, .. } => SourceStatus::Unavailable {
            reason: reason.clone(),
        },
        other => SourceStatus::Unavailable {
            reason: other.to_string(),
        },
    }
}

fn record_source_metrics(report: &SourceReport, elapsed: Duration) {
    let source = match report.source {
        SourceId::Eu => "eu",
        SourceId::Un => "un",
    };
    let status = match report.status {
        SourceStatus::Ok => "ok",
        SourceStatus::Stale { .. } => "stale",
        SourceStatus::Timeout { .. } => "timeout",
        SourceStatus::Unavailable { .. } => "unavailable",
    };

    SOURCE_REQUEST_DURATION
        .with_label_values(&[source])
        .observe(elapsed.as_secs_f64());
    SOURCE_REQUESTS_TOTAL
        .with_label_values(&[source, status])
        .inc();
}

fn millis(elapsed: Duration) -> u64 {
    elapsed.as_millis().min(u64::MAX as u128) as u64
}
