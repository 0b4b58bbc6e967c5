//! Shared fakes for the integration suites

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use screening_core::evidence::{EvidenceStore, InMemoryObjectStore, ObjectStore, PresignedUrl};
use screening_core::list_cache::{ConsolidatedListCache, ListFetcher};
use screening_core::live_source::{
    classify_suggestions, HtmlSnapshotCapture, LiveQuery, LiveQueryResult, LiveSource,
};
use screening_core::risk::TemplateSummarizer;
use screening_core::{
    Components, Error, ManualClock, MatchSet, RegimeMatch, Result, SearchOrchestrator, SourceId,
    SourceMatch, Timeouts,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const SAMPLE_LIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CONSOLIDATED_LIST dateGenerated="2024-04-30T00:00:00Z">
  <INDIVIDUALS>
    <INDIVIDUAL>
      <DATAID>6908001</DATAID>
      <FIRST_NAME>IVAN</FIRST_NAME>
      <SECOND_NAME>PETROVICH</SECOND_NAME>
      <THIRD_NAME>SIDOROV</THIRD_NAME>
      <UN_LIST_TYPE>DPRK</UN_LIST_TYPE>
      <REFERENCE_NUMBER>KPi.101</REFERENCE_NUMBER>
      <LISTED_ON>2017-06-02</LISTED_ON>
      <COMMENTS1>Bank representative.</COMMENTS1>
    </INDIVIDUAL>
    <INDIVIDUAL>
      <DATAID>6908002</DATAID>
      <FIRST_NAME>HASSAN</FIRST_NAME>
      <SECOND_NAME>AL-TIKRITI</SECOND_NAME>
      <UN_LIST_TYPE>Iraq</UN_LIST_TYPE>
      <REFERENCE_NUMBER>IQi.020</REFERENCE_NUMBER>
      <LISTED_ON>2003-06-27</LISTED_ON>
    </INDIVIDUAL>
  </INDIVIDUALS>
  <ENTITIES>
    <ENTITY>
      <DATAID>110001</DATAID>
      <FIRST_NAME>OCEAN MARITIME MANAGEMENT COMPANY, LIMITED</FIRST_NAME>
      <UN_LIST_TYPE>DPRK</UN_LIST_TYPE>
      <REFERENCE_NUMBER>KPe.029</REFERENCE_NUMBER>
      <LISTED_ON>2014-07-28</LISTED_ON>
    </ENTITY>
  </ENTITIES>
</CONSOLIDATED_LIST>"#;

pub fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ))
}

/// List download that counts calls and can be switched to failing
pub struct CountingFetcher {
    body: Bytes,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn new(body: &str) -> Arc<Self> {
        Self::with_delay(body, Duration::ZERO)
    }

    pub fn with_delay(body: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            body: Bytes::from(body.to_string()),
            delay,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        let fetcher = Self::new(SAMPLE_LIST);
        fetcher.set_failing(true);
        fetcher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ListFetcher for CountingFetcher {
    async fn fetch(&self) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::SourceUnavailable {
                source_id: SourceId::Un,
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.body.clone())
    }

    fn source_url(&self) -> &str {
        "test://consolidated.xml"
    }
}

/// Live source answering every query with the same suggestions
#[derive(Default)]
pub struct FakeLiveSource {
    pub suggestions: Vec<String>,
    pub regimes: Vec<RegimeMatch>,
    pub failure: Option<Error>,
    pub delay: Option<Duration>,
    pub queries: Mutex<Vec<LiveQuery>>,
}

impl FakeLiveSource {
    pub fn with_suggestions(suggestions: &[&str]) -> Self {
        Self {
            suggestions: suggestions.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(Error::SourceUnavailable {
                source_id: SourceId::Eu,
                reason: reason.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn regime(acronym: &str, measures: &[&str]) -> RegimeMatch {
        RegimeMatch {
            id: Some("1".to_string()),
            acronym: Some(acronym.to_string()),
            description: None,
            country: None,
            measures: measures.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[async_trait]
impl LiveSource for FakeLiveSource {
    async fn query(&self, query: &LiveQuery) -> Result<LiveQueryResult> {
        self.queries.lock().push(query.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let (definite, candidates) =
            classify_suggestions(&query.name.key, self.suggestions.clone(), query.exact);
        let mut matches: Vec<SourceMatch> = definite
            .into_iter()
            .map(|name| SourceMatch::PersonMatch { name })
            .collect();
        if !matches.is_empty() {
            matches.extend(self.regimes.iter().cloned().map(SourceMatch::Regime));
        }

        Ok(LiveQueryResult {
            matches: MatchSet::new(SourceId::Eu, matches),
            candidates,
            raw: serde_json::json!({"data": self.suggestions}),
            warnings: Vec::new(),
        })
    }

    fn deep_link(&self, query: &str) -> String {
        format!("https://map.test/#/main?search={}", query)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// In-memory store whose writes fail for keys ending in one of `failing_suffixes`
pub struct FlakyStore {
    pub inner: InMemoryObjectStore,
    failing_suffixes: Vec<String>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FlakyStore {
    pub fn new(failing_suffixes: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryObjectStore::new("flaky", start_clock()),
            failing_suffixes: failing_suffixes.iter().map(|s| s.to_string()).collect(),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    pub fn attempts_for_suffix(&self, suffix: &str) -> usize {
        self.attempts
            .lock()
            .iter()
            .filter(|(k, _)| k.ends_with(suffix))
            .map(|(_, n)| *n)
            .sum()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        *self.attempts.lock().entry(key.to_string()).or_default() += 1;
        if self.failing_suffixes.iter().any(|s| key.ends_with(s.as_str())) {
            return Err(Error::Storage(format!("{} rejected", key)));
        }
        self.inner.put(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl> {
        self.inner.presign_get(key, ttl_seconds)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// In-memory store that holds every evidence-folder write for `delay`
pub struct SlowStore {
    pub inner: InMemoryObjectStore,
    delay: Duration,
    /// Signalled on the first evidence-folder write
    pub folder_write_started: Notify,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryObjectStore::new("slow", start_clock()),
            delay,
            folder_write_started: Notify::new(),
        })
    }
}

#[async_trait]
impl ObjectStore for SlowStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        if key.starts_with("audit_logs/") {
            self.folder_write_started.notify_one();
            tokio::time::sleep(self.delay).await;
        }
        self.inner.put(key, body, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl> {
        self.inner.presign_get(key, ttl_seconds)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

pub fn test_timeouts() -> Timeouts {
    Timeouts {
        live_query: Duration::from_secs(2),
        list_lookup: Duration::from_secs(10),
        capture: Duration::from_secs(2),
        summary: Duration::from_secs(2),
    }
}

/// Orchestrator over fakes with the template summarizer and HTML capture
pub fn orchestrator(
    live: Arc<dyn LiveSource>,
    fetcher: Arc<CountingFetcher>,
    store: Arc<dyn ObjectStore>,
    clock: Arc<ManualClock>,
    timeouts: Timeouts,
) -> SearchOrchestrator {
    let list_cache = Arc::new(
        ConsolidatedListCache::new(fetcher, clock.clone(), chrono::Duration::hours(24), 5)
            .with_backing_store(store.clone()),
    );

    SearchOrchestrator::new(
        Components {
            list_cache,
            live_source: live,
            capture: Arc::new(HtmlSnapshotCapture),
            summarizer: Arc::new(TemplateSummarizer),
            evidence: EvidenceStore::new(store, Duration::from_millis(5), 3600),
            clock,
        },
        timeouts,
    )
}
