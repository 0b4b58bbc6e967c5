//! Consolidated-list cache
//!
//! A single in-memory snapshot of the UN consolidated list, refreshed when it is older than the
//! configured window. Concurrent callers that find the snapshot stale collapse onto one refresh.
//! A refresh failure serves the previous snapshot flagged as stale; with no snapshot at all the
//! source is unavailable.
//!
//! Every successful download is also written to object storage (`cache/consolidated.xml`) so a
//! restarted process can warm up without hitting the list source.

pub mod fetcher;
pub mod parser;
pub mod report;

pub use fetcher::{HttpListFetcher, ListFetcher};
pub use parser::{parse_consolidated, ParsedRecord};
pub use report::{list_report, LIST_REPORT_FILE_NAME};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::evidence::ObjectStore;
use crate::metrics::LIST_CACHE_REFRESH_TOTAL;
use crate::normalizer::{match_key, NormalizedName};
use crate::types::{ListEntryKind, MatchSet, SearchType, SourceId, SourceMatch};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Durable copy of the last downloaded list
pub const LIST_SNAPSHOT_KEY: &str = "cache/consolidated.xml";

/// Metadata of the durable copy
pub const LIST_SNAPSHOT_META_KEY: &str = "cache/consolidated.meta.json";

/// After a failed refresh, lookups within this window reuse the failure instead of refetching
const REFRESH_FAILURE_COOLDOWN_SECONDS: i64 = 60;

/// Reference to the snapshot a lookup was served from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub fetched_at: DateTime<Utc>,
    pub sha256: String,
    pub key: String,
    pub entries: usize,
}

/// Result of one cache lookup
#[derive(Debug, Clone)]
pub struct ListLookup {
    pub matches: MatchSet,
    pub snapshot: SnapshotInfo,
    /// Served from a snapshot older than the refresh window
    pub stale: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    fetched_at: DateTime<Utc>,
    sha256: String,
    source_url: String,
}

#[derive(Debug)]
struct IndexedRecord {
    record: ParsedRecord,
    full_key: String,
    part_keys: Vec<String>,
}

impl IndexedRecord {
    fn new(record: ParsedRecord) -> Self {
        Self {
            full_key: match_key(&record.entry.name),
            part_keys: record.name_parts.iter().map(|p| match_key(p)).collect(),
            record,
        }
    }

    fn matches(&self, key: &str) -> bool {
        self.full_key.contains(key) || self.part_keys.iter().any(|part| part.contains(key))
    }
}

/// One parsed snapshot of the list
#[derive(Debug)]
pub struct ListCacheEntry {
    fetched_at: DateTime<Utc>,
    sha256: String,
    individuals: Vec<IndexedRecord>,
    entities: Vec<IndexedRecord>,
}

impl ListCacheEntry {
    fn new(records: Vec<ParsedRecord>, fetched_at: DateTime<Utc>, sha256: String) -> Self {
        let (individuals, entities): (Vec<_>, Vec<_>) = records
            .into_iter()
            .map(IndexedRecord::new)
            .partition(|r| r.record.entry.kind == ListEntryKind::Individual);

        Self {
            fetched_at,
            sha256,
            individuals,
            entities,
        }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.individuals.len() + self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.fetched_at < max_age
    }

    fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            fetched_at: self.fetched_at,
            sha256: self.sha256.clone(),
            key: LIST_SNAPSHOT_KEY.to_string(),
            entries: self.len(),
        }
    }

    /// Matches in list order, first `cap` kept
    pub fn search(&self, name: &NormalizedName, cap: usize) -> MatchSet {
        let records = match name.search_type {
            SearchType::Person => &self.individuals,
            SearchType::Entity => &self.entities,
        };

        let matches = records
            .iter()
            .filter(|r| r.matches(&name.key))
            .map(|r| SourceMatch::ListEntry(r.record.entry.clone()))
            .collect();

        MatchSet::capped(SourceId::Un, matches, cap)
    }
}

#[derive(Default)]
struct RefreshState {
    last_failure: Option<(DateTime<Utc>, Error)>,
    backing_checked: bool,
}

/// Consolidated-list cache with single-flight refresh
pub struct ConsolidatedListCache {
    fetcher: Arc<dyn ListFetcher>,
    backing: Option<Arc<dyn ObjectStore>>,
    clock: Arc<dyn Clock>,
    max_age: Duration,
    match_cap: usize,
    entry: RwLock<Option<Arc<ListCacheEntry>>>,
    refresh: Mutex<RefreshState>,
}

impl ConsolidatedListCache {
    pub fn new(
        fetcher: Arc<dyn ListFetcher>,
        clock: Arc<dyn Clock>,
        max_age: Duration,
        match_cap: usize,
    ) -> Self {
        Self {
            fetcher,
            backing: None,
            clock,
            max_age,
            match_cap,
            entry: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    /// Keep a durable copy of every download in `store`
    pub fn with_backing_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.backing = Some(store);
        self
    }

    /// Match a name against the list, refreshing first when needed
    pub async fn lookup(&self, name: &NormalizedName) -> Result<ListLookup> {
        let (entry, stale) = self.current_entry().await?;
        let matches = entry.search(name, self.match_cap);

        debug!(
            "UN lookup '{}': {} matches (stale={})",
            name.key, matches.total_matches, stale
        );

        Ok(ListLookup {
            matches,
            snapshot: entry.info(),
            stale,
        })
    }

    /// Load the list ahead of the first search
    pub async fn warm_start(&self) -> Result<SnapshotInfo> {
        let (entry, stale) = self.current_entry().await?;
        if stale {
            warn!(
                "List cache warmed from stale snapshot fetched at {}",
                entry.fetched_at
            );
        }
        Ok(entry.info())
    }

    pub async fn snapshot_info(&self) -> Option<SnapshotInfo> {
        self.entry.read().await.as_ref().map(|e| e.info())
    }

    pub async fn is_ready(&self) -> bool {
        self.entry.read().await.is_some()
    }

    async fn fresh_entry(&self) -> Option<Arc<ListCacheEntry>> {
        let now = self.clock.now();
        self.entry
            .read()
            .await
            .as_ref()
            .filter(|e| e.is_fresh(now, self.max_age))
            .cloned()
    }

    async fn current_entry(&self) -> Result<(Arc<ListCacheEntry>, bool)> {
        if let Some(entry) = self.fresh_entry().await {
            return Ok((entry, false));
        }

        let mut state = self.refresh.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(entry) = self.fresh_entry().await {
            return Ok((entry, false));
        }

        if let Some((failed_at, err)) = &state.last_failure {
            if self.clock.now() - *failed_at < Duration::seconds(REFRESH_FAILURE_COOLDOWN_SECONDS)
            {
                return self.stale_or(err.clone()).await;
            }
        }

        if !state.backing_checked {
            state.backing_checked = true;
            if self.entry.read().await.is_none() {
                if let Some(entry) = self.load_backing_copy().await {
                    let fresh = entry.is_fresh(self.clock.now(), self.max_age);
                    *self.entry.write().await = Some(entry.clone());
                    if fresh {
                        return Ok((entry, false));
                    }
                }
            }
        }

        match self.refresh_now().await {
            Ok(entry) => {
                state.last_failure = None;
                Ok((entry, false))
            }
            Err(err) => {
                warn!("Consolidated list refresh failed: {}", err);
                state.last_failure = Some((self.clock.now(), err.clone()));
                self.stale_or(err).await
            }
        }
    }

    async fn stale_or(&self, err: Error) -> Result<(Arc<ListCacheEntry>, bool)> {
        match self.entry.read().await.as_ref() {
            Some(entry) => Ok((entry.clone(), true)),
            None => Err(match err {
                e @ (Error::SourceTimeout { .. } | Error::SourceUnavailable { .. }) => e,
                other => Error::SourceUnavailable {
                    source_id: SourceId::Un,
                    reason: other.to_string(),
                },
            }),
        }
    }

    async fn refresh_now(&self) -> Result<Arc<ListCacheEntry>> {
        let raw = match self.fetcher.fetch().await {
            Ok(raw) => raw,
            Err(e) => {
                LIST_CACHE_REFRESH_TOTAL
                    .with_label_values(&["fetch_failed"])
                    .inc();
                return Err(e);
            }
        };
        let fetched_at = self.clock.now();

        let entry = match Self::build_entry(raw.clone(), fetched_at).await {
            Ok(entry) => Arc::new(entry),
            Err(e) => {
                LIST_CACHE_REFRESH_TOTAL
                    .with_label_values(&["parse_failed"])
                    .inc();
                return Err(e);
            }
        };

        info!(
            "Consolidated list refreshed: {} records, sha256 {}",
            entry.len(),
            entry.sha256
        );
        LIST_CACHE_REFRESH_TOTAL.with_label_values(&["success"]).inc();

        *self.entry.write().await = Some(entry.clone());
        self.write_backing_copy(raw, &entry).await;

        Ok(entry)
    }

    async fn build_entry(raw: Bytes, fetched_at: DateTime<Utc>) -> Result<ListCacheEntry> {
        tokio::task::spawn_blocking(move || {
            let sha256 = hex::encode(Sha256::digest(&raw));
            let records = parse_consolidated(&raw)?;
            if records.is_empty() {
                return Err(Error::Parse("list contains no records".to_string()));
            }
            Ok(ListCacheEntry::new(records, fetched_at, sha256))
        })
        .await
        .map_err(|e| Error::Parse(format!("parser task failed: {}", e)))?
    }

    async fn write_backing_copy(&self, raw: Bytes, entry: &ListCacheEntry) {
        let Some(store) = &self.backing else {
            return;
        };

        let meta = SnapshotMeta {
            fetched_at: entry.fetched_at,
            sha256: entry.sha256.clone(),
            source_url: self.fetcher.source_url().to_string(),
        };
        let meta = match serde_json::to_vec_pretty(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Could not encode list snapshot metadata: {}", e);
                return;
            }
        };

        if let Err(e) = store
            .put(LIST_SNAPSHOT_KEY, raw, "application/xml")
            .await
        {
            warn!("Could not store list snapshot: {}", e);
            return;
        }
        if let Err(e) = store
            .put(LIST_SNAPSHOT_META_KEY, Bytes::from(meta), "application/json")
            .await
        {
            warn!("Could not store list snapshot metadata: {}", e);
        }
    }

    async fn load_backing_copy(&self) -> Option<Arc<ListCacheEntry>> {
        let store = self.backing.as_ref()?;

        let meta = match store.get(LIST_SNAPSHOT_META_KEY).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                debug!("No stored list snapshot");
                return None;
            }
            Err(e) => {
                warn!("Could not read list snapshot metadata: {}", e);
                return None;
            }
        };
        let meta: SnapshotMeta = match serde_json::from_slice(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                warn!("Invalid list snapshot metadata: {}", e);
                return None;
            }
        };

        let raw = match store.get(LIST_SNAPSHOT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read list snapshot: {}", e);
                return None;
            }
        };

        match Self::build_entry(raw, meta.fetched_at).await {
            Ok(entry) if entry.sha256 == meta.sha256 => {
                info!(
                    "Loaded stored list snapshot from {} ({} records)",
                    meta.fetched_at,
                    entry.len()
                );
                Some(Arc::new(entry))
            }
            Ok(_) => {
                warn!("Stored list snapshot does not match its checksum, ignoring");
                None
            }
            Err(e) => {
                warn!("Stored list snapshot unreadable: {}", e);
                None
            }
        }
    }
}
