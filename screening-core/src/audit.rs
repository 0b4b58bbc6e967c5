//! Audit log
//!
//! Each evidence folder carries an `audit_log.jsonl`: one JSON record per screening written to
//! that folder, chained by SHA-256 so edits or removed lines are detectable.

use crate::error::{Error, Result};
use crate::evidence::{EvidenceStore, StoredArtifact};
use crate::list_cache::SnapshotInfo;
use crate::types::{
    EvidenceArtifact, EvidenceKind, NarrativeSource, RiskTier, SearchType, SourceId, SourceStatus,
    Warning,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

pub const AUDIT_LOG_FILE: &str = "audit_log.jsonl";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ScreeningCompleted,
}

impl AuditEventType {
    fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::ScreeningCompleted => "screening_completed",
        }
    }
}

/// Per-source outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAudit {
    pub source: SourceId,
    pub found: bool,
    pub total_matches: usize,
    pub status: SourceStatus,
    pub latency_ms: u64,
}

/// What was screened and how
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreeningAudit {
    pub query: String,
    pub normalized_query: String,
    pub search_type: SearchType,
    pub selected_candidate: Option<String>,
    pub sources: Vec<SourceAudit>,
    pub list_snapshot: Option<SnapshotInfo>,
    pub list_stale: bool,
    pub tier: RiskTier,
    pub factors: Vec<String>,
    pub narrative_source: NarrativeSource,
    pub artifacts: Vec<StoredArtifact>,
    pub failed_artifacts: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// One line of the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub audit_folder: String,
    pub details: serde_json::Value,
    pub previous_hash: String,
    pub hash: String,
}

impl AuditRecord {
    pub fn screening(
        audit_folder: &str,
        timestamp: DateTime<Utc>,
        screening: &ScreeningAudit,
    ) -> Result<Self> {
        let mut record = Self {
            event_id: Uuid::new_v4(),
            timestamp,
            event_type: AuditEventType::ScreeningCompleted,
            audit_folder: audit_folder.to_string(),
            details: serde_json::to_value(screening)?,
            previous_hash: String::new(),
            hash: String::new(),
        };
        record.hash = record.compute_hash();
        Ok(record)
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();

        // Every field except the hash itself
        hasher.update(self.event_id.as_bytes());
        hasher.update(self.timestamp.to_rfc3339().as_bytes());
        hasher.update(self.event_type.as_str().as_bytes());
        hasher.update(self.audit_folder.as_bytes());
        hasher.update(self.details.to_string().as_bytes());
        hasher.update(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    pub fn set_previous_hash(&mut self, previous_hash: String) {
        self.previous_hash = previous_hash;
        self.hash = self.compute_hash();
    }

    pub fn screening_details(&self) -> Result<ScreeningAudit> {
        Ok(serde_json::from_value(self.details.clone())?)
    }
}

/// Appends hash-chained records to a folder's audit log
pub struct AuditLogger {
    evidence: EvidenceStore,
    append_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(evidence: EvidenceStore) -> Self {
        Self {
            evidence,
            append_lock: Mutex::new(()),
        }
    }

    /// Chain `record` onto the folder's log and write it back
    pub async fn append(&self, folder: &str, mut record: AuditRecord) -> Result<StoredArtifact> {
        let _guard = self.append_lock.lock().await;

        let key = format!("{}/{}", folder, AUDIT_LOG_FILE);
        let existing = self
            .evidence
            .get(&key)
            .await?
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();

        let previous_hash = match existing.lines().filter(|l| !l.trim().is_empty()).last() {
            Some(line) => serde_json::from_str::<AuditRecord>(line)?.hash,
            None => String::new(),
        };
        record.set_previous_hash(previous_hash);

        let mut body = existing;
        body.push_str(&serde_json::to_string(&record)?);
        body.push('\n');

        let artifact = EvidenceArtifact::new(
            EvidenceKind::AuditLog,
            AUDIT_LOG_FILE,
            "application/x-ndjson",
            body,
        );

        match self.evidence.put(folder, &artifact).await {
            Ok(stored) => {
                debug!("Audit record {} appended to {}", record.event_id, key);
                Ok(stored)
            }
            Err(e) => {
                error!("Audit record {} not written: {}", record.event_id, e);
                Err(e)
            }
        }
    }

    pub async fn read(&self, folder: &str) -> Result<Vec<AuditRecord>> {
        let key = format!("{}/{}", folder, AUDIT_LOG_FILE);
        let Some(body) = self.evidence.get(&key).await? else {
            return Ok(Vec::new());
        };

        String::from_utf8_lossy(&body)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }

    /// Verify the folder's hash chain
    pub async fn verify_integrity(&self, folder: &str) -> Result<bool> {
        let mut previous_hash = String::new();

        for (i, record) in self.read(folder).await?.iter().enumerate() {
            if !record.verify_hash() {
                return Err(Error::AuditIntegrity(format!(
                    "record hash mismatch at line {}",
                    i + 1
                )));
            }
            if record.previous_hash != previous_hash {
                return Err(Error::AuditIntegrity(format!(
                    "hash chain broken at line {}",
                    i + 1
                )));
            }
            previous_hash = record.hash.clone();
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::evidence::{InMemoryObjectStore, ObjectStore, PresignedUrl};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Store whose reads fail every other call
    struct FlakyReads {
        inner: InMemoryObjectStore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl ObjectStore for FlakyReads {
        async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
            self.inner.put(key, body, content_type).await
        }

        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            if !self.fail_next.fetch_xor(true, Ordering::SeqCst) {
                return self.inner.get(key).await;
            }
            Err(Error::Storage("connection reset".to_string()))
        }

        fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl> {
            self.inner.presign_get(key, ttl_seconds)
        }

        async fn health_check(&self) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky_reads"
        }
    }

    fn screening() -> ScreeningAudit {
        ScreeningAudit {
            query: "ACME HOLDINGS".to_string(),
            normalized_query: "acme holdings".to_string(),
            search_type: SearchType::Entity,
            selected_candidate: None,
            sources: vec![SourceAudit {
                source: SourceId::Eu,
                found: true,
                total_matches: 2,
                status: SourceStatus::Ok,
                latency_ms: 340,
            }],
            list_snapshot: None,
            list_stale: false,
            tier: RiskTier::High,
            factors: vec!["EU source: 2 match(es)".to_string()],
            narrative_source: NarrativeSource::Template,
            artifacts: vec![],
            failed_artifacts: vec![],
            warnings: vec![],
        }
    }

    fn logger() -> (Arc<InMemoryObjectStore>, AuditLogger) {
        let store = Arc::new(InMemoryObjectStore::new("audit", Arc::new(SystemClock)));
        let evidence = EvidenceStore::new(store.clone(), Duration::from_millis(1), 3600);
        (store, AuditLogger::new(evidence))
    }

    #[test]
    fn test_record_hash() {
        let mut record = AuditRecord::screening("f", Utc::now(), &screening()).unwrap();
        assert!(record.verify_hash());

        record.set_previous_hash("abc".to_string());
        assert!(record.verify_hash());

        record.details["tier"] = serde_json::json!("LOW");
        assert!(!record.verify_hash());
        assert_eq!(record.event_type.as_str(), "screening_completed");
    }

    #[tokio::test]
    async fn test_append_chains_records() {
        let (_, logger) = logger();
        let folder = "audit_logs/2024/05/acme_holdings_20240501_120000";

        for _ in 0..3 {
            let record = AuditRecord::screening(folder, Utc::now(), &screening()).unwrap();
            logger.append(folder, record).await.unwrap();
        }

        let records = logger.read(folder).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].previous_hash, "");
        assert_eq!(records[1].previous_hash, records[0].hash);
        assert_eq!(records[2].screening_details().unwrap(), screening());
        assert!(logger.verify_integrity(folder).await.unwrap());
    }

    #[tokio::test]
    async fn test_tampering_detected() {
        let (store, logger) = logger();
        let folder = "f";
        let record = AuditRecord::screening(folder, Utc::now(), &screening()).unwrap();
        logger.append(folder, record).await.unwrap();

        let key = format!("{}/{}", folder, AUDIT_LOG_FILE);
        let body = store.get(&key).await.unwrap().unwrap();
        let forged = String::from_utf8_lossy(&body).replace("\"HIGH\"", "\"LOW\"");
        store
            .put(&key, Bytes::from(forged), "application/x-ndjson")
            .await
            .unwrap();

        assert!(matches!(
            logger.verify_integrity(folder).await,
            Err(Error::AuditIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_append_survives_transient_read_failure() {
        let store = Arc::new(FlakyReads {
            inner: InMemoryObjectStore::new("audit", Arc::new(SystemClock)),
            fail_next: AtomicBool::new(true),
        });
        let evidence = EvidenceStore::new(store.clone(), Duration::from_millis(1), 3600);
        let logger = AuditLogger::new(evidence);
        let folder = "audit_logs/2024/05/acme_holdings_20240501_120000";

        for _ in 0..2 {
            let record = AuditRecord::screening(folder, Utc::now(), &screening()).unwrap();
            logger.append(folder, record).await.unwrap();
        }

        let records = logger.read(folder).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].previous_hash, records[0].hash);
    }
}
