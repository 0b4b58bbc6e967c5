//! Evidence bundle storage
//!
//! Every final screening result gets its own folder:
//!
//! ```text
//! audit_logs/{YYYY}/{MM}/{name}_{YYYYMMDD_HHMMSS}/
//!     evidence_eu.pdf | evidence_eu.html
//!     evidence_un.html
//!     raw_data.json
//!     summary.txt
//!     audit_log.jsonl
//! ```

pub mod object_store;
pub mod s3;

pub use object_store::{InMemoryObjectStore, ObjectStore, PresignedUrl};
pub use s3::S3ObjectStore;

use crate::clock::Clock;
use crate::config::ScreeningConfig;
use crate::error::{Error, Result};
use crate::metrics::PERSISTENCE_FAILURES_TOTAL;
use crate::types::{EvidenceArtifact, EvidenceKind};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Root prefix of all evidence folders
pub const AUDIT_ROOT: &str = "audit_logs";

/// Per-request timeout for object storage calls
const STORAGE_TIMEOUT_SECONDS: u64 = 30;

/// Reference to one persisted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub kind: EvidenceKind,
    pub key: String,
    pub sha256: String,
    pub size: usize,
}

/// Folder key for one screening
pub fn folder_key(path_segment: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/{}_{}",
        AUDIT_ROOT,
        at.format("%Y/%m"),
        path_segment,
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Evidence writer with a single retry
#[derive(Clone)]
pub struct EvidenceStore {
    store: Arc<dyn ObjectStore>,
    retry_backoff: Duration,
    presign_ttl_secs: u64,
}

impl EvidenceStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        retry_backoff: Duration,
        presign_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            retry_backoff,
            presign_ttl_secs,
        }
    }

    pub fn from_config(config: &ScreeningConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match &config.storage {
            Some(storage) => {
                info!(
                    "Evidence storage: {} bucket {}",
                    storage.endpoint, storage.bucket
                );
                Arc::new(S3ObjectStore::new(
                    storage.clone(),
                    clock,
                    STORAGE_TIMEOUT_SECONDS,
                )?)
            }
            None => {
                warn!("Object storage credentials not set, evidence kept in memory");
                Arc::new(InMemoryObjectStore::new("sanctions-audit", clock))
            }
        };

        Ok(Self::new(
            store,
            Duration::from_millis(config.persistence.retry_backoff_ms),
            config.persistence.presign_ttl_secs,
        ))
    }

    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    pub fn presign_ttl_secs(&self) -> u64 {
        self.presign_ttl_secs
    }

    /// Write one artifact into `folder`, retrying once after the backoff
    pub async fn put(&self, folder: &str, artifact: &EvidenceArtifact) -> Result<StoredArtifact> {
        let key = artifact.storage_key(folder);
        self.put_with_retry(&key, artifact).await?;

        Ok(StoredArtifact {
            kind: artifact.kind,
            sha256: hex::encode(Sha256::digest(&artifact.content)),
            size: artifact.content.len(),
            key,
        })
    }

    async fn put_with_retry(&self, key: &str, artifact: &EvidenceArtifact) -> Result<()> {
        let first = self
            .store
            .put(key, artifact.content.clone(), &artifact.content_type)
            .await;

        let err = match first {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        warn!(
            "Write of {} failed ({}), retrying in {:?}",
            key, err, self.retry_backoff
        );
        tokio::time::sleep(self.retry_backoff).await;

        match self
            .store
            .put(key, artifact.content.clone(), &artifact.content_type)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                PERSISTENCE_FAILURES_TOTAL
                    .with_label_values(&[artifact.kind.as_str()])
                    .inc();
                Err(Error::PersistenceDegraded(format!("{}: {}", key, e)))
            }
        }
    }

    /// Read an object, retrying once after the backoff
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.store.get(key).await {
            Ok(body) => Ok(body),
            Err(err) => {
                warn!(
                    "Read of {} failed ({}), retrying in {:?}",
                    key, err, self.retry_backoff
                );
                tokio::time::sleep(self.retry_backoff).await;
                self.store.get(key).await
            }
        }
    }

    /// Presigned read link for an artifact key
    pub fn presign(&self, key: &str) -> Result<PresignedUrl> {
        self.store.presign_get(key, self.presign_ttl_secs)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}
