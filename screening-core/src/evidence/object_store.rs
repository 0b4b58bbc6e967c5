//! Object storage interface

use crate::clock::Clock;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;

type HmacSha256 = Hmac<Sha256>;

/// RFC 3986 unreserved characters stay literal; everything else is escaped
pub(crate) const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Temporary read-only link to one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write (or overwrite) an object
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()>;

    /// Read an object, `None` when it does not exist
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Mint a read-only URL valid for `ttl_seconds`
    fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl>;

    /// Storage reachable
    async fn health_check(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Encode every path segment of a key, keeping the separators
pub(crate) fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| utf8_percent_encode(segment, URI_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Bytes,
    content_type: String,
}

/// Process-local store used for tests and runs without object storage credentials.
///
/// Presigned URLs have the form `memory://{bucket}/{key}?expires={unix}&signature={hex}` and can
/// be resolved back through [`InMemoryObjectStore::resolve`].
pub struct InMemoryObjectStore {
    bucket: String,
    objects: DashMap<String, StoredObject>,
    signing_key: [u8; 32],
    clock: Arc<dyn Clock>,
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: DashMap::new(),
            signing_key: rand::random(),
            clock,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Keys in lexical order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|o| o.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.get(key).map(|o| o.content_type.clone())
    }

    /// Follow a presigned URL the way an HTTP client would
    pub fn resolve(&self, url: &str) -> Result<Bytes> {
        let rest = url
            .strip_prefix("memory://")
            .ok_or_else(|| Error::PresignRejected("not a memory:// URL".to_string()))?;
        let (path, query) = rest
            .split_once('?')
            .ok_or_else(|| Error::PresignRejected("missing signature".to_string()))?;
        let (bucket, encoded_key) = path
            .split_once('/')
            .ok_or_else(|| Error::PresignRejected("missing object key".to_string()))?;
        if bucket != self.bucket {
            return Err(Error::PresignRejected(format!("unknown bucket {}", bucket)));
        }
        let key = percent_decode_str(encoded_key)
            .decode_utf8()
            .map_err(|e| Error::PresignRejected(e.to_string()))?
            .into_owned();

        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", value)) => expires = value.parse::<i64>().ok(),
                Some(("signature", value)) => signature = hex::decode(value).ok(),
                _ => {}
            }
        }
        let expires =
            expires.ok_or_else(|| Error::PresignRejected("missing expiry".to_string()))?;
        let signature =
            signature.ok_or_else(|| Error::PresignRejected("missing signature".to_string()))?;

        self.mac(&key, expires)?
            .verify_slice(&signature)
            .map_err(|_| Error::PresignRejected("signature mismatch".to_string()))?;

        if self.clock.now().timestamp() >= expires {
            return Err(Error::PresignRejected("URL expired".to_string()));
        }

        self.objects
            .get(&key)
            .map(|o| o.body.clone())
            .ok_or_else(|| Error::Storage(format!("object {} not found", key)))
    }

    fn mac(&self, key: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::Storage(e.to_string()))?;
        mac.update(self.bucket.as_bytes());
        mac.update(b"/");
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.objects.get(key).map(|o| o.body.clone()))
    }

    fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl> {
        let expires_at = self.clock.now() + Duration::seconds(ttl_seconds as i64);
        let expires = expires_at.timestamp();
        let signature = hex::encode(self.mac(key, expires)?.finalize().into_bytes());

        Ok(PresignedUrl {
            url: format!(
                "memory://{}/{}?expires={}&signature={}",
                self.bucket,
                encode_key(key),
                expires,
                signature
            ),
            expires_at,
            ttl_seconds,
        })
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (Arc<ManualClock>, InMemoryObjectStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        ));
        let store = InMemoryObjectStore::new("sanctions-audit", clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_presigned_url_round_trip_until_expiry() {
        let (clock, store) = store();
        let key = "audit_logs/2024/05/acme_20240501_093000/raw_data.json";
        store
            .put(key, Bytes::from_static(b"{}"), "application/json")
            .await
            .unwrap();

        let presigned = store.presign_get(key, 3600).unwrap();
        assert_eq!(presigned.ttl_seconds, 3600);
        assert_eq!(store.resolve(&presigned.url).unwrap(), Bytes::from_static(b"{}"));

        clock.advance(Duration::seconds(3599));
        assert!(store.resolve(&presigned.url).is_ok());

        clock.advance(Duration::seconds(1));
        assert!(matches!(
            store.resolve(&presigned.url),
            Err(Error::PresignRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_tampered_url_rejected() {
        let (_, store) = store();
        store
            .put("a/b.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        store
            .put("a/c.txt", Bytes::from_static(b"y"), "text/plain")
            .await
            .unwrap();

        let presigned = store.presign_get("a/b.txt", 3600).unwrap();
        let forged = presigned.url.replace("a/b.txt", "a/c.txt");
        assert!(matches!(store.resolve(&forged), Err(Error::PresignRejected(_))));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_, store) = store();
        store.put("k", Bytes::from_static(b"1"), "text/plain").await.unwrap();
        store.put("k", Bytes::from_static(b"2"), "text/plain").await.unwrap();
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.get("k").await.unwrap(), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn test_key_encoding_keeps_separators() {
        assert_eq!(encode_key("cache/consolidated.xml"), "cache/consolidated.xml");
        assert_eq!(encode_key("a b/ü"), "a%20b/%C3%BC");
    }
}
