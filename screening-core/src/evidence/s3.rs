//! S3-compatible object storage (DigitalOcean Spaces, MinIO, AWS)
//!
//! Requests use path-style URLs (`{endpoint}/{bucket}/{key}`) and AWS Signature V4, either in
//! headers (PUT/GET/HEAD) or in the query string (presigned GET).

use super::object_store::{encode_key, ObjectStore, PresignedUrl, URI_ENCODE_SET};
use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::utf8_percent_encode;
use reqwest::{Client, Method, StatusCode, Url};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Longest presign lifetime S3 accepts (7 days)
const MAX_PRESIGN_SECONDS: u64 = 604_800;

/// Signing identity
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Build a presigned URL for `url` (no existing query string)
pub fn presign_url(
    method: &str,
    url: &Url,
    credentials: &SigningCredentials,
    now: DateTime<Utc>,
    expires_seconds: u64,
) -> Result<String> {
    let host = host_header(url)?;
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = credential_scope(now, &credentials.region);

    let params = [
        ("X-Amz-Algorithm", ALGORITHM.to_string()),
        (
            "X-Amz-Credential",
            format!("{}/{}", credentials.access_key, scope),
        ),
        ("X-Amz-Date", amz_date.clone()),
        ("X-Amz-Expires", expires_seconds.to_string()),
        ("X-Amz-SignedHeaders", "host".to_string()),
    ];
    let canonical_query = params
        .iter()
        .map(|(name, value)| format!("{}={}", uri_encode(name), uri_encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
        method,
        url.path(),
        canonical_query,
        host,
        UNSIGNED_PAYLOAD
    );
    let signature = sign(credentials, now, &scope, &amz_date, &canonical_request)?;

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        url.scheme(),
        host,
        url.path(),
        canonical_query,
        signature
    ))
}

/// Headers for a header-signed request: `x-amz-date`, `x-amz-content-sha256`, `authorization`
pub fn signed_headers(
    method: &str,
    url: &Url,
    credentials: &SigningCredentials,
    now: DateTime<Utc>,
    payload: &[u8],
) -> Result<Vec<(&'static str, String)>> {
    let host = host_header(url)?;
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let scope = credential_scope(now, &credentials.region);
    let payload_hash = hex::encode(Sha256::digest(payload));
    let signed = "host;x-amz-content-sha256;x-amz-date";

    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n\n{}\n{}",
        method,
        url.path(),
        url.query().unwrap_or(""),
        host,
        payload_hash,
        amz_date,
        signed,
        payload_hash
    );
    let signature = sign(credentials, now, &scope, &amz_date, &canonical_request)?;

    Ok(vec![
        ("x-amz-date", amz_date),
        ("x-amz-content-sha256", payload_hash),
        (
            "authorization",
            format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, credentials.access_key, scope, signed, signature
            ),
        ),
    ])
}

fn sign(
    credentials: &SigningCredentials,
    now: DateTime<Utc>,
    scope: &str,
    amz_date: &str,
    canonical_request: &str,
) -> Result<String> {
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let date = now.format("%Y%m%d").to_string();
    let k_date = hmac(
        format!("AWS4{}", credentials.secret_key).as_bytes(),
        date.as_bytes(),
    )?;
    let k_region = hmac(&k_date, credentials.region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    let k_signing = hmac(&k_service, b"aws4_request")?;

    Ok(hex::encode(hmac(&k_signing, string_to_sign.as_bytes())?))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| Error::Storage(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn credential_scope(now: DateTime<Utc>, region: &str) -> String {
    format!("{}/{}/{}/aws4_request", now.format("%Y%m%d"), region, SERVICE)
}

fn host_header(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("storage URL {} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ENCODE_SET).to_string()
}

/// S3-compatible store
pub struct S3ObjectStore {
    endpoint: String,
    bucket: String,
    credentials: SigningCredentials,
    client: Client,
    clock: Arc<dyn Clock>,
}

impl S3ObjectStore {
    pub fn new(config: StorageConfig, clock: Arc<dyn Clock>, timeout_secs: u64) -> Result<Self> {
        Url::parse(&config.endpoint)
            .map_err(|e| Error::Config(format!("invalid storage endpoint: {}", e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket,
            credentials: SigningCredentials {
                access_key: config.access_key,
                secret_key: config.secret_key,
                region: config.region,
            },
            client,
            clock,
        })
    }

    fn bucket_url(&self) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.endpoint, self.bucket))
            .map_err(|e| Error::Config(e.to_string()))
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}/{}", self.endpoint, self.bucket, encode_key(key)))
            .map_err(|e| Error::Config(e.to_string()))
    }

    async fn send_signed(
        &self,
        method: Method,
        url: Url,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let headers = signed_headers(
            method.as_str(),
            &url,
            &self.credentials,
            self.clock.now(),
            &body,
        )?;

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(content_type) = content_type {
            request = request.header("content-type", content_type);
        }

        request
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        let url = self.object_url(key)?;
        let response = self
            .send_signed(Method::PUT, url, body, Some(content_type))
            .await?;

        if response.status().is_success() {
            debug!("Stored object {}", key);
            Ok(())
        } else {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(Error::Storage(format!(
                "PUT {} failed with status {}: {}",
                key, status, message
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let url = self.object_url(key)?;
        let response = self.send_signed(Method::GET, url, Bytes::new(), None).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .bytes()
                .await
                .map(Some)
                .map_err(|e| Error::Storage(e.to_string())),
            status => Err(Error::Storage(format!(
                "GET {} failed with status {}",
                key,
                status.as_u16()
            ))),
        }
    }

    fn presign_get(&self, key: &str, ttl_seconds: u64) -> Result<PresignedUrl> {
        if ttl_seconds == 0 || ttl_seconds > MAX_PRESIGN_SECONDS {
            return Err(Error::Config(format!(
                "presign TTL must be within 1..={} seconds",
                MAX_PRESIGN_SECONDS
            )));
        }

        let now = self.clock.now();
        let url = presign_url(
            "GET",
            &self.object_url(key)?,
            &self.credentials,
            now,
            ttl_seconds,
        )?;

        Ok(PresignedUrl {
            url,
            expires_at: now + Duration::seconds(ttl_seconds as i64),
            ttl_seconds,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .send_signed(Method::HEAD, self.bucket_url()?, Bytes::new(), None)
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Storage(format!(
                "bucket {} not reachable: status {}",
                self.bucket,
                response.status().as_u16()
            )))
        }
    }

    fn name(&self) -> &str {
        "s3"
    }
}
