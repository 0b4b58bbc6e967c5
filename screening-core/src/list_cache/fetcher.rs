use crate::error::{Error, Result};
use crate::types::SourceId;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// Downloads the consolidated list
#[async_trait]
pub trait ListFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Bytes>;

    fn source_url(&self) -> &str;
}

/// HTTP download, redirects followed
pub struct HttpListFetcher {
    url: String,
    client: Client,
    timeout_secs: u64,
}

impl HttpListFetcher {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(concat!("sanctions-screening/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl ListFetcher for HttpListFetcher {
    async fn fetch(&self) -> Result<Bytes> {
        debug!("Downloading consolidated list from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| Error::from_source_request(SourceId::Un, self.timeout_secs, e))?;

        if !response.status().is_success() {
            return Err(Error::SourceUnavailable {
                source_id: SourceId::Un,
                reason: format!("list download returned status {}", response.status()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::from_source_request(SourceId::Un, self.timeout_secs, e))?;

        info!("Downloaded consolidated list: {} bytes", body.len());
        Ok(body)
    }

    fn source_url(&self) -> &str {
        &self.url
    }
}
