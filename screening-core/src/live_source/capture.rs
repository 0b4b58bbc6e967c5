//! Evidence capture of the live-source result page
//!
//! Two capabilities, chosen at construction:
//! - [`RenderServiceCapture`]: asks a headless-browser render service (browserless-compatible
//!   `POST /pdf`) to print the map page as PDF
//! - [`HtmlSnapshotCapture`]: renders a self-contained HTML record of the query, the deep link
//!   and the matches

use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::types::{EvidenceArtifact, EvidenceKind, SearchType, SourceMatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const PDF_FILE_NAME: &str = "evidence_eu.pdf";
pub const HTML_FILE_NAME: &str = "evidence_eu.html";

/// What the capture documents
#[derive(Debug, Clone)]
pub struct CaptureContext {
    pub query: String,
    pub search_type: SearchType,
    pub deep_link: String,
    pub matches: Vec<SourceMatch>,
    pub captured_at: DateTime<Utc>,
}

#[async_trait]
pub trait EvidenceCapture: Send + Sync {
    async fn capture(&self, context: &CaptureContext) -> Result<EvidenceArtifact>;

    fn name(&self) -> &str;
}

/// Select the capture implementation
pub fn capture_from_config(config: &CaptureConfig) -> Result<Arc<dyn EvidenceCapture>> {
    match &config.render_service_url {
        Some(endpoint) => {
            info!("Evidence capture: render service at {}", endpoint);
            Ok(Arc::new(RenderServiceCapture::new(
                endpoint.clone(),
                config.timeout_secs,
            )?))
        }
        None => {
            info!("Evidence capture: HTML snapshot");
            Ok(Arc::new(HtmlSnapshotCapture))
        }
    }
}

pub struct RenderServiceCapture {
    endpoint: String,
    client: Client,
    timeout_secs: u64,
}

impl RenderServiceCapture {
    pub fn new(endpoint: String, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl EvidenceCapture for RenderServiceCapture {
    async fn capture(&self, context: &CaptureContext) -> Result<EvidenceArtifact> {
        let navigation_timeout_ms = self.timeout_secs.saturating_sub(5).max(1) * 1000;
        let body = json!({
            "url": context.deep_link,
            "options": {
                "format": "A4",
                "landscape": true,
                "printBackground": true,
                "margin": {"top": "20px", "right": "20px", "bottom": "20px", "left": "20px"}
            },
            "gotoOptions": {
                "waitUntil": "networkidle2",
                "timeout": navigation_timeout_ms
            }
        });

        let response = self
            .client
            .post(format!("{}/pdf", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::CaptureFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::CaptureFailed(format!(
                "render service returned status {}",
                response.status()
            )));
        }

        let pdf = response
            .bytes()
            .await
            .map_err(|e| Error::CaptureFailed(e.to_string()))?;
        if !pdf.starts_with(b"%PDF") {
            return Err(Error::CaptureFailed(
                "render service did not return a PDF".to_string(),
            ));
        }

        debug!("Captured {} ({} bytes)", context.deep_link, pdf.len());
        Ok(EvidenceArtifact::new(
            EvidenceKind::Screenshot,
            PDF_FILE_NAME,
            "application/pdf",
            pdf,
        ))
    }

    fn name(&self) -> &str {
        "render_service"
    }
}

pub struct HtmlSnapshotCapture;

impl HtmlSnapshotCapture {
    fn render(context: &CaptureContext) -> String {
        let mut rows = String::new();
        for m in &context.matches {
            let (kind, details) = match m {
                SourceMatch::PersonMatch { name } => ("Name", escape_html(name)),
                SourceMatch::Regime(regime) => {
                    let mut details = escape_html(&m.label());
                    if let Some(description) = &regime.description {
                        let _ = write!(details, " &middot; {}", escape_html(description));
                    }
                    if let Some(country) = &regime.country {
                        let _ = write!(details, " &middot; {}", escape_html(country));
                    }
                    if !regime.measures.is_empty() {
                        let _ = write!(
                            details,
                            " &middot; Measures: {}",
                            escape_html(&regime.measures.join(", "))
                        );
                    }
                    ("Regime", details)
                }
                SourceMatch::ListEntry(entry) => ("List entry", escape_html(&entry.name)),
            };
            let _ = writeln!(rows, "<tr><td>{}</td><td>{}</td></tr>", kind, details);
        }
        if rows.is_empty() {
            rows.push_str("<tr><td colspan=\"2\">No matches</td></tr>\n");
        }

        let link = escape_html(&context.deep_link);
        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>EU Sanctions Map evidence: {query}</title>\n</head>\n<body>\n\
             <h1>EU Sanctions Map search</h1>\n\
             <p><strong>Query:</strong> {query}</p>\n\
             <p><strong>Search type:</strong> {search_type}</p>\n\
             <p><strong>Captured at:</strong> {captured_at}</p>\n\
             <p><strong>Source page:</strong> <a href=\"{link}\">{link}</a></p>\n\
             <table border=\"1\">\n<tr><th>Type</th><th>Details</th></tr>\n{rows}</table>\n\
             </body>\n</html>\n",
            query = escape_html(&context.query),
            search_type = context.search_type,
            captured_at = context.captured_at.to_rfc3339(),
            link = link,
            rows = rows,
        )
    }
}

#[async_trait]
impl EvidenceCapture for HtmlSnapshotCapture {
    async fn capture(&self, context: &CaptureContext) -> Result<EvidenceArtifact> {
        Ok(EvidenceArtifact::new(
            EvidenceKind::Screenshot,
            HTML_FILE_NAME,
            "text/html; charset=utf-8",
            Self::render(context),
        ))
    }

    fn name(&self) -> &str {
        "html_snapshot"
    }
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
