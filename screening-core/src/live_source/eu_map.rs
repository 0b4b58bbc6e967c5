//! EU Sanctions Map connector
//!
//! Two calls per search:
//! 1. `GET /api/v1/autocomplete/search` returns name suggestions
//! 2. `GET /api/v1/regime` returns the regimes for the search, only called when a suggestion is a
//!    definite match

use super::{classify_suggestions, LiveQuery, LiveQueryResult, LiveSource};
use crate::config::LiveSourceConfig;
use crate::error::{Error, Result};
use crate::evidence::object_store::URI_ENCODE_SET;
use crate::types::{MatchSet, RegimeMatch, SourceId, SourceMatch, Warning};
use async_trait::async_trait;
use percent_encoding::utf8_percent_encode;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

const AUTOCOMPLETE_PATH: &str = "/api/v1/autocomplete/search";
const REGIME_PATH: &str = "/api/v1/regime";

/// `search_type` value meaning "regimes, persons, entities"
const SEARCH_TYPE_ALL: &str = "1";
const SEARCH_TYPE_TITLE: &str = "regimes, persons, entities";

pub struct EuSanctionsMapConnector {
    base_url: String,
    client: Client,
    timeout_secs: u64,
    autocomplete_limit: u32,
}

impl EuSanctionsMapConnector {
    pub fn new(config: &LiveSourceConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        let referer = HeaderValue::from_str(&format!("{}/", base_url))
            .map_err(|e| Error::Config(format!("invalid EU base URL: {}", e)))?;
        headers.insert(REFERER, referer);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .user_agent(concat!("sanctions-screening/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            base_url,
            client,
            timeout_secs: config.timeout_secs,
            autocomplete_limit: config.autocomplete_limit,
        })
    }

    async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::from_source_request(SourceId::Eu, self.timeout_secs, e))?;

        if !response.status().is_success() {
            return Err(Error::SourceUnavailable {
                source_id: SourceId::Eu,
                reason: format!("{} returned status {}", path, response.status()),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                Error::from_source_request(SourceId::Eu, self.timeout_secs, e)
            } else {
                Error::SourceUnavailable {
                    source_id: SourceId::Eu,
                    reason: format!("{} returned invalid JSON: {}", path, e),
                }
            }
        })
    }
}

#[async_trait]
impl LiveSource for EuSanctionsMapConnector {
    async fn query(&self, query: &LiveQuery) -> Result<LiveQueryResult> {
        let search = query.name.display.as_str();
        let limit = self.autocomplete_limit.to_string();

        let autocomplete = self
            .get_json(
                AUTOCOMPLETE_PATH,
                &[
                    ("lang", "en"),
                    ("search", search),
                    ("search_type", SEARCH_TYPE_ALL),
                    ("limit", limit.as_str()),
                ],
            )
            .await?;

        let suggestions = extract_suggestions(&autocomplete);
        let (definite, candidates) =
            classify_suggestions(&query.name.key, suggestions, query.exact);

        let mut matches: Vec<SourceMatch> = definite
            .into_iter()
            .map(|name| SourceMatch::PersonMatch { name })
            .collect();

        let mut regimes = Value::Null;
        let mut regime_error = Value::Null;
        let mut warnings = Vec::new();
        if !matches.is_empty() {
            let response = self
                .get_json(
                    REGIME_PATH,
                    &[
                        ("lang", "en"),
                        ("search", search),
                        ("search_type", SEARCH_TYPE_ALL),
                    ],
                )
                .await;
            match response {
                Ok(body) => {
                    matches.extend(extract_regimes(&body).into_iter().map(SourceMatch::Regime));
                    regimes = body;
                }
                // Name matches stand without regime detail
                Err(e) => {
                    warn!("EU regime lookup for '{}' failed: {}", search, e);
                    regime_error = Value::String(e.to_string());
                    warnings.push(Warning::SourceDegraded {
                        source: SourceId::Eu,
                        reason: format!("regime details unavailable: {}", e),
                    });
                }
            }
        }

        debug!(
            "EU query '{}': {} matches, {} candidates",
            search,
            matches.len(),
            candidates.len()
        );

        Ok(LiveQueryResult {
            matches: MatchSet::new(SourceId::Eu, matches),
            candidates,
            raw: json!({
                "autocomplete": autocomplete,
                "regimes": regimes,
                "regime_error": regime_error,
                "deep_link": self.deep_link(search),
            }),
            warnings,
        })
    }

    fn deep_link(&self, query: &str) -> String {
        deep_link(&self.base_url, query)
    }

    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| Error::from_source_request(SourceId::Eu, self.timeout_secs, e))?;

        if response.status().is_server_error() {
            return Err(Error::SourceUnavailable {
                source_id: SourceId::Eu,
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "eu_sanctions_map"
    }
}

/// Map page pre-filled with a search
pub fn deep_link(base_url: &str, query: &str) -> String {
    // Key order matters to the map's router, so the JSON is assembled by hand
    let search = format!(
        r#"{{"value":{},"searchType":{{"id":1,"title":"{}"}}}}"#,
        Value::String(query.to_string()),
        SEARCH_TYPE_TITLE
    );
    format!(
        "{}/#/main?search={}",
        base_url.trim_end_matches('/'),
        utf8_percent_encode(&search, URI_ENCODE_SET)
    )
}

/// Names from an autocomplete response (`data` holds strings or objects with a title)
fn extract_suggestions(response: &Value) -> Vec<String> {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(obj) => ["title", "name", "value"]
                        .iter()
                        .find_map(|k| obj.get(*k).and_then(Value::as_str))
                        .map(str::to_string),
                    _ => None,
                })
                .filter(|name| !name.trim().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn extract_regimes(response: &Value) -> Vec<RegimeMatch> {
    response
        .get("data")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|regime| RegimeMatch {
                    id: scalar_string(regime.get("id")),
                    acronym: scalar_string(regime.get("acronym")),
                    description: scalar_string(regime.get("specification"))
                        .or_else(|| scalar_string(regime.get("description"))),
                    country: extract_country(regime.get("country")),
                    measures: extract_measures(regime.get("measures")),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `country` is `{data: {title}}`, `{data: [{title}]}`, `[{title}]` or `[{data: {title}}]`
fn extract_country(value: Option<&Value>) -> Option<String> {
    let title = |v: &Value| v.get("title").and_then(Value::as_str).map(str::to_string);

    match value? {
        Value::Object(obj) => match obj.get("data")? {
            inner @ Value::Object(_) => title(inner),
            Value::Array(items) => items.first().and_then(title),
            _ => None,
        },
        Value::Array(items) => {
            let first = items.first()?;
            title(first).or_else(|| first.get("data").and_then(title))
        }
        _ => None,
    }
}

/// Measure titles at `measures[.data][].type.data.title`
fn extract_measures(value: Option<&Value>) -> Vec<String> {
    let items = match value {
        Some(Value::Object(obj)) => obj.get("data").and_then(Value::as_array),
        Some(Value::Array(items)) => Some(items),
        _ => None,
    };

    items
        .map(|items| {
            items
                .iter()
                .filter_map(|m| {
                    m.get("type")
                        .and_then(|t| t.get("data"))
                        .and_then(|d| d.get("title"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
