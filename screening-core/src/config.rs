use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

pub const DEFAULT_UN_CONSOLIDATED_URL: &str =
    "https://scsanctions.un.org/resources/xml/en/consolidated.xml";
pub const DEFAULT_EU_SANCTIONS_BASE_URL: &str = "https://www.sanctionsmap.eu";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScreeningConfig {
    pub list_source: ListSourceConfig,
    pub live_source: LiveSourceConfig,
    pub capture: CaptureConfig,
    pub summarizer: SummarizerConfig,
    pub storage: Option<StorageConfig>,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ListSourceConfig {
    pub url: String,
    pub max_age_hours: i64,
    pub fetch_timeout_secs: u64,
    pub match_cap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LiveSourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub autocomplete_limit: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Headless-browser render endpoint; unset selects the HTML snapshot capture
    pub render_service_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SummarizerConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl SummarizerConfig {
    /// A key is usable when present and not the `.env.example` placeholder
    pub fn usable_api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && !key.starts_with("sk-your"))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PersistenceConfig {
    pub retry_backoff_ms: u64,
    pub presign_ttl_secs: u64,
}

impl ScreeningConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let storage = match (
            env::var("DO_SPACES_ENDPOINT").ok(),
            env::var("DO_SPACES_KEY").ok(),
            env::var("DO_SPACES_SECRET").ok(),
        ) {
            (Some(endpoint), Some(access_key), Some(secret_key)) => Some(StorageConfig {
                endpoint,
                region: env::var("DO_SPACES_REGION").unwrap_or_else(|_| "nyc3".to_string()),
                bucket: env::var("DO_BUCKET_NAME")
                    .unwrap_or_else(|_| "sanctions-audit".to_string()),
                access_key,
                secret_key,
            }),
            _ => None,
        };

        ScreeningConfig {
            list_source: ListSourceConfig {
                url: env::var("UN_CONSOLIDATED_URL")
                    .unwrap_or_else(|_| DEFAULT_UN_CONSOLIDATED_URL.to_string()),
                max_age_hours: parse_env("LIST_MAX_AGE_HOURS", crate::DEFAULT_LIST_MAX_AGE_HOURS),
                fetch_timeout_secs: parse_env("LIST_FETCH_TIMEOUT_SECS", 120),
                match_cap: crate::DEFAULT_MATCH_CAP,
            },
            live_source: LiveSourceConfig {
                base_url: env::var("EU_SANCTIONS_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_EU_SANCTIONS_BASE_URL.to_string()),
                timeout_secs: parse_env(
                    "LIVE_QUERY_TIMEOUT_SECS",
                    crate::DEFAULT_LIVE_QUERY_TIMEOUT_SECONDS,
                ),
                autocomplete_limit: 15,
            },
            capture: CaptureConfig {
                render_service_url: env::var("RENDER_SERVICE_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                timeout_secs: parse_env("CAPTURE_TIMEOUT_SECS", 60),
            },
            summarizer: SummarizerConfig {
                api_key: env::var("OPENAI_API_KEY").ok(),
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string()),
                model: env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string()),
                timeout_secs: parse_env("SUMMARY_TIMEOUT_SECS", 20),
            },
            storage,
            persistence: PersistenceConfig {
                retry_backoff_ms: parse_env("PERSIST_RETRY_BACKOFF_MS", 250),
                presign_ttl_secs: crate::PRESIGN_TTL_SECONDS,
            },
        }
    }
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        ScreeningConfig {
            list_source: ListSourceConfig {
                url: DEFAULT_UN_CONSOLIDATED_URL.to_string(),
                max_age_hours: crate::DEFAULT_LIST_MAX_AGE_HOURS,
                fetch_timeout_secs: 120,
                match_cap: crate::DEFAULT_MATCH_CAP,
            },
            live_source: LiveSourceConfig {
                base_url: DEFAULT_EU_SANCTIONS_BASE_URL.to_string(),
                timeout_secs: crate::DEFAULT_LIVE_QUERY_TIMEOUT_SECONDS,
                autocomplete_limit: 15,
            },
            capture: CaptureConfig {
                render_service_url: None,
                timeout_secs: 60,
            },
            summarizer: SummarizerConfig {
                api_key: None,
                base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
                model: DEFAULT_OPENAI_MODEL.to_string(),
                timeout_secs: 20,
            },
            storage: None,
            persistence: PersistenceConfig {
                retry_backoff_ms: 250,
                presign_ttl_secs: crate::PRESIGN_TTL_SECONDS,
            },
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
