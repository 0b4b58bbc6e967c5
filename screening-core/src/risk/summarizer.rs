//! Narrative generation
//!
//! The summarizer never decides the tier; it only explains a tier the rules already produced.

use crate::config::SummarizerConfig;
use crate::error::{Error, Result};
use crate::types::{Candidate, NarrativeSource, RiskTier, SearchType, SourceReport, SourceStatus};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const MAX_TOKENS: u32 = 300;
const TEMPERATURE: f32 = 0.3;

/// Line prefix the model is asked to use for the narrative
const SUMMARY_PREFIX: &str = "SUMMARY:";

const SYSTEM_PROMPT: &str = "You are a compliance analyst specialised in sanctions screening. \
     Answer in English, factually, without speculation.";

/// Everything a narrative may mention
#[derive(Debug, Clone, Serialize)]
pub struct SummaryInput {
    pub query: String,
    pub search_type: SearchType,
    pub tier: RiskTier,
    pub factors: Vec<String>,
    pub eu: SourceReport,
    pub un: SourceReport,
    pub candidates: Vec<Candidate>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, input: &SummaryInput) -> Result<String>;

    fn source(&self) -> NarrativeSource;
}

/// OpenAI when a usable key is configured, the template otherwise
pub fn summarizer_from_config(config: &SummarizerConfig) -> Result<Arc<dyn Summarizer>> {
    match config.usable_api_key() {
        Some(key) => {
            info!("Summarizer: {} via {}", config.model, config.base_url);
            Ok(Arc::new(OpenAiSummarizer::new(
                config.base_url.clone(),
                key.to_string(),
                config.model.clone(),
                config.timeout_secs,
            )?))
        }
        None => {
            info!("Summarizer: template (no API key configured)");
            Ok(Arc::new(TemplateSummarizer))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiSummarizer {
    base_url: String,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAiSummarizer {
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client,
        })
    }

    fn prompt(input: &SummaryInput) -> String {
        let matches = |report: &SourceReport| {
            if !report.is_available() {
                format!("unavailable ({})", describe_status(&report.status))
            } else if report.matches.is_empty() {
                "no matches".to_string()
            } else {
                report
                    .matches
                    .iter()
                    .map(|m| m.label())
                    .collect::<Vec<_>>()
                    .join("; ")
            }
        };

        format!(
            "Screening query: {}\nType: {}\n\nEU Sanctions Map: {}\nUN Security Council consolidated \
             list: {}\nOther EU name suggestions: {}\n\nRisk tier (already decided): {}\nRules \
             applied: {}\n\nWrite a short summary (2-3 sentences) explaining the result and the \
             recommended action. Do not change the tier.\nFormat:\n{} <your summary>",
            input.query,
            input.search_type,
            matches(&input.eu),
            matches(&input.un),
            if input.candidates.is_empty() {
                "none".to_string()
            } else {
                input
                    .candidates
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            },
            input.tier,
            input.factors.join("; "),
            SUMMARY_PREFIX
        )
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, input: &SummaryInput) -> Result<String> {
        let prompt = Self::prompt(input);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::SummarizationUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::SummarizationUnavailable(format!(
                "completion request returned status {}",
                response.status()
            )));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::SummarizationUnavailable(e.to_string()))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let summary = extract_summary(&content);
        if summary.is_empty() {
            return Err(Error::SummarizationUnavailable(
                "empty completion".to_string(),
            ));
        }

        debug!("Summarizer returned {} characters", summary.len());
        Ok(summary)
    }

    fn source(&self) -> NarrativeSource {
        NarrativeSource::Summarizer
    }
}

/// Text after a `SUMMARY:` line, or the whole reply when there is none
pub fn extract_summary(content: &str) -> String {
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix(SUMMARY_PREFIX))
        .unwrap_or(content)
        .trim()
        .to_string()
}

/// Deterministic narrative
pub struct TemplateSummarizer;

impl TemplateSummarizer {
    pub fn narrative(input: &SummaryInput) -> String {
        let mut sentences = Vec::new();

        let found: Vec<String> = [&input.eu, &input.un]
            .iter()
            .filter(|r| r.found)
            .map(|r| format!("{} ({} match(es))", source_name(r), r.total_matches))
            .collect();

        if found.is_empty() {
            sentences.push(format!(
                "No sanctions matches were found for {} '{}'.",
                input.search_type, input.query
            ));
        } else {
            sentences.push(format!(
                "{} '{}' matched on {}.",
                capitalize(input.search_type.as_str()),
                input.query,
                found.join(" and ")
            ));
        }

        for report in [&input.eu, &input.un] {
            if !report.is_available() {
                sentences.push(format!(
                    "{} could not be checked: {}.",
                    capitalize(source_name(report)),
                    describe_status(&report.status)
                ));
            } else if let SourceStatus::Stale { fetched_at } = &report.status {
                sentences.push(format!(
                    "{} was checked against a snapshot from {}.",
                    capitalize(source_name(report)),
                    fetched_at.format("%Y-%m-%d %H:%M UTC")
                ));
            }
        }

        if !input.candidates.is_empty() && found.is_empty() {
            sentences.push(format!(
                "Similar listed names exist: {}.",
                input
                    .candidates
                    .iter()
                    .take(5)
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        sentences.push(
            match input.tier {
                RiskTier::Critical => {
                    "Risk is CRITICAL: block the relationship and escalate to compliance immediately."
                }
                RiskTier::High => "Risk is HIGH: escalate for manual review before proceeding.",
                RiskTier::Medium => {
                    "Risk is MEDIUM: manual verification is recommended before proceeding."
                }
                RiskTier::Low => "Risk is LOW: no further action is required.",
            }
            .to_string(),
        );

        sentences.join(" ")
    }
}

#[async_trait]
impl Summarizer for TemplateSummarizer {
    async fn summarize(&self, input: &SummaryInput) -> Result<String> {
        Ok(Self::narrative(input))
    }

    fn source(&self) -> NarrativeSource {
        NarrativeSource::Template
    }
}

fn source_name(report: &SourceReport) -> &'static str {
    match report.source {
        crate::types::SourceId::Eu => "the EU Sanctions Map",
        crate::types::SourceId::Un => "the UN consolidated list",
    }
}

pub(crate) fn describe_status(status: &SourceStatus) -> String {
    match status {
        SourceStatus::Ok => "ok".to_string(),
        SourceStatus::Stale { fetched_at } => format!("stale snapshot from {}", fetched_at),
        SourceStatus::Timeout { seconds } => format!("timed out after {}s", seconds),
        SourceStatus::Unavailable { reason } => reason.clone(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
