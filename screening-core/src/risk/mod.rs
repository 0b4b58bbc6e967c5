//! Risk classification
//!
//! Tier rules:
//! - found on both sources: CRITICAL
//! - found on one source: HIGH
//! - found nowhere, secondary signal present: MEDIUM
//! - otherwise: LOW
//!
//! Secondary signals are a near-miss live-source suggestion sharing a name token with the query,
//! and a source that could not be checked.

pub mod summarizer;

pub use summarizer::{
    summarizer_from_config, OpenAiSummarizer, Summarizer, SummaryInput, TemplateSummarizer,
};

use crate::normalizer::{match_key, NormalizedName};
use crate::types::{Candidate, NarrativeSource, RiskAssessment, RiskTier, SourceReport, Warning};
use std::sync::Arc;
use std::time::Duration;
use summarizer::describe_status;
use tracing::warn;

/// Shortest query token a candidate may share to count as a near miss
pub const MIN_SHARED_TOKEN_LENGTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: RiskTier,
    pub factors: Vec<String>,
}

/// Rule-based tier with the rules that fired
pub fn classify(
    query: &NormalizedName,
    eu: &SourceReport,
    un: &SourceReport,
    candidates: &[Candidate],
) -> Classification {
    let mut factors = Vec::new();

    for report in [eu, un] {
        if report.found {
            factors.push(format!(
                "{} source: {} match(es)",
                report.source, report.total_matches
            ));
        }
    }

    let tier = match (eu.found, un.found) {
        (true, true) => RiskTier::Critical,
        (true, false) | (false, true) => RiskTier::High,
        (false, false) => {
            for candidate in candidates {
                if let Some(token) = shared_token(query, candidate) {
                    factors.push(format!(
                        "EU suggestion '{}' shares name token '{}'",
                        candidate.name, token
                    ));
                }
            }
            for report in [eu, un] {
                if !report.is_available() {
                    factors.push(format!(
                        "{} source not checked: {}",
                        report.source,
                        describe_status(&report.status)
                    ));
                }
            }

            if factors.is_empty() {
                factors.push("No matches on either source".to_string());
                RiskTier::Low
            } else {
                RiskTier::Medium
            }
        }
    };

    Classification { tier, factors }
}

fn shared_token(query: &NormalizedName, candidate: &Candidate) -> Option<String> {
    let candidate_key = match_key(&candidate.name);
    let candidate_tokens: Vec<&str> = candidate_key.split_whitespace().collect();

    query
        .tokens()
        .filter(|t| t.chars().count() >= MIN_SHARED_TOKEN_LENGTH)
        .find(|t| candidate_tokens.contains(t))
        .map(str::to_string)
}

/// Tier plus narrative
pub struct RiskAnalyzer {
    summarizer: Arc<dyn Summarizer>,
    timeout: Duration,
}

impl RiskAnalyzer {
    pub fn new(summarizer: Arc<dyn Summarizer>, timeout: Duration) -> Self {
        Self {
            summarizer,
            timeout,
        }
    }

    /// Assess a merged result. A failing summarizer falls back to the template narrative and
    /// returns a warning.
    pub async fn assess(
        &self,
        query: &NormalizedName,
        eu: &SourceReport,
        un: &SourceReport,
        candidates: &[Candidate],
    ) -> (RiskAssessment, Option<Warning>) {
        let Classification { tier, factors } = classify(query, eu, un, candidates);

        let input = SummaryInput {
            query: query.display.clone(),
            search_type: query.search_type,
            tier,
            factors: factors.clone(),
            eu: eu.clone(),
            un: un.clone(),
            candidates: candidates.to_vec(),
        };

        let outcome = tokio::time::timeout(self.timeout, self.summarizer.summarize(&input)).await;
        let failure = match outcome {
            Ok(Ok(narrative)) if !narrative.trim().is_empty() => {
                return (
                    RiskAssessment {
                        tier,
                        narrative,
                        factors,
                        narrative_source: self.summarizer.source(),
                    },
                    None,
                );
            }
            Ok(Ok(_)) => "summarizer returned an empty narrative".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("summarizer timed out after {:?}", self.timeout),
        };

        warn!("Falling back to template narrative: {}", failure);
        (
            RiskAssessment {
                tier,
                narrative: TemplateSummarizer::narrative(&input),
                factors,
                narrative_source: NarrativeSource::Template,
            },
            Some(Warning::SummarizationUnavailable { reason: failure }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::normalizer::normalize;
    use crate::types::{MatchSet, SearchType, SourceId, SourceMatch, SourceStatus};
    use async_trait::async_trait;

    fn report(source: SourceId, hits: usize) -> SourceReport {
        let matches = (0..hits)
            .map(|i| SourceMatch::PersonMatch {
                name: format!("hit {}", i),
            })
            .collect();
        SourceReport::from_match_set(MatchSet::new(source, matches), SourceStatus::Ok, 1)
    }

    fn name(raw: &str) -> NormalizedName {
        normalize(raw, SearchType::Person).unwrap()
    }

    #[test]
    fn test_tier_rules() {
        let q = name("Ivan Petrov");
        let tier = |eu, un| {
            let (eu, un) = (report(SourceId::Eu, eu), report(SourceId::Un, un));
            classify(&q, &eu, &un, &[]).tier
        };

        assert_eq!(tier(1, 1), RiskTier::Critical);
        assert_eq!(tier(2, 0), RiskTier::High);
        assert_eq!(tier(0, 3), RiskTier::High);
        assert_eq!(tier(0, 0), RiskTier::Low);
    }

    #[test]
    fn test_shared_token_candidate_is_medium() {
        let q = name("Ivan Petrov");
        let candidates = vec![Candidate {
            name: "Sergei PETROV".to_string(),
        }];
        let c = classify(
            &q,
            &report(SourceId::Eu, 0),
            &report(SourceId::Un, 0),
            &candidates,
        );
        assert_eq!(c.tier, RiskTier::Medium);
        assert!(c.factors[0].contains("'petrov'"));
    }

    #[test]
    fn test_short_shared_token_ignored() {
        let q = name("Al Noor");
        let candidates = vec![Candidate {
            name: "Al Qaida".to_string(),
        }];
        let c = classify(
            &q,
            &report(SourceId::Eu, 0),
            &report(SourceId::Un, 0),
            &candidates,
        );
        assert_eq!(c.tier, RiskTier::Low);
    }

    #[test]
    fn test_unavailable_source_is_never_low() {
        let q = name("Ivan Petrov");
        let un = SourceReport::unavailable(
            SourceId::Un,
            SourceStatus::Unavailable {
                reason: "connection refused".to_string(),
            },
            5,
        );
        let c = classify(&q, &report(SourceId::Eu, 0), &un, &[]);
        assert_eq!(c.tier, RiskTier::Medium);
        assert!(c.factors[0].starts_with("UN source not checked"));
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _input: &SummaryInput) -> Result<String> {
            Err(Error::SummarizationUnavailable("HTTP 500".to_string()))
        }

        fn source(&self) -> NarrativeSource {
            NarrativeSource::Summarizer
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl Summarizer for SlowSummarizer {
        async fn summarize(&self, _input: &SummaryInput) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }

        fn source(&self) -> NarrativeSource {
            NarrativeSource::Summarizer
        }
    }

    #[tokio::test]
    async fn test_failed_summarizer_falls_back_to_template() {
        let analyzer = RiskAnalyzer::new(Arc::new(BrokenSummarizer), Duration::from_secs(5));
        let (assessment, warning) = analyzer
            .assess(&name("Ivan Petrov"), &report(SourceId::Eu, 1), &report(SourceId::Un, 0), &[])
            .await;

        assert_eq!(assessment.tier, RiskTier::High);
        assert_eq!(assessment.narrative_source, NarrativeSource::Template);
        assert!(!assessment.narrative.is_empty());
        assert!(matches!(
            warning,
            Some(Warning::SummarizationUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summarizer_timeout_falls_back() {
        let analyzer = RiskAnalyzer::new(Arc::new(SlowSummarizer), Duration::from_secs(20));
        let (assessment, warning) = analyzer
            .assess(&name("Ivan Petrov"), &report(SourceId::Eu, 0), &report(SourceId::Un, 0), &[])
            .await;

        assert_eq!(assessment.tier, RiskTier::Low);
        assert_eq!(assessment.narrative_source, NarrativeSource::Template);
        assert!(warning.is_some());
    }

    #[tokio::test]
    async fn test_template_summarizer_no_warning() {
        let analyzer = RiskAnalyzer::new(Arc::new(TemplateSummarizer), Duration::from_secs(5));
        let (assessment, warning) = analyzer
            .assess(&name("Ivan Petrov"), &report(SourceId::Eu, 1), &report(SourceId::Un, 1), &[])
            .await;

        assert_eq!(assessment.tier, RiskTier::Critical);
        assert!(warning.is_none());
    }
}
