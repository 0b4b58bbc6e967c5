//! # Sanctions Screening Core
//!
//! Screens a person or entity name against two sanctions sources and produces an auditable
//! result:
//! - EU Sanctions Map, queried live per search
//! - UN Security Council consolidated list, cached in memory with a daily refresh
//! - Rule-based risk tier with a generated or template narrative
//! - Evidence bundle (page capture, raw data, summary, hash-chained audit log) in object storage
//!   with presigned links
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               SearchOrchestrator                     │
//! └───────┬───────────────────┬──────────────────────────┘
//!         │ join              │
//! ┌───────▼────────┐  ┌───────▼─────────────┐
//! │  LiveSource    │  │ ConsolidatedList    │
//! │ (EU map)       │  │ Cache (UN XML)      │
//! └───────┬────────┘  └───────┬─────────────┘
//!         └─────────┬─────────┘
//!           ┌───────▼────────┐
//!           │  RiskAnalyzer  │──── Summarizer (OpenAI | template)
//!           └───────┬────────┘
//!           ┌───────▼────────┐
//!           │ EvidenceStore  │──── ObjectStore (S3 | memory)
//!           │ + AuditLogger  │
//!           └────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod evidence;
pub mod list_cache;
pub mod live_source;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod risk;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ScreeningConfig;
pub use error::{Error, Result};
pub use orchestrator::{Components, HealthReport, SearchOrchestrator, Timeouts};
pub use types::*;

/// Lifetime of every presigned evidence link (seconds)
pub const PRESIGN_TTL_SECONDS: u64 = 3600;

/// Most UN list matches returned per search
pub const DEFAULT_MATCH_CAP: usize = 5;

/// Consolidated list refresh window (hours)
pub const DEFAULT_LIST_MAX_AGE_HOURS: i64 = 24;

/// Live source timeout (seconds)
pub const DEFAULT_LIVE_QUERY_TIMEOUT_SECONDS: u64 = 10;
