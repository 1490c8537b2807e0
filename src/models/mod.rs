// src/models/mod.rs

//! Domain models for the harvester.
//!
//! Candidates are what producers hand in, documents are what the store keeps,
//! metrics are what the batch jobs report.

mod candidate;
mod config;
mod document;
mod metrics;

pub use candidate::{CandidateRecord, OaStatus, ValidCandidate, normalize_doi, normalize_title};
pub(crate) use candidate::non_blank;
pub use config::{
    Config, CrawlerConfig, FetcherConfig, HttpConfig, LoggingConfig, ResolverConfig,
    ScoringConfig, StoreConfig,
};
pub use document::{ArtifactUpdate, Document, PdfStatus, VisitedUrl};
pub use metrics::{FetchedItem, LatencySummary, RunMetrics};

/// A stored or configured string that names no known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: '{value}'")]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}
