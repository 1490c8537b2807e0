//! Persistent document and visited-URL records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OaStatus, ParseEnumError};

/// Outcome of the most recent artifact fetch for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PdfStatus {
    None,
    DryRun,
    Ok,
    TooLarge,
    NotFound,
    Forbidden,
    Error,
    Timeout,
}

impl PdfStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PdfStatus::None => "none",
            PdfStatus::DryRun => "dry_run",
            PdfStatus::Ok => "ok",
            PdfStatus::TooLarge => "too_large",
            PdfStatus::NotFound => "not_found",
            PdfStatus::Forbidden => "forbidden",
            PdfStatus::Error => "error",
            PdfStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for PdfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PdfStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PdfStatus::None),
            "dry_run" => Ok(PdfStatus::DryRun),
            "ok" => Ok(PdfStatus::Ok),
            "too_large" => Ok(PdfStatus::TooLarge),
            "not_found" => Ok(PdfStatus::NotFound),
            "forbidden" => Ok(PdfStatus::Forbidden),
            "error" => Ok(PdfStatus::Error),
            "timeout" => Ok(PdfStatus::Timeout),
            other => Err(ParseEnumError::new("pdf_status", other)),
        }
    }
}

/// Canonical bibliographic record after identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,

    // Identity
    pub doi: Option<String>,
    pub title: Option<String>,
    pub title_norm: Option<String>,
    pub url_hash: Option<String>,
    pub source_url: Option<String>,
    pub landing_url: Option<String>,
    pub pdf_url: Option<String>,

    // Content
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub affiliations: Vec<String>,
    pub keywords: Vec<String>,
    pub venue: Option<String>,
    pub year: Option<i32>,
    pub oa_status: Option<OaStatus>,

    // Scoring
    pub relevance_score: Option<f64>,
    pub keywords_found: Vec<String>,

    // Artifact
    pub local_path: Option<String>,
    /// Extracted full text produced by an external parser
    pub content_path: Option<String>,
    pub pdf_status: Option<PdfStatus>,
    pub pdf_fetched_at: Option<DateTime<Utc>>,
    pub file_size: Option<i64>,
    pub checksum_sha256: Option<String>,
    pub http_status: Option<u16>,
    pub mime_type: Option<String>,

    // Provenance
    pub source: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Document {
    /// URL used to derive `url_hash`: pdf, then landing, then source.
    pub fn hash_url(&self) -> Option<&str> {
        self.pdf_url
            .as_deref()
            .or(self.landing_url.as_deref())
            .or(self.source_url.as_deref())
    }

    /// Whether a local artifact is recorded for this document.
    pub fn has_artifact(&self) -> bool {
        self.local_path.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Result of a single artifact fetch attempt, written back to a document.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactUpdate {
    pub pdf_status: PdfStatus,
    pub fetched_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub local_path: Option<String>,
    pub file_size: Option<i64>,
    pub checksum_sha256: Option<String>,
    pub mime_type: Option<String>,
}

impl ArtifactUpdate {
    /// An update that records a status without any persisted file.
    pub fn status_only(pdf_status: PdfStatus, http_status: Option<u16>) -> Self {
        Self {
            pdf_status,
            fetched_at: Utc::now(),
            http_status,
            local_path: None,
            file_size: None,
            checksum_sha256: None,
            mime_type: None,
        }
    }
}

/// Entry of the visited-URL ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedUrl {
    pub url: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: Option<String>,
}
