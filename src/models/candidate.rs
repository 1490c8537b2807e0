//! Candidate records yielded by producers before identity resolution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::ParseEnumError;

/// Open-access status reported by a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OaStatus {
    Open,
    FulltextPdf,
    AbstractOnly,
    Closed,
}

impl OaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OaStatus::Open => "open",
            OaStatus::FulltextPdf => "fulltext_pdf",
            OaStatus::AbstractOnly => "abstract_only",
            OaStatus::Closed => "closed",
        }
    }

    /// Statuses that indicate the full text is reachable.
    pub fn is_full_access(&self) -> bool {
        matches!(self, OaStatus::Open | OaStatus::FulltextPdf)
    }

    /// Whether `new` should replace `current` during a merge.
    pub fn should_upgrade(current: Option<OaStatus>, new: OaStatus) -> bool {
        new.is_full_access()
            && matches!(
                current,
                None | Some(OaStatus::Closed) | Some(OaStatus::AbstractOnly)
            )
    }
}

impl fmt::Display for OaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OaStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "open" => Ok(OaStatus::Open),
            "fulltext_pdf" => Ok(OaStatus::FulltextPdf),
            "abstract_only" => Ok(OaStatus::AbstractOnly),
            "closed" => Ok(OaStatus::Closed),
            other => Err(ParseEnumError::new("oa_status", other)),
        }
    }
}

/// Normalized metadata record produced by a source adapter or the crawler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default)]
    pub doi: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub affiliations: Vec<String>,

    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub venue: Option<String>,

    #[serde(default)]
    pub year: Option<i32>,

    #[serde(default)]
    pub source_url: Option<String>,

    #[serde(default)]
    pub landing_url: Option<String>,

    #[serde(default)]
    pub pdf_url: Option<String>,

    #[serde(default)]
    pub oa_status: Option<OaStatus>,

    /// Producer tag (e.g. "crossref", "crawler")
    #[serde(default)]
    pub source: Option<String>,

    /// Score computed by the producer, if any
    #[serde(default)]
    pub relevance_score: Option<f64>,

    #[serde(default)]
    pub keywords_found: Vec<String>,
}

impl CandidateRecord {
    /// Trimmed, lowercased DOI, or `None` when blank.
    pub fn normalized_doi(&self) -> Option<String> {
        self.doi.as_deref().and_then(normalize_doi)
    }

    /// Trimmed source URL, or `None` when blank.
    pub fn normalized_source_url(&self) -> Option<String> {
        non_blank(self.source_url.as_deref())
    }

    /// Check that the record can identify a document.
    ///
    /// A producer score is clamped to `[0, 1]`; non-finite scores are dropped.
    pub fn validate(mut self) -> Result<ValidCandidate> {
        let has_title = non_blank(self.title.as_deref()).is_some();
        if !has_title && self.normalized_doi().is_none() {
            let hint = self
                .source_url
                .clone()
                .unwrap_or_else(|| "<no source_url>".to_string());
            return Err(AppError::ValidationSkipped(format!(
                "missing title and doi ({hint})"
            )));
        }
        self.relevance_score = self
            .relevance_score
            .filter(|score| score.is_finite())
            .map(|score| score.clamp(0.0, 1.0));
        Ok(ValidCandidate(self))
    }
}

/// A candidate that carries at least a title or a DOI.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidCandidate(CandidateRecord);

impl std::ops::Deref for ValidCandidate {
    type Target = CandidateRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Trim and lowercase a DOI.
pub fn normalize_doi(doi: &str) -> Option<String> {
    let doi = doi.trim().to_lowercase();
    (!doi.is_empty()).then_some(doi)
}

/// Lowercase and collapse whitespace for title comparison.
pub fn normalize_title(title: &str) -> Option<String> {
    let folded = title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    (!folded.is_empty()).then_some(folded)
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
