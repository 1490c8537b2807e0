//! Identity resolution: decide whether a candidate is new or a duplicate and
//! merge it into the store.

use std::fmt;

use chrono::Utc;
use rusqlite::Connection;
use sha1::{Digest, Sha1};

use crate::error::Result;
use crate::models::{
    CandidateRecord, Document, OaStatus, ResolverConfig, ValidCandidate, non_blank,
    normalize_doi, normalize_title,
};
use crate::storage::{Store, documents};

/// Which key matched an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedBy {
    Doi,
    SourceUrl,
    Title,
}

impl fmt::Display for MatchedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MatchedBy::Doi => "doi",
            MatchedBy::SourceUrl => "source_url",
            MatchedBy::Title => "title",
        })
    }
}

/// Outcome of resolving one candidate.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub document: Document,
    pub is_new: bool,
    pub matched_by: Option<MatchedBy>,
}

/// SHA-1 hex digest of a URL.
pub fn url_hash(url: &str) -> String {
    hex::encode(Sha1::digest(url.as_bytes()))
}

/// Insert-or-merge resolver over the document store.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolver {
    match_title: bool,
}

impl IdentityResolver {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            match_title: config.match_title,
        }
    }

    pub fn with_title_matching(mut self, enabled: bool) -> Self {
        self.match_title = enabled;
        self
    }

    /// Resolve `candidate` in its own transaction.
    pub fn resolve(&self, store: &Store, candidate: &ValidCandidate) -> Result<Resolution> {
        store.transaction(|tx| self.resolve_in(tx, candidate))
    }

    /// Resolve `candidate` on a caller-provided connection or transaction.
    pub fn resolve_in(&self, conn: &Connection, candidate: &ValidCandidate) -> Result<Resolution> {
        match self.find_existing(conn, candidate)? {
            Some((mut existing, matched_by)) => {
                merge(conn, &mut existing, candidate)?;
                documents::update_metadata(conn, &existing)?;
                log::debug!("Merged candidate into document {} by {}", existing.id, matched_by);
                Ok(Resolution {
                    document: existing,
                    is_new: false,
                    matched_by: Some(matched_by),
                })
            }
            None => {
                let mut document = new_document(candidate);
                document.id = documents::insert(conn, &document)?;
                log::debug!("Inserted document {}", document.id);
                Ok(Resolution {
                    document,
                    is_new: true,
                    matched_by: None,
                })
            }
        }
    }

    fn find_existing(
        &self,
        conn: &Connection,
        candidate: &CandidateRecord,
    ) -> Result<Option<(Document, MatchedBy)>> {
        if let Some(doi) = candidate.normalized_doi() {
            if let Some(doc) = documents::find_by_doi(conn, &doi)? {
                return Ok(Some((doc, MatchedBy::Doi)));
            }
        }

        if let Some(url) = candidate.normalized_source_url() {
            if let Some(doc) = documents::find_by_source_url(conn, &url)? {
                return Ok(Some((doc, MatchedBy::SourceUrl)));
            }
        }

        if self.match_title {
            if let Some(title) = candidate.title.as_deref().and_then(normalize_title) {
                if let Some(doc) = documents::find_by_title_norm(conn, &title)? {
                    return Ok(Some((doc, MatchedBy::Title)));
                }
            }
        }

        Ok(None)
    }
}

fn new_document(candidate: &CandidateRecord) -> Document {
    let title = non_blank(candidate.title.as_deref());
    let mut doc = Document {
        id: 0,
        doi: candidate.normalized_doi(),
        title_norm: title.as_deref().and_then(normalize_title),
        title,
        url_hash: None,
        source_url: candidate.normalized_source_url(),
        landing_url: non_blank(candidate.landing_url.as_deref()),
        pdf_url: non_blank(candidate.pdf_url.as_deref()),
        abstract_text: non_blank(candidate.abstract_text.as_deref()),
        authors: candidate.authors.clone(),
        affiliations: candidate.affiliations.clone(),
        keywords: candidate.keywords.clone(),
        venue: non_blank(candidate.venue.as_deref()),
        year: candidate.year,
        oa_status: candidate.oa_status,
        relevance_score: candidate.relevance_score,
        keywords_found: candidate.keywords_found.clone(),
        local_path: None,
        content_path: None,
        pdf_status: None,
        pdf_fetched_at: None,
        file_size: None,
        checksum_sha256: None,
        http_status: None,
        mime_type: None,
        source: non_blank(candidate.source.as_deref()),
        fetched_at: Some(Utc::now()),
    };
    doc.url_hash = doc.hash_url().map(url_hash);
    doc
}

fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

fn fill_vec(slot: &mut Vec<String>, value: &[String]) {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_vec();
    }
}

/// Fill-if-empty merge of `candidate` into `existing`.
///
/// Unique keys (DOI, source URL) are only filled when no other document
/// claims them. `relevance_score` keeps the maximum, `keywords_found` is
/// unioned, and `oa_status` only moves towards full access.
fn merge(conn: &Connection, existing: &mut Document, candidate: &CandidateRecord) -> Result<()> {
    if existing.doi.is_none() {
        if let Some(doi) = candidate.doi.as_deref().and_then(normalize_doi) {
            if documents::find_by_doi(conn, &doi)?.is_none() {
                existing.doi = Some(doi);
            }
        }
    }
    if existing.source_url.is_none() {
        if let Some(url) = candidate.normalized_source_url() {
            if !documents::source_url_taken(conn, &url, existing.id)? {
                existing.source_url = Some(url);
            }
        }
    }

    if existing.title.is_none() {
        existing.title = non_blank(candidate.title.as_deref());
        existing.title_norm = existing.title.as_deref().and_then(normalize_title);
    }
    fill(&mut existing.landing_url, non_blank(candidate.landing_url.as_deref()));
    fill(&mut existing.pdf_url, non_blank(candidate.pdf_url.as_deref()));
    fill(&mut existing.abstract_text, non_blank(candidate.abstract_text.as_deref()));
    fill(&mut existing.venue, non_blank(candidate.venue.as_deref()));
    fill(&mut existing.year, candidate.year);
    fill(&mut existing.source, non_blank(candidate.source.as_deref()));
    fill_vec(&mut existing.authors, &candidate.authors);
    fill_vec(&mut existing.affiliations, &candidate.affiliations);
    fill_vec(&mut existing.keywords, &candidate.keywords);

    existing.relevance_score = match (existing.relevance_score, candidate.relevance_score) {
        (Some(old), Some(new)) => Some(old.max(new)),
        (old, new) => old.or(new),
    };

    for keyword in &candidate.keywords_found {
        if !existing.keywords_found.contains(keyword) {
            existing.keywords_found.push(keyword.clone());
        }
    }
    existing.keywords_found.sort();

    if let Some(new) = candidate.oa_status {
        if OaStatus::should_upgrade(existing.oa_status, new) {
            existing.oa_status = Some(new);
        }
    }

    if existing.url_hash.is_none() {
        existing.url_hash = existing.hash_url().map(url_hash);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(f: impl FnOnce(&mut CandidateRecord)) -> ValidCandidate {
        let mut record = CandidateRecord::default();
        f(&mut record);
        record.validate().unwrap()
    }

    #[test]
    fn test_doi_dedup_fills_only_empty_fields() {
        let store = Store::in_memory().unwrap();
        let resolver = IdentityResolver::default();

        let first = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/ABC ".into());
                    c.title = Some("X".into());
                }),
            )
            .unwrap();
        assert!(first.is_new);

        let second = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/abc".into());
                    c.title = Some("X-updated".into());
                    c.abstract_text = Some("new".into());
                }),
            )
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(second.matched_by, Some(MatchedBy::Doi));
        assert_eq!(second.document.id, first.document.id);

        let all = store.with_conn(documents::all).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].doi.as_deref(), Some("10.1/abc"));
        assert_eq!(all[0].title.as_deref(), Some("X"));
        assert_eq!(all[0].abstract_text.as_deref(), Some("new"));
    }

    #[test]
    fn test_source_url_match_and_url_hash() {
        let store = Store::in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let url = "https://lab.example.edu/pub/1";

        let first = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.title = Some("Paper".into());
                    c.source_url = Some(url.into());
                }),
            )
            .unwrap();
        assert_eq!(first.document.url_hash, Some(url_hash(url)));

        let second = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.title = Some("Paper (v2)".into());
                    c.source_url = Some(url.into());
                    c.doi = Some("10.9/P".into());
                }),
            )
            .unwrap();
        assert_eq!(second.matched_by, Some(MatchedBy::SourceUrl));
        assert_eq!(second.document.doi.as_deref(), Some("10.9/p"));
        assert_eq!(second.document.title.as_deref(), Some("Paper"));
    }

    #[test]
    fn test_title_matching_is_opt_in() {
        let store = Store::in_memory().unwrap();
        let first = candidate(|c| c.title = Some("Deep  Learning for Sonar".into()));
        let second = candidate(|c| c.title = Some("deep learning FOR sonar".into()));

        let plain = IdentityResolver::default();
        plain.resolve(&store, &first).unwrap();
        assert!(plain.resolve(&store, &second).unwrap().is_new);

        let store = Store::in_memory().unwrap();
        let titled = IdentityResolver::default().with_title_matching(true);
        titled.resolve(&store, &first).unwrap();
        let res = titled.resolve(&store, &second).unwrap();
        assert!(!res.is_new);
        assert_eq!(res.matched_by, Some(MatchedBy::Title));
    }

    #[test]
    fn test_relevance_max_keywords_union_and_oa_upgrade() {
        let store = Store::in_memory().unwrap();
        let resolver = IdentityResolver::default();

        resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/z".into());
                    c.relevance_score = Some(0.7);
                    c.keywords_found = vec!["sonar".into()];
                    c.oa_status = Some(OaStatus::AbstractOnly);
                }),
            )
            .unwrap();
        let merged = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/Z".into());
                    c.relevance_score = Some(0.4);
                    c.keywords_found = vec!["acoustic".into(), "sonar".into()];
                    c.oa_status = Some(OaStatus::FulltextPdf);
                }),
            )
            .unwrap()
            .document;

        assert_eq!(merged.relevance_score, Some(0.7));
        assert_eq!(merged.keywords_found, vec!["acoustic", "sonar"]);
        assert_eq!(merged.oa_status, Some(OaStatus::FulltextPdf));

        let downgraded = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/z".into());
                    c.oa_status = Some(OaStatus::Closed);
                }),
            )
            .unwrap()
            .document;
        assert_eq!(downgraded.oa_status, Some(OaStatus::FulltextPdf));
    }

    #[test]
    fn test_merge_does_not_steal_claimed_source_url() {
        let store = Store::in_memory().unwrap();
        let resolver = IdentityResolver::default();
        let url = "https://x.org/other";
        resolver
            .resolve(&store, &candidate(|c| c.doi = Some("10.1/a".into())))
            .unwrap();
        resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.title = Some("Other".into());
                    c.source_url = Some(url.into());
                }),
            )
            .unwrap();

        // Matches the first document by DOI but carries the second's source URL.
        let res = resolver
            .resolve(
                &store,
                &candidate(|c| {
                    c.doi = Some("10.1/a".into());
                    c.source_url = Some(url.into());
                }),
            )
            .unwrap();
        assert_eq!(res.matched_by, Some(MatchedBy::Doi));
        assert!(res.document.source_url.is_none());
        assert_eq!(store.with_conn(documents::count).unwrap(), 2);
    }
}
