// src/pipeline/ingest.rs

//! Candidate ingestion from JSON-Lines producers.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;

use crate::error::{AppError, Result};
use crate::models::CandidateRecord;
use crate::services::IdentityResolver;
use crate::storage::Store;
use crate::utils::log as console;

/// Streams one [`CandidateRecord`] per non-blank line.
pub struct JsonlReader<R> {
    lines: Lines<BufReader<R>>,
    line_no: usize,
}

impl<R: Read> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: BufReader::new(reader).lines(),
            line_no: 0,
        }
    }
}

impl JsonlReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }
}

impl<R: Read> Iterator for JsonlReader<R> {
    type Item = Result<CandidateRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|e| {
                AppError::validation(format!("line {}: {}", self.line_no, e))
            }));
        }
    }
}

/// Counts for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestStats {
    pub inserted: usize,
    pub merged: usize,
    /// Records without any identifier
    pub skipped: usize,
    /// Lines that did not parse
    pub malformed: usize,
}

/// Resolve every record, one transaction each.
///
/// Unidentifiable records and malformed lines are counted, not fatal.
pub fn ingest<I>(store: &Store, resolver: &IdentityResolver, records: I) -> Result<IngestStats>
where
    I: IntoIterator<Item = Result<CandidateRecord>>,
{
    let mut stats = IngestStats::default();

    for record in records {
        let record = match record {
            Ok(record) => record,
            Err(e @ AppError::Io(_)) => return Err(e),
            Err(e) => {
                log::warn!("Skipping malformed record: {}", e);
                stats.malformed += 1;
                continue;
            }
        };
        let candidate = match record.validate() {
            Ok(candidate) => candidate,
            Err(AppError::ValidationSkipped(reason)) => {
                log::debug!("Skipping candidate: {}", reason);
                stats.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let resolution = resolver.resolve(store, &candidate)?;
        if resolution.is_new {
            stats.inserted += 1;
        } else {
            stats.merged += 1;
            log::debug!(
                "Merged into document {} by {:?}",
                resolution.document.id,
                resolution.matched_by
            );
        }
    }

    Ok(stats)
}

/// Ingest a JSON-Lines file and print a summary.
pub fn run_ingest(store: &Store, resolver: &IdentityResolver, path: &Path) -> Result<IngestStats> {
    console::header(&format!("Ingesting candidates from {}", path.display()));

    let stats = ingest(store, resolver, JsonlReader::open(path)?)?;

    console::summary(
        "Ingest",
        &[
            ("Inserted", stats.inserted.to_string()),
            ("Merged", stats.merged.to_string()),
            ("Skipped", stats.skipped.to_string()),
            ("Malformed", stats.malformed.to_string()),
        ],
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::documents;
    use std::io::Cursor;
    use tempfile::TempDir;

    const FEED: &str = r#"
{"doi": "10.1/ABC ", "title": "Seabed acoustics", "source": "openalex"}
{"doi": "10.1/abc", "abstract": "Sound in sediment.", "source": "crossref"}

{"source_url": "https://example.org/untitled", "source": "crawler"}
not json
{"source_url": "https://lab.example.edu/p/1", "title": "Lab page"}
"#;

    #[test]
    fn test_reader_skips_blank_lines_and_flags_bad_ones() {
        let results: Vec<_> = JsonlReader::new(Cursor::new(FEED)).collect();
        assert_eq!(results.len(), 5);
        assert!(results[3].is_err());
        assert_eq!(
            results[1].as_ref().unwrap().abstract_text.as_deref(),
            Some("Sound in sediment.")
        );
    }

    #[test]
    fn test_ingest_counts() {
        let store = Store::in_memory().unwrap();
        let stats = ingest(
            &store,
            &IdentityResolver::default(),
            JsonlReader::new(Cursor::new(FEED)),
        )
        .unwrap();

        assert_eq!(
            stats,
            IngestStats {
                inserted: 2,
                merged: 1,
                skipped: 1,
                malformed: 1,
            }
        );
        let doc = store
            .with_conn(|c| documents::find_by_doi(c, "10.1/abc"))
            .unwrap()
            .unwrap();
        assert_eq!(doc.title.as_deref(), Some("Seabed acoustics"));
        assert_eq!(doc.abstract_text.as_deref(), Some("Sound in sediment."));
    }

    #[test]
    fn test_ingest_keeps_producer_scores_in_unit_range() {
        let store = Store::in_memory().unwrap();
        let feed = concat!(
            r#"{"doi": "10.1/q", "title": "T", "relevance_score": 5.0}"#,
            "\n",
            r#"{"doi": "10.1/r", "title": "U", "relevance_score": -2.0}"#,
            "\n",
        );
        ingest(
            &store,
            &IdentityResolver::default(),
            JsonlReader::new(Cursor::new(feed)),
        )
        .unwrap();

        let score = |doi: &str| {
            store
                .with_conn(|c| documents::find_by_doi(c, doi))
                .unwrap()
                .unwrap()
                .relevance_score
        };
        assert_eq!(score("10.1/q"), Some(1.0));
        assert_eq!(score("10.1/r"), Some(0.0));
    }

    #[test]
    fn test_run_ingest_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("feed.jsonl");
        std::fs::write(&path, FEED).unwrap();
        let store = Store::in_memory().unwrap();

        let first = run_ingest(&store, &IdentityResolver::default(), &path).unwrap();
        let second = run_ingest(&store, &IdentityResolver::default(), &path).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.merged, 3);
        assert_eq!(store.with_conn(documents::count).unwrap(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let store = Store::in_memory().unwrap();
        let err = run_ingest(
            &store,
            &IdentityResolver::default(),
            Path::new("/nonexistent/feed.jsonl"),
        );
        assert!(err.is_err());
    }
}
