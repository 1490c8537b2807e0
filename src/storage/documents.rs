//! Queries over the `documents` table.
//!
//! Every function takes a plain `&Connection` so callers can run it either
//! directly or inside a [`Store::transaction`](super::Store::transaction).

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use crate::error::Result;
use crate::models::{ArtifactUpdate, Document};

const COLUMNS: &str = "id, doi, title, title_norm, url_hash, source_url, landing_url, pdf_url, \
    abstract, authors, affiliations, keywords, venue, year, oa_status, relevance_score, \
    keywords_found, local_path, content_path, pdf_status, pdf_fetched_at, file_size, \
    checksum_sha256, http_status, mime_type, source, fetched_at";

/// Filters applied when materialising a fetch batch.
#[derive(Debug, Clone, Default)]
pub struct FetchSelection {
    pub limit: usize,
    /// Restrict to these document ids
    pub ids: Option<Vec<i64>>,
    /// Also re-select documents whose last fetch is older than this
    pub since_days: Option<i64>,
    /// Restrict to one producer tag
    pub source: Option<String>,
}

fn to_json(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn from_json(text: Option<String>) -> Vec<String> {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or_default()
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        doi: row.get(1)?,
        title: row.get(2)?,
        title_norm: row.get(3)?,
        url_hash: row.get(4)?,
        source_url: row.get(5)?,
        landing_url: row.get(6)?,
        pdf_url: row.get(7)?,
        abstract_text: row.get(8)?,
        authors: from_json(row.get(9)?),
        affiliations: from_json(row.get(10)?),
        keywords: from_json(row.get(11)?),
        venue: row.get(12)?,
        year: row.get(13)?,
        oa_status: row
            .get::<_, Option<String>>(14)?
            .and_then(|s| s.parse().ok()),
        relevance_score: row.get(15)?,
        keywords_found: from_json(row.get(16)?),
        local_path: row.get(17)?,
        content_path: row.get(18)?,
        pdf_status: row
            .get::<_, Option<String>>(19)?
            .and_then(|s| s.parse().ok()),
        pdf_fetched_at: row.get(20)?,
        file_size: row.get(21)?,
        checksum_sha256: row.get(22)?,
        http_status: row.get(23)?,
        mime_type: row.get(24)?,
        source: row.get(25)?,
        fetched_at: row.get(26)?,
    })
}

fn find_one(conn: &Connection, column: &str, value: &str) -> Result<Option<Document>> {
    let sql = format!("SELECT {COLUMNS} FROM documents WHERE {column} = ?1 ORDER BY id LIMIT 1");
    Ok(conn
        .query_row(&sql, params![value], row_to_document)
        .optional()?)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Document>> {
    let sql = format!("SELECT {COLUMNS} FROM documents WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], row_to_document).optional()?)
}

pub fn find_by_doi(conn: &Connection, doi: &str) -> Result<Option<Document>> {
    find_one(conn, "doi", doi)
}

pub fn find_by_source_url(conn: &Connection, source_url: &str) -> Result<Option<Document>> {
    find_one(conn, "source_url", source_url)
}

/// Lookup by folded title, served by the `title_norm` index.
pub fn find_by_title_norm(conn: &Connection, title_norm: &str) -> Result<Option<Document>> {
    find_one(conn, "title_norm", title_norm)
}

/// Whether some other document already claims `source_url`.
pub fn source_url_taken(conn: &Connection, source_url: &str, except_id: i64) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE source_url = ?1 AND id != ?2",
        params![source_url, except_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert a new document and return its id.
pub fn insert(conn: &Connection, doc: &Document) -> Result<i64> {
    conn.execute(
        "INSERT INTO documents (
            doi, title, title_norm, url_hash, source_url, landing_url, pdf_url,
            abstract, authors, affiliations, keywords, venue, year, oa_status,
            relevance_score, keywords_found, source, fetched_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            doc.doi,
            doc.title,
            doc.title_norm,
            doc.url_hash,
            doc.source_url,
            doc.landing_url,
            doc.pdf_url,
            doc.abstract_text,
            to_json(&doc.authors),
            to_json(&doc.affiliations),
            to_json(&doc.keywords),
            doc.venue,
            doc.year,
            doc.oa_status.map(|s| s.as_str()),
            doc.relevance_score,
            to_json(&doc.keywords_found),
            doc.source,
            doc.fetched_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Persist the identity, content and scoring fields of a merged document.
pub fn update_metadata(conn: &Connection, doc: &Document) -> Result<()> {
    conn.execute(
        "UPDATE documents SET
            doi = ?2, title = ?3, title_norm = ?4, url_hash = ?5, source_url = ?6,
            landing_url = ?7, pdf_url = ?8, abstract = ?9, authors = ?10,
            affiliations = ?11, keywords = ?12, venue = ?13, year = ?14,
            oa_status = ?15, relevance_score = ?16, keywords_found = ?17, source = ?18
         WHERE id = ?1",
        params![
            doc.id,
            doc.doi,
            doc.title,
            doc.title_norm,
            doc.url_hash,
            doc.source_url,
            doc.landing_url,
            doc.pdf_url,
            doc.abstract_text,
            to_json(&doc.authors),
            to_json(&doc.affiliations),
            to_json(&doc.keywords),
            doc.venue,
            doc.year,
            doc.oa_status.map(|s| s.as_str()),
            doc.relevance_score,
            to_json(&doc.keywords_found),
            doc.source,
        ],
    )?;
    Ok(())
}

/// Overwrite the scorer's output for one document.
pub fn update_relevance(
    conn: &Connection,
    id: i64,
    score: f64,
    keywords_found: &[String],
) -> Result<()> {
    conn.execute(
        "UPDATE documents SET relevance_score = ?2, keywords_found = ?3 WHERE id = ?1",
        params![id, score, to_json(keywords_found)],
    )?;
    Ok(())
}

/// Record the outcome of a fetch attempt.
///
/// Path, size and checksum are only replaced when the update carries them.
pub fn record_artifact(conn: &Connection, id: i64, update: &ArtifactUpdate) -> Result<()> {
    conn.execute(
        "UPDATE documents SET
            pdf_status = ?2,
            pdf_fetched_at = ?3,
            http_status = ?4,
            local_path = COALESCE(?5, local_path),
            file_size = COALESCE(?6, file_size),
            checksum_sha256 = COALESCE(?7, checksum_sha256),
            mime_type = COALESCE(?8, mime_type)
         WHERE id = ?1",
        params![
            id,
            update.pdf_status.as_str(),
            update.fetched_at,
            update.http_status,
            update.local_path,
            update.file_size,
            update.checksum_sha256,
            update.mime_type,
        ],
    )?;
    Ok(())
}

pub fn all(conn: &Connection) -> Result<Vec<Document>> {
    let sql = format!("SELECT {COLUMNS} FROM documents ORDER BY id");
    let mut stmt = conn.prepare(&sql)?;
    let docs = stmt
        .query_map([], row_to_document)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(docs)
}

pub fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
    Ok(count as usize)
}

/// Documents eligible for an artifact fetch, ordered by id.
///
/// Eligible means a `pdf_url` is known and either no local artifact exists
/// or, with `since_days`, the last fetch is older than the window.
pub fn select_fetch_candidates(
    conn: &Connection,
    selection: &FetchSelection,
) -> Result<Vec<Document>> {
    let mut sql = format!(
        "SELECT {COLUMNS} FROM documents WHERE pdf_url IS NOT NULL AND pdf_url != ''"
    );
    let mut args: Vec<Value> = Vec::new();

    match selection.since_days.filter(|d| *d >= 0) {
        Some(days) => {
            let cutoff: DateTime<Utc> = Utc::now() - Duration::days(days);
            args.push(Value::Text(cutoff.to_rfc3339()));
            sql.push_str(&format!(
                " AND (local_path IS NULL OR local_path = '' OR pdf_fetched_at IS NULL \
                 OR datetime(pdf_fetched_at) < datetime(?{}))",
                args.len()
            ));
        }
        None => sql.push_str(" AND (local_path IS NULL OR local_path = '')"),
    }

    if let Some(source) = &selection.source {
        args.push(Value::Text(source.clone()));
        sql.push_str(&format!(" AND source = ?{}", args.len()));
    }

    if let Some(ids) = &selection.ids {
        let start = args.len() + 1;
        let placeholders = (start..start + ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        args.extend(ids.iter().map(|id| Value::Integer(*id)));
        sql.push_str(&format!(" AND id IN ({placeholders})"));
    }

    args.push(Value::Integer(selection.limit as i64));
    sql.push_str(&format!(" ORDER BY id LIMIT ?{}", args.len()));

    let mut stmt = conn.prepare(&sql)?;
    let docs = stmt
        .query_map(params_from_iter(args), row_to_document)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OaStatus, PdfStatus};
    use crate::storage::Store;

    fn doc(doi: Option<&str>, source_url: Option<&str>, pdf_url: Option<&str>) -> Document {
        Document {
            id: 0,
            doi: doi.map(str::to_string),
            title: Some("Sample".into()),
            title_norm: Some("sample".into()),
            url_hash: None,
            source_url: source_url.map(str::to_string),
            landing_url: None,
            pdf_url: pdf_url.map(str::to_string),
            abstract_text: None,
            authors: vec!["Ann Lee".into()],
            affiliations: Vec::new(),
            keywords: Vec::new(),
            venue: None,
            year: Some(2024),
            oa_status: Some(OaStatus::Open),
            relevance_score: None,
            keywords_found: Vec::new(),
            local_path: None,
            content_path: None,
            pdf_status: None,
            pdf_fetched_at: None,
            file_size: None,
            checksum_sha256: None,
            http_status: None,
            mime_type: None,
            source: Some("arxiv".into()),
            fetched_at: None,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let store = Store::in_memory().unwrap();
        store
            .with_conn(|conn| {
                let id = insert(conn, &doc(Some("10.1/a"), Some("https://x.org/a"), None))?;
                let by_doi = find_by_doi(conn, "10.1/a")?.unwrap();
                assert_eq!(by_doi.id, id);
                assert_eq!(by_doi.authors, vec!["Ann Lee".to_string()]);
                assert_eq!(by_doi.oa_status, Some(OaStatus::Open));
                assert!(find_by_source_url(conn, "https://x.org/a")?.is_some());
                assert!(find_by_title_norm(conn, "sample")?.is_some());
                assert!(find_by_doi(conn, "10.1/b")?.is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_record_artifact_keeps_existing_path_on_status_only_update() {
        let store = Store::in_memory().unwrap();
        store
            .with_conn(|conn| {
                let id = insert(conn, &doc(None, None, Some("https://x.org/a.pdf")))?;
                let ok = ArtifactUpdate {
                    pdf_status: PdfStatus::Ok,
                    fetched_at: Utc::now(),
                    http_status: Some(200),
                    local_path: Some("/tmp/a.pdf".into()),
                    file_size: Some(10),
                    checksum_sha256: Some("abc".into()),
                    mime_type: Some("application/pdf".into()),
                };
                record_artifact(conn, id, &ok)?;
                record_artifact(conn, id, &ArtifactUpdate::status_only(PdfStatus::Error, Some(503)))?;

                let stored = get(conn, id)?.unwrap();
                assert_eq!(stored.pdf_status, Some(PdfStatus::Error));
                assert_eq!(stored.http_status, Some(503));
                assert_eq!(stored.local_path.as_deref(), Some("/tmp/a.pdf"));
                assert_eq!(stored.checksum_sha256.as_deref(), Some("abc"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_select_fetch_candidates_filters() {
        let store = Store::in_memory().unwrap();
        store
            .with_conn(|conn| {
                let a = insert(conn, &doc(Some("10.1/a"), None, Some("https://x.org/a.pdf")))?;
                let b = insert(conn, &doc(Some("10.1/b"), None, Some("https://x.org/b.pdf")))?;
                insert(conn, &doc(Some("10.1/c"), None, None))?;
                conn.execute(
                    "UPDATE documents SET local_path = '/tmp/b.pdf', pdf_fetched_at = ?2 WHERE id = ?1",
                    params![b, Utc::now() - Duration::days(10)],
                )?;

                let base = FetchSelection {
                    limit: 10,
                    ..Default::default()
                };
                let ids: Vec<i64> = select_fetch_candidates(conn, &base)?
                    .iter()
                    .map(|d| d.id)
                    .collect();
                assert_eq!(ids, vec![a]);

                let stale = FetchSelection {
                    since_days: Some(5),
                    ..base.clone()
                };
                assert_eq!(select_fetch_candidates(conn, &stale)?.len(), 2);

                let by_id = FetchSelection {
                    ids: Some(vec![b]),
                    since_days: Some(5),
                    ..base.clone()
                };
                let picked = select_fetch_candidates(conn, &by_id)?;
                assert_eq!(picked.len(), 1);
                assert_eq!(picked[0].id, b);

                let other_source = FetchSelection {
                    source: Some("crossref".into()),
                    ..base
                };
                assert!(select_fetch_candidates(conn, &other_source)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
