//! SQLite-backed document store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, Transaction};

use crate::error::{AppError, Result};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doi TEXT,
        title TEXT,
        title_norm TEXT,
        url_hash TEXT,
        source_url TEXT,
        landing_url TEXT,
        pdf_url TEXT,
        abstract TEXT,
        authors TEXT NOT NULL DEFAULT '[]',
        affiliations TEXT NOT NULL DEFAULT '[]',
        keywords TEXT NOT NULL DEFAULT '[]',
        venue TEXT,
        year INTEGER,
        oa_status TEXT,
        relevance_score REAL,
        keywords_found TEXT NOT NULL DEFAULT '[]',
        local_path TEXT,
        content_path TEXT,
        pdf_status TEXT,
        pdf_fetched_at TEXT,
        file_size INTEGER,
        checksum_sha256 TEXT,
        http_status INTEGER,
        mime_type TEXT,
        source TEXT,
        fetched_at TEXT
    );

    -- At most one document per DOI and per source URL (NULLs are distinct)
    CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_doi ON documents(doi);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_source_url ON documents(source_url);
    CREATE INDEX IF NOT EXISTS idx_documents_title_norm ON documents(title_norm);
    CREATE INDEX IF NOT EXISTS idx_documents_pdf_status ON documents(pdf_status);

    CREATE TABLE IF NOT EXISTS visited_urls (
        url TEXT PRIMARY KEY,
        first_seen TEXT NOT NULL,
        last_seen TEXT NOT NULL,
        status TEXT
    );
";

/// Handle to the document store.
///
/// One connection guarded by a mutex; callers never hold the lock across an
/// `.await`.
pub struct Store {
    conn: Mutex<Connection>,
    path: String,
}

impl Store {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, path.to_string_lossy().to_string())
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn init(conn: Connection, path: String) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        log::debug!("Store ready at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::store("connection lock poisoned"))
    }

    /// Run `f` against the connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_schema_and_parent_dir() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/harvest.sqlite");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());

        let tables: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('documents', 'visited_urls')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let store = Store::in_memory().unwrap();
        let result: Result<()> = store.transaction(|tx| {
            tx.execute("INSERT INTO documents (title) VALUES ('x')", [])?;
            Err(AppError::validation("abort"))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_unique_doi_enforced() {
        let store = Store::in_memory().unwrap();
        let result = store.with_conn(|conn| {
            conn.execute("INSERT INTO documents (doi) VALUES ('10.1/a')", [])?;
            conn.execute("INSERT INTO documents (doi) VALUES ('10.1/a')", [])?;
            Ok(())
        });
        assert!(matches!(result, Err(AppError::Database(_))));
    }
}
