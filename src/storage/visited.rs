//! The visited-URL ledger.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::models::VisitedUrl;

/// Record a touch of `url`: insert on first sight, refresh otherwise.
pub fn touch(conn: &Connection, url: &str, status: Option<&str>) -> Result<()> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO visited_urls (url, first_seen, last_seen, status)
         VALUES (?1, ?2, ?2, ?3)
         ON CONFLICT(url) DO UPDATE SET
            last_seen = excluded.last_seen,
            status = COALESCE(excluded.status, visited_urls.status)",
        params![url, now, status],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, url: &str) -> Result<Option<VisitedUrl>> {
    Ok(conn
        .query_row(
            "SELECT url, first_seen, last_seen, status FROM visited_urls WHERE url = ?1",
            params![url],
            |row| {
                Ok(VisitedUrl {
                    url: row.get(0)?,
                    first_seen: row.get(1)?,
                    last_seen: row.get(2)?,
                    status: row.get(3)?,
                })
            },
        )
        .optional()?)
}

pub fn contains(conn: &Connection, url: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM visited_urls WHERE url = ?1",
            params![url],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn count(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM visited_urls", [], |row| row.get(0))?;
    Ok(count as usize)
}
