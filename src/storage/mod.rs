use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::info;

use crate::models::NavObservation;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS nav_history (
    SchemeCode  TEXT NOT NULL,
    Date        TEXT NOT NULL,
    NAV         TEXT,
    PRIMARY KEY (SchemeCode, Date)
);

CREATE INDEX IF NOT EXISTS idx_nav_date   ON nav_history (Date);
CREATE INDEX IF NOT EXISTS idx_nav_scheme ON nav_history (SchemeCode);
"#;

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(DDL).context("DDL failed")?;
        Ok(())
    }

    /// Inserts observations with INSERT OR IGNORE; the (SchemeCode, Date)
    /// primary key deduplicates independently of the merge watermark.
    /// Returns the number of rows actually inserted.
    pub fn insert_observations(&self, observations: &[NavObservation]) -> Result<usize> {
        if observations.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO nav_history (SchemeCode, Date, NAV) VALUES (?, ?, ?)",
            )?;
            for obs in observations {
                let n = stmt
                    .execute(params![obs.scheme_code, obs.date.to_string(), obs.nav])
                    .with_context(|| {
                        format!("insert nav {} {}", obs.scheme_code, obs.date)
                    })?;
                inserted += n;
            }
        }
        tx.commit()?;

        info!("SQLite: {} rows inserted", inserted);
        Ok(inserted)
    }

    pub fn row_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM nav_history")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn scheme_count(&self) -> Result<i64> {
        let mut s = self
            .conn
            .prepare("SELECT COUNT(DISTINCT SchemeCode) FROM nav_history")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn date_range(&self) -> Result<(Option<String>, Option<String>)> {
        let mut s = self
            .conn
            .prepare("SELECT MIN(Date), MAX(Date) FROM nav_history")?;
        Ok(s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn obs(code: &str, date: &str, nav: &str) -> NavObservation {
        NavObservation {
            scheme_code: code.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            nav: nav.to_string(),
        }
    }

    #[test]
    fn test_insert_or_ignore_deduplicates() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        let rows = vec![
            obs("100001", "2024-01-01", "10.0"),
            obs("100001", "2024-01-02", "10.5"),
        ];
        assert_eq!(repo.insert_observations(&rows).unwrap(), 2);
        // Re-insert: the primary key rejects both.
        assert_eq!(repo.insert_observations(&rows).unwrap(), 0);
        assert_eq!(repo.row_count().unwrap(), 2);
    }

    #[test]
    fn test_counts_and_range() {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();

        repo.insert_observations(&[
            obs("100001", "2024-01-01", "10.0"),
            obs("100002", "2024-02-01", "20.0"),
        ])
        .unwrap();

        assert_eq!(repo.scheme_count().unwrap(), 2);
        assert_eq!(
            repo.date_range().unwrap(),
            (Some("2024-01-01".into()), Some("2024-02-01".into()))
        );
    }
}
