//! Per-scheme NAV series store.
//!
//! One CSV per scheme under `nav_history/`, named `<SchemeCode>.csv`, header
//! `Date,NAV`, rows appended oldest-first. Callers are responsible for
//! filtering to strictly-new dates and pre-sorting before [`SeriesStore::append`];
//! the store itself only appends in the order given.

pub mod watermark;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::parse_iso_date;

pub const SERIES_HEADER: [&str; 2] = ["Date", "NAV"];

/// A raw stored row, fields as persisted (date not yet validated).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRow {
    pub date: String,
    pub nav: String,
}

pub struct SeriesStore {
    dir: PathBuf,
}

impl SeriesStore {
    /// Opens (and creates if needed) the per-scheme series directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create series dir {:?}", dir))?;
        Ok(Self { dir })
    }

    fn path_for(&self, scheme_code: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", scheme_code))
    }

    pub fn exists(&self, scheme_code: &str) -> bool {
        self.path_for(scheme_code).exists()
    }

    /// Scheme codes present on disk, sorted for deterministic processing order.
    pub fn list_schemes(&self) -> Result<Vec<String>> {
        let mut codes = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|e| e == "csv").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    codes.push(stem.to_string());
                }
            }
        }
        codes.sort();
        Ok(codes)
    }

    /// Appends pre-sorted rows, writing the header iff the file is new.
    ///
    /// NAV values are passed through unvalidated.
    pub fn append(&self, scheme_code: &str, rows: &[(NaiveDate, String)]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let path = self.path_for(scheme_code);
        let is_new = !path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Could not open {:?} for append", path))?;

        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(SERIES_HEADER)?;
        }
        for (date, nav) in rows {
            writer.write_record([date.to_string().as_str(), nav.as_str()])?;
        }
        writer.flush()?;

        debug!("{}: appended {} rows", scheme_code, rows.len());
        Ok(rows.len())
    }

    /// All stored rows for a scheme, raw. Dates are returned unparsed so the
    /// merger can count (rather than silently drop) malformed ones.
    pub fn read_all(&self, scheme_code: &str) -> Result<Vec<SeriesRow>> {
        let path = self.path_for(scheme_code);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)
            .with_context(|| format!("Could not read {:?}", path))?;

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(SeriesRow {
                date: record.get(0).unwrap_or_default().to_string(),
                nav: record.get(1).unwrap_or_default().to_string(),
            });
        }
        Ok(rows)
    }

    /// The "get latest observation" contract: the date of the last stored row,
    /// or `None` for a missing/empty series.
    pub fn latest_date(&self, scheme_code: &str) -> Result<Option<NaiveDate>> {
        let path = self.path_for(scheme_code);
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;

        let mut last = None;
        for record in reader.records() {
            let record = record?;
            if let Some(d) = record.get(0) {
                last = Some(d.to_string());
            }
        }
        Ok(last.as_deref().and_then(parse_iso_date))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_iso_date(s).unwrap()
    }

    #[test]
    fn test_append_writes_header_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SeriesStore::open(tmp.path()).unwrap();

        store
            .append("100001", &[(d("2024-01-01"), "10.0".into())])
            .unwrap();
        store
            .append("100001", &[(d("2024-01-02"), "10.5".into())])
            .unwrap();

        let text = std::fs::read_to_string(tmp.path().join("100001.csv")).unwrap();
        assert_eq!(text.matches("Date,NAV").count(), 1);

        let rows = store.read_all("100001").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].nav, "10.5");
    }

    #[test]
    fn test_latest_date_is_last_row() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SeriesStore::open(tmp.path()).unwrap();

        assert_eq!(store.latest_date("100001").unwrap(), None);

        store
            .append(
                "100001",
                &[
                    (d("2024-01-01"), "10.0".into()),
                    (d("2024-01-02"), "10.5".into()),
                ],
            )
            .unwrap();

        assert_eq!(store.latest_date("100001").unwrap(), Some(d("2024-01-02")));
    }

    #[test]
    fn test_list_schemes_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SeriesStore::open(tmp.path()).unwrap();

        store.append("100300", &[(d("2024-01-01"), "1".into())]).unwrap();
        store.append("100001", &[(d("2024-01-01"), "2".into())]).unwrap();
        store.append("100200", &[(d("2024-01-01"), "3".into())]).unwrap();

        assert_eq!(
            store.list_schemes().unwrap(),
            vec!["100001", "100200", "100300"]
        );
    }

    #[test]
    fn test_nav_passed_through_unvalidated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SeriesStore::open(tmp.path()).unwrap();

        store
            .append("100001", &[(d("2024-01-01"), "N.A.".into())])
            .unwrap();
        assert_eq!(store.read_all("100001").unwrap()[0].nav, "N.A.");
    }
}
