//! Yearly long-form partitions: the per-scheme series split into one
//! `nav_year_<YYYY>.csv` per calendar year, same `SchemeCode,Date,NAV` shape
//! as the combined file.
//!
//! No watermark here; idempotence comes from loading each year file's
//! existing (SchemeCode, Date) pairs and appending only pairs not yet
//! present.

use anyhow::{Context, Result};
use chrono::Datelike;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::NavObservation;

pub const YEAR_HEADER: [&str; 3] = ["SchemeCode", "Date", "NAV"];

pub struct YearPartitioner {
    dir: PathBuf,
}

impl YearPartitioner {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create partition dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("nav_year_{}.csv", year))
    }

    /// (SchemeCode, Date) pairs already materialized for `year`, empty if
    /// the file does not exist yet.
    fn existing_pairs(&self, year: i32) -> Result<HashSet<(String, String)>> {
        let path = self.path_for(year);
        let mut pairs = HashSet::new();
        if !path.exists() {
            return Ok(pairs);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&path)?;
        for record in reader.records() {
            let record = record?;
            let code = record.get(0).unwrap_or_default();
            let date = record.get(1).unwrap_or_default();
            if !code.is_empty() && !date.is_empty() {
                pairs.insert((code.to_string(), date.to_string()));
            }
        }
        Ok(pairs)
    }

    /// Appends the observations for `year` not yet present in its partition
    /// file, grouped by scheme then date. Returns the number of rows added.
    pub fn update(&self, year: i32, observations: &[NavObservation]) -> Result<usize> {
        let existing = self.existing_pairs(year)?;

        let mut new_rows: Vec<&NavObservation> = observations
            .iter()
            .filter(|o| o.date.year() == year)
            .filter(|o| !existing.contains(&(o.scheme_code.clone(), o.date.to_string())))
            .collect();

        if new_rows.is_empty() {
            debug!("{}: partition up to date", year);
            return Ok(0);
        }

        new_rows.sort_by(|a, b| (&a.scheme_code, a.date).cmp(&(&b.scheme_code, b.date)));

        let path = self.path_for(year);
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Could not open {:?} for append", path))?;

        let mut writer = csv::Writer::from_writer(file);
        if is_new {
            writer.write_record(YEAR_HEADER)?;
        }
        for obs in &new_rows {
            writer.write_record([
                obs.scheme_code.as_str(),
                obs.date.to_string().as_str(),
                obs.nav.as_str(),
            ])?;
        }
        writer.flush()?;

        debug!("{}: +{} partition rows", year, new_rows.len());
        Ok(new_rows.len())
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

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|f| f.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_partition_filters_to_year_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let part = YearPartitioner::open(tmp.path()).unwrap();

        let added = part
            .update(
                2024,
                &[
                    obs("100002", "2024-01-01", "20.0"),
                    obs("100001", "2024-01-02", "10.5"),
                    obs("100001", "2024-01-01", "10.0"),
                    obs("100001", "2023-12-29", "9.9"),
                ],
            )
            .unwrap();
        assert_eq!(added, 3);

        let rows = read_rows(&part.path_for(2024));
        assert_eq!(rows[0], vec!["100001", "2024-01-01", "10.0"]);
        assert_eq!(rows[1], vec!["100001", "2024-01-02", "10.5"]);
        assert_eq!(rows[2], vec!["100002", "2024-01-01", "20.0"]);
    }

    #[test]
    fn test_rerun_appends_only_unseen_pairs() {
        let tmp = tempfile::tempdir().unwrap();
        let part = YearPartitioner::open(tmp.path()).unwrap();

        let batch = vec![
            obs("100001", "2024-01-01", "10.0"),
            obs("100001", "2024-01-02", "10.5"),
        ];
        assert_eq!(part.update(2024, &batch).unwrap(), 2);
        assert_eq!(part.update(2024, &batch).unwrap(), 0);

        let mut grown = batch.clone();
        grown.push(obs("100001", "2024-01-03", "10.7"));
        assert_eq!(part.update(2024, &grown).unwrap(), 1);

        let rows = read_rows(&part.path_for(2024));
        assert_eq!(rows.len(), 3);

        let text = std::fs::read_to_string(part.path_for(2024)).unwrap();
        assert_eq!(text.matches("SchemeCode,Date,NAV").count(), 1);
    }
}
