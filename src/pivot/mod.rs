//! Wide-matrix builder: long-form observations → one date × scheme CSV per
//! calendar year.
//!
//! Columns are the sorted union of every scheme code ever seen for that year;
//! once introduced a column is never removed. New dates append; a grown column
//! set forces a structural rewrite of the whole year file (through a temp file
//! and rename) with empty cells backfilled into pre-existing rows.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::EtlError;
use crate::models::NavObservation;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MatrixUpdate {
    pub year: i32,
    pub rewritten: bool,
    pub rows_appended: usize,
    pub columns: usize,
}

pub struct WideMatrixBuilder {
    dir: PathBuf,
}

impl WideMatrixBuilder {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create matrix dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("nav_wide_{}.csv", year))
    }

    /// Scheme-code columns of the persisted matrix for `year`, empty if the
    /// file does not exist yet.
    pub fn existing_columns(&self, year: i32) -> Result<Vec<String>> {
        let path = self.path_for(year);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let header = reader.headers()?;
        Ok(header.iter().skip(1).map(|s| s.to_string()).collect())
    }

    /// Date of the last materialized row, `None` for a missing/empty matrix.
    pub fn last_date(&self, year: i32) -> Result<Option<NaiveDate>> {
        let path = self.path_for(year);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut last = None;
        for record in reader.records() {
            let record = record?;
            if let Some(d) = record.get(0) {
                last = Some(d.to_string());
            }
        }
        Ok(last.as_deref().and_then(crate::models::parse_iso_date))
    }

    /// Updates the matrix for `year` with observations from that year.
    ///
    /// Incoming dates at or before the last materialized row are discarded,
    /// which makes re-runs over the same long-form data idempotent.
    pub fn update(
        &self,
        year: i32,
        all_known_schemes: &BTreeSet<String>,
        observations: &[NavObservation],
    ) -> Result<MatrixUpdate> {
        let path = self.path_for(year);
        let existing: BTreeSet<String> = self.existing_columns(year)?.into_iter().collect();

        let mut union: BTreeSet<String> = existing.clone();
        union.extend(all_known_schemes.iter().cloned());
        for obs in observations {
            union.insert(obs.scheme_code.clone());
        }

        let last = self.last_date(year)?;

        // Group strictly-new observations by date.
        let mut by_date: BTreeMap<NaiveDate, HashMap<&str, &str>> = BTreeMap::new();
        for obs in observations {
            if obs.date.year() != year {
                continue;
            }
            if let Some(last) = last {
                if obs.date <= last {
                    debug!("{}: {} already materialized, dropping", year, obs.date);
                    continue;
                }
            }
            by_date
                .entry(obs.date)
                .or_default()
                .insert(obs.scheme_code.as_str(), obs.nav.as_str());
        }

        let needs_rewrite = path.exists() && union.len() > existing.len();

        let update = if needs_rewrite {
            self.rewrite(year, &path, &union, last, &by_date)?
        } else {
            self.append(year, &path, &union, last, &by_date)?
        };

        info!(
            "{}: {} columns, +{} rows{}",
            year,
            update.columns,
            update.rows_appended,
            if update.rewritten { " (header rewritten)" } else { "" },
        );
        Ok(update)
    }

    /// Append path: creates the file (with header) if missing, then adds one
    /// row per new date.
    fn append(
        &self,
        year: i32,
        path: &Path,
        columns: &BTreeSet<String>,
        last: Option<NaiveDate>,
        by_date: &BTreeMap<NaiveDate, HashMap<&str, &str>>,
    ) -> Result<MatrixUpdate> {
        let is_new = !path.exists();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Could not open {:?} for append", path))?;
        let mut writer = csv::Writer::from_writer(file);

        if is_new {
            write_header(&mut writer, columns)?;
        }

        let appended = emit_rows(&mut writer, year, columns, last, by_date)?;
        writer.flush()?;

        Ok(MatrixUpdate {
            year,
            rewritten: false,
            rows_appended: appended,
            columns: columns.len(),
        })
    }

    /// Structural rewrite: re-emits every existing row under the expanded
    /// header, empty cells in the newly introduced columns, then the new rows.
    fn rewrite(
        &self,
        year: i32,
        path: &Path,
        columns: &BTreeSet<String>,
        last: Option<NaiveDate>,
        by_date: &BTreeMap<NaiveDate, HashMap<&str, &str>>,
    ) -> Result<MatrixUpdate> {
        let tmp = path.with_extension("csv.tmp");

        let mut reader = csv::Reader::from_path(path)?;
        let old_columns: Vec<String> =
            reader.headers()?.iter().skip(1).map(|s| s.to_string()).collect();

        let mut writer = csv::Writer::from_path(&tmp)
            .with_context(|| format!("Could not create {:?}", tmp))?;
        write_header(&mut writer, columns)?;

        for record in reader.records() {
            let record = record?;
            let date = record.get(0).unwrap_or_default().to_string();

            let mut cells: HashMap<&str, &str> = HashMap::new();
            for (i, code) in old_columns.iter().enumerate() {
                if let Some(v) = record.get(i + 1) {
                    cells.insert(code.as_str(), v);
                }
            }

            let mut row = Vec::with_capacity(columns.len() + 1);
            row.push(date.as_str());
            for code in columns {
                row.push(cells.get(code.as_str()).copied().unwrap_or(""));
            }
            writer.write_record(&row)?;
        }

        let appended = emit_rows(&mut writer, year, columns, last, by_date)?;
        writer.flush()?;

        std::fs::rename(&tmp, path)
            .with_context(|| format!("Could not rename {:?} over {:?}", tmp, path))?;

        Ok(MatrixUpdate {
            year,
            rewritten: true,
            rows_appended: appended,
            columns: columns.len(),
        })
    }
}

/// Loads every stored observation grouped by calendar year, plus the full
/// scheme universe, for feeding [`WideMatrixBuilder::update`]. Rows with
/// non-ISO dates are skipped.
pub fn load_observations_by_year(
    store: &crate::store::SeriesStore,
) -> Result<(BTreeSet<String>, BTreeMap<i32, Vec<NavObservation>>)> {
    let mut schemes = BTreeSet::new();
    let mut by_year: BTreeMap<i32, Vec<NavObservation>> = BTreeMap::new();

    for scheme_code in store.list_schemes()? {
        schemes.insert(scheme_code.clone());
        let rows = match store.read_all(&scheme_code) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("{}: {:#}", scheme_code, e);
                continue;
            }
        };
        for row in rows {
            let Some(date) = crate::models::parse_iso_date(&row.date) else {
                continue;
            };
            by_year.entry(date.year()).or_default().push(NavObservation {
                scheme_code: scheme_code.clone(),
                date,
                nav: row.nav,
            });
        }
    }

    Ok((schemes, by_year))
}

fn write_header<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    columns: &BTreeSet<String>,
) -> Result<()> {
    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push("Date");
    header.extend(columns.iter().map(|s| s.as_str()));
    writer.write_record(&header)?;
    Ok(())
}

/// Emits one row per date, ascending, one cell per column. A date at or
/// before the already-materialized tail is a structural violation here: the
/// caller filters them, so hitting one means the matrix was modified under us.
fn emit_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    year: i32,
    columns: &BTreeSet<String>,
    last: Option<NaiveDate>,
    by_date: &BTreeMap<NaiveDate, HashMap<&str, &str>>,
) -> Result<usize> {
    let mut appended = 0usize;

    for (date, daily) in by_date {
        if let Some(last) = last {
            if *date <= last {
                return Err(EtlError::StaleMatrixDate {
                    year,
                    last,
                    date: *date,
                }
                .into());
            }
        }

        let date_str = date.to_string();
        let mut row = Vec::with_capacity(columns.len() + 1);
        row.push(date_str.as_str());
        for code in columns {
            row.push(daily.get(code.as_str()).copied().unwrap_or(""));
        }
        writer.write_record(&row)?;
        appended += 1;
    }

    Ok(appended)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
