//! Incremental merger: per-scheme series → one combined long-form CSV.
//!
//! ## Run modes
//!
//! `run()` picks the mode: a full rebuild when the combined file or the
//! watermark index is missing (or when forced), otherwise an incremental
//! catch-up that only scans each scheme's unseen tail.
//!
//! Idempotent: re-running incremental merge over unchanged source files
//! appends zero rows. The watermark for a scheme is persisted (atomic
//! replace) only after that scheme's rows are flushed to the combined file.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::store::watermark::WatermarkIndex;
use crate::store::SeriesStore;

pub const COMBINED_HEADER: [&str; 3] = ["SchemeCode", "Date", "NAV"];

/// Per-scheme result of a merge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    UpToDate,
    Appended { rows: usize },
    /// I/O failure reading this scheme's source file; its watermark is left
    /// unchanged so no data is lost.
    SourceError(String),
}

#[derive(Debug, Default)]
pub struct MergeStats {
    pub schemes: usize,
    pub rows_written: usize,
    pub up_to_date: usize,
    pub rows_skipped: usize,
    pub scheme_errors: usize,
    pub rebuilt: bool,
    pub outcomes: Vec<(String, MergeOutcome)>,
}

pub struct Merger<'a> {
    store: &'a SeriesStore,
    combined_path: PathBuf,
    meta_path: PathBuf,
    dry_run: bool,
}

impl<'a> Merger<'a> {
    pub fn new(
        store: &'a SeriesStore,
        combined_path: impl AsRef<Path>,
        meta_path: impl AsRef<Path>,
    ) -> Self {
        Self {
            store,
            combined_path: combined_path.as_ref().to_path_buf(),
            meta_path: meta_path.as_ref().to_path_buf(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, yes: bool) -> Self {
        self.dry_run = yes;
        self
    }

    /// Runs the merge, choosing the mode automatically unless forced.
    pub fn run(&self, force_rebuild: bool) -> Result<MergeStats> {
        if force_rebuild || !self.combined_path.exists() || !self.meta_path.exists() {
            self.full_rebuild()
        } else {
            self.incremental()
        }
    }

    /// Discards combined file and watermark, rescans every series in sorted
    /// scheme order and rewrites both from scratch.
    pub fn full_rebuild(&self) -> Result<MergeStats> {
        info!("Full rebuild of combined NAV history");
        if self.dry_run {
            info!("dry-run: nothing will be written");
        }

        let mut stats = MergeStats {
            rebuilt: true,
            ..MergeStats::default()
        };
        let mut index = WatermarkIndex::empty(&self.meta_path);

        let mut writer = if self.dry_run {
            None
        } else {
            if let Some(parent) = self.combined_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut w = csv::Writer::from_path(&self.combined_path)
                .with_context(|| format!("Could not create {:?}", self.combined_path))?;
            w.write_record(COMBINED_HEADER)?;
            Some(w)
        };

        for scheme_code in self.store.list_schemes()? {
            stats.schemes += 1;

            let rows = match self.store.read_all(&scheme_code) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("{}: {:#}", scheme_code, e);
                    stats.scheme_errors += 1;
                    stats
                        .outcomes
                        .push((scheme_code, MergeOutcome::SourceError(format!("{:#}", e))));
                    continue;
                }
            };

            let (valid, skipped) = validate_rows(rows);
            stats.rows_skipped += skipped;

            let mut valid = valid;
            valid.sort_by_key(|(date, _)| *date);

            if let Some(w) = writer.as_mut() {
                for (date, nav) in &valid {
                    w.write_record([scheme_code.as_str(), date.to_string().as_str(), nav.as_str()])
                        .with_context(|| format!("write combined row for {}", scheme_code))?;
                }
            }
            stats.rows_written += valid.len();

            if let Some((max_date, _)) = valid.last() {
                index.set(&scheme_code, *max_date)?;
            }
            stats
                .outcomes
                .push((scheme_code, MergeOutcome::Appended { rows: valid.len() }));
        }

        if let Some(mut w) = writer {
            w.flush()?;
            index.save()?;
        }

        info!("Rebuild complete: {} rows written", stats.rows_written);
        Ok(stats)
    }

    /// Appends only rows newer than each scheme's watermark; persists the
    /// watermark after each scheme's successful append.
    pub fn incremental(&self) -> Result<MergeStats> {
        info!("Incremental update of combined NAV history");

        let mut stats = MergeStats::default();
        let mut index = WatermarkIndex::load(&self.meta_path)?;

        let mut writer = if self.dry_run {
            None
        } else {
            let file = OpenOptions::new()
                .append(true)
                .open(&self.combined_path)
                .with_context(|| format!("Could not open {:?} for append", self.combined_path))?;
            Some(csv::Writer::from_writer(file))
        };

        for scheme_code in self.store.list_schemes()? {
            stats.schemes += 1;
            let last_known = index.get(&scheme_code);

            let rows = match self.store.read_all(&scheme_code) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!("{}: {:#}", scheme_code, e);
                    stats.scheme_errors += 1;
                    stats
                        .outcomes
                        .push((scheme_code, MergeOutcome::SourceError(format!("{:#}", e))));
                    continue;
                }
            };

            let (valid, skipped) = validate_rows(rows);
            stats.rows_skipped += skipped;

            let mut to_write: Vec<(NaiveDate, String)> = valid
                .into_iter()
                .filter(|(date, _)| last_known.map_or(true, |wm| *date > wm))
                .collect();

            if to_write.is_empty() {
                info!("- {} → up to date", scheme_code);
                stats.up_to_date += 1;
                stats.outcomes.push((scheme_code, MergeOutcome::UpToDate));
                continue;
            }

            to_write.sort_by_key(|(date, _)| *date);
            let max_date = to_write.last().map(|(d, _)| *d);

            info!("- {} → +{} rows", scheme_code, to_write.len());

            if let Some(w) = writer.as_mut() {
                for (date, nav) in &to_write {
                    w.write_record([scheme_code.as_str(), date.to_string().as_str(), nav.as_str()])
                        .with_context(|| format!("append combined row for {}", scheme_code))?;
                }
                // Rows must be durable before the watermark acknowledges them.
                w.flush()?;

                if let Some(max_date) = max_date {
                    index.set(&scheme_code, max_date)?;
                    index.save()?;
                }
            }

            stats.rows_written += to_write.len();
            stats
                .outcomes
                .push((scheme_code, MergeOutcome::Appended { rows: to_write.len() }));
        }

        info!("Incremental update complete: {} rows appended", stats.rows_written);
        Ok(stats)
    }
}

/// Splits stored rows into ISO-valid observations and a skipped count.
/// Rows with an empty date or NAV, or a non-ISO date, are skipped, not fatal.
fn validate_rows(rows: Vec<crate::store::SeriesRow>) -> (Vec<(NaiveDate, String)>, usize) {
    let mut valid = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        if row.date.is_empty() || row.nav.is_empty() {
            skipped += 1;
            continue;
        }
        match crate::models::parse_iso_date(&row.date) {
            Some(date) => valid.push((date, row.nav)),
            None => skipped += 1,
        }
    }

    (valid, skipped)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
