//! Fetch orchestrator: remote NAV source → per-scheme series store.
//!
//! Each scheme is an independent unit of work: read the store's latest date,
//! fetch the scheme's full history, keep only strictly-newer records, reverse
//! the source's newest-first order and append. A bounded worker pool caps
//! in-flight requests; one scheme's failure never cancels the others, and a
//! partially completed run is safe to resume (completed schemes are updated,
//! the rest untouched).

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::models::parse_source_date;
use crate::source::NavSource;
use crate::store::SeriesStore;

/// Per-scheme result of a fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    UpToDate,
    Added { rows: usize },
    /// The source returned an empty history; store and watermark untouched.
    NoData,
    SourceError(String),
}

#[derive(Debug, Default)]
pub struct FetchStats {
    pub schemes: usize,
    pub rows_added: usize,
    pub up_to_date: usize,
    pub no_data: usize,
    pub errors: usize,
}

pub struct FetchOrchestrator {
    source: Arc<dyn NavSource>,
    store: Arc<SeriesStore>,
    concurrency: usize,
}

impl FetchOrchestrator {
    pub fn new(source: Arc<dyn NavSource>, store: Arc<SeriesStore>, concurrency: usize) -> Self {
        Self {
            source,
            store,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, scheme_codes: &[String]) -> Result<FetchStats> {
        info!(
            "Fetching NAV history for {} schemes (concurrency {})",
            scheme_codes.len(),
            self.concurrency
        );

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::new();

        for code in scheme_codes {
            let task_code = code.clone();
            let source = Arc::clone(&self.source);
            let store = Arc::clone(&self.store);
            let sem = Arc::clone(&sem);

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                update_scheme(source.as_ref(), &store, &task_code).await
            });

            handles.push((code.clone(), handle));
        }

        let mut stats = FetchStats {
            schemes: scheme_codes.len(),
            ..FetchStats::default()
        };

        for (code, handle) in handles {
            match handle.await {
                Ok(Ok(FetchOutcome::Added { rows })) => {
                    info!("{}: +{} rows", code, rows);
                    stats.rows_added += rows;
                }
                Ok(Ok(FetchOutcome::UpToDate)) => {
                    info!("{}: up to date", code);
                    stats.up_to_date += 1;
                }
                Ok(Ok(FetchOutcome::NoData)) => {
                    info!("{}: no data from source", code);
                    stats.no_data += 1;
                }
                Ok(Ok(FetchOutcome::SourceError(msg))) => {
                    warn!("{}: {}", code, msg);
                    stats.errors += 1;
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", code, e);
                    stats.errors += 1;
                }
                Err(e) => {
                    error!("Task panic for {}: {}", code, e);
                    stats.errors += 1;
                }
            }
        }

        info!(
            "Fetch done: {} schemes | +{} rows | {} up to date | {} no data | {} errors",
            stats.schemes, stats.rows_added, stats.up_to_date, stats.no_data, stats.errors
        );
        Ok(stats)
    }
}

/// Fetch-and-append for one scheme. Source failures are an outcome, not an
/// error: only local append failures propagate as `Err`.
async fn update_scheme(
    source: &dyn NavSource,
    store: &SeriesStore,
    scheme_code: &str,
) -> Result<FetchOutcome> {
    let last = store
        .latest_date(scheme_code)
        .with_context(|| format!("latest_date({})", scheme_code))?;

    let history = match source.fetch_history(scheme_code).await {
        Ok(h) => h,
        Err(e) => return Ok(FetchOutcome::SourceError(format!("{:#}", e))),
    };

    if history.records.is_empty() {
        return Ok(FetchOutcome::NoData);
    }

    // The source serves newest first; reverse for chronological append.
    let mut new_rows: Vec<(NaiveDate, String)> = Vec::new();
    for record in history.records.iter().rev() {
        let Some(date) = parse_source_date(&record.date) else {
            warn!("{}: unparseable date {:?}, skipping", scheme_code, record.date);
            continue;
        };
        if let Some(last) = last {
            if date <= last {
                continue;
            }
        }
        new_rows.push((date, record.nav.clone()));
    }

    if new_rows.is_empty() {
        return Ok(FetchOutcome::UpToDate);
    }

    new_rows.sort_by_key(|(date, _)| *date);
    new_rows.dedup_by_key(|(date, _)| *date);

    let added = store
        .append(scheme_code, &new_rows)
        .with_context(|| format!("append({})", scheme_code))?;

    Ok(FetchOutcome::Added { rows: added })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
