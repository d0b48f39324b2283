mod config;
mod error;
mod fetch;
mod master;
mod merge;
mod models;
mod partition;
mod pivot;
mod source;
mod storage;
mod store;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::fetch::FetchOrchestrator;
use crate::master::{build_master, read_categories, read_scheme_codes, write_categories, write_scheme_codes};
use crate::merge::Merger;
use crate::partition::YearPartitioner;
use crate::pivot::{load_observations_by_year, WideMatrixBuilder};
use crate::source::{amfi, MfApiClient};
use crate::storage::Repository;
use crate::store::watermark::WatermarkIndex;
use crate::store::SeriesStore;

#[derive(Parser)]
#[command(name = "mfnav-etl", about = "Indian mutual-fund NAV dataset builder", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch scheme codes and metadata from the AMFI full-text feed
    Codes,

    /// Fetch NAV history for every scheme in scheme_codes.csv (incremental)
    Fetch,

    /// Fetch category metadata for schemes missing from scheme_categories.csv
    Categories,

    /// Merge per-scheme NAV files into the combined long-form CSV
    Merge {
        /// Force a full rebuild instead of incremental append
        #[arg(long)]
        rebuild: bool,

        /// Override the combined output path
        #[arg(long)]
        output: Option<PathBuf>,

        /// Override the watermark index path
        #[arg(long)]
        meta: Option<PathBuf>,

        /// Compute and report changes without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Build/refresh the per-year wide (date x scheme) matrices
    Pivot,

    /// Split the long-form series into per-year partition files
    Year,

    /// Join scheme codes and categories into mf_master.csv
    Master,

    /// Materialize the per-scheme series into an SQLite database
    Sqlite,

    /// Show dataset statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "mfnav_etl=info,warn",
        1 => "mfnav_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Codes => {
            let _t = utils::Timer::start("AMFI scheme codes");
            let client = MfApiClient::new(&config.source)?;
            let text = client.fetch_amfi_feed().await?;

            let records = amfi::parse_nav_all(&text);
            let n = write_scheme_codes(&config.storage.codes_path(), &records)?;
            info!("Done: {} schemes written to {:?}", n, config.storage.codes_path());
        }

        Command::Fetch => {
            let _t = utils::Timer::start("NAV history fetch");
            let codes_path = config.storage.codes_path();
            let schemes = read_scheme_codes(&codes_path)
                .with_context(|| format!("{:?} missing, run `mfnav-etl codes` first", codes_path))?;
            let codes: Vec<String> = schemes.into_iter().map(|s| s.scheme_code).collect();
            info!("Total schemes in master: {}", codes.len());

            let source = Arc::new(MfApiClient::new(&config.source)?);
            let store = Arc::new(SeriesStore::open(config.storage.nav_dir())?);

            let orch = FetchOrchestrator::new(source, store, config.pipeline.concurrency);
            let stats = orch.run(&codes).await?;
            info!(
                "Done: +{} rows, {} up to date, {} no data, {} errors",
                stats.rows_added, stats.up_to_date, stats.no_data, stats.errors
            );
        }

        Command::Categories => {
            let _t = utils::Timer::start("Scheme categories");
            let codes = read_scheme_codes(&config.storage.codes_path())?;
            let mut categories = read_categories(&config.storage.categories_path())?;

            let client = MfApiClient::new(&config.source)?;
            let added =
                master::fetch_missing_categories(&client, &codes, &mut categories).await?;
            write_categories(&config.storage.categories_path(), &categories)?;
            info!("Done: {} new categories ({} total)", added, categories.len());
        }

        Command::Merge {
            rebuild,
            output,
            meta,
            dry_run,
        } => {
            let _t = utils::Timer::start("NAV merge");
            let store = SeriesStore::open(config.storage.nav_dir())?;
            let combined = output.unwrap_or_else(|| config.storage.combined_path());
            let meta = meta.unwrap_or_else(|| config.storage.meta_path());

            let stats = Merger::new(&store, combined, meta)
                .dry_run(dry_run)
                .run(rebuild)?;

            if dry_run {
                for (code, outcome) in &stats.outcomes {
                    match outcome {
                        merge::MergeOutcome::UpToDate => info!("would skip {}: up to date", code),
                        merge::MergeOutcome::Appended { rows } => {
                            info!("would append {} rows for {}", rows, code)
                        }
                        merge::MergeOutcome::SourceError(msg) => {
                            info!("would skip {}: {}", code, msg)
                        }
                    }
                }
            }

            info!(
                "Done ({}): {} schemes, {} rows written, {} up to date, {} rows skipped, {} errors",
                if stats.rebuilt { "rebuild" } else { "incremental" },
                stats.schemes,
                stats.rows_written,
                stats.up_to_date,
                stats.rows_skipped,
                stats.scheme_errors,
            );
        }

        Command::Pivot => {
            let _t = utils::Timer::start("Wide matrix update");
            let store = SeriesStore::open(config.storage.nav_dir())?;
            let builder = WideMatrixBuilder::open(config.storage.wide_dir())?;

            let (schemes, by_year) = load_observations_by_year(&store)?;
            info!("Total schemes: {}", schemes.len());

            let mut appended = 0usize;
            for (year, observations) in &by_year {
                let update = builder.update(*year, &schemes, observations)?;
                appended += update.rows_appended;
            }
            info!("Done: {} years, {} rows appended", by_year.len(), appended);
        }

        Command::Year => {
            let _t = utils::Timer::start("Year partitions");
            let store = SeriesStore::open(config.storage.nav_dir())?;
            let partitioner = YearPartitioner::open(config.storage.year_dir())?;

            let (_, by_year) = load_observations_by_year(&store)?;
            let mut appended = 0usize;
            for (year, observations) in &by_year {
                appended += partitioner.update(*year, observations)?;
            }
            info!("Done: {} years, {} rows appended", by_year.len(), appended);
        }

        Command::Master => {
            let _t = utils::Timer::start("Master file join");
            let codes = read_scheme_codes(&config.storage.codes_path())?;
            let categories = read_categories(&config.storage.categories_path())?;
            let n = build_master(&codes, &categories, &config.storage.master_path())?;
            info!("Done: {} records in {:?}", n, config.storage.master_path());
        }

        Command::Sqlite => {
            let _t = utils::Timer::start("SQLite build");
            let store = SeriesStore::open(config.storage.nav_dir())?;
            let repo = Repository::open(&config.storage.db_path())?;
            repo.run_migrations()?;

            let (_, by_year) = load_observations_by_year(&store)?;
            let mut inserted = 0usize;
            for observations in by_year.values() {
                inserted += repo.insert_observations(observations)?;
            }
            info!("Done: {} rows inserted into {:?}", inserted, config.storage.db_path());
        }

        Command::Stats => {
            let store = SeriesStore::open(config.storage.nav_dir())?;
            let schemes = store.list_schemes()?;
            let index = WatermarkIndex::load(config.storage.meta_path())?;

            let combined_rows = if config.storage.combined_path().exists() {
                let mut reader = csv::Reader::from_path(config.storage.combined_path())?;
                reader.records().count() as i64
            } else {
                0
            };

            println!("─────────────────────────────────");
            println!("  mfnav-etl — Dataset Stats");
            println!("─────────────────────────────────");
            println!("  Schemes       : {}", utils::fmt_number(schemes.len() as i64));
            println!("  Watermarked   : {}", utils::fmt_number(index.len() as i64));
            println!("  Combined rows : {}", utils::fmt_number(combined_rows));
            if config.storage.db_path().exists() {
                let repo = Repository::open(&config.storage.db_path())?;
                let (min, max) = repo.date_range().unwrap_or((None, None));
                println!("  SQLite rows   : {}", utils::fmt_number(repo.row_count().unwrap_or(0)));
                println!("  SQLite schemes: {}", utils::fmt_number(repo.scheme_count().unwrap_or(0)));
                println!("  From          : {}", min.unwrap_or_else(|| "—".into()));
                println!("  To            : {}", max.unwrap_or_else(|| "—".into()));
            }
            println!("─────────────────────────────────");
        }
    }

    Ok(())
}

// ── End-to-end pipeline tests ─────────────────────────────────────────────────

#[cfg(test)]
mod pipeline_tests {
    use super::*;
    use crate::models::{RawNavRecord, SchemeMetaPayload};
    use crate::source::{NavSource, SchemeHistory};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{BTreeSet, HashMap};
    use std::path::Path;

    struct StubSource {
        histories: HashMap<String, Vec<RawNavRecord>>,
    }

    #[async_trait]
    impl NavSource for StubSource {
        async fn fetch_history(&self, scheme_code: &str) -> anyhow::Result<SchemeHistory> {
            Ok(SchemeHistory {
                meta: SchemeMetaPayload::default(),
                records: self.histories.get(scheme_code).cloned().unwrap_or_default(),
            })
        }
    }

    fn rec(date: &str, nav: &str) -> RawNavRecord {
        RawNavRecord {
            date: date.to_string(),
            nav: nav.to_string(),
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn read_csv(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(|f| f.to_string()).collect())
            .collect()
    }

    /// Fetch → merge → pivot → SQLite over a stub source, then a second pass
    /// with one new remote row: every derived artifact advances by exactly
    /// that row and nothing is duplicated.
    #[tokio::test]
    async fn test_full_pipeline_then_incremental_catch_up() {
        let tmp = tempfile::tempdir().unwrap();
        let nav_dir = tmp.path().join("nav_history");
        let combined = tmp.path().join("nav_history_all.csv");
        let meta = tmp.path().join("nav_history_all.meta.json");
        let wide_dir = tmp.path().join("nav_wide");
        let db = tmp.path().join("mf_nav.db");

        // Newest first, as the remote serves.
        let store = Arc::new(SeriesStore::open(&nav_dir).unwrap());
        let source = Arc::new(StubSource {
            histories: HashMap::from([
                (
                    "100001".to_string(),
                    vec![rec("02-01-2024", "10.5"), rec("01-01-2024", "10.0")],
                ),
                ("100002".to_string(), vec![rec("02-01-2024", "20.0")]),
            ]),
        });

        let orch = FetchOrchestrator::new(source, Arc::clone(&store), 2);
        let stats = orch
            .run(&["100001".to_string(), "100002".to_string()])
            .await
            .unwrap();
        assert_eq!(stats.rows_added, 3);

        let stats = Merger::new(&store, &combined, &meta).run(false).unwrap();
        assert!(stats.rebuilt);
        assert_eq!(stats.rows_written, 3);

        let builder = WideMatrixBuilder::open(&wide_dir).unwrap();
        let (schemes, by_year) = load_observations_by_year(&store).unwrap();
        for (year, observations) in &by_year {
            builder.update(*year, &schemes, observations).unwrap();
        }

        let wide = read_csv(&wide_dir.join("nav_wide_2024.csv"));
        assert_eq!(wide.len(), 2);
        assert_eq!(wide[0], vec!["2024-01-01", "10.0", ""]);
        assert_eq!(wide[1], vec!["2024-01-02", "10.5", "20.0"]);

        let repo = Repository::open(&db).unwrap();
        repo.run_migrations().unwrap();
        let mut inserted = 0;
        for observations in by_year.values() {
            inserted += repo.insert_observations(observations).unwrap();
        }
        assert_eq!(inserted, 3);

        // Second pass: the remote gained one row for one scheme.
        let source = Arc::new(StubSource {
            histories: HashMap::from([
                (
                    "100001".to_string(),
                    vec![
                        rec("03-01-2024", "10.7"),
                        rec("02-01-2024", "10.5"),
                        rec("01-01-2024", "10.0"),
                    ],
                ),
                ("100002".to_string(), vec![rec("02-01-2024", "20.0")]),
            ]),
        });
        let orch = FetchOrchestrator::new(source, Arc::clone(&store), 2);
        let stats = orch
            .run(&["100001".to_string(), "100002".to_string()])
            .await
            .unwrap();
        assert_eq!(stats.rows_added, 1);
        assert_eq!(stats.up_to_date, 1);

        let stats = Merger::new(&store, &combined, &meta).run(false).unwrap();
        assert!(!stats.rebuilt);
        assert_eq!(stats.rows_written, 1);

        let index = WatermarkIndex::load(&meta).unwrap();
        assert_eq!(index.get("100001"), Some(d("2024-01-03")));
        assert_eq!(index.get("100002"), Some(d("2024-01-02")));

        let (schemes, by_year) = load_observations_by_year(&store).unwrap();
        for (year, observations) in &by_year {
            builder.update(*year, &schemes, observations).unwrap();
        }
        let wide = read_csv(&wide_dir.join("nav_wide_2024.csv"));
        assert_eq!(wide.len(), 3);
        assert_eq!(wide[2], vec!["2024-01-03", "10.7", ""]);

        for observations in by_year.values() {
            inserted += repo.insert_observations(observations).unwrap();
        }
        assert_eq!(inserted, 4);
        assert_eq!(repo.row_count().unwrap(), 4);

        // Combined series: no duplicate (scheme, date) after both runs.
        let rows = read_csv(&combined);
        let keys: BTreeSet<(String, String)> = rows
            .iter()
            .map(|r| (r[0].clone(), r[1].clone()))
            .collect();
        assert_eq!(keys.len(), rows.len());
    }

    /// A scheme that first appears mid-year grows the matrix header and
    /// backfills empty cells, while the watermark for untouched schemes
    /// stays put.
    #[test]
    fn test_late_scheme_grows_matrix_without_disturbing_others() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SeriesStore::open(tmp.path().join("nav_history")).unwrap();
        let combined = tmp.path().join("nav_history_all.csv");
        let meta = tmp.path().join("nav_history_all.meta.json");
        let builder = WideMatrixBuilder::open(tmp.path().join("nav_wide")).unwrap();

        store
            .append("100001", &[(d("2024-01-01"), "10.0".into())])
            .unwrap();
        store
            .append("100002", &[(d("2024-01-01"), "20.0".into())])
            .unwrap();

        Merger::new(&store, &combined, &meta).run(false).unwrap();
        let (schemes, by_year) = load_observations_by_year(&store).unwrap();
        builder.update(2024, &schemes, &by_year[&2024]).unwrap();

        store
            .append("100003", &[(d("2024-01-05"), "30.0".into())])
            .unwrap();

        Merger::new(&store, &combined, &meta).run(false).unwrap();
        let (schemes, by_year) = load_observations_by_year(&store).unwrap();
        let update = builder.update(2024, &schemes, &by_year[&2024]).unwrap();
        assert!(update.rewritten);

        let cols = builder.existing_columns(2024).unwrap();
        assert_eq!(cols, vec!["100001", "100002", "100003"]);

        let index = WatermarkIndex::load(&meta).unwrap();
        assert_eq!(index.get("100001"), Some(d("2024-01-01")));
        assert_eq!(index.get("100002"), Some(d("2024-01-01")));
        assert_eq!(index.get("100003"), Some(d("2024-01-05")));
    }
}
