//! Scheme metadata tables and the joined master file.
//!
//! `scheme_codes.csv` comes from the AMFI feed, `scheme_categories.csv` from
//! the API's meta object (fetched only for codes not already present), and
//! `mf_master.csv` is a left join of the two on SchemeCode; lookup misses
//! yield empty strings, never an error.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::models::{SchemeCategory, SchemeRecord};
use crate::source::NavSource;

pub const CODES_HEADER: [&str; 6] = ["SchemeCode", "AMC", "SchemeName", "ISIN", "NAV", "NAVDate"];
pub const CATEGORIES_HEADER: [&str; 4] = ["SchemeCode", "Category", "Type", "AMC"];
pub const MASTER_HEADER: [&str; 9] = [
    "SchemeCode",
    "AMC",
    "SchemeName",
    "ISIN",
    "NAV",
    "NAVDate",
    "SchemeType",
    "Category",
    "SubCategory",
];

/// The API serves one combined category string, e.g.
/// "Debt Scheme - Liquid Fund". The master file splits it at the first
/// " - " into Category and SubCategory; no separator means no SubCategory.
pub fn split_category(raw: &str) -> (&str, &str) {
    match raw.split_once(" - ") {
        Some((category, sub)) => (category.trim(), sub.trim()),
        None => (raw.trim(), ""),
    }
}

// ── scheme_codes.csv ──────────────────────────────────────────────────────────

pub fn read_scheme_codes(path: &Path) -> Result<Vec<SchemeRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Could not read scheme codes {:?}", path))?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or_default().to_string();
        records.push(SchemeRecord {
            scheme_code: get(0),
            amc: get(1),
            scheme_name: get(2),
            isin: get(3),
            nav: get(4),
            nav_date: get(5),
        });
    }
    Ok(records)
}

pub fn write_scheme_codes(path: &Path, records: &[SchemeRecord]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {:?}", path))?;

    writer.write_record(CODES_HEADER)?;
    for r in records {
        writer.write_record([
            r.scheme_code.as_str(),
            &r.amc,
            &r.scheme_name,
            &r.isin,
            &r.nav,
            &r.nav_date,
        ])?;
    }
    writer.flush()?;
    Ok(records.len())
}

// ── scheme_categories.csv ─────────────────────────────────────────────────────

pub fn read_categories(path: &Path) -> Result<BTreeMap<String, SchemeCategory>> {
    let mut map = BTreeMap::new();
    if !path.exists() {
        return Ok(map);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or_default().to_string();
        let cat = SchemeCategory {
            scheme_code: get(0),
            category: get(1),
            scheme_type: get(2),
            amc: get(3),
        };
        map.insert(cat.scheme_code.clone(), cat);
    }
    Ok(map)
}

pub fn write_categories(path: &Path, categories: &BTreeMap<String, SchemeCategory>) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Could not create {:?}", path))?;

    writer.write_record(CATEGORIES_HEADER)?;
    for cat in categories.values() {
        writer.write_record([
            cat.scheme_code.as_str(),
            &cat.category,
            &cat.scheme_type,
            &cat.amc,
        ])?;
    }
    writer.flush()?;
    Ok(categories.len())
}

/// Fetches category metadata for codes not already in the table. Serial on
/// purpose: the incremental skip makes the steady state cheap, and the source
/// client already paces its own requests.
pub async fn fetch_missing_categories(
    source: &dyn NavSource,
    codes: &[SchemeRecord],
    existing: &mut BTreeMap<String, SchemeCategory>,
) -> Result<usize> {
    let mut added = 0usize;

    for record in codes {
        if existing.contains_key(&record.scheme_code) {
            continue;
        }

        let history = match source.fetch_history(&record.scheme_code).await {
            Ok(h) => h,
            Err(e) => {
                warn!("{}: {:#}", record.scheme_code, e);
                continue;
            }
        };

        existing.insert(
            record.scheme_code.clone(),
            SchemeCategory {
                scheme_code: record.scheme_code.clone(),
                category: history.meta.scheme_category,
                scheme_type: history.meta.scheme_type,
                amc: history.meta.fund_house,
            },
        );
        added += 1;
    }

    info!("Categories: {} new entries", added);
    Ok(added)
}

// ── mf_master.csv ─────────────────────────────────────────────────────────────

/// Left join of codes × categories on SchemeCode.
pub fn build_master(
    codes: &[SchemeRecord],
    categories: &BTreeMap<String, SchemeCategory>,
    out_path: &Path,
) -> Result<usize> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(out_path)
        .with_context(|| format!("Could not create {:?}", out_path))?;

    writer.write_record(MASTER_HEADER)?;

    let empty = SchemeCategory::default();
    for s in codes {
        let c = categories.get(&s.scheme_code).unwrap_or(&empty);
        let (category, sub_category) = split_category(&c.category);
        writer.write_record([
            s.scheme_code.as_str(),
            &s.amc,
            &s.scheme_name,
            &s.isin,
            &s.nav,
            &s.nav_date,
            &c.scheme_type,
            category,
            sub_category,
        ])?;
    }
    writer.flush()?;

    info!("Master file written: {} records", codes.len());
    Ok(codes.len())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme(code: &str, amc: &str) -> SchemeRecord {
        SchemeRecord {
            scheme_code: code.to_string(),
            amc: amc.to_string(),
            scheme_name: format!("{} Fund - Growth", amc),
            isin: "INF000000000".to_string(),
            nav: "10.0".to_string(),
            nav_date: "2024-01-02".to_string(),
        }
    }

    #[test]
    fn test_codes_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scheme_codes.csv");

        let records = vec![scheme("100001", "Axis"), scheme("100002", "HDFC")];
        write_scheme_codes(&path, &records).unwrap();

        let back = read_scheme_codes(&path).unwrap();
        assert_eq!(back, records);
    }

    #[test]
    fn test_master_join_misses_are_empty_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("mf_master.csv");

        let codes = vec![scheme("100001", "Axis"), scheme("100002", "HDFC")];
        let mut categories = BTreeMap::new();
        categories.insert(
            "100001".to_string(),
            SchemeCategory {
                scheme_code: "100001".to_string(),
                category: "Debt Scheme - Liquid Fund".to_string(),
                scheme_type: "Open Ended".to_string(),
                amc: "Axis".to_string(),
            },
        );

        build_master(&codes, &categories, &out).unwrap();

        let mut reader = csv::Reader::from_path(&out).unwrap();
        let rows: Vec<Vec<String>> = reader
            .records()
            .map(|r| r.unwrap().iter().map(|f| f.to_string()).collect())
            .collect();

        assert_eq!(rows[0][6], "Open Ended");
        assert_eq!(rows[0][7], "Debt Scheme");
        assert_eq!(rows[0][8], "Liquid Fund");
        // 100002 has no category row: joined fields are empty, not an error.
        assert_eq!(rows[1][6], "");
        assert_eq!(rows[1][7], "");
        assert_eq!(rows[1][8], "");
    }

    #[test]
    fn test_split_category() {
        assert_eq!(
            split_category("Debt Scheme - Liquid Fund"),
            ("Debt Scheme", "Liquid Fund")
        );
        assert_eq!(
            split_category("Hybrid Scheme - Multi Asset Allocation"),
            ("Hybrid Scheme", "Multi Asset Allocation")
        );
        assert_eq!(split_category("Growth"), ("Growth", ""));
        assert_eq!(split_category(""), ("", ""));
    }

    #[test]
    fn test_missing_categories_file_is_empty_table() {
        let tmp = tempfile::tempdir().unwrap();
        let map = read_categories(&tmp.path().join("none.csv")).unwrap();
        assert!(map.is_empty());
    }
}
