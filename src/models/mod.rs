use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── NAV observation ───────────────────────────────────────────────────────────

/// One (scheme, date, value) point of the long-form series.
///
/// The NAV is carried as the source's decimal string, not parsed: the store
/// passes values through untouched and downstream consumers decide how strict
/// to be.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavObservation {
    pub scheme_code: String,
    pub date: NaiveDate,
    pub nav: String,
}

// ── mfapi.in payload ──────────────────────────────────────────────────────────

/// Raw history row as served by the API: `{"date": "28-08-2026", "nav": "10.5"}`,
/// newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNavRecord {
    pub date: String,
    pub nav: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemeMetaPayload {
    #[serde(default)]
    pub fund_house: String,
    #[serde(default)]
    pub scheme_type: String,
    #[serde(default)]
    pub scheme_category: String,
    #[serde(default)]
    pub scheme_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MfApiPayload {
    #[serde(default)]
    pub meta: SchemeMetaPayload,
    #[serde(default)]
    pub data: Vec<RawNavRecord>,
}

// ── Scheme metadata ───────────────────────────────────────────────────────────

/// One row of `scheme_codes.csv`, sourced from the AMFI full-text feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemeRecord {
    pub scheme_code: String,
    pub amc: String,
    pub scheme_name: String,
    pub isin: String,
    pub nav: String,
    pub nav_date: String,
}

/// One row of `scheme_categories.csv`, sourced from the API's meta object.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchemeCategory {
    pub scheme_code: String,
    pub category: String,
    pub scheme_type: String,
    pub amc: String,
}

// ── Date normalization ────────────────────────────────────────────────────────

/// Strict ISO date, the only form accepted in persisted stores.
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Dates as remote sources serve them: "28-08-2026" (mfapi) or
/// "28-Aug-2026" (AMFI feed).
pub fn parse_source_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();

    if let Ok(d) = NaiveDate::parse_from_str(s, "%d-%m-%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%d-%b-%Y") {
        return Some(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }

    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_date_formats() {
        let expect = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(parse_source_date("02-01-2024"), Some(expect));
        assert_eq!(parse_source_date("02-Jan-2024"), Some(expect));
        assert_eq!(parse_source_date("2024-01-02"), Some(expect));
        assert_eq!(parse_source_date("n/a"), None);
    }

    #[test]
    fn test_parse_iso_date_rejects_source_forms() {
        assert!(parse_iso_date("2024-01-02").is_some());
        assert!(parse_iso_date("02-01-2024").is_none());
        assert!(parse_iso_date("").is_none());
    }
}
