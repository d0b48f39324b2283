//! Parser for the AMFI daily full-scheme text feed (`NAVAll.txt`).
//!
//! The feed is semicolon-delimited scheme records grouped under bare AMC-name
//! header lines:
//!
//! ```text
//! Scheme Code;ISIN Div Payout/ ISIN Growth;ISIN Div Reinvestment;Scheme Name;Net Asset Value;Date
//!
//! Axis Mutual Fund
//! 120503;INF846K01DP8;INF846K01DQ6;Axis Liquid Fund - Growth;2789.1041;28-Aug-2026
//! ```
//!
//! Classification: a non-empty line with no `;` that is not a section banner
//! starts a new AMC context; a line with six or more `;`-fields and an
//! all-digit first field is a scheme record attributed to the current AMC;
//! every other line is ignored.

use crate::models::{parse_source_date, SchemeRecord};

pub fn parse_nav_all(text: &str) -> Vec<SchemeRecord> {
    let mut records = Vec::new();
    let mut current_amc = String::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !line.contains(';') {
            // Section banners like "Open Ended Schemes(Debt Scheme - Liquid
            // Fund)" are also delimiterless; only bare fund-house names
            // become the AMC context.
            if !line.contains('(') {
                current_amc = line.to_string();
            }
            continue;
        }

        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() < 6 {
            continue;
        }

        let code = fields[0].trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        // ISO-normalize the feed's dd-Mon-yyyy date where it parses;
        // otherwise carry the raw text through.
        let raw_date = fields[5].trim();
        let nav_date = parse_source_date(raw_date)
            .map(|d| d.to_string())
            .unwrap_or_else(|| raw_date.to_string());

        records.push(SchemeRecord {
            scheme_code: code.to_string(),
            amc: current_amc.clone(),
            scheme_name: fields[3].trim().to_string(),
            isin: fields[1].trim().to_string(),
            nav: fields[4].trim().to_string(),
            nav_date,
        });
    }

    records
}

// ── Tests ─────────────────────────────────────────────────────────────────────
