use chrono::NaiveDate;
use thiserror::Error;

/// Structural invariant violations.
///
/// These are hard failures for the unit of work that triggered them, as
/// opposed to per-row parse problems (skipped) and per-scheme source
/// problems (reported and carried on).
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("watermark for {scheme} would move backward: {have} -> {proposed}")]
    WatermarkRegression {
        scheme: String,
        have: NaiveDate,
        proposed: NaiveDate,
    },

    #[error("matrix for {year} already contains rows up to {last}; refusing date {date}")]
    StaleMatrixDate {
        year: i32,
        last: NaiveDate,
        date: NaiveDate,
    },
}
