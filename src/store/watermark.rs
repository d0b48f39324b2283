//! Watermark index: scheme code → last date durably merged.
//!
//! Backed by a JSON object with sorted keys. Every save goes through a
//! temp-file + rename so readers only ever observe a complete index.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EtlError;

pub struct WatermarkIndex {
    path: PathBuf,
    entries: BTreeMap<String, NaiveDate>,
}

impl WatermarkIndex {
    /// Loads the index from `path`; a missing file yields an empty index.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Could not read watermark index {:?}", path))?;
        let entries: BTreeMap<String, NaiveDate> = serde_json::from_str(&text)
            .with_context(|| format!("Corrupt watermark index {:?}", path))?;

        Ok(Self { path, entries })
    }

    /// A fresh, empty index at `path` — used by full rebuilds, which discard
    /// prior watermark state by construction.
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, scheme_code: &str) -> Option<NaiveDate> {
        self.entries.get(scheme_code).copied()
    }

    /// Advances a scheme's watermark. Moving backward is a structural
    /// violation and is rejected; setting an equal date is a no-op.
    pub fn set(&mut self, scheme_code: &str, date: NaiveDate) -> Result<()> {
        if let Some(have) = self.entries.get(scheme_code) {
            if date < *have {
                return Err(EtlError::WatermarkRegression {
                    scheme: scheme_code.to_string(),
                    have: *have,
                    proposed: date,
                }
                .into());
            }
        }
        self.entries.insert(scheme_code.to_string(), date);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persists via write-temp-then-rename. A crash leaves either the old or
    /// the new index on disk, never a partial one.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&tmp, json)
            .with_context(|| format!("Could not write {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Could not rename {:?} over {:?}", tmp, self.path))?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
