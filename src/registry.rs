// 🗂️ Index Registry - `Code, Start` lower bounds of required history

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

/// Parse a registry start date: `YYYY/MM/DD`, or `YYYY/MM` meaning the 1st
pub fn parse_start_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y/%m/%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&format!("{}/01", raw), "%Y/%m/%d").ok())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryEntry {
    pub code: String,
    pub start: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct IndexRegistry {
    entries: BTreeMap<String, NaiveDate>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, code: &str, start: NaiveDate) -> Self {
        self.entries.insert(code.to_string(), start);
        self
    }

    /// Load a `Code,Start` CSV; an unparseable start date is an error
    pub fn load(file_path: &Path) -> Result<Self> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open registry: {}", file_path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
                .with_context(|| format!("Registry has no {} column: {}", name, file_path.display()))
        };
        let code_col = column("Code")?;
        let start_col = column("Start")?;

        let mut registry = IndexRegistry::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse registry line {} in {}", line_num + 2, file_path.display())
            })?;

            let code = record.get(code_col).unwrap_or("").trim();
            if code.is_empty() {
                continue;
            }
            let raw_start = record.get(start_col).unwrap_or("");
            let start = parse_start_date(raw_start).ok_or_else(|| {
                anyhow!(
                    "Invalid start date {:?} for {} at line {} in {}",
                    raw_start,
                    code,
                    line_num + 2,
                    file_path.display()
                )
            })?;

            registry.entries.insert(code.to_string(), start);
        }

        Ok(registry)
    }

    pub fn start_of(&self, code: &str) -> Option<NaiveDate> {
        self.entries.get(code).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = RegistryEntry> + '_ {
        self.entries.iter().map(|(code, start)| RegistryEntry {
            code: code.clone(),
            start: *start,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
