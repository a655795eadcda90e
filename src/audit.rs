// 📋 Coverage Auditor - which registered indices have holes in the store
//
// Read-only. Every calendar day from an index's registered start to the newest
// day directory in the store should hold both encodings; each absent file
// counts once.

use crate::registry::IndexRegistry;
use crate::store::{SnapshotState, SnapshotStore};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageEntry {
    pub code: String,
    pub start: NaiveDate,
    pub missing_files: usize,
    pub days_checked: usize,

    /// First day with at least one encoding missing
    pub first_gap: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageReport {
    pub latest_day: Option<NaiveDate>,
    pub entries: Vec<CoverageEntry>,
}

impl CoverageReport {
    pub fn total_missing(&self) -> usize {
        self.entries.iter().map(|e| e.missing_files).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.total_missing() == 0
    }

    /// Plain-text table, worst index first
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self.latest_day {
            Some(day) => out.push_str(&format!("Coverage through {}\n", day)),
            None => out.push_str("Store is empty\n"),
        }
        out.push_str(&format!("{:<16} {:>10} {:>8} {:>8}  {}\n", "code", "start", "missing", "days", "first gap"));
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<16} {:>10} {:>8} {:>8}  {}\n",
                entry.code,
                entry.start,
                entry.missing_files,
                entry.days_checked,
                entry.first_gap.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
            ));
        }
        out
    }
}

/// Compare the store against the registry
pub fn audit(registry: &IndexRegistry, store: &SnapshotStore) -> Result<CoverageReport> {
    let latest_day = store.latest_day()?;
    let mut entries = Vec::new();

    for registered in registry.entries() {
        let mut entry = CoverageEntry {
            code: registered.code.clone(),
            start: registered.start,
            missing_files: 0,
            days_checked: 0,
            first_gap: None,
        };

        if let Some(latest) = latest_day {
            for day in registered.start.iter_days().take_while(|d| *d <= latest) {
                entry.days_checked += 1;
                let missing = match store.status(&registered.code, day) {
                    SnapshotState::Complete => 0,
                    SnapshotState::Partial { .. } => 1,
                    SnapshotState::Missing => 2,
                };
                if missing > 0 {
                    entry.missing_files += missing;
                    entry.first_gap.get_or_insert(day);
                }
            }
        }

        entries.push(entry);
    }

    entries.sort_by(|a, b| b.missing_files.cmp(&a.missing_files).then_with(|| a.code.cmp(&b.code)));
    Ok(CoverageReport { latest_day, entries })
}

// ============================================================================
// TESTS
// ============================================================================
