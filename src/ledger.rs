// 📒 Event Ledger - sparse addition/removal events for one index
//
// Ledger files come from press releases and wiki tables, so they are noisy:
// repeated header lines, footnotes, blank cells written as "-" or "nan".
// Bad rows are dropped here and never reach the resolver.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use tracing::debug;

// ============================================================================
// CORE TYPES
// ============================================================================

/// ChangeEvent - one row of the ledger: something joined and/or left on `date`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub date: NaiveDate,
    pub added: Option<String>,
    pub removed: Option<String>,
}

impl ChangeEvent {
    /// Build an event; returns None when neither name is present
    pub fn new(date: NaiveDate, added: Option<&str>, removed: Option<&str>) -> Option<Self> {
        let added = clean_cell(added);
        let removed = clean_cell(removed);
        if added.is_none() && removed.is_none() {
            return None;
        }
        Some(ChangeEvent { date, added, removed })
    }

    /// Names mentioned by this event
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.added.as_deref().into_iter().chain(self.removed.as_deref())
    }
}

/// LedgerFormat - how to read a particular ledger file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerFormat {
    /// chrono formats tried in order
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    /// Accepted header names (case-insensitive)
    #[serde(default = "default_date_columns")]
    pub date_columns: Vec<String>,

    #[serde(default = "default_added_columns")]
    pub added_columns: Vec<String>,

    #[serde(default = "default_removed_columns")]
    pub removed_columns: Vec<String>,
}

fn default_date_formats() -> Vec<String> {
    vec!["%d-%b-%y".to_string(), "%Y-%m-%d".to_string(), "%d/%m/%Y".to_string()]
}

fn default_date_columns() -> Vec<String> {
    vec!["date".to_string()]
}

fn default_added_columns() -> Vec<String> {
    vec!["added".to_string()]
}

fn default_removed_columns() -> Vec<String> {
    vec!["removed".to_string(), "deleted".to_string()]
}

impl Default for LedgerFormat {
    fn default() -> Self {
        LedgerFormat {
            date_formats: default_date_formats(),
            date_columns: default_date_columns(),
            added_columns: default_added_columns(),
            removed_columns: default_removed_columns(),
        }
    }
}

impl LedgerFormat {
    /// Parse a date cell with the first format that fits
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        self.date_formats
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
    }
}

/// Column positions resolved from the header row
struct Columns {
    date: usize,
    added: usize,
    removed: usize,
}

impl Columns {
    fn locate(headers: &StringRecord, format: &LedgerFormat) -> Result<Self> {
        let find = |aliases: &[String], what: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| aliases.iter().any(|a| a.eq_ignore_ascii_case(h.trim())))
                .with_context(|| {
                    format!("Ledger has no {} column (expected one of {:?})", what, aliases)
                })
        };

        Ok(Columns {
            date: find(&format.date_columns, "date")?,
            added: find(&format.added_columns, "added")?,
            removed: find(&format.removed_columns, "removed")?,
        })
    }
}

// ============================================================================
// LEDGER
// ============================================================================

/// Ordered sequence of change events (sorted by date, file order kept within a date)
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    events: Vec<ChangeEvent>,
    dropped_rows: usize,
}

impl Ledger {
    /// Build from events already in memory
    pub fn from_events(mut events: Vec<ChangeEvent>) -> Self {
        // sort_by_key is stable
        events.sort_by_key(|e| e.date);
        Ledger { events, dropped_rows: 0 }
    }

    /// Load a ledger CSV
    ///
    /// Rows are dropped (not errors) when:
    /// - the CSV record itself is malformed
    /// - the date cell matches none of the formats
    /// - both name cells are blank/placeholders
    pub fn load(file_path: &Path, format: &LedgerFormat) -> Result<Self> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open ledger: {}", file_path.display()))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader
            .headers()
            .with_context(|| format!("Failed to read ledger header: {}", file_path.display()))?
            .clone();
        let columns = Columns::locate(&headers, format)
            .with_context(|| format!("Unrecognized ledger layout: {}", file_path.display()))?;

        let mut events = Vec::new();
        let mut dropped_rows = 0;

        for (line_num, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(err) => {
                    debug!(line = line_num + 2, %err, "dropping malformed ledger row");
                    dropped_rows += 1;
                    continue;
                }
            };

            let date = match record.get(columns.date).and_then(|d| format.parse_date(d)) {
                Some(date) => date,
                None => {
                    debug!(line = line_num + 2, "dropping ledger row with unparseable date");
                    dropped_rows += 1;
                    continue;
                }
            };

            match ChangeEvent::new(date, record.get(columns.added), record.get(columns.removed)) {
                Some(event) => events.push(event),
                None => {
                    debug!(line = line_num + 2, "dropping ledger row without names");
                    dropped_rows += 1;
                }
            }
        }

        let mut ledger = Ledger::from_events(events);
        ledger.dropped_rows = dropped_rows;
        Ok(ledger)
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of rows discarded during load
    pub fn dropped_rows(&self) -> usize {
        self.dropped_rows
    }

    /// Distinct names mentioned anywhere in the ledger
    pub fn names(&self) -> BTreeSet<String> {
        self.events
            .iter()
            .flat_map(|e| e.names())
            .map(str::to_string)
            .collect()
    }

    /// Events grouped by date
    pub fn by_day(&self) -> BTreeMap<NaiveDate, Vec<&ChangeEvent>> {
        let mut grouped: BTreeMap<NaiveDate, Vec<&ChangeEvent>> = BTreeMap::new();
        for event in &self.events {
            grouped.entry(event.date).or_default().push(event);
        }
        grouped
    }

    /// First and last event dates
    pub fn span(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((self.events.first()?.date, self.events.last()?.date))
    }
}

/// Treat blank and placeholder cells as absent
fn clean_cell(cell: Option<&str>) -> Option<String> {
    let value = cell?.trim();
    match value {
        "" | "-" | "—" | "–" => None,
        v if v.eq_ignore_ascii_case("nan") => None,
        v => Some(v.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================
