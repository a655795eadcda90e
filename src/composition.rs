// 📅 Composition Schedule - sparse full compositions (weights files)
//
// Some indices have no event ledger, only periodic files listing every
// member with its weight. Each file date is a complete membership; the
// forward walk carries it unchanged until the next file date.

use crate::membership::{MembershipSet, Ticker};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CompositionSchedule {
    compositions: BTreeMap<NaiveDate, MembershipSet>,
}

impl CompositionSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: record the full membership of one day
    pub fn with_composition(mut self, day: NaiveDate, membership: MembershipSet) -> Self {
        self.compositions.insert(day, membership);
        self
    }

    /// Load a wide weights file: `DATE,<sym1>,<sym2>,...`
    ///
    /// A symbol belongs to the composition of a date when its cell parses as a
    /// number greater than zero. Rows with a bad date or no members are skipped.
    /// Symbols carry no names, so the display name is the ticker itself.
    pub fn load_weights(file_path: &Path, suffix: &str) -> Result<Self> {
        let file = File::open(file_path)
            .with_context(|| format!("Failed to open weights file: {}", file_path.display()))?;

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers()?.clone();
        let date_col = headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case("date"))
            .with_context(|| format!("Weights file has no DATE column: {}", file_path.display()))?;

        let mut schedule = CompositionSchedule::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse weights line {} in {}", line_num + 2, file_path.display())
            })?;

            let raw_date = record.get(date_col).unwrap_or("").trim();
            let day = match NaiveDate::parse_from_str(raw_date, "%Y-%m-%d") {
                Ok(day) => day,
                Err(_) => {
                    debug!(line = line_num + 2, raw_date, "skipping weights row with bad date");
                    continue;
                }
            };

            let mut membership = MembershipSet::new();
            for (col, cell) in record.iter().enumerate() {
                if col == date_col {
                    continue;
                }
                let weight: f64 = match cell.trim().parse() {
                    Ok(weight) => weight,
                    Err(_) => continue,
                };
                if weight > 0.0 {
                    if let Some(symbol) = headers.get(col) {
                        let ticker = Ticker::qualified(symbol, suffix);
                        membership = membership.with_member(ticker.clone(), ticker.to_string());
                    }
                }
            }

            if !membership.is_empty() {
                schedule.compositions.insert(day, membership);
            }
        }

        Ok(schedule)
    }

    pub fn get(&self, day: NaiveDate) -> Option<&MembershipSet> {
        self.compositions.get(&day)
    }

    /// Earliest composition (the natural seed of a forward walk)
    pub fn first(&self) -> Option<(NaiveDate, &MembershipSet)> {
        self.compositions.iter().next().map(|(day, m)| (*day, m))
    }

    pub fn last_day(&self) -> Option<NaiveDate> {
        self.compositions.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.compositions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compositions.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
