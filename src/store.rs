// 💾 Snapshot Store - one CSV/JSON pair per (index, day), written at most once
//
// Layout: <root>/<YYYY>/<MM>/<DD>/constituents-<code>.{csv,json}
//
// Files on disk are ground truth. A complete pair is never touched again; a
// pair with one half missing is completed FROM the surviving half, never from
// freshly reconstructed membership.

use crate::membership::{Constituent, MembershipSet, Snapshot};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, NaiveDate};
use csv::{ReaderBuilder, Terminator, WriterBuilder};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// STATE & OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotState {
    Missing,
    Partial { csv: bool, json: bool },
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Both files created; digest is the SHA-256 hex of the CSV bytes
    Written { rows: usize, digest: String },
    /// Pair already complete, nothing touched
    Skipped,
    /// The missing half was regenerated from the existing half
    Repaired,
}

// ============================================================================
// ENCODING
// ============================================================================

/// Render rows as `Symbol,Name` CSV with `\n` line endings
pub fn encode_csv(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(["Symbol", "Name"])?;
    for row in snapshot.rows() {
        writer.write_record([row.symbol.as_str(), row.name.as_str()])?;
    }

    writer
        .into_inner()
        .map_err(|err| anyhow!("Failed to flush CSV buffer: {}", err.error()))
}

/// Render rows as a compact JSON array of `{"Symbol","Name"}`
pub fn encode_json(snapshot: &Snapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(snapshot.rows()).context("Failed to encode snapshot JSON")
}

pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Read a `Symbol,Name` CSV (seed snapshots use the same format)
pub fn read_snapshot_csv(path: &Path) -> Result<Snapshot> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

    let mut rows = Vec::new();
    for (line_num, result) in reader.deserialize::<Constituent>().enumerate() {
        let row = result.with_context(|| {
            format!("Failed to parse snapshot line {} in {}", line_num + 2, path.display())
        })?;
        rows.push(row);
    }

    Ok(Snapshot::from_rows(rows))
}

fn read_snapshot_json(path: &Path) -> Result<Snapshot> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let rows: Vec<Constituent> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse snapshot JSON: {}", path.display()))?;
    Ok(Snapshot::from_rows(rows))
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        SnapshotStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.root
            .join(day.format("%Y").to_string())
            .join(day.format("%m").to_string())
            .join(day.format("%d").to_string())
    }

    pub fn csv_path(&self, code: &str, day: NaiveDate) -> PathBuf {
        self.day_dir(day).join(format!("constituents-{}.csv", code))
    }

    pub fn json_path(&self, code: &str, day: NaiveDate) -> PathBuf {
        self.day_dir(day).join(format!("constituents-{}.json", code))
    }

    pub fn status(&self, code: &str, day: NaiveDate) -> SnapshotState {
        let csv = self.csv_path(code, day).is_file();
        let json = self.json_path(code, day).is_file();
        match (csv, json) {
            (true, true) => SnapshotState::Complete,
            (false, false) => SnapshotState::Missing,
            _ => SnapshotState::Partial { csv, json },
        }
    }

    pub fn exists(&self, code: &str, day: NaiveDate) -> bool {
        self.status(code, day) != SnapshotState::Missing
    }

    /// Persist membership for a day unless the day already has data
    pub fn write(&self, code: &str, day: NaiveDate, membership: &MembershipSet) -> Result<WriteOutcome> {
        match self.status(code, day) {
            SnapshotState::Complete => {
                debug!(code, %day, "snapshot exists, skipped");
                Ok(WriteOutcome::Skipped)
            }
            SnapshotState::Partial { csv, .. } => {
                self.repair(code, day, csv)?;
                Ok(WriteOutcome::Repaired)
            }
            SnapshotState::Missing => {
                let snapshot = membership.to_snapshot();
                let csv_bytes = encode_csv(&snapshot)?;
                let json_bytes = encode_json(&snapshot)?;

                let dir = self.day_dir(day);
                fs::create_dir_all(&dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                write_file(&self.csv_path(code, day), &csv_bytes)?;
                write_file(&self.json_path(code, day), &json_bytes)?;

                Ok(WriteOutcome::Written {
                    rows: snapshot.len(),
                    digest: digest(&csv_bytes),
                })
            }
        }
    }

    fn repair(&self, code: &str, day: NaiveDate, has_csv: bool) -> Result<()> {
        let source = if has_csv { "csv" } else { "json" };
        if has_csv {
            let snapshot = read_snapshot_csv(&self.csv_path(code, day))?;
            write_file(&self.json_path(code, day), &encode_json(&snapshot)?)?;
        } else {
            let snapshot = read_snapshot_json(&self.json_path(code, day))?;
            write_file(&self.csv_path(code, day), &encode_csv(&snapshot)?)?;
        }
        info!(code, %day, from = source, "repaired partial snapshot pair");
        Ok(())
    }

    /// Read a day's snapshot (CSV preferred, JSON as fallback)
    pub fn read(&self, code: &str, day: NaiveDate) -> Result<Option<Snapshot>> {
        let csv = self.csv_path(code, day);
        if csv.is_file() {
            return read_snapshot_csv(&csv).map(Some);
        }
        let json = self.json_path(code, day);
        if json.is_file() {
            return read_snapshot_json(&json).map(Some);
        }
        Ok(None)
    }

    /// Every `YYYY/MM/DD` directory under the root that names a real date
    pub fn days(&self) -> Result<BTreeSet<NaiveDate>> {
        let mut days = BTreeSet::new();
        if !self.root.is_dir() {
            return Ok(days);
        }

        for year in numeric_subdirs(&self.root)? {
            for month in numeric_subdirs(&self.root.join(format!("{:04}", year)))? {
                let month_dir = self.root.join(format!("{:04}", year)).join(format!("{:02}", month));
                for dom in numeric_subdirs(&month_dir)? {
                    if let Some(day) = NaiveDate::from_ymd_opt(year as i32, month, dom) {
                        days.insert(day);
                    }
                }
            }
        }

        Ok(days)
    }

    pub fn latest_day(&self) -> Result<Option<NaiveDate>> {
        Ok(self.days()?.into_iter().next_back())
    }

    /// Newest day on or before `day` (within `lookback` days) that has a CSV for `code`
    pub fn latest_on_or_before(&self, code: &str, day: NaiveDate, lookback: u32) -> Option<(NaiveDate, PathBuf)> {
        (0..=i64::from(lookback))
            .map(|back| day - Duration::days(back))
            .map(|candidate| (candidate, self.csv_path(code, candidate)))
            .find(|(_, path)| path.is_file())
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

// Directory names like "2024", "01" parsed as numbers; anything else ignored
fn numeric_subdirs(dir: &Path) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) {
            out.push(n);
        }
    }
    out.sort_unstable();
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================
