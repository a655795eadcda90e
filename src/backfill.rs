// 🔁 Backfill - Ledger → Resolver → Walker → Store for one index
//
// The whole name universe is resolved before the first write. If any name is
// left over the run stops with an audit artifact and the store is untouched.
// Once writing starts, every day is offered to the store in walk order; a
// storage failure stops the tail of the walk and leaves earlier days in place.

use crate::composition::CompositionSchedule;
use crate::error::BackfillError;
use crate::ledger::Ledger;
use crate::membership::{MembershipSet, Snapshot, Ticker};
use crate::profile::{Direction, IndexProfile};
use crate::resolver::{NameResolver, Resolution};
use crate::store::{SnapshotStore, WriteOutcome};
use crate::walker::{DayState, ResolvedLedger, Walker};
use anyhow::Context;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ============================================================================
// PLAN & SUMMARY
// ============================================================================

/// Where a ledger walk starts, where it stops and which way it goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkPlan {
    pub seed_day: NaiveDate,
    pub stop_day: NaiveDate,
    pub direction: Direction,
}

impl WalkPlan {
    pub fn new(seed_day: NaiveDate, stop_day: NaiveDate, direction: Direction) -> Self {
        WalkPlan { seed_day, stop_day, direction }
    }

    /// Backward from the seed down to `stop_day`
    pub fn backward(seed_day: NaiveDate, stop_day: NaiveDate) -> Self {
        Self::new(seed_day, stop_day, Direction::Backward)
    }

    /// Forward from the seed up to `stop_day`
    pub fn forward(seed_day: NaiveDate, stop_day: NaiveDate) -> Self {
        Self::new(seed_day, stop_day, Direction::Forward)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub written: usize,
    pub skipped: usize,
    pub repaired: usize,

    /// Days visited by the walk (written + skipped + repaired)
    pub days: usize,
}

impl RunSummary {
    fn record(&mut self, outcome: &WriteOutcome) {
        self.days += 1;
        match outcome {
            WriteOutcome::Written { .. } => self.written += 1,
            WriteOutcome::Skipped => self.skipped += 1,
            WriteOutcome::Repaired => self.repaired += 1,
        }
    }
}

/// Operator-facing record of a failed resolution
#[derive(Debug, Serialize)]
pub struct UnresolvedAudit<'r> {
    pub run_id: Uuid,
    pub index: &'r str,
    pub unresolved: &'r BTreeSet<String>,
    pub debug: &'r BTreeMap<String, Vec<String>>,
    pub resolved: BTreeMap<String, Ticker>,
}

// ============================================================================
// BACKFILL
// ============================================================================

pub struct Backfill<'a> {
    code: String,
    store: SnapshotStore,
    resolver: NameResolver<'a>,
    audit_path: PathBuf,
    start_bound: Option<NaiveDate>,
}

impl<'a> Backfill<'a> {
    /// Unresolved audit defaults to `<root>/../mapping-audit-<code>.json`
    pub fn new(profile: &IndexProfile, store: SnapshotStore, resolver: NameResolver<'a>) -> Self {
        let audit_path = default_audit_path(store.root(), &profile.code);
        Backfill {
            code: profile.code.clone(),
            store,
            resolver,
            audit_path,
            start_bound: None,
        }
    }

    pub fn with_audit_path(mut self, path: PathBuf) -> Self {
        self.audit_path = path;
        self
    }

    /// Registered inception; nothing is persisted before it
    pub fn with_start_bound(mut self, start: Option<NaiveDate>) -> Self {
        self.start_bound = start;
        self
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    /// Resolve every ledger name against the seed (no writes)
    pub fn resolve(&self, ledger: &Ledger, seed: &Snapshot) -> Resolution {
        let names = ledger.names();
        let resolution = self.resolver.resolve(&names, seed);

        for (tier, count) in resolution.tier_counts() {
            debug!(code = %self.code, %tier, count, "names resolved by tier");
        }
        resolution
    }

    /// Reconstruct history from a ledger and a seed snapshot
    pub fn run(&self, ledger: &Ledger, seed: &Snapshot, plan: &WalkPlan) -> Result<RunSummary, BackfillError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, code = %self.code, events = ledger.len(), seed_rows = seed.len(), "backfill started");

        let resolution = self.resolve(ledger, seed);
        let names = match resolution.complete_map() {
            Some(names) => names,
            None => {
                self.write_unresolved_audit(run_id, &resolution)?;
                return Err(BackfillError::Unresolved {
                    count: resolution.unresolved.len(),
                    audit_path: self.audit_path.clone(),
                });
            }
        };
        self.clear_stale_audit();

        let resolved = ResolvedLedger::new(ledger, &names)?;
        let stop_day = match (plan.direction, self.start_bound) {
            (Direction::Backward, Some(start)) => plan.stop_day.max(start),
            _ => plan.stop_day,
        };

        let walker = Walker::new(
            plan.seed_day,
            MembershipSet::from_snapshot(seed),
            &resolved,
            plan.direction,
            stop_day,
        );
        let summary = self.persist(walker)?;

        info!(%run_id, code = %self.code, written = summary.written, skipped = summary.skipped,
              repaired = summary.repaired, days = summary.days, "backfill finished");
        Ok(summary)
    }

    /// Carry sparse full compositions forward, one snapshot per day up to `until`
    pub fn forward_fill(&self, schedule: &CompositionSchedule, until: NaiveDate) -> Result<RunSummary, BackfillError> {
        let (first_day, first) = schedule
            .first()
            .ok_or_else(|| BackfillError::EmptyRange(format!("no compositions for {}", self.code)))?;

        info!(code = %self.code, compositions = schedule.len(), from = %first_day, %until, "forward fill started");

        let ledger = ResolvedLedger::empty();
        let walker = Walker::new(first_day, first.clone(), &ledger, Direction::Forward, until)
            .with_schedule(schedule);
        let summary = self.persist(walker)?;

        info!(code = %self.code, written = summary.written, skipped = summary.skipped, "forward fill finished");
        Ok(summary)
    }

    /// Offer every walked day to the store; state advances regardless of the outcome
    fn persist<I>(&self, days: I) -> Result<RunSummary, BackfillError>
    where
        I: Iterator<Item = DayState>,
    {
        let mut summary = RunSummary::default();

        for state in days {
            if self.start_bound.is_some_and(|start| state.day < start) {
                debug!(code = %self.code, day = %state.day, "before registered start, not persisted");
                continue;
            }

            let outcome = self
                .store
                .write(&self.code, state.day, &state.membership)
                .map_err(|err| BackfillError::storage(state.day, err))?;

            debug!(
                code = %self.code,
                day = %state.day,
                members = state.membership.len(),
                joined = state.delta.joined,
                left = state.delta.left,
                ?outcome,
                "day processed"
            );
            summary.record(&outcome);
        }

        Ok(summary)
    }

    fn write_unresolved_audit(&self, run_id: Uuid, resolution: &Resolution) -> Result<(), BackfillError> {
        let audit = UnresolvedAudit {
            run_id,
            index: &self.code,
            unresolved: &resolution.unresolved,
            debug: &resolution.debug,
            resolved: resolution.partial_map(),
        };

        let json = serde_json::to_string_pretty(&audit).context("Failed to encode unresolved audit")?;
        if let Some(parent) = self.audit_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.audit_path, json)
            .with_context(|| format!("Failed to write {}", self.audit_path.display()))?;

        warn!(
            %run_id,
            code = %self.code,
            unresolved = resolution.unresolved.len(),
            path = %self.audit_path.display(),
            "unresolved names, no snapshots written"
        );
        Ok(())
    }

    // A leftover artifact from an earlier failed run would claim this run wrote nothing
    fn clear_stale_audit(&self) {
        if self.audit_path.is_file() {
            match fs::remove_file(&self.audit_path) {
                Ok(()) => info!(path = %self.audit_path.display(), "removed stale unresolved audit"),
                Err(err) => warn!(path = %self.audit_path.display(), %err, "could not remove stale unresolved audit"),
            }
        }
    }
}

pub fn default_audit_path(root: &Path, code: &str) -> PathBuf {
    let file = format!("mapping-audit-{}.json", code);
    match root.parent() {
        Some(parent) => parent.join(file),
        None => PathBuf::from(file),
    }
}

// ============================================================================
// TESTS
// ============================================================================
