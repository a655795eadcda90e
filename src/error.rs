// ⚠️ Error taxonomy for a reconstruction run
//
// Only two things stop a run: names the resolver could not map (before any
// write) and storage failures (mid-walk, already-written days stay intact).
// Malformed input rows, replay inconsistencies and already-populated days are
// handled where they occur and never surface here.

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum BackfillError {
    /// Fail-closed resolution: nothing was written this run
    #[error("{count} name(s) could not be mapped to a ticker; audit written to {}", audit_path.display())]
    Unresolved { count: usize, audit_path: PathBuf },

    #[error("ledger name {name:?} on {date} has no ticker in the name map")]
    UnmappedName { name: String, date: NaiveDate },

    #[error("nothing to walk: {0}")]
    EmptyRange(String),

    #[error("snapshot store failed on {day}")]
    Storage {
        day: NaiveDate,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Input(#[from] anyhow::Error),
}

impl BackfillError {
    pub fn storage(day: NaiveDate, err: anyhow::Error) -> Self {
        BackfillError::Storage { day, source: err.into() }
    }

    /// Resolution aborts are the one failure that guarantees no output
    pub fn is_unresolved(&self) -> bool {
        matches!(self, BackfillError::Unresolved { .. })
    }
}
