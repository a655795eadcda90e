// Index History - Core Library
// Reconstructs gap-free daily index membership from a seed snapshot and a
// sparse ledger of additions and removals.

pub mod normalize;      // Name normalization + similarity
pub mod membership;     // Ticker, Snapshot, MembershipSet, pure transitions
pub mod ledger;         // Event ledger loading
pub mod profile;        // Per-index configuration (tables, suffix, search policy)
pub mod lookup;         // External listing / name-search providers
pub mod resolver;       // Tiered, fail-closed name → ticker resolution
pub mod composition;    // Sparse full compositions (weights files)
pub mod walker;         // Day-by-day membership replay
pub mod store;          // Write-once per-day snapshot pairs
pub mod registry;       // Code,Start registry
pub mod audit;          // Read-only coverage report
pub mod backfill;       // End-to-end orchestration
pub mod error;

// Re-export commonly used types
pub use normalize::{normalize_name, similarity};
pub use membership::{Constituent, Effect, MembershipSet, Snapshot, Ticker, Transition};
pub use ledger::{ChangeEvent, Ledger, LedgerFormat};
pub use profile::{Direction, IndexProfile, SearchPolicy};
pub use lookup::{Candidate, Listing, ListingDirectory, NameSearch, StaticDirectory, StaticSearch};
#[cfg(feature = "fetch")]
pub use lookup::{HttpListingDirectory, HttpNameSearch};
pub use resolver::{NameMap, NameResolver, NameTier, Resolution, Resolved, TierKind};
pub use composition::CompositionSchedule;
pub use walker::{DayDelta, DayState, ResolvedLedger, Walker};
pub use store::{SnapshotState, SnapshotStore, WriteOutcome};
pub use registry::IndexRegistry;
pub use audit::{audit, CoverageEntry, CoverageReport};
pub use backfill::{Backfill, RunSummary, WalkPlan};
pub use error::BackfillError;
