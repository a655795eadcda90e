// 🧩 Membership Model - tickers, snapshots and pure membership transitions
//
// A MembershipSet is a VALUE: every change produces the next value through
// Transition::apply. The walker threads one value through calendar time; it
// never mutates shared state in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

// ============================================================================
// TICKER
// ============================================================================

/// Suffix-qualified symbol, e.g. `SAP.DE` or `BT/A.L`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticker(String);

impl Ticker {
    pub fn new(symbol: impl Into<String>) -> Self {
        Ticker(symbol.into().trim().to_string())
    }

    /// Qualify a base code with a market suffix
    ///
    /// The suffix is appended only when the symbol does not already end with
    /// it, so qualifying twice is harmless:
    /// - `("SAP", ".DE")` → `SAP.DE`
    /// - `("SAP.DE", ".DE")` → `SAP.DE`
    /// - `("BT/A", ".L")` → `BT/A.L`
    pub fn qualified(symbol: &str, suffix: &str) -> Self {
        let symbol = symbol.trim();
        if suffix.is_empty() || symbol.ends_with(suffix) {
            Ticker(symbol.to_string())
        } else {
            Ticker(format!("{}{}", symbol, suffix))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Base code without any market suffix or exchange prefix (`XETRA:SAP.DE` → `SAP`)
    pub fn base_code(symbol: &str) -> &str {
        let without_prefix = symbol.rsplit(':').next().unwrap_or(symbol);
        without_prefix.split('.').next().unwrap_or(without_prefix)
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One persisted row: `{Symbol, Name}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constituent {
    #[serde(rename = "Symbol")]
    pub symbol: Ticker,

    #[serde(rename = "Name")]
    pub name: String,
}

/// Membership of one index on one day, ordered by ticker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    rows: Vec<Constituent>,
}

impl Snapshot {
    /// Build a snapshot: deduplicated by ticker (first occurrence wins), sorted by ticker
    pub fn from_rows(rows: Vec<Constituent>) -> Self {
        let mut seen = HashSet::new();
        let mut rows: Vec<Constituent> = rows
            .into_iter()
            .filter(|row| seen.insert(row.symbol.clone()))
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Snapshot { rows }
    }

    pub fn rows(&self) -> &[Constituent] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every `(Name, Symbol)` row, duplicates of a name included
    pub fn name_pairs(&self) -> impl Iterator<Item = (String, Ticker)> + '_ {
        self.rows.iter().map(|row| (row.name.clone(), row.symbol.clone()))
    }
}

// ============================================================================
// MEMBERSHIP SET
// ============================================================================

/// Tickers valid on one day plus a display-name side map
///
/// The side map outlives membership: a ticker that leaves and later rejoins
/// keeps the name it was first known under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet {
    tickers: BTreeSet<Ticker>,
    name_by_ticker: BTreeMap<Ticker, String>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed membership from a snapshot (names come from its `Name` column)
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut set = MembershipSet::new();
        for row in snapshot.rows() {
            set.tickers.insert(row.symbol.clone());
            set.name_by_ticker.insert(row.symbol.clone(), row.name.clone());
        }
        set
    }

    /// Builder: add a member with a display name
    pub fn with_member(mut self, ticker: Ticker, name: impl Into<String>) -> Self {
        self.name_by_ticker.insert(ticker.clone(), name.into());
        self.tickers.insert(ticker);
        self
    }

    pub fn contains(&self, ticker: &Ticker) -> bool {
        self.tickers.contains(ticker)
    }

    pub fn len(&self) -> usize {
        self.tickers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty()
    }

    pub fn tickers(&self) -> impl Iterator<Item = &Ticker> {
        self.tickers.iter()
    }

    /// Display name, falling back to the ticker itself
    pub fn display_name(&self, ticker: &Ticker) -> String {
        self.name_by_ticker
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| ticker.to_string())
    }

    /// Materialize as a snapshot (sorted by ticker)
    pub fn to_snapshot(&self) -> Snapshot {
        let rows = self
            .tickers
            .iter()
            .map(|ticker| Constituent {
                symbol: ticker.clone(),
                name: self.display_name(ticker),
            })
            .collect();
        Snapshot::from_rows(rows)
    }

    /// Replace the members wholesale, keeping names already known
    pub fn replaced_by(mut self, other: &MembershipSet) -> Self {
        self.tickers = other.tickers.clone();
        for (ticker, name) in &other.name_by_ticker {
            self.name_by_ticker
                .entry(ticker.clone())
                .or_insert_with(|| name.clone());
        }
        self
    }
}

// ============================================================================
// TRANSITIONS
// ============================================================================

/// One membership change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Ticker enters membership; `name` is used only if no name is known yet
    Join { ticker: Ticker, name: String },

    /// Ticker leaves membership
    Leave { ticker: Ticker },

    /// Same ticker under a new name; membership is untouched
    Rename { ticker: Ticker, name: String },
}

/// What a transition actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Joined,
    /// Join of a ticker already present (no-op)
    AlreadyPresent,
    Left,
    /// Leave of a ticker that is not a member (no-op, worth a warning)
    NotPresent,
    /// Display name replaced
    Renamed,
}

impl Transition {
    pub fn ticker(&self) -> &Ticker {
        match self {
            Transition::Join { ticker, .. } => ticker,
            Transition::Leave { ticker } => ticker,
            Transition::Rename { ticker, .. } => ticker,
        }
    }

    /// Pure transition: consumes the current membership, returns the next one
    pub fn apply(&self, mut membership: MembershipSet) -> (MembershipSet, Effect) {
        match self {
            Transition::Join { ticker, name } => {
                membership
                    .name_by_ticker
                    .entry(ticker.clone())
                    .or_insert_with(|| name.clone());
                let effect = if membership.tickers.insert(ticker.clone()) {
                    Effect::Joined
                } else {
                    Effect::AlreadyPresent
                };
                (membership, effect)
            }
            Transition::Leave { ticker } => {
                let effect = if membership.tickers.remove(ticker) {
                    Effect::Left
                } else {
                    Effect::NotPresent
                };
                (membership, effect)
            }
            Transition::Rename { ticker, name } => {
                membership.name_by_ticker.insert(ticker.clone(), name.clone());
                (membership, Effect::Renamed)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
