// 🚶 Membership Walker - replay sparse events over every calendar day
//
// The seed describes membership at the END of its day, so events dated on the
// seed day are already reflected in it. A forward walk that must apply its first
// event is seeded on the day before.
//
//   Backward: leaving day d for d-1 undoes d's events
//             (an "added on d" ticker was absent on d-1, a "removed on d" ticker was present)
//   Forward:  entering day d applies d's events in their natural sense
//
// State advances on every day whether or not anything is persisted for it;
// the walker knows nothing about the store.

use crate::composition::CompositionSchedule;
use crate::error::BackfillError;
use crate::ledger::Ledger;
use crate::membership::{Effect, MembershipSet, Ticker, Transition};
use crate::profile::Direction;
use crate::resolver::NameMap;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ============================================================================
// RESOLVED LEDGER
// ============================================================================

/// A ledger event with both names already mapped to tickers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub added: Option<(Ticker, String)>,
    pub removed: Option<(Ticker, String)>,
}

impl ResolvedEvent {
    /// Transitions that replay this event in the given direction
    ///
    /// Backward is the exact inverse of forward: reversed order, each step inverted.
    /// A rename (both names on the same ticker) never touches membership; only
    /// the display name follows the walk.
    pub fn transitions(&self, direction: Direction) -> Vec<Transition> {
        if let (Some((added, new_name)), Some((removed, old_name))) = (&self.added, &self.removed) {
            if added == removed {
                let name = match direction {
                    Direction::Forward => new_name,
                    Direction::Backward => old_name,
                };
                return vec![Transition::Rename { ticker: added.clone(), name: name.clone() }];
            }
        }

        let join = |(ticker, name): &(Ticker, String)| Transition::Join {
            ticker: ticker.clone(),
            name: name.clone(),
        };
        let leave = |(ticker, _): &(Ticker, String)| Transition::Leave { ticker: ticker.clone() };

        match direction {
            Direction::Forward => self
                .added
                .iter()
                .map(join)
                .chain(self.removed.iter().map(leave))
                .collect(),
            Direction::Backward => self
                .removed
                .iter()
                .map(join)
                .chain(self.added.iter().map(leave))
                .collect(),
        }
    }
}

/// Events grouped by day, every name resolved
#[derive(Debug, Clone, Default)]
pub struct ResolvedLedger {
    by_day: BTreeMap<NaiveDate, Vec<ResolvedEvent>>,
}

impl ResolvedLedger {
    /// Ledger with no events (composition-only walks)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Map every event name through `names`; any gap is an error
    pub fn new(ledger: &Ledger, names: &NameMap) -> Result<Self, BackfillError> {
        let lookup = |name: &str, date: NaiveDate| -> Result<(Ticker, String), BackfillError> {
            names
                .get(name)
                .map(|ticker| (ticker.clone(), name.to_string()))
                .ok_or_else(|| BackfillError::UnmappedName { name: name.to_string(), date })
        };

        let mut by_day: BTreeMap<NaiveDate, Vec<ResolvedEvent>> = BTreeMap::new();
        for (date, events) in ledger.by_day() {
            let resolved = events
                .into_iter()
                .map(|event| {
                    let added = event.added.as_deref().map(|n| lookup(n, date)).transpose()?;
                    let removed = event.removed.as_deref().map(|n| lookup(n, date)).transpose()?;
                    Ok(ResolvedEvent { added, removed })
                })
                .collect::<Result<Vec<_>, BackfillError>>()?;
            by_day.insert(date, resolved);
        }

        Ok(ResolvedLedger { by_day })
    }

    pub fn events_on(&self, day: NaiveDate) -> &[ResolvedEvent] {
        self.by_day.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// DAY STATE
// ============================================================================

/// What one step did to membership
///
/// Conservation: `after = before + joined - left`; no-ops change nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayDelta {
    pub joined: usize,
    pub left: usize,
    pub noop_joins: usize,
    pub missing_leaves: usize,
    pub renamed: usize,
    pub replaced: bool,
}

impl DayDelta {
    fn record(&mut self, effect: Effect) {
        match effect {
            Effect::Joined => self.joined += 1,
            Effect::Left => self.left += 1,
            Effect::AlreadyPresent => self.noop_joins += 1,
            Effect::NotPresent => self.missing_leaves += 1,
            Effect::Renamed => self.renamed += 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == DayDelta::default()
    }
}

/// Membership valid on one day
#[derive(Debug, Clone, PartialEq)]
pub struct DayState {
    pub day: NaiveDate,
    pub membership: MembershipSet,
    pub delta: DayDelta,
}

// ============================================================================
// WALKER
// ============================================================================

/// Iterator over `(day, membership)` for every day between seed and stop, seed first
///
/// A stop day on the wrong side of the seed for the direction yields only the seed day.
pub struct Walker<'a> {
    ledger: &'a ResolvedLedger,
    schedule: Option<&'a CompositionSchedule>,
    direction: Direction,
    stop_day: NaiveDate,
    current_day: NaiveDate,
    membership: Option<MembershipSet>,
    seed_emitted: bool,
}

impl<'a> Walker<'a> {
    pub fn new(
        seed_day: NaiveDate,
        seed: MembershipSet,
        ledger: &'a ResolvedLedger,
        direction: Direction,
        stop_day: NaiveDate,
    ) -> Self {
        Walker {
            ledger,
            schedule: None,
            direction,
            stop_day,
            current_day: seed_day,
            membership: Some(seed),
            seed_emitted: false,
        }
    }

    /// Full compositions that replace membership on their dates
    pub fn with_schedule(mut self, schedule: &'a CompositionSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    fn next_day(&self) -> Option<NaiveDate> {
        match self.direction {
            Direction::Backward if self.current_day > self.stop_day => self.current_day.pred_opt(),
            Direction::Forward if self.current_day < self.stop_day => self.current_day.succ_opt(),
            _ => None,
        }
    }

    /// Move membership from `current_day` to `day`
    fn step(&self, day: NaiveDate, mut membership: MembershipSet) -> (MembershipSet, DayDelta) {
        let mut delta = DayDelta::default();

        // Backward undoes the day being left; forward applies the day being entered
        let (event_day, events): (NaiveDate, Vec<&ResolvedEvent>) = match self.direction {
            Direction::Backward => (
                self.current_day,
                self.ledger.events_on(self.current_day).iter().rev().collect(),
            ),
            Direction::Forward => (day, self.ledger.events_on(day).iter().collect()),
        };

        for event in events {
            for transition in event.transitions(self.direction) {
                let (next, effect) = transition.apply(membership);
                membership = next;
                match effect {
                    Effect::NotPresent => warn!(
                        event_day = %event_day,
                        ticker = %transition.ticker(),
                        "removal of a ticker that is not a member, ignored"
                    ),
                    Effect::AlreadyPresent => debug!(
                        event_day = %event_day,
                        ticker = %transition.ticker(),
                        "addition of a ticker that is already a member, ignored"
                    ),
                    _ => {}
                }
                delta.record(effect);
            }
        }

        if let Some(composition) = self.schedule.and_then(|s| s.get(day)) {
            delta.joined += composition.tickers().filter(|t| !membership.contains(t)).count();
            delta.left += membership.tickers().filter(|t| !composition.contains(t)).count();
            delta.replaced = true;
            membership = membership.replaced_by(composition);
        }

        (membership, delta)
    }
}

impl Iterator for Walker<'_> {
    type Item = DayState;

    fn next(&mut self) -> Option<DayState> {
        if !self.seed_emitted {
            self.seed_emitted = true;
            return Some(DayState {
                day: self.current_day,
                membership: self.membership.clone()?,
                delta: DayDelta::default(),
            });
        }

        let day = self.next_day()?;
        let current = self.membership.take()?;
        let (membership, delta) = self.step(day, current);

        self.current_day = day;
        self.membership = Some(membership.clone());

        Some(DayState { day, membership, delta })
    }
}

// ============================================================================
// TESTS
// ============================================================================
