// 🏷️ Name Resolver - company name → ticker, fail-closed
//
// Ordered tiers, first hit wins:
//   1. Manual overrides      (operator CSV, authoritative)
//   2. Hardcoded table       (renamings, share classes)
//   3. Alias table           (certain lineage aliases)
//   4. Seed exact            (seed snapshot Name column)
//   5. Seed normalized       (normalize_name equality)
//   6. Reference directory   (exchange listing, normalized equality)
//   7. External search       (scored candidates, threshold + exchange gate)
//
// A name that survives all tiers is UNRESOLVED. The resolver never guesses:
// a wrong historical ticker silently corrupts every day after it, so an
// incomplete resolution yields no NameMap at all.

use crate::lookup::{Candidate, ListingDirectory, NameSearch};
use crate::membership::{Snapshot, Ticker};
use crate::normalize::{normalize_name, similarity};
use crate::profile::{IndexProfile, SearchPolicy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

// ============================================================================
// TIERS
// ============================================================================

/// Which tier produced a resolution (provenance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    Manual,
    Hardcoded,
    Alias,
    SeedExact,
    SeedNormalized,
    Directory,
    Search,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Manual => "manual",
            TierKind::Hardcoded => "hardcoded",
            TierKind::Alias => "alias",
            TierKind::SeedExact => "seed_exact",
            TierKind::SeedNormalized => "seed_normalized",
            TierKind::Directory => "directory",
            TierKind::Search => "search",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of asking one tier about one name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lookup {
    pub ticker: Option<Ticker>,

    /// Diagnostic lines kept for the operator (ranked candidates etc.)
    pub trace: Vec<String>,
}

impl Lookup {
    pub fn hit(ticker: Ticker) -> Self {
        Lookup { ticker: Some(ticker), trace: Vec::new() }
    }

    pub fn miss() -> Self {
        Lookup::default()
    }
}

/// NameTier - one ranked strategy of the pipeline
///
/// Implementations are lookups over data fixed at construction; asking the
/// same tier about the same name twice gives the same answer.
pub trait NameTier {
    fn kind(&self) -> TierKind;

    fn lookup(&self, name: &str) -> Lookup;
}

/// Exact-key table (manual, hardcoded, alias, seed exact)
#[derive(Debug, Clone)]
pub struct TableTier {
    kind: TierKind,
    entries: BTreeMap<String, Ticker>,
}

impl TableTier {
    /// Build from raw `name → symbol` pairs; symbols are qualified with `suffix`
    pub fn new(kind: TierKind, entries: &BTreeMap<String, String>, suffix: &str) -> Self {
        let entries = entries
            .iter()
            .map(|(name, symbol)| (name.trim().to_string(), Ticker::qualified(symbol, suffix)))
            .collect();
        TableTier { kind, entries }
    }

    /// Exact-name table from already-qualified pairs (seed exact)
    ///
    /// Two rows sharing a name with different tickers leave that name out.
    pub fn from_pairs<I>(kind: TierKind, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Ticker)>,
    {
        TableTier { kind, entries: unambiguous(kind, pairs, str::to_string) }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl NameTier for TableTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    fn lookup(&self, name: &str) -> Lookup {
        match self.entries.get(name) {
            Some(ticker) => Lookup::hit(ticker.clone()),
            None => Lookup::miss(),
        }
    }
}

/// Collect `key → ticker`, dropping every key claimed by two different tickers
///
/// Dropped keys make the name fall through to later tiers; a conflicting
/// key is never resolved to either ticker.
fn unambiguous<I, K>(kind: TierKind, pairs: I, key_of: K) -> BTreeMap<String, Ticker>
where
    I: IntoIterator<Item = (String, Ticker)>,
    K: Fn(&str) -> String,
{
    let mut entries: BTreeMap<String, Ticker> = BTreeMap::new();
    let mut ambiguous: BTreeSet<String> = BTreeSet::new();

    for (name, ticker) in pairs {
        let key = key_of(&name);
        if key.is_empty() || ambiguous.contains(&key) {
            continue;
        }
        match entries.get(&key) {
            Some(existing) if *existing != ticker => {
                warn!(tier = %kind, key = %key, first = %existing, second = %ticker,
                    "ambiguous name dropped");
                entries.remove(&key);
                ambiguous.insert(key);
            }
            Some(_) => {}
            None => {
                entries.insert(key, ticker);
            }
        }
    }

    entries
}

/// Normalized-key table (seed normalized, directory)
#[derive(Debug, Clone)]
pub struct NormalizedTier {
    kind: TierKind,
    entries: BTreeMap<String, Ticker>,
}

impl NormalizedTier {
    pub fn new<I>(kind: TierKind, pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Ticker)>,
    {
        NormalizedTier { kind, entries: unambiguous(kind, pairs, normalize_name) }
    }
}

impl NameTier for NormalizedTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    fn lookup(&self, name: &str) -> Lookup {
        match self.entries.get(&normalize_name(name)) {
            Some(ticker) => Lookup::hit(ticker.clone()),
            None => Lookup::miss(),
        }
    }
}

/// Scored external search (tier 7)
pub struct SearchTier<'a> {
    search: &'a dyn NameSearch,
    policy: SearchPolicy,
    suffix: String,
}

/// A candidate with its score, as ranked by the search tier
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub score: f64,
    pub candidate: Candidate,
}

impl ScoredCandidate {
    fn trace_line(&self) -> String {
        format!(
            "{:.2}|{}|{}|{}",
            self.score, self.candidate.exchange, self.candidate.symbol, self.candidate.name
        )
    }
}

impl<'a> SearchTier<'a> {
    pub fn new(search: &'a dyn NameSearch, policy: SearchPolicy, suffix: &str) -> Self {
        SearchTier { search, policy, suffix: suffix.to_string() }
    }

    /// Score = exchange bonus + country bonus + name similarity
    pub fn score(&self, query: &str, candidate: &Candidate) -> f64 {
        let mut score = 0.0;
        if self.policy.exchange_allowed(&candidate.exchange) {
            score += self.policy.exchange_bonus;
        }
        if self.policy.country_matches(&candidate.country) {
            score += self.policy.country_bonus;
        }
        score + similarity(query, &candidate.name)
    }

    /// Candidates ranked best-first
    pub fn rank(&self, query: &str, candidates: Vec<Candidate>) -> Vec<ScoredCandidate> {
        let mut ranked: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| ScoredCandidate { score: self.score(query, &candidate), candidate })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.candidate.symbol.cmp(&b.candidate.symbol))
        });
        ranked
    }
}

impl NameTier for SearchTier<'_> {
    fn kind(&self) -> TierKind {
        TierKind::Search
    }

    fn lookup(&self, name: &str) -> Lookup {
        let candidates = match self.search.search(name) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(company = name, %err, "name search failed");
                return Lookup { ticker: None, trace: vec![format!("search:error:{}", err)] };
            }
        };
        if candidates.is_empty() {
            return Lookup { ticker: None, trace: vec!["search:no_hits".to_string()] };
        }

        let ranked = self.rank(name, candidates);
        let trace = ranked
            .iter()
            .take(self.policy.trace_len)
            .map(ScoredCandidate::trace_line)
            .collect();

        // Only the top candidate is ever considered
        let ticker = ranked.first().and_then(|top| {
            let accepted = top.score >= self.policy.accept_threshold
                && self.policy.exchange_allowed(&top.candidate.exchange);
            accepted.then(|| {
                Ticker::qualified(Ticker::base_code(&top.candidate.symbol), &self.suffix)
            })
        });

        Lookup { ticker, trace }
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolved {
    pub ticker: Ticker,
    pub tier: TierKind,
}

/// Outcome of resolving a whole name universe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved: BTreeMap<String, Resolved>,
    pub unresolved: BTreeSet<String>,

    /// Ranked-candidate traces, per name that reached a tracing tier
    pub debug: BTreeMap<String, Vec<String>>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// How many names each tier resolved
    pub fn tier_counts(&self) -> BTreeMap<TierKind, usize> {
        let mut counts = BTreeMap::new();
        for resolved in self.resolved.values() {
            *counts.entry(resolved.tier).or_insert(0) += 1;
        }
        counts
    }

    /// Partial `name → ticker` map, for operator review only
    pub fn partial_map(&self) -> BTreeMap<String, Ticker> {
        self.resolved
            .iter()
            .map(|(name, r)| (name.clone(), r.ticker.clone()))
            .collect()
    }

    /// The usable mapping - only when every name resolved
    pub fn complete_map(&self) -> Option<NameMap> {
        if !self.is_complete() {
            return None;
        }
        Some(NameMap { map: self.partial_map() })
    }
}

/// Complete `name → ticker` mapping; can only be obtained from a complete Resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMap {
    map: BTreeMap<String, Ticker>,
}

impl NameMap {
    pub fn get(&self, name: &str) -> Option<&Ticker> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ============================================================================
// NAME RESOLVER
// ============================================================================

pub struct NameResolver<'a> {
    suffix: String,
    manual: TableTier,
    hardcoded: TableTier,
    aliases: TableTier,
    directory: Option<NormalizedTier>,
    search: Option<SearchTier<'a>>,
    policy: SearchPolicy,
}

impl<'a> NameResolver<'a> {
    /// Resolver for a profile (reads the manual override file)
    pub fn new(profile: &IndexProfile) -> Result<Self> {
        let manual = profile.manual_table()?;
        Ok(Self::from_tables(
            &profile.suffix,
            &manual,
            &profile.hardcoded,
            &profile.aliases,
            profile.search.clone(),
        ))
    }

    /// Resolver from explicit tables, no external tiers
    pub fn from_tables(
        suffix: &str,
        manual: &BTreeMap<String, String>,
        hardcoded: &BTreeMap<String, String>,
        aliases: &BTreeMap<String, String>,
        policy: SearchPolicy,
    ) -> Self {
        NameResolver {
            suffix: suffix.to_string(),
            manual: TableTier::new(TierKind::Manual, manual, suffix),
            hardcoded: TableTier::new(TierKind::Hardcoded, hardcoded, suffix),
            aliases: TableTier::new(TierKind::Alias, aliases, suffix),
            directory: None,
            search: None,
            policy,
        }
    }

    /// Attach tier 6; the listing is fetched once, here
    pub fn with_directory(mut self, directory: &dyn ListingDirectory) -> Result<Self> {
        let listings = directory.listings()?;
        info!(listings = listings.len(), "reference directory loaded");

        let suffix = self.suffix.clone();
        self.directory = Some(NormalizedTier::new(
            TierKind::Directory,
            listings
                .into_iter()
                .map(|l| (l.name, Ticker::qualified(Ticker::base_code(&l.symbol), &suffix))),
        ));
        Ok(self)
    }

    /// Attach tier 7
    pub fn with_search(mut self, search: &'a dyn NameSearch) -> Self {
        self.search = Some(SearchTier::new(search, self.policy.clone(), &self.suffix));
        self
    }

    /// Resolve every name in one batch against the seed snapshot
    pub fn resolve(&self, names: &BTreeSet<String>, seed: &Snapshot) -> Resolution {
        let seed_exact = TableTier::from_pairs(TierKind::SeedExact, seed.name_pairs());
        let seed_normalized = NormalizedTier::new(TierKind::SeedNormalized, seed.name_pairs());

        let mut tiers: Vec<&dyn NameTier> = vec![
            &self.manual,
            &self.hardcoded,
            &self.aliases,
            &seed_exact,
            &seed_normalized,
        ];
        if let Some(directory) = &self.directory {
            tiers.push(directory);
        }
        if let Some(search) = &self.search {
            tiers.push(search);
        }

        let mut resolution = Resolution::default();
        for name in names {
            let mut trace = Vec::new();
            let mut hit = None;

            for tier in &tiers {
                let lookup = tier.lookup(name);
                trace.extend(lookup.trace);
                if let Some(ticker) = lookup.ticker {
                    hit = Some(Resolved { ticker, tier: tier.kind() });
                    break;
                }
            }

            match hit {
                Some(resolved) => {
                    debug!(company = %name, ticker = %resolved.ticker, tier = %resolved.tier, "resolved");
                    resolution.resolved.insert(name.clone(), resolved);
                }
                None => {
                    debug!(company = %name, "unresolved after all tiers");
                    resolution.unresolved.insert(name.clone());
                }
            }
            if !trace.is_empty() {
                resolution.debug.insert(name.clone(), trace);
            }
        }

        info!(
            names = names.len(),
            resolved = resolution.resolved.len(),
            unresolved = resolution.unresolved.len(),
            "name resolution finished"
        );
        resolution
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{Listing, StaticDirectory, StaticSearch};
    use crate::membership::Constituent;

    fn t(s: &str) -> Ticker {
        Ticker::new(s)
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries.iter().map(|(n, s)| (n.to_string(), s.to_string())).collect()
    }

    fn seed(rows: &[(&str, &str)]) -> Snapshot {
        Snapshot::from_rows(
            rows.iter()
                .map(|(symbol, name)| Constituent { symbol: t(symbol), name: name.to_string() })
                .collect(),
        )
    }

    fn dax_policy() -> SearchPolicy {
        SearchPolicy::new(&["XETRA", "FRA"], &["DE", "GER"])
    }

    fn candidate(symbol: &str, name: &str, exchange: &str, country: &str) -> Candidate {
        Candidate {
            symbol: symbol.to_string(),
            name: name.to_string(),
            exchange: exchange.to_string(),
            country: country.to_string(),
        }
    }

    #[test]
    fn test_manual_override_beats_every_other_tier() {
        let resolver = NameResolver::from_tables(
            ".DE",
            &table(&[("Acme Corp", "ACME.DE")]),
            &table(&[("Acme Corp", "WRONG1.DE")]),
            &table(&[("Acme Corp", "WRONG2.DE")]),
            dax_policy(),
        );
        let resolution = resolver.resolve(&names(&["Acme Corp"]), &seed(&[("WRONG3.DE", "Acme Corp")]));

        let resolved = &resolution.resolved["Acme Corp"];
        assert_eq!(resolved.ticker, t("ACME.DE"));
        assert_eq!(resolved.tier, TierKind::Manual);
    }

    #[test]
    fn test_tier_order_hardcoded_then_alias_then_seed() {
        let resolver = NameResolver::from_tables(
            ".DE",
            &BTreeMap::new(),
            &table(&[("Volkswagen (Vz)", "VOW3.DE")]),
            &table(&[("BMW", "BMW"), ("Volkswagen (Vz)", "VOW.DE")]),
            dax_policy(),
        );
        let resolution = resolver.resolve(
            &names(&["Volkswagen (Vz)", "BMW", "SAP SE", "Deutsche Börse"]),
            &seed(&[("SAP.DE", "SAP SE"), ("DB1.DE", "DEUTSCHE BOERSE AG"), ("X.DE", "Deutsche Boerse")]),
        );

        assert!(resolution.is_complete());
        assert_eq!(resolution.resolved["Volkswagen (Vz)"].tier, TierKind::Hardcoded);
        assert_eq!(resolution.resolved["Volkswagen (Vz)"].ticker, t("VOW3.DE"));
        // alias symbols are qualified with the market suffix
        assert_eq!(resolution.resolved["BMW"].ticker, t("BMW.DE"));
        assert_eq!(resolution.resolved["SAP SE"].tier, TierKind::SeedExact);
        assert_eq!(resolution.resolved["Deutsche Börse"].tier, TierKind::SeedNormalized);
        assert_eq!(resolution.resolved["Deutsche Börse"].ticker, t("X.DE"));
    }

    #[test]
    fn test_ambiguous_normalized_seed_names_fall_through() {
        let resolver = NameResolver::from_tables(".L", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy());
        let resolution = resolver.resolve(
            &names(&["Royal Dutch Shell"]),
            &seed(&[("RDSA.L", "Royal Dutch Shell A"), ("RDSB.L", "Royal-Dutch Shell"), ("RDS.L", "ROYAL DUTCH SHELL.")]),
        );

        assert!(!resolution.is_complete());
        assert!(resolution.complete_map().is_none());
    }

    #[test]
    fn test_seed_rows_sharing_a_name_are_not_guessed() {
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy());
        let resolution = resolver.resolve(
            &names(&["Volkswagen AG", "SAP SE"]),
            &seed(&[("VOW.DE", "Volkswagen AG"), ("VOW3.DE", "Volkswagen AG"), ("SAP.DE", "SAP SE")]),
        );

        assert!(resolution.unresolved.contains("Volkswagen AG"));
        assert!(!resolution.resolved.contains_key("Volkswagen AG"));
        assert_eq!(resolution.resolved["SAP SE"].tier, TierKind::SeedExact);
        assert!(resolution.complete_map().is_none());
    }

    #[test]
    fn test_directory_tier_requalifies_symbol() {
        let directory = StaticDirectory::new(vec![
            Listing { symbol: "HEN3".to_string(), name: "Henkel AG & Co. KGaA".to_string() },
        ]);
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy())
            .with_directory(&directory)
            .unwrap();

        let resolution = resolver.resolve(&names(&["Henkel AG & Co KGaA"]), &Snapshot::default());
        let resolved = &resolution.resolved["Henkel AG & Co KGaA"];
        assert_eq!(resolved.tier, TierKind::Directory);
        assert_eq!(resolved.ticker, t("HEN3.DE"));
    }

    #[test]
    fn test_search_accepts_top_candidate_above_threshold() {
        let search = StaticSearch::new(
            [(
                "Continental AG".to_string(),
                vec![
                    candidate("CTTAY", "Continental AG", "OTC", "US"),
                    candidate("CON.DE", "Continental Aktiengesellschaft", "XETRA", "DE"),
                    candidate("CON.DE", "Continental AG", "XETRA", "DE"),
                ],
            )]
            .into_iter()
            .collect(),
        );
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy())
            .with_search(&search);

        let resolution = resolver.resolve(&names(&["Continental AG"]), &Snapshot::default());
        let resolved = &resolution.resolved["Continental AG"];
        assert_eq!(resolved.tier, TierKind::Search);
        assert_eq!(resolved.ticker, t("CON.DE"));

        let trace = &resolution.debug["Continental AG"];
        assert_eq!(trace.len(), 3);
        assert!(trace[0].starts_with("4.00|XETRA|CON.DE|"));
    }

    #[test]
    fn test_search_rejects_wrong_exchange_even_with_high_score() {
        let mut policy = dax_policy();
        policy.accept_threshold = 0.5;
        let search = StaticSearch::new(
            [("Qiagen".to_string(), vec![candidate("QGEN", "Qiagen", "NYSE", "DE")])]
                .into_iter()
                .collect(),
        );
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), policy)
            .with_search(&search);

        let resolution = resolver.resolve(&names(&["Qiagen"]), &Snapshot::default());
        assert!(resolution.unresolved.contains("Qiagen"));
        assert_eq!(resolution.debug["Qiagen"].len(), 1);
    }

    #[test]
    fn test_search_rejects_below_threshold() {
        let search = StaticSearch::new(
            [("Metro".to_string(), vec![candidate("MEO.DE", "Metropolitan Holdings", "XETRA", "US")])]
                .into_iter()
                .collect(),
        );
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy())
            .with_search(&search);

        let resolution = resolver.resolve(&names(&["Metro"]), &Snapshot::default());
        assert!(resolution.unresolved.contains("Metro"));
    }

    #[test]
    fn test_search_no_hits_is_traced() {
        let search = StaticSearch::default();
        let resolver = NameResolver::from_tables(".DE", &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new(), dax_policy())
            .with_search(&search);

        let resolution = resolver.resolve(&names(&["Nobody GmbH"]), &Snapshot::default());
        assert_eq!(resolution.debug["Nobody GmbH"], vec!["search:no_hits".to_string()]);
        assert!(resolution.complete_map().is_none());
    }

    #[test]
    fn test_search_only_consulted_for_names_reaching_it() {
        struct Counting(std::cell::Cell<usize>);
        impl NameSearch for Counting {
            fn search(&self, _query: &str) -> Result<Vec<Candidate>> {
                self.0.set(self.0.get() + 1);
                Ok(Vec::new())
            }
        }

        let search = Counting(std::cell::Cell::new(0));
        let resolver = NameResolver::from_tables(
            ".DE",
            &table(&[("Acme", "ACME")]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            dax_policy(),
        )
        .with_search(&search);

        resolver.resolve(&names(&["Acme", "Beta", "Gamma"]), &Snapshot::default());
        assert_eq!(search.0.get(), 2);
    }

    #[test]
    fn test_complete_map_and_tier_counts() {
        let resolver = NameResolver::from_tables(
            ".DE",
            &table(&[("Acme Corp", "ACME.DE")]),
            &BTreeMap::new(),
            &BTreeMap::new(),
            dax_policy(),
        );
        let resolution = resolver.resolve(&names(&["Acme Corp", "SAP SE"]), &seed(&[("SAP.DE", "SAP SE")]));

        let map = resolution.complete_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("Acme Corp"), Some(&t("ACME.DE")));
        assert_eq!(resolution.tier_counts()[&TierKind::SeedExact], 1);
    }
}
