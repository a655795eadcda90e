// ⚙️ Index Profiles - per-index configuration as data
//
// Everything that differs between indices (market suffix, walk direction,
// ledger layout, name tables, search policy) lives here, so one walker and one
// resolver serve every index. Profiles load from JSON like classification
// rules do; `dax` and `ftse100` ship built in.

use crate::ledger::LedgerFormat;
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::warn;

// ============================================================================
// DIRECTION
// ============================================================================

/// Which way the walker replays events from the seed snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Seed is the most recent truth; walk toward inception
    #[default]
    Backward,

    /// Seed is an older truth; walk toward the present
    Forward,
}

// ============================================================================
// SEARCH POLICY
// ============================================================================

/// Scoring rules for the external fuzzy-search tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPolicy {
    /// Exchanges whose listings may be accepted (upper-case)
    pub allowed_exchanges: Vec<String>,

    /// Substrings of the candidate's country that earn the country bonus
    pub country_markers: Vec<String>,

    #[serde(default = "default_exchange_bonus")]
    pub exchange_bonus: f64,

    #[serde(default = "default_country_bonus")]
    pub country_bonus: f64,

    /// Minimum total score for the top candidate
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,

    /// Ranked candidates kept per name in the debug trace
    #[serde(default = "default_trace_len")]
    pub trace_len: usize,
}

fn default_exchange_bonus() -> f64 {
    2.0
}

fn default_country_bonus() -> f64 {
    1.0
}

// exchange + country + 0.7 similarity
fn default_accept_threshold() -> f64 {
    2.7
}

fn default_trace_len() -> usize {
    5
}

impl SearchPolicy {
    pub fn new(allowed_exchanges: &[&str], country_markers: &[&str]) -> Self {
        SearchPolicy {
            allowed_exchanges: allowed_exchanges.iter().map(|s| s.to_uppercase()).collect(),
            country_markers: country_markers.iter().map(|s| s.to_uppercase()).collect(),
            exchange_bonus: default_exchange_bonus(),
            country_bonus: default_country_bonus(),
            accept_threshold: default_accept_threshold(),
            trace_len: default_trace_len(),
        }
    }

    pub fn exchange_allowed(&self, exchange: &str) -> bool {
        let exchange = exchange.trim().to_uppercase();
        self.allowed_exchanges.iter().any(|e| *e == exchange)
    }

    pub fn country_matches(&self, country: &str) -> bool {
        let country = country.to_uppercase();
        self.country_markers.iter().any(|m| country.contains(m.as_str()))
    }
}

// ============================================================================
// INDEX PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProfile {
    /// Index code used in snapshot filenames (`constituents-<code>.csv`)
    pub code: String,

    /// Market suffix appended to resolved tickers (e.g. `.DE`)
    pub suffix: String,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub ledger: LedgerFormat,

    /// Operator-curated `name,symbol` CSV; authoritative when present
    #[serde(default)]
    pub manual_overrides: Option<PathBuf>,

    /// Known renamings and share-class quirks
    #[serde(default)]
    pub hardcoded: BTreeMap<String, String>,

    /// Lineage aliases (old company name → ticker valid for membership at the time)
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    pub search: SearchPolicy,
}

impl IndexProfile {
    /// Minimal profile with empty tables
    pub fn new(code: &str, suffix: &str, search: SearchPolicy) -> Self {
        IndexProfile {
            code: code.to_string(),
            suffix: suffix.to_string(),
            direction: Direction::Backward,
            ledger: LedgerFormat::default(),
            manual_overrides: None,
            hardcoded: BTreeMap::new(),
            aliases: BTreeMap::new(),
            search,
        }
    }

    /// Load a profile from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read profile file: {:?}", path.as_ref()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse profile JSON: {:?}", path.as_ref()))
    }

    /// Built-in profile by index code
    pub fn builtin(code: &str) -> Option<Self> {
        match code.to_lowercase().as_str() {
            "dax" => Some(Self::dax()),
            "ftse100" => Some(Self::ftse100()),
            _ => None,
        }
    }

    /// Resolve a `--profile` argument: built-in code first, then JSON path
    pub fn locate(code_or_path: &str) -> Result<Self> {
        if let Some(profile) = Self::builtin(code_or_path) {
            return Ok(profile);
        }
        Self::from_file(code_or_path)
            .with_context(|| format!("No built-in profile or profile file named {:?}", code_or_path))
    }

    /// Load the manual override table (missing file = empty table)
    pub fn manual_table(&self) -> Result<BTreeMap<String, String>> {
        match &self.manual_overrides {
            Some(path) if path.exists() => load_name_symbol_csv(path),
            Some(path) => {
                warn!(path = %path.display(), "manual override file not found, tier is empty");
                Ok(BTreeMap::new())
            }
            None => Ok(BTreeMap::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Built-in profiles
    // ------------------------------------------------------------------------

    /// DAX (Xetra / Frankfurt, `.DE`)
    pub fn dax() -> Self {
        let mut profile = IndexProfile::new(
            "dax",
            ".DE",
            SearchPolicy::new(&["XETRA", "FRANKFURT", "FWB", "FSE", "FRA"], &["DE", "GER"]),
        );
        profile.hardcoded = table(&[
            ("Qiagen NV", "QIA.DE"),
            ("Sartorius AG VZ", "SRT3.DE"),
            ("Porsche Automobile Holding VZO", "PAH3.DE"),
            ("Volkswagen (St)", "VOW.DE"),
            ("Volkswagen (Vz)", "VOW3.DE"),
            ("Wirecard AG", "WDI.DE"),
        ]);

        // Only where the ticker was actually used for DAX membership in the period
        profile.aliases = table(&[
            ("Deutsche Börse", "DB1.DE"),
            ("Hannover Rück SE", "HNR1.DE"),
            ("HeidelbergCement", "HEI.DE"),
            ("adidas-Salomon", "ADS.DE"),
            ("BMW", "BMW.DE"),
            ("Infineon", "IFX.DE"),
            ("Infineon Technologies AG", "IFX.DE"),
            ("Beiersdorf", "BEI.DE"),
            ("Deutsche Post", "DHL.DE"),
            ("Deutsche Bank", "DBK.DE"),
        ]);

        profile
    }

    /// FTSE 100 (London, `.L`)
    pub fn ftse100() -> Self {
        let mut profile = IndexProfile::new(
            "ftse100",
            ".L",
            SearchPolicy::new(&["LSE", "LON", "XLON"], &["GB", "UK", "UNITED KINGDOM"]),
        );

        profile.hardcoded = table(&[
            ("BT Group", "BT/A"),
            ("British Telecom", "BT/A"),
            ("British Telecommunications", "BT/A"),
            ("BT.A", "BT/A"),
            ("BP", "BP/"),
            ("BP PLC", "BP/"),
            ("BP.", "BP/"),
            ("Rolls Royce", "RR/"),
            ("Rolls-Royce", "RR/"),
            ("Rolls-Royce Holdings", "RR/"),
            ("RR.", "RR/"),
            ("Shell", "SHEL"),
            ("Royal Dutch Shell", "SHEL"),
            ("Royal Dutch Shell A&B", "SHEL"),
            ("Royal Dutch Shell B", "SHEL"),
            ("Intermediate Capital Group", "ICG"),
            ("Intermediate Capital Grup", "ICG"),
            ("Marks & Spencer Group", "MKS"),
            ("Marks and Spencer Group", "MKS"),
            ("M&S", "MKS"),
            ("Howden Joinery Group", "HWDN"),
            ("British Land Co", "BLND"),
            ("British Land Co.", "BLND"),
            ("Smith (DS)", "SMDS"),
            ("Hargreaves Lansdown", "HL."),
            ("BHP Group Plc", "BHP"),
            ("JD.", "JD/"),
            ("SN.", "SN/"),
            ("JE.", "JE/"),
            ("DC.", "DC/"),
            ("BG.", "BG/"),
            ("NG.", "NG/"),
            ("NWG", "NWG"),
        ]);

        profile.aliases = table(&[
            ("Rio Tinto", "RIO"),
            ("GlaxoSmithKline", "GSK"),
            ("AstraZeneca", "AZN"),
            ("Vodafone", "VOD"),
            ("Vodafone Group", "VOD"),
            ("WPP Group", "WPP"),
            ("3i Group", "III"),
            ("BAA", "BAA"),
            ("GKN", "GKN"),
            ("GKN PLC", "GKN"),
        ]);

        profile
    }
}

fn table(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, symbol)| (name.to_string(), symbol.to_string()))
        .collect()
}

/// Read a two-column `name,symbol` CSV (header required, blank cells skipped)
pub fn load_name_symbol_csv(path: &Path) -> Result<BTreeMap<String, String>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open name table: {}", path.display()))?;

    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers = reader.headers()?.clone();
    let column = |wanted: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(wanted))
            .with_context(|| format!("{} has no '{}' column", path.display(), wanted))
    };
    let name_col = column("name")?;
    let symbol_col = column("symbol")?;

    let mut entries = BTreeMap::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| {
            format!("Failed to parse line {} in {}", line_num + 2, path.display())
        })?;
        let name = record.get(name_col).unwrap_or("").trim();
        let symbol = record.get(symbol_col).unwrap_or("").trim();
        if !name.is_empty() && !symbol.is_empty() {
            entries.insert(name.to_string(), symbol.to_string());
        }
    }

    Ok(entries)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_profiles() {
        let dax = IndexProfile::builtin("DAX").unwrap();
        assert_eq!(dax.suffix, ".DE");
        assert_eq!(dax.hardcoded.get("Volkswagen (Vz)").map(String::as_str), Some("VOW3.DE"));
        assert!(dax.search.exchange_allowed("xetra"));
        assert!(!dax.search.exchange_allowed("NASDAQ"));

        let ftse = IndexProfile::builtin("ftse100").unwrap();
        assert_eq!(ftse.suffix, ".L");
        assert_eq!(ftse.hardcoded.get("BP").map(String::as_str), Some("BP/"));

        assert!(IndexProfile::builtin("sp500").is_none());
    }

    #[test]
    fn test_country_markers() {
        let policy = SearchPolicy::new(&["XETRA"], &["DE", "GER"]);
        assert!(policy.country_matches("Germany"));
        assert!(policy.country_matches("DE"));
        assert!(!policy.country_matches("US"));
    }

    #[test]
    fn test_profile_from_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "code": "omxs30",
                "suffix": ".ST",
                "direction": "forward",
                "hardcoded": {{"Ericsson B": "ERIC-B"}},
                "search": {{"allowed_exchanges": ["STO"], "country_markers": ["SE"]}}
            }}"#
        )
        .unwrap();

        let profile = IndexProfile::from_file(file.path()).unwrap();
        assert_eq!(profile.code, "omxs30");
        assert_eq!(profile.direction, Direction::Forward);
        assert_eq!(profile.search.accept_threshold, 2.7);
        assert_eq!(profile.search.trace_len, 5);
        assert_eq!(profile.ledger, LedgerFormat::default());
        assert!(profile.manual_table().unwrap().is_empty());
    }

    #[test]
    fn test_manual_table_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "name,symbol\nAcme Corp,ACME.DE\n,SKIP.DE\nEmpty Symbol,\n").unwrap();

        let mut profile = IndexProfile::dax();
        profile.manual_overrides = Some(file.path().to_path_buf());

        let manual = profile.manual_table().unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(manual.get("Acme Corp").map(String::as_str), Some("ACME.DE"));
    }

    #[test]
    fn test_manual_table_missing_file_is_empty() {
        let mut profile = IndexProfile::dax();
        profile.manual_overrides = Some(PathBuf::from("/nonexistent/overrides.csv"));
        assert!(profile.manual_table().unwrap().is_empty());
    }
}
