// 🔎 Lookup Providers - external name sources consumed by the resolver
//
// Two capabilities:
// - ListingDirectory: a full listing of (symbol, name) for one exchange
// - NameSearch: ranked candidates for a free-text company name
//
// File-backed providers are always available (recorded listings, cached
// search results). Live HTTP providers are compiled with the `fetch` feature.

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::Path;

// ============================================================================
// CORE TYPES
// ============================================================================

/// One row of an exchange listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub symbol: String,
    pub name: String,
}

/// One candidate returned by a name search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCandidate")]
pub struct Candidate {
    pub symbol: String,
    pub name: String,
    pub exchange: String,
    pub country: String,
}

// Search APIs disagree on field names; the short exchange code wins when both exist
#[derive(Deserialize)]
struct RawCandidate {
    symbol: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "exchangeShortName")]
    exchange_short_name: Option<String>,
    #[serde(default)]
    exchange: Option<String>,
    #[serde(default)]
    country: Option<String>,
}

impl From<RawCandidate> for Candidate {
    fn from(raw: RawCandidate) -> Self {
        Candidate {
            symbol: raw.symbol,
            name: raw.name.unwrap_or_default(),
            exchange: raw
                .exchange_short_name
                .filter(|e| !e.is_empty())
                .or(raw.exchange)
                .unwrap_or_default(),
            country: raw.country.unwrap_or_default(),
        }
    }
}

/// ListingDirectory - fetched once per run, before any name is resolved
pub trait ListingDirectory {
    fn listings(&self) -> Result<Vec<Listing>>;
}

/// NameSearch - queried once per name that no cheaper tier resolved
pub trait NameSearch {
    fn search(&self, query: &str) -> Result<Vec<Candidate>>;
}

// ============================================================================
// IN-MEMORY / FILE-BACKED PROVIDERS
// ============================================================================

/// Listing held in memory (also the result of loading a listing CSV)
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    listings: Vec<Listing>,
}

impl StaticDirectory {
    pub fn new(listings: Vec<Listing>) -> Self {
        StaticDirectory { listings }
    }

    /// Load a `symbol,name` CSV listing (header required)
    pub fn from_csv(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open listing: {}", path.display()))?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let mut listings = Vec::new();
        for (line_num, result) in reader.records().enumerate() {
            let record = result.with_context(|| {
                format!("Failed to parse listing line {} in {}", line_num + 2, path.display())
            })?;
            let symbol = record.get(0).unwrap_or("").trim();
            let name = record.get(1).unwrap_or("").trim();
            if !symbol.is_empty() && !name.is_empty() {
                listings.push(Listing {
                    symbol: symbol.to_string(),
                    name: name.to_string(),
                });
            }
        }

        Ok(StaticDirectory { listings })
    }
}

impl ListingDirectory for StaticDirectory {
    fn listings(&self) -> Result<Vec<Listing>> {
        Ok(self.listings.clone())
    }
}

/// Search results keyed by exact query (recorded from an earlier live run)
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    results: BTreeMap<String, Vec<Candidate>>,
}

impl StaticSearch {
    pub fn new(results: BTreeMap<String, Vec<Candidate>>) -> Self {
        StaticSearch { results }
    }

    /// Load a JSON object `{ "<query>": [candidate, ...], ... }`
    pub fn from_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read search cache: {}", path.display()))?;
        let results = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse search cache: {}", path.display()))?;
        Ok(StaticSearch { results })
    }
}

impl NameSearch for StaticSearch {
    fn search(&self, query: &str) -> Result<Vec<Candidate>> {
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}

// ============================================================================
// LIVE HTTP PROVIDERS (feature = "fetch")
// ============================================================================

#[cfg(feature = "fetch")]
pub use http::{HttpListingDirectory, HttpNameSearch};

#[cfg(feature = "fetch")]
mod http {
    use super::{Candidate, Listing, ListingDirectory, NameSearch};
    use anyhow::{Context, Result};
    use regex::Regex;
    use reqwest::blocking::Client;
    use std::thread;
    use std::time::Duration;
    use tracing::{debug, warn};

    const USER_AGENT: &str =
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

    fn client() -> Result<Client> {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(25))
            .build()
            .context("Failed to build HTTP client")
    }

    /// Paged exchange listing scraped from StockAnalysis-style list pages
    ///
    /// Rows look like `<a href="/stocks/ALV/">ALV</a> ... <a href="/stocks/ALV/">Allianz SE</a>`,
    /// so symbol and name anchors alternate.
    pub struct HttpListingDirectory {
        base_url: String,
        max_pages: usize,
    }

    impl HttpListingDirectory {
        pub fn new(base_url: &str) -> Self {
            HttpListingDirectory {
                base_url: base_url.to_string(),
                max_pages: 49,
            }
        }

        fn page_url(&self, page: usize) -> String {
            if page == 1 {
                self.base_url.clone()
            } else {
                format!("{}?p={}", self.base_url, page)
            }
        }
    }

    impl ListingDirectory for HttpListingDirectory {
        fn listings(&self) -> Result<Vec<Listing>> {
            let client = client()?;
            let row_pattern = Regex::new(r#"(?i)/stocks/([A-Z0-9]{1,6})/">([^<]{2,100})</a>"#)
                .context("Invalid listing pattern")?;

            let mut listings = Vec::new();
            for page in 1..=self.max_pages {
                let url = self.page_url(page);
                let response = match client.get(&url).send() {
                    Ok(response) if response.status().is_success() => response,
                    Ok(response) => {
                        debug!(%url, status = %response.status(), "listing paging stopped");
                        break;
                    }
                    Err(err) => {
                        warn!(%url, %err, "listing page fetch failed, keeping pages so far");
                        break;
                    }
                };
                let html = response.text().context("Failed to read listing page")?;

                let hits: Vec<(String, String)> = row_pattern
                    .captures_iter(&html)
                    .map(|c| (c[1].to_string(), c[2].trim().to_string()))
                    .collect();

                let pairs: Vec<Listing> = hits
                    .chunks_exact(2)
                    .filter(|pair| {
                        pair[0].0 == pair[1].0 && pair[0].1.eq_ignore_ascii_case(&pair[0].0)
                    })
                    .map(|pair| Listing {
                        symbol: pair[0].0.to_uppercase(),
                        name: pair[1].1.clone(),
                    })
                    .collect();

                if pairs.is_empty() {
                    break;
                }
                listings.extend(pairs);
                thread::sleep(Duration::from_millis(200));
            }

            Ok(listings)
        }
    }

    /// FMP-style `search-name` endpoint
    pub struct HttpNameSearch {
        endpoint: String,
        api_key: Option<String>,
        limit: usize,
    }

    impl HttpNameSearch {
        pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
            HttpNameSearch {
                endpoint: endpoint.to_string(),
                api_key,
                limit: 100,
            }
        }

        /// Financial Modeling Prep, key from `FMP_API_KEY`
        pub fn fmp_from_env() -> Self {
            let api_key = std::env::var("FMP_API_KEY")
                .or_else(|_| std::env::var("fmp_api_key"))
                .ok();
            Self::new("https://financialmodelingprep.com/stable/search-name", api_key)
        }
    }

    impl NameSearch for HttpNameSearch {
        fn search(&self, query: &str) -> Result<Vec<Candidate>> {
            let mut params = vec![
                ("query", query.to_string()),
                ("limit", self.limit.to_string()),
            ];
            if let Some(key) = &self.api_key {
                params.push(("apikey", key.clone()));
            }

            let response = client()?
                .get(&self.endpoint)
                .query(&params)
                .send()
                .with_context(|| format!("Name search failed for {:?}", query))?;

            if !response.status().is_success() {
                debug!(query, status = %response.status(), "name search returned no data");
                return Ok(Vec::new());
            }

            // Unparseable bodies count as no hits
            Ok(response.json::<Vec<Candidate>>().unwrap_or_default())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_static_directory_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "symbol,name\nALV,Allianz SE\nBAS,BASF SE\n,No Symbol\n").unwrap();

        let directory = StaticDirectory::from_csv(file.path()).unwrap();
        let listings = directory.listings().unwrap();

        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].symbol, "ALV");
        assert_eq!(listings[1].name, "BASF SE");
    }

    #[test]
    fn test_candidate_accepts_fmp_field_names() {
        let json = r#"[
            {"symbol":"SAP.DE","name":"SAP SE","currency":"EUR","exchange":"Xetra Exchange","exchangeShortName":"XETRA"},
            {"symbol":"ALV.DE","name":"Allianz SE","exchange":"XETRA","country":null}
        ]"#;
        let candidates: Vec<Candidate> = serde_json::from_str(json).unwrap();

        assert_eq!(candidates[0].exchange, "XETRA");
        assert_eq!(candidates[0].country, "");
        assert_eq!(candidates[1].exchange, "XETRA");
    }

    #[test]
    fn test_static_search_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Siemens": [{{"symbol":"SIE.DE","name":"Siemens AG","exchange":"XETRA","country":"DE"}}]}}"#
        )
        .unwrap();

        let search = StaticSearch::from_json(file.path()).unwrap();
        assert_eq!(search.search("Siemens").unwrap()[0].symbol, "SIE.DE");
        assert!(search.search("Unknown").unwrap().is_empty());
    }
}
