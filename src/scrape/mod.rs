mod fetch;
pub mod offers;
pub mod pool;
pub mod profile;
pub mod projects;
pub mod tables;

pub use fetch::Fetcher;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::dto::{Partitioned, Record};
use crate::error::ServiceError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; listic-ingest/0.1)";

#[derive(Clone, Debug)]
pub struct ScrapeConfig {
    pub workers: usize,
    /// Pause each worker takes after a fetch before starting the next one.
    pub delay: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        ScrapeConfig {
            workers: 2,
            delay: Duration::from_secs(1),
            timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A page to extract one record from. `seed` holds fields already known from
/// a listing page (title, link); the extractor adds to them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Source {
    pub url: String,
    pub seed: Record,
}

impl Source {
    pub fn new(url: &str) -> Self {
        Source {
            url: url.to_string(),
            seed: Record::new(),
        }
    }

    pub fn with_seed(url: &str, seed: Record) -> Self {
        Source {
            url: url.to_string(),
            seed,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct SourceList(pub BTreeMap<String, Vec<String>>);

impl SourceList {
    pub fn parse(text: &str) -> Result<Self, ServiceError> {
        serde_json::from_str(text)
            .map_err(|err| ServiceError::bad_request(format!("invalid source list: {err}")))
    }
}

/// Turns one source into one record, or fails. No retry happens here or above.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, fetcher: &Fetcher, source: &Source) -> Result<Record, ServiceError>;
}

/// Records extracted per category, and how many sources of each category
/// could not be extracted.
#[derive(Debug, Default)]
pub struct Harvest {
    pub data: Partitioned,
    pub failures: BTreeMap<String, usize>,
}

/// Extracts every source through one shared pool. Categories keep the order
/// of their sources; failed sources are logged and counted.
pub async fn harvest(
    config: &ScrapeConfig,
    extractor: &dyn Extractor,
    sources: BTreeMap<String, Vec<Source>>,
) -> Result<Harvest, ServiceError> {
    let fetcher = Fetcher::new(config)?;
    let fetcher = &fetcher;
    let mut harvest = Harvest::default();
    let mut jobs = Vec::new();
    for (category, list) in sources {
        harvest.data.insert(&category, Vec::new());
        jobs.extend(list.into_iter().map(|source| (category.clone(), source)));
    }
    tracing::info!("extracting {} pages with {} workers", jobs.len(), config.workers);

    let results = pool::run_pool(jobs, config.workers, config.delay, |(_, source)| async move {
        extractor.extract(fetcher, &source).await
    })
    .await;
    for ((category, source), result) in results {
        match result {
            Ok(record) => {
                if let Some(records) = harvest.data.partitions.get_mut(&category) {
                    records.push(record);
                }
            }
            Err(err) => {
                tracing::warn!("{} ({}): {}", source.url, category, err.msg);
                *harvest.failures.entry(category).or_insert(0) += 1;
            }
        }
    }
    Ok(harvest)
}

pub(crate) fn selector(css: &str) -> Selector {
    // Selectors are literals in this crate; a bad one is a programming error.
    Selector::parse(css).unwrap_or_else(|err| panic!("invalid selector {css}: {err:?}"))
}

pub(crate) fn element_text(element: ElementRef) -> String {
    normalize_ws(&element.text().collect::<String>())
}

pub(crate) fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the whole document, one block element per line.
pub(crate) fn document_text(document: &Html) -> String {
    let blocks = selector("h1, h2, h3, h4, p, li, td, th, div.indent, span");
    let mut lines: Vec<String> = document
        .select(&blocks)
        .map(element_text)
        .filter(|line| !line.is_empty())
        .collect();
    lines.dedup();
    lines.join("\n")
}
