use async_trait::async_trait;
use reqwest::Url;
use scraper::Html;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::Enricher;
use crate::error::ServiceError;
use crate::scrape::{element_text, selector, Fetcher};

pub const DBLP_SEARCH_URL: &str = "https://dblp.org/search/author";

/// Publications from DBLP: an author search, then the first matching
/// author page.
pub struct DblpEnricher {
    search_url: String,
}

impl Default for DblpEnricher {
    fn default() -> Self {
        Self::with_search_url(DBLP_SEARCH_URL)
    }
}

impl DblpEnricher {
    pub fn with_search_url(search_url: &str) -> Self {
        DblpEnricher {
            search_url: search_url.to_string(),
        }
    }
}

#[async_trait]
impl Enricher for DblpEnricher {
    fn field(&self) -> &'static str {
        "dblp_data"
    }

    fn stamp_field(&self) -> &'static str {
        "last_dblp_update"
    }

    async fn lookup(&self, fetcher: &Fetcher, name: &str) -> Result<Option<Value>, ServiceError> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return Ok(None);
        }
        let search = Url::parse_with_params(&self.search_url, &[("q", normalized.as_str())])
            .map_err(ServiceError::internal_server_error)?;
        let (served_from, html) = fetcher.get_page(search.as_str()).await?;

        // A single exact match redirects straight to the author page.
        let (author_url, page) = if served_from.contains("pid") {
            (served_from, html)
        } else {
            let Some(link) = first_author_link(&html, &served_from) else {
                tracing::debug!("no DBLP author for {}", normalized);
                return Ok(None);
            };
            fetcher.get_page(&link).await?
        };
        Ok(parse_author_page(&page, &author_url, &normalized))
    }
}

/// "MARTIN, Alice" and "Alice MARTIN" both become "Alice Martin". Accents
/// are dropped.
pub fn normalize_name(name: &str) -> String {
    let name = name.trim();
    let ordered = match name.split_once(',') {
        Some((last, first)) if !first.trim().is_empty() => format!("{} {}", first.trim(), last.trim()),
        _ => name.to_string(),
    };
    let words: Vec<String> = ordered
        .split_whitespace()
        .map(|word| if is_upper(word) { title_case(word) } else { word.to_string() })
        .collect();
    fold_accents(&words.join(" "))
}

fn is_upper(word: &str) -> bool {
    word.chars().any(char::is_alphabetic) && !word.chars().any(char::is_lowercase)
}

fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut start = true;
    for c in word.chars() {
        if start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        start = !c.is_alphabetic();
    }
    out
}

fn fold_accents(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'à' | 'á' | 'â' | 'ä' => 'a',
            'À' | 'Â' => 'A',
            'ç' => 'c',
            'Ç' => 'C',
            'ô' | 'ö' => 'o',
            'Ô' => 'O',
            'ù' | 'û' | 'ü' => 'u',
            'î' | 'ï' => 'i',
            'Î' => 'I',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

fn first_author_link(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let href = document
        .select(&selector("li.entry.person a"))
        .find_map(|link| link.value().attr("href"))?;
    absolute(page_url, href)
}

fn absolute(base: &str, href: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(|url| url.to_string())
        .ok()
}

/// Summary stored under `dblp_data`, or `None` when the page lists no titled
/// publication. `author` is left out of the co-author lists.
pub fn parse_author_page(html: &str, author_url: &str, author: &str) -> Option<Value> {
    let document = Html::parse_document(html);
    let author = author.to_lowercase();
    let mut coauthors = BTreeSet::new();
    let mut venues = BTreeSet::new();
    let mut years = BTreeSet::new();
    let mut publications = Vec::new();

    for entry in document.select(&selector("li.entry")) {
        let first_text = |css: &str| {
            entry
                .select(&selector(css))
                .next()
                .map(element_text)
                .filter(|text| !text.is_empty())
        };
        let Some(title) = first_text(".title") else {
            continue;
        };
        let mut publication = Map::new();
        publication.insert("title".into(), json!(title));
        if let Some(year) = first_text(".year") {
            publication.insert("year".into(), json!(year));
            years.insert(year);
        }
        if let Some(venue) = first_text(".venue") {
            publication.insert("venue".into(), json!(venue));
            venues.insert(venue);
        }
        let names: Vec<String> = entry
            .select(&selector(".authors a"))
            .map(element_text)
            .filter(|name| !name.is_empty() && fold_accents(&name.to_lowercase()) != author)
            .collect();
        coauthors.extend(names.iter().cloned());
        publication.insert("coauthors".into(), json!(names));
        if let Some(url) = entry
            .select(&selector("a.publ"))
            .find_map(|link| link.value().attr("href"))
            .and_then(|href| absolute(author_url, href))
        {
            publication.insert("url".into(), json!(url));
        }
        publications.push(Value::Object(publication));
    }

    if publications.is_empty() {
        return None;
    }
    Some(json!({
        "dblp_url": author_url,
        "publication_count": publications.len(),
        "publications": publications,
        "coauthors": coauthors,
        "venues": venues,
        "years": years,
    }))
}
