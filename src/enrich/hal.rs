use async_trait::async_trait;
use reqwest::Url;
use scraper::Html;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::Enricher;
use crate::dto::Record;
use crate::error::ServiceError;
use crate::scrape::{normalize_ws, Fetcher};

pub const HAL_SEARCH_URL: &str = "https://api.archives-ouvertes.fr/search/";

const HAL_FIELDS: &str = "docid,label_s,uri_s,abstract_s,abstractFr_s,description_s,abstract_en_s,\
abstract_fr_s,authFullName_s,producedDate_tdate,publicationDate_tdate,submittedDate_tdate,keyword_s,domain_s";

const DATE_FIELDS: [&str; 3] = ["publicationDate_tdate", "producedDate_tdate", "submittedDate_tdate"];

const ABSTRACT_FIELDS: [&str; 5] = [
    "abstract_s",
    "abstractFr_s",
    "description_s",
    "abstract_en_s",
    "abstract_fr_s",
];

/// Publications from the HAL open archive, searched by full author name.
pub struct HalEnricher {
    search_url: String,
    rows: usize,
}

impl Default for HalEnricher {
    fn default() -> Self {
        HalEnricher {
            search_url: HAL_SEARCH_URL.to_string(),
            rows: 100,
        }
    }
}

impl HalEnricher {
    pub fn with_search_url(search_url: &str) -> Self {
        HalEnricher {
            search_url: search_url.to_string(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Enricher for HalEnricher {
    fn field(&self) -> &'static str {
        "hal_data"
    }

    fn stamp_field(&self) -> &'static str {
        "last_hal_update"
    }

    async fn lookup(&self, fetcher: &Fetcher, name: &str) -> Result<Option<Value>, ServiceError> {
        let query = format!("authFullName_t:\"{name}\"");
        let rows = self.rows.to_string();
        let url = Url::parse_with_params(
            &self.search_url,
            &[
                ("q", query.as_str()),
                ("wt", "json"),
                ("fl", HAL_FIELDS),
                ("rows", rows.as_str()),
            ],
        )
        .map_err(ServiceError::internal_server_error)?;
        let body = fetcher.get_text(url.as_str()).await?;
        Ok(hal_data(&parse_hal_response(&body)?))
    }
}

pub fn parse_hal_response(body: &str) -> Result<Vec<Record>, ServiceError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| ServiceError::unprocessable(format!("invalid HAL response: {err}")))?;
    Ok(value
        .pointer("/response/docs")
        .and_then(Value::as_array)
        .map(|docs| docs.iter().filter_map(|doc| doc.as_object().cloned()).collect())
        .unwrap_or_default())
}

/// Summary stored under `hal_data`, or `None` when HAL returned nothing.
pub fn hal_data(docs: &[Record]) -> Option<Value> {
    if docs.is_empty() {
        return None;
    }
    let mut all_authors = BTreeSet::new();
    let mut years = BTreeSet::new();
    let mut keywords = BTreeSet::new();
    let mut domains = BTreeSet::new();

    let publications: Vec<Value> = docs
        .iter()
        .map(|doc| {
            let authors = strings(doc.get("authFullName_s"));
            let doc_keywords = strings(doc.get("keyword_s"));
            let doc_domains = strings(doc.get("domain_s"));
            let year = DATE_FIELDS
                .iter()
                .find_map(|field| doc.get(*field).and_then(Value::as_str))
                .map(|date| date.chars().take(4).collect::<String>());
            let summary = ABSTRACT_FIELDS
                .iter()
                .map(|field| strings(doc.get(*field)).join(", "))
                .find(|text| !text.is_empty())
                .map(|text| unescape(&text));

            let mut publication = Map::new();
            if let Some(id) = doc.get("docid") {
                publication.insert("hal_id".into(), id.clone());
            }
            if let Some(label) = doc.get("label_s").and_then(Value::as_str) {
                publication.insert("citation".into(), json!(unescape(label)));
            }
            publication.insert("authors".into(), json!(authors.join("; ")));
            if let Some(year) = &year {
                publication.insert("year".into(), json!(year));
            }
            if let Some(summary) = summary {
                publication.insert("abstract".into(), json!(summary));
            }
            publication.insert("keywords".into(), json!(doc_keywords.join("; ")));
            publication.insert("domain".into(), json!(doc_domains.join("; ")));
            if let Some(url) = doc.get("uri_s") {
                publication.insert("url".into(), url.clone());
            }

            all_authors.extend(authors);
            years.extend(year);
            keywords.extend(doc_keywords);
            domains.extend(doc_domains);
            Value::Object(publication)
        })
        .collect();

    Some(json!({
        "publication_count": publications.len(),
        "hal_publications": publications,
        "all_authors": all_authors,
        "years": years,
        "keywords": keywords,
        "domains": domains,
    }))
}

/// HAL fields are either a string or a list of strings.
fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(text)) if !text.trim().is_empty() => vec![text.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn unescape(text: &str) -> String {
    let fragment = Html::parse_fragment(text);
    normalize_ws(&fragment.root_element().text().collect::<String>())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
      "response": {
        "numFound": 2,
        "docs": [
          {
            "docid": 4012345,
            "label_s": "Alice Martin, Bruno Petit. Fusion d&#039;images radar. GRETSI, 2023",
            "uri_s": "https://hal.science/hal-04012345",
            "authFullName_s": ["Alice Martin", "Bruno Petit"],
            "publicationDate_tdate": "2023-09-01T00:00:00Z",
            "abstractFr_s": ["Nous proposons &lt;une&gt; méthode."],
            "keyword_s": ["radar", "fusion"],
            "domain_s": ["info.info-ts"]
          },
          {
            "docid": 3900001,
            "label_s": "Alice Martin. Thèse. 2021",
            "authFullName_s": "Alice Martin",
            "producedDate_tdate": "2021-12-10T00:00:00Z",
            "domain_s": ["info.info-ts", "spi.signal"]
          }
        ]
      }
    }"#;

    #[test]
    fn publications_and_aggregates() {
        let docs = parse_hal_response(RESPONSE).unwrap();
        let data = hal_data(&docs).unwrap();
        assert_eq!(data["publication_count"], 2);

        let first = &data["hal_publications"][0];
        assert_eq!(first["hal_id"], 4012345);
        assert_eq!(first["citation"], "Alice Martin, Bruno Petit. Fusion d'images radar. GRETSI, 2023");
        assert_eq!(first["authors"], "Alice Martin; Bruno Petit");
        assert_eq!(first["year"], "2023");
        assert_eq!(first["abstract"], "Nous proposons <une> méthode.");
        assert_eq!(first["keywords"], "radar; fusion");

        let second = &data["hal_publications"][1];
        assert_eq!(second["year"], "2021");
        assert!(second.get("abstract").is_none());
        assert!(second.get("url").is_none());

        assert_eq!(data["all_authors"], json!(["Alice Martin", "Bruno Petit"]));
        assert_eq!(data["years"], json!(["2021", "2023"]));
        assert_eq!(data["domains"], json!(["info.info-ts", "spi.signal"]));
    }

    #[test]
    fn no_documents_means_nothing_to_store() {
        let docs = parse_hal_response(r#"{"response": {"numFound": 0, "docs": []}}"#).unwrap();
        assert!(hal_data(&docs).is_none());
    }

    #[test]
    fn malformed_response_is_unprocessable() {
        let err = parse_hal_response("<html>maintenance</html>").unwrap_err();
        assert_eq!(err.status, crate::response::Status::UnprocessableEntity);
    }
}
