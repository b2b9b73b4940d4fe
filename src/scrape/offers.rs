use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html};
use serde_json::{json, Map, Value};

use super::{element_text, normalize_ws, selector, Extractor, Fetcher, Source};
use crate::dto::{Partitioned, Record};
use crate::error::ServiceError;

pub const OFFERS_URL: &str = "https://www.univ-smb.fr/listic/informations/emplois/";

pub const CATEGORIES: [&str; 7] = [
    "postes_enseignant_chercheur",
    "postes_enseignant_chercheur_contractuel",
    "postes_ingenieur",
    "post_doc",
    "theses",
    "theses_passees",
    "stages",
];

// Longest headings first: "…CHERCHEUR CONTRACTUEL" also contains "…CHERCHEUR".
const SECTIONS: [(&str, &str); 7] = [
    ("postes d'enseignant-chercheur contractuel", "postes_enseignant_chercheur_contractuel"),
    ("postes d'enseignant-chercheur", "postes_enseignant_chercheur"),
    ("postes d'ingenieur", "postes_ingenieur"),
    ("offres de post-doc", "post_doc"),
    ("offres de thèses passées", "theses_passees"),
    ("offres de thèses", "theses"),
    ("offres de stages", "stages"),
];

const URL_SEGMENTS: [(&str, &str); 4] = [
    ("/enseignant-chercheur/", "postes_enseignant_chercheur"),
    ("/post-doc/", "post_doc"),
    ("/stage/", "stages"),
    ("/ingenieur/", "postes_ingenieur"),
];

lazy_static! {
    static ref SITE_UPDATE: Regex = Regex::new(r"maj\s*:\s*(\d{2}/\d{2}/\d{4})").unwrap();
    static ref CLOSED_MARK: Regex = Regex::new(r"(?i)\s*fermé\s*!?").unwrap();
    static ref EMAIL: Regex = Regex::new(r"[\w.-]+@[\w.-]+\.\w+").unwrap();
    static ref PDF_FIELDS: Vec<(&'static str, Vec<Regex>)> = vec![
        ("dates", patterns(&[
            r"Date\s*(?:de publication|de début|limite|de candidature)?\s*:?\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
            r"(?:Publié le|Début|Publié|Candidater avant)\s*:?\s*(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})",
            r"(?:Date|Publié le|Début|Publié|Candidater avant|avant le)\s*:?\s*(\d{1,2}\s+[[:alpha:]]+\s+\d{2,4})",
        ])),
        ("lieu", patterns(&[
            r"Lieu\s*:?\s*([^\n\r.]{3,50})",
            r"Localisation\s*:?\s*([^\n\r.]{3,50})",
            r"Campus\s*:?\s*([^\n\r.]{3,50})",
        ])),
        ("duree_contrat", patterns(&[
            r"Durée\s*:?\s*([^\n\r.]{3,50})",
            r"Type de contrat\s*:?\s*([^\n\r.]{3,50})",
            r"CDD\s*de\s*([^\n\r.]{3,50})",
        ])),
        ("salaire", patterns(&[
            r"Salaire\s*:?\s*([^\n\r.]{3,80})",
            r"Rémunération\s*:?\s*([^\n\r.]{3,80})",
            r"Montant\s*:?\s*([^\n\r.]{3,80})",
        ])),
        ("contact", patterns(&[
            r"Contact\s*:?\s*([^\n\r.]{3,100})",
            r"(?:Contactez|Contacter|Pour postuler)\s*:?\s*([^\n\r.]{3,100})",
        ])),
        ("theme", patterns(&[
            r"(?:Mots-clés|Keywords|Key words|Thématiques)\s*:?\s*([^\n\r]{5,100})",
            r"(?:Thème|Theme|Sujet|Subject)\s*:?\s*([^\n\r]{5,100})",
        ])),
        ("description", patterns(&[
            r"(?:Description|Résumé|Abstract|Descriptif|Présentation)\s*:?\s*([^\n\r]{20,500})",
            r"(?:Contexte|Context)\s*:?\s*([^\n\r]{20,500})",
        ])),
        ("competences_requises", patterns(&[
            r"(?:Profil|Compétences|Qualifications|Skills)\s*(?:recherché|requises|required)?\s*:?\s*([^\n\r]{10,500})",
        ])),
    ];
}

fn patterns(sources: &[&str]) -> Vec<Regex> {
    sources
        .iter()
        .map(|source| Regex::new(&format!("(?im){source}")).unwrap())
        .collect()
}

/// All PDF links of the listing page, one record per offer under its
/// category, plus a `metadata` entry describing the page.
pub fn parse_offer_listing(html: &str, page_url: &str) -> Partitioned {
    let document = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let mut data = Partitioned::default();
    for category in CATEGORIES {
        data.insert(category, Vec::new());
    }

    // Headings and links come back in document order, so the last heading
    // seen is the section a link belongs to.
    let mut section: Option<&'static str> = None;
    for element in document.select(&selector("h1, h2, h3, h4, h5, strong, a")) {
        if element.value().name() != "a" {
            if let Some(found) = section_of(&element_text(element)) {
                section = Some(found);
            }
            continue;
        }
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let title = element_text(element);
        if title.is_empty() || !href.ends_with(".pdf") {
            continue;
        }
        let category = categorize(href, &title, section);
        let url = match &base {
            Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        };
        let mut offer = Record::new();
        offer.insert("titre".into(), json!(CLOSED_MARK.replace_all(&title, "").trim()));
        offer.insert("url".into(), json!(url));
        offer.insert("ferme".into(), json!(is_closed(element, &title)));
        offer.insert("url_listic".into(), json!(url));
        if let Some(offers) = data.partitions.get_mut(category) {
            offers.push(offer);
        }
    }

    let text: String = document.root_element().text().collect();
    let site_update = SITE_UPDATE
        .captures(&text)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default();
    let counts: Map<String, Value> = data
        .partitions
        .iter()
        .map(|(category, offers)| (category.clone(), json!(offers.len())))
        .collect();
    let total: usize = data.partitions.values().map(Vec::len).sum();
    tracing::info!("{} offers found on {}", total, page_url);
    data.extras.insert(
        "metadata".into(),
        json!({
            "date_maj_site": site_update,
            "source_url": page_url,
            "nombre_total_offres": total,
            "categories": counts,
        }),
    );
    data
}

fn section_of(heading: &str) -> Option<&'static str> {
    let heading = heading.to_lowercase().replace('é', "e").replace('’', "'");
    SECTIONS
        .iter()
        .find(|(title, _)| heading.contains(&title.replace('é', "e")))
        .map(|(_, category)| *category)
}

fn categorize(href: &str, title: &str, section: Option<&'static str>) -> &'static str {
    if href.contains("/these/") {
        return match section {
            Some("theses_passees") => "theses_passees",
            _ => "theses",
        };
    }
    if let Some((_, category)) = URL_SEGMENTS.iter().find(|(segment, _)| href.contains(segment)) {
        return *category;
    }
    if let Some(category) = section {
        return category;
    }
    let title = title.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|word| title.contains(word));
    if has(&["enseignant", "chercheur"]) {
        "postes_enseignant_chercheur"
    } else if has(&["post-doc", "postdoc"]) {
        "post_doc"
    } else if has(&["stage"]) {
        "stages"
    } else if has(&["ingénieur", "ingenieur"]) {
        "postes_ingenieur"
    } else {
        "theses"
    }
}

fn is_closed(link: ElementRef, title: &str) -> bool {
    let closed = |text: &str| {
        let text = text.to_lowercase();
        text.contains("fermé") || text.contains("ferme")
    };
    if closed(title) {
        return true;
    }
    link.parent()
        .and_then(ElementRef::wrap)
        .map(|parent| closed(&element_text(parent)))
        .unwrap_or(false)
}

/// Labelled details found in the text of an offer PDF. Several matches for
/// one field are joined with `"; "`; fields with no match are left out.
pub fn parse_offer_text(text: &str) -> Record {
    let mut record = Record::new();
    for (field, regexes) in PDF_FIELDS.iter() {
        let mut found: Vec<String> = Vec::new();
        for regex in regexes {
            for caps in regex.captures_iter(text) {
                let value = normalize_ws(&caps[1]);
                if !value.is_empty() && !found.contains(&value) {
                    found.push(value);
                }
            }
        }
        if !found.is_empty() {
            record.insert(field.to_string(), json!(found.join("; ")));
        }
    }
    let mut emails: Vec<&str> = Vec::new();
    for found in EMAIL.find_iter(text) {
        if !emails.contains(&found.as_str()) {
            emails.push(found.as_str());
        }
    }
    if !emails.is_empty() {
        record.insert("email".into(), json!(emails.join("; ")));
    }
    record
}

/// Downloads an offer PDF and adds what its text reveals to the listing
/// fields.
#[derive(Default)]
pub struct OfferPdfExtractor;

#[async_trait]
impl Extractor for OfferPdfExtractor {
    async fn extract(&self, fetcher: &Fetcher, source: &Source) -> Result<Record, ServiceError> {
        if !source.url.ends_with(".pdf") {
            return Err(ServiceError::unprocessable(format!(
                "{} does not point to a PDF",
                source.url
            )));
        }
        let bytes = fetcher.get_bytes(&source.url).await?;
        let url = source.url.clone();
        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(ServiceError::internal_server_error)?
            .map_err(|err| ServiceError::unprocessable(format!("unreadable PDF {url}: {err}")))?;
        let mut record = source.seed.clone();
        for (field, value) in parse_offer_text(&text) {
            record.entry(field).or_insert(value);
        }
        Ok(record)
    }
}
