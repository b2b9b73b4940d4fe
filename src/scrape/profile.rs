use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::Html;
use serde_json::{json, Value};

use super::{document_text, element_text, selector, Extractor, Fetcher, Source};
use crate::dto::Record;
use crate::error::ServiceError;

lazy_static! {
    static ref UNIV_EMAIL: Regex = Regex::new(r"\b[\w.-]+@univ-smb\.fr\b").unwrap();
    static ref OBFUSCATED_AT: Regex = Regex::new(r"\s*[–-]@[–-]\s*|\s+at\s+|\s*\[at\]\s*").unwrap();
    static ref OBFUSCATED_DOT: Regex = Regex::new(r"\s+dot\s+|\s*\[dot\]\s*").unwrap();
    static ref LINKEDIN: Regex = Regex::new(r"https?://(www\.)?linkedin\.com/in/[^\s]+").unwrap();
    static ref OFFICE: Regex = Regex::new(r"Bureau\s*:\s*([A-Z]\d+)").unwrap();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    Email,
    Phone,
    Fax,
    Office,
    Address,
    Website,
    Theme,
    Subject,
    Summary,
}

impl Field {
    fn key(&self) -> &'static str {
        match self {
            Field::Email => "email",
            Field::Phone => "phone",
            Field::Fax => "fax",
            Field::Office => "office",
            Field::Address => "address",
            Field::Website => "website",
            Field::Theme => "theme",
            Field::Subject => "sujet",
            Field::Summary => "resume",
        }
    }

    fn from_label(label: &str) -> Option<Field> {
        let label = label.trim().to_lowercase();
        let field = match label.as_str() {
            "courriel" | "email" | "e-mail" | "mail" | "mél" => Field::Email,
            "téléphone" | "telephone" | "tél" | "tel" | "phone" => Field::Phone,
            "télécopie" | "fax" => Field::Fax,
            "bureau" | "office" => Field::Office,
            "adresse" | "address" => Field::Address,
            "site web" | "web" | "website" | "page web" => Field::Website,
            "thème" | "theme" | "thématique" | "thèmes" => Field::Theme,
            "sujet" | "sujet de thèse" | "subject" => Field::Subject,
            "résumé" | "resume" | "abstract" => Field::Summary,
            _ => return None,
        };
        Some(field)
    }
}

/// Reads member contact pages.
#[derive(Default)]
pub struct ProfileExtractor;

#[async_trait]
impl Extractor for ProfileExtractor {
    async fn extract(&self, fetcher: &Fetcher, source: &Source) -> Result<Record, ServiceError> {
        let html = fetcher.get_text(&source.url).await?;
        let mut record = source.seed.clone();
        for (field, value) in parse_profile(&html, &source.url) {
            record.entry(field).or_insert(value);
        }
        Ok(record)
    }
}

pub fn parse_profile(html: &str, url: &str) -> Record {
    let document = Html::parse_document(html);
    let mut record = Record::new();

    let heading = document
        .select(&selector("h1.entry-title"))
        .next()
        .or_else(|| document.select(&selector("h1")).next());
    if let Some(h1) = heading {
        let name = element_text(h1);
        if !name.is_empty() {
            record.insert("name".into(), json!(name));
        }
    }
    record.insert("url_listic".into(), json!(url));

    for paragraph in document.select(&selector("p")) {
        let text = element_text(paragraph);
        let Some((label, value)) = text.split_once(':') else {
            continue;
        };
        let Some(field) = Field::from_label(label) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let value = match field {
            Field::Email => normalize_email(value),
            Field::Website => website(paragraph, value),
            _ => value.to_string(),
        };
        push_value(&mut record, field.key(), value);
    }

    let text = document_text(&document);
    if !record.contains_key("email") {
        if let Some(found) = UNIV_EMAIL.find(&normalize_email(&text)) {
            record.insert("email".into(), json!(found.as_str()));
        }
    }
    if !record.contains_key("office") {
        if let Some(caps) = OFFICE.captures(&text) {
            record.insert("office".into(), json!(&caps[1]));
        }
    }
    if let Some(found) = LINKEDIN.find(&text) {
        record.insert("linkedin".into(), json!(found.as_str()));
    }
    record
}

/// Undoes the anti-spam spellings used on the site (` –@– `, ` at `, ` dot `).
pub fn normalize_email(raw: &str) -> String {
    let at = OBFUSCATED_AT.replace_all(raw.trim(), "@");
    OBFUSCATED_DOT.replace_all(&at, ".").into_owned()
}

// "Site web : http://…" paragraphs keep the link target when there is one.
fn website(paragraph: scraper::ElementRef, text_value: &str) -> String {
    paragraph
        .select(&selector("a"))
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
        .unwrap_or_else(|| text_value.to_string())
}

// A label seen twice (two phone lines) becomes a list.
fn push_value(record: &mut Record, key: &str, value: String) {
    match record.get_mut(key) {
        None => {
            record.insert(key.to_string(), json!(value));
        }
        Some(Value::Array(items)) => {
            if !items.iter().any(|item| item.as_str() == Some(value.as_str())) {
                items.push(json!(value));
            }
        }
        Some(existing) => {
            if existing.as_str() != Some(value.as_str()) {
                let first = existing.take();
                *existing = json!([first, value]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
        <html><body><main><article>
          <h1 class="entry-title">Jeanne EXEMPLE</h1>
          <div class="indent">
            <p>Courriel : jeanne.exemple –@– univ-smb.fr</p>
            <p>Téléphone : +33 4 50 09 65 00</p>
            <p>Téléphone : +33 4 79 75 81 00</p>
            <p>Bureau : A112</p>
            <p>Adresse : LISTIC, Polytech Annecy-Chambéry, 74944 Annecy</p>
            <p>Site web : <a href="https://jeanne.example.org">page perso</a></p>
            <p>Thème : Fusion d'informations</p>
          </div>
        </article></main></body></html>
    "#;

    #[test]
    fn reads_labelled_paragraphs() {
        let record = parse_profile(PROFILE, "https://www.univ-smb.fr/listic/x/");
        assert_eq!(record["name"], "Jeanne EXEMPLE");
        assert_eq!(record["email"], "jeanne.exemple@univ-smb.fr");
        assert_eq!(record["office"], "A112");
        assert_eq!(record["address"], "LISTIC, Polytech Annecy-Chambéry, 74944 Annecy");
        assert_eq!(record["website"], "https://jeanne.example.org");
        assert_eq!(record["theme"], "Fusion d'informations");
        assert_eq!(record["url_listic"], "https://www.univ-smb.fr/listic/x/");
    }

    #[test]
    fn repeated_label_becomes_list() {
        let record = parse_profile(PROFILE, "u");
        assert_eq!(record["phone"], json!(["+33 4 50 09 65 00", "+33 4 79 75 81 00"]));
    }

    #[test]
    fn missing_fields_are_absent() {
        let record = parse_profile("<html><body><h1>Paul DOC</h1><p>Rien ici</p></body></html>", "u");
        assert_eq!(record["name"], "Paul DOC");
        assert!(!record.contains_key("email"));
        assert!(!record.contains_key("phone"));
    }

    #[test]
    fn email_found_in_free_text() {
        let html = "<html><body><h1>Paul DOC</h1><p>Contact paul.doc@univ-smb.fr pour tout</p></body></html>";
        let record = parse_profile(html, "u");
        assert_eq!(record["email"], "paul.doc@univ-smb.fr");
    }

    #[test]
    fn obfuscated_addresses() {
        assert_eq!(normalize_email("a.b –@– univ-smb.fr"), "a.b@univ-smb.fr");
        assert_eq!(normalize_email("a at univ-smb dot fr"), "a@univ-smb.fr");
        assert_eq!(normalize_email("plain@univ-smb.fr"), "plain@univ-smb.fr");
    }
}
