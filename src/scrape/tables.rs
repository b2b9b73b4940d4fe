use reqwest::Url;
use scraper::{ElementRef, Html};
use serde_json::json;

use super::{element_text, selector};
use crate::dto::Record;

/// Header texts and the cell texts of every data row.
#[derive(Debug, Default, PartialEq)]
pub struct Grid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    /// One record per row, header to cell. Surplus cells are dropped and
    /// missing ones left out.
    pub fn records(&self) -> Vec<Record> {
        self.rows
            .iter()
            .map(|row| {
                self.headers
                    .iter()
                    .zip(row.iter())
                    .map(|(header, cell)| (header.clone(), json!(cell)))
                    .collect()
            })
            .collect()
    }
}

pub fn read_grid(table: ElementRef) -> Grid {
    let mut grid = Grid::default();
    for row in table.select(&selector("tr")) {
        let headers: Vec<String> = row.select(&selector("th")).map(element_text).collect();
        grid.headers.extend(headers);
        let cells: Vec<String> = row.select(&selector("td")).map(element_text).collect();
        if !cells.is_empty() {
            grid.rows.push(cells);
        }
    }
    grid
}

/// Rows of the first table of a member listing page: `name` from the first
/// cell, `title` from the second when there is one, and `url_listic` when the
/// name links to a personal page.
pub fn parse_member_table(html: &str, page_url: &str) -> Vec<Record> {
    let document = Html::parse_document(html);
    let Some(table) = document.select(&selector("table")).next() else {
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();
    let mut members = Vec::new();
    for row in table.select(&selector("tr")) {
        let cells: Vec<ElementRef> = row.select(&selector("td")).collect();
        let Some(first) = cells.first() else {
            continue;
        };
        let name = element_text(*first);
        if name.is_empty() {
            continue;
        }
        let mut record = Record::new();
        record.insert("name".into(), json!(name));
        if let Some(title) = cells.get(1).map(|cell| element_text(*cell)) {
            if !title.is_empty() {
                record.insert("title".into(), json!(title));
            }
        }
        let link = first
            .select(&selector("a"))
            .next()
            .and_then(|a| a.value().attr("href"));
        if let Some(href) = link {
            let absolute = match &base {
                Some(base) => base.join(href).map(|u| u.to_string()).unwrap_or_else(|_| href.to_string()),
                None => href.to_string(),
            };
            record.insert("url_listic".into(), json!(absolute));
        }
        members.push(record);
    }
    members
}
