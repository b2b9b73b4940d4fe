use scraper::Html;

use super::selector;
use super::tables::{read_grid, Grid};
use crate::dto::Partitioned;

pub const PROJECTS_URL: &str = "https://www.univ-smb.fr/listic/projets-et-partenaires/liste-projets/";

#[derive(Clone, Copy)]
enum Layout {
    /// One `tr` per project.
    Rows,
    /// Cells of all rows run together; cut them by header count.
    Flat,
}

struct TableSpec {
    partition: &'static str,
    section: &'static str,
    index: usize,
    layout: Layout,
}

const TABLES: [TableSpec; 4] = [
    TableSpec { partition: "Internationaux", section: "Internationaux", index: 0, layout: Layout::Rows },
    TableSpec { partition: "Nationaux", section: "Nationaux", index: 0, layout: Layout::Rows },
    TableSpec { partition: "Regionaux", section: "Nationaux", index: 1, layout: Layout::Flat },
    TableSpec { partition: "Incubation", section: "Internationaux", index: 3, layout: Layout::Flat },
];

/// Every project table found on the page. A table missing from the layout is
/// logged and its partition left out.
pub fn parse_project_tables(html: &str) -> Partitioned {
    let document = Html::parse_document(html);
    let mut data = Partitioned::default();
    for spec in TABLES.iter() {
        let section = selector(&format!("div#{}", spec.section));
        let table = document
            .select(&section)
            .next()
            .and_then(|div| div.select(&selector("table")).nth(spec.index));
        let Some(table) = table else {
            tracing::warn!(
                "table {} of section '{}' not found, skipping '{}'",
                spec.index,
                spec.section,
                spec.partition
            );
            continue;
        };
        let grid = match spec.layout {
            Layout::Rows => read_grid(table),
            Layout::Flat => regroup(read_grid(table)),
        };
        data.insert(spec.partition, grid.records());
    }
    data
}

fn regroup(grid: Grid) -> Grid {
    let width = grid.headers.len();
    if width == 0 {
        return Grid { headers: grid.headers, rows: Vec::new() };
    }
    let cells: Vec<String> = grid.rows.into_iter().flatten().collect();
    let rows = cells.chunks(width).map(|chunk| chunk.to_vec()).collect();
    Grid { headers: grid.headers, rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
      <html><body>
        <div id="Internationaux">
          <table>
            <tr><th>Acronyme</th><th>Programme</th></tr>
            <tr><td>EU-ONE</td><td>H2020</td></tr>
            <tr><td>EU-TWO</td><td>Interreg</td></tr>
          </table>
          <table><tr><td>décor</td></tr></table>
          <table><tr><td>décor</td></tr></table>
          <table>
            <tbody><tr><th>Start-up</th><th>Année</th></tr></tbody>
            <tbody><tr><td>Acme</td><td>2021</td><td>Beta</td><td>2023</td></tr></tbody>
          </table>
        </div>
        <div id="Nationaux">
          <table>
            <tr><th>Acronyme</th><th>Financeur</th></tr>
            <tr><td>ANR-X</td><td>ANR</td></tr>
          </table>
          <table>
            <tbody><tr><th>Projet</th><th>Région</th></tr></tbody>
            <tbody><tr><td>R1</td><td>AURA</td></tr></tbody>
          </table>
        </div>
      </body></html>
    "#;

    #[test]
    fn reads_all_four_tables() {
        let data = parse_project_tables(PAGE);
        let international = data.get("Internationaux").unwrap();
        assert_eq!(international.len(), 2);
        assert_eq!(international[1]["Programme"], "Interreg");
        assert_eq!(data.get("Nationaux").unwrap()[0]["Financeur"], "ANR");
        assert_eq!(data.get("Regionaux").unwrap()[0]["Région"], "AURA");
        let incubation = data.get("Incubation").unwrap();
        assert_eq!(incubation.len(), 2);
        assert_eq!(incubation[1]["Start-up"], "Beta");
        assert_eq!(incubation[1]["Année"], "2023");
    }

    #[test]
    fn missing_section_leaves_partition_out() {
        let data = parse_project_tables("<html><body><div id='Nationaux'></div></body></html>");
        assert!(data.partitions.is_empty());
    }
}
