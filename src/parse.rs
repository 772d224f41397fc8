use scraper::{ElementRef, Html, Selector};

use crate::model::Record;
use crate::{Error, Result};

/// A data row needs at least this many `<td>` cells.
const MIN_CELLS: usize = 5;

/// Outcome of extracting one response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Records(Vec<Record>),
    Empty(EmptyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The document has no `<table>` at all.
    MissingTable,
    /// The layout table is there but the report grid inside it is not.
    MissingNestedTable,
    /// The grid exists but no row survived filtering.
    NoRows,
}

impl EmptyReason {
    /// Markup that doesn't match the expected table nesting.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, EmptyReason::NoRows)
    }
}

struct Selectors {
    table: Selector,
    zebra_row: Selector,
    row: Selector,
    cell: Selector,
    anchor: Selector,
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            table: create_selector("table")?,
            zebra_row: create_selector("tr.odd, tr.even")?,
            row: create_selector("tr")?,
            cell: create_selector("td")?,
            anchor: create_selector("a")?,
        })
    }
}

/// Pulls [`Record`]s out of the report grid.
///
/// APEX renders the grid as a `<table>` nested inside a layout `<table>`,
/// so the extractor always descends one level before reading rows.
#[derive(Debug, Clone)]
pub struct TableExtractor {
    document_base: String,
}

impl TableExtractor {
    /// `document_base` is prepended verbatim to every document link.
    pub fn new(document_base: impl Into<String>) -> Self {
        Self {
            document_base: document_base.into(),
        }
    }

    /// Attempts to parse the page, returning its rows in document order.
    pub fn extract(&self, body: &str) -> Result<Extraction> {
        let selectors = Selectors::new()?;
        let doc = Html::parse_document(body);

        let Some(outer) = doc.select(&selectors.table).next() else {
            return Ok(Extraction::Empty(EmptyReason::MissingTable));
        };
        // Skip the scope element itself in case `select` yields it.
        let Some(inner) = outer
            .select(&selectors.table)
            .find(|table| table.id() != outer.id())
        else {
            return Ok(Extraction::Empty(EmptyReason::MissingNestedTable));
        };

        let mut rows: Vec<ElementRef> = inner.select(&selectors.zebra_row).collect();
        if rows.is_empty() {
            rows = inner
                .select(&selectors.row)
                .filter(|row| row.select(&selectors.cell).next().is_some())
                .collect();
        }

        let records: Vec<Record> = rows
            .into_iter()
            .filter_map(|row| self.parse_row(row, &selectors))
            .collect();

        if records.is_empty() {
            return Ok(Extraction::Empty(EmptyReason::NoRows));
        }
        Ok(Extraction::Records(records))
    }

    /// `None` for rows with too few cells.
    fn parse_row(&self, row: ElementRef, selectors: &Selectors) -> Option<Record> {
        let cells: Vec<ElementRef> = row.select(&selectors.cell).collect();
        if cells.len() < MIN_CELLS {
            return None;
        }

        let document_url = cells
            .last()
            .and_then(|cell| cell.select(&selectors.anchor).next())
            .and_then(|a| a.value().attr("href"))
            .map(|href| format!("{}{}", self.document_base, href))
            .unwrap_or_default();

        Some(Record {
            year: cell_text(cells[1]),
            number: cell_text(cells[2]),
            extract: cell_text(cells[3]),
            document_url,
        })
    }
}

#[inline]
fn cell_text(cell: ElementRef) -> String {
    cell.text().collect::<String>().trim().to_string()
}

#[inline]
fn create_selector(sel_str: &str) -> Result<Selector> {
    Selector::parse(sel_str).map_err(|_| Error::ParseMissingSelector(sel_str.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://host:8080/apex/";

    fn row(class: &str, n: usize) -> String {
        format!(
            r#"<tr class="{class}"><td>x</td><td> 20{n:02} </td><td>{n}</td><td>
            Extract {n} </td><td><a href="f?p=104:{n}">doc</a></td></tr>"#
        )
    }

    fn wrap(rows: &str) -> String {
        format!(
            r#"<html><body><table class="layout"><tr><td>
            <table class="report"><tr><th>#</th><th>Year</th><th>Number</th><th>Extract</th><th>Doc</th></tr>
            {rows}
            </table></td></tr></table></body></html>"#
        )
    }

    fn records(html: &str) -> Vec<Record> {
        match TableExtractor::new(BASE).extract(html).unwrap() {
            Extraction::Records(records) => records,
            Extraction::Empty(reason) => panic!("expected records, got {reason:?}"),
        }
    }

    #[test]
    fn rows_keep_source_order() {
        let rows: String = (1..=4)
            .map(|n| row(if n % 2 == 0 { "even" } else { "odd" }, n))
            .collect();
        let recs = records(&wrap(&rows));

        let numbers: Vec<_> = recs.iter().map(|r| r.number.as_str()).collect();
        assert_eq!(numbers, ["1", "2", "3", "4"]);
        assert_eq!(recs[0].year, "2001");
        assert_eq!(recs[0].extract, "Extract 1");
    }

    #[test]
    fn extraction_is_idempotent() {
        let html = wrap(&(row("odd", 1) + &row("even", 2)));
        let extractor = TableExtractor::new(BASE);
        assert_eq!(
            extractor.extract(&html).unwrap(),
            extractor.extract(&html).unwrap()
        );
    }

    #[test]
    fn short_row_is_dropped_alone() {
        let mut rows = String::new();
        for n in 1..=10 {
            rows.push_str(&row("odd", n));
            if n == 5 {
                rows.push_str(r#"<tr class="even"><td>a</td><td>b</td><td>c</td></tr>"#);
            }
        }
        let recs = records(&wrap(&rows));
        assert_eq!(recs.len(), 10);
        assert!(recs.iter().all(|r| !r.number.is_empty()));
    }

    #[test]
    fn link_is_joined_to_document_base() {
        let html = wrap(
            r#"<tr class="odd"><td>1</td><td>2020</td><td>7</td><td>e</td><td><a href="f?p=104">pdf</a></td></tr>
               <tr class="even"><td>2</td><td>2021</td><td>8</td><td>e</td><td>no link</td></tr>
               <tr class="odd"><td>3</td><td>2022</td><td>9</td><td>e</td><td><a name="x">anchor</a></td></tr>"#,
        );
        let recs = records(&html);
        assert_eq!(recs[0].document_url, "http://host:8080/apex/f?p=104");
        assert_eq!(recs[1].document_url, "");
        assert_eq!(recs[2].document_url, "");
    }

    #[test]
    fn outer_table_alone_is_malformed() {
        let html = r#"<table><tr class="odd"><td>1</td><td>2</td><td>3</td><td>4</td><td>5</td></tr></table>"#;
        let res = TableExtractor::new(BASE).extract(html).unwrap();
        assert_eq!(res, Extraction::Empty(EmptyReason::MissingNestedTable));
        assert!(EmptyReason::MissingNestedTable.is_malformed());
    }

    #[test]
    fn no_table_is_empty() {
        let res = TableExtractor::new(BASE)
            .extract("<html><body><p>No data found.</p></body></html>")
            .unwrap();
        assert_eq!(res, Extraction::Empty(EmptyReason::MissingTable));
    }

    #[test]
    fn grid_without_data_rows_is_empty() {
        let res = TableExtractor::new(BASE).extract(&wrap("")).unwrap();
        assert_eq!(res, Extraction::Empty(EmptyReason::NoRows));
        assert!(!EmptyReason::NoRows.is_malformed());
    }

    #[test]
    fn unclassed_rows_fall_back_to_plain_rows() {
        let html = wrap(&(row("", 1) + &row("", 2)));
        let recs = records(&html);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].document_url, "http://host:8080/apex/f?p=104:2");
    }
}
