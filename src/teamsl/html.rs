//! Parsers for the legacy `index.jsp` result pages.
//!
//! Only the documented shapes are understood: one result table with known
//! column headers, the `Seite X / Y (N Treffer)` summary line, and numeric
//! identifiers carried in anchor targets.

use crate::teamsl::adapters::AdapterKind;
use crate::teamsl::errors::UpstreamError;
use crate::teamsl::raw::HtmlRow;
use html_scraper::{ElementRef, Html, Selector};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};

static TABLE_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("table").unwrap());
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").unwrap());

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Seite\s+(\d+)\s*/\s*(\d+)\s*\((\d+)\s+Treffer").unwrap()
});
static NO_RESULTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)keine\s+(?:treffer|eintr(?:ä|ae)ge|ergebnisse|daten)\s+gefunden|keine\s+treffer").unwrap()
});
static HREF_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Za-z_]+)=(\d+)").unwrap());

/// Expected shape of a result table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Column headers in the order cells are reported.
    pub headers: &'static [&'static str],
    /// Query keys whose numeric values are pulled from anchors, e.g. `liga_id`.
    pub id_keys: &'static [&'static str],
    /// The id key that makes a row unique across all pages of one search.
    pub identity_key: &'static str,
    /// A row with fewer `td` cells is layout, not data.
    pub min_cells: usize,
}

/// Parsed `Seite X / Y (N Treffer)` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub page: u32,
    pub total_pages: u32,
    pub total_hits: u32,
}

impl Summary {
    pub const EMPTY: Summary = Summary {
        page: 0,
        total_pages: 0,
        total_hits: 0,
    };
}

fn document_text(html: &Html) -> String {
    html.root_element().text().collect::<Vec<_>>().join(" ")
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_header(text: &str) -> String {
    normalize_text(text)
        .trim_end_matches([':', '.'])
        .to_lowercase()
}

fn element_text(el: ElementRef<'_>) -> String {
    normalize_text(&el.text().collect::<String>())
}

fn children_named<'a>(el: ElementRef<'a>, names: &[&str]) -> Vec<ElementRef<'a>> {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| names.contains(&c.value().name()))
        .collect()
}

/// Rows owned by `table` itself; rows of nested tables are not included.
fn direct_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(children_named(child, &["tr"])),
            _ => {}
        }
    }
    rows
}

fn data_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    children_named(row, &["td"])
}

/// Column index of every expected header, when `row` carries all of them.
fn header_columns(row: ElementRef<'_>, spec: &TableSpec) -> Option<Vec<usize>> {
    let cells: Vec<String> = children_named(row, &["th", "td"])
        .into_iter()
        .map(|c| normalize_header(&element_text(c)))
        .collect();

    spec.headers
        .iter()
        .map(|expected| {
            let expected = normalize_header(expected);
            cells.iter().position(|c| *c == expected)
        })
        .collect()
}

fn extract_ids(row: ElementRef<'_>, keys: &[&str]) -> Vec<(String, i64)> {
    let mut ids: Vec<(String, i64)> = Vec::new();
    for anchor in row.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        for caps in HREF_ID_RE.captures_iter(href) {
            let key = &caps[1];
            if !keys.contains(&key) || ids.iter().any(|(k, _)| k == key) {
                continue;
            }
            if let Ok(value) = caps[2].parse() {
                ids.push((key.to_string(), value));
            }
        }
    }
    ids
}

fn build_row(row: ElementRef<'_>, columns: Option<&[usize]>, spec: &TableSpec) -> HtmlRow {
    let cells: Vec<String> = data_cells(row).into_iter().map(element_text).collect();
    let cells = match columns {
        Some(columns) => columns
            .iter()
            .map(|&i| cells.get(i).cloned().unwrap_or_default())
            .collect(),
        None => {
            let mut cells = cells;
            cells.resize(spec.headers.len(), String::new());
            cells
        }
    };
    HtmlRow {
        cells,
        ids: extract_ids(row, spec.id_keys),
    }
}

/// Locate the result table and return its data rows in document order.
///
/// The table is found by its header row; failing that, the table with the
/// most rows of at least `min_cells` cells wins and columns are positional.
/// `None` means no candidate table exists.
pub fn find_table_rows(html: &Html, spec: &TableSpec) -> Option<Vec<HtmlRow>> {
    let tables: Vec<ElementRef<'_>> = html.select(&TABLE_SELECTOR).collect();

    for table in &tables {
        let rows = direct_rows(*table);
        let Some((header_idx, columns)) = rows
            .iter()
            .enumerate()
            .find_map(|(i, row)| header_columns(*row, spec).map(|cols| (i, cols)))
        else {
            continue;
        };

        let data: Vec<HtmlRow> = rows[header_idx + 1..]
            .iter()
            .filter(|row| data_cells(**row).len() >= spec.min_cells)
            .map(|row| build_row(*row, Some(&columns), spec))
            .collect();
        trace!(rows = data.len(), "Result table located by header");
        return Some(data);
    }

    let best = tables
        .iter()
        .map(|table| {
            let rows: Vec<ElementRef<'_>> = direct_rows(*table)
                .into_iter()
                .filter(|row| data_cells(*row).len() >= spec.min_cells)
                .collect();
            rows
        })
        .filter(|rows| !rows.is_empty())
        .max_by_key(|rows| rows.len())?;

    debug!(rows = best.len(), "Result table located by row count (no header match)");
    Some(
        best.into_iter()
            .map(|row| build_row(row, None, spec))
            .collect(),
    )
}

/// Parse the summary line anywhere in the document text.
pub fn parse_summary(text: &str) -> Option<Summary> {
    let caps = SUMMARY_RE.captures(text)?;
    Some(Summary {
        page: caps[1].parse().ok()?,
        total_pages: caps[2].parse().ok()?,
        total_hits: caps[3].parse().ok()?,
    })
}

pub fn has_no_results_marker(text: &str) -> bool {
    NO_RESULTS_RE.is_match(text)
}

/// Summary of a submitted search. An explicit "no results" page is a
/// legitimate empty result; anything else without a summary is a format error.
pub fn parse_search_summary(adapter: AdapterKind, body: &str) -> Result<Summary, UpstreamError> {
    let text = document_text(&Html::parse_document(body));
    if let Some(summary) = parse_summary(&text) {
        return Ok(summary);
    }
    if has_no_results_marker(&text) {
        return Ok(Summary::EMPTY);
    }
    Err(UpstreamError::format(
        adapter,
        "search response has no result summary",
    ))
}

/// Data rows of one result page.
pub fn parse_result_page(
    adapter: AdapterKind,
    body: &str,
    spec: &TableSpec,
) -> Result<Vec<HtmlRow>, UpstreamError> {
    let html = Html::parse_document(body);
    if let Some(rows) = find_table_rows(&html, spec) {
        return Ok(rows);
    }
    if has_no_results_marker(&document_text(&html)) {
        return Ok(Vec::new());
    }
    Err(UpstreamError::format(adapter, "result table not found"))
}
