//! HTML extraction provider
//!
//! Extraction is driven entirely by [`ExtractionRules`] from the site table.
//! The default provider uses `scraper`; callers run it on the blocking pool
//! since parsing a large results page is CPU-bound.

use crate::config::{ExtractionRules, FieldRule};
use crate::{HarvestError, Result};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

/// Field name → extracted value
pub type ExtractedRow = BTreeMap<String, String>;

/// Turns markup into rows
pub trait HtmlExtractor: Send + Sync {
    /// One row per element matching `rules.row_selector`
    ///
    /// Fields whose selector matches nothing, or whose value is blank, are
    /// left out of the row.
    fn extract_rows(&self, html: &str, rules: &ExtractionRules) -> Result<Vec<ExtractedRow>>;

    /// Fields read from the whole document
    fn extract_fields(&self, html: &str, fields: &[FieldRule]) -> Result<ExtractedRow>;
}

/// [`HtmlExtractor`] backed by `scraper`
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperExtractor;

impl HtmlExtractor for ScraperExtractor {
    fn extract_rows(&self, html: &str, rules: &ExtractionRules) -> Result<Vec<ExtractedRow>> {
        let row_selector = parse_selector(&rules.row_selector)?;
        let fields = compile_fields(&rules.fields)?;
        let document = Html::parse_document(html);

        Ok(document
            .select(&row_selector)
            .map(|row| read_fields(row, &fields))
            .collect())
    }

    fn extract_fields(&self, html: &str, fields: &[FieldRule]) -> Result<ExtractedRow> {
        let fields = compile_fields(fields)?;
        let document = Html::parse_document(html);
        Ok(read_fields(document.root_element(), &fields))
    }
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| HarvestError::Parsing(format!("invalid selector '{}': {}", selector, e)))
}

fn compile_fields(fields: &[FieldRule]) -> Result<Vec<(&FieldRule, Selector)>> {
    fields
        .iter()
        .map(|rule| Ok((rule, parse_selector(&rule.selector)?)))
        .collect()
}

fn read_fields(scope: ElementRef<'_>, fields: &[(&FieldRule, Selector)]) -> ExtractedRow {
    let mut row = ExtractedRow::new();

    for (rule, selector) in fields {
        let Some(element) = scope.select(selector).next() else {
            continue;
        };

        let value = match &rule.attribute {
            Some(attribute) => element
                .value()
                .attr(attribute)
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            None => normalize_text(element),
        };

        if !value.is_empty() {
            row.insert(rule.name.clone(), value);
        }
    }

    row
}

/// Element text with runs of whitespace collapsed
fn normalize_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
