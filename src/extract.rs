//! Field extraction from loaded note and email pages.
//!
//! This is the logic a tab runs when an extractor is injected into it. Each
//! selector in [`NoteSelectors`] / [`EmailSelectors`] may list several
//! alternatives; the first matching element with non-empty text wins.
//! Missing fields are left as `None` and defaulted later during
//! normalization.

use crate::browser::BrowserError;
use crate::config::{EmailSelectors, NoteSelectors};
use crate::models::{EmailPayload, ItemType, NotePayload, ScrapeResult};
use scraper::{ElementRef, Html, Selector};

/// Run the extractor for `kind` over a page's HTML.
pub fn extract(
    html: &str,
    kind: ItemType,
    notes: &NoteSelectors,
    emails: &EmailSelectors,
) -> Result<ScrapeResult, BrowserError> {
    let document = Html::parse_document(html);
    match kind {
        ItemType::Note => extract_note(&document, notes).map(ScrapeResult::Note),
        ItemType::Email => extract_email(&document, emails).map(ScrapeResult::Email),
    }
}

fn extract_note(document: &Html, selectors: &NoteSelectors) -> Result<NotePayload, BrowserError> {
    let public_marker = selector(&selectors.public_marker)?;
    Ok(NotePayload {
        title: first_text(document, &selector(&selectors.title)?),
        author: first_text(document, &selector(&selectors.author)?),
        description: first_text(document, &selector(&selectors.description)?),
        is_public: Some(document.select(&public_marker).next().is_some()),
    })
}

fn extract_email(document: &Html, selectors: &EmailSelectors) -> Result<EmailPayload, BrowserError> {
    let body = selector(&selectors.body)?;
    Ok(EmailPayload {
        subject: first_text(document, &selector(&selectors.subject)?),
        from: first_text(document, &selector(&selectors.from)?),
        body_html: document
            .select(&body)
            .map(|el| el.inner_html().trim().to_string())
            .find(|html| !html.is_empty()),
        to: first_text(document, &selector(&selectors.to)?),
    })
}

fn selector(css: &str) -> Result<Selector, BrowserError> {
    Selector::parse(css).map_err(|e| BrowserError::Extraction(format!("bad selector '{css}': {e}")))
}

fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document.select(selector).map(element_text).find(|text| !text.is_empty())
}

/// Visible text with runs of whitespace collapsed.
fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}
