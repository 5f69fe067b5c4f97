//! Data models for scrape requests, raw extraction payloads and unified records.
//!
//! This module defines the core data structures exchanged across the message
//! boundary and between the pipeline stages:
//! - [`FetchItem`]: One note or email the requesting page wants scraped
//! - [`ScrapeResult`]: The typed payload an injected extractor sends back
//! - [`ScrapeRecord`]: The unified, normalized record for one item
//! - [`ResultMap`]: The complete keyed output of one batch
//! - [`PageMessage`]: Messages pushed from the service to a page
//!
//! Field names follow the camelCase wire format used by the requesting page,
//! hence the `rename_all` attributes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Title given to records synthesized from a failed scrape.
pub const ERROR_TITLE: &str = "[Error processing item]";

/// Author given to records synthesized from a failed scrape.
pub const SYSTEM_AUTHOR: &str = "System";

/// The kind of item being scraped. Decides which extractor runs and how the
/// raw payload is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ItemType {
    Note,
    Email,
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Note => f.write_str("Note"),
            ItemType::Email => f.write_str("Email"),
        }
    }
}

/// A single item the requesting page wants scraped.
///
/// `url` doubles as the key of the item's entry in the [`ResultMap`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchItem {
    /// Address of the note or email detail page.
    pub url: String,
    /// Date string as displayed in the related list, if any.
    #[serde(default)]
    pub date_str: Option<String>,
    /// Whether this is a note or an email.
    #[serde(rename = "type")]
    pub item_type: ItemType,
}

/// Raw fields scraped from a note page. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotePayload {
    pub title: Option<String>,
    pub author: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

/// Raw fields scraped from an email page. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct EmailPayload {
    pub subject: Option<String>,
    pub from: Option<String>,
    #[serde(rename = "bodyHTML")]
    pub body_html: Option<String>,
    pub to: Option<String>,
}

/// Typed result message sent by an injected extractor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum ScrapeResult {
    #[serde(rename = "noteScrapeResult")]
    Note(NotePayload),
    #[serde(rename = "emailScrapeResult")]
    Email(EmailPayload),
}

impl ScrapeResult {
    /// The item type this result answers.
    pub fn item_type(&self) -> ItemType {
        match self {
            ScrapeResult::Note(_) => ItemType::Note,
            ScrapeResult::Email(_) => ItemType::Email,
        }
    }
}

/// Unified record produced exactly once per [`FetchItem`].
///
/// Error records share this shape: their title is [`ERROR_TITLE`], their
/// author is [`SYSTEM_AUTHOR`] and their content is the error message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRecord {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub title: String,
    pub author: String,
    pub content: String,
    pub date_object: Option<DateTime<Utc>>,
    pub url: String,
    /// Visibility flag for notes; always `None` for emails.
    pub is_public: Option<bool>,
    /// Recipients, emails only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl ScrapeRecord {
    /// True when this record was synthesized from a failure.
    pub fn is_error(&self) -> bool {
        self.title == ERROR_TITLE && self.author == SYSTEM_AUTHOR
    }
}

/// The complete, keyed output of one batch: item URL to record.
pub type ResultMap = HashMap<String, ScrapeRecord>;

/// Messages the service pushes to a page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageMessage {
    /// Progress notification for one item of a running batch.
    #[serde(rename_all = "camelCase")]
    LogUrlProcessing {
        item_type: ItemType,
        index: usize,
        total: usize,
    },
    /// Tells the page to start building its full case view.
    GenerateFullView,
}
