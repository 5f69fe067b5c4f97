//! Browser collaborator interface.
//!
//! The scrape pipeline never talks to a concrete browser. It drives tabs
//! through the [`Browser`] trait and listens for their lifecycle and result
//! events on an [`EventBus`].
//!
//! # Submodules
//!
//! - [`bus`]: Fan-out event bus with scoped, drop-to-unsubscribe listeners
//! - [`http`]: [`http::HttpBrowser`], a tab emulation over `reqwest` and `scraper`

pub mod bus;
pub mod http;

pub use bus::{EventBus, WaitError};

use crate::models::{ItemType, PageMessage, ScrapeResult};
use std::fmt;
use thiserror::Error;

/// Identifier of an open tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the browser reports back after creating a tab. The id may be absent
/// when the tab could not actually be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: Option<TabId>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Everything published on a browser's [`EventBus`].
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    /// A tab changed loading status.
    TabUpdated { tab_id: TabId, status: TabStatus },
    /// An injected extractor sent its result.
    RuntimeMessage {
        sender_tab: Option<TabId>,
        payload: ScrapeResult,
    },
}

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("No tab with id: {0}")]
    UnknownTab(TabId),
    #[error("Tab {0} has not finished loading")]
    NotLoaded(TabId),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid tab URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Extraction failed: {0}")]
    Extraction(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The primitives a scrape needs from a browser.
///
/// Implementations publish [`BrowserEvent::TabUpdated`] when a tab finishes
/// loading and [`BrowserEvent::RuntimeMessage`] when an injected extractor
/// reports back, both on the bus returned by [`Browser::events`].
pub trait Browser {
    /// Bus carrying this browser's tab and runtime events.
    fn events(&self) -> &EventBus;

    /// Open a tab at `url`. Background tabs (`active == false`) never take focus.
    async fn open_tab(&self, url: &str, active: bool) -> Result<TabInfo, BrowserError>;

    /// Run the extractor for `kind` inside `tab`. The result arrives later as
    /// a runtime message from that tab.
    async fn inject_extractor(&self, tab: TabId, kind: ItemType) -> Result<(), BrowserError>;

    /// Close `tab` and release everything it holds.
    async fn close_tab(&self, tab: TabId) -> Result<(), BrowserError>;

    /// Close `tab` without waiting. Used when the scrape owning the tab is
    /// dropped before it could close the tab itself.
    fn discard_tab(&self, tab: TabId);

    /// Deliver a message to the page loaded in `tab`.
    async fn send_to_tab(&self, tab: TabId, message: PageMessage) -> Result<(), BrowserError>;
}
