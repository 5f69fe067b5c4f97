//! Single-item scrape lifecycle.
//!
//! [`scrape_item`] drives one [`FetchItem`] through its tab:
//!
//! 1. **Progress**: tell the requesting page which item is being worked on
//! 2. **Open**: create a background tab at the item's URL
//! 3. **Load wait**: wait for the tab to finish loading (load timeout)
//! 4. **Result wait**: inject the extractor and wait for its typed result
//!    (result timeout)
//! 5. **Normalize**: turn the raw payload into a [`ScrapeRecord`]
//! 6. **Close**: remove the tab, whatever happened before
//!
//! Any failure in steps 2-5 becomes an error-shaped record, so a scrape
//! never fails as a whole. The tab is held by a [`TabLease`] from the moment
//! it exists; if the scrape future is dropped mid-flight the lease discards
//! the tab on drop.

use crate::browser::{Browser, BrowserError, TabId, WaitError};
use crate::config::Timeouts;
use crate::dates::parse_date_string;
use crate::models::{
    ERROR_TITLE, FetchItem, PageMessage, SYSTEM_AUTHOR, ScrapeRecord, ScrapeResult,
};
use crate::utils::truncate_for_log;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to create temp tab.")]
    TabCreation,
    #[error("Timeout waiting for tab {0} to load")]
    LoadTimeout(TabId),
    #[error("Timeout waiting for scrape result from tab {0}")]
    ResultTimeout(TabId),
    #[error("Event channel closed while waiting on tab {0}")]
    EventChannelClosed(TabId),
    #[error(transparent)]
    Browser(#[from] BrowserError),
}

/// Where and how to report progress for one item of a batch.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    /// Page that asked for the batch, if known.
    pub requester: Option<TabId>,
    /// 1-based position of the item in the batch.
    pub index: usize,
    pub total: usize,
}

/// Scrape one item. Always returns a record; failures are folded into an
/// error record and the tab is closed on every path, including cancellation.
#[instrument(level = "info", skip_all, fields(url = %item.url, kind = %item.item_type, index = progress.index, total = progress.total))]
pub async fn scrape_item<B: Browser>(
    browser: &B,
    item: &FetchItem,
    progress: Progress,
    timeouts: Timeouts,
) -> ScrapeRecord {
    notify_progress(browser, item, progress).await;
    info!(
        "Processing {} {}/{}: {}",
        item.item_type, progress.index, progress.total, item.url
    );

    let mut lease = None;
    let outcome = run_in_tab(browser, item, timeouts, &mut lease).await;
    let opened = lease.as_ref().map(TabLease::tab);
    if let Some(lease) = lease {
        lease.release().await;
    }

    match outcome {
        Ok(record) => {
            debug!(
                title = %record.title,
                content = %truncate_for_log(&record.content, 200),
                "Fetched item data"
            );
            record
        }
        Err(e) => {
            error!(tab_id = ?opened, error = %e, "Error processing item");
            error_record(item, &e.to_string())
        }
    }
}

/// Exclusive hold on one temp tab.
///
/// [`TabLease::release`] closes the tab and reports close errors. A lease
/// dropped without being released discards the tab synchronously.
#[derive(Debug)]
pub struct TabLease<'a, B: Browser> {
    browser: &'a B,
    tab: TabId,
    held: bool,
}

impl<'a, B: Browser> TabLease<'a, B> {
    pub fn new(browser: &'a B, tab: TabId) -> Self {
        Self { browser, tab, held: true }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    /// Close the tab. Close failures are logged, never returned.
    pub async fn release(mut self) {
        let closed = self.browser.close_tab(self.tab).await;
        self.held = false;
        if let Err(e) = closed {
            warn!(tab_id = %self.tab, error = %e, "Error closing temp tab");
        }
    }
}

impl<B: Browser> Drop for TabLease<'_, B> {
    fn drop(&mut self) {
        if self.held {
            warn!(tab_id = %self.tab, "Scrape abandoned; discarding temp tab");
            self.browser.discard_tab(self.tab);
        }
    }
}

/// Steps 2-5. Stores the lease in `lease` as soon as the tab exists so the
/// caller can close it whatever this returns.
async fn run_in_tab<'a, B: Browser>(
    browser: &'a B,
    item: &FetchItem,
    timeouts: Timeouts,
    lease: &mut Option<TabLease<'a, B>>,
) -> Result<ScrapeRecord, ScrapeError> {
    // Subscribe before the tab exists so a fast load is not missed.
    let mut loads = browser.events().subscribe();
    let info = browser.open_tab(&item.url, false).await?;
    let tab = info.id.ok_or(ScrapeError::TabCreation)?;
    *lease = Some(TabLease::new(browser, tab));

    loads.tab_loaded(tab, timeouts.load).await.map_err(|e| match e {
        WaitError::Timeout(_) => ScrapeError::LoadTimeout(tab),
        WaitError::Closed => ScrapeError::EventChannelClosed(tab),
    })?;
    drop(loads);

    let mut results = browser.events().subscribe();
    browser.inject_extractor(tab, item.item_type).await?;
    let raw = results
        .scrape_result(tab, item.item_type, timeouts.result)
        .await
        .map_err(|e| match e {
            WaitError::Timeout(_) => ScrapeError::ResultTimeout(tab),
            WaitError::Closed => ScrapeError::EventChannelClosed(tab),
        })?;

    Ok(normalize(item, raw))
}

async fn notify_progress<B: Browser>(browser: &B, item: &FetchItem, progress: Progress) {
    let Some(requester) = progress.requester else {
        return;
    };
    let message = PageMessage::LogUrlProcessing {
        item_type: item.item_type,
        index: progress.index,
        total: progress.total,
    };
    if let Err(e) = browser.send_to_tab(requester, message).await {
        warn!(tab_id = %requester, error = %e, "Could not send progress to requester");
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Build the unified record from an extractor's raw payload.
pub fn normalize(item: &FetchItem, raw: ScrapeResult) -> ScrapeRecord {
    let date_object = parse_date_string(item.date_str.as_deref());
    match raw {
        ScrapeResult::Note(note) => ScrapeRecord {
            item_type: item.item_type,
            title: non_empty(note.title).unwrap_or_else(|| "Note".to_string()),
            author: non_empty(note.author).unwrap_or_else(|| "Unknown Author".to_string()),
            content: non_empty(note.description).unwrap_or_else(|| "[No Content]".to_string()),
            date_object,
            url: item.url.clone(),
            is_public: note.is_public,
            to: None,
        },
        ScrapeResult::Email(email) => ScrapeRecord {
            item_type: item.item_type,
            title: non_empty(email.subject).unwrap_or_else(|| "Email Subject Not Found".to_string()),
            author: non_empty(email.from).unwrap_or_else(|| "Unknown Sender".to_string()),
            content: non_empty(email.body_html).unwrap_or_else(|| "[Email Body Not Found]".to_string()),
            date_object,
            url: item.url.clone(),
            is_public: None,
            to: Some(non_empty(email.to).unwrap_or_else(|| "Unknown Recipient(s)".to_string())),
        },
    }
}

/// Record standing in for an item that could not be scraped.
pub fn error_record(item: &FetchItem, message: &str) -> ScrapeRecord {
    ScrapeRecord {
        item_type: item.item_type,
        title: ERROR_TITLE.to_string(),
        author: SYSTEM_AUTHOR.to_string(),
        content: message.to_string(),
        date_object: parse_date_string(item.date_str.as_deref()).or_else(|| Some(Utc::now())),
        url: item.url.clone(),
        is_public: None,
        to: None,
    }
}
