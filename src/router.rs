//! Message-boundary dispatcher.
//!
//! Pages talk to the harvester with tagged JSON messages:
//!
//! | Action | Effect | Reply |
//! |--------|--------|-------|
//! | `initiateGenerateFullCaseView` | Sends `generateFullView` back to the sender tab | none |
//! | `openFullViewTab` | Opens `htmlContent` as a new document | none |
//! | `fetchItemDetails` | Scrapes `items` through the [`ConcurrencyPool`] | [`Reply`] |
//!
//! Anything else is ignored.

use crate::browser::{Browser, TabId};
use crate::models::{FetchItem, PageMessage, ResultMap};
use crate::pool::ConcurrencyPool;
use crate::utils::{data_url_for, truncate_for_log};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// A request received from a page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "action")]
pub enum Request {
    #[serde(rename = "initiateGenerateFullCaseView")]
    RelayGenerateView,
    #[serde(rename = "openFullViewTab", rename_all = "camelCase")]
    OpenRenderedView {
        #[serde(default)]
        html_content: Option<String>,
    },
    #[serde(rename = "fetchItemDetails")]
    FetchItemDetails {
        #[serde(default)]
        items: Option<Vec<FetchItem>>,
    },
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Interpret an arbitrary JSON message. Malformed messages become
    /// [`Request::Unknown`] and are ignored like unknown actions.
    pub fn from_value(value: Value) -> Self {
        serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(error = %e, "Unrecognised message");
            Request::Unknown
        })
    }
}

/// The reply to a `fetchItemDetails` request.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Success { details: ResultMap },
    Error { message: String },
}

/// Who sent a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sender {
    pub tab: Option<TabId>,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Missing requester tab for item fetch")]
    RequesterContextMissing,
}

/// Dispatches page requests to the browser and the scrape pool.
#[derive(Debug)]
pub struct RequestRouter<B> {
    browser: B,
    pool: ConcurrencyPool,
}

impl<B: Browser> RequestRouter<B> {
    pub fn new(browser: B, pool: ConcurrencyPool) -> Self {
        Self { browser, pool }
    }

    pub fn browser(&self) -> &B {
        &self.browser
    }

    /// Handle one request. Only `fetchItemDetails` produces a reply.
    #[instrument(level = "info", skip_all, fields(sender = ?sender.tab))]
    pub async fn handle(&self, request: Request, sender: Sender) -> Option<Reply> {
        match request {
            Request::RelayGenerateView => {
                self.relay_generate_view(sender).await;
                None
            }
            Request::OpenRenderedView { html_content } => {
                match html_content.filter(|html| !html.is_empty()) {
                    Some(html) => self.open_rendered_view(&html).await,
                    None => debug!("openFullViewTab without content ignored"),
                }
                None
            }
            Request::FetchItemDetails { items: Some(items) } => Some(self.fetch_item_details(items, sender).await),
            Request::FetchItemDetails { items: None } => {
                debug!("fetchItemDetails without items ignored");
                None
            }
            Request::Unknown => None,
        }
    }

    async fn relay_generate_view(&self, sender: Sender) {
        let Some(tab) = sender.tab else {
            debug!("Generate view trigger without sender tab ignored");
            return;
        };
        if let Err(e) = self.browser.send_to_tab(tab, PageMessage::GenerateFullView).await {
            warn!(tab_id = %tab, error = %e, "Could not relay generate view trigger");
        }
    }

    async fn open_rendered_view(&self, html: &str) {
        match self.browser.open_tab(&data_url_for(html), true).await {
            Ok(tab) => info!(
                tab_id = ?tab.id,
                url = %truncate_for_log(&tab.url, 60),
                bytes = html.len(),
                "Opened full view tab"
            ),
            Err(e) => error!(error = %e, "Could not open full view tab"),
        }
    }

    async fn fetch_item_details(&self, items: Vec<FetchItem>, sender: Sender) -> Reply {
        if items.is_empty() {
            return Reply::Success {
                details: ResultMap::new(),
            };
        }
        match self.run_batch(items, sender).await {
            Ok(details) => Reply::Success { details },
            Err(e) => {
                error!(error = %e, "Item fetch failed");
                Reply::Error { message: e.to_string() }
            }
        }
    }

    async fn run_batch(&self, items: Vec<FetchItem>, sender: Sender) -> Result<ResultMap, RouterError> {
        let requester = sender.tab.ok_or(RouterError::RequesterContextMissing)?;
        let kind = items[0].item_type;
        if items.iter().any(|item| item.item_type != kind) {
            warn!(first = %kind, "Batch mixes item types; each item is scraped by its own type");
        }
        info!(
            count = items.len(),
            kind = %kind,
            tab_id = %requester,
            concurrency = self.pool.concurrency(),
            "Fetching item details"
        );
        Ok(self.pool.run_batch(&self.browser, items, Some(requester)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{Call, FakeBrowser};
    use crate::config::Timeouts;
    use crate::models::ItemType;
    use serde_json::json;
    use std::time::Duration;

    const PAGE: TabId = TabId(1);

    fn router() -> RequestRouter<FakeBrowser> {
        RequestRouter::new(
            FakeBrowser::new(Duration::from_millis(10)).with_page(PAGE),
            ConcurrencyPool::new(4, Timeouts::default()),
        )
    }

    fn from_page() -> Sender {
        Sender { tab: Some(PAGE) }
    }

    #[test]
    fn test_request_parsing() {
        assert_eq!(
            Request::from_value(json!({"action": "initiateGenerateFullCaseView"})),
            Request::RelayGenerateView
        );
        assert_eq!(
            Request::from_value(json!({"action": "openFullViewTab", "htmlContent": "<p/>"})),
            Request::OpenRenderedView {
                html_content: Some("<p/>".to_string())
            }
        );
        let parsed = Request::from_value(json!({
            "action": "fetchItemDetails",
            "items": [{"url": "https://x.test/1", "dateStr": null, "type": "Email"}]
        }));
        match parsed {
            Request::FetchItemDetails { items: Some(items) } => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].item_type, ItemType::Email);
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(Request::from_value(json!({"action": "somethingElse"})), Request::Unknown);
        assert_eq!(Request::from_value(json!({"noAction": true})), Request::Unknown);
        assert_eq!(Request::from_value(json!("just a string")), Request::Unknown);
    }

    #[test]
    fn test_reply_serialization() {
        let value = serde_json::to_value(Reply::Success {
            details: ResultMap::new(),
        })
        .unwrap();
        assert_eq!(value, json!({"status": "success", "details": {}}));

        let value = serde_json::to_value(Reply::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"status": "error", "message": "boom"}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_item_details_replies_with_all_items() {
        let router = router();
        let request = Request::from_value(json!({
            "action": "fetchItemDetails",
            "items": [
                {"url": "https://x.test/e/1", "dateStr": "01/01/2024 09:00", "type": "Email"},
                {"url": "https://x.test/e/2", "dateStr": null, "type": "Email"}
            ]
        }));

        match router.handle(request, from_page()).await {
            Some(Reply::Success { details }) => {
                assert_eq!(details.len(), 2);
                assert_eq!(details["https://x.test/e/1"].author, "ada@example.com");
                assert_eq!(details["https://x.test/e/2"].to.as_deref(), Some("bob@example.com"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_fetch_replies_immediately() {
        let router = router();
        let request = Request::FetchItemDetails { items: Some(vec![]) };
        let reply = router.handle(request, Sender::default()).await;
        assert_eq!(
            reply,
            Some(Reply::Success {
                details: ResultMap::new()
            })
        );
        assert!(router.browser().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_without_requester_is_an_error() {
        let router = router();
        let request = Request::FetchItemDetails {
            items: Some(vec![FetchItem {
                url: "https://x.test/n/1".to_string(),
                date_str: None,
                item_type: ItemType::Note,
            }]),
        };
        let reply = router.handle(request, Sender::default()).await;
        assert_eq!(
            reply,
            Some(Reply::Error {
                message: "Missing requester tab for item fetch".to_string()
            })
        );
        assert!(router.browser().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_generate_view() {
        let router = router();
        let reply = router.handle(Request::RelayGenerateView, from_page()).await;
        assert_eq!(reply, None);
        assert_eq!(router.browser().calls(), vec![Call::Send(PAGE, PageMessage::GenerateFullView)]);

        // No sender tab: nothing to relay to.
        let reply = router.handle(Request::RelayGenerateView, Sender::default()).await;
        assert_eq!(reply, None);
        assert_eq!(router.browser().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rendered_view_opens_data_url() {
        let router = router();
        let request = Request::OpenRenderedView {
            html_content: Some("<h1>Case</h1>".to_string()),
        };
        assert_eq!(router.handle(request, from_page()).await, None);

        let calls = router.browser().calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Open(_, url) => assert_eq!(url, &data_url_for("<h1>Case</h1>")),
            other => panic!("unexpected call {other:?}"),
        }

        let request = Request::OpenRenderedView {
            html_content: Some(String::new()),
        };
        assert_eq!(router.handle(request, from_page()).await, None);
        assert_eq!(router.browser().calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_incomplete_requests_are_ignored() {
        let router = router();
        assert_eq!(router.handle(Request::Unknown, from_page()).await, None);
        assert_eq!(
            router
                .handle(Request::FetchItemDetails { items: None }, from_page())
                .await,
            None
        );
        assert!(router.browser().calls().is_empty());
    }
}
