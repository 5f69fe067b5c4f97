//! Tab emulation over plain HTTP.
//!
//! [`HttpBrowser`] gives each "tab" a background `reqwest` fetch. When the
//! fetch finishes the tab reports [`TabStatus::Complete`]; injecting an
//! extractor runs [`crate::extract`] over the stored page and publishes the
//! typed result as if the page had sent it. `data:` URLs load immediately,
//! and foreground `data:` tabs are persisted to the views directory so the
//! rendered document can be opened from disk.
//!
//! Requesting pages are registered with [`HttpBrowser::register_page`] and
//! receive their [`PageMessage`]s on a channel.

use super::{Browser, BrowserError, BrowserEvent, EventBus, TabId, TabInfo, TabStatus};
use crate::config::{EmailSelectors, HarvestConfig, NoteSelectors};
use crate::extract::extract;
use crate::models::{ItemType, PageMessage};
use crate::utils::decode_data_url;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

#[derive(Debug)]
enum PageContent {
    Loading,
    Loaded(String),
    Failed(String),
}

#[derive(Debug)]
struct Tab {
    content: PageContent,
    fetch: Option<JoinHandle<()>>,
}

type TabTable = Arc<Mutex<HashMap<TabId, Tab>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct HttpBrowser {
    client: Client,
    bus: EventBus,
    next_id: AtomicU64,
    tabs: TabTable,
    pages: Mutex<HashMap<TabId, mpsc::UnboundedSender<PageMessage>>>,
    note_selectors: NoteSelectors,
    email_selectors: EmailSelectors,
    views_dir: PathBuf,
}

impl HttpBrowser {
    pub fn new(config: &HarvestConfig) -> Result<Self, BrowserError> {
        let client = Client::builder().user_agent(config.user_agent.clone()).build()?;
        Ok(Self {
            client,
            bus: EventBus::default(),
            next_id: AtomicU64::new(1),
            tabs: Arc::default(),
            pages: Mutex::default(),
            note_selectors: config.note_selectors.clone(),
            email_selectors: config.email_selectors.clone(),
            views_dir: config.views_dir.clone(),
        })
    }

    /// Register a requesting page. Messages sent to the returned tab id arrive
    /// on the receiver until it is dropped.
    pub fn register_page(&self) -> (TabId, mpsc::UnboundedReceiver<PageMessage>) {
        let id = self.allocate_id();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.pages).insert(id, tx);
        debug!(tab_id = %id, "Registered requester page");
        (id, rx)
    }

    /// Number of tabs currently open (registered pages excluded).
    pub fn open_tab_count(&self) -> usize {
        lock(&self.tabs).len()
    }

    /// Drop a tab and abort its fetch if one is still running.
    fn remove_tab(&self, tab: TabId) -> bool {
        let removed = lock(&self.tabs).remove(&tab);
        match removed {
            Some(Tab { fetch, .. }) => {
                if let Some(handle) = fetch {
                    handle.abort();
                }
                true
            }
            None => false,
        }
    }

    fn allocate_id(&self) -> TabId {
        TabId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn publish_status(&self, tab_id: TabId, status: TabStatus) {
        self.bus.publish(BrowserEvent::TabUpdated { tab_id, status });
    }

    /// Load a `data:` URL in place; foreground documents are also written out.
    async fn open_data_tab(&self, id: TabId, url: &str, active: bool) -> Result<(), BrowserError> {
        let html = decode_data_url(url).ok_or_else(|| BrowserError::InvalidUrl {
            url: url.chars().take(64).collect(),
            reason: "unsupported data URL".to_string(),
        })?;

        if active {
            fs::create_dir_all(&self.views_dir).await?;
            let path = self
                .views_dir
                .join(format!("full-view-{}-{}.html", Utc::now().format("%Y%m%dT%H%M%S"), id));
            fs::write(&path, &html).await?;
            info!(path = %path.display(), bytes = html.len(), "Wrote rendered view");
        }

        lock(&self.tabs).insert(
            id,
            Tab {
                content: PageContent::Loaded(html),
                fetch: None,
            },
        );
        self.publish_status(id, TabStatus::Loading);
        self.publish_status(id, TabStatus::Complete);
        Ok(())
    }

    fn open_http_tab(&self, id: TabId, url: Url) {
        lock(&self.tabs).insert(
            id,
            Tab {
                content: PageContent::Loading,
                fetch: None,
            },
        );
        self.publish_status(id, TabStatus::Loading);

        let client = self.client.clone();
        let tabs = Arc::clone(&self.tabs);
        let bus = self.bus.clone();
        let handle = tokio::spawn(async move {
            let content = match fetch_page(&client, url.clone()).await {
                Ok(html) => {
                    debug!(tab_id = %id, %url, bytes = html.len(), "Tab loaded");
                    PageContent::Loaded(html)
                }
                Err(e) => {
                    warn!(tab_id = %id, %url, error = %e, "Tab failed to load");
                    PageContent::Failed(e.to_string())
                }
            };
            // The tab may already be closed.
            if let Some(tab) = lock(&tabs).get_mut(&id) {
                tab.content = content;
            } else {
                return;
            }
            bus.publish(BrowserEvent::TabUpdated {
                tab_id: id,
                status: TabStatus::Complete,
            });
        });

        if let Some(tab) = lock(&self.tabs).get_mut(&id) {
            tab.fetch = Some(handle);
        }
    }
}

async fn fetch_page(client: &Client, url: Url) -> Result<String, reqwest::Error> {
    client.get(url).send().await?.error_for_status()?.text().await
}

impl Browser for HttpBrowser {
    fn events(&self) -> &EventBus {
        &self.bus
    }

    #[instrument(level = "debug", skip(self))]
    async fn open_tab(&self, url: &str, active: bool) -> Result<TabInfo, BrowserError> {
        let id = self.allocate_id();
        if url.starts_with("data:") {
            self.open_data_tab(id, url, active).await?;
        } else {
            let parsed = Url::parse(url).map_err(|e| BrowserError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(BrowserError::InvalidUrl {
                    url: url.to_string(),
                    reason: format!("unsupported scheme '{}'", parsed.scheme()),
                });
            }
            self.open_http_tab(id, parsed);
        }
        Ok(TabInfo {
            id: Some(id),
            url: url.to_string(),
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn inject_extractor(&self, tab: TabId, kind: ItemType) -> Result<(), BrowserError> {
        let html = {
            let tabs = lock(&self.tabs);
            match &tabs.get(&tab).ok_or(BrowserError::UnknownTab(tab))?.content {
                PageContent::Loaded(html) => html.clone(),
                PageContent::Loading => return Err(BrowserError::NotLoaded(tab)),
                PageContent::Failed(reason) => {
                    return Err(BrowserError::Extraction(format!("page failed to load: {reason}")));
                }
            }
        };

        let payload = extract(&html, kind, &self.note_selectors, &self.email_selectors)?;
        self.bus.publish(BrowserEvent::RuntimeMessage {
            sender_tab: Some(tab),
            payload,
        });
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    async fn close_tab(&self, tab: TabId) -> Result<(), BrowserError> {
        if self.remove_tab(tab) || lock(&self.pages).remove(&tab).is_some() {
            Ok(())
        } else {
            Err(BrowserError::UnknownTab(tab))
        }
    }

    fn discard_tab(&self, tab: TabId) {
        if self.remove_tab(tab) {
            debug!(tab_id = %tab, "Discarded abandoned tab");
        }
    }

    async fn send_to_tab(&self, tab: TabId, message: PageMessage) -> Result<(), BrowserError> {
        let mut pages = lock(&self.pages);
        let sender = pages.get(&tab).ok_or(BrowserError::UnknownTab(tab))?;
        if sender.send(message).is_err() {
            pages.remove(&tab);
            return Err(BrowserError::UnknownTab(tab));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::models::{FetchItem, ScrapeResult};
    use crate::pool::ConcurrencyPool;
    use crate::utils::data_url_for;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn browser_in(dir: PathBuf) -> HttpBrowser {
        let config = HarvestConfig {
            views_dir: dir,
            ..Default::default()
        };
        HttpBrowser::new(&config).unwrap()
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("harvester-{}-{}", tag, std::process::id()))
    }

    /// Serve `/note/<n>` as a note page, `/hang` never answers, anything
    /// else is a 404.
    async fn serve_pages() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(answer(stream));
            }
        });
        addr
    }

    async fn answer(mut stream: TcpStream) {
        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") && read < buf.len() {
            match stream.read(&mut buf[read..]).await {
                Ok(0) | Err(_) => return,
                Ok(n) => read += n,
            }
        }
        let head = String::from_utf8_lossy(&buf[..read]);
        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

        let (status, body) = if path == "/hang" {
            tokio::time::sleep(Duration::from_secs(60)).await;
            return;
        } else if let Some(n) = path.strip_prefix("/note/") {
            (
                "200 OK",
                format!(
                    "<h1 class='note-title'>Note {n}</h1><span class='note-author'>Ann</span><div class='note-body'>Body {n}</div>"
                ),
            )
        } else {
            ("404 Not Found", "missing".to_string())
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    fn note_at(addr: SocketAddr, path: &str) -> FetchItem {
        FetchItem {
            url: format!("http://{addr}{path}"),
            date_str: None,
            item_type: ItemType::Note,
        }
    }

    #[tokio::test]
    async fn test_http_tabs_through_pool() {
        let addr = serve_pages().await;
        let browser = browser_in(temp_dir("http"));
        let mut items: Vec<FetchItem> = (0..5).map(|n| note_at(addr, &format!("/note/{n}"))).collect();
        items.push(note_at(addr, "/missing"));
        items.push(note_at(addr, "/hang"));

        let timeouts = Timeouts {
            load: Duration::from_secs(1),
            result: Duration::from_secs(1),
        };
        let results = ConcurrencyPool::new(4, timeouts).run_batch(&browser, items, None).await;

        assert_eq!(results.len(), 7);
        for n in 0..5 {
            let record = &results[&format!("http://{addr}/note/{n}")];
            assert!(!record.is_error(), "{record:?}");
            assert_eq!(record.title, format!("Note {n}"));
            assert_eq!(record.author, "Ann");
            assert_eq!(record.content, format!("Body {n}"));
        }

        let missing = &results[&format!("http://{addr}/missing")];
        assert!(missing.is_error());
        assert!(missing.content.contains("page failed to load"), "{}", missing.content);
        assert!(missing.content.contains("404"), "{}", missing.content);

        let hung = &results[&format!("http://{addr}/hang")];
        assert!(hung.is_error());
        assert!(hung.content.starts_with("Timeout waiting for tab"), "{}", hung.content);
        assert!(hung.content.ends_with("to load"));

        assert_eq!(browser.open_tab_count(), 0);
        assert_eq!(browser.events().listener_count(), 0);
    }

    #[tokio::test]
    async fn test_close_tab_stops_pending_fetch() {
        let addr = serve_pages().await;
        let browser = browser_in(temp_dir("close"));
        let mut loads = browser.events().subscribe();
        let tab = browser
            .open_tab(&format!("http://{addr}/hang"), false)
            .await
            .unwrap()
            .id
            .unwrap();
        assert_eq!(browser.open_tab_count(), 1);
        assert!(matches!(
            browser.inject_extractor(tab, ItemType::Note).await,
            Err(BrowserError::NotLoaded(_))
        ));

        browser.close_tab(tab).await.unwrap();
        assert_eq!(browser.open_tab_count(), 0);
        assert!(loads.tab_loaded(tab, Duration::from_millis(200)).await.is_err());
    }

    #[tokio::test]
    async fn test_discard_tab_removes_open_tab() {
        let addr = serve_pages().await;
        let browser = browser_in(temp_dir("discard"));
        let tab = browser
            .open_tab(&format!("http://{addr}/hang"), false)
            .await
            .unwrap()
            .id
            .unwrap();
        browser.discard_tab(tab);
        assert_eq!(browser.open_tab_count(), 0);
        // discarding twice is harmless
        browser.discard_tab(tab);
        assert!(matches!(browser.close_tab(tab).await, Err(BrowserError::UnknownTab(_))));
    }

    #[tokio::test]
    async fn test_data_tab_loads_and_extracts() {
        let browser = browser_in(temp_dir("bg"));
        let mut loads = browser.events().subscribe();
        let html = "<h1 class='note-title'>Hello</h1><span class='note-author'>Ann</span>";
        let info = browser.open_tab(&data_url_for(html), false).await.unwrap();
        let tab = info.id.unwrap();
        loads.tab_loaded(tab, Duration::from_secs(1)).await.unwrap();

        let mut results = browser.events().subscribe();
        browser.inject_extractor(tab, ItemType::Note).await.unwrap();
        let result = results
            .scrape_result(tab, ItemType::Note, Duration::from_secs(1))
            .await
            .unwrap();
        match result {
            ScrapeResult::Note(p) => {
                assert_eq!(p.title.as_deref(), Some("Hello"));
                assert_eq!(p.author.as_deref(), Some("Ann"));
                assert_eq!(p.is_public, Some(false));
            }
            other => panic!("unexpected result {other:?}"),
        }

        browser.close_tab(tab).await.unwrap();
        assert_eq!(browser.open_tab_count(), 0);
        assert!(matches!(browser.close_tab(tab).await, Err(BrowserError::UnknownTab(_))));
        // background data tabs are not persisted
        assert!(!temp_dir("bg").exists());
    }

    #[tokio::test]
    async fn test_foreground_data_tab_is_written_to_views_dir() {
        let dir = temp_dir("fg");
        let browser = browser_in(dir.clone());
        let info = browser.open_tab(&data_url_for("<p>view</p>"), true).await.unwrap();
        assert!(info.id.is_some());

        let written: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(written.len(), 1);
        let path = written[0].as_ref().unwrap().path();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<p>view</p>");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rejects_unsupported_urls() {
        let browser = browser_in(temp_dir("bad"));
        assert!(matches!(
            browser.open_tab("ftp://example.com/file", false).await,
            Err(BrowserError::InvalidUrl { .. })
        ));
        assert!(matches!(
            browser.open_tab("not a url", false).await,
            Err(BrowserError::InvalidUrl { .. })
        ));
        assert_eq!(browser.open_tab_count(), 0);
    }

    #[tokio::test]
    async fn test_inject_into_unknown_tab_fails() {
        let browser = browser_in(temp_dir("unknown"));
        let err = browser.inject_extractor(TabId(42), ItemType::Email).await.unwrap_err();
        assert!(matches!(err, BrowserError::UnknownTab(TabId(42))));
    }

    #[tokio::test]
    async fn test_page_messages_reach_registered_page() {
        let browser = browser_in(temp_dir("pages"));
        let (page, mut rx) = browser.register_page();
        browser.send_to_tab(page, PageMessage::GenerateFullView).await.unwrap();
        assert_eq!(rx.recv().await, Some(PageMessage::GenerateFullView));

        drop(rx);
        assert!(browser.send_to_tab(page, PageMessage::GenerateFullView).await.is_err());
        assert!(browser.send_to_tab(TabId(999), PageMessage::GenerateFullView).await.is_err());
    }
}
