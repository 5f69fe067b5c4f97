//! Bounded-concurrency batch runner.
//!
//! A batch is seeded into one [`WorkQueue`]; a fixed number of workers each
//! loop "pop one item, scrape it, keep the record" until the queue is empty.
//! Workers are futures joined on the calling task, so they interleave only at
//! the browser's await points. [`WorkQueue::pop`] never awaits, which makes a
//! pop exclusive: no item reaches two workers.

use crate::browser::{Browser, TabId};
use crate::config::Timeouts;
use crate::executor::{Progress, scrape_item};
use crate::models::{FetchItem, ResultMap, ScrapeRecord};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, instrument};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Shared FIFO of pending items. Each pop hands out the item together with
/// its 1-based position in pop order.
#[derive(Debug)]
pub struct WorkQueue {
    inner: Mutex<QueueState>,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<FetchItem>,
    popped: usize,
}

impl WorkQueue {
    pub fn new(items: impl IntoIterator<Item = FetchItem>) -> Self {
        Self {
            inner: Mutex::new(QueueState {
                items: items.into_iter().collect(),
                popped: 0,
            }),
        }
    }

    /// Take the next item, or `None` once the queue is drained.
    pub fn pop(&self) -> Option<(usize, FetchItem)> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let item = state.items.pop_front()?;
        state.popped += 1;
        Some((state.popped, item))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs batches of scrapes over at most `concurrency` tabs at a time.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyPool {
    concurrency: usize,
    timeouts: Timeouts,
}

impl Default for ConcurrencyPool {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY, Timeouts::default())
    }
}

impl ConcurrencyPool {
    /// A pool of `concurrency` workers (at least one).
    pub fn new(concurrency: usize, timeouts: Timeouts) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeouts,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Scrape every item and return one record per item URL.
    ///
    /// The map is only assembled after every worker has finished, so callers
    /// never observe a partial batch.
    #[instrument(level = "info", skip_all, fields(items = items.len(), requester = ?requester))]
    pub async fn run_batch<B: Browser>(
        &self,
        browser: &B,
        items: Vec<FetchItem>,
        requester: Option<TabId>,
    ) -> ResultMap {
        if items.is_empty() {
            return ResultMap::new();
        }

        let total = items.len();
        let start = Instant::now();
        info!(total, concurrency = self.concurrency, "Starting concurrent tab automation");

        let queue = WorkQueue::new(items);
        debug!(pending = queue.len(), "Seeded work queue");
        let workers = (0..self.concurrency).map(|worker| self.worker(worker, browser, &queue, total, requester));
        let per_worker: Vec<Vec<ScrapeRecord>> = join_all(workers).await;
        debug_assert!(queue.is_empty());

        let mut results = ResultMap::with_capacity(total);
        for record in per_worker.into_iter().flatten() {
            results.insert(record.url.clone(), record);
        }

        let failed = results.values().filter(|r| r.is_error()).count();
        info!(
            total,
            succeeded = results.len() - failed,
            failed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            listeners = browser.events().listener_count(),
            "Finished processing batch"
        );
        results
    }

    async fn worker<B: Browser>(
        &self,
        worker: usize,
        browser: &B,
        queue: &WorkQueue,
        total: usize,
        requester: Option<TabId>,
    ) -> Vec<ScrapeRecord> {
        let mut done = Vec::new();
        while let Some((index, item)) = queue.pop() {
            debug!(worker, index, url = %item.url, "Worker picked item");
            let progress = Progress {
                requester,
                index,
                total,
            };
            done.push(scrape_item(browser, &item, progress, self.timeouts).await);
        }
        debug!(worker, handled = done.len(), "Worker finished");
        done
    }
}
