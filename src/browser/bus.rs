//! Fan-out event bus with scoped subscriptions.
//!
//! Every waiter owns a [`Subscription`] with its own unbounded queue, so a
//! burst of events for other tabs can never push a waiter's own event out.
//! Dropping the subscription unsubscribes, so a wait that completes, times
//! out or is abandoned on an error path never leaves a listener behind.

use super::{BrowserEvent, TabId, TabStatus};
use crate::models::{ItemType, ScrapeResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

/// Why a [`Subscription`] stopped waiting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("event bus closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Listeners {
    next_id: u64,
    senders: HashMap<u64, mpsc::UnboundedSender<BrowserEvent>>,
}

type SharedListeners = Arc<Mutex<Listeners>>;

fn lock(listeners: &SharedListeners) -> MutexGuard<'_, Listeners> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared fan-out channel for tab updates and runtime messages.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    listeners: SharedListeners,
}

impl EventBus {
    /// Publish an event to every live subscription. Events with no listener
    /// are dropped.
    pub fn publish(&self, event: BrowserEvent) {
        let mut listeners = lock(&self.listeners);
        if listeners.senders.is_empty() {
            trace!("Event published with no subscribers");
            return;
        }
        listeners.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Register a new listener. It only sees events published after this call.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut listeners = lock(&self.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.senders.insert(id, tx);
        Subscription {
            id,
            rx,
            listeners: Arc::clone(&self.listeners),
        }
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).senders.len()
    }
}

/// A listener owned by exactly one waiter. Unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<BrowserEvent>,
    listeners: SharedListeners,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        lock(&self.listeners).senders.remove(&self.id);
    }
}

impl Subscription {
    /// Wait for the first event `select` maps to `Some`, bounded by `limit`.
    ///
    /// On timeout the pending receive is dropped; nothing keeps running.
    pub async fn next_matching<T, F>(&mut self, limit: Duration, mut select: F) -> Result<T, WaitError>
    where
        F: FnMut(&BrowserEvent) -> Option<T>,
    {
        let rx = &mut self.rx;
        let wait = async move {
            while let Some(event) = rx.recv().await {
                if let Some(found) = select(&event) {
                    return Ok(found);
                }
            }
            Err(WaitError::Closed)
        };

        match timeout(limit, wait).await {
            Ok(outcome) => outcome,
            Err(_) => Err(WaitError::Timeout(limit)),
        }
    }

    /// Wait until `tab` reports it finished loading.
    pub async fn tab_loaded(&mut self, tab: TabId, limit: Duration) -> Result<(), WaitError> {
        self.next_matching(limit, |event| match event {
            BrowserEvent::TabUpdated { tab_id, status } if *tab_id == tab && *status == TabStatus::Complete => {
                Some(())
            }
            _ => None,
        })
        .await
    }

    /// Wait for the scrape result of the expected kind sent from `tab`.
    pub async fn scrape_result(
        &mut self,
        tab: TabId,
        kind: ItemType,
        limit: Duration,
    ) -> Result<ScrapeResult, WaitError> {
        self.next_matching(limit, |event| match event {
            BrowserEvent::RuntimeMessage { sender_tab, payload }
                if *sender_tab == Some(tab) && payload.item_type() == kind =>
            {
                Some(payload.clone())
            }
            _ => None,
        })
        .await
    }
}
