//! Fetch lifecycle events.
//!
//! The bus is a bounded `broadcast` channel: a slow subscriber loses the
//! oldest events and never holds up the fetch that publishes them.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    Started {
        fetcher_id: String,
        key: String,
    },
    Completed {
        fetcher_id: String,
        key: String,
        /// Served from a fresh cache entry without calling the source
        from_cache: bool,
        latency: Duration,
    },
    Failed {
        fetcher_id: String,
        key: String,
        error: String,
    },
}

impl FetchEvent {
    pub fn fetcher_id(&self) -> &str {
        match self {
            Self::Started { fetcher_id, .. }
            | Self::Completed { fetcher_id, .. }
            | Self::Failed { fetcher_id, .. } => fetcher_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FetchEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish without waiting. Events with no subscriber are dropped.
    pub fn publish(&self, event: FetchEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FetchEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream that skips over lost events.
    pub fn stream(&self) -> BoxStream<'static, FetchEvent> {
        stream::unfold(self.subscribe(), |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Fetch event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
