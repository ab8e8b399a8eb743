//! Request coalescing.
//!
//! Concurrent callers asking for the same key share one execution of the
//! producer. The first caller spawns a driver task that polls the producer
//! stream and appends every item to the execution's history, announced on a
//! `watch` channel. Each subscriber reads the history at its own pace: the
//! first caller sees every item, later callers start from the most recent
//! item published before they joined. The registry entry lives until the
//! producer finishes, or until every subscriber has gone away, whichever
//! comes first.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// Default bound on distinct in-flight keys.
pub const DEFAULT_MAX_COALESCED: usize = 1000;

/// Items produced so far by one execution
struct Published<T> {
    items: Vec<T>,
    done: bool,
}

impl<T> Published<T> {
    const fn empty() -> Self {
        Self {
            items: Vec::new(),
            done: false,
        }
    }
}

struct InFlight<T> {
    generation: u64,
    sender: Arc<watch::Sender<Published<T>>>,
}

struct Registry<K, T> {
    entries: HashMap<K, InFlight<T>>,
    next_generation: u64,
}

/// Deduplicates concurrent executions keyed by `K`.
pub struct RequestCoalescer<K, T> {
    registry: Arc<Mutex<Registry<K, T>>>,
    max_in_flight: usize,
}

impl<K, T> RequestCoalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                entries: HashMap::new(),
                next_generation: 0,
            })),
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Join the execution running for `key`, or start one with `producer`.
    ///
    /// When the registry already holds `max_in_flight` keys the producer runs
    /// for this caller alone.
    pub async fn execute_or_join<F>(&self, key: K, producer: F) -> BoxStream<'static, T>
    where
        F: FnOnce() -> BoxStream<'static, T> + Send + 'static,
    {
        let mut registry = self.registry.lock().await;

        if let Some(in_flight) = registry.entries.get(&key) {
            debug!(key = ?key, "Joining in-flight request");
            let receiver = in_flight.sender.subscribe();
            // Replay only the latest item to a late joiner
            let start = receiver.borrow().items.len().saturating_sub(1);
            return subscribe(receiver, start);
        }

        if registry.entries.len() >= self.max_in_flight {
            drop(registry);
            debug!(key = ?key, "Coalescing limit reached, running uncoalesced");
            return producer();
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;

        let (sender, receiver) = watch::channel(Published::empty());
        let sender = Arc::new(sender);
        registry.entries.insert(
            key.clone(),
            InFlight {
                generation,
                sender: Arc::clone(&sender),
            },
        );
        drop(registry);

        tokio::spawn(drive(
            Arc::clone(&self.registry),
            key,
            generation,
            sender,
            producer,
        ));

        subscribe(receiver, 0)
    }

    /// Number of keys with a live execution.
    pub async fn in_flight_count(&self) -> usize {
        self.registry.lock().await.entries.len()
    }
}

impl<K, T> Default for RequestCoalescer<K, T>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_COALESCED)
    }
}

async fn drive<K, T, F>(
    registry: Arc<Mutex<Registry<K, T>>>,
    key: K,
    generation: u64,
    sender: Arc<watch::Sender<Published<T>>>,
    producer: F,
) where
    K: Eq + Hash + Debug,
    F: FnOnce() -> BoxStream<'static, T>,
{
    let mut upstream = producer();

    loop {
        tokio::select! {
            next = upstream.next() => match next {
                Some(value) => sender.send_modify(|published| published.items.push(value)),
                None => break,
            },
            () = sender.closed() => {
                let mut registry = registry.lock().await;
                // Someone joined between the last receiver dropping and us
                // taking the lock
                if sender.receiver_count() > 0 {
                    continue;
                }
                remove_entry(&mut registry, &key, generation);
                debug!(key = ?key, "All subscribers left, cancelling request");
                return;
            }
        }
    }

    // Mark done and unregister under one lock so no caller can join a
    // finished execution after its entry is gone
    let mut registry = registry.lock().await;
    sender.send_modify(|published| published.done = true);
    remove_entry(&mut registry, &key, generation);
    let items = sender.borrow().items.len();
    debug!(key = ?key, items, "Coalesced request completed");
}

fn remove_entry<K: Eq + Hash, T>(registry: &mut Registry<K, T>, key: &K, generation: u64) {
    if registry
        .entries
        .get(key)
        .is_some_and(|entry| entry.generation == generation)
    {
        registry.entries.remove(key);
    }
}

/// Read the execution's history from index `start` onwards.
fn subscribe<T>(receiver: watch::Receiver<Published<T>>, start: usize) -> BoxStream<'static, T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold(
        (receiver, start, false),
        |(mut receiver, next, mut closed)| async move {
            loop {
                let (item, done) = {
                    let current = receiver.borrow_and_update();
                    (current.items.get(next).cloned(), current.done)
                };
                if let Some(item) = item {
                    return Some((item, (receiver, next + 1, closed)));
                }
                if done || closed {
                    return None;
                }
                if receiver.changed().await.is_err() {
                    closed = true;
                }
            }
        },
    )
    .boxed()
}
