//! Keyed, cancelable one-shot timers owned by an actor
//!
//! Each scheduled timer is a tokio task that sleeps and then posts a
//! [`Fired`] token back into the owner's channel. The owner runs the deferred
//! work on its own loop after checking the token with [`ScheduledTasks::accept`],
//! which rejects tokens from timers that were cancelled or replaced after they
//! had already fired.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Token delivered when a timer elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<K> {
    pub key: K,
    pub generation: u64,
}

struct Entry {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct ScheduledTasks<K> {
    entries: HashMap<K, Entry>,
    tx: mpsc::UnboundedSender<Fired<K>>,
    next_generation: u64,
}

impl<K> ScheduledTasks<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(tx: mpsc::UnboundedSender<Fired<K>>) -> Self {
        Self {
            entries: HashMap::new(),
            tx,
            next_generation: 0,
        }
    }

    /// Create a timer set together with the receiver its tokens arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Fired<K>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Schedule `key` to fire after `delay`, replacing any pending timer for it.
    pub fn schedule(&mut self, key: K, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let fired = Fired {
            key: key.clone(),
            generation,
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(fired);
        });

        if let Some(previous) = self.entries.insert(key, Entry { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer for `key`. Returns true if one was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Consume a fired token. Returns true only if it belongs to the timer
    /// currently registered for its key; the entry is cleared in that case.
    pub fn accept(&mut self, fired: &Fired<K>) -> bool {
        match self.entries.get(&fired.key) {
            Some(entry) if entry.generation == fired.generation => {
                self.entries.remove(&fired.key);
                true
            }
            _ => false,
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K> Drop for ScheduledTasks<K> {
    fn drop(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }
}
