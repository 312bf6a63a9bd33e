//! Observable value cell.

use std::sync::RwLock;

use tokio::sync::broadcast;

use crate::common::Subscription;

const CELL_CAPACITY: usize = 64;

/// A process-wide value with a synchronous getter and a change feed that
/// carries every new value in write order.
#[derive(Debug)]
pub struct StateCell<T> {
    value: RwLock<T>,
    changes: broadcast::Sender<T>,
}

impl<T> StateCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (changes, _) = broadcast::channel(CELL_CAPACITY);
        Self {
            value: RwLock::new(initial),
            changes,
        }
    }

    pub fn get(&self) -> T {
        self.value.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stores `value` and publishes it. Returns `false` without publishing if
    /// the cell already held an equal value.
    pub fn set(&self, value: T) -> bool {
        let mut current = self.value.write().unwrap_or_else(|e| e.into_inner());
        if *current == value {
            return false;
        }
        *current = value.clone();
        // Sent while holding the write guard so subscribers see writes in order.
        let _ = self.changes.send(value);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.changes.subscribe()
    }

    /// Calls `on_change` with each new value until the subscription is dropped.
    pub fn watch<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let mut rx = self.changes.subscribe();
        let subscription = Subscription::new();
        let token = subscription.token();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    value = rx.recv() => match value {
                        Ok(value) => on_change(value),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "State cell watcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        subscription
    }
}
