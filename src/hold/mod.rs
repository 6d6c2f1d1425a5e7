//! Hold coordinator: operator-gated pauses on failed service scopes.
//!
//! When a remote dispatch fails and the launcher carries a [`HoldMap`],
//! the runner parks the failing service id here instead of propagating.
//! Operators inspect held ids over the HTTP control plane
//! ([`server`]) and release them to let the master retry.

pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

pub use server::{HoldServer, HOLD_PORT_START};

use crate::protocol::ServiceId;

/// A concurrent map from service id to a one-shot release latch.
///
/// Created by the master at startup and destroyed when it exits; passed
/// by handle, never held in a global. List, release and insert are
/// linearisable under the inner lock.
#[derive(Clone, Default)]
pub struct HoldMap {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl HoldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh latch under `service_id` and block until an
    /// operator fires it.
    ///
    /// The runner never holds the same id twice concurrently; if a caller
    /// does, the previous latch is replaced and the replacement logged.
    pub async fn block_until_released(&self, service_id: &ServiceId) {
        let rx = {
            let (tx, rx) = oneshot::channel();
            let mut held = self.inner.lock();
            if held.insert(service_id.as_str().to_string(), tx).is_some() {
                tracing::warn!(service_id = %service_id, "replacing an existing hold latch");
            }
            rx
        };
        tracing::info!(service_id = %service_id, "holding until released");
        if rx.await.is_err() {
            // Latch replaced or map dropped; treat as a release.
            tracing::warn!(service_id = %service_id, "hold latch dropped without release");
        }
    }

    /// Fire and remove the latch for `service_id`, if present. Returns the
    /// id on release, `None` for unknown ids (and does not insert).
    pub fn release(&self, service_id: &str) -> Option<String> {
        let latch = self.inner.lock().remove(service_id);
        match latch {
            Some(tx) => {
                if tx.send(()).is_err() {
                    tracing::warn!(service_id, "released a hold whose waiter was gone");
                }
                tracing::info!(service_id, "hold released");
                Some(service_id.to_string())
            }
            None => None,
        }
    }

    /// Release every currently held service, returning the released ids.
    pub fn release_all(&self) -> Vec<String> {
        let drained: Vec<(String, oneshot::Sender<()>)> =
            self.inner.lock().drain().collect();
        let mut released = Vec::with_capacity(drained.len());
        for (service_id, tx) in drained {
            if tx.send(()).is_err() {
                tracing::warn!(service_id = %service_id, "released a hold whose waiter was gone");
            }
            released.push(service_id);
        }
        if !released.is_empty() {
            tracing::info!(count = released.len(), "released all holds");
        }
        released
    }

    /// Enumerate held service ids.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn release_unblocks_the_matching_waiter() {
        let holds = HoldMap::new();
        let sid = ServiceId::new("abcde");

        let waiter = {
            let holds = holds.clone();
            let sid = sid.clone();
            tokio::spawn(async move { holds.block_until_released(&sid).await })
        };

        // Wait for the latch to appear, then release it.
        while holds.list().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(holds.release("abcde"), Some("abcde".to_string()));
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unblock")
            .unwrap();
        assert!(holds.list().is_empty());
    }

    #[tokio::test]
    async fn release_of_unknown_id_returns_none_and_does_not_insert() {
        let holds = HoldMap::new();
        assert_eq!(holds.release("zzzzz"), None);
        assert!(holds.list().is_empty());
    }

    #[tokio::test]
    async fn waiters_for_distinct_ids_are_independent() {
        let holds = HoldMap::new();
        let first = ServiceId::new("11111");
        let second = ServiceId::new("22222");

        let blocked = {
            let holds = holds.clone();
            let second = second.clone();
            tokio::spawn(async move { holds.block_until_released(&second).await })
        };
        let released = {
            let holds = holds.clone();
            let first = first.clone();
            tokio::spawn(async move { holds.block_until_released(&first).await })
        };

        while holds.list().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        holds.release(first.as_str());
        tokio::time::timeout(Duration::from_secs(1), released)
            .await
            .expect("released waiter should unblock")
            .unwrap();
        assert!(!blocked.is_finished());
        assert_eq!(holds.list(), vec![second.as_str().to_string()]);
        blocked.abort();
    }
}
