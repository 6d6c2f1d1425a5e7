use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::protocol::ServiceId;
use crate::transport::{Connection, NodeId};

/// A worker registration routed to the scope that owns the service id.
/// The connection it arrived on is the worker's control channel.
pub struct Registration {
    pub service_id: ServiceId,
    pub worker: NodeId,
    pub control: Connection,
}

/// Master-side mapping from service id to the scope awaiting a worker.
///
/// At most one endpoint is registered per id at any instant; the guard
/// returned by [`register`](Self::register) unregisters on drop, so the
/// mapping is released on every exit path.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    inner: Arc<Mutex<HashMap<ServiceId, mpsc::Sender<Registration>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh service id and register a channel for its
    /// registrations.
    pub fn register(&self) -> (ServiceGuard, mpsc::Receiver<Registration>) {
        let (tx, rx) = mpsc::channel(4);
        let service_id = {
            let mut services = self.inner.lock();
            // Collisions are vanishingly unlikely; loop anyway since
            // generating an id is cheap.
            loop {
                let candidate = ServiceId::generate();
                if !services.contains_key(&candidate) {
                    services.insert(candidate.clone(), tx);
                    break candidate;
                }
            }
        };
        tracing::debug!(service_id = %service_id, "service id registered");
        (
            ServiceGuard {
                registry: self.clone(),
                service_id,
            },
            rx,
        )
    }

    /// The channel for `service_id`, if a scope is currently awaiting it.
    pub fn sender_for(&self, service_id: &ServiceId) -> Option<mpsc::Sender<Registration>> {
        self.inner.lock().get(service_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    fn unregister(&self, service_id: &ServiceId) {
        if self.inner.lock().remove(service_id).is_some() {
            tracing::debug!(service_id = %service_id, "service id unregistered");
        }
    }
}

/// Scoped registration of one service id.
pub struct ServiceGuard {
    registry: ServiceRegistry,
    service_id: ServiceId,
}

impl ServiceGuard {
    pub fn id(&self) -> &ServiceId {
        &self.service_id
    }
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.service_id);
    }
}
