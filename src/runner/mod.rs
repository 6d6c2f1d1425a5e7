//! The remote runner: scoped acquisition of workers and closure dispatch.
//!
//! A [`MasterNode`] owns the master's transport endpoint and routes
//! inbound worker registrations to the scope that owns the service id.
//! [`MasterNode::with_service`] brackets one worker's lifetime;
//! [`MasterNode::with_remote_run`] layers closure execution and
//! hold-on-error retry on top.

mod remote;
mod service;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub use remote::RemoteRun;
pub use service::{Registration, ServiceGuard, ServiceRegistry};

use crate::protocol::Register;
use crate::transport::{NodeId, NodeTransport};

/// The master's endpoint plus the service registry behind it.
pub struct MasterNode {
    local: NodeId,
    services: ServiceRegistry,
    cancel: CancellationToken,
}

impl MasterNode {
    /// Start routing registrations arriving on `transport`. The accept
    /// loop runs until `cancel` fires.
    pub fn start(transport: NodeTransport, cancel: CancellationToken) -> Arc<Self> {
        let node = Arc::new(Self {
            local: transport.local_node(),
            services: ServiceRegistry::new(),
            cancel,
        });
        tokio::spawn(accept_loop(
            transport,
            node.services.clone(),
            node.cancel.clone(),
        ));
        node
    }

    pub fn local_node(&self) -> &NodeId {
        &self.local
    }

    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

async fn accept_loop(transport: NodeTransport, services: ServiceRegistry, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = transport.accept() => accepted,
        };
        match accepted {
            Ok((mut conn, peer)) => {
                let services = services.clone();
                tokio::spawn(async move {
                    match conn.recv::<Register>().await {
                        Ok(reg) => route_registration(&services, reg, conn).await,
                        Err(e) => {
                            tracing::debug!(peer = %peer, error = %e, "dropping malformed registration");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed on master endpoint");
            }
        }
    }
    tracing::debug!("master endpoint accept loop stopped");
}

async fn route_registration(
    services: &ServiceRegistry,
    reg: Register,
    control: crate::transport::Connection,
) {
    match services.sender_for(&reg.service_id) {
        Some(tx) => {
            let registration = Registration {
                service_id: reg.service_id.clone(),
                worker: reg.node_id,
                control,
            };
            if tx.send(registration).await.is_err() {
                tracing::warn!(
                    service_id = %reg.service_id,
                    "scope went away before its worker registered"
                );
            }
        }
        None => {
            // A worker from a previous launch of this service, or from a
            // scope that already ended.
            tracing::warn!(
                service_id = %reg.service_id,
                worker = %reg.node_id,
                "ignoring registration for unknown service id"
            );
        }
    }
}
