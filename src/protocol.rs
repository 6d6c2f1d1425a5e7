//! Wire protocol between master and worker.
//!
//! The protocol is asymmetric. A freshly launched worker dials the master
//! and pushes a [`Register`] frame naming the service id it was launched
//! for; the connection it arrived on becomes the control channel, on which
//! the master answers [`WorkerMessage::Connected`] and eventually delivers
//! [`WorkerMessage::ShutDown`]. Closure dispatch travels the other way: the
//! master dials the worker's own node and exchanges [`TaskRequest`] /
//! [`TaskReply`] frames there, so control traffic and closure execution
//! never share a connection.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::closure::Closure;
use crate::transport::NodeId;

/// Names a transient master-side endpoint expecting exactly one worker.
///
/// Five random alphanumeric characters; the id space is large enough that
/// collisions within one master process are not worth guarding against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId(String);

impl ServiceId {
    pub const LEN: usize = 5;

    pub fn generate() -> Self {
        let id = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Wraps an id received from the command line. Workers trust the
    /// launcher to pass through what the master allocated.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Control message sent from master to worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMessage {
    /// Handshake acknowledgement. Receiving it twice is a protocol
    /// violation and fatal to the worker.
    Connected,
    /// Graceful termination; the worker exits cleanly.
    ShutDown,
}

/// First frame a worker sends after dialing the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    pub service_id: ServiceId,
    pub node_id: NodeId,
}

/// Closure dispatch, master to worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: u64,
    pub closure: Closure,
}

/// Outcome of a dispatched closure, worker to master. `Ok` carries the
/// encoded result value; `Err` carries the error string produced by the
/// remote function (exceptions are caught at the worker boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReply {
    pub task_id: u64,
    pub outcome: Result<Vec<u8>, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_ids_are_five_alphanumeric_chars() {
        for _ in 0..100 {
            let id = ServiceId::generate();
            assert_eq!(id.as_str().len(), ServiceId::LEN);
            assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn worker_message_round_trips() {
        for msg in [WorkerMessage::Connected, WorkerMessage::ShutDown] {
            let bytes = bincode::serialize(&msg).unwrap();
            let back: WorkerMessage = bincode::deserialize(&bytes).unwrap();
            assert_eq!(back, msg);
        }
    }
}
