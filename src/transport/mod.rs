//! Node transport: a process-addressable TCP endpoint.
//!
//! Every participating process (master or worker) binds one
//! [`NodeTransport`] by walking an ordered list of candidate ports; the
//! first successful bind wins and determines the process's [`NodeId`].
//! Frames exchanged between nodes are length-prefixed bincode payloads
//! carried by [`Connection`].

mod node;
mod wire;

pub use node::{connect, NodeId, NodeTransport, BIND_TIMEOUT, DEFAULT_PORT_FIRST, DEFAULT_PORT_LAST};
pub use wire::{Connection, MAX_FRAME_LEN};
