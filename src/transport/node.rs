use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};

use crate::error::TransportError;
use crate::transport::wire::Connection;

pub const DEFAULT_PORT_FIRST: u16 = 10090;
pub const DEFAULT_PORT_LAST: u16 = 10990;

/// Budget for a single bind attempt before moving to the next candidate.
pub const BIND_TIMEOUT: Duration = Duration::from_secs(5);

/// The address of a node, serialisable as `host:port` text.
///
/// Equality is bytewise on the textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(host: &str, port: u16) -> Self {
        Self(format!("{host}:{port}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidAddress(s.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(TransportError::InvalidAddress(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

/// A bound TCP endpoint for one node.
#[derive(Debug)]
pub struct NodeTransport {
    listener: TcpListener,
    local: NodeId,
}

impl NodeTransport {
    /// Bind the first free candidate port on `host`.
    ///
    /// Candidates are tried in order, each attempt bounded by
    /// [`BIND_TIMEOUT`]. Exhausting the list is fatal to the caller: the
    /// error names the attempted range.
    pub async fn bind(
        host: &str,
        candidates: impl IntoIterator<Item = u16>,
    ) -> Result<Self, TransportError> {
        let mut first = None;
        let mut last = 0;
        let mut count = 0usize;

        for port in candidates {
            first.get_or_insert(port);
            last = port;
            count += 1;

            let addr = format!("{host}:{port}");
            match tokio::time::timeout(BIND_TIMEOUT, TcpListener::bind(&addr)).await {
                Ok(Ok(listener)) => {
                    // Port 0 asks the OS for an ephemeral port; report the real one.
                    let bound = listener.local_addr()?.port();
                    tracing::debug!(host, port = bound, "node transport bound");
                    return Ok(Self {
                        listener,
                        local: NodeId::new(host, bound),
                    });
                }
                Ok(Err(e)) => {
                    tracing::trace!(host, port, error = %e, "bind candidate rejected");
                }
                Err(_) => {
                    tracing::trace!(host, port, "bind candidate timed out");
                }
            }
        }

        Err(TransportError::PortBindExhausted {
            host: host.to_string(),
            first: first.unwrap_or(0),
            last,
            count,
        })
    }

    /// The id under which peers can reach this node.
    pub fn local_node(&self) -> NodeId {
        self.local.clone()
    }

    /// Accept one inbound connection.
    pub async fn accept(&self) -> Result<(Connection, SocketAddr), TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((Connection::new(stream), peer))
    }
}

/// Dial a peer node.
pub async fn connect(node: &NodeId) -> Result<Connection, TransportError> {
    let stream = TcpStream::connect(node.as_str()).await?;
    Ok(Connection::new(stream))
}
