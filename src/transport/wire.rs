use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::TransportError;

/// Upper bound on a single frame. Large enough for any encoded closure
/// argument or result this framework is meant to carry.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A framed duplex connection between two nodes.
///
/// Each frame is a u32 big-endian length prefix followed by a bincode
/// payload. A clean close observed at a frame boundary surfaces as
/// [`TransportError::Closed`].
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn send<T: Serialize>(&mut self, msg: &T) -> Result<(), TransportError> {
        let payload = bincode::serialize(msg)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(payload.len()));
        }
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(&payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, TransportError> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed)
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(bincode::deserialize(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut conn = Connection::new(stream);
            let msg: Vec<u8> = conn.recv().await.unwrap();
            conn.send(&msg.len()).await.unwrap();
        });

        let mut conn = Connection::new(TcpStream::connect(addr).await.unwrap());
        conn.send(&vec![7u8; 1024]).await.unwrap();
        let echoed: usize = conn.recv().await.unwrap();
        assert_eq!(echoed, 1024);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn clean_close_is_reported_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut conn = Connection::new(TcpStream::connect(addr).await.unwrap());
        server.await.unwrap();
        match conn.recv::<u64>().await {
            Err(TransportError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
