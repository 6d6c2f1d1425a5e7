//! Node transport tests: candidate-port binding and framed exchange.

use remora::error::TransportError;
use remora::protocol::{Register, ServiceId};
use remora::transport::{self, NodeId, NodeTransport};

#[tokio::test]
async fn bind_walks_candidates_until_one_is_free() {
    // Occupy a port, then offer it as the first candidate.
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let transport = NodeTransport::bind("127.0.0.1", [taken, 0]).await.unwrap();
    let bound: u16 = transport
        .local_node()
        .as_str()
        .rsplit_once(':')
        .unwrap()
        .1
        .parse()
        .unwrap();
    assert_ne!(bound, taken);
}

#[tokio::test]
async fn exhausted_candidates_name_the_attempted_range() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = occupied.local_addr().unwrap().port();

    let err = NodeTransport::bind("127.0.0.1", [taken]).await.unwrap_err();
    match err {
        TransportError::PortBindExhausted {
            host,
            first,
            last,
            count,
        } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!((first, last, count), (taken, taken, 1));
        }
        other => panic!("expected exhaustion, got {other}"),
    }
}

#[tokio::test]
async fn failed_bind_does_not_affect_existing_transports() {
    let transport = NodeTransport::bind("127.0.0.1", [0]).await.unwrap();
    let node = transport.local_node();
    let taken: u16 = node.as_str().rsplit_once(':').unwrap().1.parse().unwrap();

    // Re-invoking with only the occupied port fails...
    assert!(NodeTransport::bind("127.0.0.1", [taken]).await.is_err());

    // ...while the existing transport still serves connections.
    let server = tokio::spawn(async move {
        let (mut conn, _) = transport.accept().await.unwrap();
        conn.recv::<Register>().await.unwrap()
    });
    let mut conn = transport::connect(&node).await.unwrap();
    let sent = Register {
        service_id: ServiceId::new("ab1de"),
        node_id: NodeId::new("127.0.0.1", 9),
    };
    conn.send(&sent).await.unwrap();

    let received = server.await.unwrap();
    assert_eq!(received.service_id, sent.service_id);
    assert_eq!(received.node_id, sent.node_id);
}

#[tokio::test]
async fn node_id_survives_the_wire() {
    let transport = NodeTransport::bind("127.0.0.1", [0]).await.unwrap();
    let node = transport.local_node();

    // Textual round trip, then a live connect through the parsed form.
    let reparsed: NodeId = node.to_string().parse().unwrap();
    assert_eq!(reparsed, node);

    let server = tokio::spawn(async move {
        let (mut conn, _) = transport.accept().await.unwrap();
        let n: NodeId = conn.recv().await.unwrap();
        conn.send(&n).await.unwrap();
    });
    let mut conn = transport::connect(&reparsed).await.unwrap();
    conn.send(&reparsed).await.unwrap();
    let echoed: NodeId = conn.recv().await.unwrap();
    assert_eq!(echoed, reparsed);
    server.await.unwrap();
}
