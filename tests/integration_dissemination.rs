use rumornet::{
    development_config, init_logging, Body, Message, NodeBuilder, PeerId, PeerUniverse,
    SubnetAddressMap, RECORD_LEN,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;

/// Two peers on distinct loopback addresses so source-address identification
/// works the same way it does across real hosts.
fn test_universe() -> PeerUniverse {
    PeerUniverse::List(vec![80, 81])
}

fn test_map(port: u16) -> Arc<SubnetAddressMap> {
    Arc::new(SubnetAddressMap::new([127, 0], port))
}

#[tokio::test]
async fn test_two_nodes_converge_over_tcp() {
    // Only the first test to get here installs the subscriber
    let _ = init_logging(&development_config());

    let port = 36911;
    let map = test_map(port);

    let node_a = NodeBuilder::new()
        .with_node_id(80u32)
        .with_bind_address(format!("127.0.0.80:{port}").parse().unwrap())
        .with_peers(test_universe())
        .with_dial_interval(Duration::from_millis(200))
        .with_dial_timeout(Duration::from_millis(500))
        .with_producer(false)
        .with_address_map(map.clone())
        .build()
        .expect("node A should build");

    let node_b = NodeBuilder::new()
        .with_node_id(81u32)
        .with_bind_address(format!("127.0.0.81:{port}").parse().unwrap())
        .with_peers(test_universe())
        .with_dial_interval(Duration::from_millis(330))
        .with_dial_timeout(Duration::from_millis(500))
        .with_producer(false)
        .with_address_map(map)
        .build()
        .expect("node B should build");

    node_a
        .publish(PeerId(81), Body::from_text("alpha to beta"))
        .await;
    node_b
        .publish(PeerId(80), Body::from_text("beta to alpha"))
        .await;

    let deadline = Some(Duration::from_secs(3));
    let (report_a, report_b) = tokio::join!(node_a.run(deadline), node_b.run(deadline));
    let report_a = report_a.expect("node A run");
    let report_b = report_b.expect("node B run");

    // Both stores hold both messages exactly once
    assert_eq!(node_a.engine().store_len().await, 2);
    assert_eq!(node_b.engine().store_len().await, 2);

    // Each node's inbox caught the message addressed to it
    let inbox_a = node_a.engine().inbox_messages().await;
    assert_eq!(inbox_a.len(), 1);
    assert_eq!(inbox_a[0].body.text(), "beta to alpha");
    assert_eq!(inbox_a[0].sender, PeerId(81));

    let inbox_b = node_b.engine().inbox_messages().await;
    assert_eq!(inbox_b.len(), 1);
    assert_eq!(inbox_b[0].body.text(), "alpha to beta");

    // Counters and per-peer summaries made it into the reports
    assert_eq!(report_a.stats.produced, 1);
    assert_eq!(report_a.stats.received, 1);
    assert!(report_a.stats.transmitted >= 1);
    assert!(!report_a.peers.is_empty());
    assert_eq!(report_a.peers[0].peer, PeerId(81));
    assert!(report_a.peers[0].sessions >= 1);

    assert_eq!(report_b.stats.received, 1);
    assert!(report_b.stats.transmitted >= 1);

    // Reports serialize for the external logging collaborator
    let json = report_a.to_json().expect("report serializes");
    assert!(json.contains("\"received\": 1"));
}

#[tokio::test]
async fn test_nodes_converge_with_exhausted_pool() {
    // Zero pooled workers forces every session inline; dissemination must
    // still complete serially.
    let port = 36912;
    let map = test_map(port);

    let node_a = NodeBuilder::new()
        .with_node_id(80u32)
        .with_bind_address(format!("127.0.0.80:{port}").parse().unwrap())
        .with_peers(test_universe())
        .with_worker_pool_size(0)
        .with_dial_interval(Duration::from_millis(200))
        .with_dial_timeout(Duration::from_millis(500))
        .with_producer(false)
        .with_address_map(map.clone())
        .build()
        .unwrap();

    let node_b = NodeBuilder::new()
        .with_node_id(81u32)
        .with_bind_address(format!("127.0.0.81:{port}").parse().unwrap())
        .with_peers(test_universe())
        .with_worker_pool_size(0)
        .with_dial_interval(Duration::from_millis(330))
        .with_dial_timeout(Duration::from_millis(500))
        .with_producer(false)
        .with_address_map(map)
        .build()
        .unwrap();

    node_a
        .publish(PeerId(81), Body::from_text("serial delivery"))
        .await;

    let deadline = Some(Duration::from_secs(3));
    let (report_a, report_b) = tokio::join!(node_a.run(deadline), node_b.run(deadline));
    report_a.unwrap();
    report_b.unwrap();

    assert_eq!(node_b.engine().store_len().await, 1);
    let inbox_b = node_b.engine().inbox_messages().await;
    assert_eq!(inbox_b.len(), 1);
    assert_eq!(inbox_b[0].body.text(), "serial delivery");
}

#[tokio::test]
async fn test_wire_protocol_against_raw_socket() {
    // Speak the record format by hand against a running node: read what the
    // responder transmits, then push one record back.
    let port = 36913;
    let node = NodeBuilder::new()
        .with_node_id(80u32)
        .with_bind_address(format!("127.0.0.80:{port}").parse().unwrap())
        .with_peers(test_universe())
        .with_dial_interval(Duration::from_secs(60))
        .with_producer(false)
        .with_address_map(test_map(port))
        .build()
        .unwrap();

    node.publish(PeerId(81), Body::from_text("wire check")).await;
    let engine = Arc::clone(node.engine());

    let runner = tokio::spawn(async move { node.run(Some(Duration::from_secs(3))).await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Connect from the address that identifies us as peer 81
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind("127.0.0.81:0".parse().unwrap()).unwrap();
    let mut stream = socket
        .connect(format!("127.0.0.80:{port}").parse().unwrap())
        .await
        .unwrap();

    // The accepting side transmits first: one fixed-length record
    let mut record = [0u8; RECORD_LEN];
    stream.read_exact(&mut record).await.unwrap();
    let received = rumornet::decode(&record).unwrap();
    assert_eq!(received.sender, PeerId(80));
    assert_eq!(received.recipient, PeerId(81));
    assert_eq!(received.body.text(), "wire check");

    // Reply with a record of our own and half-close
    let reply = Message::new(
        PeerId(81),
        PeerId(80),
        1_700_000_123,
        Body::from_text("roger"),
    );
    stream.write_all(&rumornet::encode(&reply)).await.unwrap();
    stream.shutdown().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(engine.store_contains(&reply).await);
    assert_eq!(engine.inbox_len().await, 1);

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.stats.received, 1);
    assert_eq!(report.stats.transmitted, 1);
}
