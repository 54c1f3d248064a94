//! Smoke tests for the re-exported public API: everything a user needs
//! should be reachable from the facade crate alone.

use std::time::Duration;

use longeron::transport::mem::{pair, MemoryConnector};
use longeron::{Client, ConnectOptions, ConnectionState, OverflowPolicy, ReconnectPolicy};

#[test]
fn options_compose_through_the_facade() {
    let opts = ConnectOptions::default()
        .with_command_queue_capacity(128)
        .with_subscription_overflow(OverflowPolicy::DropOldest)
        .with_reconnect(
            ReconnectPolicy::default()
                .with_base_interval(Duration::from_millis(50))
                .with_max_attempts(Some(3)),
        )
        .with_default_deadline(Some(Duration::from_secs(2)))
        .with_name("facade-smoke");

    assert_eq!(opts.command_queue_capacity, 128);
    assert_eq!(opts.subscription_overflow, OverflowPolicy::DropOldest);
    assert_eq!(opts.reconnect.max_attempts, Some(3));
}

#[compio::test]
async fn facade_client_connects_over_memory_transport() {
    let (transport, peer) = pair();
    let client = Client::connect_with(
        Box::new(MemoryConnector::new([transport])),
        ConnectOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(client.state(), ConnectionState::Open);
    client.publish("facade.check", &b"ok"[..]).await.unwrap();

    // Handshake and the publish both reached the transport.
    let mut written = Vec::new();
    for _ in 0..100 {
        written.extend_from_slice(&peer.written());
        if String::from_utf8_lossy(&written).contains("PUB facade.check") {
            break;
        }
        compio::time::sleep(Duration::from_millis(5)).await;
    }
    let text = String::from_utf8(written).unwrap();
    assert!(text.starts_with("CONNECT {"));
    assert!(text.contains("PUB facade.check 2\r\nok\r\n"));

    client.close().await.unwrap();
}
