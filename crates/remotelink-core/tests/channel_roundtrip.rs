//! Integration tests for remotelink-core.
//!
//! Every payload variant is pushed through the full stack (codec, cipher,
//! framing) over an in-memory duplex stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use remotelink_core::protocol::DISPLAY_NAME_KEY;
use remotelink_core::{ChannelConfig, ChannelError, Envelope, Payload, Priority, SecureChannel};
use uuid::Uuid;

async fn established() -> (SecureChannel, SecureChannel) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let initiator = SecureChannel::new(a, ChannelConfig::default());
    let responder = SecureChannel::new(b, ChannelConfig::default());
    let md = |name: &str| BTreeMap::from([(DISPLAY_NAME_KEY.to_string(), name.to_string())]);

    let (i, r) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            initiator.handshake_as_initiator(md("initiator")),
            responder.handshake_as_responder(md("responder")),
        )
    })
    .await
    .expect("handshake must finish without deadlock");
    i.expect("initiator handshake");
    r.expect("responder handshake");
    (initiator, responder)
}

fn every_variant() -> Vec<Envelope> {
    let question = Envelope::text("question");
    vec![
        Envelope::text(""),
        Envelope::text("multi-line\ntext with ünïcödé"),
        Envelope::command("ping", std::iter::empty::<(String, String)>()),
        Envelope::command("echo", [("message", "hi"), ("extra", "")]),
        Envelope::data("empty", Vec::new()),
        Envelope::data("bytes", (0..=255u8).cycle().take(70_000).collect()),
        Envelope::response_to(&question, true, "ok", None),
        Envelope::response_to(&question, false, "failed", Some(vec![0xDE, 0xAD])),
        Envelope::heartbeat(),
        Envelope::builder(Payload::Text {
            content: "tagged".into(),
        })
        .id(Uuid::nil())
        .timestamp_us(0)
        .priority(Priority::Low)
        .metadata("a", "1")
        .metadata("b", "")
        .build(),
    ]
}

#[tokio::test]
async fn test_every_variant_survives_the_channel() {
    // Arrange
    let (initiator, responder) = established().await;

    for original in every_variant() {
        // Act
        initiator.send(&original).await.expect("send");
        let received = responder.receive().await.expect("receive");

        // Assert
        assert_eq!(received.as_ref(), Some(&original));
    }
}

#[tokio::test]
async fn test_concurrent_senders_do_not_interleave_frames() {
    // Arrange
    let (initiator, responder) = established().await;
    let initiator = Arc::new(initiator);
    let mut tasks = Vec::new();
    for task in 0..8 {
        let ch = Arc::clone(&initiator);
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                ch.send(&Envelope::data(format!("{task}-{i}"), vec![task as u8; 2048]))
                    .await
                    .expect("send");
            }
        }));
    }

    // Act
    let mut received = 0;
    while received < 8 * 25 {
        let env = responder.receive().await.expect("every frame must decrypt");
        assert!(env.is_some());
        received += 1;
    }

    // Assert
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(received, 200);
}

#[tokio::test]
async fn test_order_is_preserved_per_direction() {
    let (initiator, responder) = established().await;
    for i in 0..50 {
        responder
            .send(&Envelope::text(i.to_string()))
            .await
            .unwrap();
    }
    for i in 0..50 {
        let env = initiator.receive().await.unwrap().unwrap();
        assert_eq!(
            env.payload(),
            &Payload::Text {
                content: i.to_string()
            }
        );
    }
}

#[tokio::test]
async fn test_handshake_against_silent_peer_times_out() {
    // The peer never answers, so the caller's deadline must fire.
    let (a, _b) = tokio::io::duplex(1024);
    let initiator = SecureChannel::new(a, ChannelConfig::default());
    let result = tokio::time::timeout(
        Duration::from_millis(100),
        initiator.handshake_as_initiator(BTreeMap::new()),
    )
    .await
    .map_err(|_| ChannelError::HandshakeTimeout);
    assert!(matches!(result, Err(ChannelError::HandshakeTimeout)));
}
