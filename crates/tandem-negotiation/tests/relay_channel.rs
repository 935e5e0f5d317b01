mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use support::{eventually, init_tracing};
use tandem_negotiation::{
    ChannelEvent, ChannelEvents, MediaKind, MockSignalingState, MockTransport, NegotiationConfig,
    NegotiationError, RelayChannel, RelayChannelOptions, Session, SessionParts, SignalingChannel,
    SignalMessage, SyntheticCapture,
};
use tandem_relay::{serve, RelayHub};
use tokio::net::TcpListener;

async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = serve(listener, RelayHub::new()).await;
    });
    format!("http://{addr}")
}

async fn join(relay: &str, session: &str, peer: &str) -> (Arc<RelayChannel>, ChannelEvents) {
    RelayChannel::connect(RelayChannelOptions::new(relay, session).with_peer_id(peer))
        .await
        .expect("join relay")
}

async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("channel event in time")
        .expect("channel event stream open")
}

#[test_timeout::tokio_timeout_test]
async fn relay_pairs_two_channels_and_carries_signals() {
    init_tracing();
    let relay = spawn_relay().await;
    let (alice, mut alice_events) = join(&relay, "pair", "alice").await;
    assert_eq!(alice.local_id().as_deref(), Some("alice"));
    assert!(!alice.is_open());

    let (bob, mut bob_events) = join(&relay, "pair", "bob").await;
    assert_eq!(
        next_event(&mut bob_events).await,
        ChannelEvent::Opened {
            local_id: "bob".into(),
            remote_id: "alice".into()
        }
    );
    assert_eq!(
        next_event(&mut alice_events).await,
        ChannelEvent::Opened {
            local_id: "alice".into(),
            remote_id: "bob".into()
        }
    );
    assert!(alice.is_open() && bob.is_open());

    let offer = SignalMessage::Offer {
        sdp: MockTransport::blank_sdp("alice"),
    };
    alice.send(offer.clone()).await.unwrap();
    alice
        .send(SignalMessage::TrackAdded {
            kind: MediaKind::Audio,
        })
        .await
        .unwrap();

    assert_eq!(next_event(&mut bob_events).await, ChannelEvent::Message(offer));
    assert_eq!(
        next_event(&mut bob_events).await,
        ChannelEvent::Message(SignalMessage::TrackAdded {
            kind: MediaKind::Audio
        })
    );
}

#[test_timeout::tokio_timeout_test]
async fn third_participant_is_turned_away() {
    let relay = spawn_relay().await;
    let (_alice, _alice_events) = join(&relay, "crowded", "alice").await;
    let (_bob, _bob_events) = join(&relay, "crowded", "bob").await;

    let refused = RelayChannel::connect(RelayChannelOptions::new(relay.as_str(), "crowded")).await;
    match refused {
        Err(NegotiationError::Relay(reason)) => assert!(reason.contains("join rejected")),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("third participant admitted"),
    }
}

#[test_timeout::tokio_timeout_test]
async fn peer_leaving_closes_the_channel() {
    let relay = spawn_relay().await;
    let (alice, mut alice_events) = join(&relay, "leave", "alice").await;
    let (bob, mut bob_events) = join(&relay, "leave", "bob").await;
    next_event(&mut alice_events).await;
    next_event(&mut bob_events).await;

    bob.close().await;
    match next_event(&mut alice_events).await {
        ChannelEvent::Closed { reason } => assert!(reason.contains("bob")),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(!alice.is_open());
    assert_eq!(
        alice.send(SignalMessage::IceCandidate { candidate: None }).await,
        Err(NegotiationError::ChannelUnavailable)
    );
}

#[test_timeout::tokio_timeout_test]
async fn sessions_negotiate_through_the_relay() {
    let relay = spawn_relay().await;

    let mut peers = Vec::new();
    for name in ["alice", "bob"] {
        let (channel, channel_events) = join(&relay, "e2e", name).await;
        let (transport, transport_events) = MockTransport::with_gathering(name);
        let (handle, _events) = Session::spawn(
            NegotiationConfig::localhost(),
            SessionParts {
                transport: transport.clone(),
                transport_events,
                channel,
                channel_events,
                capture: Arc::new(SyntheticCapture::new()),
            },
        );
        peers.push((handle, transport));
    }

    let (first, second) = tokio::join!(peers[0].0.start(), peers[1].0.start());
    assert_eq!(first.unwrap().len(), 2);
    assert_eq!(second.unwrap().len(), 2);

    eventually("both transports to settle", || {
        peers.iter().all(|(_, transport)| {
            transport.signaling_state() == MockSignalingState::Stable
                && transport.negotiated_track_ids().len() == 2
                && transport.applied_candidates().len() == 1
        })
    })
    .await;

    for (handle, _) in &peers {
        handle.close().await;
    }
}
