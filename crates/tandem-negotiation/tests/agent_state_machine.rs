mod support;

use std::sync::Arc;

use support::{has_error, pair, pair_with_capture, settle};
use tandem_negotiation::{
    Candidate, ChannelEvent, MediaKind, MockSignalingState, MockTransport, NegotiationError,
    NegotiationState, Politeness, SessionEvent, SignalMessage, SyntheticCapture, TransportEvent,
};

fn host_candidate(port: u16) -> Candidate {
    let mut candidate = Candidate::new(format!(
        "candidate:1 1 udp 2130706431 10.0.0.2 {port} typ host"
    ));
    candidate.sdp_mid = Some("0".into());
    candidate.sdp_mline_index = Some(0);
    candidate
}

fn candidate_signal(candidate: Candidate) -> SignalMessage {
    SignalMessage::IceCandidate {
        candidate: Some(candidate),
    }
}

#[tokio::test]
async fn offer_and_answer_reach_idle_on_both_sides() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);

    a.agent.add_track(MediaKind::Video).await.unwrap();
    assert_eq!(a.pump_transport().await, 1);
    assert_eq!(a.agent.state(), NegotiationState::MakingOffer);

    settle(&mut a, &mut b).await;

    assert_eq!(a.agent.state(), NegotiationState::Idle);
    assert_eq!(b.agent.state(), NegotiationState::Idle);
    assert!(a.transport.local_description().is_some());
    assert!(a.transport.remote_description().is_some());
    assert!(b.transport.remote_description().is_some());
    assert_eq!(a.agent.buffered_candidates(), 0);
    assert_eq!(a.transport.negotiated_track_ids(), a.transport.track_ids());
    assert!(a.is_settled() && b.is_settled());

    let b_events = b.drain_events();
    assert!(b_events.contains(&SessionEvent::PeerTrackNotice {
        kind: MediaKind::Video,
        added: true
    }));
    assert!(b_events.contains(&SessionEvent::RemoteTrack {
        kind: MediaKind::Video
    }));
    assert!(b_events.contains(&SessionEvent::NegotiationStateChanged(
        NegotiationState::ReceivingOffer
    )));
}

#[tokio::test]
async fn candidates_before_the_answer_are_applied_in_order_after_it() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Audio).await.unwrap();
    a.pump_transport().await;
    b.deliver().await;

    let first = host_candidate(5000);
    let second = host_candidate(5001);
    a.agent
        .handle_signal(candidate_signal(first.clone()))
        .await
        .unwrap();
    a.agent
        .handle_signal(candidate_signal(second.clone()))
        .await
        .unwrap();
    assert_eq!(a.agent.buffered_candidates(), 2);
    assert!(a.transport.applied_candidates().is_empty());

    // The answer has been sitting in the inbox since b replied.
    a.deliver().await;
    assert_eq!(a.agent.state(), NegotiationState::Idle);
    assert_eq!(a.transport.applied_candidates(), vec![first, second]);
    assert_eq!(a.agent.buffered_candidates(), 0);
}

#[tokio::test]
async fn candidate_after_remote_description_applies_immediately() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    settle(&mut a, &mut b).await;

    let candidate = host_candidate(6000);
    b.agent
        .handle_signal(candidate_signal(candidate.clone()))
        .await
        .unwrap();
    assert_eq!(b.agent.buffered_candidates(), 0);
    assert_eq!(b.transport.applied_candidates(), vec![candidate]);
}

#[tokio::test]
async fn rejected_candidate_is_reported_and_negotiation_continues() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    settle(&mut a, &mut b).await;
    b.drain_events();

    b.agent
        .handle_signal(candidate_signal(Candidate::new("not-a-candidate")))
        .await
        .unwrap();
    assert_eq!(b.agent.state(), NegotiationState::Idle);
    assert!(has_error(&b.drain_events(), |err| matches!(
        err,
        NegotiationError::CandidateRejected(_)
    )));
}

#[tokio::test]
async fn end_of_candidates_is_a_no_op() {
    let (mut a, _b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent
        .handle_signal(SignalMessage::IceCandidate { candidate: None })
        .await
        .unwrap();
    assert_eq!(a.agent.buffered_candidates(), 0);
    assert!(a.drain_events().is_empty());
}

#[tokio::test]
async fn rapid_track_changes_coalesce_into_one_offer() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.agent.add_track(MediaKind::Audio).await.unwrap();
    a.agent.add_track(MediaKind::Video).await.unwrap();

    assert_eq!(a.pump_transport().await, 1);
    assert_eq!(a.transport.offers_created(), 1);

    let offers: Vec<String> = b
        .take_messages()
        .into_iter()
        .filter_map(|message| match message {
            SignalMessage::Offer { sdp } => Some(sdp),
            _ => None,
        })
        .collect();
    assert_eq!(offers.len(), 1);
    assert_eq!(MockTransport::tracks_in(&offers[0]).len(), 3);

    b.agent
        .handle_signal(SignalMessage::Offer {
            sdp: offers[0].clone(),
        })
        .await
        .unwrap();
    settle(&mut a, &mut b).await;
    assert_eq!(a.transport.offers_created(), 1);
    assert_eq!(a.transport.negotiated_track_ids().len(), 3);
}

#[tokio::test]
async fn track_added_while_offering_is_negotiated_afterwards() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.pump_transport().await;
    assert_eq!(a.agent.state(), NegotiationState::MakingOffer);

    a.agent.add_track(MediaKind::Audio).await.unwrap();
    assert_eq!(a.pump_transport().await, 0);

    settle(&mut a, &mut b).await;
    assert_eq!(a.transport.offers_created(), 2);
    assert_eq!(a.transport.negotiated_track_ids().len(), 2);
    assert!(a.is_settled());
}

#[tokio::test]
async fn removing_an_absent_kind_changes_nothing() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    settle(&mut a, &mut b).await;
    a.drain_events();

    let removed = a.agent.remove_track(MediaKind::Audio).await.unwrap();
    assert!(removed.is_empty());
    assert_eq!(a.pump_transport().await, 0);
    assert!(b.take_messages().is_empty());
    assert!(a.drain_events().is_empty());
    assert_eq!(a.agent.current_tracks().len(), 1);
}

#[tokio::test]
async fn removing_a_track_renegotiates_and_notifies() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.agent.add_track(MediaKind::Audio).await.unwrap();
    settle(&mut a, &mut b).await;
    b.drain_events();

    let removed = a.agent.remove_track(MediaKind::Video).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(!removed[0].live);
    settle(&mut a, &mut b).await;

    assert_eq!(a.transport.negotiated_track_ids().len(), 1);
    assert!(b.drain_events().contains(&SessionEvent::PeerTrackNotice {
        kind: MediaKind::Video,
        added: false
    }));
}

#[tokio::test]
async fn glare_is_resolved_by_the_polite_side_rolling_back() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    b.agent.add_track(MediaKind::Audio).await.unwrap();
    a.pump_transport().await;
    b.pump_transport().await;
    assert_eq!(a.agent.state(), NegotiationState::MakingOffer);
    assert_eq!(b.agent.state(), NegotiationState::MakingOffer);

    // Polite side sees the colliding offer first: rolls back and answers.
    a.deliver().await;
    assert_eq!(a.agent.state(), NegotiationState::Idle);

    // Impolite side ignores the polite offer, then takes the answer.
    b.deliver().await;
    assert_eq!(b.agent.state(), NegotiationState::Idle);
    assert!(has_error(&b.drain_events(), |err| *err
        == NegotiationError::GlareConflict));

    settle(&mut a, &mut b).await;
    assert_eq!(a.transport.offers_created(), 2);
    assert_eq!(b.transport.offers_created(), 1);
    assert!(a.is_settled());
    assert!(b.is_settled());
    assert!(!has_error(&a.drain_events(), |_| true));
}

#[tokio::test]
async fn stale_answer_is_ignored() {
    let (mut a, _b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent
        .handle_signal(SignalMessage::Answer {
            sdp: MockTransport::blank_sdp("b"),
        })
        .await
        .unwrap();
    assert_eq!(a.agent.state(), NegotiationState::Idle);
    assert!(a.transport.remote_description().is_none());
    assert!(a.drain_events().is_empty());
}

#[tokio::test]
async fn rejected_answer_rolls_back_without_draining() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.pump_transport().await;
    b.deliver().await;

    a.agent
        .handle_signal(candidate_signal(host_candidate(7000)))
        .await
        .unwrap();
    a.transport.reject_next_remote_description("bad fingerprint");
    a.deliver().await;

    assert_eq!(a.agent.state(), NegotiationState::Idle);
    assert_eq!(a.transport.signaling_state(), MockSignalingState::Stable);
    assert!(a.transport.local_description().is_none());
    assert_eq!(a.agent.buffered_candidates(), 1);
    assert!(a.transport.applied_candidates().is_empty());
    assert!(a.drain_events().contains(&SessionEvent::Error(
        NegotiationError::DescriptionRejected("bad fingerprint".into())
    )));

    // The unacknowledged track raises negotiation again.
    assert_eq!(
        a.transport_events.try_recv().ok(),
        Some(TransportEvent::NegotiationNeeded)
    );
}

#[tokio::test]
async fn malformed_offer_is_reported_and_not_answered() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    b.agent
        .handle_signal(SignalMessage::Offer {
            sdp: "garbage".into(),
        })
        .await
        .unwrap();

    assert_eq!(b.agent.state(), NegotiationState::Idle);
    assert!(has_error(&b.drain_events(), |err| matches!(
        err,
        NegotiationError::DescriptionRejected(_)
    )));
    assert!(a.take_messages().is_empty());
}

#[tokio::test]
async fn losing_the_channel_mid_offer_is_fatal() {
    let (mut a, _b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.channel.sever();

    let event = a.transport_events.try_recv().unwrap();
    assert_eq!(
        a.agent.handle_transport_event(event).await,
        Err(NegotiationError::ChannelUnavailable)
    );
}

#[tokio::test]
async fn capture_failure_leaves_no_track_behind() {
    let (mut a, mut b) = pair_with_capture(
        Politeness::Polite,
        Politeness::Impolite,
        Arc::new(SyntheticCapture::denying([MediaKind::Video])),
    );
    let err = a.agent.add_track(MediaKind::Video).await.unwrap_err();
    assert!(matches!(err, NegotiationError::Capture(_)));
    assert!(a.agent.current_tracks().is_empty());
    assert_eq!(a.pump_transport().await, 0);
    assert!(b.take_messages().is_empty());
}

#[tokio::test]
async fn closed_agent_refuses_further_work() {
    let (mut a, mut b) = pair(Politeness::Polite, Politeness::Impolite);
    a.agent.add_track(MediaKind::Video).await.unwrap();
    a.agent.close().await;

    assert_eq!(a.transport.signaling_state(), MockSignalingState::Closed);
    assert_eq!(
        a.agent.add_track(MediaKind::Audio).await.unwrap_err(),
        NegotiationError::SessionClosed
    );
    assert_eq!(
        a.agent
            .handle_signal(SignalMessage::Offer {
                sdp: MockTransport::blank_sdp("b"),
            })
            .await,
        Err(NegotiationError::SessionClosed)
    );
    assert!(
        std::iter::from_fn(|| b.inbox.try_recv().ok())
            .any(|event| matches!(event, ChannelEvent::Closed { .. }))
    );
}
