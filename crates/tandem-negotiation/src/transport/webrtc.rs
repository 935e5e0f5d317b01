use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_proto::{Candidate, MediaKind, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{TransportEvent, TransportEvents, TransportSession};
use crate::capture::CapturedTrack;
use crate::config::NegotiationConfig;
use crate::error::{NegotiationError, NegotiationResult};
use crate::tracks::TrackId;

const STREAM_ID: &str = "tandem";

/// Transport session backed by a webrtc-rs peer connection.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<TrackId, Arc<RTCRtpSender>>>,
}

impl WebRtcTransport {
    pub async fn new(config: &NegotiationConfig) -> NegotiationResult<(Self, TransportEvents)> {
        let api = build_api(SettingEngine::default())?;
        let rtc_config = RTCConfiguration {
            ice_servers: config
                .ice_servers
                .iter()
                .map(|server| RTCIceServer {
                    urls: server.urls.clone(),
                    username: server.username.clone().unwrap_or_default(),
                    credential: server.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(to_setup_error)?,
        );

        let (tx, rx) = mpsc::unbounded_channel();
        wire_events(&pc, tx);
        debug!(
            target = "tandem::transport",
            ice_servers = config.ice_servers.len(),
            "peer connection created"
        );

        Ok((
            Self {
                pc,
                senders: Mutex::new(HashMap::new()),
            },
            rx,
        ))
    }
}

fn build_api(setting: SettingEngine) -> NegotiationResult<API> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn wire_events(pc: &RTCPeerConnection, tx: mpsc::UnboundedSender<TransportEvent>) {
    let negotiation_tx = tx.clone();
    pc.on_negotiation_needed(Box::new(move || {
        let tx = negotiation_tx.clone();
        Box::pin(async move {
            let _ = tx.send(TransportEvent::NegotiationNeeded);
        })
    }));

    let candidate_tx = tx.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            let event = match candidate {
                Some(candidate) => match candidate.to_json() {
                    Ok(init) => TransportEvent::LocalCandidate(Some(Candidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    })),
                    Err(err) => {
                        warn!(target = "tandem::transport", error = %err, "failed to serialize local candidate");
                        return;
                    }
                },
                None => TransportEvent::LocalCandidate(None),
            };
            let _ = tx.send(event);
        })
    }));

    let track_tx = tx.clone();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let tx = track_tx.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Video => MediaKind::Video,
                RTPCodecType::Audio => MediaKind::Audio,
                other => {
                    debug!(target = "tandem::transport", kind = ?other, "ignoring remote track of unknown kind");
                    return;
                }
            };
            info!(target = "tandem::transport", %kind, "new track received");
            let _ = tx.send(TransportEvent::RemoteTrack { kind });
        })
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            debug!(target = "tandem::transport", %state, "peer connection state changed");
            let _ = tx.send(TransportEvent::ConnectionState(state.to_string()));
        })
    }));
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    match kind {
        MediaKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
        MediaKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
    }
}

fn to_rtc(description: SessionDescription) -> NegotiationResult<RTCSessionDescription> {
    let result = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    };
    result.map_err(|err| NegotiationError::DescriptionRejected(err.to_string()))
}

fn from_rtc(description: RTCSessionDescription) -> NegotiationResult<SessionDescription> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp)),
        other => Err(NegotiationError::InvalidState(format!(
            "unexpected description type {other}"
        ))),
    }
}

fn to_setup_error<E: std::fmt::Display>(err: E) -> NegotiationError {
    NegotiationError::Transport(err.to_string())
}

#[async_trait]
impl TransportSession for WebRtcTransport {
    async fn create_offer(&self) -> NegotiationResult<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| NegotiationError::InvalidState(err.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> NegotiationResult<SessionDescription> {
        if self.pc.remote_description().await.is_none() {
            return Err(NegotiationError::NoRemoteDescription);
        }
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| NegotiationError::InvalidState(err.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> NegotiationResult<()> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(|err| NegotiationError::DescriptionRejected(err.to_string()))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> NegotiationResult<()> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(|err| NegotiationError::DescriptionRejected(err.to_string()))
    }

    async fn rollback(&self) -> NegotiationResult<()> {
        // webrtc-rs parses the SDP of every local description, rollbacks included,
        // so the rollback carries the pending offer's body.
        let mut rollback = self
            .pc
            .pending_local_description()
            .await
            .ok_or_else(|| NegotiationError::InvalidState("no local offer to roll back".into()))?;
        rollback.sdp_type = RTCSdpType::Rollback;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|err| NegotiationError::InvalidState(err.to_string()))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_candidate(&self, candidate: Candidate) -> NegotiationResult<()> {
        if self.pc.remote_description().await.is_none() {
            return Err(NegotiationError::CandidateRejected(
                "remote description not set".into(),
            ));
        }
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|err| NegotiationError::CandidateRejected(err.to_string()))
    }

    async fn add_track(&self, track: &CapturedTrack) -> NegotiationResult<TrackId> {
        let local = Arc::new(TrackLocalStaticSample::new(
            codec_for(track.kind),
            track.id.to_string(),
            STREAM_ID.to_owned(),
        ));
        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| NegotiationError::InvalidState(err.to_string()))?;

        // RTCP has to be read for the interceptors to run.
        let rtcp_sender = Arc::clone(&sender);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders.lock().insert(track.id.clone(), sender);
        Ok(track.id.clone())
    }

    async fn remove_track(&self, id: &TrackId) -> NegotiationResult<()> {
        let sender = self
            .senders
            .lock()
            .remove(id)
            .ok_or_else(|| NegotiationError::InvalidState(format!("track {id} is not attached")))?;
        self.pc
            .remove_track(&sender)
            .await
            .map_err(|err| NegotiationError::InvalidState(err.to_string()))
    }

    async fn close(&self) {
        self.senders.lock().clear();
        if let Err(err) = self.pc.close().await {
            warn!(target = "tandem::transport", error = %err, "peer connection close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{MediaCapture, SyntheticCapture};

    async fn transport_or_skip() -> Option<WebRtcTransport> {
        match WebRtcTransport::new(&NegotiationConfig::localhost()).await {
            Ok((transport, _events)) => Some(transport),
            Err(err) => {
                tracing::trace!(target = "tandem::transport", error = %err, "skipping webrtc test");
                None
            }
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn answer_and_candidates_need_remote_description() {
        let Some(transport) = transport_or_skip().await else {
            return;
        };
        assert_eq!(
            transport.create_answer().await,
            Err(NegotiationError::NoRemoteDescription)
        );
        let err = transport
            .add_candidate(Candidate::new(
                "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host",
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::CandidateRejected(_)));
        transport.close().await;
    }

    #[test_timeout::tokio_timeout_test]
    async fn offer_answer_between_two_connections() {
        let (Some(offerer), Some(answerer)) = (transport_or_skip().await, transport_or_skip().await)
        else {
            return;
        };
        let track = SyntheticCapture::new()
            .acquire(MediaKind::Video)
            .await
            .unwrap();
        offerer.add_track(&track).await.unwrap();

        let offer = offerer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=video"));
        offerer.set_local_description(offer.clone()).await.unwrap();

        answerer.set_remote_description(offer).await.unwrap();
        let answer = answerer.create_answer().await.unwrap();
        answerer.set_local_description(answer.clone()).await.unwrap();
        offerer.set_remote_description(answer).await.unwrap();

        assert!(offerer.has_remote_description().await);
        assert!(answerer.has_remote_description().await);
        offerer.remove_track(&track.id).await.unwrap();
        assert!(offerer.remove_track(&track.id).await.is_err());

        offerer.close().await;
        answerer.close().await;
    }

    #[test_timeout::tokio_timeout_test]
    async fn rollback_discards_pending_offer() {
        let Some(transport) = transport_or_skip().await else {
            return;
        };
        assert!(matches!(
            transport.rollback().await,
            Err(NegotiationError::InvalidState(_))
        ));

        let track = SyntheticCapture::new()
            .acquire(MediaKind::Audio)
            .await
            .unwrap();
        transport.add_track(&track).await.unwrap();
        let offer = transport.create_offer().await.unwrap();
        transport.set_local_description(offer).await.unwrap();
        assert!(transport.pc.pending_local_description().await.is_some());

        transport.rollback().await.unwrap();
        assert!(transport.pc.pending_local_description().await.is_none());
        assert_eq!(
            transport.pc.signaling_state(),
            webrtc::peer_connection::signaling_state::RTCSignalingState::Stable
        );

        let again = transport.create_offer().await.unwrap();
        assert!(again.sdp.contains("m=audio"));
        transport.set_local_description(again).await.unwrap();
        transport.close().await;
    }

    #[test]
    fn codecs_match_media_kind() {
        assert_eq!(codec_for(MediaKind::Video).mime_type, MIME_TYPE_VP8);
        assert_eq!(codec_for(MediaKind::Audio).channels, 2);
    }
}
