//! In-memory transport with browser-like signaling rules, for tests and
//! offline runs. Descriptions are small text blobs listing the tracks they
//! carry (`a=track:<kind>:<id>`), so two mocks can negotiate with each other.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_proto::{Candidate, MediaKind, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use tracing::trace;

use super::{TransportEvent, TransportEvents, TransportSession};
use crate::capture::CapturedTrack;
use crate::error::{NegotiationError, NegotiationResult};
use crate::tracks::TrackId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug)]
struct MockState {
    signaling: MockSignalingState,
    tracks: BTreeMap<TrackId, MediaKind>,
    /// Composition carried by the pending local offer.
    offered: Option<BTreeSet<TrackId>>,
    /// Composition the remote side has acknowledged.
    negotiated: BTreeSet<TrackId>,
    negotiation_needed: bool,
    current_local: Option<SessionDescription>,
    pending_local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_tracks_seen: BTreeSet<String>,
    applied: Vec<Candidate>,
    offers_created: usize,
    version: u64,
    gather: bool,
    gathered: bool,
    connected: bool,
    reject_next_remote: Option<String>,
}

pub struct MockTransport {
    label: String,
    state: Mutex<MockState>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockTransport {
    pub fn new(label: impl Into<String>) -> (Arc<Self>, TransportEvents) {
        Self::build(label.into(), false)
    }

    /// Like `new`, but emits one host candidate followed by end-of-candidates
    /// the first time a local description is set.
    pub fn with_gathering(label: impl Into<String>) -> (Arc<Self>, TransportEvents) {
        Self::build(label.into(), true)
    }

    fn build(label: String, gather: bool) -> (Arc<Self>, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = MockState {
            signaling: MockSignalingState::Stable,
            tracks: BTreeMap::new(),
            offered: None,
            negotiated: BTreeSet::new(),
            negotiation_needed: false,
            current_local: None,
            pending_local: None,
            remote: None,
            remote_tracks_seen: BTreeSet::new(),
            applied: Vec::new(),
            offers_created: 0,
            version: 0,
            gather,
            gathered: false,
            connected: false,
            reject_next_remote: None,
        };
        let transport = Arc::new(Self {
            label,
            state: Mutex::new(state),
            events: tx,
        });
        (transport, rx)
    }

    /// A well-formed description carrying no tracks.
    pub fn blank_sdp(label: &str) -> String {
        render_sdp(label, 0, std::iter::empty())
    }

    /// Parses the track lines of a description produced by a mock.
    pub fn tracks_in(sdp: &str) -> Vec<(MediaKind, String)> {
        sdp.lines()
            .filter_map(|line| line.strip_prefix("a=track:"))
            .filter_map(|rest| {
                let (kind, id) = rest.split_once(':')?;
                Some((kind.parse().ok()?, id.to_string()))
            })
            .collect()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The next remote description fails with `DescriptionRejected(reason)`.
    pub fn reject_next_remote_description(&self, reason: impl Into<String>) {
        self.state.lock().reject_next_remote = Some(reason.into());
    }

    pub fn signaling_state(&self) -> MockSignalingState {
        self.state.lock().signaling
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.state.lock().tracks.keys().cloned().collect()
    }

    pub fn negotiated_track_ids(&self) -> Vec<TrackId> {
        self.state.lock().negotiated.iter().cloned().collect()
    }

    pub fn applied_candidates(&self) -> Vec<Candidate> {
        self.state.lock().applied.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().offers_created
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state
            .pending_local
            .clone()
            .or_else(|| state.current_local.clone())
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    fn emit(&self, event: TransportEvent) {
        trace!(target = "tandem::transport", transport = %self.label, ?event, "mock event");
        let _ = self.events.send(event);
    }

    fn update_negotiation_needed(&self, state: &mut MockState) {
        if state.signaling != MockSignalingState::Stable {
            // Re-evaluated on the next return to stable.
            return;
        }
        let current: BTreeSet<TrackId> = state.tracks.keys().cloned().collect();
        if current == state.negotiated {
            state.negotiation_needed = false;
            return;
        }
        if state.negotiation_needed {
            return;
        }
        state.negotiation_needed = true;
        self.emit(TransportEvent::NegotiationNeeded);
    }

    fn on_stable(&self, state: &mut MockState) {
        if !state.connected && state.remote.is_some() && state.current_local.is_some() {
            state.connected = true;
            self.emit(TransportEvent::ConnectionState("connected".into()));
        }
        self.update_negotiation_needed(state);
    }

    fn maybe_gather(&self, state: &mut MockState) {
        if !state.gather || state.gathered {
            return;
        }
        state.gathered = true;
        let port = 50_000 + (self.label.len() as u16 % 100);
        self.emit(TransportEvent::LocalCandidate(Some(Candidate {
            candidate: format!(
                "candidate:1 1 udp 2130706431 127.0.0.1 {port} typ host generation 0 ufrag {}",
                self.label
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.label.clone()),
        })));
        self.emit(TransportEvent::LocalCandidate(None));
    }

    fn announce_remote_tracks(&self, state: &mut MockState, sdp: &str) {
        for (kind, id) in Self::tracks_in(sdp) {
            if state.remote_tracks_seen.insert(id) {
                self.emit(TransportEvent::RemoteTrack { kind });
            }
        }
    }
}

fn render_sdp<'a>(
    label: &str,
    version: u64,
    tracks: impl Iterator<Item = (&'a TrackId, &'a MediaKind)>,
) -> String {
    let mut sdp = format!("v=0\r\no=mock-{label} {version} 1 IN IP4 127.0.0.1\r\ns=tandem\r\n");
    for (id, kind) in tracks {
        sdp.push_str(&format!("a=track:{kind}:{id}\r\n"));
    }
    sdp
}

fn validate(description: &SessionDescription) -> NegotiationResult<()> {
    if description.sdp.starts_with("v=0") {
        Ok(())
    } else {
        Err(NegotiationError::DescriptionRejected(
            "payload is not a session description".into(),
        ))
    }
}

#[async_trait]
impl TransportSession for MockTransport {
    async fn create_offer(&self) -> NegotiationResult<SessionDescription> {
        let mut state = self.state.lock();
        match state.signaling {
            MockSignalingState::Stable | MockSignalingState::HaveLocalOffer => {}
            other => {
                return Err(NegotiationError::InvalidState(format!(
                    "cannot create offer in {other:?}"
                )));
            }
        }
        state.offers_created += 1;
        state.version += 1;
        let sdp = render_sdp(&self.label, state.version, state.tracks.iter());
        Ok(SessionDescription::offer(sdp))
    }

    async fn create_answer(&self) -> NegotiationResult<SessionDescription> {
        let mut state = self.state.lock();
        if state.remote.is_none() {
            return Err(NegotiationError::NoRemoteDescription);
        }
        if state.signaling != MockSignalingState::HaveRemoteOffer {
            return Err(NegotiationError::InvalidState(format!(
                "cannot create answer in {:?}",
                state.signaling
            )));
        }
        state.version += 1;
        let negotiated = state.negotiated.clone();
        let sdp = render_sdp(
            &self.label,
            state.version,
            state
                .tracks
                .iter()
                .filter(|(id, _)| negotiated.contains(*id)),
        );
        Ok(SessionDescription::answer(sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> NegotiationResult<()> {
        validate(&description)?;
        let mut state = self.state.lock();
        match (description.kind, state.signaling) {
            (SdpKind::Offer, MockSignalingState::Stable | MockSignalingState::HaveLocalOffer) => {
                state.offered = Some(
                    Self::tracks_in(&description.sdp)
                        .into_iter()
                        .map(|(_, id)| TrackId::new(id))
                        .collect(),
                );
                state.pending_local = Some(description);
                state.negotiation_needed = false;
                state.signaling = MockSignalingState::HaveLocalOffer;
                self.maybe_gather(&mut state);
                Ok(())
            }
            (SdpKind::Answer, MockSignalingState::HaveRemoteOffer) => {
                state.current_local = Some(description);
                state.signaling = MockSignalingState::Stable;
                self.maybe_gather(&mut state);
                self.on_stable(&mut state);
                Ok(())
            }
            (kind, signaling) => Err(NegotiationError::DescriptionRejected(format!(
                "local {kind:?} not allowed in {signaling:?}"
            ))),
        }
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> NegotiationResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.reject_next_remote.take() {
            return Err(NegotiationError::DescriptionRejected(reason));
        }
        validate(&description)?;
        match (description.kind, state.signaling) {
            (SdpKind::Offer, MockSignalingState::Stable) => {
                self.announce_remote_tracks(&mut state, &description.sdp);
                state.remote = Some(description);
                state.signaling = MockSignalingState::HaveRemoteOffer;
                Ok(())
            }
            (SdpKind::Answer, MockSignalingState::HaveLocalOffer) => {
                self.announce_remote_tracks(&mut state, &description.sdp);
                state.remote = Some(description);
                state.current_local = state.pending_local.take();
                state.negotiated = state.offered.take().unwrap_or_default();
                state.signaling = MockSignalingState::Stable;
                self.on_stable(&mut state);
                Ok(())
            }
            (kind, signaling) => Err(NegotiationError::DescriptionRejected(format!(
                "remote {kind:?} not allowed in {signaling:?}"
            ))),
        }
    }

    async fn rollback(&self) -> NegotiationResult<()> {
        let mut state = self.state.lock();
        if state.signaling != MockSignalingState::HaveLocalOffer {
            return Err(NegotiationError::InvalidState(format!(
                "nothing to roll back in {:?}",
                state.signaling
            )));
        }
        state.pending_local = None;
        state.offered = None;
        state.signaling = MockSignalingState::Stable;
        self.on_stable(&mut state);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().remote.is_some()
    }

    async fn add_candidate(&self, candidate: Candidate) -> NegotiationResult<()> {
        let mut state = self.state.lock();
        if state.signaling == MockSignalingState::Closed {
            return Err(NegotiationError::CandidateRejected("transport closed".into()));
        }
        if state.remote.is_none() {
            return Err(NegotiationError::CandidateRejected(
                "remote description not set".into(),
            ));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(NegotiationError::CandidateRejected(format!(
                "malformed candidate '{}'",
                candidate.candidate
            )));
        }
        state.applied.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &CapturedTrack) -> NegotiationResult<TrackId> {
        let mut state = self.state.lock();
        if state.signaling == MockSignalingState::Closed {
            return Err(NegotiationError::InvalidState("transport closed".into()));
        }
        if state.tracks.contains_key(&track.id) {
            return Err(NegotiationError::InvalidState(format!(
                "track {} already attached",
                track.id
            )));
        }
        state.tracks.insert(track.id.clone(), track.kind);
        self.update_negotiation_needed(&mut state);
        Ok(track.id.clone())
    }

    async fn remove_track(&self, id: &TrackId) -> NegotiationResult<()> {
        let mut state = self.state.lock();
        if state.tracks.remove(id).is_none() {
            return Err(NegotiationError::InvalidState(format!(
                "track {id} is not attached"
            )));
        }
        self.update_negotiation_needed(&mut state);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        if state.signaling == MockSignalingState::Closed {
            return;
        }
        state.signaling = MockSignalingState::Closed;
        state.tracks.clear();
        self.emit(TransportEvent::ConnectionState("closed".into()));
    }
}
