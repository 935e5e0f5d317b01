//! Offer/answer state machine for one side of a session.
//!
//! The agent is driven one input at a time through `&mut self`, so its state
//! and candidate buffer never need locks. Every await is followed by a check
//! of the session guard; once the session is torn down, results that arrive
//! late are dropped and `SessionClosed` is returned.

use std::sync::Arc;

use tandem_proto::{Candidate, MediaKind, SessionDescription, SignalMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::candidates::CandidateBuffer;
use crate::capture::MediaCapture;
use crate::channel::SignalingChannel;
use crate::config::Politeness;
use crate::error::{NegotiationError, NegotiationResult};
use crate::events::SessionEvent;
use crate::session::SessionGuard;
use crate::tracks::{TrackInfo, TrackManager};
use crate::transport::{TransportEvent, TransportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Our offer is out; waiting for the answer.
    MakingOffer,
    /// Applying a remote offer and producing the answer.
    ReceivingOffer,
}

pub struct NegotiationAgent {
    transport: Arc<dyn TransportSession>,
    channel: Arc<dyn SignalingChannel>,
    state: NegotiationState,
    politeness: Politeness,
    candidates: CandidateBuffer,
    tracks: TrackManager,
    guard: SessionGuard,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl NegotiationAgent {
    pub fn new(
        transport: Arc<dyn TransportSession>,
        channel: Arc<dyn SignalingChannel>,
        capture: Arc<dyn MediaCapture>,
    ) -> Self {
        Self {
            transport,
            channel,
            state: NegotiationState::Idle,
            politeness: Politeness::Polite,
            candidates: CandidateBuffer::new(),
            tracks: TrackManager::new(capture),
            guard: SessionGuard::new(),
            events: None,
        }
    }

    pub fn with_politeness(mut self, politeness: Politeness) -> Self {
        self.politeness = politeness;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_guard(mut self, guard: SessionGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn politeness(&self) -> Politeness {
        self.politeness
    }

    pub fn set_politeness(&mut self, politeness: Politeness) {
        self.politeness = politeness;
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn current_tracks(&self) -> Vec<TrackInfo> {
        self.tracks.current_tracks()
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) -> NegotiationResult<()> {
        self.ensure_alive()?;
        match event {
            TransportEvent::NegotiationNeeded => self.on_negotiation_needed().await,
            TransportEvent::LocalCandidate(Some(candidate)) => {
                self.channel
                    .send(SignalMessage::IceCandidate {
                        candidate: Some(candidate),
                    })
                    .await?;
                self.ensure_alive()
            }
            TransportEvent::LocalCandidate(None) => {
                debug!(target = "tandem::agent", "local candidate gathering complete");
                Ok(())
            }
            TransportEvent::RemoteTrack { kind } => {
                info!(target = "tandem::agent", %kind, "remote track arrived");
                self.notify(SessionEvent::RemoteTrack { kind });
                Ok(())
            }
            TransportEvent::ConnectionState(state) => {
                debug!(target = "tandem::agent", %state, "connection state");
                self.notify(SessionEvent::ConnectionState(state));
                Ok(())
            }
        }
    }

    pub async fn handle_signal(&mut self, message: SignalMessage) -> NegotiationResult<()> {
        self.ensure_alive()?;
        debug!(target = "tandem::agent", kind = message.label(), state = ?self.state, "signal received");
        match message {
            SignalMessage::Offer { sdp } => self.on_remote_offer(sdp).await,
            SignalMessage::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalMessage::IceCandidate {
                candidate: Some(candidate),
            } => self.on_remote_candidate(candidate).await,
            SignalMessage::IceCandidate { candidate: None } => {
                debug!(target = "tandem::agent", "remote end-of-candidates");
                Ok(())
            }
            SignalMessage::TrackAdded { kind } => {
                info!(target = "tandem::agent", %kind, "peer added a track");
                self.notify(SessionEvent::PeerTrackNotice { kind, added: true });
                Ok(())
            }
            SignalMessage::TrackRemoved { kind } => {
                info!(target = "tandem::agent", %kind, "peer removed a track");
                self.notify(SessionEvent::PeerTrackNotice { kind, added: false });
                Ok(())
            }
        }
    }

    /// Starts an offer unless one is already in flight. A change that lands
    /// while busy is picked up when the transport raises the event again
    /// after returning to stable.
    pub async fn on_negotiation_needed(&mut self) -> NegotiationResult<()> {
        if self.state != NegotiationState::Idle {
            debug!(target = "tandem::agent", state = ?self.state, "negotiation in flight, coalescing");
            return Ok(());
        }
        self.set_state(NegotiationState::MakingOffer);
        match self.send_offer().await {
            Ok(()) => Ok(()),
            Err(err) => self.recover(err),
        }
    }

    async fn send_offer(&mut self) -> NegotiationResult<()> {
        let offer = self.transport.create_offer().await?;
        self.ensure_alive()?;
        self.transport.set_local_description(offer.clone()).await?;
        self.ensure_alive()?;
        self.channel
            .send(SignalMessage::from_description(offer))
            .await?;
        info!(target = "tandem::agent", "offer sent");
        self.ensure_alive()
    }

    async fn on_remote_offer(&mut self, sdp: String) -> NegotiationResult<()> {
        if self.state == NegotiationState::MakingOffer {
            if !self.politeness.is_polite() {
                info!(target = "tandem::agent", "offer collision, keeping our offer");
                self.notify(SessionEvent::Error(NegotiationError::GlareConflict));
                return Ok(());
            }
            info!(target = "tandem::agent", "offer collision, rolling back our offer");
            if let Err(err) = self.transport.rollback().await {
                return self.recover(err);
            }
            self.ensure_alive()?;
        }

        self.set_state(NegotiationState::ReceivingOffer);
        if let Err(err) = self.send_answer(SessionDescription::offer(sdp)).await {
            return self.recover(err);
        }
        self.set_state(NegotiationState::Idle);
        self.drain_candidates().await;
        self.ensure_alive()
    }

    async fn send_answer(&mut self, offer: SessionDescription) -> NegotiationResult<()> {
        self.transport.set_remote_description(offer).await?;
        self.ensure_alive()?;
        let answer = self.transport.create_answer().await?;
        self.ensure_alive()?;
        self.transport.set_local_description(answer.clone()).await?;
        self.ensure_alive()?;
        self.channel
            .send(SignalMessage::from_description(answer))
            .await?;
        info!(target = "tandem::agent", "answer sent");
        self.ensure_alive()
    }

    async fn on_remote_answer(&mut self, sdp: String) -> NegotiationResult<()> {
        if self.state != NegotiationState::MakingOffer {
            warn!(target = "tandem::agent", state = ?self.state, "ignoring stale answer");
            return Ok(());
        }

        if let Err(err) = self
            .transport
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            if err.is_fatal() {
                return Err(err);
            }
            self.ensure_alive()?;
            // Drop our offer so the transport is back on the last agreed composition.
            if let Err(rollback_err) = self.transport.rollback().await {
                warn!(target = "tandem::agent", error = %rollback_err, "rollback after rejected answer failed");
            }
            self.ensure_alive()?;
            return self.recover(err);
        }
        self.ensure_alive()?;

        self.set_state(NegotiationState::Idle);
        self.drain_candidates().await;
        self.ensure_alive()
    }

    async fn on_remote_candidate(&mut self, candidate: Candidate) -> NegotiationResult<()> {
        let ready = self.transport.has_remote_description().await;
        self.ensure_alive()?;
        if !ready {
            self.candidates.enqueue(candidate);
            return Ok(());
        }
        if let Err(err) = self.transport.add_candidate(candidate).await {
            warn!(target = "tandem::agent", error = %err, "remote candidate rejected");
            self.notify(SessionEvent::Error(err));
        }
        self.ensure_alive()
    }

    async fn drain_candidates(&mut self) {
        if let Some(report) = self.candidates.drain_if_ready(&*self.transport).await {
            if report.rejected > 0 {
                self.notify(SessionEvent::Error(NegotiationError::CandidateRejected(
                    format!("{} buffered candidates rejected", report.rejected),
                )));
            }
        }
    }

    pub async fn add_track(&mut self, kind: MediaKind) -> NegotiationResult<TrackInfo> {
        self.ensure_alive()?;
        let before = self.tracks.len();
        let result = self
            .tracks
            .add_track(kind, &*self.transport, &*self.channel)
            .await;
        self.ensure_alive()?;
        if self.tracks.len() != before {
            self.notify(SessionEvent::TracksChanged(self.tracks.current_tracks()));
        }
        result
    }

    pub async fn remove_track(&mut self, kind: MediaKind) -> NegotiationResult<Vec<TrackInfo>> {
        self.ensure_alive()?;
        let before = self.tracks.len();
        let result = self
            .tracks
            .remove_track(kind, &*self.transport, &*self.channel)
            .await;
        self.ensure_alive()?;
        if self.tracks.len() != before {
            self.notify(SessionEvent::TracksChanged(self.tracks.current_tracks()));
        }
        result
    }

    /// Flips the guard, then releases everything the agent holds.
    pub async fn close(&mut self) {
        self.guard.shutdown();
        self.candidates.clear();
        self.tracks.detach_all(&*self.transport).await;
        self.transport.close().await;
        self.channel.close().await;
        debug!(target = "tandem::agent", "agent closed");
    }

    fn ensure_alive(&self) -> NegotiationResult<()> {
        if self.guard.is_alive() {
            Ok(())
        } else {
            Err(NegotiationError::SessionClosed)
        }
    }

    /// Recoverable failures put the agent back in `Idle` and are reported;
    /// fatal ones and teardown propagate.
    fn recover(&mut self, err: NegotiationError) -> NegotiationResult<()> {
        if err.is_fatal() || err == NegotiationError::SessionClosed {
            return Err(err);
        }
        warn!(target = "tandem::agent", state = ?self.state, error = %err, "negotiation step failed");
        self.set_state(NegotiationState::Idle);
        self.notify(SessionEvent::Error(err));
        Ok(())
    }

    fn set_state(&mut self, state: NegotiationState) {
        if self.state != state {
            debug!(target = "tandem::agent", from = ?self.state, to = ?state, "negotiation state");
            self.state = state;
            self.notify(SessionEvent::NegotiationStateChanged(state));
        }
    }

    fn notify(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
