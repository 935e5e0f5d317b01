//! The peer connection, seen as a capability the agent drives.

use async_trait::async_trait;
use tandem_proto::{Candidate, MediaKind, SessionDescription};
use tokio::sync::mpsc;

use crate::capture::CapturedTrack;
use crate::error::NegotiationResult;
use crate::tracks::TrackId;

pub mod mock;
pub mod webrtc;

pub use mock::{MockSignalingState, MockTransport};
pub use self::webrtc::WebRtcTransport;

/// Notifications raised by a transport session. Delivered in order on the
/// receiver returned alongside the transport, never from inside the call that
/// caused them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The local media composition differs from what was last negotiated.
    NegotiationNeeded,
    /// A locally gathered candidate; `None` once gathering completes.
    LocalCandidate(Option<Candidate>),
    /// Media from the remote peer started arriving.
    RemoteTrack { kind: MediaKind },
    ConnectionState(String),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Fails with `InvalidState` when an offer cannot be produced right now.
    async fn create_offer(&self) -> NegotiationResult<SessionDescription>;

    /// Fails with `NoRemoteDescription` unless a remote offer has been applied.
    async fn create_answer(&self) -> NegotiationResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription)
    -> NegotiationResult<()>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> NegotiationResult<()>;

    /// Discards a pending local offer and returns to the last stable state.
    async fn rollback(&self) -> NegotiationResult<()>;

    async fn has_remote_description(&self) -> bool;

    async fn add_candidate(&self, candidate: Candidate) -> NegotiationResult<()>;

    async fn add_track(&self, track: &CapturedTrack) -> NegotiationResult<TrackId>;

    async fn remove_track(&self, id: &TrackId) -> NegotiationResult<()>;

    async fn close(&self);
}
