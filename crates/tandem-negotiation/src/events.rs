use tandem_proto::MediaKind;

use crate::agent::NegotiationState;
use crate::config::Politeness;
use crate::error::NegotiationError;
use crate::tracks::TrackInfo;

/// What a session reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened {
        local_id: String,
        remote_id: String,
        politeness: Politeness,
    },
    NegotiationStateChanged(NegotiationState),
    /// The peer announced a track change. Informational only.
    PeerTrackNotice { kind: MediaKind, added: bool },
    RemoteTrack { kind: MediaKind },
    TracksChanged(Vec<TrackInfo>),
    ConnectionState(String),
    /// A recovered failure. The session keeps running.
    Error(NegotiationError),
    /// Emitted exactly once; carries the fatal error if there was one.
    Terminated(Option<NegotiationError>),
}
