//! Two-party media negotiation over a relayed signaling channel.
//!
//! A [`Session`] owns one [`NegotiationAgent`] and drives it from a single
//! task. The agent talks to the peer connection through [`TransportSession`]
//! and to the other agent through [`SignalingChannel`].

pub mod agent;
pub mod candidates;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod tracks;
pub mod transport;

pub use agent::{NegotiationAgent, NegotiationState};
pub use candidates::{CandidateBuffer, DrainReport};
pub use capture::{CapturedTrack, MediaCapture, MediaProducer, SyntheticCapture};
pub use channel::{
    ChannelEvent, ChannelEvents, MemoryChannel, RelayChannel, RelayChannelOptions,
    SignalingChannel,
};
pub use config::{IceServer, NegotiationConfig, Politeness};
pub use error::{NegotiationError, NegotiationResult};
pub use events::SessionEvent;
pub use session::{Session, SessionGuard, SessionHandle, SessionParts};
pub use tracks::{TrackId, TrackInfo, TrackManager};
pub use transport::{
    MockSignalingState, MockTransport, TransportEvent, TransportEvents, TransportSession,
    WebRtcTransport,
};

pub use tandem_proto::{Candidate, MediaKind, SdpKind, SessionDescription, SignalMessage};
