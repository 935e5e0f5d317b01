//! Wire types shared by negotiation peers and the relay hub.
//! Kept free of runtime dependencies so the relay can forward frames
//! without linking the media stack.

pub mod relay;
pub mod signal;

pub use relay::{ClientFrame, MAX_PARTICIPANTS, PeerInfo, RelayFrame, generate_peer_id};
pub use signal::{
    Candidate, MediaKind, ParseMediaKindError, SdpKind, SessionDescription, SignalMessage,
};
