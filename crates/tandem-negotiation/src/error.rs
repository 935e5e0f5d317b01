use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("signaling channel unavailable")]
    ChannelUnavailable,
    #[error("session description rejected: {0}")]
    DescriptionRejected(String),
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("glare: remote offer collided with our outstanding offer")]
    GlareConflict,
    #[error("no remote description has been set")]
    NoRemoteDescription,
    #[error("invalid negotiation state: {0}")]
    InvalidState(String),
    #[error("media capture failed: {0}")]
    Capture(String),
    #[error("transport setup failed: {0}")]
    Transport(String),
    #[error("relay connection failed: {0}")]
    Relay(String),
    #[error("malformed signaling message: {0}")]
    Protocol(String),
    #[error("session closed")]
    SessionClosed,
}

impl NegotiationError {
    /// Fatal errors end the session; everything else is recovered where it
    /// happens and reported as informational.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NegotiationError::ChannelUnavailable)
    }
}

pub type NegotiationResult<T> = Result<T, NegotiationError>;
