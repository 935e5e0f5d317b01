//! Ordered, reliable message path to the other agent.

use async_trait::async_trait;
use tandem_proto::SignalMessage;
use tokio::sync::mpsc;

use crate::error::NegotiationResult;

pub mod memory;
pub mod relay;

pub use memory::MemoryChannel;
pub use relay::{RelayChannel, RelayChannelOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Both participants are present; `send` works from here on.
    Opened { local_id: String, remote_id: String },
    Message(SignalMessage),
    /// The channel is gone for good. Emitted at most once.
    Closed { reason: String },
}

pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Fails with `ChannelUnavailable` when the channel is not open. Callers
    /// must treat that as the end of the session.
    async fn send(&self, message: SignalMessage) -> NegotiationResult<()>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}
