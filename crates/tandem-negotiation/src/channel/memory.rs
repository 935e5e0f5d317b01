use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tandem_proto::SignalMessage;
use tokio::sync::mpsc;
use tracing::trace;

use super::{ChannelEvent, ChannelEvents, SignalingChannel};
use crate::error::{NegotiationError, NegotiationResult};

/// One end of an in-process channel pair. Both ends share an open flag, so
/// closing either side closes the pair.
#[derive(Debug)]
pub struct MemoryChannel {
    local_id: String,
    open: Arc<AtomicBool>,
    own_events: mpsc::UnboundedSender<ChannelEvent>,
    peer_events: mpsc::UnboundedSender<ChannelEvent>,
}

impl MemoryChannel {
    /// Builds a connected pair. Each side's event stream starts with `Opened`.
    pub fn pair(
        a_id: impl Into<String>,
        b_id: impl Into<String>,
    ) -> ((MemoryChannel, ChannelEvents), (MemoryChannel, ChannelEvents)) {
        let (a_id, b_id) = (a_id.into(), b_id.into());
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let _ = a_tx.send(ChannelEvent::Opened {
            local_id: a_id.clone(),
            remote_id: b_id.clone(),
        });
        let _ = b_tx.send(ChannelEvent::Opened {
            local_id: b_id.clone(),
            remote_id: a_id.clone(),
        });

        let a = MemoryChannel {
            local_id: a_id,
            open: open.clone(),
            own_events: a_tx.clone(),
            peer_events: b_tx.clone(),
        };
        let b = MemoryChannel {
            local_id: b_id,
            open,
            own_events: b_tx,
            peer_events: a_tx,
        };
        ((a, a_rx), (b, b_rx))
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Simulates losing the relay: both sides observe `Closed`.
    pub fn sever(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let closed = ChannelEvent::Closed {
                reason: "link severed".into(),
            };
            let _ = self.own_events.send(closed.clone());
            let _ = self.peer_events.send(closed);
        }
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    async fn send(&self, message: SignalMessage) -> NegotiationResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NegotiationError::ChannelUnavailable);
        }
        trace!(target = "tandem::channel", from = %self.local_id, kind = message.label(), "memory send");
        self.peer_events
            .send(ChannelEvent::Message(message))
            .map_err(|_| NegotiationError::ChannelUnavailable)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.peer_events.send(ChannelEvent::Closed {
                reason: format!("peer {} left", self.local_id),
            });
        }
    }
}
