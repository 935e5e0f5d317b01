//! Media sources. Real capture devices live outside this crate; sessions only
//! see the `MediaCapture` trait.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tandem_proto::MediaKind;
use tracing::debug;
use uuid::Uuid;

use crate::error::{NegotiationError, NegotiationResult};
use crate::tracks::{TrackId, TrackInfo};

/// Something producing samples for a local track.
pub trait MediaProducer: Send + Sync + fmt::Debug {
    /// Stops the producer. Calling it again is a no-op.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn acquire(&self, kind: MediaKind) -> NegotiationResult<CapturedTrack>;
}

#[derive(Debug, Clone)]
pub struct CapturedTrack {
    pub id: TrackId,
    pub kind: MediaKind,
    producer: Arc<dyn MediaProducer>,
}

impl CapturedTrack {
    pub fn new(id: TrackId, kind: MediaKind, producer: Arc<dyn MediaProducer>) -> Self {
        Self { id, kind, producer }
    }

    pub fn stop(&self) {
        self.producer.stop();
    }

    pub fn is_live(&self) -> bool {
        self.producer.is_live()
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            id: self.id.clone(),
            kind: self.kind,
            live: self.is_live(),
        }
    }
}

#[derive(Debug, Default)]
struct LiveFlag(AtomicBool);

impl MediaProducer for LiveFlag {
    fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Capture that hands out producers without touching any device. Kinds can be
/// denied to simulate a refused permission prompt.
#[derive(Debug, Default)]
pub struct SyntheticCapture {
    denied: HashSet<MediaKind>,
}

impl SyntheticCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn denying(kinds: impl IntoIterator<Item = MediaKind>) -> Self {
        Self {
            denied: kinds.into_iter().collect(),
        }
    }
}

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn acquire(&self, kind: MediaKind) -> NegotiationResult<CapturedTrack> {
        if self.denied.contains(&kind) {
            return Err(NegotiationError::Capture(format!(
                "permission denied for {kind}"
            )));
        }
        let id = TrackId::new(format!("{kind}-{}", Uuid::new_v4().simple()));
        debug!(target = "tandem::capture", track = %id, %kind, "synthetic track acquired");
        Ok(CapturedTrack::new(
            id,
            kind,
            Arc::new(LiveFlag(AtomicBool::new(true))),
        ))
    }
}
