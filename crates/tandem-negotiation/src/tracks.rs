use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem_proto::{MediaKind, SignalMessage};
use tracing::{info, warn};

use crate::capture::{CapturedTrack, MediaCapture};
use crate::channel::SignalingChannel;
use crate::error::NegotiationResult;
use crate::transport::TransportSession;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub id: TrackId,
    pub kind: MediaKind,
    pub live: bool,
}

/// Owns the locally attached tracks and keeps them in step with the
/// transport. Every mutation is followed by an informational notice to the
/// peer; the transport raises `NegotiationNeeded` on its own.
pub struct TrackManager {
    capture: Arc<dyn MediaCapture>,
    tracks: Vec<CapturedTrack>,
}

impl TrackManager {
    pub fn new(capture: Arc<dyn MediaCapture>) -> Self {
        Self {
            capture,
            tracks: Vec::new(),
        }
    }

    /// Capture failures and transport rejections leave the set unchanged.
    /// A failed notice is fatal and reported after the track is attached.
    pub async fn add_track(
        &mut self,
        kind: MediaKind,
        transport: &dyn TransportSession,
        channel: &dyn SignalingChannel,
    ) -> NegotiationResult<TrackInfo> {
        let track = self.capture.acquire(kind).await?;

        if let Err(err) = transport.add_track(&track).await {
            warn!(target = "tandem::tracks", track = %track.id, %kind, error = %err, "transport refused track");
            track.stop();
            return Err(err);
        }

        let info = track.info();
        self.tracks.push(track);
        info!(target = "tandem::tracks", track = %info.id, %kind, total = self.tracks.len(), "track added");

        channel.send(SignalMessage::TrackAdded { kind }).await?;
        Ok(info)
    }

    /// Stops and detaches every track of `kind`. Returns the removed tracks;
    /// an empty result means nothing changed and nothing was sent. Every
    /// match is detached before the first notice goes out, so a dead channel
    /// cannot leave a track outside the set but still attached.
    pub async fn remove_track(
        &mut self,
        kind: MediaKind,
        transport: &dyn TransportSession,
        channel: &dyn SignalingChannel,
    ) -> NegotiationResult<Vec<TrackInfo>> {
        let mut removed = Vec::new();
        while let Some(index) = self.tracks.iter().position(|track| track.kind == kind) {
            let track = self.tracks.remove(index);
            track.stop();
            if let Err(err) = transport.remove_track(&track.id).await {
                // The producer is already stopped, so the sender carries nothing.
                warn!(target = "tandem::tracks", track = %track.id, error = %err, "transport failed to detach track");
            }
            info!(target = "tandem::tracks", track = %track.id, %kind, "track removed");
            removed.push(track.info());
        }

        for _ in &removed {
            channel.send(SignalMessage::TrackRemoved { kind }).await?;
        }
        Ok(removed)
    }

    pub fn current_tracks(&self) -> Vec<TrackInfo> {
        self.tracks.iter().map(CapturedTrack::info).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Teardown: stop everything and detach from the transport without
    /// notifying the peer.
    pub async fn detach_all(&mut self, transport: &dyn TransportSession) {
        for track in self.tracks.drain(..) {
            track.stop();
            if let Err(err) = transport.remove_track(&track.id).await {
                warn!(target = "tandem::tracks", track = %track.id, error = %err, "detach during teardown failed");
            }
        }
    }
}
