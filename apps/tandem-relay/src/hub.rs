//! Session membership and frame routing.
//!
//! A session is a list of at most [`MAX_PARTICIPANTS`] participants keyed by
//! session id. Every operation here is synchronous, so no DashMap guard is
//! ever held across an await point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tandem_proto::{generate_peer_id, PeerInfo, RelayFrame, MAX_PARTICIPANTS};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type FrameSender = mpsc::UnboundedSender<RelayFrame>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("session {0} is full")]
    SessionFull(String),
    #[error("join the session before sending signals")]
    NotJoined,
    #[error("already joined as {0}")]
    AlreadyJoined(String),
    #[error("no other participant in session {0}")]
    NoPeer(String),
    #[error("participant {0} is no longer connected")]
    PeerGone(String),
}

struct Participant {
    info: PeerInfo,
    tx: FrameSender,
    last_seen: Arc<Mutex<Instant>>,
}

/// Result of a successful join. `peers` includes the joiner.
#[derive(Debug, Clone)]
pub struct Joined {
    pub peer_id: String,
    pub peers: Vec<PeerInfo>,
}

#[derive(Clone, Default)]
pub struct RelayHub {
    sessions: Arc<DashMap<String, Vec<Participant>>>,
}

impl RelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a participant and queues its `join_success` before anyone else
    /// can route a frame to it. The requested id is honoured when it is free.
    pub fn join(
        &self,
        session_id: &str,
        requested_id: Option<String>,
        label: Option<String>,
        tx: FrameSender,
    ) -> Result<Joined, RelayError> {
        let (info, peers, others) = {
            let mut participants = self.sessions.entry(session_id.to_string()).or_default();
            if participants.len() >= MAX_PARTICIPANTS {
                return Err(RelayError::SessionFull(session_id.to_string()));
            }

            let id = match requested_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
            {
                Some(id) if !participants.iter().any(|p| p.info.id == id) => id,
                _ => generate_peer_id(),
            };
            let info = PeerInfo {
                id,
                joined_at: chrono::Utc::now().timestamp(),
                label: label
                    .map(|label| label.trim().to_string())
                    .filter(|label| !label.is_empty()),
            };

            let others: Vec<FrameSender> = participants.iter().map(|p| p.tx.clone()).collect();
            let mut peers: Vec<PeerInfo> = participants.iter().map(|p| p.info.clone()).collect();
            peers.push(info.clone());

            let _ = tx.send(RelayFrame::JoinSuccess {
                session_id: session_id.to_string(),
                peer_id: info.id.clone(),
                peers: peers.clone(),
            });
            participants.push(Participant {
                info: info.clone(),
                tx,
                last_seen: Arc::new(Mutex::new(Instant::now())),
            });
            (info, peers, others)
        };

        info!(session = %session_id, peer = %info.id, participants = peers.len(), "peer joined");
        for other in others {
            let _ = other.send(RelayFrame::PeerJoined { peer: info.clone() });
        }

        Ok(Joined {
            peer_id: info.id,
            peers,
        })
    }

    /// Removes a participant and tells whoever is left. Returns false when the
    /// participant was already gone.
    pub fn leave(&self, session_id: &str, peer_id: &str) -> bool {
        let remaining: Vec<FrameSender> = {
            let Some(mut participants) = self.sessions.get_mut(session_id) else {
                return false;
            };
            let before = participants.len();
            participants.retain(|p| p.info.id != peer_id);
            if participants.len() == before {
                return false;
            }
            participants.iter().map(|p| p.tx.clone()).collect()
        };
        self.sessions
            .remove_if(session_id, |_, participants| participants.is_empty());

        info!(session = %session_id, peer = %peer_id, "peer left");
        for tx in remaining {
            let _ = tx.send(RelayFrame::PeerLeft {
                peer_id: peer_id.to_string(),
            });
        }
        true
    }

    /// Hands an opaque signal to the other participant of the session.
    pub fn forward(&self, session_id: &str, from: &str, signal: Value) -> Result<(), RelayError> {
        let (to, tx) = {
            let participants = self
                .sessions
                .get(session_id)
                .ok_or(RelayError::NotJoined)?;
            if !participants.iter().any(|p| p.info.id == from) {
                return Err(RelayError::NotJoined);
            }
            participants
                .iter()
                .find(|p| p.info.id != from)
                .map(|p| (p.info.id.clone(), p.tx.clone()))
                .ok_or_else(|| RelayError::NoPeer(session_id.to_string()))?
        };
        debug!(session = %session_id, from = %from, to = %to, "forwarding signal");
        tx.send(RelayFrame::Signal {
            from_peer: from.to_string(),
            signal,
        })
        .map_err(|_| RelayError::PeerGone(to))
    }

    pub fn touch(&self, session_id: &str, peer_id: &str) {
        let last_seen = self.sessions.get(session_id).and_then(|participants| {
            participants
                .iter()
                .find(|p| p.info.id == peer_id)
                .map(|p| p.last_seen.clone())
        });
        if let Some(last_seen) = last_seen {
            *last_seen.lock() = Instant::now();
        }
    }

    pub fn peers(&self, session_id: &str) -> Vec<PeerInfo> {
        self.sessions
            .get(session_id)
            .map(|participants| participants.iter().map(|p| p.info.clone()).collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Drops every participant silent for longer than `timeout`. The dropped
    /// participant gets an `error` frame, the one left behind a `peer_left`.
    pub fn sweep_stale(&self, timeout: Duration) -> usize {
        let mut stale = Vec::new();
        for session in self.sessions.iter() {
            for participant in session.value() {
                if participant.last_seen.lock().elapsed() > timeout {
                    stale.push((
                        session.key().clone(),
                        participant.info.id.clone(),
                        participant.tx.clone(),
                    ));
                }
            }
        }

        let mut removed = 0;
        for (session_id, peer_id, tx) in stale {
            info!(session = %session_id, peer = %peer_id, "removing stale peer (heartbeat timeout)");
            let _ = tx.send(RelayFrame::Error {
                message: "heartbeat timeout".to_string(),
            });
            if self.leave(&session_id, &peer_id) {
                removed += 1;
            }
        }
        removed
    }

    pub fn spawn_heartbeat_monitor(&self, interval: Duration, timeout: Duration) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = hub.sweep_stale(timeout);
                if removed > 0 {
                    debug!(removed, "heartbeat sweep");
                }
            }
        })
    }
}
