use std::collections::VecDeque;

use tandem_proto::Candidate;
use tracing::{debug, warn};

use crate::transport::TransportSession;

/// Outcome of one drain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub rejected: usize,
}

impl DrainReport {
    pub fn total(&self) -> usize {
        self.applied + self.rejected
    }
}

/// Remote candidates that arrived before the remote description they belong
/// to. Only holds entries while the transport has no remote description.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<Candidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, candidate: Candidate) {
        self.pending.push_back(candidate);
        debug!(target = "tandem::candidates", buffered = self.pending.len(), "candidate buffered until remote description is set");
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Applies every buffered candidate in arrival order once the transport
    /// has a remote description. Returns `None` (and keeps the buffer) when it
    /// does not. A rejected candidate is logged and the drain carries on.
    pub async fn drain_if_ready<T>(&mut self, transport: &T) -> Option<DrainReport>
    where
        T: TransportSession + ?Sized,
    {
        if !transport.has_remote_description().await {
            return None;
        }

        let pending = std::mem::take(&mut self.pending);
        let mut report = DrainReport::default();
        for candidate in pending {
            match transport.add_candidate(candidate).await {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    warn!(target = "tandem::candidates", error = %err, "buffered candidate rejected");
                    report.rejected += 1;
                }
            }
        }
        if report.total() > 0 {
            debug!(
                target = "tandem::candidates",
                applied = report.applied,
                rejected = report.rejected,
                "candidate buffer drained"
            );
        }
        Some(report)
    }
}
