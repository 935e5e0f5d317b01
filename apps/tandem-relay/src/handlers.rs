use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Serialize;
use tandem_proto::{PeerInfo, MAX_PARTICIPANTS};

use crate::hub::RelayHub;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    session_id: String,
    exists: bool,
    full: bool,
    peers: Vec<PeerInfo>,
}

pub async fn health_check(State(hub): State<RelayHub>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        sessions: hub.session_count(),
    })
}

pub async fn get_session_status(
    State(hub): State<RelayHub>,
    Path(session_id): Path<String>,
) -> Json<SessionStatusResponse> {
    let peers = hub.peers(&session_id);
    Json(SessionStatusResponse {
        exists: !peers.is_empty(),
        full: peers.len() >= MAX_PARTICIPANTS,
        session_id,
        peers,
    })
}
