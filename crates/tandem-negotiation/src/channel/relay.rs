use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tandem_proto::{ClientFrame, RelayFrame, SignalMessage};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use tracing::{debug, trace, warn};
use url::Url;

use super::{ChannelEvent, ChannelEvents, SignalingChannel};
use crate::error::{NegotiationError, NegotiationResult};

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RelayChannelOptions {
    /// Base URL of the relay, `http(s)://` or `ws(s)://`.
    pub relay_url: String,
    pub session_id: String,
    /// Preferred peer id. The relay picks one when absent or already taken.
    pub peer_id: Option<String>,
    pub label: Option<String>,
    pub heartbeat: Duration,
}

impl RelayChannelOptions {
    pub fn new(relay_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            session_id: session_id.into(),
            peer_id: None,
            label: None,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(ClientFrame),
    Close,
}

#[derive(Debug, Default)]
struct LinkState {
    local_id: Option<String>,
    remote_id: Option<String>,
    closed: bool,
}

type JoinOutcome = Result<String, String>;

/// Signaling channel carried over a WebSocket to the relay hub.
pub struct RelayChannel {
    session_id: String,
    send_tx: mpsc::UnboundedSender<Outbound>,
    open: AtomicBool,
    link: Mutex<LinkState>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    join: Mutex<Option<oneshot::Sender<JoinOutcome>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayChannel {
    /// Connects, joins the session and returns once the relay accepted the
    /// join. `ChannelEvent::Opened` follows when the other participant is
    /// present.
    pub async fn connect(
        options: RelayChannelOptions,
    ) -> NegotiationResult<(Arc<Self>, ChannelEvents)> {
        let websocket_url = relay_websocket_url(&options.relay_url, &options.session_id)?;
        let (ws_stream, _) = connect_async(websocket_url.as_str())
            .await
            .map_err(|err| NegotiationError::Relay(format!("websocket connect failed: {err}")))?;
        debug!(target = "tandem::relay", url = %websocket_url, "relay websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Outbound>();
        let (channel, events, join_rx) = Self::build(options.session_id.clone(), send_tx);
        let channel = Arc::new(channel);

        let writer_handle = tokio::spawn(async move {
            while let Some(outbound) = send_rx.recv().await {
                match outbound {
                    Outbound::Frame(frame) => {
                        if let Ok(text) = serde_json::to_string(&frame) {
                            if ws_write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Outbound::Close => {
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let reader_channel = Arc::clone(&channel);
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        trace!(target = "tandem::relay", event = "ws_in", len = text.len());
                        match serde_json::from_str::<RelayFrame>(&text) {
                            Ok(frame) => reader_channel.handle_frame(frame),
                            Err(err) => {
                                warn!(target = "tandem::relay", error = %err, "unparseable relay frame")
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                debug!(target = "tandem::relay", "relay websocket closed: {err}");
                            }
                            _ => {
                                warn!(target = "tandem::relay", "relay websocket error: {err}");
                            }
                        }
                        break;
                    }
                }
            }
            reader_channel.mark_closed("relay connection closed");
        });

        let heartbeat_tx = channel.send_tx.clone();
        let heartbeat = options.heartbeat;
        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(Outbound::Frame(ClientFrame::Ping)).is_err() {
                    break;
                }
            }
        });

        channel
            .tasks
            .lock()
            .extend([writer_handle, reader_handle, heartbeat_handle]);

        channel
            .send_tx
            .send(Outbound::Frame(ClientFrame::Join {
                peer_id: options.peer_id,
                label: options.label,
            }))
            .map_err(|_| NegotiationError::ChannelUnavailable)?;
        debug!(target = "tandem::relay", session = %options.session_id, "sent join");

        let failure = match join_rx.await {
            Ok(Ok(peer_id)) => {
                debug!(target = "tandem::relay", %peer_id, "joined relay session");
                return Ok((channel, events));
            }
            Ok(Err(reason)) => NegotiationError::Relay(format!("join rejected: {reason}")),
            Err(_) => NegotiationError::Relay("relay closed before the join completed".into()),
        };
        for handle in channel.tasks.lock().drain(..) {
            handle.abort();
        }
        Err(failure)
    }

    fn build(
        session_id: String,
        send_tx: mpsc::UnboundedSender<Outbound>,
    ) -> (Self, ChannelEvents, oneshot::Receiver<JoinOutcome>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (join_tx, join_rx) = oneshot::channel();
        let channel = Self {
            session_id,
            send_tx,
            open: AtomicBool::new(false),
            link: Mutex::new(LinkState::default()),
            events: events_tx,
            join: Mutex::new(Some(join_tx)),
            tasks: Mutex::new(Vec::new()),
        };
        (channel, events_rx, join_rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id the relay assigned to us, once joined.
    pub fn local_id(&self) -> Option<String> {
        self.link.lock().local_id.clone()
    }

    pub fn remote_id(&self) -> Option<String> {
        self.link.lock().remote_id.clone()
    }

    fn handle_frame(&self, frame: RelayFrame) {
        match frame {
            RelayFrame::JoinSuccess { peer_id, peers, .. } => {
                self.link.lock().local_id = Some(peer_id.clone());
                if let Some(join) = self.join.lock().take() {
                    let _ = join.send(Ok(peer_id.clone()));
                }
                if let Some(remote) = peers.into_iter().find(|peer| peer.id != peer_id) {
                    self.pair_with(remote.id);
                }
            }
            RelayFrame::JoinError { reason } => {
                if let Some(join) = self.join.lock().take() {
                    let _ = join.send(Err(reason));
                } else {
                    self.mark_closed(&reason);
                }
            }
            RelayFrame::PeerJoined { peer } => {
                let should_pair = {
                    let link = self.link.lock();
                    link.remote_id.is_none() && link.local_id.as_deref() != Some(peer.id.as_str())
                };
                if should_pair {
                    self.pair_with(peer.id);
                } else {
                    debug!(target = "tandem::relay", peer = %peer.id, "ignoring extra peer");
                }
            }
            RelayFrame::PeerLeft { peer_id } => {
                let is_remote = self.link.lock().remote_id.as_deref() == Some(peer_id.as_str());
                if is_remote {
                    self.mark_closed(&format!("peer {peer_id} left"));
                }
            }
            RelayFrame::Signal { from_peer, signal } => {
                if self.link.lock().remote_id.as_deref() != Some(from_peer.as_str()) {
                    warn!(target = "tandem::relay", %from_peer, "dropping signal from unpaired peer");
                    return;
                }
                match SignalMessage::from_value(signal) {
                    Ok(message) => {
                        trace!(target = "tandem::relay", kind = message.label(), "signal received");
                        let _ = self.events.send(ChannelEvent::Message(message));
                    }
                    Err(err) => {
                        let err = NegotiationError::Protocol(err.to_string());
                        warn!(target = "tandem::relay", error = %err, "dropping signal");
                    }
                }
            }
            RelayFrame::Pong => {
                trace!(target = "tandem::relay", "pong");
            }
            RelayFrame::Error { message } => {
                warn!(target = "tandem::relay", %message, "relay reported an error");
            }
        }
    }

    fn pair_with(&self, remote_id: String) {
        let local_id = {
            let mut link = self.link.lock();
            if link.closed {
                return;
            }
            link.remote_id = Some(remote_id.clone());
            link.local_id.clone().unwrap_or_default()
        };
        self.open.store(true, Ordering::SeqCst);
        debug!(target = "tandem::relay", local = %local_id, remote = %remote_id, "channel opened");
        let _ = self.events.send(ChannelEvent::Opened {
            local_id,
            remote_id,
        });
    }

    fn mark_closed(&self, reason: &str) {
        // Dropping the pending join sender unblocks `connect`.
        drop(self.join.lock().take());
        {
            let mut link = self.link.lock();
            if link.closed {
                return;
            }
            link.closed = true;
        }
        self.open.store(false, Ordering::SeqCst);
        debug!(target = "tandem::relay", %reason, "channel closed");
        let _ = self.events.send(ChannelEvent::Closed {
            reason: reason.to_string(),
        });
    }
}

#[async_trait]
impl SignalingChannel for RelayChannel {
    async fn send(&self, message: SignalMessage) -> NegotiationResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(NegotiationError::ChannelUnavailable);
        }
        let signal = message
            .to_value()
            .map_err(|err| NegotiationError::Protocol(err.to_string()))?;
        trace!(target = "tandem::relay", kind = message.label(), "signal sent");
        self.send_tx
            .send(Outbound::Frame(ClientFrame::Signal { signal }))
            .map_err(|_| NegotiationError::ChannelUnavailable)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.link.lock().closed = true;
        let _ = self.send_tx.send(Outbound::Close);
    }
}

impl Drop for RelayChannel {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

fn relay_websocket_url(relay_url: &str, session_id: &str) -> NegotiationResult<Url> {
    let base = Url::parse(relay_url)
        .map_err(|err| NegotiationError::Relay(format!("invalid relay url {relay_url}: {err}")))?;
    let scheme = match base.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(NegotiationError::Relay(format!(
                "unsupported relay scheme {other}"
            )));
        }
    };
    let mut ws = base.clone();
    ws.set_scheme(scheme)
        .map_err(|_| NegotiationError::Relay("invalid websocket scheme".into()))?;
    let prefix = base.path().trim_end_matches('/');
    ws.set_path(&format!("{prefix}/ws/{session_id}"));
    ws.set_query(None);
    ws.set_fragment(None);
    Ok(ws)
}
