//! One task per session owns the agent and feeds it collaborator commands,
//! channel events and transport events one at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tandem_proto::MediaKind;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::agent::{NegotiationAgent, NegotiationState};
use crate::capture::MediaCapture;
use crate::channel::{ChannelEvent, ChannelEvents, SignalingChannel};
use crate::config::{NegotiationConfig, Politeness};
use crate::error::{NegotiationError, NegotiationResult};
use crate::events::SessionEvent;
use crate::tracks::TrackInfo;
use crate::transport::{TransportEvent, TransportEvents, TransportSession};

/// Shared liveness flag. Flipped once on teardown; everything that resumes
/// after an await checks it before touching session state.
#[derive(Debug, Clone, Default)]
pub struct SessionGuard {
    closed: Arc<AtomicBool>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Returns true for the call that actually closed the session.
    pub fn shutdown(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }
}

/// Everything a session needs, already constructed by the caller.
pub struct SessionParts {
    pub transport: Arc<dyn TransportSession>,
    pub transport_events: TransportEvents,
    pub channel: Arc<dyn SignalingChannel>,
    pub channel_events: ChannelEvents,
    pub capture: Arc<dyn MediaCapture>,
}

enum Command {
    Start(oneshot::Sender<NegotiationResult<Vec<TrackInfo>>>),
    AddTrack(MediaKind, oneshot::Sender<NegotiationResult<TrackInfo>>),
    RemoveTrack(MediaKind, oneshot::Sender<NegotiationResult<Vec<TrackInfo>>>),
    CurrentTracks(oneshot::Sender<Vec<TrackInfo>>),
    State(oneshot::Sender<NegotiationState>),
    Close(oneshot::Sender<()>),
}

enum Input {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    Transport(Option<TransportEvent>),
}

pub struct Session;

impl Session {
    /// Spawns the session task. Must be called from within a tokio runtime.
    pub fn spawn(
        config: NegotiationConfig,
        parts: SessionParts,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let guard = SessionGuard::new();

        let agent = NegotiationAgent::new(parts.transport, parts.channel, parts.capture)
            .with_politeness(config.politeness.unwrap_or(Politeness::Polite))
            .with_events(event_tx.clone())
            .with_guard(guard.clone());

        let actor = SessionActor {
            config,
            agent,
            commands: command_rx,
            channel_events: parts.channel_events,
            transport_events: parts.transport_events,
            events: event_tx,
            guard: guard.clone(),
            opened: false,
            started: false,
            transport_live: true,
            deferred: VecDeque::new(),
            closers: Vec::new(),
        };
        tokio::spawn(actor.run());

        (
            SessionHandle {
                commands: command_tx,
                guard,
            },
            event_rx,
        )
    }
}

/// Cloneable front door to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    guard: SessionGuard,
}

impl SessionHandle {
    /// Attaches the configured initial tracks. Waits for the channel to open
    /// if it has not yet.
    pub async fn start(&self) -> NegotiationResult<Vec<TrackInfo>> {
        self.request(Command::Start).await?
    }

    pub async fn add_track(&self, kind: MediaKind) -> NegotiationResult<TrackInfo> {
        self.request(|reply| Command::AddTrack(kind, reply)).await?
    }

    pub async fn remove_track(&self, kind: MediaKind) -> NegotiationResult<Vec<TrackInfo>> {
        self.request(|reply| Command::RemoveTrack(kind, reply))
            .await?
    }

    pub async fn current_tracks(&self) -> NegotiationResult<Vec<TrackInfo>> {
        self.request(Command::CurrentTracks).await
    }

    pub async fn state(&self) -> NegotiationResult<NegotiationState> {
        self.request(Command::State).await
    }

    pub fn is_alive(&self) -> bool {
        self.guard.is_alive()
    }

    /// Tears the session down and waits until it is gone. Safe to call more
    /// than once.
    pub async fn close(&self) {
        self.guard.shutdown();
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close(reply)).is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> NegotiationResult<T> {
        if !self.guard.is_alive() {
            return Err(NegotiationError::SessionClosed);
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| NegotiationError::SessionClosed)?;
        response.await.map_err(|_| NegotiationError::SessionClosed)
    }
}

struct SessionActor {
    config: NegotiationConfig,
    agent: NegotiationAgent,
    commands: mpsc::UnboundedReceiver<Command>,
    channel_events: ChannelEvents,
    transport_events: TransportEvents,
    events: mpsc::UnboundedSender<SessionEvent>,
    guard: SessionGuard,
    opened: bool,
    started: bool,
    transport_live: bool,
    /// Commands that need an open channel, held until it opens.
    deferred: VecDeque<Command>,
    closers: Vec<oneshot::Sender<()>>,
}

impl SessionActor {
    async fn run(mut self) {
        let failure = loop {
            if !self.guard.is_alive() {
                break None;
            }

            // Peer traffic first so a stream of commands cannot hold it back.
            // Commands still go before transport events so a burst of track
            // changes lands before negotiation-needed is looked at.
            let input = tokio::select! {
                biased;
                event = self.channel_events.recv() => Input::Channel(event),
                command = self.commands.recv() => Input::Command(command),
                event = self.transport_events.recv(), if self.opened && self.transport_live => {
                    Input::Transport(event)
                }
            };

            let step = match input {
                Input::Command(Some(command)) => self.handle_command(command).await,
                Input::Command(None) => Err(NegotiationError::SessionClosed),
                Input::Channel(Some(event)) => self.handle_channel_event(event).await,
                Input::Channel(None) => Err(NegotiationError::ChannelUnavailable),
                Input::Transport(Some(event)) => self.agent.handle_transport_event(event).await,
                Input::Transport(None) => {
                    self.transport_live = false;
                    Ok(())
                }
            };

            match step {
                Ok(()) => {}
                Err(NegotiationError::SessionClosed) => break None,
                Err(err) if err.is_fatal() => break Some(err),
                Err(err) => {
                    let _ = self.events.send(SessionEvent::Error(err));
                }
            }
        };
        self.teardown(failure).await;
    }

    async fn handle_command(&mut self, command: Command) -> NegotiationResult<()> {
        match command {
            Command::Start(reply) => {
                if !self.opened {
                    self.deferred.push_back(Command::Start(reply));
                    return Ok(());
                }
                if self.started {
                    let _ = reply.send(Err(NegotiationError::InvalidState(
                        "session already started".into(),
                    )));
                    return Ok(());
                }
                self.started = true;
                let result = self.attach_initial_tracks().await;
                let outcome = escalate(&result);
                let _ = reply.send(result);
                outcome
            }
            Command::AddTrack(kind, reply) => {
                if !self.opened {
                    self.deferred.push_back(Command::AddTrack(kind, reply));
                    return Ok(());
                }
                let result = self.agent.add_track(kind).await;
                let outcome = escalate(&result);
                let _ = reply.send(result);
                outcome
            }
            Command::RemoveTrack(kind, reply) => {
                if !self.opened {
                    self.deferred.push_back(Command::RemoveTrack(kind, reply));
                    return Ok(());
                }
                let result = self.agent.remove_track(kind).await;
                let outcome = escalate(&result);
                let _ = reply.send(result);
                outcome
            }
            Command::CurrentTracks(reply) => {
                let _ = reply.send(self.agent.current_tracks());
                Ok(())
            }
            Command::State(reply) => {
                let _ = reply.send(self.agent.state());
                Ok(())
            }
            Command::Close(reply) => {
                self.closers.push(reply);
                Err(NegotiationError::SessionClosed)
            }
        }
    }

    /// Capture or transport refusals for one kind are reported and skipped;
    /// only fatal errors abort.
    async fn attach_initial_tracks(&mut self) -> NegotiationResult<Vec<TrackInfo>> {
        let mut attached = Vec::new();
        for kind in self.config.initial_tracks.clone() {
            match self.agent.add_track(kind).await {
                Ok(info) => attached.push(info),
                Err(err) if err.is_fatal() || err == NegotiationError::SessionClosed => {
                    return Err(err);
                }
                Err(err) => {
                    warn!(target = "tandem::session", %kind, error = %err, "initial track unavailable");
                    let _ = self.events.send(SessionEvent::Error(err));
                }
            }
        }
        Ok(attached)
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) -> NegotiationResult<()> {
        match event {
            ChannelEvent::Opened {
                local_id,
                remote_id,
            } => {
                if self.opened {
                    warn!(target = "tandem::session", %remote_id, "channel opened twice, ignoring");
                    return Ok(());
                }
                let politeness = self
                    .config
                    .politeness
                    .unwrap_or_else(|| Politeness::from_peer_ids(&local_id, &remote_id));
                self.agent.set_politeness(politeness);
                self.opened = true;
                info!(
                    target = "tandem::session",
                    local = %local_id,
                    remote = %remote_id,
                    %politeness,
                    "signaling channel open"
                );
                let _ = self.events.send(SessionEvent::Opened {
                    local_id,
                    remote_id,
                    politeness,
                });

                while let Some(command) = self.deferred.pop_front() {
                    self.handle_command(command).await?;
                }
                Ok(())
            }
            ChannelEvent::Message(message) => self.agent.handle_signal(message).await,
            ChannelEvent::Closed { reason } => {
                warn!(target = "tandem::session", %reason, "signaling channel closed");
                Err(NegotiationError::ChannelUnavailable)
            }
        }
    }

    async fn teardown(mut self, failure: Option<NegotiationError>) {
        self.guard.shutdown();
        self.agent.close().await;

        let mut pending: Vec<Command> = self.deferred.drain(..).collect();
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            pending.push(command);
        }
        for command in pending {
            match command {
                Command::Start(reply) => {
                    let _ = reply.send(Err(NegotiationError::SessionClosed));
                }
                Command::AddTrack(_, reply) => {
                    let _ = reply.send(Err(NegotiationError::SessionClosed));
                }
                Command::RemoveTrack(_, reply) => {
                    let _ = reply.send(Err(NegotiationError::SessionClosed));
                }
                Command::CurrentTracks(reply) => {
                    let _ = reply.send(Vec::new());
                }
                Command::State(reply) => {
                    let _ = reply.send(self.agent.state());
                }
                Command::Close(reply) => self.closers.push(reply),
            }
        }

        match &failure {
            Some(err) => error!(target = "tandem::session", error = %err, "session terminated"),
            None => info!(target = "tandem::session", "session closed"),
        }
        let _ = self.events.send(SessionEvent::Terminated(failure));
        for closer in self.closers.drain(..) {
            let _ = closer.send(());
        }
    }
}

/// Errors that must also end the session, not just fail the command.
fn escalate<T>(result: &NegotiationResult<T>) -> NegotiationResult<()> {
    match result {
        Err(err) if err.is_fatal() || *err == NegotiationError::SessionClosed => Err(err.clone()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_shutdown_reports_first_caller_only() {
        let guard = SessionGuard::new();
        let clone = guard.clone();
        assert!(clone.is_alive());
        assert!(guard.shutdown());
        assert!(!clone.shutdown());
        assert!(!clone.is_alive());
    }

    #[test]
    fn escalate_only_lifts_fatal_errors() {
        let recoverable: NegotiationResult<()> = Err(NegotiationError::Capture("denied".into()));
        assert_eq!(escalate(&recoverable), Ok(()));
        let fatal: NegotiationResult<()> = Err(NegotiationError::ChannelUnavailable);
        assert_eq!(escalate(&fatal), Err(NegotiationError::ChannelUnavailable));
    }
}
