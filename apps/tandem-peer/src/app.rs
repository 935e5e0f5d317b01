use std::sync::Arc;

use anyhow::Context;
use tandem_negotiation::{
    NegotiationConfig, NegotiationResult, RelayChannel, RelayChannelOptions, Session,
    SessionEvent, SessionHandle, SessionParts, SyntheticCapture, TrackInfo, WebRtcTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::commands::{HELP, PeerCommand};

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = NegotiationConfig::from_env();
    let (transport, transport_events) = WebRtcTransport::new(&config)
        .await
        .context("failed to set up the peer connection")?;

    let mut options = RelayChannelOptions::new(cli.relay.clone(), cli.session.clone());
    if let Some(peer_id) = &cli.peer_id {
        options = options.with_peer_id(peer_id.clone());
    }
    if let Some(label) = &cli.label {
        options = options.with_label(label.clone());
    }
    let (channel, channel_events) = RelayChannel::connect(options)
        .await
        .with_context(|| format!("failed to join session {} on {}", cli.session, cli.relay))?;
    info!(
        session = %cli.session,
        peer = channel.local_id().as_deref().unwrap_or("?"),
        "joined relay, waiting for the other peer"
    );

    let parts = SessionParts {
        transport: Arc::new(transport),
        transport_events,
        channel,
        channel_events,
        capture: Arc::new(SyntheticCapture::new()),
    };
    let (handle, mut events) = Session::spawn(config, parts);

    let mut printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let terminated = matches!(event, SessionEvent::Terminated(_));
            report(&event);
            if terminated {
                break;
            }
        }
    });

    if !cli.no_start {
        let starter = handle.clone();
        tokio::spawn(async move {
            match starter.start().await {
                Ok(tracks) => info!(count = tracks.len(), "initial tracks attached"),
                Err(err) => warn!(error = %err, "initial tracks not attached"),
            }
        });
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printer_done = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<PeerCommand>() {
                    Ok(PeerCommand::Quit) => break,
                    Ok(command) => execute(&handle, command).await,
                    Err(err) => eprintln!("{err}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut printer => {
                printer_done = true;
                break;
            }
        }
    }

    handle.close().await;
    if !printer_done {
        let _ = printer.await;
    }
    Ok(())
}

async fn execute(handle: &SessionHandle, command: PeerCommand) {
    let outcome: NegotiationResult<String> = match command {
        PeerCommand::Add(kind) => handle
            .add_track(kind)
            .await
            .map(|track| format!("added {} track {}", track.kind, track.id)),
        PeerCommand::Remove(kind) => handle.remove_track(kind).await.map(|removed| {
            if removed.is_empty() {
                format!("no {kind} track to remove")
            } else {
                format!("removed {} {kind} track(s)", removed.len())
            }
        }),
        PeerCommand::Tracks => handle
            .current_tracks()
            .await
            .map(|tracks| describe_tracks(&tracks)),
        PeerCommand::State => handle
            .state()
            .await
            .map(|state| format!("negotiation state: {state:?}")),
        PeerCommand::Help => Ok(HELP.to_string()),
        PeerCommand::Quit => return,
    };
    match outcome {
        Ok(message) => println!("{message}"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn describe_tracks(tracks: &[TrackInfo]) -> String {
    if tracks.is_empty() {
        return "no local tracks".to_string();
    }
    tracks
        .iter()
        .map(|track| {
            let status = if track.live { "live" } else { "ended" };
            format!("{} {} ({status})", track.kind, track.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn report(event: &SessionEvent) {
    match event {
        SessionEvent::Opened {
            local_id,
            remote_id,
            politeness,
        } => println!("paired: {local_id} <-> {remote_id} ({politeness})"),
        SessionEvent::NegotiationStateChanged(state) => info!(?state, "negotiation state"),
        SessionEvent::PeerTrackNotice { kind, added } => {
            let verb = if *added { "added" } else { "removed" };
            println!("peer {verb} a {kind} track");
        }
        SessionEvent::RemoteTrack { kind } => println!("receiving remote {kind}"),
        SessionEvent::TracksChanged(tracks) => info!(count = tracks.len(), "local tracks changed"),
        SessionEvent::ConnectionState(state) => println!("connection {state}"),
        SessionEvent::Error(err) => warn!(error = %err, "negotiation error"),
        SessionEvent::Terminated(None) => println!("session closed"),
        SessionEvent::Terminated(Some(err)) => println!("session ended: {err}"),
    }
}
