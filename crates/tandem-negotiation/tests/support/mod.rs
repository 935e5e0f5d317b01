#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tandem_negotiation::{
    ChannelEvent, ChannelEvents, MediaCapture, MemoryChannel, MockSignalingState, MockTransport,
    NegotiationAgent, NegotiationState, Politeness, SessionEvent, SignalMessage,
    SyntheticCapture, TransportEvents,
};
use tokio::sync::mpsc;

/// One agent wired to a mock transport and one end of a memory channel. The
/// test drives it by hand, so every interleaving is explicit.
pub struct Side {
    pub agent: NegotiationAgent,
    pub transport: Arc<MockTransport>,
    pub transport_events: TransportEvents,
    pub channel: Arc<MemoryChannel>,
    pub inbox: ChannelEvents,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Side {
    fn build(
        channel: MemoryChannel,
        mut inbox: ChannelEvents,
        politeness: Politeness,
        capture: Arc<dyn MediaCapture>,
    ) -> Self {
        assert!(matches!(inbox.try_recv(), Ok(ChannelEvent::Opened { .. })));
        let (transport, transport_events) = MockTransport::new(channel.local_id());
        let channel = Arc::new(channel);
        let (events_tx, events) = mpsc::unbounded_channel();
        let agent = NegotiationAgent::new(transport.clone(), channel.clone(), capture)
            .with_politeness(politeness)
            .with_events(events_tx);
        Self {
            agent,
            transport,
            transport_events,
            channel,
            inbox,
            events,
        }
    }

    /// Feeds every queued transport event to the agent.
    pub async fn pump_transport(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.transport_events.try_recv() {
            self.agent
                .handle_transport_event(event)
                .await
                .expect("transport event handled");
            handled += 1;
        }
        handled
    }

    /// Feeds every signal the other side has sent so far.
    pub async fn deliver(&mut self) -> usize {
        let mut handled = 0;
        while let Some(message) = self.next_message() {
            self.agent
                .handle_signal(message)
                .await
                .expect("signal handled");
            handled += 1;
        }
        handled
    }

    /// Takes the next signal off the wire without handling it.
    pub fn next_message(&mut self) -> Option<SignalMessage> {
        loop {
            match self.inbox.try_recv().ok()? {
                ChannelEvent::Message(message) => return Some(message),
                _ => continue,
            }
        }
    }

    pub fn take_messages(&mut self) -> Vec<SignalMessage> {
        std::iter::from_fn(|| self.next_message()).collect()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    pub fn is_settled(&self) -> bool {
        self.agent.state() == NegotiationState::Idle
            && self.transport.signaling_state() == MockSignalingState::Stable
            && self.transport.track_ids() == self.transport.negotiated_track_ids()
    }
}

pub fn pair(a: Politeness, b: Politeness) -> (Side, Side) {
    pair_with_capture(a, b, Arc::new(SyntheticCapture::new()))
}

pub fn pair_with_capture(
    a: Politeness,
    b: Politeness,
    capture: Arc<dyn MediaCapture>,
) -> (Side, Side) {
    let ((a_channel, a_inbox), (b_channel, b_inbox)) = MemoryChannel::pair("a", "b");
    (
        Side::build(a_channel, a_inbox, a, capture.clone()),
        Side::build(b_channel, b_inbox, b, capture),
    )
}

/// Alternates both sides until nothing is left to process.
pub async fn settle(a: &mut Side, b: &mut Side) {
    for _ in 0..64 {
        let work = a.pump_transport().await
            + b.pump_transport().await
            + a.deliver().await
            + b.deliver().await;
        if work == 0 {
            return;
        }
    }
    panic!("negotiation did not settle");
}

pub fn has_error(events: &[SessionEvent], matches: impl Fn(&tandem_negotiation::NegotiationError) -> bool) -> bool {
    events.iter().any(|event| match event {
        SessionEvent::Error(err) => matches(err),
        _ => false,
    })
}

/// Waits for the first event accepted by `pick`, skipping the rest.
pub async fn wait_for<T>(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    mut pick: impl FnMut(&SessionEvent) -> Option<T>,
) -> T {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("event in time")
            .expect("event stream open");
        if let Some(found) = pick(&event) {
            return found;
        }
    }
}

/// Polls `check` until it holds, failing after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
