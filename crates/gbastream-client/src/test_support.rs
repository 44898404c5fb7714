//! In-memory doubles for the signaling transport and the media connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use gbastream_common::{Error, IceCandidate, Result, SignalMessage};

use crate::media::{MediaConnection, MediaConnector, MediaEvent, MediaEventSender};
use crate::signaling::{
    Outbound, SignalSink, SignalingTransport, TransportConnector, TransportEvent,
};

/// Ordered record of everything the doubles observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetRemote(String),
    CreateAnswer,
    SetLocal(String),
    AddCandidate(String),
    Close,
    Sent(SignalMessage),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, wanted: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == wanted)
    }
}

/// Records outbound messages into a journal.
pub struct JournalSink(pub Journal);

impl SignalSink for JournalSink {
    fn send_signal(&self, message: &SignalMessage) -> bool {
        self.0.push(Call::Sent(message.clone()));
        true
    }
}

pub const ANSWER_SDP: &str = "v=0 answer";

pub struct MockConnection {
    journal: Journal,
    local: Mutex<Option<String>>,
    reject_remote: bool,
    reject_candidate: Option<String>,
}

impl MockConnection {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            local: Mutex::new(None),
            reject_remote: false,
            reject_candidate: None,
        }
    }

    pub fn rejecting_remote(mut self) -> Self {
        self.reject_remote = true;
        self
    }

    pub fn rejecting_candidate(mut self, line: &str) -> Self {
        self.reject_candidate = Some(line.to_string());
        self
    }
}

#[async_trait]
impl MediaConnection for MockConnection {
    async fn set_remote_offer(&self, sdp: &str) -> Result<()> {
        if self.reject_remote {
            return Err(Error::negotiation("malformed offer"));
        }
        self.journal.push(Call::SetRemote(sdp.to_string()));
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        self.journal.push(Call::CreateAnswer);
        Ok(ANSWER_SDP.to_string())
    }

    async fn set_local_answer(&self, sdp: &str) -> Result<()> {
        self.journal.push(Call::SetLocal(sdp.to_string()));
        *self.local.lock().unwrap() = Some(sdp.to_string());
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.local.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.journal
            .push(Call::AddCandidate(candidate.candidate.clone()));
        if self.reject_candidate.as_deref() == Some(candidate.candidate.as_str()) {
            return Err(Error::negotiation("candidate rejected"));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.journal.push(Call::Close);
        Ok(())
    }
}

/// Hands out journaled connections and exposes each connection's callback
/// sender so tests can fire state changes.
pub struct MockMediaConnector {
    pub journal: Journal,
    callbacks: mpsc::UnboundedSender<MediaEventSender>,
    created: AtomicUsize,
    fail: bool,
}

impl MockMediaConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MediaEventSender>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                journal: Journal::default(),
                callbacks: tx,
                created: AtomicUsize::new(0),
                fail: false,
            },
            rx,
        )
    }

    pub fn failing() -> Self {
        let (mut connector, _rx) = Self::new();
        connector.fail = true;
        connector
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaConnector for MockMediaConnector {
    type Connection = MockConnection;

    async fn connect(&self, events: MediaEventSender) -> Result<MockConnection> {
        if self.fail {
            return Err(Error::internal("no media stack"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let _ = self.callbacks.send(events);
        Ok(MockConnection::new(self.journal.clone()))
    }
}

/// The far end of a transport opened by [`MockTransportConnector`].
pub struct MockPeer {
    pub address: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl MockPeer {
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Open);
    }

    pub fn deliver(&self, message: &SignalMessage) {
        self.deliver_raw(&message.encode().unwrap());
    }

    pub fn deliver_raw(&self, raw: &str) {
        let _ = self.events.send(TransportEvent::Message(raw.to_string()));
    }

    pub fn fail(&self, info: &str) {
        let _ = self.events.send(TransportEvent::Error(info.to_string()));
        let _ = self.events.send(TransportEvent::Closed(None));
    }

    pub fn close(&self) {
        let _ = self.events.send(TransportEvent::Closed(None));
    }

    /// Next frame the engine sent, decoded. `None` once the engine closed
    /// the transport.
    pub async fn next_sent(&mut self) -> Option<String> {
        match self.outbound.recv().await? {
            Outbound::Frame(text) => Some(text),
            Outbound::Close => None,
        }
    }

    pub async fn next_signal(&mut self) -> Option<SignalMessage> {
        let text = self.next_sent().await?;
        Some(SignalMessage::decode(&text).unwrap())
    }
}

pub struct MockTransportConnector {
    peers: mpsc::UnboundedSender<MockPeer>,
    opened: AtomicUsize,
}

impl MockTransportConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers: tx,
                opened: AtomicUsize::new(0),
            },
            rx,
        )
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl TransportConnector for MockTransportConnector {
    fn open(&self, address: &str) -> SignalingTransport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.opened.fetch_add(1, Ordering::SeqCst);
        let _ = self.peers.send(MockPeer {
            address: address.to_string(),
            events: events_tx,
            outbound: outbound_rx,
        });
        SignalingTransport::from_parts(address, outbound_tx, events_rx)
    }
}

/// Fires a media callback the way the WebRTC stack would.
pub fn fire(callbacks: &MediaEventSender, event: MediaEvent) {
    let _ = callbacks.send(event);
}

/// Counts `WARN` events emitted while the returned guard is alive on this
/// thread.
pub fn count_warnings() -> (tracing::subscriber::DefaultGuard, WarnCount) {
    use tracing_subscriber::layer::SubscriberExt;

    let count = WarnCount::default();
    let subscriber = tracing_subscriber::registry().with(count.clone());
    (tracing::subscriber::set_default(subscriber), count)
}

#[derive(Debug, Clone, Default)]
pub struct WarnCount(Arc<AtomicUsize>);

impl WarnCount {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCount {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Lets every runnable task catch up. Time is paused in driver tests, so
/// this returns as soon as the runtime goes idle.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
}
