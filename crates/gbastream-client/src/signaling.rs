use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, warn};
use url::Url;

use gbastream_common::{Error, SignalMessage};

/// Upper bound on the TCP and WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle notification from a signaling transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    Closed(Option<CloseInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Command from the transport owner to the I/O task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Close,
}

/// Opens signaling transports. The production implementation is
/// [`WsConnector`]; tests substitute an in-memory one.
pub trait TransportConnector: Send + Sync {
    fn open(&self, address: &str) -> SignalingTransport;
}

/// Anything that can carry an outbound signaling message.
pub trait SignalSink {
    fn send_signal(&self, message: &SignalMessage) -> bool;
}

/// Owned handle to one duplex signaling connection.
///
/// The ready state is derived from the transport's own event stream, so it is
/// only as fresh as the last [`SignalingTransport::next_event`] call.
#[derive(Debug)]
pub struct SignalingTransport {
    address: String,
    state: ReadyState,
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl SignalingTransport {
    pub fn from_parts(
        address: impl Into<String>,
        outbound: mpsc::UnboundedSender<Outbound>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self {
            address: address.into(),
            state: ReadyState::Connecting,
            outbound,
            events,
        }
    }

    pub fn state(&self) -> ReadyState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ReadyState::Open
    }

    /// Next lifecycle event. Returns `None` once the I/O side is gone and no
    /// events remain; callers treat that as a closure.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.recv().await;
        match &event {
            Some(TransportEvent::Open) if self.state == ReadyState::Connecting => {
                self.state = ReadyState::Open;
            }
            Some(TransportEvent::Closed(_)) | None => self.state = ReadyState::Closed,
            _ => {}
        }
        event
    }

    /// Encodes and queues a message. Fails silently (logged) when the
    /// transport is not open.
    pub fn send(&self, message: &SignalMessage) -> bool {
        match message.encode() {
            Ok(text) => self.send_text(text, message.kind()),
            Err(e) => {
                error!("failed to encode {} message: {}", message.kind(), e);
                false
            }
        }
    }

    /// Queues a pre-encoded frame under the same open-state rule as
    /// [`SignalingTransport::send`].
    pub fn send_text(&self, text: String, what: &str) -> bool {
        if self.state != ReadyState::Open {
            warn!(
                "dropping {} for {}: transport is {:?}",
                what, self.address, self.state
            );
            return false;
        }
        if self.outbound.send(Outbound::Frame(text)).is_err() {
            warn!("dropping {} for {}: I/O task is gone", what, self.address);
            return false;
        }
        true
    }

    /// Explicit close. The I/O task stops and no further events are accepted.
    pub fn close(&mut self) {
        if matches!(self.state, ReadyState::Closing | ReadyState::Closed) {
            return;
        }
        self.state = ReadyState::Closing;
        let _ = self.outbound.send(Outbound::Close);
        self.events.close();
    }
}

impl SignalSink for SignalingTransport {
    fn send_signal(&self, message: &SignalMessage) -> bool {
        self.send(message)
    }
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl TransportConnector for WsConnector {
    fn open(&self, address: &str) -> SignalingTransport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_websocket(address.to_string(), events_tx, outbound_rx));
        SignalingTransport::from_parts(address, outbound_tx, events_rx)
    }
}

pub fn validate_address(address: &str) -> Result<Url, String> {
    let url = Url::parse(address.trim()).map_err(|e| format!("invalid address {address}: {e}"))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(format!(
            "unsupported scheme `{other}` in {address}; expected ws:// or wss://"
        )),
    }
}

async fn run_websocket(
    address: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let url = match validate_address(&address) {
        Ok(url) => url,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(e));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
    };

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await;
    let ws_stream = match connected {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            let _ = events.send(TransportEvent::Error(format!(
                "connect to {address} failed: {e}"
            )));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
        Err(_) => {
            let err = Error::timeout(format!("connect to {address} after {CONNECT_TIMEOUT:?}"));
            let _ = events.send(TransportEvent::Error(err.to_string()));
            let _ = events.send(TransportEvent::Closed(None));
            return;
        }
    };
    debug!("signaling transport open: {}", address);
    if events.send(TransportEvent::Open).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            command = outbound.recv() => match command {
                Some(Outbound::Frame(text)) => {
                    if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                        let _ = events.send(TransportEvent::Error(format!("send failed: {e}")));
                        let _ = events.send(TransportEvent::Closed(None));
                        return;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    let _ = write.close().await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(_) => debug!("ignoring non-UTF-8 binary frame from {}", address),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    let info = frame.map(|f| CloseInfo {
                        code: u16::from(f.code),
                        reason: f.reason.to_string(),
                    });
                    let _ = events.send(TransportEvent::Closed(info));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    let _ = events.send(TransportEvent::Closed(None));
                    return;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed(None));
                    return;
                }
            },
        }
    }
}
