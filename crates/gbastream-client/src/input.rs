//! Control-button link: key mapping, the presentation-facing dispatcher and
//! the driver that owns the input transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use gbastream_common::{ButtonAction, ButtonEvent, ButtonId, InputKey, SignalMessage};

use crate::events::{Channel, EventSender, EventSink, SessionEvent};
use crate::latency::LatencyMonitor;
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectSupervisor};
use crate::session::LinkOutcome;
use crate::shutdown::ShutdownSignal;
use crate::signaling::{SignalingTransport, TransportConnector, TransportEvent};

const DEFAULT_KEYS: &[(&str, ButtonId)] = &[
    ("A", ButtonId::A),
    ("B", ButtonId::B),
    ("ENTER", ButtonId::Start),
    (" ", ButtonId::Start),
    ("BACKSPACE", ButtonId::Select),
    ("SHIFT", ButtonId::Select),
    ("ARROWUP", ButtonId::Up),
    ("ARROWDOWN", ButtonId::Down),
    ("ARROWLEFT", ButtonId::Left),
    ("ARROWRIGHT", ButtonId::Right),
    ("L", ButtonId::L),
    ("R", ButtonId::R),
];

/// Physical key name to console button. Lookups are case-insensitive and
/// unmapped keys pass through upper-cased.
#[derive(Debug, Clone)]
pub struct KeyMap {
    keys: HashMap<String, ButtonId>,
}

impl Default for KeyMap {
    fn default() -> Self {
        let mut map = Self::empty();
        for (key, button) in DEFAULT_KEYS {
            map = map.with(key, *button);
        }
        map
    }
}

impl KeyMap {
    pub fn empty() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn with(mut self, key: &str, button: ButtonId) -> Self {
        self.keys.insert(key.to_uppercase(), button);
        self
    }

    pub fn resolve(&self, physical: &str) -> InputKey {
        let key = physical.to_uppercase();
        match self.keys.get(&key) {
            Some(button) => InputKey::Button(*button),
            None => InputKey::Unmapped(key),
        }
    }
}

pub type ButtonQueue = mpsc::UnboundedReceiver<ButtonEvent>;

/// Dispatches button presses from the presentation layer.
///
/// Visual feedback (`ButtonPressed`) fires immediately; delivery to the host
/// depends on the input link being open.
#[derive(Debug, Clone)]
pub struct InputHandle {
    keymap: Arc<KeyMap>,
    queue: mpsc::UnboundedSender<ButtonEvent>,
    events: EventSender,
}

pub fn input_handle(keymap: KeyMap, events: EventSender) -> (InputHandle, ButtonQueue) {
    let (queue, rx) = mpsc::unbounded_channel();
    (
        InputHandle {
            keymap: Arc::new(keymap),
            queue,
            events,
        },
        rx,
    )
}

impl InputHandle {
    pub fn dispatch(&self, physical: &str, action: ButtonAction) -> ButtonEvent {
        let event = ButtonEvent::new(self.keymap.resolve(physical), action);
        let _ = self.events.send(SessionEvent::ButtonPressed {
            key: event.key.clone(),
            action,
        });
        if self.queue.send(event.clone()).is_err() {
            warn!("input link gone; {} {} not sent", event.key, action);
        }
        event
    }

    pub fn press(&self, physical: &str) -> ButtonEvent {
        self.dispatch(physical, ButtonAction::Down)
    }

    pub fn release(&self, physical: &str) -> ButtonEvent {
        self.dispatch(physical, ButtonAction::Up)
    }
}

pub struct InputChannel<T> {
    address: String,
    transports: T,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    events: EventSink,
}

impl<T: TransportConnector> InputChannel<T> {
    pub fn new(
        address: impl Into<String>,
        transports: T,
        policy: ReconnectPolicy,
        ping_interval: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            address: address.into(),
            transports,
            policy,
            ping_interval,
            events: EventSink::new(Channel::Input, events),
        }
    }

    pub fn transports(&self) -> &T {
        &self.transports
    }

    /// Runs until explicit shutdown or until reconnects are exhausted. The
    /// button queue is closed on the way out so later presses are rejected at
    /// the handle instead of piling up.
    pub async fn run(&self, buttons: &mut ButtonQueue, shutdown: ShutdownSignal) {
        self.supervise(buttons, shutdown).await;
        buttons.close();
        while let Ok(event) = buttons.try_recv() {
            warn!("input link gone; dropping {} {}", event.key, event.action);
        }
    }

    async fn supervise(&self, buttons: &mut ButtonQueue, mut shutdown: ShutdownSignal) {
        let mut supervisor = ReconnectSupervisor::new(self.policy);
        loop {
            let span = info_span!("input_link", address = %self.address, link_id = %Uuid::new_v4());
            let outcome = self
                .run_once(&mut supervisor, buttons, &mut shutdown)
                .instrument(span)
                .await;

            let reason = match outcome {
                LinkOutcome::Shutdown => {
                    info!("input link closed");
                    return;
                }
                LinkOutcome::Lost(reason) => reason,
            };
            self.events.connection_changed(false, None, None);

            match supervisor.on_unexpected_closure() {
                ReconnectDecision::Retry { attempt, delay } => {
                    warn!(
                        "input link lost ({}); reconnect {}/{} in {:?}",
                        reason, attempt, self.policy.ceiling, delay
                    );
                    self.events.reconnect_scheduled(attempt, delay);
                    let backoff = tokio::time::sleep(delay);
                    tokio::pin!(backoff);
                    loop {
                        tokio::select! {
                            _ = &mut backoff => break,
                            _ = shutdown.wait() => return,
                            Some(event) = buttons.recv() => {
                                warn!("input link down; dropping {} {}", event.key, event.action);
                            }
                        }
                    }
                }
                ReconnectDecision::Exhausted { attempts } => {
                    error!(
                        "input link lost ({}); giving up after {} reconnect attempts",
                        reason, attempts
                    );
                    self.events.terminal();
                    return;
                }
            }
        }
    }

    async fn run_once(
        &self,
        supervisor: &mut ReconnectSupervisor,
        buttons: &mut ButtonQueue,
        shutdown: &mut ShutdownSignal,
    ) -> LinkOutcome {
        let mut transport = self.transports.open(&self.address);
        let mut latency = LatencyMonitor::new(self.ping_interval);
        let period = latency.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                _ = shutdown.wait() => break LinkOutcome::Shutdown,

                event = transport.next_event() => match event {
                    Some(TransportEvent::Open) => {
                        info!("input transport open");
                        ticker.reset();
                        if supervisor.on_connected() {
                            info!("input link recovered; reconnect attempts reset");
                        }
                        self.events.connection_changed(true, None, None);
                    }
                    Some(TransportEvent::Message(raw)) => self.handle_frame(&raw, &mut latency),
                    Some(TransportEvent::Error(info)) => warn!("input transport error: {}", info),
                    Some(TransportEvent::Closed(_)) | None => {
                        break LinkOutcome::Lost("transport closed".into());
                    }
                },

                Some(event) = buttons.recv() => send_button(&transport, &event),

                _ = ticker.tick(), if transport.is_open() => {
                    latency.probe_sent(Instant::now());
                    transport.send(&SignalMessage::Ping);
                }
            }
        };

        transport.close();
        outcome
    }

    fn handle_frame(&self, raw: &str, latency: &mut LatencyMonitor) {
        match SignalMessage::decode(raw) {
            Ok(SignalMessage::Pong) => match latency.pong_received(Instant::now()) {
                Some(sample) => self.events.ping(sample.rtt_millis()),
                None => debug!("ignoring unmatched pong"),
            },
            Ok(other) => debug!("ignoring inbound {} on input link", other.kind()),
            Err(e) => warn!("dropping malformed input frame: {}", e),
        }
    }
}

fn send_button(transport: &SignalingTransport, event: &ButtonEvent) {
    match event.encode() {
        Ok(text) => {
            transport.send_text(text, "button event");
        }
        Err(e) => error!("failed to encode button event: {}", e),
    }
}
