//! Media link driver: one task that owns the signaling transport, the
//! negotiator and the latency monitor for each bootstrap attempt, wrapped in
//! the reconnect loop.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use gbastream_common::SignalMessage;

use crate::events::{Channel, EventSender, EventSink, SessionEvent};
use crate::latency::LatencyMonitor;
use crate::media::{ConnectionState, IceState, MediaConnection, MediaConnector, MediaEvent};
use crate::negotiation::{NegotiationPhase, Negotiator, Transition};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectSupervisor};
use crate::shutdown::ShutdownSignal;
use crate::signaling::{SignalingTransport, TransportConnector, TransportEvent};

/// How a single bootstrap attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkOutcome {
    Shutdown,
    Lost(String),
}

pub struct MediaSession<T, M> {
    address: String,
    transports: T,
    media: M,
    policy: ReconnectPolicy,
    ping_interval: Duration,
    events: EventSink,
}

impl<T, M> MediaSession<T, M>
where
    T: TransportConnector,
    M: MediaConnector,
{
    pub fn new(
        address: impl Into<String>,
        transports: T,
        media: M,
        policy: ReconnectPolicy,
        ping_interval: Duration,
        events: EventSender,
    ) -> Self {
        Self {
            address: address.into(),
            transports,
            media,
            policy,
            ping_interval,
            events: EventSink::new(Channel::Media, events),
        }
    }

    pub fn transports(&self) -> &T {
        &self.transports
    }

    pub fn media(&self) -> &M {
        &self.media
    }

    /// Runs until explicit shutdown or until reconnects are exhausted.
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut supervisor = ReconnectSupervisor::new(self.policy);
        loop {
            let span = info_span!("media_link", address = %self.address, link_id = %Uuid::new_v4());
            let outcome = self
                .run_once(&mut supervisor, &mut shutdown)
                .instrument(span)
                .await;

            let reason = match outcome {
                LinkOutcome::Shutdown => {
                    info!("media link closed");
                    return;
                }
                LinkOutcome::Lost(reason) => reason,
            };
            self.events.connection_changed(false, None, None);

            match supervisor.on_unexpected_closure() {
                ReconnectDecision::Retry { attempt, delay } => {
                    warn!(
                        "media link lost ({}); reconnect {}/{} in {:?}",
                        reason, attempt, self.policy.ceiling, delay
                    );
                    self.events.reconnect_scheduled(attempt, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.wait() => return,
                    }
                }
                ReconnectDecision::Exhausted { attempts } => {
                    error!(
                        "media link lost ({}); giving up after {} reconnect attempts",
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
        shutdown: &mut ShutdownSignal,
    ) -> LinkOutcome {
        let mut transport = self.transports.open(&self.address);
        let mut negotiator: Negotiator<M::Connection> = Negotiator::new();
        let (callbacks, mut media_events) = mpsc::unbounded_channel();
        let mut callbacks = Some(callbacks);
        let mut latency = LatencyMonitor::new(self.ping_interval);
        let period = latency.interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                _ = shutdown.wait() => break LinkOutcome::Shutdown,

                event = transport.next_event() => match event {
                    Some(TransportEvent::Open) => {
                        info!("signaling transport open");
                        ticker.reset();
                        self.events.connection_changed(
                            false,
                            Some(ConnectionState::Connecting),
                            Some(IceState::Checking),
                        );
                        let Some(callbacks) = callbacks.take() else {
                            continue;
                        };
                        match self.media.connect(callbacks).await {
                            Ok(connection) => {
                                if let Err(e) = negotiator.bootstrap(connection) {
                                    warn!("{}", e);
                                }
                            }
                            Err(e) => {
                                error!("failed to create media connection: {}", e);
                                break LinkOutcome::Lost(e.to_string());
                            }
                        }
                    }
                    Some(TransportEvent::Message(raw)) => {
                        self.handle_frame(&raw, &mut negotiator, &mut latency, &transport)
                            .await;
                    }
                    Some(TransportEvent::Error(info)) => {
                        warn!("signaling transport error: {}", info);
                        negotiator.fail_from_transport();
                        self.events.connection_changed(
                            false,
                            Some(ConnectionState::Failed),
                            Some(IceState::Failed),
                        );
                    }
                    Some(TransportEvent::Closed(info)) => {
                        let reason = match info {
                            Some(info) => format!("transport closed ({} {})", info.code, info.reason),
                            None => "transport closed".to_string(),
                        };
                        break LinkOutcome::Lost(reason);
                    }
                    None => break LinkOutcome::Lost("transport closed".into()),
                },

                Some(event) = media_events.recv() => {
                    if let Some(outcome) =
                        self.handle_media_event(event, &mut negotiator, supervisor, &transport)
                    {
                        break outcome;
                    }
                }

                _ = ticker.tick(), if transport.is_open() => {
                    latency.probe_sent(Instant::now());
                    transport.send(&SignalMessage::Ping);
                }
            }
        };

        // Callbacks first, so nothing the connection reports during close
        // reaches this link.
        drop(media_events);
        transport.close();
        negotiator.close().await;
        outcome
    }

    async fn handle_frame(
        &self,
        raw: &str,
        negotiator: &mut Negotiator<M::Connection>,
        latency: &mut LatencyMonitor,
        transport: &SignalingTransport,
    ) {
        let message = match SignalMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping malformed signaling frame: {}", e);
                return;
            }
        };

        match message {
            SignalMessage::Offer { sdp } => {
                if let Err(e) = negotiator.handle_offer(&sdp, transport).await {
                    warn!("discarding offer: {}", e);
                }
            }
            SignalMessage::Candidate { candidate } => {
                negotiator.handle_candidate(candidate).await;
            }
            SignalMessage::Pong => match latency.pong_received(Instant::now()) {
                Some(sample) => self.events.ping(sample.rtt_millis()),
                None => debug!("ignoring unmatched pong"),
            },
            other => debug!("ignoring inbound {} message", other.kind()),
        }
    }

    fn handle_media_event(
        &self,
        event: MediaEvent,
        negotiator: &mut Negotiator<M::Connection>,
        supervisor: &mut ReconnectSupervisor,
        transport: &SignalingTransport,
    ) -> Option<LinkOutcome> {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                transport.send(&SignalMessage::Candidate { candidate });
            }
            MediaEvent::ConnectionState(state) => {
                let ice = Some(negotiator.ice_state());
                match negotiator.on_connection_state(state) {
                    Transition::Connected => {
                        if supervisor.on_connected() {
                            info!("media link recovered; reconnect attempts reset");
                        }
                        self.events.connection_changed(true, Some(state), ice);
                    }
                    Transition::Lost(state) => {
                        self.events.connection_changed(false, Some(state), ice);
                        return Some(LinkOutcome::Lost(format!("media connection {state}")));
                    }
                    Transition::Unchanged => {
                        self.events
                            .connection_changed(is_connected(negotiator), Some(state), ice);
                    }
                }
            }
            MediaEvent::IceState(state) => {
                negotiator.on_ice_state(state);
                self.events.connection_changed(
                    is_connected(negotiator),
                    Some(negotiator.connection_state()),
                    Some(state),
                );
            }
            MediaEvent::SignalingState(state) => {
                debug!("signaling state: {:?}", state);
                negotiator.on_signaling_state(state);
            }
            MediaEvent::Track(track) => {
                self.events.emit(SessionEvent::TrackAvailable(track));
            }
        }
        None
    }
}

fn is_connected<C: MediaConnection>(negotiator: &Negotiator<C>) -> bool {
    negotiator.phase() == NegotiationPhase::Connected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_channel, EventReceiver};
    use crate::media::{MediaEventSender, RemoteTrack, TrackKind};
    use crate::shutdown::shutdown_channel;
    use crate::test_support::{
        count_warnings, fire, settle, Call, MockMediaConnector, MockPeer, MockTransportConnector,
        ANSWER_SDP,
    };
    use gbastream_common::IceCandidate;

    const PING: Duration = Duration::from_millis(5_000);

    struct Harness {
        session: MediaSession<MockTransportConnector, MockMediaConnector>,
        peers: mpsc::UnboundedReceiver<MockPeer>,
        callbacks: mpsc::UnboundedReceiver<MediaEventSender>,
        events: EventReceiver,
    }

    fn harness(policy: ReconnectPolicy) -> Harness {
        let (transports, peers) = MockTransportConnector::new();
        let (media, callbacks) = MockMediaConnector::new();
        let (tx, events) = event_channel();
        Harness {
            session: MediaSession::new("ws://host/signal", transports, media, policy, PING, tx),
            peers,
            callbacks,
            events,
        }
    }

    fn drain(events: &mut EventReceiver) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_ceiling() {
        let Harness {
            session,
            mut peers,
            mut events,
            ..
        } = harness(ReconnectPolicy::default());
        let (_trigger, signal) = shutdown_channel();
        let started = Instant::now();

        let script = async {
            for _ in 0..4 {
                let peer = peers.recv().await.unwrap();
                peer.open();
                peer.close();
            }
        };
        tokio::join!(session.run(signal), script);

        assert_eq!(session.transports().opened(), 4);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(9_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(9_100), "{elapsed:?}");

        let events = drain(&mut events);
        let scheduled: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ReconnectScheduled { attempt, delay, .. } => {
                    assert_eq!(*delay, Duration::from_millis(3_000));
                    Some(*attempt)
                }
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec![1, 2, 3]);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Terminal {
                channel: Channel::Media
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_candidates_flushed_after_answer() {
        let Harness {
            session,
            mut peers,
            ..
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let mut peer = peers.recv().await.unwrap();
            peer.open();
            for n in 1..=3 {
                peer.deliver(&SignalMessage::Candidate {
                    candidate: candidate(n),
                });
            }
            peer.deliver(&SignalMessage::Offer {
                sdp: "v=0 offer".into(),
            });
            let answer = peer.next_signal().await;
            assert_eq!(
                answer,
                Some(SignalMessage::Answer {
                    sdp: ANSWER_SDP.into()
                })
            );
            settle().await;
            trigger.trigger();
        };
        tokio::join!(session.run(signal), script);

        let journal = &session.media().journal;
        let set_local = journal
            .position(&Call::SetLocal(ANSWER_SDP.into()))
            .expect("local answer applied");
        let calls = journal.calls();
        let applied: Vec<_> = calls[set_local + 1..]
            .iter()
            .filter_map(|c| match c {
                Call::AddCandidate(line) => Some(line.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            applied,
            (1..=3).map(|n| candidate(n).candidate).collect::<Vec<_>>()
        );
        assert_eq!(calls.last(), Some(&Call::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_logs_once_and_changes_nothing() {
        let (_guard, warnings) = count_warnings();
        let Harness {
            session,
            mut peers,
            mut events,
            ..
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let peer = peers.recv().await.unwrap();
            peer.open();
            settle().await;
            let before = drain(&mut events);
            peer.deliver_raw("not-json");
            settle().await;
            assert_eq!(warnings.get(), 1);
            assert!(drain(&mut events).is_empty());
            trigger.trigger();
            before
        };
        let (_, before) = tokio::join!(session.run(signal), script);

        assert_eq!(before.len(), 1);
        assert_eq!(session.transports().opened(), 1);
        assert_eq!(session.media().created(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_round_trip_emits_sample() {
        let Harness {
            session,
            mut peers,
            mut events,
            ..
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let mut peer = peers.recv().await.unwrap();
            assert_eq!(peer.address, "ws://host/signal");
            peer.open();
            assert_eq!(peer.next_signal().await, Some(SignalMessage::Ping));
            tokio::time::advance(Duration::from_millis(42)).await;
            peer.deliver(&SignalMessage::Pong);
            // Unmatched, ignored.
            peer.deliver(&SignalMessage::Pong);
            settle().await;
            trigger.trigger();
        };
        tokio::join!(session.run(signal), script);

        let samples: Vec<u64> = drain(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::PingUpdate { rtt_millis, .. } => Some(rtt_millis),
                _ => None,
            })
            .collect();
        assert_eq!(samples, vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_resets_attempts() {
        let Harness {
            session,
            mut peers,
            mut callbacks,
            mut events,
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let first = peers.recv().await.unwrap();
            first.open();
            first.close();

            let second = peers.recv().await.unwrap();
            second.open();
            let _stale = callbacks.recv().await.unwrap();
            let live = callbacks.recv().await.unwrap();
            fire(&live, MediaEvent::ConnectionState(ConnectionState::Connected));
            settle().await;
            second.close();

            let _third = peers.recv().await.unwrap();
            trigger.trigger();
        };
        tokio::join!(session.run(signal), script);

        let events = drain(&mut events);
        let scheduled: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled, vec![1, 1]);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ConnectionChanged {
                connected: true,
                connection_state: Some(ConnectionState::Connected),
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_triggers_reconnect() {
        let Harness {
            session,
            mut peers,
            mut callbacks,
            mut events,
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let mut peer = peers.recv().await.unwrap();
            peer.open();
            let live = callbacks.recv().await.unwrap();
            fire(&live, MediaEvent::ConnectionState(ConnectionState::Failed));
            // The engine closes its side.
            assert_eq!(peer.next_sent().await, None);
            let _retry = peers.recv().await.unwrap();
            trigger.trigger();
        };
        tokio::join!(session.run(signal), script);

        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SessionEvent::ReconnectScheduled { attempt: 1, .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_reports_failed() {
        let Harness {
            session,
            mut peers,
            mut events,
            ..
        } = harness(ReconnectPolicy {
            ceiling: 0,
            backoff: Duration::from_millis(3_000),
        });
        let (_trigger, signal) = shutdown_channel();

        let script = async {
            let peer = peers.recv().await.unwrap();
            peer.open();
            peer.fail("connection reset");
        };
        tokio::join!(session.run(signal), script);

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ConnectionChanged {
                connected: false,
                connection_state: Some(ConnectionState::Failed),
                ice_state: Some(IceState::Failed),
                ..
            }
        )));
        assert!(matches!(events.last(), Some(SessionEvent::Terminal { .. })));
        assert_eq!(session.transports().opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_shutdown_never_reconnects() {
        let Harness {
            session,
            mut peers,
            mut callbacks,
            mut events,
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let mut peer = peers.recv().await.unwrap();
            peer.open();
            let live = callbacks.recv().await.unwrap();
            trigger.trigger();
            assert_eq!(peer.next_sent().await, None);
            settle().await;
            // Callbacks after teardown go nowhere.
            assert!(live
                .send(MediaEvent::ConnectionState(ConnectionState::Closed))
                .is_err());
        };
        tokio::join!(session.run(signal), script);

        assert_eq!(session.transports().opened(), 1);
        assert_eq!(session.media().journal.calls(), vec![Call::Close]);
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::ReconnectScheduled { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_candidates_and_tracks_are_forwarded() {
        let Harness {
            session,
            mut peers,
            mut callbacks,
            mut events,
        } = harness(ReconnectPolicy::default());
        let (trigger, signal) = shutdown_channel();

        let script = async {
            let mut peer = peers.recv().await.unwrap();
            peer.open();
            let live = callbacks.recv().await.unwrap();
            fire(&live, MediaEvent::LocalCandidate(candidate(9)));
            fire(
                &live,
                MediaEvent::Track(RemoteTrack {
                    id: "video0".into(),
                    stream_id: "stream".into(),
                    kind: TrackKind::Video,
                    source: None,
                }),
            );
            assert_eq!(
                peer.next_signal().await,
                Some(SignalMessage::Candidate {
                    candidate: candidate(9)
                })
            );
            settle().await;
            trigger.trigger();
        };
        tokio::join!(session.run(signal), script);

        assert!(drain(&mut events).iter().any(|e| matches!(
            e,
            SessionEvent::TrackAvailable(track) if track.id == "video0"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_stack_failure_counts_as_loss() {
        let (transports, mut peers) = MockTransportConnector::new();
        let (tx, mut events) = event_channel();
        let session = MediaSession::new(
            "ws://host/signal",
            transports,
            MockMediaConnector::failing(),
            ReconnectPolicy {
                ceiling: 0,
                backoff: Duration::from_millis(3_000),
            },
            PING,
            tx,
        );
        let (_trigger, signal) = shutdown_channel();

        let script = async {
            let peer = peers.recv().await.unwrap();
            peer.open();
            settle().await;
            peer
        };
        let (_, _peer) = tokio::join!(session.run(signal), script);

        assert_eq!(session.media().created(), 0);
        assert!(matches!(
            drain(&mut events).last(),
            Some(SessionEvent::Terminal {
                channel: Channel::Media
            })
        ));
    }
}
