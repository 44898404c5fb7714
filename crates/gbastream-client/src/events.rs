use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use gbastream_common::{ButtonAction, InputKey};

use crate::media::{ConnectionState, IceState, RemoteTrack};

/// Which of the two links an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Media,
    Input,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Media => f.write_str("media"),
            Channel::Input => f.write_str("input"),
        }
    }
}

/// Everything the presentation layer can observe.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged {
        channel: Channel,
        connected: bool,
        connection_state: Option<ConnectionState>,
        ice_state: Option<IceState>,
    },
    PingUpdate {
        channel: Channel,
        rtt_millis: u64,
    },
    /// Fired on dispatch, whether or not the input link is open.
    ButtonPressed {
        key: InputKey,
        action: ButtonAction,
    },
    TrackAvailable(RemoteTrack),
    ReconnectScheduled {
        channel: Channel,
        attempt: u32,
        delay: Duration,
    },
    /// Reconnects exhausted. Only a restart recovers.
    Terminal {
        channel: Channel,
    },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Emits session events, ignoring a presentation layer that has gone away.
#[derive(Debug, Clone)]
pub struct EventSink {
    channel: Channel,
    tx: EventSender,
}

impl EventSink {
    pub fn new(channel: Channel, tx: EventSender) -> Self {
        Self { channel, tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn connection_changed(
        &self,
        connected: bool,
        connection_state: Option<ConnectionState>,
        ice_state: Option<IceState>,
    ) {
        self.emit(SessionEvent::ConnectionChanged {
            channel: self.channel,
            connected,
            connection_state,
            ice_state,
        });
    }

    pub fn ping(&self, rtt_millis: u64) {
        self.emit(SessionEvent::PingUpdate {
            channel: self.channel,
            rtt_millis,
        });
    }

    pub fn reconnect_scheduled(&self, attempt: u32, delay: Duration) {
        self.emit(SessionEvent::ReconnectScheduled {
            channel: self.channel,
            attempt,
            delay,
        });
    }

    pub fn terminal(&self) {
        self.emit(SessionEvent::Terminal {
            channel: self.channel,
        });
    }
}
