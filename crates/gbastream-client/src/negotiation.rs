//! Offer/answer and candidate handling for one media connection.

use tracing::{debug, info, warn};

use gbastream_common::{Error, IceCandidate, Result, SignalMessage};

use crate::candidates::CandidateBuffer;
use crate::media::{ConnectionState, IceState, MediaConnection, SignalingState};
use crate::signaling::SignalSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    Idle,
    Bootstrapping,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// What the connection object's own state report means for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Lost(ConnectionState),
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    Applied,
    Rejected,
    Buffered,
    Dropped,
}

/// Owns exactly one media connection for the lifetime of one bootstrap.
/// A reconnect builds a new `Negotiator`.
pub struct Negotiator<C> {
    phase: NegotiationPhase,
    connection: Option<C>,
    pending: CandidateBuffer,
    remote_description_set: bool,
    connection_state: ConnectionState,
    ice_state: IceState,
    signaling_state: SignalingState,
}

impl<C: MediaConnection> Default for Negotiator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MediaConnection> Negotiator<C> {
    pub fn new() -> Self {
        Self {
            phase: NegotiationPhase::Idle,
            connection: None,
            pending: CandidateBuffer::new(),
            remote_description_set: false,
            connection_state: ConnectionState::New,
            ice_state: IceState::New,
            signaling_state: SignalingState::Stable,
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn ice_state(&self) -> IceState {
        self.ice_state
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    /// Takes ownership of a freshly created connection. Only valid once.
    pub fn bootstrap(&mut self, connection: C) -> Result<()> {
        if self.phase != NegotiationPhase::Idle {
            return Err(Error::protocol(format!(
                "cannot bootstrap from {:?}",
                self.phase
            )));
        }
        self.connection = Some(connection);
        self.connection_state = ConnectionState::Connecting;
        self.ice_state = IceState::Checking;
        self.phase = NegotiationPhase::Bootstrapping;
        Ok(())
    }

    /// Applies a remote offer and answers it through `sink`. Re-offers are
    /// processed the same way.
    ///
    /// Buffered candidates are flushed as soon as the remote description is
    /// in place, even if producing the answer fails afterwards.
    pub async fn handle_offer<S>(&mut self, sdp: &str, sink: &S) -> Result<()>
    where
        S: SignalSink + ?Sized,
    {
        let Some(connection) = self.connection.as_ref() else {
            return Err(Error::protocol("offer without an active media connection"));
        };
        if self.phase == NegotiationPhase::Bootstrapping {
            self.phase = NegotiationPhase::Negotiating;
        }

        connection.set_remote_offer(sdp).await?;
        self.remote_description_set = true;

        let answered = answer_offer(connection, sink).await;
        self.flush_pending().await;
        answered
    }

    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        let Some(connection) = self.connection.as_ref() else {
            debug!("dropping candidate: no active media connection");
            return CandidateDisposition::Dropped;
        };
        if !self.remote_description_set {
            self.pending.push(candidate);
            debug!("buffered candidate ({} pending)", self.pending.len());
            return CandidateDisposition::Buffered;
        }
        match connection.add_ice_candidate(candidate).await {
            Ok(()) => CandidateDisposition::Applied,
            Err(e) => {
                warn!("remote candidate rejected: {}", e);
                CandidateDisposition::Rejected
            }
        }
    }

    async fn flush_pending(&mut self) {
        let queued = self.pending.drain();
        let Some(connection) = self.connection.as_ref() else {
            return;
        };
        if queued.is_empty() {
            return;
        }
        debug!("applying {} buffered candidates", queued.len());
        for candidate in queued {
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("buffered candidate rejected: {}", e);
            }
        }
    }

    /// Records the connection object's own state report. This is the only
    /// input that moves the phase to `Connected` or to a loss.
    pub fn on_connection_state(&mut self, state: ConnectionState) -> Transition {
        if self.connection.is_none() {
            return Transition::Unchanged;
        }
        self.connection_state = state;
        match state {
            ConnectionState::Connected => {
                if self.phase == NegotiationPhase::Connected {
                    return Transition::Unchanged;
                }
                info!("media connection established");
                self.phase = NegotiationPhase::Connected;
                Transition::Connected
            }
            ConnectionState::Failed => {
                self.phase = NegotiationPhase::Failed;
                Transition::Lost(state)
            }
            lost if lost.is_loss() => {
                self.phase = NegotiationPhase::Disconnected;
                Transition::Lost(lost)
            }
            _ => Transition::Unchanged,
        }
    }

    pub fn on_ice_state(&mut self, state: IceState) {
        self.ice_state = state;
    }

    pub fn on_signaling_state(&mut self, state: SignalingState) {
        self.signaling_state = state;
    }

    /// Transport-level failure: skip waiting for the connection's own report.
    pub fn fail_from_transport(&mut self) {
        if self.phase == NegotiationPhase::Closed {
            return;
        }
        self.phase = NegotiationPhase::Failed;
        self.connection_state = ConnectionState::Failed;
        self.ice_state = IceState::Failed;
    }

    /// Releases the connection and forgets any buffered candidates.
    pub async fn close(&mut self) {
        self.pending.clear();
        self.remote_description_set = false;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                debug!("media connection close failed: {}", e);
            }
        }
        self.phase = NegotiationPhase::Closed;
    }
}

async fn answer_offer<C, S>(connection: &C, sink: &S) -> Result<()>
where
    C: MediaConnection + ?Sized,
    S: SignalSink + ?Sized,
{
    let answer = connection.create_answer().await?;
    connection.set_local_answer(&answer).await?;
    let sdp = connection.local_description().await.unwrap_or(answer);
    if !sink.send_signal(&SignalMessage::Answer { sdp }) {
        return Err(Error::transport("answer could not be sent"));
    }
    Ok(())
}
