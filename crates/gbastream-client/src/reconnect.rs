use std::time::Duration;

pub const DEFAULT_RECONNECT_CEILING: u32 = 3;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(3_000);

/// Fixed-delay retry policy shared by both links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub ceiling: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_RECONNECT_CEILING,
            backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt: u32,
    pub ceiling: u32,
    pub backoff_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Re-run the full bootstrap after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// Ceiling reached; no further automatic attempts.
    Exhausted { attempts: u32 },
}

/// Decides whether an unexpected closure gets another bootstrap.
///
/// Explicit teardown never reaches the supervisor.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    attempt: u32,
    terminal: bool,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            terminal: false,
        }
    }

    pub fn on_unexpected_closure(&mut self) -> ReconnectDecision {
        if self.terminal || self.attempt >= self.policy.ceiling {
            self.terminal = true;
            return ReconnectDecision::Exhausted {
                attempts: self.attempt,
            };
        }
        self.attempt += 1;
        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay: self.policy.backoff,
        }
    }

    /// Resets the attempt counter. Returns true when there was something to
    /// reset, i.e. on the first connection after failures.
    pub fn on_connected(&mut self) -> bool {
        if self.terminal || self.attempt == 0 {
            return false;
        }
        self.attempt = 0;
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn state(&self) -> ReconnectState {
        ReconnectState {
            attempt: self.attempt,
            ceiling: self.policy.ceiling,
            backoff_millis: self.policy.backoff.as_millis() as u64,
        }
    }
}
