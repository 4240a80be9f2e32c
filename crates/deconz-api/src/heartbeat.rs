//! Ping/pong liveness tracking for one WebSocket connection.
//!
//! [`Heartbeat`] is a pure state machine driven by the socket task: it owns
//! no timers and performs no I/O. The task asks for the next [`deadline`],
//! sleeps until it, and feeds the wakeup back through [`on_timer`], which
//! says whether to send a ping or declare the connection dead.
//!
//! At most one ping is ever in flight. The next ping is scheduled one
//! interval after the pong arrives, not on a fixed-rate clock, so a slow
//! gateway never accumulates a backlog of pings.
//!
//! [`deadline`]: Heartbeat::deadline
//! [`on_timer`]: Heartbeat::on_timer

use std::time::Duration;

use tokio::time::Instant;

/// What the socket task must do after a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping now; the pong deadline is armed.
    SendPing,
    /// The pong deadline passed. Drop the transport.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle { next_ping: Instant },
    AwaitingPong { deadline: Instant },
    Expired,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    phase: Phase,
}

impl Heartbeat {
    /// Start tracking a freshly opened connection. The first ping is due
    /// immediately.
    pub fn begin(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            phase: Phase::Idle { next_ping: now },
        }
    }

    /// When the socket task should next call [`on_timer`](Self::on_timer).
    /// `None` once the connection has timed out.
    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Idle { next_ping } => Some(next_ping),
            Phase::AwaitingPong { deadline } => Some(deadline),
            Phase::Expired => None,
        }
    }

    /// Advance the machine after the deadline elapsed.
    ///
    /// Returns `None` for a spurious wakeup before the deadline. A
    /// [`HeartbeatAction::Timeout`] is returned at most once.
    pub fn on_timer(&mut self, now: Instant) -> Option<HeartbeatAction> {
        match self.phase {
            Phase::Idle { next_ping } if now >= next_ping => {
                self.phase = Phase::AwaitingPong {
                    deadline: now + self.timeout,
                };
                Some(HeartbeatAction::SendPing)
            }
            Phase::AwaitingPong { deadline } if now >= deadline => {
                self.phase = Phase::Expired;
                Some(HeartbeatAction::Timeout)
            }
            _ => None,
        }
    }

    /// Record a pong. Returns `true` if it answered the outstanding ping.
    ///
    /// Unsolicited pongs are ignored and leave the schedule untouched.
    pub fn on_pong(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::AwaitingPong { .. } => {
                self.phase = Phase::Idle {
                    next_ping: now + self.interval,
                };
                true
            }
            _ => false,
        }
    }

    pub fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::AwaitingPong { .. })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
