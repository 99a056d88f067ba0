//! # Connectivity Supervisor
//!
//! One retry/backoff state machine shared by both supervised connections:
//! the host's network link and the MQTT broker session. Each instance owns
//! its [`Link`] and is advanced only by [`ConnectivitySupervisor::tick`],
//! which performs at most one transition per call and never blocks.
//!
//! ```text
//!   Disconnected --attempt--> Connecting --success--> Connected
//!        ^                        |                      |
//!        |<------- failure -------+                      |
//!        |<--------------------- link lost --------------+
//!        |
//!        +-- retries exhausted --> CoolingDown --elapsed--> Disconnected
//!        +-- retries exhausted --> FailSafe (terminal, restart requested)
//! ```
//!
//! Which exhaustion branch applies is chosen by [`Exhaustion`]. The broker
//! cools down and tries again. The network link, once out of retries, turns
//! the radio off and waits out a quiet period before asking for a process
//! restart: a clean boot recovers a wedged network stack more reliably than
//! retrying forever.

use log::{error, info, warn};
use std::time::{Duration, Instant};

/// Progress of a connection attempt started with [`Link::begin_connect`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectProgress {
    /// Still waiting for the transport to resolve
    Pending,
    /// Connection is up
    Established,
    /// Attempt failed; the string is a human-readable reason
    Failed(String),
}

/// A connection the supervisor can drive.
///
/// All methods must return promptly; slow work belongs to the
/// implementation's own background machinery.
pub trait Link {
    /// Kick off a connection attempt.
    fn begin_connect(&mut self);

    /// Report how the current attempt is going.
    fn poll_connect(&mut self) -> ConnectProgress;

    /// Whether an established connection is still alive.
    fn is_up(&self) -> bool;

    /// Tear the link down for good (radio off). Called once on fail-safe entry.
    fn shutdown(&mut self) {}
}

/// What happens once `max_retries` consecutive attempts failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exhaustion {
    /// Pause for `retry_interval * multiplier`, then start counting again
    Cooldown { multiplier: u32 },
    /// Shut the link down, wait `quiet_period`, then request a restart
    FailSafe { quiet_period: Duration },
}

/// Retry tuning for one supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before exhaustion (at least 1)
    pub max_retries: u32,
    /// Minimum spacing between attempts; also the attempt timeout
    pub retry_interval: Duration,
    pub exhaustion: Exhaustion,
}

impl RetryPolicy {
    /// Length of the cooldown window, or `None` for fail-safe policies.
    pub fn cooldown(&self) -> Option<Duration> {
        match self.exhaustion {
            Exhaustion::Cooldown { multiplier } => Some(
                self.retry_interval
                    .checked_mul(multiplier)
                    .unwrap_or(Duration::MAX),
            ),
            Exhaustion::FailSafe { .. } => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupervisorState {
    Disconnected,
    Connecting,
    Connected,
    CoolingDown,
    /// Terminal: the link is shut down and only a restart recovers it
    FailSafe,
}

/// State change reported by a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// A connect attempt was started
    Attempting,
    Connected,
    /// An attempt failed; `retries` failures so far
    AttemptFailed { retries: u32 },
    /// An established connection dropped
    LinkLost,
    CoolingDown,
    CooldownElapsed,
    FailSafeEntered,
    /// Fail-safe quiet period is over; the host must restart the process
    RestartRequired,
}

/// Retry/backoff state machine around one [`Link`].
pub struct ConnectivitySupervisor<L: Link> {
    name: &'static str,
    link: L,
    policy: RetryPolicy,
    state: SupervisorState,
    retry_count: u32,
    last_attempt: Option<Instant>,
    entered_at: Option<Instant>,
}

impl<L: Link> ConnectivitySupervisor<L> {
    /// Create a supervisor in `Disconnected` with no attempts made.
    pub fn new(name: &'static str, link: L, mut policy: RetryPolicy) -> Self {
        policy.max_retries = policy.max_retries.max(1);
        Self {
            name,
            link,
            policy,
            state: SupervisorState::Disconnected,
            retry_count: 0,
            last_attempt: None,
            entered_at: None,
        }
    }

    /// Advance the state machine by at most one transition.
    pub fn tick(&mut self, now: Instant) -> Option<Transition> {
        match self.state {
            SupervisorState::Disconnected => self.tick_disconnected(now),
            SupervisorState::Connecting => self.tick_connecting(now),
            SupervisorState::Connected => {
                if self.link.is_up() {
                    None
                } else {
                    warn!("{}: connection lost", self.name);
                    self.state = SupervisorState::Disconnected;
                    Some(Transition::LinkLost)
                }
            }
            SupervisorState::CoolingDown => {
                let cooldown = self.policy.cooldown().unwrap_or(self.policy.retry_interval);
                if self.elapsed_since_entry(now) >= cooldown {
                    info!("{}: cooldown over, resetting retry counter", self.name);
                    self.retry_count = 0;
                    self.entered_at = None;
                    self.state = SupervisorState::Disconnected;
                    Some(Transition::CooldownElapsed)
                } else {
                    None
                }
            }
            SupervisorState::FailSafe => match self.policy.exhaustion {
                Exhaustion::FailSafe { quiet_period }
                    if self.elapsed_since_entry(now) >= quiet_period =>
                {
                    Some(Transition::RestartRequired)
                }
                _ => None,
            },
        }
    }

    /// External notification that the underlying carrier went away.
    ///
    /// Drops `Connected` or an in-flight `Connecting` back to
    /// `Disconnected` without counting a retry. Other states are untouched.
    pub fn link_lost(&mut self) -> Option<Transition> {
        match self.state {
            SupervisorState::Connected | SupervisorState::Connecting => {
                info!("{}: carrier lost, marking disconnected", self.name);
                self.state = SupervisorState::Disconnected;
                Some(Transition::LinkLost)
            }
            _ => None,
        }
    }

    fn tick_disconnected(&mut self, now: Instant) -> Option<Transition> {
        if self.retry_count >= self.policy.max_retries {
            return Some(self.exhaust(now));
        }
        let due = self
            .last_attempt
            .map_or(true, |last| now.saturating_duration_since(last) >= self.policy.retry_interval);
        if !due {
            return None;
        }
        info!(
            "{}: attempting connection ({}/{})",
            self.name,
            self.retry_count + 1,
            self.policy.max_retries
        );
        self.last_attempt = Some(now);
        self.state = SupervisorState::Connecting;
        self.link.begin_connect();
        Some(Transition::Attempting)
    }

    fn tick_connecting(&mut self, now: Instant) -> Option<Transition> {
        match self.link.poll_connect() {
            ConnectProgress::Established => {
                info!("{}: connected", self.name);
                self.retry_count = 0;
                self.state = SupervisorState::Connected;
                Some(Transition::Connected)
            }
            ConnectProgress::Failed(reason) => Some(self.fail(now, &reason)),
            ConnectProgress::Pending => {
                let started = self.last_attempt.unwrap_or(now);
                if now.saturating_duration_since(started) >= self.policy.retry_interval {
                    Some(self.fail(now, "attempt timed out"))
                } else {
                    None
                }
            }
        }
    }

    fn fail(&mut self, now: Instant, reason: &str) -> Transition {
        self.retry_count += 1;
        warn!(
            "{}: connection failed ({}), retry {}/{}",
            self.name, reason, self.retry_count, self.policy.max_retries
        );
        if self.retry_count >= self.policy.max_retries {
            self.exhaust(now)
        } else {
            self.state = SupervisorState::Disconnected;
            Transition::AttemptFailed {
                retries: self.retry_count,
            }
        }
    }

    fn exhaust(&mut self, now: Instant) -> Transition {
        self.entered_at = Some(now);
        match self.policy.exhaustion {
            Exhaustion::Cooldown { .. } => {
                info!(
                    "{}: giving up for {:?} after {} failed attempts",
                    self.name,
                    self.policy.cooldown().unwrap_or_default(),
                    self.retry_count
                );
                self.state = SupervisorState::CoolingDown;
                Transition::CoolingDown
            }
            Exhaustion::FailSafe { quiet_period } => {
                error!(
                    "{}: unreachable after {} attempts, shutting link down for {:?} before restart",
                    self.name, self.retry_count, quiet_period
                );
                self.link.shutdown();
                self.state = SupervisorState::FailSafe;
                Transition::FailSafeEntered
            }
        }
    }

    fn elapsed_since_entry(&self, now: Instant) -> Duration {
        self.entered_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at))
    }

    pub fn is_connected(&self) -> bool {
        self.state == SupervisorState::Connected
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}
