//! Connection state and reconnection policy
//!
//! The state machine is driven by the connection manager's loop; every
//! decision it makes lives here so the retry policy can be tested without a
//! live connection.

use crate::config::ReconnectConfig;
use crate::disconnect::{Disconnect, DisconnectClass};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Lifecycle phase of the single logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Handshake in progress
    Connecting,
    /// Connection established
    Open,
    /// Dropped; a reconnect is scheduled
    ClosedTransient,
    /// Dropped for good; the process is about to exit
    ClosedTerminal,
}

/// Why the connection manager stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Session invalidated; credentials were wiped
    LoggedOut { code: Option<u16> },
    /// Transient failures exceeded the retry budget
    RetriesExhausted { attempts: u32 },
    /// Disconnect code with no known meaning
    Unclassified { code: Option<u16> },
    /// Too many background failures inside the tracking window
    CrashLoop { errors: u32 },
    /// Termination signal received
    Shutdown,
}

impl Termination {
    /// Process exit code. A wiped session exits non-zero so a supervisor does
    /// not blindly restart against it; everything else asks for a fresh restart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Termination::LoggedOut { .. } | Termination::CrashLoop { .. } => 1,
            Termination::RetriesExhausted { .. }
            | Termination::Unclassified { .. }
            | Termination::Shutdown => 0,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::LoggedOut { code } => write!(f, "session logged out (code {:?})", code),
            Termination::RetriesExhausted { attempts } => {
                write!(f, "reconnect attempts exhausted after {}", attempts)
            }
            Termination::Unclassified { code } => write!(f, "unknown disconnect code {:?}", code),
            Termination::CrashLoop { errors } => write!(f, "crash loop detected ({} errors)", errors),
            Termination::Shutdown => write!(f, "shutdown requested"),
        }
    }
}

/// What to do after a disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Wait `delay`, then connect again
    Reconnect { attempt: u32, delay: Duration },
    /// Stop the manager
    Exit(Termination),
}

/// Exponential backoff with jitter and a retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: Duration::from_millis(config.jitter_ms),
            max_retries: config.max_retries,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^retry, cap)`
    pub fn exponential_delay(&self, retry_count: u32) -> Duration {
        // Cap the power to prevent overflow
        let factor = 2u32.saturating_pow(retry_count.min(20));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Exponential term plus uniform jitter in `[0, jitter)`
    pub fn delay<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng.gen_range(0..jitter_ms))
        };
        self.exponential_delay(retry_count) + jitter
    }
}

/// Reconnection state for the live connection
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    /// Consecutive failed connections since the last successful open
    pub retry_count: u32,
    /// Status code of the last disconnect
    pub last_code: Option<u16>,
    /// Backoff chosen for the pending reconnect
    pub last_delay: Option<Duration>,
    /// Time of the last successful open
    pub connected_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            retry_count: 0,
            last_code: None,
            last_delay: None,
            connected_at: None,
        }
    }

    /// Enter `Connecting` for a new attempt
    pub fn on_connecting(&mut self) {
        self.phase = ConnectionPhase::Connecting;
    }

    /// Handshake completed: reset the retry counter
    pub fn on_open(&mut self, now: DateTime<Utc>) {
        self.phase = ConnectionPhase::Open;
        self.retry_count = 0;
        self.last_delay = None;
        self.connected_at = Some(now);
    }

    /// Decide what follows a disconnect.
    ///
    /// A transient disconnect consumes one retry. The backoff is computed from
    /// the retry count before the increment, so the first reconnect waits the
    /// base delay.
    pub fn on_close<R: Rng + ?Sized>(
        &mut self,
        disconnect: &Disconnect,
        policy: &ReconnectPolicy,
        rng: &mut R,
    ) -> NextStep {
        let code = disconnect.code();
        self.last_code = code;

        match disconnect.classify() {
            DisconnectClass::Transient => {
                let delay = policy.delay(self.retry_count, rng);
                self.retry_count += 1;

                if self.retry_count > policy.max_retries {
                    self.phase = ConnectionPhase::ClosedTerminal;
                    self.last_delay = None;
                    return NextStep::Exit(Termination::RetriesExhausted {
                        attempts: self.retry_count - 1,
                    });
                }

                self.phase = ConnectionPhase::ClosedTransient;
                self.last_delay = Some(delay);
                NextStep::Reconnect {
                    attempt: self.retry_count,
                    delay,
                }
            }
            DisconnectClass::Terminal => {
                self.phase = ConnectionPhase::ClosedTerminal;
                NextStep::Exit(Termination::LoggedOut { code })
            }
            DisconnectClass::Unclassified => {
                self.phase = ConnectionPhase::ClosedTerminal;
                NextStep::Exit(Termination::Unclassified { code })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn closed(code: u16) -> Disconnect {
        Disconnect::Closed {
            code: Some(code),
            reason: String::new(),
        }
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..200 {
            let d0 = policy.delay(0, &mut rng).as_millis();
            assert!((5_000..7_000).contains(&d0), "retry 0 gave {}", d0);

            let d1 = policy.delay(1, &mut rng).as_millis();
            assert!((10_000..12_000).contains(&d1), "retry 1 gave {}", d1);

            let d5 = policy.delay(5, &mut rng).as_millis();
            assert!((30_000..32_000).contains(&d5), "retry 5 gave {}", d5);
        }
    }

    #[test]
    fn test_exponential_term_is_capped() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.exponential_delay(0), Duration::from_secs(5));
        assert_eq!(policy.exponential_delay(2), Duration::from_secs(20));
        assert_eq!(policy.exponential_delay(3), Duration::from_secs(30));
        assert_eq!(policy.exponential_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_transient_increments_by_one() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = ConnectionState::new();

        for (expected, code) in [428u16, 408, 440, 515, 503, 500, 405].into_iter().enumerate() {
            match state.on_close(&closed(code), &policy, &mut rng) {
                NextStep::Reconnect { attempt, .. } => assert_eq!(attempt, expected as u32 + 1),
                other => panic!("code {} produced {:?}", code, other),
            }
            assert_eq!(state.retry_count, expected as u32 + 1);
            assert_eq!(state.phase, ConnectionPhase::ClosedTransient);
        }
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut state = ConnectionState::new();

        for _ in 0..15 {
            assert!(matches!(
                state.on_close(&closed(428), &policy, &mut rng),
                NextStep::Reconnect { .. }
            ));
        }

        let step = state.on_close(&closed(428), &policy, &mut rng);
        assert_eq!(step, NextStep::Exit(Termination::RetriesExhausted { attempts: 15 }));
        assert_eq!(state.phase, ConnectionPhase::ClosedTerminal);
    }

    #[test]
    fn test_open_resets_retries() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = ConnectionState::new();

        state.on_close(&closed(428), &policy, &mut rng);
        state.on_close(&closed(428), &policy, &mut rng);
        assert_eq!(state.retry_count, 2);

        state.on_open(Utc::now());
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.phase, ConnectionPhase::Open);

        match state.on_close(&closed(428), &policy, &mut rng) {
            NextStep::Reconnect { attempt, delay } => {
                assert_eq!(attempt, 1);
                assert!(delay < Duration::from_secs(7));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_terminal_and_unknown_exit() {
        let policy = ReconnectPolicy::default();
        let mut rng = StdRng::seed_from_u64(4);

        let mut state = ConnectionState::new();
        let step = state.on_close(&closed(401), &policy, &mut rng);
        assert_eq!(step, NextStep::Exit(Termination::LoggedOut { code: Some(401) }));
        assert_eq!(state.retry_count, 0);

        let mut state = ConnectionState::new();
        let step = state.on_close(&closed(999), &policy, &mut rng);
        assert_eq!(step, NextStep::Exit(Termination::Unclassified { code: Some(999) }));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Termination::LoggedOut { code: Some(401) }.exit_code(), 1);
        assert_eq!(Termination::RetriesExhausted { attempts: 15 }.exit_code(), 0);
        assert_eq!(Termination::Unclassified { code: None }.exit_code(), 0);
        assert_eq!(Termination::Shutdown.exit_code(), 0);
    }
}
