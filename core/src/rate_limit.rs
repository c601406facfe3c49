//! Per-user rate limiting and per-command cooldowns

use crate::config::RateLimitConfig;
use crate::Clock;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a cooldown check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownDecision {
    pub allowed: bool,
    /// Whole seconds until the command may be used again (0 when allowed)
    pub remaining_seconds: u64,
}

impl CooldownDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            remaining_seconds: 0,
        }
    }
}

/// In-process rate limiter
pub struct RateLimiter {
    /// User ID -> last accepted action
    global: DashMap<String, DateTime<Utc>>,
    /// (command, user) -> last accepted use
    commands: DashMap<(String, String), DateTime<Utc>>,
    config: Arc<RateLimitConfig>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            global: DashMap::new(),
            commands: DashMap::new(),
            config: Arc::new(config),
            clock,
        }
    }

    /// Allow at most one action per user every `global_interval_ms`.
    /// The action time is recorded only when allowed.
    pub fn check_global(&self, user_id: &str) -> bool {
        let now = self.clock.now();
        let spacing = Duration::milliseconds(self.config.global_interval_ms as i64);

        if let Some(last) = self.global.get(user_id) {
            if now - *last < spacing {
                return false;
            }
        }

        self.global.insert(user_id.to_string(), now);
        true
    }

    /// Cooldown configured for a command, falling back to the default
    pub fn cooldown_for(&self, command: &str) -> u64 {
        self.config
            .cooldowns
            .get(command)
            .copied()
            .unwrap_or(self.config.default_cooldown_seconds)
    }

    /// Check and record a command use
    pub fn check_command(&self, user_id: &str, command: &str) -> CooldownDecision {
        let now = self.clock.now();
        let cooldown = Duration::seconds(self.cooldown_for(command) as i64);
        let key = (command.to_string(), user_id.to_string());

        if let Some(last) = self.commands.get(&key) {
            let elapsed = now - *last;
            if elapsed < cooldown {
                let remaining_ms = (cooldown - elapsed).num_milliseconds();
                return CooldownDecision {
                    allowed: false,
                    remaining_seconds: (remaining_ms as u64).div_ceil(1000),
                };
            }
        }

        self.commands.insert(key, now);
        CooldownDecision::allow()
    }

    /// Drop entries older than `max_age_seconds`
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - Duration::seconds(self.config.max_age_seconds as i64);
        let before = self.global.len() + self.commands.len();

        self.global.retain(|_, last| *last >= cutoff);
        self.commands.retain(|_, last| *last >= cutoff);

        before.saturating_sub(self.global.len() + self.commands.len())
    }

    /// Number of tracked entries
    pub fn len(&self) -> usize {
        self.global.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the cleanup task to remove stale entries
    pub fn start_cleanup_task(self: &Arc<Self>, token: CancellationToken) {
        let limiter = Arc::clone(self);
        let every = std::time::Duration::from_secs(self.config.sweep_interval_seconds);

        info!(
            "Rate limiter active - {}ms global spacing, {}s default cooldown",
            self.config.global_interval_ms, self.config.default_cooldown_seconds
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!("Cleaned up {} stale rate limit entries", removed);
                        }
                    }
                }
            }
        });
    }
}
