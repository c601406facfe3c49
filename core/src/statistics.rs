//! Runtime statistics and background error tracking

use crate::config::ErrorTrackingConfig;
use crate::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Counters for the running bot
#[derive(Debug, Clone)]
pub struct BotStatistics {
    /// Process start time
    pub start_time: Instant,
    /// Messages handed to the dispatcher
    pub messages_received: u64,
    /// Messages dropped because the sender is silenced
    pub messages_suppressed: u64,
    /// Messages rejected by the global rate limit
    pub rate_limited: u64,
    /// Successful connection opens
    pub connections_opened: u64,
    /// Reconnect attempts scheduled
    pub reconnects: u64,
    /// Background task failures
    pub task_failures: u64,
    /// Command usage statistics
    pub command_usage: HashMap<String, u64>,
}

impl Default for BotStatistics {
    fn default() -> Self {
        Self {
            start_time: Instant::now(),
            messages_received: 0,
            messages_suppressed: 0,
            rate_limited: 0,
            connections_opened: 0,
            reconnects: 0,
            task_failures: 0,
            command_usage: HashMap::new(),
        }
    }
}

impl BotStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_command(&mut self, command: &str) {
        *self.command_usage.entry(command.to_string()).or_insert(0) += 1;
    }

    /// Most used commands, highest first
    pub fn top_commands(&self, limit: usize) -> Vec<(String, u64)> {
        let mut commands: Vec<_> = self.command_usage.iter().collect();
        commands.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        commands.truncate(limit);
        commands.into_iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Kind of event counted by the statistics manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MessageReceived,
    MessageSuppressed,
    RateLimited,
    ConnectionOpened,
    Reconnect,
    TaskFailure,
}

/// Shared statistics handle
#[derive(Default)]
pub struct StatisticsManager {
    statistics: Arc<RwLock<BotStatistics>>,
}

impl StatisticsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, counter: Counter) {
        let mut stats = self.statistics.write().await;
        match counter {
            Counter::MessageReceived => stats.messages_received += 1,
            Counter::MessageSuppressed => stats.messages_suppressed += 1,
            Counter::RateLimited => stats.rate_limited += 1,
            Counter::ConnectionOpened => stats.connections_opened += 1,
            Counter::Reconnect => stats.reconnects += 1,
            Counter::TaskFailure => stats.task_failures += 1,
        }
    }

    pub async fn record_command(&self, command: &str) {
        self.statistics.write().await.record_command(command);
    }

    /// Copy of the current counters
    pub async fn snapshot(&self) -> BotStatistics {
        self.statistics.read().await.clone()
    }
}

/// Counts background failures in a sliding window and trips when a crash loop
/// is detected
pub struct ErrorTracker {
    failures: Mutex<Vec<DateTime<Utc>>>,
    window: Duration,
    threshold: u32,
    clock: Arc<dyn Clock>,
    tripped: CancellationToken,
}

impl ErrorTracker {
    pub fn new(config: &ErrorTrackingConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            failures: Mutex::new(Vec::new()),
            window: Duration::seconds(config.window_seconds as i64),
            threshold: config.threshold,
            clock,
            tripped: CancellationToken::new(),
        }
    }

    /// Report a failure from `source`. Returns true once the failure count
    /// inside the window exceeds the threshold.
    pub fn record(&self, source: &str, error: &dyn std::fmt::Display) -> bool {
        warn!("{} failed: {}", source, error);

        let now = self.clock.now();
        let cutoff = now - self.window;
        let count = {
            let mut failures = self.failures.lock();
            failures.retain(|at| *at > cutoff);
            failures.push(now);
            failures.len() as u32
        };

        if count > self.threshold {
            if !self.tripped.is_cancelled() {
                error!(
                    "Crash loop detected: {} errors in {}s",
                    count,
                    self.window.num_seconds()
                );
                self.tripped.cancel();
            }
            return true;
        }
        false
    }

    /// Failures currently inside the window
    pub fn recent(&self) -> u32 {
        let cutoff = self.clock.now() - self.window;
        self.failures.lock().iter().filter(|at| **at > cutoff).count() as u32
    }

    /// Token cancelled when a crash loop is detected
    pub fn tripped(&self) -> CancellationToken {
        self.tripped.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_top_commands() {
        let mut stats = BotStatistics::new();
        stats.record_command("silence");
        stats.record_command("silence");
        stats.record_command("ping");
        stats.record_command("tkick");

        let top = stats.top_commands(2);
        assert_eq!(top, vec![("silence".to_string(), 2), ("ping".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_statistics_manager() {
        let manager = StatisticsManager::new();
        manager.increment(Counter::MessageReceived).await;
        manager.increment(Counter::MessageReceived).await;
        manager.increment(Counter::Reconnect).await;
        manager.record_command("ping").await;

        let stats = manager.snapshot().await;
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.command_usage.get("ping"), Some(&1));
    }

    #[test]
    fn test_error_tracker_trips_inside_window() {
        let clock = Arc::new(ManualClock::default());
        let config = ErrorTrackingConfig { window_seconds: 60, threshold: 3 };
        let tracker = ErrorTracker::new(&config, clock.clone());

        for _ in 0..3 {
            assert!(!tracker.record("presence", &"timeout"));
        }
        assert!(!tracker.tripped().is_cancelled());

        assert!(tracker.record("presence", &"timeout"));
        assert!(tracker.tripped().is_cancelled());
    }

    #[test]
    fn test_error_tracker_window_slides() {
        let clock = Arc::new(ManualClock::default());
        let config = ErrorTrackingConfig { window_seconds: 60, threshold: 2 };
        let tracker = ErrorTracker::new(&config, clock.clone());

        tracker.record("sweep", &"db down");
        tracker.record("sweep", &"db down");
        clock.advance(Duration::seconds(61));

        assert!(!tracker.record("sweep", &"db down"));
        assert_eq!(tracker.recent(), 1);
    }
}
