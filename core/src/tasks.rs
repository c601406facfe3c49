//! Periodic work bound to one live connection
//!
//! Every task runs under a child of the connection's cancellation token, so a
//! disconnect stops all of them before the next connection is opened. A tick
//! that fails is reported to the error tracker and the loop carries on.

use crate::command::Services;
use crate::protocol::{jid, Presence, ProtocolClient};
use crate::statistics::Counter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Handles to the tasks of one connection
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Start the presence keep-alive, the temp-ban sweep and, when enabled,
    /// the startup notification
    pub fn spawn(
        client: Arc<dyn ProtocolClient>,
        services: Arc<Services>,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let tasks = &services.config.tasks;

        let mut handles = vec![
            tokio::spawn(presence_loop(
                client.clone(),
                services.clone(),
                tasks.presence_interval(),
                token.clone(),
            )),
            tokio::spawn(temp_ban_loop(
                client.clone(),
                services.clone(),
                tasks.temp_ban_sweep_interval(),
                token.clone(),
            )),
        ];

        if services.config.bot.notify_on_connect {
            handles.push(tokio::spawn(startup_notification(
                client,
                services.clone(),
                tasks.startup_notification_delay(),
                token.clone(),
            )));
        }

        debug!("Started {} background tasks", handles.len());
        Self { token, handles }
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Cancel every task and wait for them to finish
    pub async fn stop(mut self) {
        self.token.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Background task panicked: {}", e);
                }
            }
        }
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Sleep a random duration in `[min_ms, max_ms]` milliseconds; no-op when
/// `max_ms` is zero
pub(crate) async fn pause_between_actions(min_ms: u64, max_ms: u64) {
    if max_ms == 0 {
        return;
    }
    let ms = rand::thread_rng().gen_range(min_ms.min(max_ms)..=max_ms);
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn presence_loop(
    client: Arc<dyn ProtocolClient>,
    services: Arc<Services>,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = client.send_presence(Presence::Available, None).await {
                    services.statistics.increment(Counter::TaskFailure).await;
                    services.errors.record("presence keep-alive", &e);
                }
            }
        }
    }
    debug!("Presence keep-alive stopped");
}

async fn temp_ban_loop(
    client: Arc<dyn ProtocolClient>,
    services: Arc<Services>,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = ticker(period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {
                // A sweep in progress is abandoned on cancel; records not yet
                // claimed are picked up by the next connection
                let result = tokio::select! {
                    _ = token.cancelled() => break,
                    result = services.temp_bans.sweep(client.as_ref()) => result,
                };
                match result {
                    Ok(report) if report.processed > 0 => info!(
                        "Temp-ban sweep: {} processed, {} restored, {} invited, {} failed",
                        report.processed, report.restored, report.invited, report.failed
                    ),
                    Ok(_) => {}
                    Err(e) => {
                        services.statistics.increment(Counter::TaskFailure).await;
                        services.errors.record("temp-ban sweep", &e);
                    }
                }
            }
        }
    }
    debug!("Temp-ban sweep stopped");
}

async fn startup_notification(
    client: Arc<dyn ProtocolClient>,
    services: Arc<Services>,
    delay: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(delay) => {}
    }

    let own_id = match client.own_id().await {
        Some(id) => jid::to_user(&id),
        None => return,
    };

    let stats = services.statistics.snapshot().await;
    let uptime = stats.uptime_seconds();
    let text = format!(
        "🤖 *{} CONECTADO EXITOSAMENTE*\n\n\
         🔄 Estado: ONLINE\n\
         ⏰ Uptime: {}h {}m {}s\n\
         📶 Conectado: {}\n\
         🔁 Reconexiones: {}\n\n\
         ✅ El bot está listo para usarse.",
        services.config.bot.name.to_uppercase(),
        uptime / 3600,
        (uptime % 3600) / 60,
        uptime % 60,
        services.clock.now().format("%Y-%m-%d %H:%M:%S UTC"),
        stats.reconnects,
    );

    if let Err(e) = client.send_text(&own_id, &text, &[]).await {
        error!("Failed to send startup notification: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use crate::testing::MockClient;

    fn services(notify: bool) -> Arc<Services> {
        let mut config = Config::default();
        config.bot.notify_on_connect = notify;
        config.tasks.action_delay_min_ms = 0;
        config.tasks.action_delay_max_ms = 0;
        Arc::new(Services::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_every_interval_until_stopped() {
        let client = Arc::new(MockClient::new());
        let parent = CancellationToken::new();
        let tasks = BackgroundTasks::spawn(client.clone(), services(false), &parent);

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(client.presences().len(), 3);

        tasks.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(client.presences().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_tasks() {
        let client = Arc::new(MockClient::new());
        let parent = CancellationToken::new();
        let tasks = BackgroundTasks::spawn(client.clone(), services(false), &parent);

        parent.cancel();
        assert!(!tasks.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(client.presences().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_mid_sweep_processes_ban_once() {
        let mut config = Config::default();
        config.bot.notify_on_connect = false;
        config.tasks.action_delay_min_ms = 0;
        config.tasks.action_delay_max_ms = 0;
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let services = Arc::new(Services::new(config, store.clone(), clock.clone()));

        services
            .temp_bans
            .ban("1@g.us", "u1@s.whatsapp.net", "admin", 1)
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(2));

        let client = Arc::new(MockClient::new());
        client.stall_texts(true);
        let parent = CancellationToken::new();
        let tasks = BackgroundTasks::spawn(client.clone(), services.clone(), &parent);

        // First sweep at 60s stalls on the welcome-back text
        tokio::time::sleep(Duration::from_secs(61)).await;
        tasks.stop().await;
        assert_eq!(client.participant_updates().len(), 1);
        assert_eq!(store.temp_ban_count(), 0);

        client.stall_texts(false);
        let report = services.temp_bans.sweep(client.as_ref()).await.unwrap();
        assert_eq!(report.processed, 0);
        assert_eq!(client.participant_updates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_notification_to_own_chat() {
        let client = Arc::new(MockClient::new().with_own_id("51999:4@s.whatsapp.net"));
        let parent = CancellationToken::new();
        let _tasks = BackgroundTasks::spawn(client.clone(), services(true), &parent);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let sent = client.sent_texts();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "51999@s.whatsapp.net");
        assert!(sent[0].1.contains("CONECTADO"));
    }
}
