//! Connection lifecycle
//!
//! The manager owns the single logical connection to the protocol client. It
//! drives one event stream at a time, classifies every disconnect, and either
//! reconnects with backoff or stops with a [`Termination`] for the process to
//! act on.
//!
//! Message and membership handlers run on a [`TaskTracker`] so the process can
//! wait for in-flight work after the manager has returned.

use crate::command::Services;
use crate::disconnect::Disconnect;
use crate::dispatcher::Dispatcher;
use crate::protocol::{ClientEvent, ProtocolClient};
use crate::reconnect::{ConnectionState, NextStep, ReconnectPolicy, Termination};
use crate::session::SessionStore;
use crate::statistics::Counter;
use crate::tasks::BackgroundTasks;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// How one connection attempt ended
enum SessionEnd {
    Disconnected(Disconnect),
    Shutdown,
    CrashLoop,
}

/// Drives connect, dispatch and reconnect until a terminal condition
pub struct ConnectionManager {
    client: Arc<dyn ProtocolClient>,
    dispatcher: Arc<Dispatcher>,
    services: Arc<Services>,
    session: Arc<dyn SessionStore>,
    policy: ReconnectPolicy,
    state: ConnectionState,
    rng: StdRng,
    handlers: TaskTracker,
}

impl ConnectionManager {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        dispatcher: Arc<Dispatcher>,
        session: Arc<dyn SessionStore>,
    ) -> Self {
        let services = Arc::clone(dispatcher.services());
        let policy = ReconnectPolicy::from(&services.config.reconnect);
        Self {
            client,
            dispatcher,
            services,
            session,
            policy,
            state: ConnectionState::new(),
            rng: StdRng::from_entropy(),
            handlers: TaskTracker::new(),
        }
    }

    /// Override the backoff policy
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Tracker of the spawned event handlers. Close it and wait on it to let
    /// in-flight work finish before exiting.
    pub fn handlers(&self) -> TaskTracker {
        self.handlers.clone()
    }

    /// Run until the session is lost for good, retries run out, a crash loop
    /// is detected or `shutdown` is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) -> Termination {
        let crash = self.services.errors.tripped();

        loop {
            self.state.on_connecting();
            info!("Connecting to WhatsApp...");

            let disconnect = match self.run_connection(&shutdown, &crash).await {
                SessionEnd::Disconnected(disconnect) => disconnect,
                SessionEnd::Shutdown => return Termination::Shutdown,
                SessionEnd::CrashLoop => return self.crash_loop(),
            };

            match self.state.on_close(&disconnect, &self.policy, &mut self.rng) {
                NextStep::Reconnect { attempt, delay } => {
                    self.services.statistics.increment(Counter::Reconnect).await;
                    warn!(
                        "Connection lost ({}). Reconnecting in {}ms (attempt {}/{})",
                        disconnect,
                        delay.as_millis(),
                        attempt,
                        self.policy.max_retries
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Termination::Shutdown,
                        _ = crash.cancelled() => return self.crash_loop(),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                NextStep::Exit(termination @ Termination::LoggedOut { .. }) => {
                    error!("Session invalid ({}). Clearing credentials", disconnect);
                    if let Err(e) = self.session.clear().await {
                        error!("Failed to clear session at {}: {}", self.session.path().display(), e);
                    }
                    return termination;
                }
                NextStep::Exit(termination) => {
                    warn!("Stopping after {}: {}", disconnect, termination);
                    return termination;
                }
            }
        }
    }

    fn crash_loop(&self) -> Termination {
        Termination::CrashLoop {
            errors: self.services.errors.recent(),
        }
    }

    /// Open one connection and pump its events until it closes
    async fn run_connection(
        &mut self,
        shutdown: &CancellationToken,
        crash: &CancellationToken,
    ) -> SessionEnd {
        let connect = tokio::select! {
            _ = shutdown.cancelled() => return SessionEnd::Shutdown,
            _ = crash.cancelled() => return SessionEnd::CrashLoop,
            connect = self.client.connect() => connect,
        };
        let mut events = match connect {
            Ok(events) => events,
            Err(e) => return SessionEnd::Disconnected(Disconnect::ConnectFailed(e.to_string())),
        };

        let connection_token = shutdown.child_token();
        let mut tasks: Option<BackgroundTasks> = None;

        let end = loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break SessionEnd::Shutdown,
                _ = crash.cancelled() => break SessionEnd::CrashLoop,
                event = events.recv() => event,
            };

            match event {
                Some(ClientEvent::Open) => {
                    self.state.on_open(self.services.clock.now());
                    self.services.statistics.increment(Counter::ConnectionOpened).await;
                    info!("Bot connected successfully");

                    self.services.silences.load().await;
                    if let Some(previous) = tasks.take() {
                        previous.stop().await;
                    }
                    tasks = Some(BackgroundTasks::spawn(
                        Arc::clone(&self.client),
                        Arc::clone(&self.services),
                        &connection_token,
                    ));
                }
                Some(ClientEvent::Close { code, reason }) => {
                    break SessionEnd::Disconnected(Disconnect::Closed { code, reason });
                }
                Some(ClientEvent::Qr { code }) => {
                    info!("Login required, scan the QR code: {}", code);
                }
                Some(ClientEvent::Messages { messages }) => {
                    for message in messages {
                        let dispatcher = Arc::clone(&self.dispatcher);
                        self.handlers.spawn(async move {
                            dispatcher.handle_message(message).await;
                        });
                    }
                }
                Some(ClientEvent::GroupParticipants(update)) => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    self.handlers.spawn(async move {
                        dispatcher.handle_participants_update(&update).await;
                    });
                }
                Some(ClientEvent::GroupsUpdate { groups }) => {
                    self.dispatcher.handle_groups_update(&groups);
                }
                Some(ClientEvent::Contacts { contacts }) => {
                    self.services.lids.update(&contacts);
                }
                None => {
                    break SessionEnd::Disconnected(Disconnect::Closed {
                        code: None,
                        reason: "event stream ended".to_string(),
                    });
                }
            }
        };

        connection_token.cancel();
        if let Some(tasks) = tasks {
            tasks.stop().await;
            debug!("Background tasks stopped");
        }
        end
    }
}
