//! Inbound message dispatch
//!
//! Every message passes through the same pipeline: deduplication, self-loop
//! protection, group activation, sender resolution to one canonical JID, the
//! global rate limit, silence enforcement, middleware and finally command
//! routing. Failures are logged here and never reach the connection loop.

use crate::command::{CommandContext, CommandRegistry, Middleware, Services};
use crate::greetings::{self, Greeting};
use crate::permissions::permission_level;
use crate::protocol::{jid, InboundMessage, ParticipantsUpdate, ProtocolClient};
use crate::statistics::Counter;
use crate::store::{with_timeout, GroupRecord};
use crate::Result;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Message IDs remembered for deduplication before the set is reset
const MAX_SEEN_MESSAGES: usize = 1000;

/// How a message left the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// No text, status broadcast, or inactive group
    Ignored,
    /// Already processed
    Duplicate,
    /// Own message that is not a command
    SelfMessage,
    RateLimited,
    /// Sender is silenced; the message was deleted
    Suppressed,
    /// Consumed by the named middleware
    Intercepted(String),
    /// Command on cooldown for the sender
    CoolingDown { command: String, remaining_seconds: u64 },
    /// Sender lacks the required level
    Denied(String),
    Executed(String),
    /// Command returned an error
    Failed(String),
    /// Not a command
    Passed,
}

/// Routes inbound messages to middleware and commands
pub struct Dispatcher {
    client: Arc<dyn ProtocolClient>,
    services: Arc<Services>,
    registry: Arc<CommandRegistry>,
    middleware: Vec<Arc<dyn Middleware>>,
    seen: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ProtocolClient>,
        services: Arc<Services>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            client,
            services,
            registry,
            middleware: Vec::new(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Append a middleware; middleware runs in registration order
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Run one message through the pipeline
    pub async fn handle_message(&self, message: InboundMessage) -> Dispatch {
        let started = Instant::now();
        let message_id = message.key.id.clone();

        match self.process(message).await {
            Ok(outcome) => {
                debug!(
                    "Message {} -> {:?} in {}ms",
                    message_id,
                    outcome,
                    started.elapsed().as_millis()
                );
                outcome
            }
            Err(e) => {
                error!("Error handling message {}: {}", message_id, e);
                Dispatch::Ignored
            }
        }
    }

    /// Group membership changed: drop the cached metadata, then welcome or
    /// bid farewell when the group has that enabled. Returns the number of
    /// greetings sent.
    pub async fn handle_participants_update(&self, update: &ParticipantsUpdate) -> usize {
        self.services.metadata.invalidate(&update.group_id);
        debug!(
            "Group cache invalidated: {} ({:?} {})",
            update.group_id,
            update.action,
            update.participants.len()
        );

        if Greeting::for_action(update.action).is_none() {
            return 0;
        }
        let group = match self.active_group(&update.group_id).await {
            Some(group) => group,
            None => return 0,
        };
        let metadata = self
            .services
            .metadata
            .get_or_fetch(self.client.as_ref(), &update.group_id)
            .await;

        greetings::greet(
            self.client.as_ref(),
            &self.services,
            &group,
            metadata.as_ref(),
            update,
        )
        .await
    }

    /// Group settings changed: drop the cached metadata
    pub fn handle_groups_update(&self, groups: &[String]) {
        for group_id in groups {
            self.services.metadata.invalidate(group_id);
        }
    }

    /// Remember a message ID; false if it was already seen
    fn first_sighting(&self, message_id: &str) -> bool {
        let mut seen = self.seen.lock();
        if seen.contains(message_id) {
            return false;
        }
        if seen.len() >= MAX_SEEN_MESSAGES {
            seen.clear();
        }
        seen.insert(message_id.to_string());
        true
    }

    async fn process(&self, message: InboundMessage) -> Result<Dispatch> {
        let services = &self.services;
        let config = &services.config;
        let text = message.body().to_string();

        if text.is_empty() {
            return Ok(Dispatch::Ignored);
        }
        if !self.first_sighting(&message.key.id) {
            return Ok(Dispatch::Duplicate);
        }

        let is_command = text.starts_with(&config.bot.prefix);
        if message.key.from_me && !is_command {
            return Ok(Dispatch::SelfMessage);
        }
        if message.key.chat == jid::STATUS_BROADCAST {
            return Ok(Dispatch::Ignored);
        }

        let resolved = services.lids.resolve(message.sender());
        services.statistics.increment(Counter::MessageReceived).await;

        let mut group = None;
        let mut metadata = None;
        if message.is_group() {
            group = match self.active_group(&message.key.chat).await {
                Some(record) => Some(record),
                None => return Ok(Dispatch::Ignored),
            };
            metadata = services
                .metadata
                .get_or_fetch(self.client.as_ref(), &message.key.chat)
                .await;
        }

        // One identity for rate limits, silences and permissions, whether the
        // author wrote under their phone JID or their LID
        let sender = metadata
            .as_ref()
            .and_then(|m| m.canonical_id(&resolved))
            .map(str::to_string)
            .unwrap_or(resolved);

        if !services.rate_limiter.check_global(&sender) {
            services.statistics.increment(Counter::RateLimited).await;
            return Ok(Dispatch::RateLimited);
        }

        if group.is_some() && services.silences.is_silenced(&message.key.chat, &sender) {
            if let Err(e) = self.client.delete_message(&message.key).await {
                warn!("Failed to delete message from silenced {}: {}", sender, e);
            }
            services.statistics.increment(Counter::MessageSuppressed).await;
            return Ok(Dispatch::Suppressed);
        }

        let number = jid::user_part(&sender);
        let premium = config
            .bot
            .premium_users
            .iter()
            .any(|u| jid::user_part(u.trim()) == number);
        let level = permission_level(
            &sender,
            message.key.from_me,
            config.bot.owner_number.as_deref(),
            metadata.as_ref(),
            premium,
        );

        let ctx = CommandContext {
            client: Arc::clone(&self.client),
            services: Arc::clone(services),
            message,
            sender,
            group,
            metadata,
            level,
        };

        if ctx.is_group() {
            for middleware in &self.middleware {
                match middleware.check(&ctx).await {
                    Ok(true) => return Ok(Dispatch::Intercepted(middleware.name().to_string())),
                    Ok(false) => {}
                    Err(e) => error!("Middleware {} failed: {}", middleware.name(), e),
                }
            }
        }

        if !is_command {
            return Ok(Dispatch::Passed);
        }
        self.run_command(&ctx, &text[config.bot.prefix.len()..]).await
    }

    /// Stored record of a group, only when the bot is active there.
    /// A slow or failing store counts as inactive.
    async fn active_group(&self, group_id: &str) -> Option<GroupRecord> {
        let services = &self.services;
        let lookup = with_timeout(
            services.config.persistence.timeout(),
            "group lookup",
            services.store.get_group(group_id),
        )
        .await;

        match lookup {
            Ok(Some(record)) if record.active => Some(record),
            Ok(_) => None,
            Err(e) => {
                warn!("Group lookup for {} failed: {}", group_id, e);
                None
            }
        }
    }

    async fn run_command(&self, ctx: &CommandContext, input: &str) -> Result<Dispatch> {
        let mut parts = input.split_whitespace();
        let name = match parts.next() {
            Some(name) => name.to_lowercase(),
            None => return Ok(Dispatch::Passed),
        };
        let args: Vec<String> = parts.map(str::to_string).collect();

        let command = match self.registry.get(&name) {
            Some(command) => command,
            None => return Ok(Dispatch::Passed),
        };
        let primary = command.name().to_string();

        let cooldown = self
            .services
            .rate_limiter
            .check_command(&ctx.sender, &primary);
        if !cooldown.allowed {
            ctx.reply(&format!(
                "⏳ Espera {}s antes de usar .{} de nuevo.",
                cooldown.remaining_seconds, primary
            ))
            .await?;
            return Ok(Dispatch::CoolingDown {
                command: primary,
                remaining_seconds: cooldown.remaining_seconds,
            });
        }

        let required = command.required_level();
        debug!(
            "Command '{}' | User: {} | Level: {}/{}",
            primary, ctx.sender, ctx.level, required
        );
        if ctx.level < required {
            ctx.reply("❌ No tienes permiso para este comando.").await?;
            return Ok(Dispatch::Denied(primary));
        }

        self.services.statistics.record_command(&primary).await;
        match command.execute(ctx, &args).await {
            Ok(()) => Ok(Dispatch::Executed(primary)),
            Err(e) => {
                error!("Command {} failed: {}", primary, e);
                Ok(Dispatch::Failed(primary))
            }
        }
    }
}
