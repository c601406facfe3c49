//! Command system
//!
//! Commands are registered by name and alias in a [`CommandRegistry`] and
//! invoked by the dispatcher with a [`CommandContext`] describing the message
//! that triggered them. [`Middleware`] runs on every group message before
//! command parsing and may consume the message.

use crate::cache::GroupMetadataCache;
use crate::config::Config;
use crate::lid::LidMap;
use crate::permissions::PermissionLevel;
use crate::protocol::{GroupMetadata, InboundMessage, ProtocolClient};
use crate::rate_limit::RateLimiter;
use crate::silence::SilenceService;
use crate::statistics::{ErrorTracker, StatisticsManager};
use crate::store::{GroupRecord, Store};
use crate::temp_ban::TempBanService;
use crate::{Clock, Error, Result};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared services reachable from every command
pub struct Services {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub store: Arc<dyn Store>,
    pub metadata: Arc<GroupMetadataCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub silences: Arc<SilenceService>,
    pub temp_bans: Arc<TempBanService>,
    pub lids: Arc<LidMap>,
    pub statistics: Arc<StatisticsManager>,
    pub errors: Arc<ErrorTracker>,
}

impl Services {
    /// Build every service from the configuration
    pub fn new(config: Config, store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let metadata = GroupMetadataCache::new(
            Duration::seconds(config.cache.group_metadata_ttl_seconds as i64),
            clock.clone(),
        );
        let rate_limiter = RateLimiter::new(config.rate_limit.clone(), clock.clone());
        let silences = SilenceService::new(store.clone(), clock.clone());
        let temp_bans = TempBanService::new(store.clone(), clock.clone())
            .with_pacing(config.tasks.action_delay_min_ms, config.tasks.action_delay_max_ms);
        let errors = ErrorTracker::new(&config.errors, clock.clone());

        Self {
            config: Arc::new(config),
            clock,
            store,
            metadata: Arc::new(metadata),
            rate_limiter: Arc::new(rate_limiter),
            silences: Arc::new(silences),
            temp_bans: Arc::new(temp_bans),
            lids: Arc::new(LidMap::new()),
            statistics: Arc::new(StatisticsManager::new()),
            errors: Arc::new(errors),
        }
    }
}

/// Everything a command knows about the message that invoked it
pub struct CommandContext {
    pub client: Arc<dyn ProtocolClient>,
    pub services: Arc<Services>,
    pub message: InboundMessage,
    /// Sender with any LID resolved to a phone JID
    pub sender: String,
    /// Stored record of the group, for group messages
    pub group: Option<GroupRecord>,
    /// Live group metadata, for group messages
    pub metadata: Option<GroupMetadata>,
    pub level: PermissionLevel,
}

impl CommandContext {
    pub fn chat_id(&self) -> &str {
        &self.message.key.chat
    }

    pub fn group_id(&self) -> Option<&str> {
        self.message.is_group().then(|| self.chat_id())
    }

    pub fn is_group(&self) -> bool {
        self.message.is_group()
    }

    /// Whether `user` is an admin of the current group
    pub fn is_admin(&self, user: &str) -> bool {
        self.metadata
            .as_ref()
            .map(|m| m.is_admin(user))
            .unwrap_or(false)
    }

    /// Send a text to the chat the command came from
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.client.send_text(self.chat_id(), text, &[]).await
    }

    pub async fn reply_with_mentions(&self, text: &str, mentions: &[String]) -> Result<()> {
        self.client.send_text(self.chat_id(), text, mentions).await
    }
}

/// Chat command
#[async_trait]
pub trait Command: Send + Sync {
    /// Primary name, matched case-insensitively
    fn name(&self) -> &str;

    /// Alternative names
    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn description(&self) -> &str;

    /// Minimum level needed to run the command
    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::User
    }

    /// Run the command with the whitespace-separated arguments after its name
    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<()>;
}

/// Message filter run before command parsing
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    /// Inspect a group message. Returning `true` stops further processing.
    async fn check(&self, ctx: &CommandContext) -> Result<bool>;
}

/// Registered commands by name and alias
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
    aliases: HashMap<String, String>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command; fails if its name or an alias is already taken
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let name = command.name().to_lowercase();
        if self.contains(&name) {
            return Err(Error::Command(format!("command '{}' already registered", name)));
        }
        for alias in command.aliases() {
            let alias = alias.to_lowercase();
            if alias == name || self.contains(&alias) {
                return Err(Error::Command(format!("alias '{}' already registered", alias)));
            }
        }

        for alias in command.aliases() {
            self.aliases.insert(alias.to_lowercase(), name.clone());
        }
        self.commands.insert(name, command);
        Ok(())
    }

    /// Look up a command by name or alias
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        let name = name.to_lowercase();
        let primary = self.aliases.get(&name).unwrap_or(&name);
        self.commands.get(primary).cloned()
    }

    fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name) || self.aliases.contains_key(name)
    }

    /// Primary names of every command, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
