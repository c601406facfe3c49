//! RaveHub Bot Core
//!
//! This crate provides the core of a WhatsApp group-management bot: the
//! connection lifecycle (disconnect classification, reconnect with backoff,
//! terminal session wipe), message dispatch, caches and rate limits, the
//! silence and temporary-ban lifecycles, and membership greetings.

pub mod bridge;
pub mod cache;
pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod disconnect;
pub mod dispatcher;
pub mod error;
pub mod greetings;
pub mod lid;
pub mod permissions;
pub mod protocol;
pub mod rate_limit;
pub mod reconnect;
pub mod session;
pub mod silence;
pub mod statistics;
pub mod store;
pub mod tasks;
pub mod temp_ban;
pub mod testing;

pub use bridge::BridgeClient;
pub use cache::{CacheStats, GroupMetadataCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Command, CommandContext, CommandRegistry, Middleware, Services};
pub use config::Config;
pub use connection::ConnectionManager;
pub use disconnect::{Disconnect, DisconnectClass, DisconnectReason};
pub use dispatcher::{Dispatch, Dispatcher};
pub use error::{Error, Result};
pub use greetings::Greeting;
pub use lid::LidMap;
pub use permissions::{permission_level, PermissionLevel};
pub use protocol::{
    jid, ClientEvent, EventStream, GroupMetadata, InboundMessage, MessageKey, ParticipantAction,
    ParticipantsUpdate, Presence, ProtocolClient,
};
pub use rate_limit::{CooldownDecision, RateLimiter};
pub use reconnect::{ConnectionPhase, ConnectionState, NextStep, ReconnectPolicy, Termination};
pub use session::{FileSessionStore, SessionStore};
pub use silence::SilenceService;
pub use statistics::{BotStatistics, ErrorTracker, StatisticsManager};
pub use store::{GroupRecord, GroupSettings, JsonFileStore, MemoryStore, Store};
pub use temp_ban::{SweepReport, TempBanService};

/// Re-exports for convenience
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
