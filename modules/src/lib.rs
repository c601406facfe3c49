//! RaveHub Bot Modules
//!
//! This crate provides the chat commands and message middleware loaded by the
//! bot.

pub mod antilink;
pub mod antiwords;
pub mod greetings;
pub mod group_control;
pub mod moderation;
pub mod ping;

#[cfg(test)]
mod test_support;

pub use antilink::{AntilinkCommand, AntilinkMiddleware, LinkFilter};
pub use antiwords::{AntiwordsCommand, AntiwordsMiddleware};
pub use greetings::GreetingCommand;
pub use group_control::BotControlCommand;
pub use moderation::{SilenceCommand, TempKickCommand};
pub use ping::PingCommand;

use ravebot_core::{CommandRegistry, Middleware, Result};
use std::sync::Arc;
use tracing::info;

/// Register every built-in command
pub fn register_commands(registry: &mut CommandRegistry) -> Result<()> {
    registry.register(Arc::new(SilenceCommand))?;
    registry.register(Arc::new(TempKickCommand))?;
    registry.register(Arc::new(BotControlCommand))?;
    registry.register(Arc::new(AntilinkCommand))?;
    registry.register(Arc::new(AntiwordsCommand))?;
    registry.register(Arc::new(GreetingCommand::welcome()))?;
    registry.register(Arc::new(GreetingCommand::farewell()))?;
    registry.register(Arc::new(PingCommand))?;

    info!("Registered {} commands: {}", registry.len(), registry.names().join(", "));
    Ok(())
}

/// Middleware chain, in execution order
pub fn default_middleware() -> Result<Vec<Arc<dyn Middleware>>> {
    Ok(vec![
        Arc::new(AntilinkMiddleware::new()?),
        Arc::new(AntiwordsMiddleware::new()),
    ])
}
