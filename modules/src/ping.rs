//! Latency and status check

use ravebot_core::protocol::Presence;
use ravebot_core::{async_trait, Command, CommandContext, PermissionLevel, Result};
use std::time::Instant;

/// `.ping`
pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Verifica latencia y estado del servidor"
    }

    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn execute(&self, ctx: &CommandContext, _args: &[String]) -> Result<()> {
        let started = Instant::now();
        ctx.client
            .send_presence(Presence::Composing, Some(ctx.chat_id()))
            .await?;
        let latency = started.elapsed().as_millis();

        let services = &ctx.services;
        let stats = services.statistics.snapshot().await;
        let uptime = stats.uptime_seconds();
        let cache = services.metadata.stats();

        ctx.reply(&format!(
            "🏓 *PONG!*\n\n⚡ Latencia: {}ms\n💚 Estado: ONLINE\n⏰ Uptime: {}h {}m {}s\n📦 Cache: {} grupos\n🤫 Silenciados: {}\n🔁 Reconexiones: {}\n━━━━━━━━━━━━━━━━━━━━━━\n🤖 Bot: {} v{}",
            latency,
            uptime / 3600,
            (uptime % 3600) / 60,
            uptime % 60,
            cache.size,
            services.silences.len(),
            stats.reconnects,
            services.config.bot.name,
            env!("CARGO_PKG_VERSION"),
        ))
        .await
    }
}
