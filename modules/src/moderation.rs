//! Moderation commands: silence and temporary kick
//!
//! Both commands act on one target, taken from the first mention or the author
//! of the quoted message. Group admins cannot be targeted.

use ravebot_core::protocol::{jid, ParticipantAction};
use ravebot_core::{async_trait, Command, CommandContext, PermissionLevel, Result};
use tracing::{info, warn};

/// Target of a moderation command, normalized to the participant's phone JID
/// when the group metadata knows it
pub(crate) fn resolve_target(ctx: &CommandContext) -> Option<String> {
    let raw = ctx.message.target()?;
    let resolved = ctx.services.lids.resolve(raw);

    let canonical = ctx
        .metadata
        .as_ref()
        .and_then(|m| m.canonical_id(&resolved))
        .map(str::to_string);

    Some(canonical.unwrap_or(resolved))
}

/// Longest accepted silence or temp-ban: one year
pub const MAX_MINUTES: u64 = 525_600;

fn parse_minutes(arg: Option<&String>) -> Option<u64> {
    arg.and_then(|a| a.parse::<u64>().ok())
        .filter(|m| (1..=MAX_MINUTES).contains(m))
}

/// `.silence <minutes> @user` / `.silence stop @user`
pub struct SilenceCommand;

#[async_trait]
impl Command for SilenceCommand {
    fn name(&self) -> &str {
        "silence"
    }

    fn aliases(&self) -> &[&str] {
        &["mute", "shh", "callar"]
    }

    fn description(&self) -> &str {
        "Silencia a un usuario por X minutos (borra sus mensajes)"
    }

    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<()> {
        let group_id = match ctx.group_id() {
            Some(group_id) => group_id,
            None => return ctx.reply("❌ Solo en grupos.").await,
        };

        let target = match resolve_target(ctx) {
            Some(target) => target,
            None => return ctx.reply("❌ Debes etiquetar a alguien.").await,
        };

        if ctx.is_admin(&target) {
            return ctx.reply("❌ No puedes silenciar a un admin.").await;
        }

        let silences = &ctx.services.silences;
        let action = args.first().map(|a| a.to_lowercase());

        if matches!(action.as_deref(), Some("stop" | "off" | "unmute")) {
            if !silences.is_silenced(group_id, &target) {
                return ctx.reply("⚠️ El usuario no está silenciado.").await;
            }
            silences.unsilence(group_id, &target).await?;
            info!("{} unsilenced {} in {}", ctx.sender, target, group_id);
            return ctx
                .reply_with_mentions(
                    &format!("🔊 {} ya puede hablar de nuevo.", jid::mention(&target)),
                    std::slice::from_ref(&target),
                )
                .await;
        }

        let minutes = match parse_minutes(args.first()) {
            Some(minutes) => minutes,
            None => {
                return ctx
                    .reply("❌ Uso: .silence [minutos] @usuario\nEjemplo: .silence 10 @usuario")
                    .await
            }
        };

        silences.silence(group_id, &target, &ctx.sender, minutes).await?;
        info!("{} silenced {} in {} for {}m", ctx.sender, target, group_id, minutes);

        ctx.reply_with_mentions(
            &format!(
                "🤫 *SILENCIO APLICADO*\n\n👤 Usuario: {}\n⏳ Tiempo: {} minutos\n\n_Sus mensajes serán eliminados automáticamente._",
                jid::mention(&target),
                minutes
            ),
            std::slice::from_ref(&target),
        )
        .await
    }
}

/// `.tkick <minutes> @user`
pub struct TempKickCommand;

#[async_trait]
impl Command for TempKickCommand {
    fn name(&self) -> &str {
        "tkick"
    }

    fn aliases(&self) -> &[&str] {
        &["tempban", "kicktime"]
    }

    fn description(&self) -> &str {
        "Expulsa temporalmente a un usuario"
    }

    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<()> {
        let group_id = match ctx.group_id() {
            Some(group_id) => group_id,
            None => return ctx.reply("❌ Solo funciona en grupos.").await,
        };

        let minutes = match parse_minutes(args.first()) {
            Some(minutes) => minutes,
            None => {
                return ctx
                    .reply("❌ Uso: .tkick [minutos] @usuario\nEjemplo: .tkick 60 @usuario")
                    .await
            }
        };

        let target = match resolve_target(ctx) {
            Some(target) => target,
            None => return ctx.reply("❌ Debes etiquetar a alguien.").await,
        };

        if ctx.is_admin(&target) {
            return ctx.reply("❌ No puedes expulsar a un administrador.").await;
        }

        let ban = ctx
            .services
            .temp_bans
            .ban(group_id, &target, &ctx.sender, minutes)
            .await?;

        if let Err(e) = ctx
            .client
            .update_participants(group_id, std::slice::from_ref(&target), ParticipantAction::Remove)
            .await
        {
            warn!("Failed to remove {} from {}: {}", target, group_id, e);
            // Never removed, so nothing for the sweep to restore
            if let Err(e) = ctx.services.store.delete_temp_ban(&ban.id).await {
                warn!("Failed to discard ban record {}: {}", ban.id, e);
            }
            ctx.reply("❌ Error al procesar la expulsión.").await?;
            return Err(e);
        }
        info!(
            "{} temp-banned {} from {} until {}",
            ctx.sender, target, group_id, ban.unban_at
        );

        ctx.reply_with_mentions(
            &format!(
                "🚫 *EXPULSIÓN TEMPORAL*\n\n👤 Usuario: {}\n⏳ Tiempo: {} minutos\n\n_Reflexiona sobre tus acciones._",
                jid::mention(&target),
                minutes
            ),
            std::slice::from_ref(&target),
        )
        .await
    }
}
