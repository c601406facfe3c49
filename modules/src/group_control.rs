//! Bot activation per group

use ravebot_core::store::GroupRecord;
use ravebot_core::{async_trait, Command, CommandContext, PermissionLevel, Result};
use tracing::{info, warn};

/// `.bot on|off <group id>`
pub struct BotControlCommand;

#[async_trait]
impl Command for BotControlCommand {
    fn name(&self) -> &str {
        "bot"
    }

    fn description(&self) -> &str {
        "Controla la activación del bot en grupos (on/off)"
    }

    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::Owner
    }

    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<()> {
        let action = args.first().map(|a| a.to_lowercase());
        if !matches!(action.as_deref(), Some("on" | "off")) {
            return ctx.reply("❌ Uso: .bot on/off <id_grupo>").await;
        }

        let group_id = match args.get(1) {
            Some(group_id) => group_id.as_str(),
            None => return ctx.reply("❌ Debes especificar el ID del grupo.").await,
        };

        let store = &ctx.services.store;
        let existing = store.get_group(group_id).await?;

        if action.as_deref() == Some("on") {
            let metadata = match ctx.client.group_metadata(group_id).await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot activate {}: {}", group_id, e);
                    return ctx.reply("❌ No se encontró el grupo o no soy miembro.").await;
                }
            };

            let now = ctx.services.clock.now();
            store
                .put_group(GroupRecord {
                    id: group_id.to_string(),
                    name: metadata.subject.clone(),
                    active: true,
                    participants: metadata.participants.len(),
                    settings: existing.map(|g| g.settings).unwrap_or_default(),
                    activated_at: Some(now),
                })
                .await?;
            ctx.services.metadata.set(group_id, metadata.clone());
            info!("Bot activated in {} ({})", metadata.subject, group_id);

            ctx.reply(&format!(
                "✅ *BOT ACTIVADO EXITOSAMENTE*\n\n📍 Grupo: {}\n🆔 ID: {}\n👥 Participantes: {}\n⏰ Activado: {}\n━━━━━━━━━━━━━━━━━━━━━━\nEl bot ya puede responder comandos en este grupo.",
                metadata.subject,
                group_id,
                metadata.participants.len(),
                now.format("%Y-%m-%d %H:%M:%S UTC"),
            ))
            .await
        } else {
            let mut group = match existing {
                Some(group) => group,
                None => return ctx.reply("⚠️ El bot no estaba activo en ese grupo.").await,
            };
            group.active = false;
            let name = group.name.clone();
            store.put_group(group).await?;
            info!("Bot deactivated in {} ({})", name, group_id);

            ctx.reply(&format!(
                "🔴 *BOT DESACTIVADO*\n\n📍 Grupo: {}\n🆔 ID: {}\n⏰ Desactivado: {}\n━━━━━━━━━━━━━━━━━━━━━━\nEl bot ignorará comandos en este grupo.",
                name,
                group_id,
                ctx.services.clock.now().format("%Y-%m-%d %H:%M:%S UTC"),
            ))
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, GROUP};
    use ravebot_core::Store;

    const OWNER_DM: &str = "51999@s.whatsapp.net";

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let fx = Fixture::new().await;
        let other = "120999@g.us";
        fx.client.add_group(ravebot_core::GroupMetadata {
            id: other.to_string(),
            subject: "Afters".to_string(),
            participants: Vec::new(),
        });

        let ctx = fx.context_in(OWNER_DM, OWNER_DM, ".bot on", &[]);
        BotControlCommand
            .execute(&ctx, &["on".to_string(), other.to_string()])
            .await
            .unwrap();
        let record = fx.store.get_group(other).await.unwrap().unwrap();
        assert!(record.active);
        assert_eq!(record.name, "Afters");
        assert!(record.activated_at.is_some());

        BotControlCommand
            .execute(&ctx, &["off".to_string(), other.to_string()])
            .await
            .unwrap();
        assert!(!fx.store.get_group(other).await.unwrap().unwrap().active);

        let texts = fx.texts();
        assert!(texts[0].contains("BOT ACTIVADO"));
        assert!(texts[1].contains("BOT DESACTIVADO"));
    }

    #[tokio::test]
    async fn test_unknown_group_and_usage() {
        let fx = Fixture::new().await;
        let ctx = fx.context_in(OWNER_DM, OWNER_DM, ".bot", &[]);

        BotControlCommand.execute(&ctx, &[]).await.unwrap();
        BotControlCommand.execute(&ctx, &["on".to_string()]).await.unwrap();
        BotControlCommand
            .execute(&ctx, &["on".to_string(), "404@g.us".to_string()])
            .await
            .unwrap();

        let texts = fx.texts();
        assert!(texts[0].contains("Uso"));
        assert!(texts[1].contains("especificar"));
        assert!(texts[2].contains("No se encontró"));
        assert!(fx.store.get_group("404@g.us").await.unwrap().is_none());
        assert!(fx.store.get_group(GROUP).await.unwrap().unwrap().active);
    }
}
