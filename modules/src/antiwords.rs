//! Banned-word filter
//!
//! When enabled for a group, messages from non-admins containing any banned
//! word or phrase are deleted and the sender collects a warning. The third
//! warning removes them from the group.

use dashmap::DashMap;
use ravebot_core::protocol::{jid, ParticipantAction};
use ravebot_core::{async_trait, Command, CommandContext, Middleware, PermissionLevel, Result};
use tracing::{info, warn};

/// Warnings that trigger removal
pub const MAX_WARNINGS: u32 = 3;

/// First banned entry found in `text`, compared case-insensitively
pub fn find_banned<'a>(text: &str, banned: &'a [String]) -> Option<&'a str> {
    let lower = text.to_lowercase();
    banned
        .iter()
        .map(String::as_str)
        .find(|word| !word.is_empty() && lower.contains(&word.to_lowercase()))
}

/// Deletes messages with banned words and tracks warnings per (group, user)
#[derive(Default)]
pub struct AntiwordsMiddleware {
    warnings: DashMap<(String, String), u32>,
}

impl AntiwordsMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings `user` currently holds in `group`
    pub fn warnings(&self, group_id: &str, user_id: &str) -> u32 {
        self.warnings
            .get(&(group_id.to_string(), user_id.to_string()))
            .map(|count| *count)
            .unwrap_or(0)
    }

    fn add_warning(&self, group_id: &str, user_id: &str) -> u32 {
        let mut count = self
            .warnings
            .entry((group_id.to_string(), user_id.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl Middleware for AntiwordsMiddleware {
    fn name(&self) -> &str {
        "antiwords"
    }

    async fn check(&self, ctx: &CommandContext) -> Result<bool> {
        let group = match &ctx.group {
            Some(group) if group.active && group.settings.antiwords => group,
            _ => return Ok(false),
        };
        if ctx.level >= PermissionLevel::Admin {
            return Ok(false);
        }

        let word = match find_banned(ctx.message.body(), &group.settings.banned_words) {
            Some(word) => word,
            None => return Ok(false),
        };
        info!("Antiwords triggered by {} in {}: {}", ctx.sender, group.id, word);

        if let Err(e) = ctx.client.delete_message(&ctx.message.key).await {
            warn!("Failed to delete message with banned word: {}", e);
        }

        let mention = jid::mention(&ctx.sender);
        let mentions = std::slice::from_ref(&ctx.sender);
        let count = self.add_warning(&group.id, &ctx.sender);

        if count < MAX_WARNINGS {
            let last_chance = if count + 1 == MAX_WARNINGS {
                "\n🚨 ÚLTIMA ADVERTENCIA\nUna más y serás expulsado."
            } else {
                ""
            };
            ctx.reply_with_mentions(
                &format!(
                    "🚫 *PALABRA PROHIBIDA DETECTADA*\n\n{}, esa expresión no está permitida aquí.\n━━━━━━━━━━━━━━━━━━━━━━\n📝 Palabra: \"{}\"\n⚠️ Advertencia agregada: {}/{}\n━━━━━━━━━━━━━━━━━━━━━━{}",
                    mention, word, count, MAX_WARNINGS, last_chance
                ),
                mentions,
            )
            .await?;
            return Ok(true);
        }

        match ctx
            .client
            .update_participants(&group.id, mentions, ParticipantAction::Remove)
            .await
        {
            Ok(()) => {
                self.warnings.remove(&(group.id.clone(), ctx.sender.clone()));
                info!("Removed {} from {} after {} warnings", ctx.sender, group.id, count);
                ctx.reply_with_mentions(
                    &format!(
                        "🚫 *LÍMITE DE ADVERTENCIAS ALCANZADO*\n\n{} ha usado una palabra prohibida y sumó su {}ra advertencia.\n━━━━━━━━━━━━━━━━━━━━━━\n📝 Palabra: {}\n⚠️ advertencias: {}/{}\n━━━━━━━━━━━━━━━━━━━━━━\n🚪 EXPULSANDO DEL GRUPO...",
                        mention, MAX_WARNINGS, word, count, MAX_WARNINGS
                    ),
                    mentions,
                )
                .await?;
            }
            Err(e) => {
                warn!("Failed to remove {} from {}: {}", ctx.sender, group.id, e);
                ctx.reply_with_mentions(
                    &format!(
                        "🚫 *ACCIÓN REQUERIDA*\n\n{} debería ser expulsado ({}/{} advertencias) por usar palabras prohibidas, pero no tengo permisos de admin.",
                        mention, count, MAX_WARNINGS
                    ),
                    mentions,
                )
                .await?;
            }
        }
        Ok(true)
    }
}

/// `.antiwords on|off|list|add <w1, w2>|remove <word>`
pub struct AntiwordsCommand;

#[async_trait]
impl Command for AntiwordsCommand {
    fn name(&self) -> &str {
        "antiwords"
    }

    fn aliases(&self) -> &[&str] {
        &["badwords", "prohibitedwords", "palabrasprohibidas"]
    }

    fn description(&self) -> &str {
        "Configura el sistema de palabras prohibidas"
    }

    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::Admin
    }

    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<()> {
        let group_id = match ctx.group_id() {
            Some(group_id) => group_id,
            None => return ctx.reply("❌ Este comando solo funciona en grupos.").await,
        };
        let mut group = match ctx.services.store.get_group(group_id).await? {
            Some(group) => group,
            None => return ctx.reply("❌ El bot no está activo en este grupo.").await,
        };

        let action = args.first().map(|a| a.to_lowercase());
        let value = args.get(1..).unwrap_or_default().join(" ");
        let settings = &mut group.settings;

        match action.as_deref() {
            Some("on" | "enable" | "activar") => {
                settings.antiwords = true;
                ctx.services.store.put_group(group).await?;
                ctx.reply("✅ *ANTIWORDS ACTIVADO*\n\nEl bot eliminará mensajes con palabras prohibidas y advertirá al usuario.")
                    .await
            }
            Some("off" | "disable" | "desactivar") => {
                settings.antiwords = false;
                ctx.services.store.put_group(group).await?;
                ctx.reply("⚠️ *ANTIWORDS DESACTIVADO*\n\nSe permiten todas las palabras.")
                    .await
            }
            Some("list" | "lista") => {
                let list = if settings.banned_words.is_empty() {
                    "_(Ninguna configurada)_".to_string()
                } else {
                    settings
                        .banned_words
                        .iter()
                        .map(|w| format!("• {}", w))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                ctx.reply(&format!(
                    "🤬 *PALABRAS PROHIBIDAS*\n\nEstado: {}\n\n📝 *Lista:*\n{}",
                    if settings.antiwords { "✅ ACTIVADO" } else { "❌ DESACTIVADO" },
                    list
                ))
                .await
            }
            Some("add" | "agregar") => {
                if value.trim().is_empty() {
                    return ctx
                        .reply("❌ Especifica las palabras separadas por comas.\nEjemplo: .antiwords add tonto, estufa, frase larga")
                        .await;
                }
                let mut added = 0;
                for word in value.split(',').map(|w| w.trim().to_lowercase()) {
                    if !word.is_empty() && !settings.banned_words.contains(&word) {
                        settings.banned_words.push(word);
                        added += 1;
                    }
                }
                if added == 0 {
                    return ctx.reply("⚠️ Las palabras ya estaban en la lista.").await;
                }
                ctx.services.store.put_group(group).await?;
                ctx.reply(&format!(
                    "✅ *PALABRAS AGREGADAS*\n\nSe han añadido {} palabras/frases a la lista negra.",
                    added
                ))
                .await
            }
            Some("remove" | "eliminar") => {
                let word = value.trim().to_lowercase();
                if word.is_empty() {
                    return ctx
                        .reply("❌ Especifica la palabra a eliminar.\nEjemplo: .antiwords remove tonto")
                        .await;
                }
                let before = settings.banned_words.len();
                settings.banned_words.retain(|w| *w != word);
                if settings.banned_words.len() == before {
                    return ctx.reply("❌ No se encontró esa palabra en la lista.").await;
                }
                ctx.services.store.put_group(group).await?;
                ctx.reply(&format!(
                    "✅ *PALABRA ELIMINADA*\n\nSe ha eliminado \"{}\" de la lista.",
                    word
                ))
                .await
            }
            _ => {
                ctx.reply("⚙️ *AYUDA ANTIWORDS*\n\n.antiwords on - Activar\n.antiwords off - Desactivar\n.antiwords list - Ver lista\n.antiwords add <p1, p2...> - Agregar palabras\n.antiwords remove <palabra> - Eliminar palabra")
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, ADMIN, GROUP, MEMBER};
    use ravebot_core::Store;

    #[test]
    fn test_find_banned_is_case_insensitive() {
        let banned = vec!["estafa".to_string(), "frase larga".to_string()];
        assert_eq!(find_banned("Esto es una ESTAFA", &banned), Some("estafa"));
        assert_eq!(find_banned("una frase larga aquí", &banned), Some("frase larga"));
        assert_eq!(find_banned("todo bien", &banned), None);
        assert_eq!(find_banned("todo bien", &[String::new()]), None);
    }

    async fn configure(fx: &Fixture) {
        let ctx = fx.context(ADMIN, ".antiwords", &[]);
        AntiwordsCommand.execute(&ctx, &["on".to_string()]).await.unwrap();
        AntiwordsCommand
            .execute(&ctx, &["add".to_string(), "Estafa,".to_string(), "spam".to_string()])
            .await
            .unwrap();
    }

    async fn member_says(fx: &Fixture, text: &str) -> CommandContext {
        let mut ctx = fx.context(MEMBER, text, &[]);
        ctx.group = fx.store.get_group(GROUP).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_add_list_and_remove_words() {
        let fx = Fixture::new().await;
        configure(&fx).await;

        let group = fx.store.get_group(GROUP).await.unwrap().unwrap();
        assert!(group.settings.antiwords);
        assert_eq!(group.settings.banned_words, vec!["estafa".to_string(), "spam".to_string()]);

        let ctx = fx.context(ADMIN, ".antiwords", &[]);
        AntiwordsCommand
            .execute(&ctx, &["remove".to_string(), "SPAM".to_string()])
            .await
            .unwrap();
        AntiwordsCommand.execute(&ctx, &["list".to_string()]).await.unwrap();

        let texts = fx.texts();
        assert!(texts[1].contains("añadido 2"));
        assert!(texts[2].contains("PALABRA ELIMINADA"));
        assert!(texts[3].contains("• estafa"));
        assert!(!texts[3].contains("spam"));
    }

    #[tokio::test]
    async fn test_third_warning_removes_member() {
        let fx = Fixture::new().await;
        configure(&fx).await;
        let middleware = AntiwordsMiddleware::new();

        for _ in 0..2 {
            let ctx = member_says(&fx, "esto es una estafa").await;
            assert!(middleware.check(&ctx).await.unwrap());
        }
        assert_eq!(middleware.warnings(GROUP, MEMBER), 2);
        assert!(fx.client.participant_updates().is_empty());
        assert!(fx.texts().last().unwrap().contains("ÚLTIMA ADVERTENCIA"));

        let ctx = member_says(&fx, "SPAM spam").await;
        assert!(middleware.check(&ctx).await.unwrap());

        assert_eq!(
            fx.client.participant_updates(),
            vec![(GROUP.to_string(), MEMBER.to_string(), ParticipantAction::Remove)]
        );
        assert_eq!(middleware.warnings(GROUP, MEMBER), 0);
        assert_eq!(fx.client.deleted().len(), 3);
        assert!(fx.texts().last().unwrap().contains("LÍMITE DE ADVERTENCIAS"));
    }

    #[tokio::test]
    async fn test_clean_text_admins_and_disabled_groups_pass() {
        let fx = Fixture::new().await;
        let middleware = AntiwordsMiddleware::new();

        // Disabled by default
        let ctx = member_says(&fx, "estafa").await;
        assert!(!middleware.check(&ctx).await.unwrap());

        configure(&fx).await;
        let ctx = member_says(&fx, "buenas noches").await;
        assert!(!middleware.check(&ctx).await.unwrap());

        let mut ctx = member_says(&fx, "estafa").await;
        ctx.level = PermissionLevel::Admin;
        assert!(!middleware.check(&ctx).await.unwrap());
        assert!(fx.client.deleted().is_empty());
    }
}
