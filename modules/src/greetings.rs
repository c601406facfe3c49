//! `.welcome` and `.farewell`: per-group membership greetings

use ravebot_core::greetings::{render, Greeting};
use ravebot_core::{async_trait, Command, CommandContext, PermissionLevel, Result};
use tracing::info;

/// `.welcome on|off|message <text>` or `.farewell on|off|message <text>`
pub struct GreetingCommand {
    greeting: Greeting,
}

impl GreetingCommand {
    pub fn welcome() -> Self {
        Self { greeting: Greeting::Welcome }
    }

    pub fn farewell() -> Self {
        Self { greeting: Greeting::Farewell }
    }

    fn enabled_text(&self) -> &'static str {
        match self.greeting {
            Greeting::Welcome => "✅ Bienvenidas activadas en este grupo.\n💡 Configura el mensaje con: .welcome message [tu mensaje]",
            Greeting::Farewell => "✅ Despedidas activadas.\n💡 Configura el mensaje con: .farewell message [texto]",
        }
    }

    fn disabled_text(&self) -> &'static str {
        match self.greeting {
            Greeting::Welcome => "❌ Bienvenidas desactivadas en este grupo.",
            Greeting::Farewell => "❌ Despedidas desactivadas.",
        }
    }
}

#[async_trait]
impl Command for GreetingCommand {
    fn name(&self) -> &str {
        match self.greeting {
            Greeting::Welcome => "welcome",
            Greeting::Farewell => "farewell",
        }
    }

    fn aliases(&self) -> &[&str] {
        match self.greeting {
            Greeting::Welcome => &["bienvenida"],
            Greeting::Farewell => &["despedida", "goodbye"],
        }
    }

    fn description(&self) -> &str {
        match self.greeting {
            Greeting::Welcome => "Configura las bienvenidas del grupo",
            Greeting::Farewell => "Configura las despedidas del grupo",
        }
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

        let (enabled, message) = match self.greeting {
            Greeting::Welcome => (&mut group.settings.welcome, &mut group.settings.welcome_message),
            Greeting::Farewell => (&mut group.settings.farewell, &mut group.settings.farewell_message),
        };

        let reply = match args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("on") => {
                *enabled = true;
                self.enabled_text().to_string()
            }
            Some("off") => {
                *enabled = false;
                self.disabled_text().to_string()
            }
            Some("message") => {
                let text = args[1..].join(" ");
                if text.trim().is_empty() {
                    return ctx.reply("❌ Debes escribir el mensaje.").await;
                }
                let preview = render(&text, &ctx.sender, &group.name, None);
                *message = Some(text);
                format!(
                    "✅ Mensaje configurado.\n━━━━━━━━━━━━━━━━━━━━━━\nVista previa:\n\n{}",
                    preview
                )
            }
            _ => {
                return ctx
                    .reply(&format!(
                        "❌ Uso: .{0} on | .{0} off | .{0} message <texto>",
                        self.name()
                    ))
                    .await
            }
        };

        ctx.services.store.put_group(group).await?;
        info!("{} updated {} settings in {}", ctx.sender, self.name(), group_id);
        ctx.reply(&reply).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, ADMIN, GROUP};
    use ravebot_core::Store;

    #[tokio::test]
    async fn test_welcome_on_and_custom_message() {
        let fx = Fixture::new().await;
        let ctx = fx.context(ADMIN, ".welcome", &[]);
        let welcome = GreetingCommand::welcome();

        welcome.execute(&ctx, &["on".to_string()]).await.unwrap();
        welcome
            .execute(
                &ctx,
                &["message".to_string(), "Hola".to_string(), "{user}".to_string()],
            )
            .await
            .unwrap();

        let group = fx.store.get_group(GROUP).await.unwrap().unwrap();
        assert!(group.settings.welcome);
        assert!(!group.settings.farewell);
        assert_eq!(group.settings.welcome_message.as_deref(), Some("Hola {user}"));

        let texts = fx.texts();
        assert!(texts[0].contains("Bienvenidas activadas"));
        assert!(texts[1].ends_with("Hola @51111"));
    }

    #[tokio::test]
    async fn test_farewell_toggle_and_usage() {
        let fx = Fixture::new().await;
        let ctx = fx.context(ADMIN, ".farewell", &[]);
        let farewell = GreetingCommand::farewell();

        farewell.execute(&ctx, &["on".to_string()]).await.unwrap();
        farewell.execute(&ctx, &["off".to_string()]).await.unwrap();
        farewell.execute(&ctx, &["message".to_string()]).await.unwrap();
        farewell.execute(&ctx, &[]).await.unwrap();

        let group = fx.store.get_group(GROUP).await.unwrap().unwrap();
        assert!(!group.settings.farewell);
        assert!(group.settings.farewell_message.is_none());

        let texts = fx.texts();
        assert!(texts[1].contains("Despedidas desactivadas"));
        assert!(texts[2].contains("Debes escribir"));
        assert!(texts[3].contains(".farewell on"));
    }
}
