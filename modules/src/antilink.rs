//! Link protection
//!
//! When enabled for a group, messages from non-admins containing links outside
//! the whitelist are deleted and the sender is warned. The whitelist is the
//! global list below plus the group's own allowed entries.

use ravebot_core::protocol::jid;
use ravebot_core::store::GroupRecord;
use ravebot_core::{
    async_trait, Command, CommandContext, Error, Middleware, PermissionLevel, Result,
};
use regex::Regex;
use tracing::{info, warn};
use url::Url;

/// Always allowed
pub const GLOBAL_WHITELIST: &[&str] = &[
    "ravehub.pe",
    "ravehublatam.com",
    "instagram.com/ravehub.pe",
];

const LINK_PATTERN: &str = r"(?i)(https?://[^\s]+)|(www\.[^\s]+)|([a-z0-9-]+\.[a-z]{2,}/[^\s]*)";

/// Finds links in message text and matches them against a whitelist
pub struct LinkFilter {
    pattern: Regex,
}

impl LinkFilter {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(LINK_PATTERN)
            .map_err(|e| Error::Config(format!("invalid link pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Every link-looking fragment in `text`
    pub fn find_links<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.pattern.find_iter(text).map(|m| m.as_str()).collect()
    }

    /// Whether `link` is covered by an entry of `allowed`.
    ///
    /// A bare domain entry matches that host and its subdomains; an entry with
    /// a path matches any link containing it.
    pub fn is_allowed<S: AsRef<str>>(link: &str, allowed: &[S]) -> bool {
        let lower = link.to_lowercase();
        let host = host_of(&lower);

        allowed.iter().any(|entry| {
            let entry = entry.as_ref().trim().to_lowercase();
            if entry.is_empty() {
                return false;
            }
            if entry.contains('/') {
                return lower.contains(&entry);
            }
            match &host {
                Some(host) => host == &entry || host.ends_with(&format!(".{}", entry)),
                None => lower.contains(&entry),
            }
        })
    }

    /// Links in `text` not covered by the global or group whitelist
    pub fn blocked_links<'a>(&self, text: &'a str, group_allowed: &[String]) -> Vec<&'a str> {
        self.find_links(text)
            .into_iter()
            .filter(|link| {
                !Self::is_allowed(link, GLOBAL_WHITELIST) && !Self::is_allowed(link, group_allowed)
            })
            .collect()
    }
}

fn host_of(link: &str) -> Option<String> {
    let candidate = if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else {
        format!("http://{}", link)
    };
    Url::parse(&candidate)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.trim_start_matches("www.").to_string()))
}

/// Deletes non-whitelisted links in groups with antilink enabled
pub struct AntilinkMiddleware {
    filter: LinkFilter,
}

impl AntilinkMiddleware {
    pub fn new() -> Result<Self> {
        Ok(Self {
            filter: LinkFilter::new()?,
        })
    }
}

#[async_trait]
impl Middleware for AntilinkMiddleware {
    fn name(&self) -> &str {
        "antilink"
    }

    async fn check(&self, ctx: &CommandContext) -> Result<bool> {
        let group = match &ctx.group {
            Some(group) if group.active && group.settings.antilink => group,
            _ => return Ok(false),
        };
        if ctx.level >= PermissionLevel::Admin {
            return Ok(false);
        }

        let blocked = self
            .filter
            .blocked_links(ctx.message.body(), &group.settings.allowed_links);
        if blocked.is_empty() {
            return Ok(false);
        }
        info!("Blocked link from {} in {}: {}", ctx.sender, group.id, blocked[0]);

        if let Err(e) = ctx.client.delete_message(&ctx.message.key).await {
            warn!("Failed to delete link message: {}", e);
        }
        ctx.reply_with_mentions(
            &format!(
                "🚫 *ENLACE DETECTADO*\n\n{}, los enlaces no están permitidos en este grupo.\n\n✅ Solo se permiten enlaces oficiales de RaveHub.",
                jid::mention(&ctx.sender)
            ),
            std::slice::from_ref(&ctx.sender),
        )
        .await?;
        Ok(true)
    }
}

/// `.antilink on|off|list|allow <domain>|remove <domain>`
pub struct AntilinkCommand;

impl AntilinkCommand {
    async fn save(ctx: &CommandContext, group: GroupRecord) -> Result<()> {
        ctx.services.store.put_group(group).await
    }
}

#[async_trait]
impl Command for AntilinkCommand {
    fn name(&self) -> &str {
        "antilink"
    }

    fn aliases(&self) -> &[&str] {
        &["antilinks", "linkprotection"]
    }

    fn description(&self) -> &str {
        "Configura el sistema de protección contra enlaces"
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
        let value = args.get(1).map(|v| v.to_lowercase());

        match action.as_deref() {
            Some("on" | "enable" | "activar") => {
                group.settings.antilink = true;
                Self::save(ctx, group).await?;
                ctx.reply("✅ *ANTILINK ACTIVADO*\n\nEl bot eliminará los enlaces no autorizados.")
                    .await
            }
            Some("off" | "disable" | "desactivar") => {
                group.settings.antilink = false;
                Self::save(ctx, group).await?;
                ctx.reply("⚠️ *ANTILINK DESACTIVADO*\n\nSe permiten todos los enlaces.")
                    .await
            }
            Some("list" | "lista") => {
                let global: Vec<String> = GLOBAL_WHITELIST.iter().map(|d| format!("• {}", d)).collect();
                let local = if group.settings.allowed_links.is_empty() {
                    "_(Ninguno configurado)_".to_string()
                } else {
                    group
                        .settings
                        .allowed_links
                        .iter()
                        .map(|d| format!("• {}", d))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                ctx.reply(&format!(
                    "🛡️ *CONFIGURACIÓN ANTILINK*\n\nEstado: {}\n\n🌐 *Dominios Permitidos (Global):*\n{}\n\n📝 *Dominios Permitidos (Grupo):*\n{}",
                    if group.settings.antilink { "✅ ACTIVADO" } else { "❌ DESACTIVADO" },
                    global.join("\n"),
                    local
                ))
                .await
            }
            Some("allow" | "permitir" | "add") => {
                let value = match value {
                    Some(value) => value,
                    None => {
                        return ctx
                            .reply("❌ Especifica el dominio o enlace.\nEjemplo: .antilink add tiktok.com")
                            .await
                    }
                };
                if group.settings.allowed_links.contains(&value) {
                    return ctx.reply("⚠️ Ese dominio ya estaba en la lista.").await;
                }
                group.settings.allowed_links.push(value.clone());
                Self::save(ctx, group).await?;
                ctx.reply(&format!(
                    "✅ *DOMINIO AGREGADO*\n\nAhora se permiten enlaces que contengan: \"{}\"",
                    value
                ))
                .await
            }
            Some("block" | "bloquear" | "remove") => {
                let value = match value {
                    Some(value) => value,
                    None => {
                        return ctx
                            .reply("❌ Especifica el dominio a eliminar.\nEjemplo: .antilink remove tiktok.com")
                            .await
                    }
                };
                let before = group.settings.allowed_links.len();
                group.settings.allowed_links.retain(|d| *d != value);
                if group.settings.allowed_links.len() == before {
                    return ctx
                        .reply("❌ No se encontró ese dominio en la lista de este grupo.")
                        .await;
                }
                Self::save(ctx, group).await?;
                ctx.reply(&format!(
                    "✅ *DOMINIO ELIMINADO*\n\nSe ha eliminado \"{}\" de la lista blanca.",
                    value
                ))
                .await
            }
            _ => {
                ctx.reply("⚙️ *AYUDA ANTILINK*\n\n.antilink on - Activar\n.antilink off - Desactivar\n.antilink list - Ver configuración\n.antilink add <url> - Permitir un sitio\n.antilink remove <url> - Bloquear un sitio")
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
    fn test_link_detection_and_whitelist() {
        let filter = LinkFilter::new().unwrap();

        let links = filter.find_links("mira https://evil.com/x y www.ravehub.pe/tickets");
        assert_eq!(links, vec!["https://evil.com/x", "www.ravehub.pe/tickets"]);
        assert!(filter.find_links("hola a todos, nos vemos a las 10.30").is_empty());

        assert!(LinkFilter::is_allowed("https://tickets.ravehub.pe/a", GLOBAL_WHITELIST));
        assert!(LinkFilter::is_allowed("https://instagram.com/ravehub.pe", GLOBAL_WHITELIST));
        assert!(!LinkFilter::is_allowed("https://instagram.com/other", GLOBAL_WHITELIST));
        assert!(!LinkFilter::is_allowed("https://notravehub.pe.evil.com/", GLOBAL_WHITELIST));

        let blocked = filter.blocked_links(
            "https://tiktok.com/@dj y https://evil.com/",
            &["tiktok.com".to_string()],
        );
        assert_eq!(blocked, vec!["https://evil.com/"]);
    }

    async fn enable_antilink(fx: &Fixture) -> CommandContext {
        let ctx = fx.context(ADMIN, ".antilink on", &[]);
        AntilinkCommand.execute(&ctx, &["on".to_string()]).await.unwrap();
        let mut ctx = fx.context(MEMBER, "compra aquí https://evil.com/promo", &[]);
        ctx.group = fx.store.get_group(GROUP).await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_middleware_deletes_member_links() {
        let fx = Fixture::new().await;
        let ctx = enable_antilink(&fx).await;

        let middleware = AntilinkMiddleware::new().unwrap();
        assert!(middleware.check(&ctx).await.unwrap());
        assert_eq!(fx.client.deleted().len(), 1);
        assert!(fx.texts().last().unwrap().contains("ENLACE DETECTADO"));
    }

    #[tokio::test]
    async fn test_middleware_lets_admins_and_disabled_groups_through() {
        let fx = Fixture::new().await;
        let middleware = AntilinkMiddleware::new().unwrap();

        // Disabled by default
        let ctx = fx.context(MEMBER, "https://evil.com/promo", &[]);
        assert!(!middleware.check(&ctx).await.unwrap());

        let mut ctx = enable_antilink(&fx).await;
        ctx.level = PermissionLevel::Admin;
        assert!(!middleware.check(&ctx).await.unwrap());
        assert!(fx.client.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_allow_and_remove_domains() {
        let fx = Fixture::new().await;
        let ctx = fx.context(ADMIN, ".antilink", &[]);

        AntilinkCommand
            .execute(&ctx, &["allow".to_string(), "TikTok.com".to_string()])
            .await
            .unwrap();
        AntilinkCommand
            .execute(&ctx, &["allow".to_string(), "tiktok.com".to_string()])
            .await
            .unwrap();
        let group = fx.store.get_group(GROUP).await.unwrap().unwrap();
        assert_eq!(group.settings.allowed_links, vec!["tiktok.com".to_string()]);

        AntilinkCommand
            .execute(&ctx, &["remove".to_string(), "tiktok.com".to_string()])
            .await
            .unwrap();
        let group = fx.store.get_group(GROUP).await.unwrap().unwrap();
        assert!(group.settings.allowed_links.is_empty());

        let texts = fx.texts();
        assert!(texts[0].contains("DOMINIO AGREGADO"));
        assert!(texts[1].contains("ya estaba"));
        assert!(texts[2].contains("DOMINIO ELIMINADO"));
    }
}
