//! Welcome and farewell messages
//!
//! Groups that enable them greet every participant who joins and say goodbye
//! to every participant who leaves. Templates may use `{user}`, `{group}` and
//! `{count}` (also written `{members}` or `#{count}`).

use crate::command::Services;
use crate::protocol::{jid, GroupMetadata, ParticipantAction, ParticipantsUpdate, Presence, ProtocolClient};
use crate::store::{GroupRecord, GroupSettings};
use crate::tasks::pause_between_actions;
use tracing::{info, warn};

pub const DEFAULT_WELCOME: &str = "¡Bienvenido {user} a {group}! 🎉";
pub const DEFAULT_FAREWELL: &str = "Adiós {user}, te esperamos de vuelta 👋";

/// Which greeting a membership change calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Greeting {
    Welcome,
    Farewell,
}

impl Greeting {
    /// Greeting for a participant action; promotions and demotions have none
    pub fn for_action(action: ParticipantAction) -> Option<Self> {
        match action {
            ParticipantAction::Add => Some(Greeting::Welcome),
            ParticipantAction::Remove => Some(Greeting::Farewell),
            ParticipantAction::Promote | ParticipantAction::Demote => None,
        }
    }

    /// Template to use in a group, or `None` when the greeting is disabled
    pub fn template<'a>(&self, settings: &'a GroupSettings) -> Option<&'a str> {
        let (enabled, custom, default) = match self {
            Greeting::Welcome => (settings.welcome, &settings.welcome_message, DEFAULT_WELCOME),
            Greeting::Farewell => (settings.farewell, &settings.farewell_message, DEFAULT_FAREWELL),
        };
        if !enabled {
            return None;
        }
        Some(custom.as_deref().filter(|m| !m.trim().is_empty()).unwrap_or(default))
    }
}

/// Substitute the placeholders of a greeting template
pub fn render(template: &str, user: &str, group_name: &str, member_count: Option<usize>) -> String {
    let count = member_count
        .map(|c| c.to_string())
        .unwrap_or_else(|| "?".to_string());
    template
        .replace("#{count}", &count)
        .replace("{count}", &count)
        .replace("{members}", &count)
        .replace("{user}", &jid::mention(user))
        .replace("{group}", group_name)
}

/// Send the greeting `update` calls for in `group`; returns how many were sent.
///
/// Each participant is greeted separately, after a randomized pause and a
/// typing indicator. Send failures are logged and skipped.
pub async fn greet(
    client: &dyn ProtocolClient,
    services: &Services,
    group: &GroupRecord,
    metadata: Option<&GroupMetadata>,
    update: &ParticipantsUpdate,
) -> usize {
    let greeting = match Greeting::for_action(update.action) {
        Some(greeting) => greeting,
        None => return 0,
    };
    let template = match greeting.template(&group.settings) {
        Some(template) => template,
        None => return 0,
    };

    let group_name = if !group.name.is_empty() {
        group.name.as_str()
    } else {
        metadata.map(|m| m.subject.as_str()).unwrap_or("este grupo")
    };
    let member_count = metadata
        .map(|m| m.participants.len())
        .or((group.participants > 0).then_some(group.participants));

    let tasks = &services.config.tasks;
    let mut sent = 0;
    for participant in &update.participants {
        let text = render(template, participant, group_name, member_count);

        pause_between_actions(tasks.action_delay_min_ms, tasks.action_delay_max_ms).await;
        if let Err(e) = client.send_presence(Presence::Composing, Some(&group.id)).await {
            warn!("Presence update before {:?} failed: {}", greeting, e);
        }

        match client
            .send_text(&group.id, &text, std::slice::from_ref(participant))
            .await
        {
            Ok(()) => sent += 1,
            Err(e) => warn!("{:?} for {} in {} failed: {}", greeting, participant, group.id, e),
        }
    }

    if sent > 0 {
        info!("Sent {} {:?} message(s) in {}", sent, greeting, group.id);
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_placeholders() {
        let text = render(
            "Hola {user}, bienvenido a {group}. Eres el miembro #{count} de {members}",
            "51222@s.whatsapp.net",
            "Ravers",
            Some(42),
        );
        assert_eq!(text, "Hola @51222, bienvenido a Ravers. Eres el miembro 42 de 42");

        assert_eq!(render("{count}", "u@s.whatsapp.net", "g", None), "?");
    }

    #[test]
    fn test_template_requires_enabled_setting() {
        let mut settings = GroupSettings::default();
        assert_eq!(Greeting::Welcome.template(&settings), None);

        settings.welcome = true;
        assert_eq!(Greeting::Welcome.template(&settings), Some(DEFAULT_WELCOME));
        assert_eq!(Greeting::Farewell.template(&settings), None);

        settings.welcome_message = Some("Hey {user}".to_string());
        assert_eq!(Greeting::Welcome.template(&settings), Some("Hey {user}"));

        assert_eq!(Greeting::for_action(ParticipantAction::Promote), None);
    }
}
