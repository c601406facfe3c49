//! Protocol client abstraction
//!
//! The WhatsApp protocol itself is owned by an external client. The bot only
//! sees it as an event source (connection updates, messages, group changes)
//! and a command sink (send, delete, presence, participant updates).

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Stream of events produced by one live connection
pub type EventStream = mpsc::Receiver<ClientEvent>;

/// Event emitted by the protocol client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake completed
    Open,
    /// Connection closed with an optional numeric reason code
    Close {
        code: Option<u16>,
        #[serde(default)]
        reason: String,
    },
    /// Login code that must be scanned to authenticate
    Qr { code: String },
    /// New or updated messages
    Messages { messages: Vec<InboundMessage> },
    /// Membership change in a group
    GroupParticipants(ParticipantsUpdate),
    /// Group metadata (subject, settings) changed
    GroupsUpdate { groups: Vec<String> },
    /// Contact identity links, used for LID resolution
    Contacts { contacts: Vec<ContactLink> },
}

/// Key that identifies a message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageKey {
    /// Message ID
    pub id: String,
    /// Chat the message was posted in (group or direct)
    pub chat: String,
    /// Author inside a group chat
    #[serde(default)]
    pub participant: Option<String>,
    /// Whether the bot account sent it
    #[serde(default)]
    pub from_me: bool,
}

/// Inbound chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    /// Sender display name
    #[serde(default)]
    pub push_name: Option<String>,
    /// Extracted text body (caption, conversation or extended text)
    #[serde(default)]
    pub text: Option<String>,
    /// Mentioned user IDs
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Author of the quoted message, when replying
    #[serde(default)]
    pub quoted_participant: Option<String>,
}

impl InboundMessage {
    /// Author of the message: the group participant, or the chat itself for direct messages
    pub fn sender(&self) -> &str {
        self.key.participant.as_deref().unwrap_or(&self.key.chat)
    }

    /// Whether the message was posted in a group
    pub fn is_group(&self) -> bool {
        jid::is_group(&self.key.chat)
    }

    /// Trimmed text body, empty when the message carries no text
    pub fn body(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }

    /// First mentioned user, falling back to the author of a quoted message
    pub fn target(&self) -> Option<&str> {
        self.mentions
            .first()
            .map(String::as_str)
            .or(self.quoted_participant.as_deref())
    }
}

/// Admin role of a group participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminRole {
    Admin,
    Superadmin,
}

/// Group participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub lid: Option<String>,
    #[serde(default)]
    pub admin: Option<AdminRole>,
}

impl Participant {
    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

/// Group metadata as reported by the protocol client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

impl GroupMetadata {
    /// Find a participant by phone ID or LID
    pub fn participant(&self, user: &str) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.id == user || p.lid.as_deref() == Some(user))
    }

    /// Whether `user` holds an admin role in the group
    pub fn is_admin(&self, user: &str) -> bool {
        self.participant(user).map(Participant::is_admin).unwrap_or(false)
    }

    /// Phone JID of the participant known as `user`, whether `user` is their
    /// phone JID or their LID
    pub fn canonical_id(&self, user: &str) -> Option<&str> {
        self.participant(user)
            .map(|p| p.id.as_str())
            .filter(|id| jid::is_user(id))
    }
}

/// Participant list operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

/// Membership change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantsUpdate {
    pub group_id: String,
    pub participants: Vec<String>,
    pub action: ParticipantAction,
}

/// Link between a phone ID and its LID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactLink {
    pub id: String,
    pub lid: Option<String>,
}

/// Presence state pushed to a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Available,
    Unavailable,
    Composing,
    Paused,
}

/// External protocol client
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open a new connection and return its event stream
    async fn connect(&self) -> Result<EventStream>;

    /// ID of the authenticated account, once known
    async fn own_id(&self) -> Option<String>;

    /// Send a text message, optionally mentioning users
    async fn send_text(&self, jid: &str, text: &str, mentions: &[String]) -> Result<()>;

    /// Delete a message for everyone
    async fn delete_message(&self, key: &MessageKey) -> Result<()>;

    /// Push a presence update, globally or to one chat
    async fn send_presence(&self, presence: Presence, jid: Option<&str>) -> Result<()>;

    /// Fetch group metadata
    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata>;

    /// Add, remove, promote or demote participants
    async fn update_participants(
        &self,
        group_id: &str,
        users: &[String],
        action: ParticipantAction,
    ) -> Result<()>;

    /// Fetch the current invite code of a group
    async fn group_invite_code(&self, group_id: &str) -> Result<String>;
}

/// JID helpers
pub mod jid {
    pub const GROUP_SUFFIX: &str = "@g.us";
    pub const USER_SUFFIX: &str = "@s.whatsapp.net";
    pub const LID_SUFFIX: &str = "@lid";
    pub const STATUS_BROADCAST: &str = "status@broadcast";

    pub fn is_group(jid: &str) -> bool {
        jid.ends_with(GROUP_SUFFIX)
    }

    pub fn is_lid(jid: &str) -> bool {
        jid.ends_with(LID_SUFFIX)
    }

    pub fn is_user(jid: &str) -> bool {
        jid.ends_with(USER_SUFFIX)
    }

    /// Number part of a JID, without server or device suffix
    pub fn user_part(jid: &str) -> &str {
        let user = jid.split('@').next().unwrap_or(jid);
        user.split(':').next().unwrap_or(user)
    }

    /// Normalize an account ID (which may carry a device suffix) to a user JID
    pub fn to_user(jid: &str) -> String {
        format!("{}{}", user_part(jid), USER_SUFFIX)
    }

    /// `@number` mention text for a JID
    pub fn mention(jid: &str) -> String {
        format!("@{}", user_part(jid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jid_helpers() {
        assert!(jid::is_group("12345-678@g.us"));
        assert!(jid::is_lid("998877@lid"));
        assert_eq!(jid::user_part("51999888777:12@s.whatsapp.net"), "51999888777");
        assert_eq!(jid::to_user("51999888777:3@s.whatsapp.net"), "51999888777@s.whatsapp.net");
        assert_eq!(jid::mention("51999888777@s.whatsapp.net"), "@51999888777");
    }

    #[test]
    fn test_event_wire_format() {
        let line = r#"{"type":"close","code":428,"reason":"Connection Closed"}"#;
        let event: ClientEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            event,
            ClientEvent::Close { code: Some(428), reason: "Connection Closed".to_string() }
        );

        let line = r#"{"type":"group_participants","group_id":"1@g.us","participants":["2@s.whatsapp.net"],"action":"remove"}"#;
        let event: ClientEvent = serde_json::from_str(line).unwrap();
        match event {
            ClientEvent::GroupParticipants(update) => {
                assert_eq!(update.action, ParticipantAction::Remove);
                assert_eq!(update.participants.len(), 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_message_target_prefers_mentions() {
        let msg = InboundMessage {
            key: MessageKey {
                id: "A1".to_string(),
                chat: "1@g.us".to_string(),
                participant: Some("2@s.whatsapp.net".to_string()),
                from_me: false,
            },
            push_name: None,
            text: Some("  .silence 10 @3  ".to_string()),
            mentions: vec!["3@s.whatsapp.net".to_string()],
            quoted_participant: Some("4@s.whatsapp.net".to_string()),
        };
        assert_eq!(msg.sender(), "2@s.whatsapp.net");
        assert_eq!(msg.body(), ".silence 10 @3");
        assert_eq!(msg.target(), Some("3@s.whatsapp.net"));
        assert!(msg.is_group());
    }

    #[test]
    fn test_canonical_id_maps_lid_to_phone() {
        let metadata = GroupMetadata {
            id: "1@g.us".to_string(),
            subject: "g".to_string(),
            participants: vec![
                Participant {
                    id: "51222@s.whatsapp.net".to_string(),
                    lid: Some("998877@lid".to_string()),
                    admin: None,
                },
                Participant { id: "445566@lid".to_string(), lid: None, admin: None },
            ],
        };
        assert_eq!(metadata.canonical_id("998877@lid"), Some("51222@s.whatsapp.net"));
        assert_eq!(metadata.canonical_id("51222@s.whatsapp.net"), Some("51222@s.whatsapp.net"));
        // Participant only known by LID has no phone form
        assert_eq!(metadata.canonical_id("445566@lid"), None);
        assert_eq!(metadata.canonical_id("000@lid"), None);
    }
}
