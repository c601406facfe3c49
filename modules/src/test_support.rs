//! Shared fixture for command tests

use ravebot_core::protocol::{AdminRole, MessageKey, Participant};
use ravebot_core::store::GroupRecord;
use ravebot_core::testing::MockClient;
use ravebot_core::{
    permission_level, CommandContext, Config, GroupMetadata, InboundMessage, ManualClock,
    MemoryStore, Services, Store,
};
use std::sync::Arc;

pub const GROUP: &str = "120363@g.us";
pub const ADMIN: &str = "51111@s.whatsapp.net";
pub const MEMBER: &str = "51222@s.whatsapp.net";
pub const MEMBER_LID: &str = "998877@lid";

pub struct Fixture {
    pub client: Arc<MockClient>,
    pub services: Arc<Services>,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        store.put_group(group_record(true)).await.unwrap();

        let client = Arc::new(MockClient::new().with_own_id("51999:2@s.whatsapp.net"));
        client.add_group(metadata());

        let mut config = Config::default();
        config.bot.owner_number = Some("51999".to_string());
        let services = Arc::new(Services::new(config, store.clone(), clock));

        Self { client, services, store }
    }

    /// Context for a group message from `sender` mentioning `mentions`
    pub fn context(&self, sender: &str, text: &str, mentions: &[&str]) -> CommandContext {
        self.context_in(GROUP, sender, text, mentions)
    }

    pub fn context_in(&self, chat: &str, sender: &str, text: &str, mentions: &[&str]) -> CommandContext {
        let is_group = chat == GROUP;
        let group_metadata = is_group.then(metadata);
        let level = permission_level(
            sender,
            false,
            self.services.config.bot.owner_number.as_deref(),
            group_metadata.as_ref(),
            false,
        );

        CommandContext {
            client: self.client.clone(),
            services: self.services.clone(),
            message: InboundMessage {
                key: MessageKey {
                    id: format!("msg-{}", text.len()),
                    chat: chat.to_string(),
                    participant: is_group.then(|| sender.to_string()),
                    from_me: false,
                },
                push_name: None,
                text: Some(text.to_string()),
                mentions: mentions.iter().map(|m| m.to_string()).collect(),
                quoted_participant: None,
            },
            sender: sender.to_string(),
            group: is_group.then(|| group_record(true)),
            metadata: group_metadata,
            level,
        }
    }

    /// Text of every message sent so far
    pub fn texts(&self) -> Vec<String> {
        self.client.sent_texts().into_iter().map(|(_, text)| text).collect()
    }
}

pub fn group_record(active: bool) -> GroupRecord {
    GroupRecord {
        id: GROUP.to_string(),
        name: "Ravers".to_string(),
        active,
        participants: 2,
        settings: Default::default(),
        activated_at: None,
    }
}

pub fn metadata() -> GroupMetadata {
    GroupMetadata {
        id: GROUP.to_string(),
        subject: "Ravers".to_string(),
        participants: vec![
            Participant { id: ADMIN.to_string(), lid: None, admin: Some(AdminRole::Superadmin) },
            Participant {
                id: MEMBER.to_string(),
                lid: Some(MEMBER_LID.to_string()),
                admin: None,
            },
        ],
    }
}
