//! End-to-end dispatch through the built-in commands and middleware

use ravebot_core::protocol::{AdminRole, MessageKey, Participant};
use ravebot_core::store::GroupRecord;
use ravebot_core::testing::MockClient;
use ravebot_core::*;
use ravebot_modules::{default_middleware, register_commands};
use std::sync::Arc;

const GROUP: &str = "120363@g.us";
const ADMIN: &str = "51111@s.whatsapp.net";
const MEMBER: &str = "51222@s.whatsapp.net";
const MEMBER_LID: &str = "998877@lid";

struct Bot {
    dispatcher: Dispatcher,
    client: Arc<MockClient>,
    clock: Arc<ManualClock>,
    next_id: usize,
}

impl Bot {
    async fn new() -> Self {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        store
            .put_group(GroupRecord {
                id: GROUP.to_string(),
                name: "Ravers".to_string(),
                active: true,
                participants: 2,
                settings: Default::default(),
                activated_at: None,
            })
            .await
            .unwrap();

        let client = Arc::new(MockClient::new());
        client.add_group(GroupMetadata {
            id: GROUP.to_string(),
            subject: "Ravers".to_string(),
            participants: vec![
                Participant { id: ADMIN.to_string(), lid: None, admin: Some(AdminRole::Admin) },
                Participant {
                    id: MEMBER.to_string(),
                    lid: Some(MEMBER_LID.to_string()),
                    admin: None,
                },
            ],
        });

        let services = Arc::new(Services::new(Config::default(), store, clock.clone()));
        let mut registry = CommandRegistry::new();
        register_commands(&mut registry).unwrap();

        let mut dispatcher = Dispatcher::new(client.clone(), services, Arc::new(registry));
        for middleware in default_middleware().unwrap() {
            dispatcher = dispatcher.with_middleware(middleware);
        }

        Self { dispatcher, client, clock, next_id: 0 }
    }

    async fn say(&mut self, sender: &str, text: &str, mentions: &[&str]) -> Dispatch {
        self.next_id += 1;
        self.clock.advance(chrono::Duration::seconds(10));
        self.dispatcher
            .handle_message(InboundMessage {
                key: MessageKey {
                    id: format!("m{}", self.next_id),
                    chat: GROUP.to_string(),
                    participant: Some(sender.to_string()),
                    from_me: false,
                },
                push_name: None,
                text: Some(text.to_string()),
                mentions: mentions.iter().map(|m| m.to_string()).collect(),
                quoted_participant: None,
            })
            .await
    }
}

#[tokio::test]
async fn test_silenced_member_messages_are_deleted() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(ADMIN, ".callar 5 @51222", &[MEMBER]).await,
        Dispatch::Executed("silence".to_string())
    );
    assert_eq!(bot.say(MEMBER, "hola?", &[]).await, Dispatch::Suppressed);
    assert_eq!(bot.client.deleted().len(), 1);

    // Ten seconds per message; the five-minute silence lapses
    for _ in 0..30 {
        bot.clock.advance(chrono::Duration::seconds(10));
    }
    assert_eq!(bot.say(MEMBER, "volví", &[]).await, Dispatch::Passed);
}

#[tokio::test]
async fn test_member_cannot_moderate() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(MEMBER, ".tkick 10 @51111", &[ADMIN]).await,
        Dispatch::Denied("tkick".to_string())
    );
    assert!(bot.client.participant_updates().is_empty());
}

#[tokio::test]
async fn test_antilink_intercepts_member_links() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(ADMIN, ".antilink on", &[]).await,
        Dispatch::Executed("antilink".to_string())
    );
    assert_eq!(
        bot.say(MEMBER, "entradas en https://scam.example/promo", &[]).await,
        Dispatch::Intercepted("antilink".to_string())
    );
    assert_eq!(bot.say(MEMBER, "https://ravehub.pe/eventos", &[]).await, Dispatch::Passed);
    assert_eq!(bot.say(ADMIN, "https://scam.example/promo", &[]).await, Dispatch::Passed);
    assert_eq!(bot.client.deleted().len(), 1);
}

#[tokio::test]
async fn test_silence_by_lid_mention_suppresses_lid_messages() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(ADMIN, ".silence 10 @998877", &[MEMBER_LID]).await,
        Dispatch::Executed("silence".to_string())
    );
    assert_eq!(bot.say(MEMBER_LID, "sigo aquí", &[]).await, Dispatch::Suppressed);
    assert_eq!(bot.say(MEMBER, "y aquí", &[]).await, Dispatch::Suppressed);
    assert_eq!(bot.client.deleted().len(), 2);
}

#[tokio::test]
async fn test_ping_is_admin_only() {
    let mut bot = Bot::new().await;

    assert_eq!(bot.say(MEMBER, ".ping", &[]).await, Dispatch::Denied("ping".to_string()));
    assert_eq!(bot.say(ADMIN, ".ping", &[]).await, Dispatch::Executed("ping".to_string()));
}

#[tokio::test]
async fn test_antiwords_intercepts_after_antilink() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(ADMIN, ".antiwords on", &[]).await,
        Dispatch::Executed("antiwords".to_string())
    );
    assert_eq!(
        bot.say(ADMIN, ".antiwords add estafa", &[]).await,
        Dispatch::Executed("antiwords".to_string())
    );
    assert_eq!(
        bot.say(MEMBER, "esto es una ESTAFA", &[]).await,
        Dispatch::Intercepted("antiwords".to_string())
    );
    assert_eq!(bot.say(MEMBER, "buenas noches", &[]).await, Dispatch::Passed);
    assert_eq!(bot.client.deleted().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_welcome_after_enabling() {
    let mut bot = Bot::new().await;

    assert_eq!(
        bot.say(ADMIN, ".bienvenida on", &[]).await,
        Dispatch::Executed("welcome".to_string())
    );
    let sent = bot
        .dispatcher
        .handle_participants_update(&ParticipantsUpdate {
            group_id: GROUP.to_string(),
            participants: vec!["51333@s.whatsapp.net".to_string()],
            action: ParticipantAction::Add,
        })
        .await;

    assert_eq!(sent, 1);
    let (chat, text) = bot.client.sent_texts().pop().unwrap();
    assert_eq!(chat, GROUP);
    assert_eq!(text, "¡Bienvenido @51333 a Ravers! 🎉");
}
