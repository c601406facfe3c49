//! Scriptable in-process protocol client
//!
//! `MockClient` records every outbound call and replays scripted connection
//! sessions, so the connection manager, dispatcher and commands can be driven
//! without a live protocol bridge.

use crate::protocol::{
    ClientEvent, EventStream, GroupMetadata, MessageKey, ParticipantAction, Presence, ProtocolClient,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    own_id: Option<String>,
    sessions: VecDeque<Vec<ClientEvent>>,
    live: Option<mpsc::Sender<ClientEvent>>,
    connects: usize,
    groups: HashMap<String, GroupMetadata>,
    metadata_fetches: usize,
    sent_texts: Vec<(String, String)>,
    deleted: Vec<MessageKey>,
    presences: Vec<(Presence, Option<String>)>,
    participant_updates: Vec<(String, String, ParticipantAction)>,
    fail_participant_updates: bool,
    fail_invites: bool,
    stall_texts: bool,
}

/// Protocol client double
#[derive(Default)]
pub struct MockClient {
    state: Mutex<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_own_id(self, id: &str) -> Self {
        self.state.lock().own_id = Some(id.to_string());
        self
    }

    /// Queue the events delivered by the next successful `connect`.
    /// A `connect` with no queued session fails.
    pub fn push_session(&self, events: Vec<ClientEvent>) {
        self.state.lock().sessions.push_back(events);
    }

    /// Deliver an event on the most recent connection
    pub async fn emit(&self, event: ClientEvent) -> bool {
        let sender = self.state.lock().live.clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn add_group(&self, metadata: GroupMetadata) {
        self.state.lock().groups.insert(metadata.id.clone(), metadata);
    }

    pub fn fail_participant_updates(&self, fail: bool) {
        self.state.lock().fail_participant_updates = fail;
    }

    pub fn fail_invites(&self, fail: bool) {
        self.state.lock().fail_invites = fail;
    }

    /// Make `send_text` hang forever instead of completing
    pub fn stall_texts(&self, stall: bool) {
        self.state.lock().stall_texts = stall;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    pub fn metadata_fetches(&self) -> usize {
        self.state.lock().metadata_fetches
    }

    /// (jid, text) of every message sent
    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.state.lock().sent_texts.clone()
    }

    pub fn deleted(&self) -> Vec<MessageKey> {
        self.state.lock().deleted.clone()
    }

    pub fn presences(&self) -> Vec<(Presence, Option<String>)> {
        self.state.lock().presences.clone()
    }

    /// (group, user, action), one entry per user
    pub fn participant_updates(&self) -> Vec<(String, String, ParticipantAction)> {
        self.state.lock().participant_updates.clone()
    }
}

#[async_trait]
impl ProtocolClient for MockClient {
    async fn connect(&self) -> Result<EventStream> {
        let mut state = self.state.lock();
        state.connects += 1;

        let events = state
            .sessions
            .pop_front()
            .ok_or_else(|| Error::Protocol("connection refused".to_string()))?;

        let (tx, rx) = mpsc::channel(events.len() + 64);
        for event in events {
            tx.try_send(event)
                .map_err(|e| Error::Protocol(format!("scripted event dropped: {}", e)))?;
        }
        // The stream stays open until the next connect replaces it
        state.live = Some(tx);
        Ok(rx)
    }

    async fn own_id(&self) -> Option<String> {
        self.state.lock().own_id.clone()
    }

    async fn send_text(&self, jid: &str, text: &str, _mentions: &[String]) -> Result<()> {
        let stalled = {
            let mut state = self.state.lock();
            if !state.stall_texts {
                state.sent_texts.push((jid.to_string(), text.to_string()));
            }
            state.stall_texts
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn delete_message(&self, key: &MessageKey) -> Result<()> {
        self.state.lock().deleted.push(key.clone());
        Ok(())
    }

    async fn send_presence(&self, presence: Presence, jid: Option<&str>) -> Result<()> {
        self.state
            .lock()
            .presences
            .push((presence, jid.map(str::to_string)));
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        let mut state = self.state.lock();
        state.metadata_fetches += 1;
        state
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("item-not-found: {}", group_id)))
    }

    async fn update_participants(
        &self,
        group_id: &str,
        users: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_participant_updates {
            return Err(Error::Protocol("not-authorized".to_string()));
        }
        for user in users {
            state
                .participant_updates
                .push((group_id.to_string(), user.clone(), action));
        }
        Ok(())
    }

    async fn group_invite_code(&self, group_id: &str) -> Result<String> {
        if self.state.lock().fail_invites {
            return Err(Error::Protocol("not-authorized".to_string()));
        }
        Ok(format!("INVITE{}", group_id.len()))
    }
}
