// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! In-process fakes for the platform and event seams.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use hatori_common::{ChannelId, SessionEvent, SessionEventType, UserId};

use crate::{
    config::EngineSettings,
    engine::SessionEngine,
    events::SessionEventPublisher,
    ledger::InMemoryLedger,
    platform::{MessageContent, MessageHandle, MessagingPlatform, PlatformError, VoiceChannel},
    registry::SharedSession,
};

#[derive(Default)]
struct PlatformState {
    next_message_id: u64,
    messages: HashMap<MessageHandle, MessageContent>,
    sent: Vec<(ChannelId, MessageContent)>,
    edits: Vec<(MessageHandle, MessageContent)>,
    deleted: HashSet<MessageHandle>,
    reactions_added: Vec<(MessageHandle, String)>,
    reactions_removed: Vec<(MessageHandle, UserId)>,
    direct_messages: Vec<(UserId, String)>,
    replies: Vec<(String, String)>,
    voice_rooms: HashMap<ChannelId, Vec<VoiceChannel>>,
    member_voice: HashMap<UserId, ChannelId>,
    failing_moves: HashSet<UserId>,
    moves: Vec<(UserId, ChannelId)>,
    fail_sends: bool,
}

/// Records every outbound call and keeps posted messages so edits can be checked.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    fn with_state<T>(&self, f: impl FnOnce(&mut PlatformState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn delete_message(&self, handle: MessageHandle) {
        self.with_state(|state| {
            state.messages.remove(&handle);
            state.deleted.insert(handle);
        });
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.with_state(|state| state.fail_sends = fail);
    }

    pub fn set_voice_rooms(&self, source: ChannelId, rooms: Vec<VoiceChannel>) {
        self.with_state(|state| {
            state.voice_rooms.insert(source, rooms);
        });
    }

    pub fn set_member_voice(&self, user_id: UserId, channel_id: Option<ChannelId>) {
        self.with_state(|state| match channel_id {
            Some(channel_id) => {
                state.member_voice.insert(user_id, channel_id);
            }
            None => {
                state.member_voice.remove(&user_id);
            }
        });
    }

    pub fn fail_moves_for(&self, user_id: UserId) {
        self.with_state(|state| {
            state.failing_moves.insert(user_id);
        });
    }

    pub fn message(&self, handle: MessageHandle) -> Option<MessageContent> {
        self.with_state(|state| state.messages.get(&handle).cloned())
    }

    pub fn sent(&self) -> Vec<(ChannelId, MessageContent)> {
        self.with_state(|state| state.sent.clone())
    }

    /// Plain texts posted to a channel, in order.
    pub fn texts_in(&self, channel_id: ChannelId) -> Vec<String> {
        self.with_state(|state| {
            state
                .sent
                .iter()
                .filter(|(channel, _)| *channel == channel_id)
                .filter_map(|(_, content)| content.text.clone())
                .collect()
        })
    }

    pub fn edits(&self) -> Vec<(MessageHandle, MessageContent)> {
        self.with_state(|state| state.edits.clone())
    }

    pub fn reactions_added(&self) -> Vec<(MessageHandle, String)> {
        self.with_state(|state| state.reactions_added.clone())
    }

    pub fn reactions_removed(&self) -> Vec<(MessageHandle, UserId)> {
        self.with_state(|state| state.reactions_removed.clone())
    }

    pub fn direct_messages(&self) -> Vec<(UserId, String)> {
        self.with_state(|state| state.direct_messages.clone())
    }

    pub fn replies(&self) -> Vec<(String, String)> {
        self.with_state(|state| state.replies.clone())
    }

    pub fn moves(&self) -> Vec<(UserId, ChannelId)> {
        self.with_state(|state| state.moves.clone())
    }
}

#[async_trait]
impl MessagingPlatform for FakePlatform {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &MessageContent,
    ) -> Result<MessageHandle, PlatformError> {
        self.with_state(|state| {
            if state.fail_sends {
                return Err(PlatformError::Failed(anyhow::anyhow!("send refused")));
            }
            state.next_message_id += 1;
            let handle = MessageHandle {
                channel_id,
                message_id: 1000 + state.next_message_id,
            };
            state.messages.insert(handle, content.clone());
            state.sent.push((channel_id, content.clone()));
            Ok(handle)
        })
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        content: &MessageContent,
    ) -> Result<(), PlatformError> {
        self.with_state(|state| {
            if state.deleted.contains(&handle) || !state.messages.contains_key(&handle) {
                return Err(PlatformError::NotFound);
            }
            state.messages.insert(handle, content.clone());
            state.edits.push((handle, content.clone()));
            Ok(())
        })
    }

    async fn fetch_message(&self, handle: MessageHandle) -> Result<MessageContent, PlatformError> {
        self.with_state(|state| {
            state
                .messages
                .get(&handle)
                .cloned()
                .ok_or(PlatformError::NotFound)
        })
    }

    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> Result<(), PlatformError> {
        self.with_state(|state| {
            state.reactions_added.push((handle, emoji.to_string()));
            Ok(())
        })
    }

    async fn remove_reaction(
        &self,
        handle: MessageHandle,
        _emoji: &str,
        user_id: UserId,
    ) -> Result<(), PlatformError> {
        self.with_state(|state| {
            state.reactions_removed.push((handle, user_id));
            Ok(())
        })
    }

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<(), PlatformError> {
        self.with_state(|state| {
            state.direct_messages.push((user_id, text.to_string()));
            Ok(())
        })
    }

    async fn reply_to_interaction(&self, token: &str, text: &str) -> Result<(), PlatformError> {
        self.with_state(|state| {
            state.replies.push((token.to_string(), text.to_string()));
            Ok(())
        })
    }

    async fn member_voice_channel(
        &self,
        user_id: UserId,
    ) -> Result<Option<ChannelId>, PlatformError> {
        Ok(self.with_state(|state| state.member_voice.get(&user_id).copied()))
    }

    async fn sibling_voice_channels(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<VoiceChannel>, PlatformError> {
        Ok(self.with_state(|state| {
            state
                .voice_rooms
                .get(&channel_id)
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn move_member(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        self.with_state(|state| {
            if state.failing_moves.contains(&user_id) {
                return Err(PlatformError::Failed(anyhow::anyhow!("member left voice")));
            }
            state.moves.push((user_id, channel_id));
            state.member_voice.insert(user_id, channel_id);
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct RecordingSessionEventPublisher {
    events: Mutex<Vec<SessionEvent>>,
    watched: Mutex<Option<SharedSession>>,
    published_while_locked: Mutex<usize>,
}

impl RecordingSessionEventPublisher {
    /// Count publishes that happen while `session` is still locked.
    pub fn watch(&self, session: SharedSession) {
        *self.watched.lock().unwrap() = Some(session);
    }

    pub fn published_while_locked(&self) -> usize {
        *self.published_while_locked.lock().unwrap()
    }

    pub fn event_types(&self) -> Vec<SessionEventType> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event_type)
            .collect()
    }

    pub fn count(&self, event_type: SessionEventType) -> usize {
        self.event_types()
            .into_iter()
            .filter(|recorded| *recorded == event_type)
            .count()
    }
}

#[async_trait]
impl SessionEventPublisher for RecordingSessionEventPublisher {
    async fn publish(&self, event: &SessionEvent) -> anyhow::Result<()> {
        let watched = self.watched.lock().unwrap().clone();
        if watched.is_some_and(|session| session.try_lock().is_err()) {
            *self.published_while_locked.lock().unwrap() += 1;
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub const ADMIN_ROLE: u64 = 900;
pub const MANAGER_ROLE: u64 = 901;
pub const BETS_CHANNEL: ChannelId = 7000;
pub const GAME_CHANNEL: ChannelId = 100;

pub fn test_settings() -> EngineSettings {
    EngineSettings {
        admin_role_id: Some(ADMIN_ROLE),
        manager_role_id: Some(MANAGER_ROLE),
        bets_channel_id: Some(BETS_CHANNEL),
        ..EngineSettings::default()
    }
}

/// Engine wired to fakes plus handles to inspect them.
pub struct Harness {
    pub engine: Arc<SessionEngine>,
    pub ledger: Arc<InMemoryLedger>,
    pub platform: Arc<FakePlatform>,
    pub events: Arc<RecordingSessionEventPublisher>,
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: EngineSettings) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let platform = Arc::new(FakePlatform::default());
    let events = Arc::new(RecordingSessionEventPublisher::default());
    let engine = SessionEngine::start(settings, ledger.clone(), platform.clone(), events.clone());
    Harness {
        engine,
        ledger,
        platform,
        events,
    }
}

pub fn admin(user_id: UserId) -> hatori_common::Actor {
    hatori_common::Actor {
        user_id,
        role_ids: vec![ADMIN_ROLE],
    }
}

pub fn member(user_id: UserId) -> hatori_common::Actor {
    hatori_common::Actor {
        user_id,
        role_ids: Vec::new(),
    }
}
