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

use std::{collections::HashMap, future::Future, sync::Arc};

use hatori_common::{ChannelId, SessionKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{errors::SessionError, session::Session};

pub type SharedSession = Arc<Mutex<Session>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelSlot {
    /// A session is being created; its announcement is not posted yet.
    Reserved,
    Active(SessionKey),
}

#[derive(Default)]
struct RegistryState {
    channels: HashMap<ChannelId, ChannelSlot>,
    sessions: HashMap<SessionKey, SharedSession>,
}

impl RegistryState {
    fn release_reserved(&mut self, channel_id: ChannelId) {
        if self.channels.get(&channel_id) == Some(&ChannelSlot::Reserved) {
            self.channels.remove(&channel_id);
            info!(channel_id, "channel reservation released");
        }
    }
}

/// Holds a `Reserved` slot until `start` registers the session. Dropping it
/// while still armed frees the channel, which covers a start future that is
/// cancelled mid-way as well as a failing factory.
struct Reservation {
    state: Arc<RwLock<RegistryState>>,
    channel_id: ChannelId,
    armed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let channel_id = self.channel_id;
        if let Ok(mut state) = self.state.try_write() {
            state.release_reserved(channel_id);
            return;
        }
        let state = self.state.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    state.write().await.release_reserved(channel_id);
                });
            }
            Err(_) => warn!(channel_id, "channel reservation could not be released"),
        }
    }
}

/// Live sessions, at most one per originating channel.
#[derive(Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the channel, build the session and register it.
    ///
    /// The channel stays reserved while `factory` runs so a concurrent start in
    /// the same channel is rejected. A failing factory, or a caller that drops
    /// this future before it completes, releases the channel.
    pub async fn start<F, Fut>(
        &self,
        channel_id: ChannelId,
        factory: F,
    ) -> Result<SharedSession, SessionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session, SessionError>>,
    {
        {
            let mut state = self.state.write().await;
            if state.channels.contains_key(&channel_id) {
                return Err(SessionError::AlreadyActive { channel_id });
            }
            state.channels.insert(channel_id, ChannelSlot::Reserved);
        }
        let mut reservation = Reservation {
            state: self.state.clone(),
            channel_id,
            armed: true,
        };

        let session = factory().await?;

        let key = session.key;
        let shared = Arc::new(Mutex::new(session));
        let mut state = self.state.write().await;
        state.channels.insert(channel_id, ChannelSlot::Active(key));
        state.sessions.insert(key, shared.clone());
        reservation.armed = false;
        info!(game_id = %key, "session registered");
        Ok(shared)
    }

    pub async fn get(&self, key: SessionKey) -> Option<SharedSession> {
        self.state.read().await.sessions.get(&key).cloned()
    }

    pub async fn active_in_channel(&self, channel_id: ChannelId) -> Option<SessionKey> {
        match self.state.read().await.channels.get(&channel_id) {
            Some(ChannelSlot::Active(key)) => Some(*key),
            _ => None,
        }
    }

    /// Idempotent. Returns true only for the call that actually removed the session.
    pub async fn remove(&self, key: SessionKey) -> bool {
        let mut state = self.state.write().await;
        let removed = state.sessions.remove(&key).is_some();
        if state.channels.get(&key.channel_id) == Some(&ChannelSlot::Active(key)) {
            state.channels.remove(&key.channel_id);
        }
        if removed {
            info!(game_id = %key, "session removed");
        }
        removed
    }

    pub async fn list(&self) -> Vec<SharedSession> {
        self.state.read().await.sessions.values().cloned().collect()
    }
}
