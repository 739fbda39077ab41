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

use async_trait::async_trait;
use axum::http::StatusCode;
use hatori_common::{ChannelId, MessageId, Side, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Info,
    Success,
    Gold,
    Danger,
    Muted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// What a button does when pressed. The gateway echoes it back as an interaction command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    StopRecruitment,
    PlaceBet { side: Side },
    CloseBetting,
    DeclareWinner { side: Side },
    Refund,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Control {
    pub action: ControlAction,
    pub label: String,
    pub disabled: bool,
}

/// Platform-neutral rich message: one card plus optional plain text and buttons.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub controls: Vec<Control>,
}

impl MessageContent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_controls_disabled(mut self) -> Self {
        for control in &mut self.controls {
            control.disabled = true;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoiceChannel {
    pub channel_id: ChannelId,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("message or member not found")]
    NotFound,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Outbound calls to the chat platform.
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &MessageContent,
    ) -> Result<MessageHandle, PlatformError>;
    async fn edit_message(
        &self,
        handle: MessageHandle,
        content: &MessageContent,
    ) -> Result<(), PlatformError>;
    async fn fetch_message(&self, handle: MessageHandle) -> Result<MessageContent, PlatformError>;
    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> Result<(), PlatformError>;
    async fn remove_reaction(
        &self,
        handle: MessageHandle,
        emoji: &str,
        user_id: UserId,
    ) -> Result<(), PlatformError>;
    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<(), PlatformError>;
    async fn reply_to_interaction(&self, token: &str, text: &str) -> Result<(), PlatformError>;
    /// Voice channel the member is connected to right now, if any.
    async fn member_voice_channel(&self, user_id: UserId)
    -> Result<Option<ChannelId>, PlatformError>;
    /// Voice channels in the same category as `channel_id`.
    async fn sibling_voice_channels(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<VoiceChannel>, PlatformError>;
    async fn move_member(&self, user_id: UserId, channel_id: ChannelId)
    -> Result<(), PlatformError>;
}

/// Talks to the gateway bridge that owns the bot connection.
#[derive(Clone)]
pub struct HttpPlatformBridge {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct MemberVoiceState {
    channel_id: Option<ChannelId>,
}

impl HttpPlatformBridge {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(
        response: Result<reqwest::Response, reqwest::Error>,
        what: &str,
    ) -> Result<reqwest::Response, PlatformError> {
        let response = response
            .map_err(|error| anyhow::anyhow!("platform {what} request failed: {error}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(PlatformError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("platform {what} returned {status}: {body}").into());
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, PlatformError> {
        response
            .json::<T>()
            .await
            .map_err(|error| anyhow::anyhow!("invalid platform {what} response: {error}").into())
    }
}

#[async_trait]
impl MessagingPlatform for HttpPlatformBridge {
    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &MessageContent,
    ) -> Result<MessageHandle, PlatformError> {
        let url = self.endpoint(&format!("/v1/channels/{channel_id}/messages"));
        let response =
            Self::check(self.client.post(url).json(content).send().await, "send message").await?;
        let sent: SentMessage = Self::json(response, "send message").await?;
        Ok(MessageHandle {
            channel_id,
            message_id: sent.message_id,
        })
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        content: &MessageContent,
    ) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!(
            "/v1/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        ));
        Self::check(self.client.patch(url).json(content).send().await, "edit message").await?;
        Ok(())
    }

    async fn fetch_message(&self, handle: MessageHandle) -> Result<MessageContent, PlatformError> {
        let url = self.endpoint(&format!(
            "/v1/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        ));
        let response = Self::check(self.client.get(url).send().await, "fetch message").await?;
        Self::json(response, "fetch message").await
    }

    async fn add_reaction(&self, handle: MessageHandle, emoji: &str) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!(
            "/v1/channels/{}/messages/{}/reactions",
            handle.channel_id, handle.message_id
        ));
        let payload = serde_json::json!({"emoji": emoji});
        Self::check(self.client.post(url).json(&payload).send().await, "add reaction").await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        handle: MessageHandle,
        emoji: &str,
        user_id: UserId,
    ) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!(
            "/v1/channels/{}/messages/{}/reactions/delete",
            handle.channel_id, handle.message_id
        ));
        let payload = serde_json::json!({"emoji": emoji, "user_id": user_id});
        Self::check(
            self.client.post(url).json(&payload).send().await,
            "remove reaction",
        )
        .await?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!("/v1/users/{user_id}/direct-messages"));
        let payload = serde_json::json!({"text": text});
        Self::check(self.client.post(url).json(&payload).send().await, "direct message").await?;
        Ok(())
    }

    async fn reply_to_interaction(&self, token: &str, text: &str) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!("/v1/interactions/{token}/reply"));
        let payload = serde_json::json!({"text": text, "ephemeral": true});
        Self::check(
            self.client.post(url).json(&payload).send().await,
            "interaction reply",
        )
        .await?;
        Ok(())
    }

    async fn member_voice_channel(
        &self,
        user_id: UserId,
    ) -> Result<Option<ChannelId>, PlatformError> {
        let url = self.endpoint(&format!("/v1/members/{user_id}/voice"));
        match Self::check(self.client.get(url).send().await, "member voice state").await {
            Ok(response) => {
                let state: MemberVoiceState = Self::json(response, "member voice state").await?;
                Ok(state.channel_id)
            }
            Err(PlatformError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn sibling_voice_channels(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<VoiceChannel>, PlatformError> {
        let url = self.endpoint(&format!("/v1/voice-channels/{channel_id}/siblings"));
        let response =
            Self::check(self.client.get(url).send().await, "sibling voice channels").await?;
        Self::json(response, "sibling voice channels").await
    }

    async fn move_member(
        &self,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        let url = self.endpoint(&format!("/v1/members/{user_id}/move"));
        let payload = serde_json::json!({"channel_id": channel_id});
        Self::check(self.client.post(url).json(&payload).send().await, "move member").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_controls_keeps_the_rest_of_the_card() {
        let content = MessageContent {
            title: Some("Bets".to_string()),
            controls: vec![
                Control {
                    action: ControlAction::PlaceBet { side: Side::One },
                    label: "Bet on Attack".to_string(),
                    disabled: false,
                },
                Control {
                    action: ControlAction::Refund,
                    label: "Refund bets".to_string(),
                    disabled: false,
                },
            ],
            ..MessageContent::default()
        };

        let frozen = content.clone().with_controls_disabled();
        assert!(frozen.controls.iter().all(|control| control.disabled));
        assert_eq!(frozen.title, content.title);
    }

    #[test]
    fn control_action_serializes_with_side() {
        let raw = serde_json::to_value(ControlAction::DeclareWinner { side: Side::Two }).unwrap();
        assert_eq!(raw, serde_json::json!({"action": "declare_winner", "side": 2}));
    }

    #[test]
    fn bridge_trims_trailing_slash() {
        let bridge = HttpPlatformBridge::new("http://gateway:8080/");
        assert_eq!(
            bridge.endpoint("/v1/channels/1/messages"),
            "http://gateway:8080/v1/channels/1/messages"
        );
    }
}
