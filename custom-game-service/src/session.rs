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

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hatori_common::{ChannelId, SessionEvent, SessionEventType, SessionKey, Side, UserId};
use serde::Serialize;

use crate::{platform::MessageHandle, settlement::UnsettledPayouts, timers::TimerKind};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseTrigger {
    /// Recruitment filled up and closed on its own.
    Natural,
    Manual,
    Timeout,
}

/// Open/closed state of a single phase.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "status", content = "trigger", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    NotStarted,
    Open,
    Closed(CloseTrigger),
}

impl PhaseStatus {
    pub fn is_open(self) -> bool {
        self == PhaseStatus::Open
    }

    pub fn is_closed(self) -> bool {
        matches!(self, PhaseStatus::Closed(_))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Teams {
    pub first: Vec<UserId>,
    pub second: Vec<UserId>,
}

impl Teams {
    pub fn members(&self, side: Side) -> &[UserId] {
        match side {
            Side::One => &self.first,
            Side::Two => &self.second,
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOutcome {
    NotEnoughParticipants,
    Won { side: Side },
    Refunded { by: RefundCause },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefundCause {
    Admin,
    GameTimeout,
}

/// One recruitment → betting → settlement cycle.
#[derive(Debug)]
pub struct Session {
    pub key: SessionKey,
    pub game_id: String,
    pub game: String,
    pub team_labels: [String; 2],
    pub manager_id: UserId,
    pub voice_channel_id: Option<ChannelId>,
    pub participants: BTreeSet<UserId>,
    pub recruitment: PhaseStatus,
    pub betting: PhaseStatus,
    pub teams: Option<Teams>,
    pub bet_view: Option<MessageHandle>,
    pub bet_summary: Option<MessageHandle>,
    pub winner_view: Option<MessageHandle>,
    pub outcome: Option<SessionOutcome>,
    /// Credits that still have to reach the ledger before the session is dropped.
    pub(crate) unsettled: Option<UnsettledPayouts>,
    finished: bool,
    /// Events recorded by the running transition, published once the lock is released.
    outbox: Vec<SessionEvent>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        key: SessionKey,
        game: String,
        team_labels: [String; 2],
        manager_id: UserId,
        voice_channel_id: Option<ChannelId>,
    ) -> Self {
        Self {
            key,
            game_id: key.game_id(),
            game,
            team_labels,
            manager_id,
            voice_channel_id,
            participants: BTreeSet::new(),
            recruitment: PhaseStatus::Open,
            betting: PhaseStatus::NotStarted,
            teams: None,
            bet_view: None,
            bet_summary: None,
            winner_view: None,
            outcome: None,
            unsettled: None,
            finished: false,
            outbox: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn announcement(&self) -> MessageHandle {
        MessageHandle {
            channel_id: self.key.channel_id,
            message_id: self.key.message_id,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark the session finished. Returns false if it already was, so only the
    /// first caller runs the terminal transition.
    pub fn finish(&mut self, outcome: SessionOutcome) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.outcome = Some(outcome);
        true
    }

    pub(crate) fn record(&mut self, event_type: SessionEventType, payload: serde_json::Value) {
        self.outbox.push(SessionEvent::new(self.key, event_type, payload));
    }

    pub(crate) fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn team_label(&self, side: Side) -> &str {
        &self.team_labels[side.index()]
    }

    pub fn phase_name(&self) -> &'static str {
        if self.finished {
            "finished"
        } else if self.recruitment.is_open() {
            "recruiting"
        } else if self.betting.is_open() {
            "taking bets"
        } else if self.betting.is_closed() {
            "awaiting a result"
        } else {
            "assigning teams"
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            game_id: self.game_id.clone(),
            channel_id: self.key.channel_id,
            message_id: self.key.message_id,
            game: self.game.clone(),
            team_labels: self.team_labels.clone(),
            manager_id: self.manager_id,
            participants: self.participants.iter().copied().collect(),
            recruitment: self.recruitment,
            betting: self.betting,
            teams: self.teams.clone(),
            finished: self.finished,
            outcome: self.outcome,
            pending_timers: Vec::new(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub game_id: String,
    pub channel_id: ChannelId,
    pub message_id: u64,
    pub game: String,
    pub team_labels: [String; 2],
    pub manager_id: UserId,
    pub participants: Vec<UserId>,
    pub recruitment: PhaseStatus,
    pub betting: PhaseStatus,
    pub teams: Option<Teams>,
    pub finished: bool,
    pub outcome: Option<SessionOutcome>,
    pub pending_timers: Vec<TimerKind>,
    pub created_at: DateTime<Utc>,
}
