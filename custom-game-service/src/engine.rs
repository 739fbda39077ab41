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

use std::sync::{Arc, Weak};

use hatori_common::{
    Actor, BetRecord, ChannelId, InteractionCommand, SessionKey, UserId, format_currency,
};
use tokio::sync::{MutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::{
    config::EngineSettings,
    errors::SessionError,
    events::SessionEventPublisher,
    ledger::Ledger,
    platform::{MessageContent, MessageHandle, MessagingPlatform, PlatformError},
    recruitment::RecruitmentClosure,
    registry::{SessionRegistry, SharedSession},
    session::{CloseTrigger, Session, SessionSnapshot},
    settlement::SettlementReport,
    timers::{SessionTimers, TimerFired, TimerKind},
};

/// What a command did, reported back to whoever issued it.
#[derive(Debug)]
pub enum CommandOutcome {
    Started(SessionSnapshot),
    Joined { participants: usize },
    AlreadyJoined,
    Left { participants: usize },
    /// The session is past the point where the command has any effect.
    Ignored,
    RecruitmentClosed(RecruitmentClosure),
    BetPlaced {
        bet: BetRecord,
        balance: i64,
        side_label: String,
    },
    BettingClosed { closed: bool },
    Settled(SettlementReport),
}

impl CommandOutcome {
    pub fn notice(&self) -> String {
        match self {
            CommandOutcome::Started(_) => {
                "Recruitment started. Participants join by reacting to the announcement.".to_string()
            }
            CommandOutcome::Joined { participants } => {
                format!("You joined the game ({participants} participants).")
            }
            CommandOutcome::AlreadyJoined => "You are already taking part.".to_string(),
            CommandOutcome::Left { .. } => "You left the game.".to_string(),
            CommandOutcome::Ignored => "Nothing to change.".to_string(),
            CommandOutcome::RecruitmentClosed(closure) => closure.notice(),
            CommandOutcome::BetPlaced {
                bet, side_label, ..
            } => format!(
                "✅ Bet on {side_label} of {} accepted!",
                format_currency(bet.amount)
            ),
            CommandOutcome::BettingClosed { closed: true } => "Betting closed.".to_string(),
            CommandOutcome::BettingClosed { closed: false } => {
                "Betting is already closed.".to_string()
            }
            CommandOutcome::Settled(report) => report.notice(),
        }
    }
}

/// Runs every custom-game session of the process.
///
/// Each transition locks its session for its whole duration and re-checks the
/// phase flags first, so a timer and a manual action racing for the same
/// transition resolve to exactly one of them. Events a transition records are
/// published after its lock is released.
pub struct SessionEngine {
    pub(crate) settings: EngineSettings,
    pub(crate) registry: SessionRegistry,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) platform: Arc<dyn MessagingPlatform>,
    pub(crate) events: Arc<dyn SessionEventPublisher>,
    pub(crate) timers: SessionTimers,
}

impl SessionEngine {
    /// Build the engine and spawn the task that delivers elapsed timers to it.
    pub fn start(
        settings: EngineSettings,
        ledger: Arc<dyn Ledger>,
        platform: Arc<dyn MessagingPlatform>,
        events: Arc<dyn SessionEventPublisher>,
    ) -> Arc<Self> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            settings,
            registry: SessionRegistry::new(),
            ledger,
            platform,
            events,
            timers: SessionTimers::new(fired_tx),
        });
        tokio::spawn(run_timer_dispatcher(Arc::downgrade(&engine), fired_rx));
        engine
    }

    pub async fn handle(&self, command: InteractionCommand) -> Result<CommandOutcome, SessionError> {
        match command {
            InteractionCommand::StartRecruitment {
                channel_id,
                actor,
                game,
                voice_channel_id,
            } => self
                .start_recruitment(channel_id, &actor, &game, voice_channel_id)
                .await
                .map(CommandOutcome::Started),
            InteractionCommand::Join { session, user_id } => self.join(session, user_id).await,
            InteractionCommand::Leave { session, user_id } => self.leave(session, user_id).await,
            InteractionCommand::StopRecruitment { session, actor } => self
                .stop_recruitment(session, &actor)
                .await
                .map(CommandOutcome::RecruitmentClosed),
            InteractionCommand::PlaceBet {
                session,
                actor,
                side,
                amount,
            } => self.place_bet(session, actor.user_id, side, &amount).await,
            InteractionCommand::CloseBetting { session, actor } => {
                self.require_privileged(&actor)?;
                self.close_betting(session, CloseTrigger::Manual)
                    .await
                    .map(|closed| CommandOutcome::BettingClosed { closed })
            }
            InteractionCommand::DeclareWinner {
                session,
                actor,
                side,
            } => self
                .declare_winner(session, &actor, side)
                .await
                .map(CommandOutcome::Settled),
            InteractionCommand::Refund { session, actor } => self
                .refund(session, &actor)
                .await
                .map(CommandOutcome::Settled),
        }
    }

    pub(crate) async fn on_timer(&self, fired: TimerFired) {
        let key = fired.key;
        info!(game_id = %key, kind = ?fired.kind, "session timer fired");
        let result = match fired.kind {
            TimerKind::Recruitment => self
                .close_recruitment(key, CloseTrigger::Timeout)
                .await
                .map(|_| ()),
            TimerKind::Betting => self
                .close_betting(key, CloseTrigger::Timeout)
                .await
                .map(|_| ()),
            TimerKind::GameDuration => self.expire_game(key).await.map(|_| ()),
            TimerKind::SettlementRetry => self.retry_settlement(key).await.map(|_| ()),
        };
        match result {
            Ok(()) => {}
            Err(SessionError::NotFound) => {
                debug!(game_id = %key, "timer fired for a session that is gone");
            }
            Err(error) => {
                warn!(game_id = %key, kind = ?fired.kind, error = %error, "timed transition failed");
            }
        }
    }

    pub async fn snapshot(&self, key: SessionKey) -> Option<SessionSnapshot> {
        let shared = self.registry.get(key).await?;
        Some(self.snapshot_of(&shared).await)
    }

    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snapshots = Vec::new();
        for shared in self.registry.list().await {
            snapshots.push(self.snapshot_of(&shared).await);
        }
        snapshots.sort_by_key(|snapshot| snapshot.created_at);
        snapshots
    }

    /// The session currently recruiting or running in `channel_id`.
    pub async fn channel_snapshot(&self, channel_id: ChannelId) -> Option<SessionSnapshot> {
        let key = self.registry.active_in_channel(channel_id).await?;
        self.snapshot(key).await
    }

    async fn snapshot_of(&self, shared: &SharedSession) -> SessionSnapshot {
        let mut snapshot = shared.lock().await.snapshot();
        snapshot.pending_timers = self
            .timers
            .pending(SessionKey::new(snapshot.channel_id, snapshot.message_id))
            .await;
        snapshot
    }

    pub async fn balance(&self, user_id: UserId) -> anyhow::Result<i64> {
        self.ledger.balance(user_id).await
    }

    pub(crate) fn is_privileged(&self, actor: &Actor) -> bool {
        actor.has_role(self.settings.admin_role_id) || actor.has_role(self.settings.manager_role_id)
    }

    pub(crate) fn require_privileged(&self, actor: &Actor) -> Result<(), SessionError> {
        if self.is_privileged(actor) {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied)
        }
    }

    pub(crate) async fn session(&self, key: SessionKey) -> Result<SharedSession, SessionError> {
        self.registry.get(key).await.ok_or(SessionError::NotFound)
    }

    /// Edit a live surface. A deleted message only skips the render.
    pub(crate) async fn render(
        &self,
        handle: MessageHandle,
        content: &MessageContent,
        surface: &'static str,
    ) -> bool {
        match self.platform.edit_message(handle, content).await {
            Ok(()) => true,
            Err(PlatformError::NotFound) => {
                debug!(message_id = handle.message_id, surface, "message is gone, render skipped");
                false
            }
            Err(error) => {
                warn!(message_id = handle.message_id, surface, error = %error, "render failed");
                false
            }
        }
    }

    pub(crate) async fn post(
        &self,
        channel_id: ChannelId,
        content: &MessageContent,
        surface: &'static str,
    ) -> Option<MessageHandle> {
        match self.platform.send_message(channel_id, content).await {
            Ok(handle) => Some(handle),
            Err(error) => {
                warn!(channel_id, surface, error = %error, "failed to post message");
                None
            }
        }
    }

    /// Unlock the session, then publish the events its transition recorded.
    pub(crate) async fn release(&self, mut session: MutexGuard<'_, Session>) {
        let events = session.take_events();
        drop(session);
        for event in events {
            if let Err(error) = self.events.publish(&event).await {
                warn!(
                    game_id = %event.game_id,
                    event_type = ?event.event_type,
                    error = %error,
                    "session event publish failed"
                );
            }
        }
    }

    /// Cancel every timer and drop the session from the registry.
    pub(crate) async fn teardown(&self, key: SessionKey) {
        self.timers.cancel_all(key).await;
        self.registry.remove(key).await;
    }
}

async fn run_timer_dispatcher(
    engine: Weak<SessionEngine>,
    mut fired_rx: mpsc::UnboundedReceiver<TimerFired>,
) {
    while let Some(fired) = fired_rx.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        if !engine.timers.claim(&fired).await {
            debug!(game_id = %fired.key, kind = ?fired.kind, "stale timer ignored");
            continue;
        }
        tokio::spawn(async move {
            engine.on_timer(fired).await;
        });
    }
    debug!("timer dispatcher stopped");
}
