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

use hatori_common::{Actor, ChannelId, JOIN_REACTION, SessionEventType, SessionKey, UserId};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    engine::{CommandOutcome, SessionEngine},
    errors::SessionError,
    render,
    session::{CloseTrigger, PhaseStatus, Session, SessionOutcome, SessionSnapshot, Teams},
    teams::{self, BatchReport},
    timers::TimerKind,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecruitmentClosure {
    AlreadyClosed,
    NotEnoughParticipants {
        participants: usize,
    },
    TeamsAssigned {
        teams: Teams,
        rewards_credited: usize,
        members_moved: usize,
    },
}

impl RecruitmentClosure {
    pub fn notice(&self) -> String {
        match self {
            RecruitmentClosure::AlreadyClosed => "Recruitment is already closed.".to_string(),
            RecruitmentClosure::NotEnoughParticipants { .. } => {
                "Not enough participants to start the game.".to_string()
            }
            RecruitmentClosure::TeamsAssigned { .. } => {
                "Teams are assigned and betting is open.".to_string()
            }
        }
    }
}

const DEFAULT_GAME_LABEL: &str = "Custom game";

impl SessionEngine {
    pub async fn start_recruitment(
        &self,
        channel_id: ChannelId,
        actor: &Actor,
        game: &str,
        voice_channel_id: Option<ChannelId>,
    ) -> Result<SessionSnapshot, SessionError> {
        self.require_privileged(actor)?;
        let game = match game.trim() {
            "" => DEFAULT_GAME_LABEL,
            trimmed => trimmed,
        };
        let labels = self.settings.catalog.team_labels(game);
        let labels = &labels;
        let limit = self.settings.max_participants;

        let shared = self
            .registry
            .start(channel_id, move || async move {
                let content =
                    render::recruitment_announcement(game, labels, &BTreeSet::new(), limit);
                let handle = self
                    .platform
                    .send_message(channel_id, &content)
                    .await
                    .map_err(|error| SessionError::ExternalCallFailed(error.into()))?;
                if let Err(error) = self.platform.add_reaction(handle, JOIN_REACTION).await {
                    warn!(channel_id, error = %error, "failed to add join reaction");
                }
                Ok(Session::new(
                    SessionKey::new(channel_id, handle.message_id),
                    game.to_string(),
                    labels.clone(),
                    actor.user_id,
                    voice_channel_id,
                ))
            })
            .await?;

        let mut session = shared.lock().await;
        let key = session.key;
        self.timers
            .schedule(key, TimerKind::Recruitment, self.settings.recruitment_timeout)
            .await;
        info!(
            game_id = %key,
            game = %session.game,
            manager_id = actor.user_id,
            "recruitment started"
        );
        let payload = serde_json::json!({
            "game": session.game,
            "team_labels": session.team_labels,
            "manager_id": session.manager_id,
        });
        session.record(SessionEventType::RecruitmentStarted, payload);
        let snapshot = session.snapshot();
        self.release(session).await;
        Ok(snapshot)
    }

    pub async fn join(&self, key: SessionKey, user_id: UserId) -> Result<CommandOutcome, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() || !session.recruitment.is_open() {
            return Ok(CommandOutcome::Ignored);
        }
        if session.participants.contains(&user_id) {
            return Ok(CommandOutcome::AlreadyJoined);
        }

        let limit = self.settings.max_participants;
        if session.participants.len() >= limit {
            let rejection = SessionError::CapacityExceeded { limit };
            let announcement = session.announcement();
            if let Err(error) = self
                .platform
                .remove_reaction(announcement, JOIN_REACTION, user_id)
                .await
            {
                warn!(game_id = %key, user_id, error = %error, "failed to remove join reaction");
            }
            if let Err(error) = self
                .platform
                .send_direct_message(user_id, &rejection.notice())
                .await
            {
                warn!(game_id = %key, user_id, error = %error, "failed to send capacity notice");
            }
            return Err(rejection);
        }

        session.participants.insert(user_id);
        let participants = session.participants.len();
        let content = render::recruitment_for(&session, limit);
        self.render(session.announcement(), &content, "recruitment announcement")
            .await;
        info!(game_id = %key, user_id, participants, "participant joined");
        session.record(
            SessionEventType::ParticipantJoined,
            serde_json::json!({"user_id": user_id, "participants": participants}),
        );
        self.release(session).await;

        if self.settings.close_when_full && participants >= limit {
            self.close_recruitment(key, CloseTrigger::Natural).await?;
        }
        Ok(CommandOutcome::Joined { participants })
    }

    pub async fn leave(&self, key: SessionKey, user_id: UserId) -> Result<CommandOutcome, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() || !session.recruitment.is_open() {
            return Ok(CommandOutcome::Ignored);
        }
        if !session.participants.remove(&user_id) {
            return Ok(CommandOutcome::Ignored);
        }

        let participants = session.participants.len();
        let content = render::recruitment_for(&session, self.settings.max_participants);
        self.render(session.announcement(), &content, "recruitment announcement")
            .await;
        info!(game_id = %key, user_id, participants, "participant left");
        session.record(
            SessionEventType::ParticipantLeft,
            serde_json::json!({"user_id": user_id, "participants": participants}),
        );
        self.release(session).await;
        Ok(CommandOutcome::Left { participants })
    }

    /// Manual stop, allowed to the member who started the session and to managers.
    pub async fn stop_recruitment(
        &self,
        key: SessionKey,
        actor: &Actor,
    ) -> Result<RecruitmentClosure, SessionError> {
        let manager_id = self.session(key).await?.lock().await.manager_id;
        if actor.user_id != manager_id && !self.is_privileged(actor) {
            return Err(SessionError::PermissionDenied);
        }
        self.close_recruitment(key, CloseTrigger::Manual).await
    }

    pub async fn close_recruitment(
        &self,
        key: SessionKey,
        trigger: CloseTrigger,
    ) -> Result<RecruitmentClosure, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        let closure = self.end_recruitment(&mut session, trigger).await;
        self.release(session).await;
        Ok(closure)
    }

    async fn end_recruitment(
        &self,
        session: &mut Session,
        trigger: CloseTrigger,
    ) -> RecruitmentClosure {
        let key = session.key;
        if session.is_finished() || !session.recruitment.is_open() {
            return RecruitmentClosure::AlreadyClosed;
        }

        session.recruitment = PhaseStatus::Closed(trigger);
        self.timers.cancel(key, TimerKind::Recruitment).await;

        let limit = self.settings.max_participants;
        let announcement = session.announcement();
        let frozen = render::recruitment_for(session, limit).with_controls_disabled();
        self.render(announcement, &frozen, "recruitment announcement")
            .await;

        let participants = session.participants.len();
        info!(game_id = %key, ?trigger, participants, "recruitment closed");
        session.record(
            SessionEventType::RecruitmentClosed,
            serde_json::json!({"trigger": trigger, "participants": participants}),
        );

        if participants < self.settings.min_participants {
            session.finish(SessionOutcome::NotEnoughParticipants);
            self.render(
                announcement,
                &render::not_enough_participants(&session.game),
                "recruitment announcement",
            )
            .await;
            self.teardown(key).await;
            info!(game_id = %key, participants, "session abandoned");
            session.record(
                SessionEventType::SessionAbandoned,
                serde_json::json!({"participants": participants}),
            );
            return RecruitmentClosure::NotEnoughParticipants { participants };
        }

        let (teams, map) = {
            let mut rng = rand::rng();
            let teams = teams::assign_teams(
                session.participants.iter().copied().collect(),
                limit,
                &mut rng,
            );
            let map =
                teams::pick_map(self.settings.catalog.maps(&session.game), &mut rng).cloned();
            (teams, map)
        };
        session.teams = Some(teams.clone());

        let members: Vec<UserId> = teams
            .first
            .iter()
            .chain(teams.second.iter())
            .copied()
            .collect();
        let rewards = teams::grant_participation_rewards(
            self.ledger.as_ref(),
            &members,
            self.settings.participation_reward,
        )
        .await;

        let distribution = render::distribution(session, &teams, map.as_ref());
        self.post(key.channel_id, &distribution, "team distribution")
            .await;

        let moves = match session.voice_channel_id {
            Some(source) => {
                teams::relocate_members(
                    self.platform.as_ref(),
                    source,
                    &teams,
                    &session.team_labels,
                )
                .await
            }
            None => BatchReport::default(),
        };

        info!(
            game_id = %key,
            first = teams.first.len(),
            second = teams.second.len(),
            rewards_credited = rewards.done(),
            rewards_failed = rewards.failed(),
            members_moved = moves.done(),
            members_not_moved = moves.failed() + moves.skipped(),
            "teams assigned"
        );
        session.record(
            SessionEventType::TeamsAssigned,
            serde_json::json!({
                "teams": teams,
                "map": map.as_ref().map(|map| map.name.clone()),
            }),
        );

        self.open_betting(session).await;

        RecruitmentClosure::TeamsAssigned {
            teams,
            rewards_credited: rewards.done(),
            members_moved: moves.done(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hatori_common::SessionEventType;

    use super::*;
    use crate::{
        ledger::Ledger,
        platform::VoiceChannel,
        test_support::{GAME_CHANNEL, admin, harness, harness_with, member, test_settings},
    };

    async fn started(h: &crate::test_support::Harness) -> SessionKey {
        let snapshot = h
            .engine
            .start_recruitment(GAME_CHANNEL, &admin(1), "Valorant", None)
            .await
            .unwrap();
        SessionKey::new(snapshot.channel_id, snapshot.message_id)
    }

    #[tokio::test]
    async fn start_requires_manager_role() {
        let h = harness();
        let error = h
            .engine
            .start_recruitment(GAME_CHANNEL, &member(1), "Valorant", None)
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::PermissionDenied));
        assert!(h.platform.sent().is_empty());
    }

    #[tokio::test]
    async fn start_posts_announcement_with_join_reaction() {
        let h = harness();
        let key = started(&h).await;

        let announcement = h.platform.message(crate::platform::MessageHandle {
            channel_id: key.channel_id,
            message_id: key.message_id,
        });
        let announcement = announcement.unwrap();
        assert_eq!(announcement.title.as_deref(), Some("Recruitment for Valorant"));
        assert_eq!(announcement.fields[1].value, "Attack");
        assert_eq!(h.platform.reactions_added().len(), 1);

        let error = h
            .engine
            .start_recruitment(GAME_CHANNEL, &admin(2), "cs", None)
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::AlreadyActive { .. }));
    }

    #[tokio::test]
    async fn failed_announcement_releases_channel() {
        let h = harness();
        h.platform.set_fail_sends(true);
        let error = h
            .engine
            .start_recruitment(GAME_CHANNEL, &admin(1), "cs", None)
            .await
            .unwrap_err();
        assert_eq!(error.code(), "EXTERNAL_CALL_FAILED");

        h.platform.set_fail_sends(false);
        started(&h).await;
    }

    #[tokio::test]
    async fn double_join_counts_once() {
        let h = harness();
        let key = started(&h).await;

        assert!(matches!(
            h.engine.join(key, 5).await.unwrap(),
            CommandOutcome::Joined { participants: 1 }
        ));
        assert!(matches!(
            h.engine.join(key, 5).await.unwrap(),
            CommandOutcome::AlreadyJoined
        ));
        assert_eq!(h.engine.snapshot(key).await.unwrap().participants, vec![5]);
    }

    #[tokio::test]
    async fn join_beyond_capacity_is_rejected_and_notified() {
        let mut settings = test_settings();
        settings.max_participants = 3;
        let h = harness_with(settings);
        let key = started(&h).await;
        for user_id in 10..13 {
            h.engine.join(key, user_id).await.unwrap();
        }

        let error = h.engine.join(key, 99).await.unwrap_err();
        assert!(matches!(error, SessionError::CapacityExceeded { limit: 3 }));
        assert_eq!(h.engine.snapshot(key).await.unwrap().participants.len(), 3);
        assert_eq!(h.platform.reactions_removed().len(), 1);
        assert_eq!(h.platform.direct_messages()[0].0, 99);
    }

    #[tokio::test]
    async fn leave_removes_and_rerenders() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();

        assert!(matches!(
            h.engine.leave(key, 5).await.unwrap(),
            CommandOutcome::Left { participants: 1 }
        ));
        assert!(matches!(
            h.engine.leave(key, 5).await.unwrap(),
            CommandOutcome::Ignored
        ));
        let last_edit = h.platform.edits().last().cloned().unwrap();
        assert_eq!(last_edit.1.fields[0].value, "<@6>");
    }

    #[tokio::test]
    async fn only_initiator_or_manager_can_stop() {
        let h = harness();
        let key = started(&h).await;
        let error = h.engine.stop_recruitment(key, &member(5)).await.unwrap_err();
        assert!(matches!(error, SessionError::PermissionDenied));

        let closure = h
            .engine
            .stop_recruitment(key, &member(1))
            .await
            .unwrap();
        assert_eq!(
            closure,
            RecruitmentClosure::NotEnoughParticipants { participants: 0 }
        );
    }

    #[tokio::test]
    async fn too_few_participants_abandons_session() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();

        let closure = h
            .engine
            .close_recruitment(key, CloseTrigger::Manual)
            .await
            .unwrap();
        assert_eq!(
            closure,
            RecruitmentClosure::NotEnoughParticipants { participants: 1 }
        );
        assert!(h.engine.snapshot(key).await.is_none());
        assert_eq!(h.events.count(SessionEventType::SessionAbandoned), 1);
        assert!(matches!(
            h.engine.join(key, 6).await.unwrap_err(),
            SessionError::NotFound
        ));

        started(&h).await;
    }

    #[tokio::test]
    async fn closing_assigns_teams_rewards_and_opens_betting() {
        let h = harness();
        let key = started(&h).await;
        for user_id in [5, 6, 7] {
            h.engine.join(key, user_id).await.unwrap();
        }

        let closure = h
            .engine
            .close_recruitment(key, CloseTrigger::Manual)
            .await
            .unwrap();
        let RecruitmentClosure::TeamsAssigned {
            teams,
            rewards_credited,
            ..
        } = closure
        else {
            panic!("expected teams to be assigned");
        };
        assert_eq!(teams.first.len(), 2);
        assert_eq!(teams.second.len(), 1);
        assert_eq!(rewards_credited, 3);
        for user_id in [5, 6, 7] {
            assert_eq!(h.ledger.balance(user_id).await.unwrap(), 100);
        }

        let snapshot = h.engine.snapshot(key).await.unwrap();
        assert_eq!(snapshot.recruitment, PhaseStatus::Closed(CloseTrigger::Manual));
        assert_eq!(snapshot.betting, PhaseStatus::Open);

        let titles: Vec<Option<String>> = h
            .platform
            .sent()
            .into_iter()
            .map(|(_, content)| content.title)
            .collect();
        assert!(titles.contains(&Some("Teams are ready!".to_string())));
        assert!(titles.contains(&Some("Bets on Valorant".to_string())));
    }

    #[tokio::test]
    async fn deleted_announcement_does_not_block_closing() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();
        h.platform.delete_message(crate::platform::MessageHandle {
            channel_id: key.channel_id,
            message_id: key.message_id,
        });

        let closure = h
            .engine
            .close_recruitment(key, CloseTrigger::Manual)
            .await
            .unwrap();
        assert!(matches!(closure, RecruitmentClosure::TeamsAssigned { .. }));
    }

    #[tokio::test]
    async fn participants_in_source_room_are_moved() {
        let h = harness();
        h.platform.set_voice_rooms(
            500,
            vec![
                VoiceChannel {
                    channel_id: 501,
                    name: "Attack room".to_string(),
                },
                VoiceChannel {
                    channel_id: 502,
                    name: "Defense room".to_string(),
                },
            ],
        );
        h.platform.set_member_voice(5, Some(500));
        h.platform.set_member_voice(6, Some(500));

        let snapshot = h
            .engine
            .start_recruitment(GAME_CHANNEL, &admin(1), "Valorant", Some(500))
            .await
            .unwrap();
        let key = SessionKey::new(snapshot.channel_id, snapshot.message_id);
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();

        let closure = h
            .engine
            .close_recruitment(key, CloseTrigger::Manual)
            .await
            .unwrap();
        assert!(matches!(
            closure,
            RecruitmentClosure::TeamsAssigned {
                members_moved: 2,
                ..
            }
        ));
        let mut destinations: Vec<u64> =
            h.platform.moves().into_iter().map(|(_, to)| to).collect();
        destinations.sort_unstable();
        assert_eq!(destinations, vec![501, 502]);
    }

    #[tokio::test]
    async fn full_recruitment_closes_itself_when_configured() {
        let mut settings = test_settings();
        settings.max_participants = 2;
        settings.close_when_full = true;
        let h = harness_with(settings);
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();

        let snapshot = h.engine.snapshot(key).await.unwrap();
        assert_eq!(snapshot.recruitment, PhaseStatus::Closed(CloseTrigger::Natural));
        assert_eq!(snapshot.betting, PhaseStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn recruitment_times_out() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;

        let snapshot = h.engine.snapshot(key).await.unwrap();
        assert_eq!(snapshot.recruitment, PhaseStatus::Closed(CloseTrigger::Timeout));
        assert_eq!(h.events.count(SessionEventType::RecruitmentClosed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_cancels_the_timeout() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();
        h.engine
            .close_recruitment(key, CloseTrigger::Manual)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;

        assert_eq!(h.events.count(SessionEventType::RecruitmentClosed), 1);
        assert_eq!(h.events.count(SessionEventType::TeamsAssigned), 1);
        assert!(
            !h.engine
                .timers
                .pending(key)
                .await
                .contains(&TimerKind::Recruitment)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn racing_timeout_and_manual_close_transition_once() {
        let h = harness();
        let key = started(&h).await;
        h.engine.join(key, 5).await.unwrap();
        h.engine.join(key, 6).await.unwrap();

        tokio::time::sleep(Duration::from_secs(599)).await;
        let engine = h.engine.clone();
        let manual = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            engine.close_recruitment(key, CloseTrigger::Manual).await
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        manual.await.unwrap().unwrap();

        assert_eq!(h.events.count(SessionEventType::RecruitmentClosed), 1);
        assert_eq!(h.events.count(SessionEventType::BettingOpened), 1);
        let distributions = h
            .platform
            .sent()
            .into_iter()
            .filter(|(_, content)| content.title.as_deref() == Some("Teams are ready!"))
            .count();
        assert_eq!(distributions, 1);
    }

    #[tokio::test]
    async fn random_join_leave_sequence_matches_a_set_model() {
        use rand::{Rng, SeedableRng, rngs::StdRng};

        let h = harness();
        let key = started(&h).await;
        let limit = h.engine.settings.max_participants;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut model = BTreeSet::new();

        for _ in 0..400 {
            let user_id: UserId = rng.random_range(2..20);
            if rng.random_bool(0.6) {
                let result = h.engine.join(key, user_id).await;
                if model.contains(&user_id) {
                    assert!(matches!(result, Ok(CommandOutcome::AlreadyJoined)));
                } else if model.len() >= limit {
                    assert!(matches!(result, Err(SessionError::CapacityExceeded { .. })));
                } else {
                    model.insert(user_id);
                    let Ok(CommandOutcome::Joined { participants }) = result else {
                        panic!("join of {user_id} should have been accepted");
                    };
                    assert_eq!(participants, model.len());
                }
            } else {
                let result = h.engine.leave(key, user_id).await.unwrap();
                if model.remove(&user_id) {
                    assert!(matches!(result, CommandOutcome::Left { participants } if participants == model.len()));
                } else {
                    assert!(matches!(result, CommandOutcome::Ignored));
                }
            }

            let snapshot = h.engine.snapshot(key).await.unwrap();
            assert!(snapshot.participants.len() <= limit);
            assert_eq!(
                snapshot.participants,
                model.iter().copied().collect::<Vec<_>>()
            );
        }
    }

    #[tokio::test]
    async fn concurrent_joins_stop_at_capacity() {
        let h = harness();
        let key = started(&h).await;

        let mut tasks = Vec::new();
        for user_id in 2..30 {
            let engine = h.engine.clone();
            tasks.push(tokio::spawn(async move { engine.join(key, user_id).await.is_ok() }));
        }
        let mut joined = 0;
        for task in tasks {
            if task.await.unwrap() {
                joined += 1;
            }
        }

        let limit = h.engine.settings.max_participants;
        assert_eq!(joined, limit);
        assert_eq!(h.engine.snapshot(key).await.unwrap().participants.len(), limit);
        assert_eq!(h.events.count(SessionEventType::ParticipantJoined), limit);
    }
}
