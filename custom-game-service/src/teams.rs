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

use hatori_common::{ALL_SIDES, ChannelId, GameMap, UserId};
use rand::{
    Rng,
    seq::{IndexedRandom, SliceRandom},
};
use tracing::{debug, warn};

use crate::{
    ledger::Ledger,
    platform::{MessagingPlatform, VoiceChannel},
    session::Teams,
};

/// Shuffle once, then split in order.
pub fn assign_teams<R: Rng + ?Sized>(
    mut participants: Vec<UserId>,
    capacity: usize,
    rng: &mut R,
) -> Teams {
    participants.shuffle(rng);
    split_in_order(participants, capacity)
}

/// Truncate to `capacity`; even positions go to the first team, odd to the second.
pub fn split_in_order(mut order: Vec<UserId>, capacity: usize) -> Teams {
    order.truncate(capacity);
    let mut teams = Teams {
        first: Vec::with_capacity(order.len().div_ceil(2)),
        second: Vec::with_capacity(order.len() / 2),
    };
    for (index, user_id) in order.into_iter().enumerate() {
        if index % 2 == 0 {
            teams.first.push(user_id);
        } else {
            teams.second.push(user_id);
        }
    }
    teams
}

pub fn pick_map<'a, R: Rng + ?Sized>(maps: &'a [GameMap], rng: &mut R) -> Option<&'a GameMap> {
    maps.choose(rng)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Done,
    Skipped(&'static str),
    Failed(String),
}

/// Per-member results of a best-effort batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub items: Vec<(UserId, ItemOutcome)>,
}

impl BatchReport {
    fn push(&mut self, user_id: UserId, outcome: ItemOutcome) {
        self.items.push((user_id, outcome));
    }

    pub fn done(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Done))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, ItemOutcome::Skipped(_)))
    }

    fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items
            .iter()
            .filter(|(_, outcome)| predicate(outcome))
            .count()
    }
}

pub async fn grant_participation_rewards(
    ledger: &dyn Ledger,
    members: &[UserId],
    reward: i64,
) -> BatchReport {
    let mut report = BatchReport::default();
    for &user_id in members {
        if reward <= 0 {
            report.push(user_id, ItemOutcome::Skipped("no reward configured"));
            continue;
        }
        match ledger.add_balance(user_id, reward).await {
            Ok(balance) => {
                debug!(user_id, reward, balance, "participation reward credited");
                report.push(user_id, ItemOutcome::Done);
            }
            Err(error) => {
                warn!(user_id, reward, error = %error, "participation reward failed");
                report.push(user_id, ItemOutcome::Failed(format!("{error:#}")));
            }
        }
    }
    report
}

/// First room whose name contains `label`, ignoring case.
pub fn find_team_room<'a>(rooms: &'a [VoiceChannel], label: &str) -> Option<&'a VoiceChannel> {
    let needle = label.to_lowercase();
    rooms
        .iter()
        .find(|room| room.name.to_lowercase().contains(&needle))
}

/// Move members still sitting in `source` into their team rooms.
pub async fn relocate_members(
    platform: &dyn MessagingPlatform,
    source: ChannelId,
    teams: &Teams,
    labels: &[String; 2],
) -> BatchReport {
    let mut report = BatchReport::default();
    let everyone = || teams.first.iter().chain(teams.second.iter()).copied();

    let rooms = match platform.sibling_voice_channels(source).await {
        Ok(rooms) => rooms,
        Err(error) => {
            warn!(source, error = %error, "could not list team voice rooms");
            for user_id in everyone() {
                report.push(user_id, ItemOutcome::Skipped("voice rooms unavailable"));
            }
            return report;
        }
    };

    let targets = ALL_SIDES.map(|side| find_team_room(&rooms, &labels[side.index()]));
    if targets.iter().any(Option::is_none) {
        debug!(source, "team voice rooms not found, skipping relocation");
        for user_id in everyone() {
            report.push(user_id, ItemOutcome::Skipped("team room missing"));
        }
        return report;
    }

    for side in ALL_SIDES {
        let Some(target) = targets[side.index()] else {
            continue;
        };
        for &user_id in teams.members(side) {
            let outcome = match platform.member_voice_channel(user_id).await {
                Ok(Some(current)) if current == source => {
                    match platform.move_member(user_id, target.channel_id).await {
                        Ok(()) => ItemOutcome::Done,
                        Err(error) => {
                            warn!(user_id, destination = target.channel_id, error = %error, "voice move failed");
                            ItemOutcome::Failed(error.to_string())
                        }
                    }
                }
                Ok(_) => ItemOutcome::Skipped("not in the source room"),
                Err(error) => {
                    warn!(user_id, error = %error, "voice state lookup failed");
                    ItemOutcome::Failed(error.to_string())
                }
            };
            report.push(user_id, outcome);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use rand::{SeedableRng, rngs::StdRng};

    use super::*;
    use crate::{ledger::InMemoryLedger, test_support::FakePlatform};

    const A: UserId = 1;
    const B: UserId = 2;
    const C: UserId = 3;

    #[test]
    fn split_alternates_in_shuffled_order() {
        let teams = split_in_order(vec![B, A, C], 10);
        assert_eq!(teams.first, vec![B, C]);
        assert_eq!(teams.second, vec![A]);
    }

    #[test]
    fn split_truncates_to_capacity() {
        let teams = split_in_order((1..=13).collect(), 10);
        assert_eq!(teams.first.len() + teams.second.len(), 10);
        assert!(!teams.first.contains(&11) && !teams.second.contains(&11));
    }

    #[test]
    fn shuffled_split_is_balanced_and_complete() {
        let mut rng = StdRng::seed_from_u64(7);
        for count in 2..=12u64 {
            let participants: Vec<UserId> = (1..=count).collect();
            let teams = assign_teams(participants.clone(), 10, &mut rng);
            assert!(teams.first.len().abs_diff(teams.second.len()) <= 1);

            let union: BTreeSet<UserId> =
                teams.first.iter().chain(teams.second.iter()).copied().collect();
            assert_eq!(union.len(), teams.first.len() + teams.second.len());
            assert_eq!(union.len(), participants.len().min(10));
            assert!(union.iter().all(|user_id| participants.contains(user_id)));
        }
    }

    #[test]
    fn map_pick_handles_empty_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pick_map(&[], &mut rng).is_none());
        let maps = hatori_common::valorant_maps();
        assert!(pick_map(&maps, &mut rng).is_some());
    }

    #[tokio::test]
    async fn rewards_are_credited_per_member() {
        let ledger = InMemoryLedger::new();
        let report = grant_participation_rewards(&ledger, &[A, B], 100).await;
        assert_eq!(report.done(), 2);
        assert_eq!(ledger.balance(A).await.unwrap(), 100);
        assert_eq!(ledger.balance(B).await.unwrap(), 100);
    }

    #[test]
    fn team_room_match_is_case_insensitive_substring() {
        let rooms = vec![
            VoiceChannel {
                channel_id: 1,
                name: "Lobby".to_string(),
            },
            VoiceChannel {
                channel_id: 2,
                name: "🔴 ATTACK side".to_string(),
            },
        ];
        assert_eq!(find_team_room(&rooms, "Attack").map(|room| room.channel_id), Some(2));
        assert!(find_team_room(&rooms, "Defense").is_none());
    }

    #[tokio::test]
    async fn relocation_moves_only_members_in_source_room() {
        let platform = FakePlatform::default();
        platform.set_voice_rooms(
            50,
            vec![
                VoiceChannel {
                    channel_id: 51,
                    name: "Attack".to_string(),
                },
                VoiceChannel {
                    channel_id: 52,
                    name: "Defense".to_string(),
                },
            ],
        );
        platform.set_member_voice(A, Some(50));
        platform.set_member_voice(B, Some(99));
        platform.fail_moves_for(C);
        platform.set_member_voice(C, Some(50));

        let teams = Teams {
            first: vec![A, B],
            second: vec![C],
        };
        let labels = ["Attack".to_string(), "Defense".to_string()];
        let report = relocate_members(&platform, 50, &teams, &labels).await;

        assert_eq!(report.done(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(platform.moves(), vec![(A, 51)]);
    }

    #[tokio::test]
    async fn relocation_skips_everyone_without_team_rooms() {
        let platform = FakePlatform::default();
        platform.set_member_voice(A, Some(50));
        let teams = Teams {
            first: vec![A],
            second: vec![B],
        };
        let labels = ["Radiant".to_string(), "Dire".to_string()];
        let report = relocate_members(&platform, 50, &teams, &labels).await;
        assert_eq!(report.skipped(), 2);
        assert!(platform.moves().is_empty());
    }
}
