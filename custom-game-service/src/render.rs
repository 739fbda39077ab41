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

//! Message content for every surface a session posts or edits.

use std::{collections::BTreeSet, time::Duration};

use hatori_common::{ALL_SIDES, GameMap, JOIN_REACTION, Side, UserId, format_currency, mention};

use crate::{
    betting::BetTotals,
    platform::{Control, ControlAction, Field, MessageContent, Tone},
    session::{Session, Teams},
};

fn control(action: ControlAction, label: impl Into<String>) -> Control {
    Control {
        action,
        label: label.into(),
        disabled: false,
    }
}

fn field(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Field {
    Field {
        name: name.into(),
        value: value.into(),
        inline,
    }
}

fn mention_list(user_ids: &[UserId]) -> String {
    if user_ids.is_empty() {
        return "-".to_string();
    }
    user_ids
        .iter()
        .map(|user_id| mention(*user_id))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn recruitment_announcement(
    game: &str,
    team_labels: &[String; 2],
    participants: &BTreeSet<UserId>,
    limit: usize,
) -> MessageContent {
    let participants_field = if participants.is_empty() {
        field("Participants", "-", false)
    } else {
        let mut lines: Vec<String> = participants
            .iter()
            .take(limit)
            .map(|user_id| mention(*user_id))
            .collect();
        if participants.len() > limit {
            lines.push(format!("... and {} more", participants.len() - limit));
        }
        field(
            format!("Participants ({})", participants.len()),
            lines.join("\n"),
            false,
        )
    };

    MessageContent {
        title: Some(format!("Recruitment for {game}")),
        description: Some(format!("React with {JOIN_REACTION} to join.")),
        tone: Some(Tone::Info),
        fields: vec![
            participants_field,
            field("Team 1", team_labels[0].clone(), true),
            field("Team 2", team_labels[1].clone(), true),
        ],
        footer: Some(format!("Participant limit: {limit}")),
        controls: vec![control(ControlAction::StopRecruitment, "Stop recruitment")],
        ..MessageContent::default()
    }
}

pub fn recruitment_for(session: &Session, limit: usize) -> MessageContent {
    recruitment_announcement(
        &session.game,
        &session.team_labels,
        &session.participants,
        limit,
    )
}

pub fn not_enough_participants(game: &str) -> MessageContent {
    MessageContent {
        title: Some(format!("Recruitment for {game}")),
        description: Some("Not enough participants to start the game.".to_string()),
        tone: Some(Tone::Danger),
        ..MessageContent::default()
    }
}

pub fn distribution(session: &Session, teams: &Teams, map: Option<&GameMap>) -> MessageContent {
    let mut content = MessageContent {
        title: Some("Teams are ready!".to_string()),
        description: Some(format!("Game: {}", session.game)),
        tone: Some(Tone::Success),
        fields: ALL_SIDES
            .iter()
            .map(|side| {
                field(
                    session.team_label(*side),
                    mention_list(teams.members(*side)),
                    true,
                )
            })
            .collect(),
        ..MessageContent::default()
    };
    if let Some(map) = map {
        content.image_url = Some(map.image_url.clone());
        content.footer = Some(format!("Map: {}", map.name));
    }
    content
}

pub fn bet_panel(session: &Session, window: Duration) -> MessageContent {
    let minutes = (window.as_secs() / 60).max(1);
    let mut controls: Vec<Control> = ALL_SIDES
        .iter()
        .map(|side| {
            control(
                ControlAction::PlaceBet { side: *side },
                format!("Bet on {}", session.team_label(*side)),
            )
        })
        .collect();
    controls.push(control(ControlAction::CloseBetting, "Close betting"));
    controls.push(control(ControlAction::Refund, "Refund bets"));

    MessageContent {
        title: Some(format!("Bets on {}", session.game)),
        description: Some(format!(
            "**{}** vs **{}**\n\nBetting is open for {minutes} minute{}.",
            session.team_label(Side::One),
            session.team_label(Side::Two),
            if minutes == 1 { "" } else { "s" },
        )),
        tone: Some(Tone::Gold),
        controls,
        ..MessageContent::default()
    }
}

/// Status line of the live odds summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryStatus {
    Open,
    Closed,
    Custom(String),
}

pub fn bet_summary(
    game: &str,
    team_labels: &[String; 2],
    totals: &BetTotals,
    status: &SummaryStatus,
) -> MessageContent {
    let description = match status {
        SummaryStatus::Open => "Betting is open.".to_string(),
        SummaryStatus::Closed => "Betting is closed.".to_string(),
        SummaryStatus::Custom(text) => text.clone(),
    };

    let mut fields = vec![field(
        "Total staked",
        format_currency(totals.grand_total()),
        false,
    )];
    for side in ALL_SIDES {
        let side_totals = totals.side(side);
        let value = match totals.coefficient(side) {
            Some(coefficient) => format!(
                "Bets: {}\nTotal: {}\nCoefficient: {coefficient:.2}",
                side_totals.count,
                format_currency(side_totals.total),
            ),
            None => "No bets".to_string(),
        };
        fields.push(field(team_labels[side.index()].clone(), value, true));
    }

    MessageContent {
        title: Some(format!("Bets on {game}")),
        description: Some(description),
        tone: Some(if *status == SummaryStatus::Open {
            Tone::Gold
        } else {
            Tone::Muted
        }),
        fields,
        ..MessageContent::default()
    }
}

pub fn winner_selection(session: &Session) -> MessageContent {
    let mut controls: Vec<Control> = ALL_SIDES
        .iter()
        .map(|side| {
            control(
                ControlAction::DeclareWinner { side: *side },
                format!("{} won", session.team_label(*side)),
            )
        })
        .collect();
    controls.push(control(ControlAction::Refund, "Refund all bets"));
    MessageContent {
        text: Some("Betting is closed. Choose the outcome:".to_string()),
        controls,
        ..MessageContent::default()
    }
}
