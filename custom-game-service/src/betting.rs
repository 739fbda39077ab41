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

use hatori_common::{BetRecord, SessionEventType, SessionKey, Side, UserId};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    engine::{CommandOutcome, SessionEngine},
    errors::SessionError,
    ledger::StakeError,
    render::{self, SummaryStatus},
    session::{CloseTrigger, PhaseStatus, Session},
    timers::TimerKind,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SideTotals {
    pub count: usize,
    pub total: i64,
}

/// Per-side bet counts and stakes for one game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BetTotals {
    sides: [SideTotals; 2],
}

impl BetTotals {
    pub fn from_bets(bets: &[BetRecord]) -> Self {
        let mut totals = Self::default();
        for bet in bets {
            let side = &mut totals.sides[bet.side.index()];
            side.count += 1;
            side.total = side.total.saturating_add(bet.amount);
        }
        totals
    }

    pub fn side(&self, side: Side) -> SideTotals {
        self.sides[side.index()]
    }

    pub fn grand_total(&self) -> i64 {
        self.sides[0].total.saturating_add(self.sides[1].total)
    }

    /// `grand / side`, or `None` when nobody has staked on `side`.
    pub fn coefficient(&self, side: Side) -> Option<f64> {
        let side_total = self.side(side).total;
        if side_total <= 0 {
            return None;
        }
        Some(self.grand_total() as f64 / side_total as f64)
    }
}

/// Parse what the bettor typed. Only positive whole numbers are stakes.
pub fn parse_amount(raw: &str) -> Result<i64, SessionError> {
    let invalid = || SessionError::InvalidAmount {
        input: raw.to_string(),
    };
    let amount = raw.trim().parse::<i64>().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }
    Ok(amount)
}

impl SessionEngine {
    pub(crate) async fn open_betting(&self, session: &mut Session) {
        let key = session.key;
        session.betting = PhaseStatus::Open;

        let panel = render::bet_panel(session, self.settings.bet_collection_timeout);
        session.bet_view = self.post(key.channel_id, &panel, "bet panel").await;
        self.refresh_bet_summary(session, SummaryStatus::Open).await;

        self.timers
            .schedule(key, TimerKind::Betting, self.settings.bet_collection_timeout)
            .await;
        self.timers
            .schedule(
                key,
                TimerKind::GameDuration,
                self.settings.game_duration_timeout,
            )
            .await;

        info!(game_id = %key, "betting opened");
        session.record(
            SessionEventType::BettingOpened,
            serde_json::json!({
                "bet_window_seconds": self.settings.bet_collection_timeout.as_secs(),
                "game_timeout_seconds": self.settings.game_duration_timeout.as_secs(),
            }),
        );
    }

    /// Stake `raw_amount` on `side`. The balance check and the debit are one
    /// ledger step, and the session lock keeps the phase from closing mid-way.
    pub async fn place_bet(
        &self,
        key: SessionKey,
        user_id: UserId,
        side: Side,
        raw_amount: &str,
    ) -> Result<CommandOutcome, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() || !session.betting.is_open() {
            return Err(SessionError::BettingClosed);
        }
        let amount = parse_amount(raw_amount)?;

        let bet = BetRecord::new(user_id, session.game_id.clone(), side, amount);
        let balance = match self.ledger.stake(&bet).await {
            Ok(balance) => balance,
            Err(StakeError::InsufficientFunds { balance }) => {
                return Err(SessionError::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
            Err(StakeError::Failed(error)) => {
                warn!(game_id = %key, user_id, amount, error = %error, "bet placement failed");
                return Err(SessionError::Ledger(error));
            }
        };

        info!(game_id = %key, user_id, %side, amount, balance, "bet placed");
        self.refresh_bet_summary(&mut session, SummaryStatus::Open)
            .await;
        session.record(
            SessionEventType::BetPlaced,
            serde_json::json!({
                "bet_id": bet.bet_id,
                "user_id": user_id,
                "side": side,
                "amount": amount,
            }),
        );

        let side_label = session.team_label(side).to_string();
        self.release(session).await;
        Ok(CommandOutcome::BetPlaced {
            side_label,
            bet,
            balance,
        })
    }

    /// Close an open betting window and present the winner selection.
    /// Returns false when betting was not open.
    pub async fn close_betting(
        &self,
        key: SessionKey,
        trigger: CloseTrigger,
    ) -> Result<bool, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() || !session.betting.is_open() {
            return Ok(false);
        }

        self.stop_betting(&mut session, trigger, SummaryStatus::Closed)
            .await;
        let selection = render::winner_selection(&session);
        session.winner_view = self
            .post(key.channel_id, &selection, "winner selection")
            .await;
        self.release(session).await;
        Ok(true)
    }

    /// Flip betting to closed, freeze the stake controls and update the summary.
    pub(crate) async fn stop_betting(
        &self,
        session: &mut Session,
        trigger: CloseTrigger,
        status: SummaryStatus,
    ) {
        let key = session.key;
        session.betting = PhaseStatus::Closed(trigger);
        self.timers.cancel(key, TimerKind::Betting).await;

        if let Some(handle) = session.bet_view {
            let frozen = render::bet_panel(session, self.settings.bet_collection_timeout)
                .with_controls_disabled();
            self.render(handle, &frozen, "bet panel").await;
        }
        self.refresh_bet_summary(session, status).await;

        info!(game_id = %key, ?trigger, "betting closed");
        session.record(
            SessionEventType::BettingClosed,
            serde_json::json!({"trigger": trigger}),
        );
    }

    pub(crate) async fn refresh_bet_summary(&self, session: &mut Session, status: SummaryStatus) {
        if self.settings.bets_channel_id.is_none() {
            return;
        }
        match self.ledger.bets_for_game(&session.game_id).await {
            Ok(bets) => {
                self.show_bet_summary(session, &BetTotals::from_bets(&bets), &status)
                    .await;
            }
            Err(error) => {
                warn!(game_id = %session.key, error = %error, "could not load bets for summary");
            }
        }
    }

    /// Create the odds summary on first use and edit it afterwards.
    pub(crate) async fn show_bet_summary(
        &self,
        session: &mut Session,
        totals: &BetTotals,
        status: &SummaryStatus,
    ) {
        let Some(channel_id) = self.settings.bets_channel_id else {
            return;
        };
        let content = render::bet_summary(&session.game, &session.team_labels, totals, status);
        match session.bet_summary {
            Some(handle) => {
                self.render(handle, &content, "bet summary").await;
            }
            None => {
                session.bet_summary = self.post(channel_id, &content, "bet summary").await;
            }
        }
    }
}
