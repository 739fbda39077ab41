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

//! Resolving a session: parimutuel payouts, refunds and the game backstop.

use std::time::Duration;

use hatori_common::{Actor, BetRecord, SessionEventType, SessionKey, Side, format_currency};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    betting::BetTotals,
    engine::SessionEngine,
    errors::SessionError,
    platform::MessageContent,
    render::{self, SummaryStatus},
    session::{CloseTrigger, PhaseStatus, RefundCause, Session, SessionOutcome},
    timers::TimerKind,
};

/// Delay before the game backstop tries again after the ledger was unreachable.
pub const BACKSTOP_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Delay between attempts to apply credits that failed to commit.
pub const SETTLEMENT_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub bet: BetRecord,
    pub credit: i64,
}

/// Credits to apply, one per bet record. Zero-credit entries still delete the
/// record, which is how losing stakes are forfeited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayoutPlan {
    pub pot: i64,
    pub winner_pool: i64,
    pub payouts: Vec<Payout>,
}

impl PayoutPlan {
    pub fn total_credit(&self) -> i64 {
        self.payouts.iter().map(|payout| payout.credit).sum()
    }
}

/// Parimutuel split: each winning bet gets `floor(amount * pot / winner_pool)`.
/// The rounding remainder stays undistributed.
pub fn plan_win(bets: &[BetRecord], winner: Side) -> PayoutPlan {
    let totals = BetTotals::from_bets(bets);
    let pot = totals.grand_total();
    let winner_pool = totals.side(winner).total;

    let payouts = bets
        .iter()
        .map(|bet| {
            let credit = if bet.side == winner && winner_pool > 0 {
                let share = i128::from(bet.amount) * i128::from(pot) / i128::from(winner_pool);
                i64::try_from(share).unwrap_or(i64::MAX)
            } else {
                0
            };
            Payout {
                bet: bet.clone(),
                credit,
            }
        })
        .collect();

    PayoutPlan {
        pot,
        winner_pool,
        payouts,
    }
}

pub fn plan_refund(bets: &[BetRecord]) -> PayoutPlan {
    let pot = BetTotals::from_bets(bets).grand_total();
    PayoutPlan {
        pot,
        winner_pool: pot,
        payouts: bets
            .iter()
            .map(|bet| Payout {
                bet: bet.clone(),
                credit: bet.amount,
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementKind {
    NoBets,
    NoWinningBets,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub game_id: String,
    pub kind: SettlementKind,
    pub winner: Option<Side>,
    pub winner_label: Option<String>,
    pub pot: i64,
    pub paid_out: i64,
    pub settled_bets: usize,
    /// Bet ids whose credit has not committed yet; their records are kept.
    pub failed_bets: Vec<String>,
}

impl SettlementReport {
    pub fn notice(&self) -> String {
        let headline = match &self.winner_label {
            Some(label) => format!("🏆 {label} won! "),
            None => String::new(),
        };
        let body = match self.kind {
            SettlementKind::NoBets => "No bets were placed.".to_string(),
            SettlementKind::NoWinningBets => format!(
                "Nobody bet on the winning side, {} stays with the house.",
                format_currency(self.pot)
            ),
            SettlementKind::Paid => format!(
                "{} paid out from a pot of {}.",
                format_currency(self.paid_out),
                format_currency(self.pot)
            ),
            SettlementKind::Refunded => format!(
                "All bets refunded, {} returned.",
                format_currency(self.paid_out)
            ),
        };
        let mut notice = format!("{headline}{body}");
        if !self.failed_bets.is_empty() {
            notice.push_str(&format!(
                " {} bet(s) could not be settled yet and will be retried.",
                self.failed_bets.len()
            ));
        }
        notice
    }
}

#[derive(Debug, Clone, Copy)]
enum Resolution {
    Win(Side),
    Refund(RefundCause),
}

/// Credits a ledger failure left unapplied. The finished session keeps them,
/// and stays registered, until every one has committed.
#[derive(Debug)]
pub(crate) struct UnsettledPayouts {
    report: SettlementReport,
    payouts: Vec<Payout>,
    attempts: u32,
}

impl SessionEngine {
    pub async fn declare_winner(
        &self,
        key: SessionKey,
        actor: &Actor,
        side: Side,
    ) -> Result<SettlementReport, SessionError> {
        self.require_privileged(actor)?;
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() {
            return Err(SessionError::NotFound);
        }
        if !session.betting.is_closed() {
            return Err(SessionError::InvalidPhase {
                phase: session.phase_name(),
            });
        }
        let bets = self.load_bets(&session).await?;

        let status = SummaryStatus::Custom(format!("{} won!", session.team_label(side)));
        let report = self
            .resolve(&mut session, &bets, Resolution::Win(side), status)
            .await;
        self.release(session).await;
        report
    }

    /// Admin refund, available while betting is open and after it closed.
    pub async fn refund(
        &self,
        key: SessionKey,
        actor: &Actor,
    ) -> Result<SettlementReport, SessionError> {
        self.require_privileged(actor)?;
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() {
            return Err(SessionError::NotFound);
        }
        if session.betting == PhaseStatus::NotStarted {
            return Err(SessionError::InvalidPhase {
                phase: session.phase_name(),
            });
        }
        let bets = self.load_bets(&session).await?;

        let status = SummaryStatus::Custom("Bets refunded by an administrator.".to_string());
        if session.betting.is_open() {
            self.stop_betting(&mut session, CloseTrigger::Manual, status.clone())
                .await;
        }
        let report = self
            .resolve(
                &mut session,
                &bets,
                Resolution::Refund(RefundCause::Admin),
                status,
            )
            .await;
        self.release(session).await;
        report
    }

    /// Game backstop. Returns `None` when the session was already resolved.
    pub async fn expire_game(
        &self,
        key: SessionKey,
    ) -> Result<Option<SettlementReport>, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        if session.is_finished() || session.betting == PhaseStatus::NotStarted {
            return Ok(None);
        }
        let bets = match self.load_bets(&session).await {
            Ok(bets) => bets,
            Err(error) => {
                warn!(game_id = %key, error = %error, "game backstop failed, retrying later");
                self.timers
                    .schedule(key, TimerKind::GameDuration, BACKSTOP_RETRY_DELAY)
                    .await;
                return Err(error);
            }
        };

        let status = SummaryStatus::Custom("Game closed automatically. Bets refunded.".to_string());
        if session.betting.is_open() {
            self.stop_betting(&mut session, CloseTrigger::Timeout, status.clone())
                .await;
        }
        let report = self
            .resolve(
                &mut session,
                &bets,
                Resolution::Refund(RefundCause::GameTimeout),
                status,
            )
            .await;
        self.release(session).await;
        report.map(Some)
    }

    /// Apply the credits an earlier settlement could not. Returns the final
    /// report once all of them have committed.
    pub(crate) async fn retry_settlement(
        &self,
        key: SessionKey,
    ) -> Result<Option<SettlementReport>, SessionError> {
        let shared = self.session(key).await?;
        let mut session = shared.lock().await;
        let Some(mut pending) = session.unsettled.take() else {
            return Ok(None);
        };

        pending.attempts += 1;
        pending.report.failed_bets.clear();
        let payouts = std::mem::take(&mut pending.payouts);
        pending.payouts = self
            .apply_payouts(key, payouts, &mut pending.report)
            .await;

        let settled = if pending.payouts.is_empty() {
            info!(game_id = %key, attempts = pending.attempts, "unsettled credits applied");
            self.complete_settlement(&mut session, &pending.report)
                .await;
            Some(pending.report)
        } else {
            self.defer_settlement(&mut session, pending).await;
            None
        };
        self.release(session).await;
        Ok(settled)
    }

    async fn load_bets(&self, session: &Session) -> Result<Vec<BetRecord>, SessionError> {
        self.ledger
            .bets_for_game(&session.game_id)
            .await
            .map_err(SessionError::Ledger)
    }

    /// Finish the session, apply the plan and announce the result.
    async fn resolve(
        &self,
        session: &mut Session,
        bets: &[BetRecord],
        resolution: Resolution,
        status: SummaryStatus,
    ) -> Result<SettlementReport, SessionError> {
        let key = session.key;
        let (plan, outcome, winner) = match resolution {
            Resolution::Win(side) => (
                plan_win(bets, side),
                SessionOutcome::Won { side },
                Some(side),
            ),
            Resolution::Refund(by) => (
                plan_refund(bets),
                SessionOutcome::Refunded { by },
                None,
            ),
        };
        if !session.finish(outcome) {
            return Err(SessionError::NotFound);
        }

        let kind = match resolution {
            _ if bets.is_empty() => SettlementKind::NoBets,
            Resolution::Win(_) if plan.winner_pool == 0 => SettlementKind::NoWinningBets,
            Resolution::Win(_) => SettlementKind::Paid,
            Resolution::Refund(_) => SettlementKind::Refunded,
        };
        info!(
            game_id = %key,
            ?kind,
            pot = plan.pot,
            planned_credit = plan.total_credit(),
            bets = plan.payouts.len(),
            "settling session"
        );
        let mut report = SettlementReport {
            game_id: session.game_id.clone(),
            kind,
            winner,
            winner_label: winner.map(|side| session.team_label(side).to_string()),
            pot: plan.pot,
            paid_out: 0,
            settled_bets: 0,
            failed_bets: Vec::new(),
        };
        let unsettled = self.apply_payouts(key, plan.payouts, &mut report).await;

        self.show_bet_summary(session, &BetTotals::from_bets(bets), &status)
            .await;
        if let Some(handle) = session.winner_view {
            let frozen = render::winner_selection(session).with_controls_disabled();
            self.render(handle, &frozen, "winner selection").await;
        }
        self.post(
            key.channel_id,
            &MessageContent::plain(report.notice()),
            "settlement announcement",
        )
        .await;

        if unsettled.is_empty() {
            self.complete_settlement(session, &report).await;
        } else {
            let pending = UnsettledPayouts {
                report: report.clone(),
                payouts: unsettled,
                attempts: 1,
            };
            self.defer_settlement(session, pending).await;
        }
        Ok(report)
    }

    /// Settle each payout on its own. Returns the ones that failed.
    async fn apply_payouts(
        &self,
        key: SessionKey,
        payouts: Vec<Payout>,
        report: &mut SettlementReport,
    ) -> Vec<Payout> {
        let mut unsettled = Vec::new();
        for payout in payouts {
            match self.ledger.settle_bet(&payout.bet, payout.credit).await {
                Ok(true) => {
                    report.settled_bets += 1;
                    report.paid_out += payout.credit;
                }
                Ok(false) => {
                    debug!(game_id = %key, bet_id = %payout.bet.bet_id, "bet already settled");
                }
                Err(err) => {
                    error!(
                        game_id = %key,
                        bet_id = %payout.bet.bet_id,
                        user_id = payout.bet.user_id,
                        credit = payout.credit,
                        error = %err,
                        "bet settlement failed"
                    );
                    report.failed_bets.push(payout.bet.bet_id.clone());
                    unsettled.push(payout);
                }
            }
        }
        unsettled
    }

    /// Keep the session registered and try the remaining credits again later.
    async fn defer_settlement(&self, session: &mut Session, pending: UnsettledPayouts) {
        let key = session.key;
        warn!(
            game_id = %key,
            unsettled = pending.payouts.len(),
            attempts = pending.attempts,
            retry_seconds = SETTLEMENT_RETRY_DELAY.as_secs(),
            "settlement incomplete, retrying later"
        );
        self.timers.cancel_all(key).await;
        self.timers
            .schedule(key, TimerKind::SettlementRetry, SETTLEMENT_RETRY_DELAY)
            .await;
        session.unsettled = Some(pending);
    }

    async fn complete_settlement(&self, session: &mut Session, report: &SettlementReport) {
        let key = session.key;
        if report.kind != SettlementKind::NoBets {
            if let Err(err) = self.ledger.clear_bets_for_game(&session.game_id).await {
                warn!(game_id = %key, error = %err, "could not clear settled bets");
            }
        }

        self.teardown(key).await;

        info!(
            game_id = %key,
            kind = ?report.kind,
            pot = report.pot,
            paid_out = report.paid_out,
            "session settled"
        );
        let event_type = match report.winner {
            Some(_) => SessionEventType::SessionSettled,
            None => SessionEventType::SessionRefunded,
        };
        session.record(event_type, serde_json::to_value(report).unwrap_or_default());
    }
}
