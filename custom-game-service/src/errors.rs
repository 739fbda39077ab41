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

use hatori_common::{ChannelId, format_currency};
use thiserror::Error;

/// Why a session command was rejected.
///
/// Everything except [`SessionError::Ledger`] and [`SessionError::ExternalCallFailed`]
/// is a user-facing rejection that leaves session and ledger state untouched.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a custom game is already running in channel {channel_id}")]
    AlreadyActive { channel_id: ChannelId },
    #[error("participant limit of {limit} reached")]
    CapacityExceeded { limit: usize },
    #[error("betting is closed")]
    BettingClosed,
    #[error("invalid bet amount: {input}")]
    InvalidAmount { input: String },
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error("session not found")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("action is not available while the session is {phase}")]
    InvalidPhase { phase: &'static str },
    #[error("external call failed: {0:#}")]
    ExternalCallFailed(anyhow::Error),
    #[error("ledger failure: {0:#}")]
    Ledger(anyhow::Error),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::AlreadyActive { .. } => "ALREADY_ACTIVE",
            SessionError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            SessionError::BettingClosed => "BETTING_CLOSED",
            SessionError::InvalidAmount { .. } => "INVALID_AMOUNT",
            SessionError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SessionError::NotFound => "NOT_FOUND",
            SessionError::PermissionDenied => "PERMISSION_DENIED",
            SessionError::InvalidPhase { .. } => "INVALID_PHASE",
            SessionError::ExternalCallFailed(_) => "EXTERNAL_CALL_FAILED",
            SessionError::Ledger(_) => "LEDGER_FAILURE",
        }
    }

    /// Rejections are answered to the acting user; the rest are infrastructure failures.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            SessionError::ExternalCallFailed(_) | SessionError::Ledger(_)
        )
    }

    /// Text shown to the member whose action was rejected.
    pub fn notice(&self) -> String {
        match self {
            SessionError::AlreadyActive { .. } => {
                "A custom game recruitment is already running in this channel.".to_string()
            }
            SessionError::CapacityExceeded { limit } => {
                format!("The participant limit ({limit}) has been reached.")
            }
            SessionError::BettingClosed => "Betting is already closed.".to_string(),
            SessionError::InvalidAmount { .. } => {
                "Please enter a positive whole number.".to_string()
            }
            SessionError::InsufficientFunds { balance, .. } => format!(
                "Not enough funds for this bet. You have {}.",
                format_currency(*balance)
            ),
            SessionError::NotFound => "This session has already ended.".to_string(),
            SessionError::PermissionDenied => "You do not have permission to do that.".to_string(),
            SessionError::InvalidPhase { .. } => {
                "This action is not available right now.".to_string()
            }
            SessionError::ExternalCallFailed(_) | SessionError::Ledger(_) => {
                "Something went wrong, please try again later.".to_string()
            }
        }
    }
}
