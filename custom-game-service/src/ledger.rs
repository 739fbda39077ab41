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

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::{
    Client as DynamoClient,
    operation::transact_write_items::TransactWriteItemsError,
    types::{AttributeValue, Delete, Put, TransactWriteItem, Update},
};
use chrono::{DateTime, Utc};
use hatori_common::{BetRecord, Side, UserId};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("balance {balance} is below the stake")]
    InsufficientFunds { balance: i64 },
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Durable per-user balances and bet records.
///
/// Every method is a single atomic step. `stake` and `settle_bet` combine the
/// balance change with the bet record change so neither can be observed alone.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current balance; creates a zero balance row for unknown users.
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64>;
    /// Overwrite a balance. Returns false when the user has no row yet.
    async fn set_balance(&self, user_id: UserId, balance: i64) -> anyhow::Result<bool>;
    /// Atomic upsert-and-add, returning the new balance.
    async fn add_balance(&self, user_id: UserId, delta: i64) -> anyhow::Result<i64>;
    /// Insert a bet record without touching balances.
    async fn create_bet(&self, bet: &BetRecord) -> anyhow::Result<bool>;
    /// Debit `bet.amount` and insert the bet, or do nothing when funds are short.
    /// Returns the balance after the debit.
    async fn stake(&self, bet: &BetRecord) -> Result<i64, StakeError>;
    /// Credit `credit` to the bettor and delete the bet record. Returns false when
    /// the record was already gone, in which case nothing is credited.
    async fn settle_bet(&self, bet: &BetRecord, credit: i64) -> anyhow::Result<bool>;
    async fn bets_for_game(&self, game_id: &str) -> anyhow::Result<Vec<BetRecord>>;
    async fn clear_bets_for_game(&self, game_id: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<UserId, i64>,
    bets: Vec<BetRecord>,
}

/// Process-local ledger. One lock covers balances and bets, which makes every
/// operation serializable.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64> {
        let mut state = self.state.lock().await;
        Ok(*state.balances.entry(user_id).or_insert(0))
    }

    async fn set_balance(&self, user_id: UserId, balance: i64) -> anyhow::Result<bool> {
        anyhow::ensure!(balance >= 0, "balance cannot be negative: {balance}");
        let mut state = self.state.lock().await;
        match state.balances.get_mut(&user_id) {
            Some(current) => {
                *current = balance;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn add_balance(&self, user_id: UserId, delta: i64) -> anyhow::Result<i64> {
        let mut state = self.state.lock().await;
        let current = state.balances.entry(user_id).or_insert(0);
        let next = current
            .checked_add(delta)
            .filter(|value| *value >= 0)
            .with_context(|| format!("balance change {delta} rejected for user {user_id}"))?;
        *current = next;
        Ok(next)
    }

    async fn create_bet(&self, bet: &BetRecord) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state.bets.iter().any(|existing| existing.bet_id == bet.bet_id) {
            return Ok(false);
        }
        state.bets.push(bet.clone());
        Ok(true)
    }

    async fn stake(&self, bet: &BetRecord) -> Result<i64, StakeError> {
        let mut state = self.state.lock().await;
        let balance = *state.balances.entry(bet.user_id).or_insert(0);
        if balance < bet.amount {
            return Err(StakeError::InsufficientFunds { balance });
        }
        let next = balance - bet.amount;
        state.balances.insert(bet.user_id, next);
        state.bets.push(bet.clone());
        Ok(next)
    }

    async fn settle_bet(&self, bet: &BetRecord, credit: i64) -> anyhow::Result<bool> {
        anyhow::ensure!(credit >= 0, "settlement credit cannot be negative: {credit}");
        let mut state = self.state.lock().await;
        let Some(position) = state
            .bets
            .iter()
            .position(|existing| existing.bet_id == bet.bet_id)
        else {
            return Ok(false);
        };
        state.bets.remove(position);
        *state.balances.entry(bet.user_id).or_insert(0) += credit;
        Ok(true)
    }

    async fn bets_for_game(&self, game_id: &str) -> anyhow::Result<Vec<BetRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .bets
            .iter()
            .filter(|bet| bet.game_id == game_id)
            .cloned()
            .collect())
    }

    async fn clear_bets_for_game(&self, game_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.bets.retain(|bet| bet.game_id != game_id);
        Ok(())
    }
}

/// DynamoDB-backed ledger.
///
/// `users` is keyed by `user_id` (N) with a numeric `balance`; `bets` is keyed
/// by `game_id` (S) + `bet_id` (S). Debits and settlements use
/// `TransactWriteItems` so the balance condition and the bet record change
/// commit together.
#[derive(Clone)]
pub struct DynamoLedger {
    client: DynamoClient,
    users_table: String,
    bets_table: String,
}

impl DynamoLedger {
    pub async fn from_env(users_table: String, bets_table: String) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Ok(endpoint) = std::env::var("DYNAMODB_ENDPOINT") {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;
        info!(users_table = %users_table, bets_table = %bets_table, "DynamoDB ledger enabled");
        Self {
            client: DynamoClient::new(&config),
            users_table,
            bets_table,
        }
    }

    fn user_key(user_id: UserId) -> AttributeValue {
        AttributeValue::N(user_id.to_string())
    }

    fn bet_item(bet: &BetRecord) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert("game_id".to_string(), AttributeValue::S(bet.game_id.clone()));
        item.insert("bet_id".to_string(), AttributeValue::S(bet.bet_id.clone()));
        item.insert("user_id".to_string(), Self::user_key(bet.user_id));
        item.insert(
            "side".to_string(),
            AttributeValue::N(bet.side.number().to_string()),
        );
        item.insert("amount".to_string(), AttributeValue::N(bet.amount.to_string()));
        item.insert(
            "created_at".to_string(),
            AttributeValue::S(bet.created_at.to_rfc3339()),
        );
        item
    }

    fn parse_bet(item: &HashMap<String, AttributeValue>) -> anyhow::Result<BetRecord> {
        let string = |name: &str| -> anyhow::Result<String> {
            item.get(name)
                .and_then(|value| value.as_s().ok())
                .cloned()
                .with_context(|| format!("bet item missing string attribute {name}"))
        };
        let number = |name: &str| -> anyhow::Result<String> {
            item.get(name)
                .and_then(|value| value.as_n().ok())
                .cloned()
                .with_context(|| format!("bet item missing numeric attribute {name}"))
        };

        let side = number("side")?
            .parse::<u8>()
            .context("invalid bet side")
            .and_then(|value| Side::try_from(value).map_err(anyhow::Error::msg))?;
        let created_at = DateTime::parse_from_rfc3339(&string("created_at")?)
            .context("invalid bet created_at")?
            .with_timezone(&Utc);

        Ok(BetRecord {
            bet_id: string("bet_id")?,
            user_id: number("user_id")?.parse().context("invalid bet user_id")?,
            game_id: string("game_id")?,
            side,
            amount: number("amount")?.parse().context("invalid bet amount")?,
            created_at,
        })
    }

    fn is_condition_failure(error: &TransactWriteItemsError) -> bool {
        match error {
            TransactWriteItemsError::TransactionCanceledException(canceled) => canceled
                .cancellation_reasons()
                .iter()
                .any(|reason| reason.code() == Some("ConditionalCheckFailed")),
            _ => false,
        }
    }
}

#[async_trait]
impl Ledger for DynamoLedger {
    async fn balance(&self, user_id: UserId) -> anyhow::Result<i64> {
        let output = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("user_id", Self::user_key(user_id))
            .update_expression("SET balance = if_not_exists(balance, :zero)")
            .expression_attribute_values(":zero", AttributeValue::N("0".to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::AllNew)
            .send()
            .await
            .context("failed to read user balance")?;
        output
            .attributes()
            .and_then(|attributes| attributes.get("balance"))
            .and_then(|value| value.as_n().ok())
            .context("balance attribute missing")?
            .parse()
            .context("invalid stored balance")
    }

    async fn set_balance(&self, user_id: UserId, balance: i64) -> anyhow::Result<bool> {
        anyhow::ensure!(balance >= 0, "balance cannot be negative: {balance}");
        let result = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("user_id", Self::user_key(user_id))
            .update_expression("SET balance = :balance")
            .condition_expression("attribute_exists(user_id)")
            .expression_attribute_values(":balance", AttributeValue::N(balance.to_string()))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(service_error).context("failed to set user balance"))
                }
            }
        }
    }

    async fn add_balance(&self, user_id: UserId, delta: i64) -> anyhow::Result<i64> {
        let mut request = self
            .client
            .update_item()
            .table_name(&self.users_table)
            .key("user_id", Self::user_key(user_id))
            .update_expression("ADD balance :delta")
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::UpdatedNew);
        if delta < 0 {
            request = request
                .condition_expression("balance >= :needed")
                .expression_attribute_values(":needed", AttributeValue::N((-delta).to_string()));
        }
        let output = request
            .send()
            .await
            .with_context(|| format!("failed to add {delta} to balance of user {user_id}"))?;
        output
            .attributes()
            .and_then(|attributes| attributes.get("balance"))
            .and_then(|value| value.as_n().ok())
            .context("updated balance missing")?
            .parse()
            .context("invalid stored balance")
    }

    async fn create_bet(&self, bet: &BetRecord) -> anyhow::Result<bool> {
        let result = self
            .client
            .put_item()
            .table_name(&self.bets_table)
            .set_item(Some(Self::bet_item(bet)))
            .condition_expression("attribute_not_exists(bet_id)")
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(error) => {
                let service_error = error.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(service_error).context("failed to put bet item"))
                }
            }
        }
    }

    async fn stake(&self, bet: &BetRecord) -> Result<i64, StakeError> {
        let prior = self.balance(bet.user_id).await?;
        let debit = Update::builder()
            .table_name(&self.users_table)
            .key("user_id", Self::user_key(bet.user_id))
            .update_expression("SET balance = balance - :amount")
            .condition_expression("balance >= :amount")
            .expression_attribute_values(":amount", AttributeValue::N(bet.amount.to_string()))
            .build()
            .context("failed to build stake debit")?;
        let insert = Put::builder()
            .table_name(&self.bets_table)
            .set_item(Some(Self::bet_item(bet)))
            .condition_expression("attribute_not_exists(bet_id)")
            .build()
            .context("failed to build bet insert")?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().update(debit).build())
            .transact_items(TransactWriteItem::builder().put(insert).build())
            .send()
            .await;

        match result {
            Ok(_) => {
                let read = self.balance(bet.user_id).await;
                if let Err(error) = &read {
                    warn!(
                        user_id = bet.user_id,
                        bet_id = %bet.bet_id,
                        error = %error,
                        "stake committed, balance read failed"
                    );
                }
                Ok(committed_stake_balance(read, prior, bet.amount))
            }
            Err(error) => {
                let service_error = error.into_service_error();
                if Self::is_condition_failure(&service_error) {
                    let balance = self.balance(bet.user_id).await?;
                    Err(StakeError::InsufficientFunds { balance })
                } else {
                    Err(StakeError::Failed(
                        anyhow::Error::new(service_error).context("stake transaction failed"),
                    ))
                }
            }
        }
    }

    async fn settle_bet(&self, bet: &BetRecord, credit: i64) -> anyhow::Result<bool> {
        anyhow::ensure!(credit >= 0, "settlement credit cannot be negative: {credit}");
        let remove = Delete::builder()
            .table_name(&self.bets_table)
            .key("game_id", AttributeValue::S(bet.game_id.clone()))
            .key("bet_id", AttributeValue::S(bet.bet_id.clone()))
            .condition_expression("attribute_exists(bet_id)")
            .build()
            .context("failed to build bet delete")?;

        let mut request = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().delete(remove).build());
        if credit > 0 {
            let payout = Update::builder()
                .table_name(&self.users_table)
                .key("user_id", Self::user_key(bet.user_id))
                .update_expression("ADD balance :credit")
                .expression_attribute_values(":credit", AttributeValue::N(credit.to_string()))
                .build()
                .context("failed to build settlement credit")?;
            request = request.transact_items(TransactWriteItem::builder().update(payout).build());
        }

        match request.send().await {
            Ok(_) => Ok(true),
            Err(error) => {
                let service_error = error.into_service_error();
                if Self::is_condition_failure(&service_error) {
                    Ok(false)
                } else {
                    Err(anyhow::Error::new(service_error).context("settlement transaction failed"))
                }
            }
        }
    }

    async fn bets_for_game(&self, game_id: &str) -> anyhow::Result<Vec<BetRecord>> {
        let mut bets = Vec::new();
        let mut start_key: Option<HashMap<String, AttributeValue>> = None;
        loop {
            let output = self
                .client
                .query()
                .table_name(&self.bets_table)
                .key_condition_expression("game_id = :game_id")
                .expression_attribute_values(":game_id", AttributeValue::S(game_id.to_string()))
                .consistent_read(true)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .context("failed to query bets for game")?;
            for item in output.items() {
                bets.push(Self::parse_bet(item)?);
            }
            match output.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        bets.sort_by_key(|bet| bet.created_at);
        Ok(bets)
    }

    async fn clear_bets_for_game(&self, game_id: &str) -> anyhow::Result<()> {
        for bet in self.bets_for_game(game_id).await? {
            self.client
                .delete_item()
                .table_name(&self.bets_table)
                .key("game_id", AttributeValue::S(bet.game_id.clone()))
                .key("bet_id", AttributeValue::S(bet.bet_id.clone()))
                .send()
                .await
                .context("failed to delete bet item")?;
        }
        Ok(())
    }
}

/// Balance reported for a stake whose transaction has committed. The debit is
/// durable, so a failed read falls back to the balance seen before it.
fn committed_stake_balance(read: anyhow::Result<i64>, prior: i64, amount: i64) -> i64 {
    read.unwrap_or(prior - amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_stake_survives_a_failed_balance_read() {
        let read = Err(anyhow::anyhow!("read throttled"));
        assert_eq!(committed_stake_balance(read, 100, 40), 60);
        assert_eq!(committed_stake_balance(Ok(55), 100, 40), 55);
    }

    #[tokio::test]
    async fn balance_defaults_to_zero_and_creates_row() {
        let ledger = InMemoryLedger::new();
        assert!(!ledger.set_balance(7, 10).await.unwrap());
        assert_eq!(ledger.balance(7).await.unwrap(), 0);
        assert!(ledger.set_balance(7, 10).await.unwrap());
        assert_eq!(ledger.balance(7).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn add_balance_upserts_and_refuses_to_go_negative() {
        let ledger = InMemoryLedger::new();
        assert_eq!(ledger.add_balance(1, 100).await.unwrap(), 100);
        assert_eq!(ledger.add_balance(1, -40).await.unwrap(), 60);
        assert!(ledger.add_balance(1, -61).await.is_err());
        assert_eq!(ledger.balance(1).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn stake_debits_and_records_bet() {
        let ledger = InMemoryLedger::new();
        ledger.add_balance(1, 500).await.unwrap();
        let bet = BetRecord::new(1, "10:20", Side::One, 120);

        assert_eq!(ledger.stake(&bet).await.unwrap(), 380);
        assert_eq!(ledger.balance(1).await.unwrap(), 380);
        assert_eq!(ledger.bets_for_game("10:20").await.unwrap(), vec![bet]);
    }

    #[tokio::test]
    async fn stake_above_balance_changes_nothing() {
        let ledger = InMemoryLedger::new();
        ledger.add_balance(1, 50).await.unwrap();
        let bet = BetRecord::new(1, "10:20", Side::Two, 51);

        match ledger.stake(&bet).await {
            Err(StakeError::InsufficientFunds { balance }) => assert_eq!(balance, 50),
            other => panic!("unexpected stake result {other:?}"),
        }
        assert_eq!(ledger.balance(1).await.unwrap(), 50);
        assert!(ledger.bets_for_game("10:20").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_stakes_never_overdraw() {
        let ledger = std::sync::Arc::new(InMemoryLedger::new());
        ledger.add_balance(1, 100).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .stake(&BetRecord::new(1, "10:20", Side::One, 30))
                    .await
                    .is_ok()
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 3);
        assert_eq!(ledger.balance(1).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn settle_bet_credits_once() {
        let ledger = InMemoryLedger::new();
        ledger.add_balance(1, 100).await.unwrap();
        let bet = BetRecord::new(1, "10:20", Side::One, 100);
        ledger.stake(&bet).await.unwrap();

        assert!(ledger.settle_bet(&bet, 250).await.unwrap());
        assert!(!ledger.settle_bet(&bet, 250).await.unwrap());
        assert_eq!(ledger.balance(1).await.unwrap(), 250);
        assert!(ledger.bets_for_game("10:20").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_bets_only_touches_one_game() {
        let ledger = InMemoryLedger::new();
        ledger
            .create_bet(&BetRecord::new(1, "1:1", Side::One, 5))
            .await
            .unwrap();
        ledger
            .create_bet(&BetRecord::new(2, "2:2", Side::Two, 5))
            .await
            .unwrap();

        ledger.clear_bets_for_game("1:1").await.unwrap();

        assert!(ledger.bets_for_game("1:1").await.unwrap().is_empty());
        assert_eq!(ledger.bets_for_game("2:2").await.unwrap().len(), 1);
    }
}
