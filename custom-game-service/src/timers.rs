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

use std::{collections::HashMap, sync::Arc, time::Duration};

use hatori_common::SessionKey;
use serde::Serialize;
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Recruitment,
    Betting,
    GameDuration,
    /// Re-applies credits that a ledger failure left unsettled.
    SettlementRetry,
}

/// Delivered to the dispatcher when a scheduled countdown elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: SessionKey,
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
struct TimerEntry {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TimerTable {
    next_generation: u64,
    entries: HashMap<(SessionKey, TimerKind), TimerEntry>,
}

/// Per-session countdowns keyed by (session, kind).
///
/// Rescheduling or cancelling bumps the entry so a firing that was already in
/// flight no longer matches and [`SessionTimers::claim`] rejects it.
#[derive(Clone)]
pub struct SessionTimers {
    table: Arc<Mutex<TimerTable>>,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl SessionTimers {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            table: Arc::new(Mutex::new(TimerTable::default())),
            fired_tx,
        }
    }

    pub async fn schedule(&self, key: SessionKey, kind: TimerKind, delay: Duration) -> u64 {
        let mut table = self.table.lock().await;
        table.next_generation += 1;
        let generation = table.next_generation;

        let fired_tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired_tx.send(TimerFired {
                key,
                kind,
                generation,
            });
        });

        if let Some(previous) = table
            .entries
            .insert((key, kind), TimerEntry { generation, task })
        {
            previous.task.abort();
        }
        info!(
            game_id = %key,
            ?kind,
            generation,
            delay_seconds = delay.as_secs(),
            "timer scheduled"
        );
        generation
    }

    /// Returns true when a live timer was removed.
    pub async fn cancel(&self, key: SessionKey, kind: TimerKind) -> bool {
        let mut table = self.table.lock().await;
        match table.entries.remove(&(key, kind)) {
            Some(entry) => {
                entry.task.abort();
                debug!(game_id = %key, ?kind, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self, key: SessionKey) {
        let mut table = self.table.lock().await;
        table.entries.retain(|(entry_key, _), entry| {
            if *entry_key == key {
                entry.task.abort();
                false
            } else {
                true
            }
        });
    }

    /// Consume a firing. Only the current generation of a live timer is accepted.
    pub async fn claim(&self, fired: &TimerFired) -> bool {
        let mut table = self.table.lock().await;
        let current = table
            .entries
            .get(&(fired.key, fired.kind))
            .is_some_and(|entry| entry.generation == fired.generation);
        if current {
            table.entries.remove(&(fired.key, fired.kind));
        }
        current
    }

    pub async fn pending(&self, key: SessionKey) -> Vec<TimerKind> {
        let table = self.table.lock().await;
        table
            .entries
            .keys()
            .filter(|(entry_key, _)| *entry_key == key)
            .map(|(_, kind)| *kind)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::new(10, 20)
    }

    #[tokio::test(start_paused = true)]
    async fn fired_timer_is_claimed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = SessionTimers::new(tx);
        timers
            .schedule(key(), TimerKind::Recruitment, Duration::from_secs(600))
            .await;

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Recruitment);
        assert!(timers.claim(&fired).await);
        assert!(!timers.claim(&fired).await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timers = SessionTimers::new(tx);
        timers
            .schedule(key(), TimerKind::Betting, Duration::from_secs(180))
            .await;
        assert!(timers.cancel(key(), TimerKind::Betting).await);
        assert!(!timers.cancel(key(), TimerKind::Betting).await);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generation_is_rejected_after_reschedule() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let timers = SessionTimers::new(tx);
        let first = timers
            .schedule(key(), TimerKind::GameDuration, Duration::from_secs(10))
            .await;
        let second = timers
            .schedule(key(), TimerKind::GameDuration, Duration::from_secs(10))
            .await;
        assert!(second > first);

        let stale = TimerFired {
            key: key(),
            kind: TimerKind::GameDuration,
            generation: first,
        };
        assert!(!timers.claim(&stale).await);
        assert_eq!(timers.pending(key()).await, vec![TimerKind::GameDuration]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_only_touches_one_session() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let timers = SessionTimers::new(tx);
        let other = SessionKey::new(11, 21);
        timers
            .schedule(key(), TimerKind::Betting, Duration::from_secs(5))
            .await;
        timers
            .schedule(key(), TimerKind::GameDuration, Duration::from_secs(5))
            .await;
        timers
            .schedule(other, TimerKind::Betting, Duration::from_secs(5))
            .await;

        timers.cancel_all(key()).await;
        assert!(timers.pending(key()).await.is_empty());
        assert_eq!(timers.pending(other).await, vec![TimerKind::Betting]);
    }
}
