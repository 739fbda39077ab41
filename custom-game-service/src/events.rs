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

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hatori_common::SessionEvent;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
};

#[async_trait]
pub trait SessionEventPublisher: Send + Sync {
    async fn publish(&self, event: &SessionEvent) -> anyhow::Result<()>;
}

pub struct NoopSessionEventPublisher;

#[async_trait]
impl SessionEventPublisher for NoopSessionEventPublisher {
    async fn publish(&self, _event: &SessionEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct KafkaSessionEventPublisher {
    producer: FutureProducer,
    topic: String,
}

impl KafkaSessionEventPublisher {
    pub fn new(bootstrap_servers: &str, topic: String) -> anyhow::Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("message.timeout.ms", "5000")
            .create()
            .context("failed to create session event producer")?;
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl SessionEventPublisher for KafkaSessionEventPublisher {
    async fn publish(&self, event: &SessionEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event).context("failed to encode session event")?;
        self.producer
            .send(
                FutureRecord::to(&self.topic)
                    .key(&event.game_id)
                    .payload(&payload),
                Duration::from_secs(5),
            )
            .await
            .map_err(|(error, _)| anyhow::anyhow!("Kafka publish failed: {error:?}"))?;
        Ok(())
    }
}
