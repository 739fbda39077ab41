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

mod betting;
mod config;
mod engine;
mod errors;
mod events;
mod ledger;
mod platform;
mod recruitment;
mod registry;
mod render;
mod session;
mod settlement;
mod teams;
#[cfg(test)]
mod test_support;
mod timers;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use hatori_common::{
    ChannelId, InteractionEnvelope, InteractionResponse, MessageId, SessionKey, UserId,
};
use rdkafka::{
    ClientConfig, Message,
    consumer::{CommitMode, Consumer, StreamConsumer},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    config::{KafkaSettings, Settings},
    engine::SessionEngine,
    errors::SessionError,
    events::{KafkaSessionEventPublisher, NoopSessionEventPublisher, SessionEventPublisher},
    ledger::{DynamoLedger, InMemoryLedger, Ledger},
    platform::{HttpPlatformBridge, MessagingPlatform},
    session::SessionSnapshot,
};

#[derive(Clone)]
struct AppState {
    engine: Arc<SessionEngine>,
    platform: Arc<dyn MessagingPlatform>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "custom_game_service=debug,tower_http=info".to_string()),
        )
        .init();

    let settings = Settings::from_env()?;

    let ledger: Arc<dyn Ledger> = if settings.ledger.dynamo_enabled {
        Arc::new(
            DynamoLedger::from_env(
                settings.ledger.users_table.clone(),
                settings.ledger.bets_table.clone(),
            )
            .await,
        )
    } else {
        info!("no DynamoDB configured, balances and bets are kept in memory");
        Arc::new(InMemoryLedger::new())
    };

    let platform: Arc<dyn MessagingPlatform> =
        Arc::new(HttpPlatformBridge::new(settings.platform_bridge_base_url.clone()));

    let events: Arc<dyn SessionEventPublisher> = if settings.kafka.enabled {
        Arc::new(KafkaSessionEventPublisher::new(
            &settings.kafka.bootstrap_servers,
            settings.kafka.event_topic.clone(),
        )?)
    } else {
        Arc::new(NoopSessionEventPublisher)
    };

    let engine = SessionEngine::start(settings.engine.clone(), ledger, platform.clone(), events);
    let state = AppState { engine, platform };

    if settings.kafka.enabled {
        let consumer_state = state.clone();
        let kafka = settings.kafka.clone();
        tokio::spawn(async move {
            if let Err(error) = run_interaction_consumer(consumer_state, kafka).await {
                warn!(error = %error, "interaction consumer stopped");
            }
        });
    }

    let app = build_router(state);

    let bind_addr: SocketAddr = settings
        .bind
        .parse()
        .context("invalid CUSTOM_GAME_BIND")?;
    info!(%bind_addr, "custom-game-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal/v1/interactions", post(interaction_handler))
        .route("/v1/sessions", get(list_sessions_handler))
        .route(
            "/v1/sessions/{channel_id}/{message_id}",
            get(get_session_handler),
        )
        .route(
            "/v1/channels/{channel_id}/session",
            get(channel_session_handler),
        )
        .route("/v1/users/{user_id}/balance", get(balance_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "custom-game-service"}))
}

/// Run one interaction. Rejections become a negative response; only
/// infrastructure failures surface as errors.
async fn process_interaction(
    engine: &SessionEngine,
    envelope: &InteractionEnvelope,
) -> Result<InteractionResponse, SessionError> {
    let kind = envelope.command.kind();
    let game_id = envelope.command.session().map(tracing::field::display);
    match engine.handle(envelope.command.clone()).await {
        Ok(outcome) => {
            info!(
                interaction_id = %envelope.interaction_id,
                kind,
                game_id,
                "interaction accepted"
            );
            Ok(InteractionResponse {
                interaction_id: envelope.interaction_id.clone(),
                accepted: true,
                reason: None,
                notice: outcome.notice(),
            })
        }
        Err(error) if error.is_rejection() => {
            info!(
                interaction_id = %envelope.interaction_id,
                kind,
                game_id,
                reason = error.code(),
                "interaction rejected"
            );
            Ok(InteractionResponse {
                interaction_id: envelope.interaction_id.clone(),
                accepted: false,
                reason: Some(error.code().to_string()),
                notice: error.notice(),
            })
        }
        Err(error) => Err(error),
    }
}

async fn interaction_handler(
    State(state): State<AppState>,
    Json(envelope): Json<InteractionEnvelope>,
) -> Result<Json<InteractionResponse>, ApiError> {
    process_interaction(&state.engine, &envelope)
        .await
        .map(Json)
        .map_err(|error| {
            ApiError::bad_gateway(format!(
                "interaction {} failed: {error}",
                envelope.interaction_id
            ))
        })
}

async fn list_sessions_handler(State(state): State<AppState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.engine.snapshots().await)
}

async fn get_session_handler(
    State(state): State<AppState>,
    Path((channel_id, message_id)): Path<(ChannelId, MessageId)>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let key = SessionKey::new(channel_id, message_id);
    state
        .engine
        .snapshot(key)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {key} not found")))
}

async fn channel_session_handler(
    State(state): State<AppState>,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    state
        .engine
        .channel_snapshot(channel_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no session in channel {channel_id}")))
}

async fn balance_handler(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let balance = state.engine.balance(user_id).await.map_err(|error| {
        ApiError::bad_gateway(format!("failed to read balance of user {user_id}: {error:#}"))
    })?;
    Ok(Json(serde_json::json!({"user_id": user_id, "balance": balance})))
}

async fn run_interaction_consumer(state: AppState, kafka: KafkaSettings) -> anyhow::Result<()> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &kafka.bootstrap_servers)
        .set("group.id", &kafka.consumer_group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()
        .context("failed to create interaction consumer")?;

    consumer
        .subscribe(&[&kafka.interaction_topic])
        .context("failed to subscribe to interaction topic")?;
    info!(topic = %kafka.interaction_topic, "subscribed to interactions");

    loop {
        let message = match consumer.recv().await {
            Ok(message) => message,
            Err(error) => {
                warn!(?error, "interaction consumer receive error");
                tokio::time::sleep(Duration::from_millis(300)).await;
                continue;
            }
        };

        let envelope = match message
            .payload()
            .map(|payload| serde_json::from_slice::<InteractionEnvelope>(payload))
        {
            Some(Ok(envelope)) => Some(envelope),
            Some(Err(error)) => {
                warn!(?error, "failed to parse interaction payload");
                None
            }
            None => None,
        };

        if let Some(envelope) = envelope {
            answer_interaction(&state, &envelope).await;
        }

        if let Err(error) = consumer.commit_message(&message, CommitMode::Async) {
            warn!(?error, "failed to commit consumed interaction");
        }
    }
}

/// Process a queued interaction and reply through the platform when the
/// gateway left a token to answer on.
async fn answer_interaction(state: &AppState, envelope: &InteractionEnvelope) {
    let notice = match process_interaction(&state.engine, envelope).await {
        Ok(response) => response.notice,
        Err(error) => {
            warn!(
                interaction_id = %envelope.interaction_id,
                kind = envelope.command.kind(),
                error = %error,
                "interaction failed"
            );
            error.notice()
        }
    };

    let Some(token) = envelope.interaction_token.as_deref() else {
        return;
    };
    if let Err(error) = state.platform.reply_to_interaction(token, &notice).await {
        warn!(interaction_id = %envelope.interaction_id, error = %error, "interaction reply failed");
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
