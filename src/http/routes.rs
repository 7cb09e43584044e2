//! Thin axum router implementing the REST/WS surface of SPEC_FULL.md §6.
//! Handlers only translate between HTTP and the core services; the JSON
//! mapping lives in [`super::dto`].

use crate::broadcaster::BroadcasterHandle;
use crate::coordinator::Coordinator;
use crate::error::AppError;
use crate::http::dto::{ErrorBody, GenerationOut, ScheduleIn, ScheduleOut};
use crate::model::Schedule;
use crate::registry::FeedTypeRegistry;
use crate::scheduler::command::SchedulerCommand;
use crate::scheduler::Scheduler;
use crate::store::StateStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub registry: Arc<FeedTypeRegistry>,
    pub store: Arc<StateStore>,
    pub scheduler: Arc<Scheduler>,
    pub broadcaster: BroadcasterHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generations", get(list_generations))
        .route("/generations/types", get(list_types))
        .route("/generations/types/{type}", post(start_generation))
        .route("/generations/id/{id}", post(restart_generation))
        .route("/generations/id/{id}", delete(cancel_generation))
        .route("/generations/schedules", get(list_schedules))
        .route(
            "/generations/types/{type}/schedules",
            post(create_schedule),
        )
        .route(
            "/generations/types/{type}/schedules",
            delete(remove_schedule),
        )
        .route("/ws/progress", get(ws_progress))
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::UnknownFeedType(_) => StatusCode::BAD_REQUEST,
            AppError::TaskNotFound(_) | AppError::GenerationNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            AppError::TaskAlreadyExists(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                details: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn list_generations(
    State(state): State<AppState>,
) -> Result<Json<Vec<GenerationOut>>, AppError> {
    let gens = state.store.list().await?;
    Ok(Json(gens.iter().map(GenerationOut::from).collect()))
}

async fn list_types(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.list_allowed_types())
}

async fn start_generation(
    State(state): State<AppState>,
    Path(feed_type): Path<String>,
) -> Result<StatusCode, AppError> {
    state.coordinator.generate_feed(&feed_type).await?;
    Ok(StatusCode::CREATED)
}

async fn restart_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.coordinator.restart_generation(&id).await?;
    Ok(StatusCode::CREATED)
}

async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.coordinator.cancel(&id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_schedules(
    State(state): State<AppState>,
) -> Result<Json<std::collections::HashMap<String, ScheduleOut>>, AppError> {
    let schedules = state.scheduler.list_schedules().await?;
    let out = schedules
        .into_iter()
        .map(|(name, s)| {
            (
                name,
                ScheduleOut {
                    start_timestamp: s.start_timestamp,
                    delay_interval: s.fire_interval.num_seconds(),
                },
            )
        })
        .collect();
    Ok(Json(out))
}

async fn create_schedule(
    State(state): State<AppState>,
    Path(feed_type): Path<String>,
    Json(body): Json<ScheduleIn>,
) -> Result<StatusCode, AppError> {
    state.registry.get(&feed_type)?;
    let schedule = Schedule::new(
        body.start_timestamp,
        ChronoDuration::seconds(body.delay_interval),
    );
    state
        .scheduler
        .schedule_task(
            &feed_type,
            SchedulerCommand::GenerateFeed {
                feed_type: feed_type.clone(),
            },
            schedule,
        )
        .await?;
    Ok(StatusCode::CREATED)
}

async fn remove_schedule(
    State(state): State<AppState>,
    Path(feed_type): Path<String>,
) -> Result<StatusCode, AppError> {
    state.scheduler.remove_task(&feed_type).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn ws_progress(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_progress(socket, state))
}

async fn handle_ws_progress(socket: WebSocket, state: AppState) {
    use futures_util::SinkExt;

    let (id, rx) = state.broadcaster.register(32);
    let (sink, _source) = futures_util::StreamExt::split(socket);
    let sink = std::sync::Arc::new(tokio::sync::Mutex::new(sink));

    let send = {
        let sink = sink.clone();
        move |payload: Vec<u8>| {
            let sink = sink.clone();
            async move { sink.lock().await.send(Message::Binary(payload.into())).await.is_ok() }
        }
    };
    let ping = {
        let sink = sink.clone();
        move |_: Vec<u8>| {
            let sink = sink.clone();
            async move { sink.lock().await.send(Message::Ping(Vec::new().into())).await.is_ok() }
        }
    };

    crate::broadcaster::run_subscriber_send_loop(rx, send, ping).await;
    state.broadcaster.unregister(id);
}
