use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    hub::Hub,
    model::SignalingEnvelope,
    proto::{NewSignal, Success},
    AppResult, AppState,
};

#[derive(Deserialize)]
pub(crate) struct ReceiverQuery {
    receiver_id: String,
}

#[derive(Deserialize)]
pub(crate) struct UserQuery {
    user_id: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    Path(room_id): Path<Uuid>,
    State(hub): State<Hub>,
    Json(signal): Json<NewSignal>,
) -> AppResult<Json<SignalingEnvelope>> {
    Ok(Json(hub.send_signal(room_id, signal).await?))
}

/// Catch-up fetch: everything still addressed to the receiver, oldest first.
#[debug_handler(state = AppState)]
pub(crate) async fn pending(
    Path(room_id): Path<Uuid>,
    Query(ReceiverQuery { receiver_id }): Query<ReceiverQuery>,
    State(hub): State<Hub>,
) -> AppResult<Json<Vec<SignalingEnvelope>>> {
    Ok(Json(hub.pending_signals(room_id, &receiver_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn purge(
    Path(room_id): Path<Uuid>,
    Query(UserQuery { user_id }): Query<UserQuery>,
    State(hub): State<Hub>,
) -> AppResult<Json<Success>> {
    let deleted = hub.delete_signals(room_id, &user_id).await?;
    tracing::debug!(room_id = %room_id, user_id = %user_id, deleted, "signals purged");
    Ok(Json(Success::OK))
}
