use axum::{debug_handler, extract::{Path, Query, State}, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::{hub::Hub, model::Message, proto::NewMessage, AppResult, AppState};

#[debug_handler(state = AppState)]
pub(crate) async fn send(
    Path(room_id): Path<Uuid>,
    State(hub): State<Hub>,
    Json(message): Json<NewMessage>,
) -> AppResult<Json<Message>> {
    Ok(Json(hub.send_message(room_id, message).await?))
}

#[derive(Deserialize)]
pub(crate) struct ReaderQuery {
    user_id: String,
}

/// The room's messages, oldest first. Only participants may read them.
#[debug_handler(state = AppState)]
pub(crate) async fn list(
    Path(room_id): Path<Uuid>,
    Query(ReaderQuery { user_id }): Query<ReaderQuery>,
    State(hub): State<Hub>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(hub.messages(room_id, &user_id).await?))
}
