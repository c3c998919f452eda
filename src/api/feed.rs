use axum::{
    debug_handler,
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::{hub::Hub, AppError, AppResult, AppState};

#[derive(Deserialize)]
pub(crate) struct FeedQuery {
    user_id: String,
}

/// Pushes every change of one room to a participant as JSON text frames.
#[debug_handler(state = AppState)]
pub(crate) async fn room_feed(
    Path(room_id): Path<Uuid>,
    Query(FeedQuery { user_id }): Query<FeedQuery>,
    State(hub): State<Hub>,

    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    hub.participant_room(&user_id, room_id).await?;
    let ws = ws.map_err(|rejection| AppError::new(rejection.status(), rejection))?;

    // subscribed before the handshake completes, so the client misses nothing
    // published after its connect call returns
    let mut feed = hub.subscribe(room_id);

    Ok(ws.on_upgrade(move |stream| async move {
        let (mut sender, mut receiver) = stream.split();

        let mut broadcast_task = tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                let Ok(text) = serde_json::to_string(&change) else {
                    continue;
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        let mut recv_task = tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                if let Message::Close(_) = msg {
                    break;
                }
            }
        });

        tokio::select! {
            _ = &mut broadcast_task => recv_task.abort(),
            _ = &mut recv_task => broadcast_task.abort(),
        };
        tracing::debug!(room_id = %room_id, user_id = %user_id, "feed closed");
    }))
}
