use axum::{body::Bytes, debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::Value;

use crate::{
    hub::Hub,
    proto::{MatchRequest, OnlineCount, Success},
    AppError, AppResult, AppState, GetField,
};

const ACTIONS: [&str; 5] = ["join_queue", "check_match", "leave_queue", "leave_room", "get_online_count"];

#[debug_handler(state = AppState)]
pub(crate) async fn dispatch(State(hub): State<Hub>, body: Bytes) -> AppResult<Response> {
    let body: Value = serde_json::from_slice(&body)?;
    let action = body.get_str_field("action")?;
    if !ACTIONS.contains(&action) {
        return Err(format!("unknown action {action:?}").into());
    }
    let action = action.to_owned();
    let request: MatchRequest = serde_json::from_value(body)
        .map_err(|e| AppError::new(StatusCode::BAD_REQUEST, anyhow::anyhow!("{action}: {e}")))?;

    Ok(match request {
        MatchRequest::JoinQueue(join) => Json(hub.join_queue(join).await?).into_response(),
        MatchRequest::CheckMatch { user_id } => Json(hub.check_match(&user_id).await?).into_response(),
        MatchRequest::LeaveQueue { user_id } => {
            hub.leave_queue(&user_id).await?;
            Json(Success::OK).into_response()
        }
        MatchRequest::LeaveRoom { user_id, room_id } => {
            hub.leave_room(&user_id, room_id).await?;
            Json(Success::OK).into_response()
        }
        MatchRequest::GetOnlineCount => Json(OnlineCount { count: hub.online_count().await? }).into_response(),
    })
}
