mod feed;
mod matchmaking;
mod messages;
mod signals;

use axum::{routing::{get, post}, Router};

use crate::{session, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/identity", post(session::identity))
        .route("/matchmaking", post(matchmaking::dispatch))
        .route(
            "/rooms/{room_id}/signals",
            post(signals::send).get(signals::pending).delete(signals::purge),
        )
        .route("/rooms/{room_id}/messages", post(messages::send).get(messages::list))
        .route("/rooms/{room_id}/feed", get(feed::room_feed))
}
