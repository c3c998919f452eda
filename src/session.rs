//! Anonymous, session-scoped identities. Nothing here outlives the cookie.

use axum::{debug_handler, Json};
use rand::seq::IndexedRandom;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{proto::Identity, AppResult};

pub const USER_ID: &str = "user_id";
pub const ALIAS: &str = "alias";

const ADJECTIVES: &[&str] = &[
    "Quick", "Lazy", "Mysterious", "Jolly", "Brave", "Silent", "Witty", "Fierce",
    "Clever", "Gentle", "Wild", "Calm", "Bold", "Shy", "Proud", "Happy", "Sad",
    "Eager", "Fancy", "Rusty", "Golden", "Silver", "Bright", "Dark", "Lucky",
];

const NOUNS: &[&str] = &[
    "Fox", "Bear", "Eagle", "Wolf", "Dragon", "Tiger", "Lion", "Owl", "Rabbit",
    "Falcon", "Hawk", "Shark", "Panda", "Kitten", "Puppy", "Phoenix", "Griffin",
    "Unicorn", "Turtle", "Dolphin", "Whale", "Elephant", "Giraffe", "Zebra",
];

pub fn random_alias() -> String {
    let mut rng = rand::rng();
    format!(
        "{} {}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("Quiet"),
        NOUNS.choose(&mut rng).copied().unwrap_or("Stranger"),
    )
}

/// Returns this browser session's stranger id, minting one on first call.
#[debug_handler]
pub async fn identity(session: Session) -> AppResult<Json<Identity>> {
    if let (Some(user_id), Some(alias)) = (
        session.get::<String>(USER_ID).await?,
        session.get::<String>(ALIAS).await?,
    ) {
        return Ok(Json(Identity { user_id, alias }));
    }

    let user_id = format!("anon-{}", Uuid::now_v7().simple());
    let alias = random_alias();
    session.insert(USER_ID, &user_id).await?;
    session.insert(ALIAS, &alias).await?;
    tracing::info!(user_id = %user_id, alias = %alias, "new anonymous identity");

    Ok(Json(Identity { user_id, alias }))
}
