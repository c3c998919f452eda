use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures raised by the store, the matcher and the hub.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("room {0} not found")]
    RoomNotFound(Uuid),

    #[error("user {user_id} is not a participant of room {room_id}")]
    NotParticipant { user_id: String, room_id: Uuid },

    #[error("room {0} is not active")]
    RoomNotActive(Uuid),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}
