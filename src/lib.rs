pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod hub;
pub mod matcher;
pub mod model;
pub mod proto;
pub mod res;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}, routing::get, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

use crate::{config::Config, feed::ChangeFeed, hub::Hub, proto::ErrorBody, store::SqliteStore};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: Hub, config: Config) -> Self {
        Self { hub, config: Arc::new(config) }
    }

    /// Opens the configured SQLite database and wires the hub on top of it.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = SqliteStore::connect(&config.database_url, config.db_max_connections).await?;
        let hub = Hub::new(Arc::new(store), config.matcher, ChangeFeed::new(config.feed_capacity));
        Ok(Self::new(hub, config))
    }
}

pub fn app(app_state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(1)));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub trait GetField {
    fn get_str_field(&self, field: &str) -> AppResult<&str>;
}

impl GetField for serde_json::Value {
    fn get_str_field(&self, field: &str) -> AppResult<&str> {
        self.get(field)
            .ok_or(format!("expected {field} in {self}"))?
            .as_str()
            .ok_or(format!("expected {field} in {self} to be string").into())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Rendered as `{success: false, error}` with a non-2xx status.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, error: impl Into<anyhow::Error>) -> Self {
        Self { status, error: error.into() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = ?self.error, "request failed");
        } else {
            tracing::debug!(status = %self.status, error = %self.error, "request rejected");
        }

        (
            self.status,
            Json(ErrorBody { success: false, error: format!("{:#}", self.error) }),
        )
            .into_response()
    }
}

impl From<String> for AppError {
    fn from(err: String) -> Self {
        Self::new(StatusCode::BAD_REQUEST, anyhow::Error::msg(err))
    }
}

impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, anyhow::Error::msg(err.to_owned()))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err)
    }
}

impl From<error::Error> for AppError {
    fn from(err: error::Error) -> Self {
        use error::Error as E;
        let status = match &err {
            E::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            E::RoomNotFound(_) => StatusCode::NOT_FOUND,
            E::NotParticipant { .. } => StatusCode::FORBIDDEN,
            E::RoomNotActive(_) => StatusCode::CONFLICT,
            E::CorruptRow(_) | E::Database(_) | E::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err)
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err)
            }
        }
    };
}

apperr_impl!(sqlx::Error);
apperr_impl!(tower_sessions::session::Error);
apperr_impl!(axum::Error);

