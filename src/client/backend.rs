use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use uuid::Uuid;

use crate::{
    hub::Hub,
    model::{Message, SignalingEnvelope},
    proto::{Change, JoinRequest, MatchOutcome, NewMessage, NewSignal},
};

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid url {0}")]
    InvalidUrl(String),
    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Server(#[from] crate::error::Error),
    #[error("undecodable payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("not in a room")]
    NoRoom,
    #[error("nothing to rejoin with, call join first")]
    NeverJoined,
}

/// Everything a client needs from the server. Implemented in-process by
/// [`LocalBackend`] and over the network by [`HttpBackend`](super::HttpBackend).
#[async_trait]
pub trait Backend: Send + Sync {
    async fn join_queue(&self, req: JoinRequest) -> ClientResult<MatchOutcome>;
    async fn check_match(&self, user_id: &str) -> ClientResult<MatchOutcome>;
    async fn leave_queue(&self, user_id: &str) -> ClientResult<()>;
    async fn leave_room(&self, user_id: &str, room_id: Uuid) -> ClientResult<()>;
    async fn online_count(&self) -> ClientResult<u64>;

    async fn send_signal(&self, room_id: Uuid, signal: NewSignal) -> ClientResult<SignalingEnvelope>;
    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> ClientResult<Vec<SignalingEnvelope>>;
    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> ClientResult<()>;

    async fn send_message(&self, room_id: Uuid, message: NewMessage) -> ClientResult<Message>;
    async fn messages(&self, room_id: Uuid, user_id: &str) -> ClientResult<Vec<Message>>;

    /// Live changes for one room. The subscription is live once this returns.
    async fn subscribe(&self, room_id: Uuid, user_id: &str) -> ClientResult<Subscription>;
}

/// A live room feed. Dropping it stops delivery.
pub struct Subscription {
    room_id: Uuid,
    rx: mpsc::UnboundedReceiver<Change>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(room_id: Uuid, rx: mpsc::UnboundedReceiver<Change>, task: JoinHandle<()>) -> Self {
        Self { room_id, rx, task }
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Talks to a [`Hub`] in the same process.
#[derive(Clone)]
pub struct LocalBackend {
    hub: Hub,
}

impl LocalBackend {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn join_queue(&self, req: JoinRequest) -> ClientResult<MatchOutcome> {
        Ok(self.hub.join_queue(req).await?)
    }

    async fn check_match(&self, user_id: &str) -> ClientResult<MatchOutcome> {
        Ok(self.hub.check_match(user_id).await?)
    }

    async fn leave_queue(&self, user_id: &str) -> ClientResult<()> {
        Ok(self.hub.leave_queue(user_id).await?)
    }

    async fn leave_room(&self, user_id: &str, room_id: Uuid) -> ClientResult<()> {
        Ok(self.hub.leave_room(user_id, room_id).await?)
    }

    async fn online_count(&self) -> ClientResult<u64> {
        Ok(self.hub.online_count().await?)
    }

    async fn send_signal(&self, room_id: Uuid, signal: NewSignal) -> ClientResult<SignalingEnvelope> {
        Ok(self.hub.send_signal(room_id, signal).await?)
    }

    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> ClientResult<Vec<SignalingEnvelope>> {
        Ok(self.hub.pending_signals(room_id, receiver_id).await?)
    }

    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> ClientResult<()> {
        self.hub.delete_signals(room_id, user_id).await?;
        Ok(())
    }

    async fn send_message(&self, room_id: Uuid, message: NewMessage) -> ClientResult<Message> {
        Ok(self.hub.send_message(room_id, message).await?)
    }

    async fn messages(&self, room_id: Uuid, user_id: &str) -> ClientResult<Vec<Message>> {
        Ok(self.hub.messages(room_id, user_id).await?)
    }

    async fn subscribe(&self, room_id: Uuid, user_id: &str) -> ClientResult<Subscription> {
        self.hub.participant_room(user_id, room_id).await?;
        let mut feed = self.hub.subscribe(room_id);
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(change) = feed.recv().await {
                if tx.send(change).is_err() {
                    break;
                }
            }
        });
        Ok(Subscription::new(room_id, rx, task))
    }
}
