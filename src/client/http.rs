use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use super::backend::{Backend, ClientError, ClientResult, Subscription};
use crate::{
    model::{Message, SignalingEnvelope},
    proto::{Change, ErrorBody, JoinRequest, MatchOutcome, MatchRequest, NewMessage, NewSignal, OnlineCount, Success},
};

/// Talks to a running server over HTTP, with the room feed on a WebSocket.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    /// `base` is the server root, e.g. `http://localhost:8080`.
    pub fn new(base: &str) -> ClientResult<Self> {
        Self::with_client(reqwest::Client::new(), base)
    }

    pub fn with_client(client: reqwest::Client, base: &str) -> ClientResult<Self> {
        let base = Url::parse(base).map_err(|e| ClientError::InvalidUrl(format!("{base}: {e}")))?;
        Ok(Self { client, base })
    }

    fn url(&self, path: &str) -> ClientResult<Url> {
        self.base.join(path).map_err(|e| ClientError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn matchmaking<T: DeserializeOwned>(&self, req: &MatchRequest) -> ClientResult<T> {
        let resp = self.client.post(self.url("/api/matchmaking")?).json(req).send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ClientResult<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("request failed").to_owned(),
    };
    Err(ClientError::Rejected { status: status.as_u16(), message })
}

#[async_trait]
impl Backend for HttpBackend {
    async fn join_queue(&self, req: JoinRequest) -> ClientResult<MatchOutcome> {
        self.matchmaking(&MatchRequest::JoinQueue(req)).await
    }

    async fn check_match(&self, user_id: &str) -> ClientResult<MatchOutcome> {
        self.matchmaking(&MatchRequest::CheckMatch { user_id: user_id.to_owned() }).await
    }

    async fn leave_queue(&self, user_id: &str) -> ClientResult<()> {
        self.matchmaking::<Success>(&MatchRequest::LeaveQueue { user_id: user_id.to_owned() })
            .await?;
        Ok(())
    }

    async fn leave_room(&self, user_id: &str, room_id: Uuid) -> ClientResult<()> {
        self.matchmaking::<Success>(&MatchRequest::LeaveRoom { user_id: user_id.to_owned(), room_id })
            .await?;
        Ok(())
    }

    async fn online_count(&self) -> ClientResult<u64> {
        let OnlineCount { count } = self.matchmaking(&MatchRequest::GetOnlineCount).await?;
        Ok(count)
    }

    async fn send_signal(&self, room_id: Uuid, signal: NewSignal) -> ClientResult<SignalingEnvelope> {
        let url = self.url(&format!("/api/rooms/{room_id}/signals"))?;
        decode(self.client.post(url).json(&signal).send().await?).await
    }

    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> ClientResult<Vec<SignalingEnvelope>> {
        let url = self.url(&format!("/api/rooms/{room_id}/signals"))?;
        decode(self.client.get(url).query(&[("receiver_id", receiver_id)]).send().await?).await
    }

    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> ClientResult<()> {
        let url = self.url(&format!("/api/rooms/{room_id}/signals"))?;
        decode::<Success>(self.client.delete(url).query(&[("user_id", user_id)]).send().await?).await?;
        Ok(())
    }

    async fn send_message(&self, room_id: Uuid, message: NewMessage) -> ClientResult<Message> {
        let url = self.url(&format!("/api/rooms/{room_id}/messages"))?;
        decode(self.client.post(url).json(&message).send().await?).await
    }

    async fn messages(&self, room_id: Uuid, user_id: &str) -> ClientResult<Vec<Message>> {
        let url = self.url(&format!("/api/rooms/{room_id}/messages"))?;
        decode(self.client.get(url).query(&[("user_id", user_id)]).send().await?).await
    }

    async fn subscribe(&self, room_id: Uuid, user_id: &str) -> ClientResult<Subscription> {
        let mut url = self.url(&format!("/api/rooms/{room_id}/feed"))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::InvalidUrl(format!("cannot use {scheme} for {url}")))?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let (mut ws_stream, _) = connect_async(url.as_str()).await?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<Change>(text.as_str()) {
                        Ok(change) => {
                            if tx.send(change).is_err() {
                                break;
                            }
                        }
                        Err(err) => tracing::warn!(room_id = %room_id, error = %err, "undecodable feed frame"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(room_id = %room_id, error = %err, "room feed dropped");
                        break;
                    }
                }
            }
        });
        Ok(Subscription::new(room_id, rx, task))
    }
}
