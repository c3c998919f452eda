use std::sync::Arc;

use uuid::Uuid;

use super::{Backend, ClientResult};
use crate::{
    error::Error,
    model::{Room, SignalType, SignalingEnvelope},
    proto::NewSignal,
};

/// Store-and-forward signaling between the two participants of one room,
/// seen from one side.
#[derive(Clone)]
pub struct SignalRelay {
    backend: Arc<dyn Backend>,
    room_id: Uuid,
    local_id: String,
    peer_id: String,
}

impl SignalRelay {
    pub fn new(backend: Arc<dyn Backend>, room: &Room, local_id: &str) -> ClientResult<Self> {
        let peer_id = room.peer_of(local_id).ok_or_else(|| Error::NotParticipant {
            user_id: local_id.to_owned(),
            room_id: room.id,
        })?;
        Ok(Self {
            room_id: room.id,
            local_id: local_id.to_owned(),
            peer_id: peer_id.to_owned(),
            backend,
        })
    }

    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub async fn send(&self, signal_type: SignalType, signal_data: serde_json::Value) -> ClientResult<SignalingEnvelope> {
        self.backend
            .send_signal(
                self.room_id,
                NewSignal {
                    sender_id: self.local_id.clone(),
                    receiver_id: self.peer_id.clone(),
                    signal_type,
                    signal_data,
                },
            )
            .await
    }

    /// Envelopes addressed to us that were stored before our feed was live.
    pub async fn fetch_pending(&self) -> ClientResult<Vec<SignalingEnvelope>> {
        self.backend.pending_signals(self.room_id, &self.local_id).await
    }

    /// Deletes this room's envelopes to or from us. Failures are only logged.
    pub async fn purge(&self) {
        if let Err(err) = self.backend.delete_signals(self.room_id, &self.local_id).await {
            tracing::warn!(room_id = %self.room_id, error = %err, "signal cleanup failed");
        }
    }

    /// Whether a room-feed envelope is meant for this side.
    pub fn accepts(&self, envelope: &SignalingEnvelope) -> bool {
        envelope.room_id == self.room_id
            && envelope.receiver_id == self.local_id
            && envelope.sender_id != self.local_id
    }
}
