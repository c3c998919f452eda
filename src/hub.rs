//! Server-side facade over the store, the matcher and the change feed.
//!
//! Every write that peers need to hear about is published on the feed after
//! it lands in the store.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{Error, Result},
    feed::{ChangeFeed, RoomFeed},
    matcher::{Matcher, MatcherConfig},
    model::{now, Message, Room, SignalingEnvelope},
    proto::{Change, JoinRequest, MatchOutcome, NewMessage, NewSignal, MAX_MESSAGE_LEN},
    store::{MatchStore, RelayStore, Store},
};

#[derive(Clone)]
pub struct Hub {
    store: Arc<dyn Store>,
    matcher: Matcher,
    feed: ChangeFeed,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>, matcher: MatcherConfig, feed: ChangeFeed) -> Self {
        Self {
            store,
            matcher: Matcher::new(matcher),
            feed,
        }
    }

    pub fn store(&self) -> &dyn Store {
        &*self.store
    }

    pub async fn join_queue(&self, req: JoinRequest) -> Result<MatchOutcome> {
        if let Some(vibe) = &req.vibe {
            tracing::debug!(user_id = %req.user_id, vibe = %vibe, "vibe is not used for matching");
        }
        self.matcher.join(&*self.store, req).await
    }

    pub async fn check_match(&self, user_id: &str) -> Result<MatchOutcome> {
        self.matcher.check(&*self.store, user_id).await
    }

    pub async fn leave_queue(&self, user_id: &str) -> Result<()> {
        if self.store.remove_queue_entry(user_id).await? {
            tracing::debug!(user_id, "left queue");
        }
        Ok(())
    }

    /// Ends the room for both sides. Ending an already-ended room succeeds
    /// without a second notification.
    pub async fn leave_room(&self, user_id: &str, room_id: Uuid) -> Result<()> {
        let room = self.participant_room(user_id, room_id).await?;
        if !room.is_active() {
            return Ok(());
        }

        if let Some(room) = self.store.end_room(room_id, now()).await? {
            tracing::info!(room_id = %room.id, user_id, "room ended");
            self.feed.publish(Change::RoomUpdated { room });
            self.store.purge_room(room_id).await?;
        }
        Ok(())
    }

    /// Waiting users plus both sides of every active room.
    pub async fn online_count(&self) -> Result<u64> {
        Ok(self.store.queue_len().await? + 2 * self.store.active_room_count().await?)
    }

    pub async fn send_signal(&self, room_id: Uuid, signal: NewSignal) -> Result<SignalingEnvelope> {
        let room = self.active_room(&signal.sender_id, room_id).await?;
        if room.peer_of(&signal.sender_id) != Some(signal.receiver_id.as_str()) {
            return Err(Error::NotParticipant { user_id: signal.receiver_id, room_id });
        }

        let envelope = SignalingEnvelope {
            id: Uuid::now_v7(),
            room_id,
            sender_id: signal.sender_id,
            receiver_id: signal.receiver_id,
            signal_type: signal.signal_type,
            signal_data: signal.signal_data,
            created_at: now(),
        };
        self.store.insert_signal(&envelope).await?;
        tracing::debug!(
            room_id = %room_id,
            signal_type = %envelope.signal_type,
            sender = %envelope.sender_id,
            "signal relayed"
        );
        self.feed.publish(Change::SignalInserted { signal: envelope.clone() });
        Ok(envelope)
    }

    pub async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> Result<Vec<SignalingEnvelope>> {
        self.participant_room(receiver_id, room_id).await?;
        self.store.pending_signals(room_id, receiver_id).await
    }

    pub async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> Result<u64> {
        self.participant_room(user_id, room_id).await?;
        self.store.delete_signals(room_id, user_id).await
    }

    pub async fn send_message(&self, room_id: Uuid, message: NewMessage) -> Result<Message> {
        let content = message.content.trim();
        if content.is_empty() {
            return Err(Error::invalid("message content is empty"));
        }
        if content.chars().count() > MAX_MESSAGE_LEN {
            return Err(Error::invalid(format!("message longer than {MAX_MESSAGE_LEN} characters")));
        }
        self.active_room(&message.sender_id, room_id).await?;

        let message = Message {
            id: Uuid::now_v7(),
            room_id,
            sender_id: message.sender_id,
            content: content.to_owned(),
            created_at: now(),
        };
        self.store.insert_message(&message).await?;
        self.feed.publish(Change::MessageInserted { message: message.clone() });
        Ok(message)
    }

    pub async fn messages(&self, room_id: Uuid, user_id: &str) -> Result<Vec<Message>> {
        self.participant_room(user_id, room_id).await?;
        self.store.messages(room_id).await
    }

    pub fn subscribe(&self, room_id: Uuid) -> RoomFeed {
        self.feed.subscribe(room_id)
    }

    /// The room, provided `user_id` is one of its two participants.
    pub async fn participant_room(&self, user_id: &str, room_id: Uuid) -> Result<Room> {
        let room = self.store.room(room_id).await?.ok_or(Error::RoomNotFound(room_id))?;
        if !room.has_participant(user_id) {
            return Err(Error::NotParticipant { user_id: user_id.to_owned(), room_id });
        }
        Ok(room)
    }

    async fn active_room(&self, user_id: &str, room_id: Uuid) -> Result<Room> {
        let room = self.participant_room(user_id, room_id).await?;
        if !room.is_active() {
            return Err(Error::RoomNotActive(room_id));
        }
        Ok(room)
    }
}
