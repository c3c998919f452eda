//! Row-change notifications, fanned out to every subscriber of a room.
//!
//! Each room gets its own channel, so a busy room can never push another
//! room's changes out of a slow subscriber's buffer. The channel is dropped
//! once the room ends, after the final update has been queued.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::proto::Change;

#[derive(Clone)]
pub struct ChangeFeed {
    capacity: usize,
    rooms: Arc<RwLock<HashMap<Uuid, broadcast::Sender<Change>>>>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, rooms: Arc::default() }
    }

    pub fn publish(&self, change: Change) {
        let room_id = change.room_id();
        let closes_room = matches!(&change, Change::RoomUpdated { room } if !room.is_active());

        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = rooms.get(&room_id) else {
            return;
        };
        // receivers keep what is already queued after the sender is gone
        if tx.send(change).is_err() || closes_room {
            rooms.remove(&room_id);
        }
    }

    /// Live changes for one room. Only changes published after this call are
    /// delivered; callers cover the gap with a catch-up fetch.
    pub fn subscribe(&self, room_id: Uuid) -> RoomFeed {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        let rx = rooms
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        RoomFeed { room_id, rx }
    }

    /// Rooms with at least one live channel.
    pub fn open_rooms(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct RoomFeed {
    room_id: Uuid,
    rx: broadcast::Receiver<Change>,
}

impl RoomFeed {
    pub fn room_id(&self) -> Uuid {
        self.room_id
    }

    /// Next change for this room, or `None` once the room has ended and its
    /// final update was delivered.
    pub async fn recv(&mut self) -> Option<Change> {
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %self.room_id, skipped, "room feed lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{now, Message, RoomStatus},
        store::new_room,
    };

    fn message(room_id: Uuid, content: &str) -> Change {
        Change::MessageInserted {
            message: Message {
                id: Uuid::now_v7(),
                room_id,
                sender_id: "a".into(),
                content: content.into(),
                created_at: now(),
            },
        }
    }

    #[tokio::test]
    async fn test_subscription_sees_only_its_room() {
        let feed = ChangeFeed::new(16);
        let (mine, other) = (Uuid::now_v7(), Uuid::now_v7());
        let mut sub = feed.subscribe(mine);

        feed.publish(message(other, "not for us"));
        feed.publish(message(mine, "hello"));

        let Some(Change::MessageInserted { message }) = sub.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "hello");
        assert_eq!(sub.room_id(), mine);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_keeps_receiving() {
        let feed = ChangeFeed::new(2);
        let room = Uuid::now_v7();
        let mut sub = feed.subscribe(room);
        for i in 0..5 {
            feed.publish(message(room, &i.to_string()));
        }

        let Some(Change::MessageInserted { message }) = sub.recv().await else {
            panic!("expected a message");
        };
        assert_eq!(message.content, "3");
    }

    #[tokio::test]
    async fn test_ended_room_delivers_final_update_then_closes() {
        let feed = ChangeFeed::new(4);
        let mut room = new_room("a", "b", now());
        let mut sub = feed.subscribe(room.id);
        assert_eq!(feed.open_rooms(), 1);

        for i in 0..10 {
            feed.publish(message(room.id, &i.to_string()));
        }
        room.status = RoomStatus::Ended;
        feed.publish(Change::RoomUpdated { room: room.clone() });
        assert_eq!(feed.open_rooms(), 0);

        let mut last = None;
        while let Some(change) = sub.recv().await {
            last = Some(change);
        }
        assert_eq!(last, Some(Change::RoomUpdated { room }));
    }

    #[tokio::test]
    async fn test_unsubscribed_rooms_are_released() {
        let feed = ChangeFeed::new(4);
        let room = Uuid::now_v7();
        drop(feed.subscribe(room));
        feed.publish(message(room, "nobody listens"));
        assert_eq!(feed.open_rooms(), 0);
        // publishing never opens a channel
        feed.publish(message(Uuid::now_v7(), "unknown room"));
        assert_eq!(feed.open_rooms(), 0);
    }
}
