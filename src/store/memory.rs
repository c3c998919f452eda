use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{new_room, MatchStore, QueueScan, RelayStore};
use crate::{
    error::Result,
    model::{Message, QueueEntry, Room, RoomStatus, SignalingEnvelope},
};

#[derive(Default)]
struct Tables {
    queue: HashMap<String, QueueEntry>,
    rooms: Vec<Room>,
    messages: Vec<Message>,
    signals: Vec<SignalingEnvelope>,
}

impl Tables {
    fn active_room_for(&self, user_id: &str) -> Option<&Room> {
        self.rooms
            .iter()
            .find(|room| room.is_active() && room.has_participant(user_id))
    }
}

/// In-process store. One lock guards every table, so each operation is
/// atomic with respect to all others.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn active_room_for(&self, user_id: &str) -> Result<Option<Room>> {
        Ok(self.tables.read().await.active_room_for(user_id).cloned())
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.active_room_for(&entry.user_id).is_some() {
            return Ok(false);
        }
        let created_at = tables
            .queue
            .get(&entry.user_id)
            .map_or(entry.created_at, |prior| prior.created_at);
        tables.queue.insert(
            entry.user_id.clone(),
            QueueEntry { created_at, ..entry.clone() },
        );
        Ok(true)
    }

    async fn queue_entry(&self, user_id: &str) -> Result<Option<QueueEntry>> {
        Ok(self.tables.read().await.queue.get(user_id).cloned())
    }

    async fn remove_queue_entry(&self, user_id: &str) -> Result<bool> {
        Ok(self.tables.write().await.queue.remove(user_id).is_some())
    }

    async fn scan_queue(&self, scan: QueueScan<'_>) -> Result<Vec<QueueEntry>> {
        let tables = self.tables.read().await;
        let mut entries: Vec<QueueEntry> = tables
            .queue
            .values()
            .filter(|entry| entry.user_id != scan.exclude_user)
            .filter(|entry| match scan.overlapping {
                Some(interests) => entry.shares_interest_with(interests),
                None => true,
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            b.is_premium
                .cmp(&a.is_premium)
                .then(a.created_at.cmp(&b.created_at))
        });
        entries.truncate(scan.limit);
        Ok(entries)
    }

    async fn claim_pair(
        &self,
        waiting_user: &str,
        joiner: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Room>> {
        let mut tables = self.tables.write().await;
        let busy: Vec<&str> = [waiting_user, joiner]
            .into_iter()
            .filter(|user| tables.active_room_for(user).is_some())
            .collect();
        if !busy.is_empty() {
            for user in busy {
                tables.queue.remove(user);
            }
            return Ok(None);
        }
        if tables.queue.remove(waiting_user).is_none() {
            return Ok(None);
        }
        tables.queue.remove(joiner);

        let room = new_room(waiting_user, joiner, now);
        tables.rooms.push(room.clone());
        Ok(Some(room))
    }

    async fn room(&self, room_id: Uuid) -> Result<Option<Room>> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.iter().find(|room| room.id == room_id).cloned())
    }

    async fn end_room(&self, room_id: Uuid, ended_at: OffsetDateTime) -> Result<Option<Room>> {
        let mut tables = self.tables.write().await;
        let Some(room) = tables
            .rooms
            .iter_mut()
            .find(|room| room.id == room_id && room.status != RoomStatus::Ended)
        else {
            return Ok(None);
        };
        room.status = RoomStatus::Ended;
        room.ended_at = Some(ended_at);
        Ok(Some(room.clone()))
    }

    async fn queue_len(&self) -> Result<u64> {
        Ok(self.tables.read().await.queue.len() as u64)
    }

    async fn active_room_count(&self) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables.rooms.iter().filter(|room| room.is_active()).count() as u64)
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn insert_signal(&self, signal: &SignalingEnvelope) -> Result<()> {
        self.tables.write().await.signals.push(signal.clone());
        Ok(())
    }

    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> Result<Vec<SignalingEnvelope>> {
        let tables = self.tables.read().await;
        let mut signals: Vec<SignalingEnvelope> = tables
            .signals
            .iter()
            .filter(|s| s.room_id == room_id && s.receiver_id == receiver_id)
            .cloned()
            .collect();
        signals.sort_by_key(|s| s.created_at);
        Ok(signals)
    }

    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.signals.len();
        tables.signals.retain(|s| {
            s.room_id != room_id || (s.sender_id != user_id && s.receiver_id != user_id)
        });
        Ok((before - tables.signals.len()) as u64)
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        self.tables.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn messages(&self, room_id: Uuid) -> Result<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn purge_room(&self, room_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.messages.retain(|m| m.room_id != room_id);
        tables.signals.retain(|s| s.room_id != room_id);
        Ok(())
    }
}
