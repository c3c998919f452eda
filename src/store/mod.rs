//! Durable queue, room, message and signaling storage.
//!
//! The matcher keeps no state of its own between calls: every decision is
//! re-derived from a [`MatchStore`]. Row-level operations are atomic, and
//! [`MatchStore::claim_pair`] is the one multi-row write, done as a single
//! transaction that fails softly when a concurrent joiner got there first.

mod memory;
mod sqlite;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::Result,
    model::{Message, QueueEntry, Room, SignalingEnvelope},
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Filtered scan over waiting users, ordered premium first then oldest first.
#[derive(Debug, Clone, Copy)]
pub struct QueueScan<'a> {
    pub exclude_user: &'a str,
    /// Only return entries sharing at least one of these interests.
    pub overlapping: Option<&'a [String]>,
    pub limit: usize,
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn active_room_for(&self, user_id: &str) -> Result<Option<Room>>;

    /// Inserts or replaces the user's entry. A replaced entry keeps its
    /// original `created_at` so re-joining does not lose queue position.
    /// Writes nothing and returns false while the user sits in an active room.
    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<bool>;

    async fn queue_entry(&self, user_id: &str) -> Result<Option<QueueEntry>>;

    /// Returns whether an entry was removed.
    async fn remove_queue_entry(&self, user_id: &str) -> Result<bool>;

    async fn scan_queue(&self, scan: QueueScan<'_>) -> Result<Vec<QueueEntry>>;

    /// Removes both queue rows and creates an active room pairing
    /// `waiting_user` with `joiner`. Returns `None` when `waiting_user` is no
    /// longer queued or either side already sits in an active room; in the
    /// latter case the busy side's stale queue row is removed.
    async fn claim_pair(
        &self,
        waiting_user: &str,
        joiner: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Room>>;

    async fn room(&self, room_id: Uuid) -> Result<Option<Room>>;

    /// Marks the room ended. Returns the updated room only if this call made
    /// the transition.
    async fn end_room(&self, room_id: Uuid, ended_at: OffsetDateTime) -> Result<Option<Room>>;

    async fn queue_len(&self) -> Result<u64>;

    async fn active_room_count(&self) -> Result<u64>;
}

#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn insert_signal(&self, signal: &SignalingEnvelope) -> Result<()>;

    /// Envelopes addressed to `receiver_id`, oldest first.
    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> Result<Vec<SignalingEnvelope>>;

    /// Deletes envelopes sent by or addressed to `user_id`.
    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> Result<u64>;

    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// Messages of a room, oldest first.
    async fn messages(&self, room_id: Uuid) -> Result<Vec<Message>>;

    /// Drops every message and envelope of a room.
    async fn purge_room(&self, room_id: Uuid) -> Result<()>;
}

pub trait Store: MatchStore + RelayStore {}

impl<T: MatchStore + RelayStore> Store for T {}

pub(crate) fn new_room(waiting_user: &str, joiner: &str, now: OffsetDateTime) -> Room {
    Room {
        id: Uuid::now_v7(),
        user1_id: waiting_user.to_owned(),
        user2_id: joiner.to_owned(),
        status: crate::model::RoomStatus::Active,
        created_at: now,
        ended_at: None,
    }
}
