use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{new_room, MatchStore, QueueScan, RelayStore};
use crate::{
    error::{Error, Result},
    model::{from_nanos, to_nanos, Message, QueueEntry, Room, RoomStatus, SignalingEnvelope},
    res,
};

#[derive(sqlx::FromRow)]
struct QueueRow {
    user_id: String,
    interests: String,
    gender: String,
    looking_for: String,
    is_premium: bool,
    country: Option<String>,
    created_at: i64,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = Error;

    fn try_from(row: QueueRow) -> Result<Self> {
        Ok(QueueEntry {
            user_id: row.user_id,
            interests: serde_json::from_str(&row.interests)?,
            gender: row.gender.parse()?,
            looking_for: row.looking_for.parse()?,
            is_premium: row.is_premium,
            country: row.country,
            created_at: from_nanos(row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: String,
    user1_id: String,
    user2_id: String,
    status: String,
    created_at: i64,
    ended_at: Option<i64>,
}

impl TryFrom<RoomRow> for Room {
    type Error = Error;

    fn try_from(row: RoomRow) -> Result<Self> {
        Ok(Room {
            id: parse_uuid(&row.id)?,
            user1_id: row.user1_id,
            user2_id: row.user2_id,
            status: row.status.parse()?,
            created_at: from_nanos(row.created_at)?,
            ended_at: row.ended_at.map(from_nanos).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    room_id: String,
    sender_id: String,
    content: String,
    created_at: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: parse_uuid(&row.id)?,
            room_id: parse_uuid(&row.room_id)?,
            sender_id: row.sender_id,
            content: row.content,
            created_at: from_nanos(row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: String,
    room_id: String,
    sender_id: String,
    receiver_id: String,
    signal_type: String,
    signal_data: String,
    created_at: i64,
}

impl TryFrom<SignalRow> for SignalingEnvelope {
    type Error = Error;

    fn try_from(row: SignalRow) -> Result<Self> {
        Ok(SignalingEnvelope {
            id: parse_uuid(&row.id)?,
            room_id: parse_uuid(&row.room_id)?,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            signal_type: row.signal_type.parse()?,
            signal_data: serde_json::from_str(&row.signal_data)?,
            created_at: from_nanos(row.created_at)?,
        })
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::CorruptRow(format!("uuid {s:?}: {e}")))
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>>
where
    T: TryFrom<R, Error = Error>,
{
    rows.into_iter().map(T::try_from).collect()
}

const QUEUE_COLUMNS: &str = "user_id,interests,gender,looking_for,is_premium,country,created_at";
const ROOM_COLUMNS: &str = "id,user1_id,user2_id,status,created_at,ended_at";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Takes the write lock up front. A deferred transaction that reads first
/// cannot upgrade while another writer holds the lock, and SQLite reports
/// that as busy without waiting.
const BEGIN_WRITE: &str = "BEGIN IMMEDIATE";

/// SQLite-backed store. Timestamps are unix nanoseconds so ordering is numeric.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Opens a pool and applies the schema. In-memory databases are
    /// per-connection, so they get a single connection that never expires.
    /// File databases run in WAL mode so readers never block the writer.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");
        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(max_connections)
        };
        let db_pool = pool_options.connect_with(connect_options).await?;

        let store = Self::new(db_pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(res::SCHEMA).execute(&self.db_pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db_pool
    }
}

#[async_trait]
impl MatchStore for SqliteStore {
    async fn active_room_for(&self, user_id: &str) -> Result<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms WHERE status='active' AND (user1_id=? OR user2_id=?) LIMIT 1"
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?;
        row.map(Room::try_from).transpose()
    }

    async fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<bool> {
        let written = sqlx::query(&format!(
            "INSERT INTO queue ({QUEUE_COLUMNS}) SELECT ?,?,?,?,?,?,?
             WHERE NOT EXISTS (
                SELECT 1 FROM rooms WHERE status='active' AND (user1_id=? OR user2_id=?))
             ON CONFLICT(user_id) DO UPDATE SET
                interests=excluded.interests,
                gender=excluded.gender,
                looking_for=excluded.looking_for,
                is_premium=excluded.is_premium,
                country=excluded.country"
        ))
        .bind(&entry.user_id)
        .bind(serde_json::to_string(&entry.interests)?)
        .bind(entry.gender.as_str())
        .bind(entry.looking_for.as_str())
        .bind(entry.is_premium)
        .bind(&entry.country)
        .bind(to_nanos(entry.created_at))
        .bind(&entry.user_id)
        .bind(&entry.user_id)
        .execute(&self.db_pool)
        .await?
        .rows_affected();
        Ok(written > 0)
    }

    async fn queue_entry(&self, user_id: &str) -> Result<Option<QueueEntry>> {
        let row: Option<QueueRow> =
            sqlx::query_as(&format!("SELECT {QUEUE_COLUMNS} FROM queue WHERE user_id=?"))
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;
        row.map(QueueEntry::try_from).transpose()
    }

    async fn remove_queue_entry(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM queue WHERE user_id=?")
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn scan_queue(&self, scan: QueueScan<'_>) -> Result<Vec<QueueEntry>> {
        let overlapping = scan.overlapping.map(serde_json::to_string).transpose()?;
        let rows: Vec<QueueRow> = sqlx::query_as(&format!(
            "SELECT {QUEUE_COLUMNS} FROM queue AS q
             WHERE q.user_id != ?
               AND (? IS NULL OR EXISTS (
                    SELECT 1 FROM json_each(q.interests) AS mine
                    JOIN json_each(?) AS theirs ON mine.value = theirs.value))
             ORDER BY q.is_premium DESC, q.created_at ASC
             LIMIT ?"
        ))
        .bind(scan.exclude_user)
        .bind(&overlapping)
        .bind(&overlapping)
        .bind(scan.limit as i64)
        .fetch_all(&self.db_pool)
        .await?;
        collect(rows)
    }

    async fn claim_pair(
        &self,
        waiting_user: &str,
        joiner: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Room>> {
        let mut tx = self.db_pool.begin_with(BEGIN_WRITE).await?;

        let busy: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM rooms WHERE status='active'
             AND (user1_id IN (?,?) OR user2_id IN (?,?)) LIMIT 1",
        )
        .bind(waiting_user)
        .bind(joiner)
        .bind(waiting_user)
        .bind(joiner)
        .fetch_optional(&mut *tx)
        .await?;
        if busy.is_some() {
            // a side already paired elsewhere has no business in the queue
            sqlx::query(
                "DELETE FROM queue WHERE user_id IN (?,?) AND EXISTS (
                    SELECT 1 FROM rooms WHERE status='active'
                    AND (rooms.user1_id=queue.user_id OR rooms.user2_id=queue.user_id))",
            )
            .bind(waiting_user)
            .bind(joiner)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(None);
        }

        let claimed = sqlx::query("DELETE FROM queue WHERE user_id=?")
            .bind(waiting_user)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        sqlx::query("DELETE FROM queue WHERE user_id=?")
            .bind(joiner)
            .execute(&mut *tx)
            .await?;

        let room = new_room(waiting_user, joiner, now);
        sqlx::query(&format!("INSERT INTO rooms ({ROOM_COLUMNS}) VALUES (?,?,?,?,?,NULL)"))
            .bind(room.id.to_string())
            .bind(&room.user1_id)
            .bind(&room.user2_id)
            .bind(room.status.as_str())
            .bind(to_nanos(room.created_at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(room))
    }

    async fn room(&self, room_id: Uuid) -> Result<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id=?"))
            .bind(room_id.to_string())
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(Room::try_from).transpose()
    }

    async fn end_room(&self, room_id: Uuid, ended_at: OffsetDateTime) -> Result<Option<Room>> {
        let updated = sqlx::query("UPDATE rooms SET status=?, ended_at=? WHERE id=? AND status!=?")
            .bind(RoomStatus::Ended.as_str())
            .bind(to_nanos(ended_at))
            .bind(room_id.to_string())
            .bind(RoomStatus::Ended.as_str())
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        self.room(room_id).await
    }

    async fn queue_len(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue")
            .fetch_one(&self.db_pool)
            .await?;
        Ok(count as u64)
    }

    async fn active_room_count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rooms WHERE status='active'")
            .fetch_one(&self.db_pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl RelayStore for SqliteStore {
    async fn insert_signal(&self, signal: &SignalingEnvelope) -> Result<()> {
        sqlx::query(
            "INSERT INTO signals (id,room_id,sender_id,receiver_id,signal_type,signal_data,created_at)
             VALUES (?,?,?,?,?,?,?)",
        )
        .bind(signal.id.to_string())
        .bind(signal.room_id.to_string())
        .bind(&signal.sender_id)
        .bind(&signal.receiver_id)
        .bind(signal.signal_type.as_str())
        .bind(serde_json::to_string(&signal.signal_data)?)
        .bind(to_nanos(signal.created_at))
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    async fn pending_signals(&self, room_id: Uuid, receiver_id: &str) -> Result<Vec<SignalingEnvelope>> {
        let rows: Vec<SignalRow> = sqlx::query_as(
            "SELECT id,room_id,sender_id,receiver_id,signal_type,signal_data,created_at
             FROM signals WHERE room_id=? AND receiver_id=? ORDER BY created_at ASC",
        )
        .bind(room_id.to_string())
        .bind(receiver_id)
        .fetch_all(&self.db_pool)
        .await?;
        collect(rows)
    }

    async fn delete_signals(&self, room_id: Uuid, user_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM signals WHERE room_id=? AND (sender_id=? OR receiver_id=?)")
            .bind(room_id.to_string())
            .bind(user_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_message(&self, message: &Message) -> Result<()> {
        sqlx::query("INSERT INTO messages (id,room_id,sender_id,content,created_at) VALUES (?,?,?,?,?)")
            .bind(message.id.to_string())
            .bind(message.room_id.to_string())
            .bind(&message.sender_id)
            .bind(&message.content)
            .bind(to_nanos(message.created_at))
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn messages(&self, room_id: Uuid) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,room_id,sender_id,content,created_at FROM messages
             WHERE room_id=? ORDER BY created_at ASC",
        )
        .bind(room_id.to_string())
        .fetch_all(&self.db_pool)
        .await?;
        collect(rows)
    }

    async fn purge_room(&self, room_id: Uuid) -> Result<()> {
        let mut tx = self.db_pool.begin_with(BEGIN_WRITE).await?;
        sqlx::query("DELETE FROM messages WHERE room_id=?")
            .bind(room_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM signals WHERE room_id=?")
            .bind(room_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
