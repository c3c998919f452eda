//! Flat row types shared by the server, the store and the client.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookingFor {
    #[default]
    Everyone,
    Male,
    Female,
    Other,
}

impl LookingFor {
    pub fn accepts(self, gender: Gender) -> bool {
        match self {
            LookingFor::Everyone => true,
            LookingFor::Male => gender == Gender::Male,
            LookingFor::Female => gender == Gender::Female,
            LookingFor::Other => gender == Gender::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalType {
    Offer,
    Answer,
    IceCandidate,
}

macro_rules! text_enum {
    ($T:ident { $($V:ident => $s:literal),+ $(,)? }) => {
        impl $T {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($T::$V => $s,)+
                }
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $T {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($s => Ok($T::$V),)+
                    _ => Err(Error::CorruptRow(format!("unknown {} {s:?}", stringify!($T)))),
                }
            }
        }
    };
}

text_enum!(Gender { Male => "male", Female => "female", Other => "other" });
text_enum!(LookingFor { Everyone => "everyone", Male => "male", Female => "female", Other => "other" });
text_enum!(RoomStatus { Waiting => "waiting", Active => "active", Ended => "ended" });
text_enum!(SignalType { Offer => "offer", Answer => "answer", IceCandidate => "ice-candidate" });

/// One waiting user. At most one exists per `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub user_id: String,
    pub interests: Vec<String>,
    pub gender: Gender,
    pub looking_for: LookingFor,
    pub is_premium: bool,
    pub country: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl QueueEntry {
    pub fn shares_interest_with(&self, interests: &[String]) -> bool {
        self.interests.iter().any(|i| interests.contains(i))
    }
}

/// A matched pair. Created `active`, ended once, never reactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub user1_id: String,
    pub user2_id: String,
    pub status: RoomStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
}

impl Room {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The other side of the pair, if `user_id` is in the room at all.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        if self.user1_id == user_id {
            Some(&self.user2_id)
        } else if self.user2_id == user_id {
            Some(&self.user1_id)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One offer, answer or ICE candidate addressed to a single participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEnvelope {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub signal_type: SignalType,
    pub signal_data: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn to_nanos(ts: OffsetDateTime) -> i64 {
    ts.unix_timestamp_nanos() as i64
}

pub(crate) fn from_nanos(nanos: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(nanos as i128)
        .map_err(|e| Error::CorruptRow(format!("timestamp {nanos}: {e}")))
}
