//! Request and response bodies for the HTTP surface, plus the change-feed
//! event that every realtime subscriber receives.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    model::{Gender, LookingFor, Message, Room, SignalType, SignalingEnvelope},
};

pub const MAX_INTERESTS: usize = 5;
pub const MAX_MESSAGE_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: String,
    #[serde(default)]
    pub interests: Vec<String>,
    pub gender: Gender,
    #[serde(default)]
    pub looking_for: LookingFor,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub countries: Vec<String>,
    /// Accepted for wire compatibility. Never stored and never used for matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vibe: Option<String>,
}

impl JoinRequest {
    pub fn new(user_id: impl Into<String>, gender: Gender) -> Self {
        Self {
            user_id: user_id.into(),
            interests: Vec::new(),
            gender,
            looking_for: LookingFor::Everyone,
            is_premium: false,
            countries: Vec::new(),
            vibe: None,
        }
    }

    pub fn with_interests<I, S>(mut self, interests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interests = interests.into_iter().map(Into::into).collect();
        self
    }

    pub fn premium(mut self, looking_for: LookingFor) -> Self {
        self.is_premium = true;
        self.looking_for = looking_for;
        self
    }

    pub fn with_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Trims, lower-cases and de-duplicates interests, upper-cases country
    /// codes, and rejects requests the matcher cannot work with.
    pub fn normalized(mut self) -> Result<Self> {
        self.user_id = self.user_id.trim().to_owned();
        if self.user_id.is_empty() {
            return Err(Error::invalid("userId is required"));
        }

        let mut interests: Vec<String> = Vec::with_capacity(self.interests.len());
        for interest in &self.interests {
            let interest = interest.trim().to_lowercase();
            if !interest.is_empty() && !interests.contains(&interest) {
                interests.push(interest);
            }
        }
        if interests.len() > MAX_INTERESTS {
            return Err(Error::invalid(format!(
                "at most {MAX_INTERESTS} interests are allowed, got {}",
                interests.len()
            )));
        }
        self.interests = interests;

        let mut countries: Vec<String> = Vec::with_capacity(self.countries.len());
        for country in &self.countries {
            let country = country.trim().to_uppercase();
            if !country.is_empty() && !countries.contains(&country) {
                countries.push(country);
            }
        }
        self.countries = countries;

        Ok(self)
    }
}

/// `POST /api/matchmaking` body, dispatched on its `action` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MatchRequest {
    JoinQueue(JoinRequest),
    CheckMatch {
        #[serde(rename = "userId")]
        user_id: String,
    },
    LeaveQueue {
        #[serde(rename = "userId")]
        user_id: String,
    },
    LeaveRoom {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "roomId")]
        room_id: Uuid,
    },
    GetOnlineCount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MatchReply", into = "MatchReply")]
pub enum MatchOutcome {
    Matched {
        room: Room,
        shared_interests: Vec<String>,
    },
    Waiting,
}

impl MatchOutcome {
    pub fn room(&self) -> Option<&Room> {
        match self {
            MatchOutcome::Matched { room, .. } => Some(room),
            MatchOutcome::Waiting => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MatchReply {
    Matched {
        matched: bool,
        room: Room,
        #[serde(rename = "sharedInterests", default)]
        shared_interests: Vec<String>,
    },
    Waiting {
        waiting: bool,
    },
}

impl From<MatchOutcome> for MatchReply {
    fn from(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Matched { room, shared_interests } => MatchReply::Matched {
                matched: true,
                room,
                shared_interests,
            },
            MatchOutcome::Waiting => MatchReply::Waiting { waiting: true },
        }
    }
}

impl From<MatchReply> for MatchOutcome {
    fn from(reply: MatchReply) -> Self {
        match reply {
            MatchReply::Matched { room, shared_interests, .. } => MatchOutcome::Matched {
                room,
                shared_interests,
            },
            MatchReply::Waiting { .. } => MatchOutcome::Waiting,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSignal {
    pub sender_id: String,
    pub receiver_id: String,
    pub signal_type: SignalType,
    pub signal_data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
}

impl Success {
    pub const OK: Success = Success { success: true };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineCount {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub alias: String,
}

/// One row-level change, pushed to every subscriber of the row's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    RoomUpdated { room: Room },
    SignalInserted { signal: SignalingEnvelope },
    MessageInserted { message: Message },
}

impl Change {
    pub fn room_id(&self) -> Uuid {
        match self {
            Change::RoomUpdated { room } => room.id,
            Change::SignalInserted { signal } => signal.room_id,
            Change::MessageInserted { message } => message.room_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{now, RoomStatus};

    #[test]
    fn normalizes_interests_and_countries() {
        let req = JoinRequest::new("  u1 ", Gender::Male)
            .with_interests([" Music", "music", "", "ART "])
            .with_countries(["de", " DE", "fr"])
            .normalized()
            .unwrap();
        assert_eq!(req.user_id, "u1");
        assert_eq!(req.interests, vec!["music", "art"]);
        assert_eq!(req.countries, vec!["DE", "FR"]);
    }

    #[test]
    fn rejects_blank_user_and_too_many_interests() {
        assert!(JoinRequest::new(" ", Gender::Male).normalized().is_err());
        let req = JoinRequest::new("u", Gender::Male).with_interests(["a", "b", "c", "d", "e", "f"]);
        assert!(matches!(req.normalized(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn parses_actions_from_camel_case_bodies() {
        let req: MatchRequest = serde_json::from_value(json!({
            "action": "join_queue",
            "userId": "u1",
            "interests": ["music"],
            "gender": "female",
            "lookingFor": "male",
            "isPremium": true,
            "countries": ["US"],
            "vibe": "chill",
        }))
        .unwrap();
        let MatchRequest::JoinQueue(join) = req else {
            panic!("expected join_queue");
        };
        assert_eq!(join.looking_for, LookingFor::Male);
        assert!(join.is_premium);
        assert_eq!(join.vibe.as_deref(), Some("chill"));

        let room_id = Uuid::now_v7();
        let req: MatchRequest = serde_json::from_value(json!({
            "action": "leave_room", "userId": "u1", "roomId": room_id,
        }))
        .unwrap();
        assert_eq!(req, MatchRequest::LeaveRoom { user_id: "u1".into(), room_id });

        let req: MatchRequest = serde_json::from_value(json!({"action": "get_online_count"})).unwrap();
        assert_eq!(req, MatchRequest::GetOnlineCount);
    }

    #[test]
    fn match_outcome_uses_flag_shapes() {
        assert_eq!(serde_json::to_value(MatchOutcome::Waiting).unwrap(), json!({"waiting": true}));

        let room = Room {
            id: Uuid::now_v7(),
            user1_id: "a".into(),
            user2_id: "b".into(),
            status: RoomStatus::Active,
            created_at: now(),
            ended_at: None,
        };
        let matched = MatchOutcome::Matched { room: room.clone(), shared_interests: vec!["music".into()] };
        let value = serde_json::to_value(&matched).unwrap();
        assert_eq!(value["matched"], json!(true));
        assert_eq!(value["sharedInterests"], json!(["music"]));
        assert_eq!(value["room"]["user1_id"], json!("a"));

        let back: MatchOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, matched);
        let waiting: MatchOutcome = serde_json::from_value(json!({"waiting": true})).unwrap();
        assert_eq!(waiting, MatchOutcome::Waiting);
    }
}
