//! Realtime Wire Protocol
//!
//! Single responsibility: the envelope model and its JSON encoding.
//!
//! # Wire Format
//!
//! Every frame is a JSON text message holding an optional correlation id and
//! exactly one payload keyed by its variant name:
//!
//! ```text
//! { "cid": "7", "match_create": { "name": "arena" } }     // request
//! { "cid": "7", "match": { "match_id": "...", ... } }      // reply
//! { "cid": "8", "error": { "code": 5, "message": "..." } } // error reply
//! { "cid": "9" }                                           // bare ack
//! { "match_data": { ... } }                                // push
//! ```
//!
//! Field names are the proto names (snake_case). Fields at their zero value
//! may be omitted by the server, so every payload decodes with defaults.
//! `int64` fields travel as JSON strings and `bytes` fields as base64.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{RealtimeError, Result};

/// One frame on the realtime socket.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Envelope {
    /// Correlation id; replies echo the id of their request.
    pub cid: Option<String>,
    /// `None` for a bare acknowledgement.
    pub message: Option<Message>,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            cid: None,
            message: Some(message),
        }
    }

    pub fn with_cid(mut self, cid: impl Into<String>) -> Self {
        self.cid = Some(cid.into());
        self
    }

    /// The correlation id, treating an empty string as absent.
    pub fn correlation_id(&self) -> Option<&str> {
        self.cid.as_deref().filter(|cid| !cid.is_empty())
    }

    pub fn is_pong(&self) -> bool {
        matches!(self.message, Some(Message::Pong(_)))
    }

    /// Push kind of this frame, if it is an unsolicited event.
    ///
    /// A push-shaped payload that carries a correlation id is a reply to a
    /// request (e.g. `party` answering `party_create`) and is not a push.
    pub fn push_kind(&self) -> Option<EventKind> {
        if self.correlation_id().is_some() {
            return None;
        }
        self.message.as_ref().and_then(Message::event_kind)
    }
}

/// Encode an envelope as a JSON text frame.
pub fn encode_envelope(envelope: &Envelope) -> Result<String> {
    let mut value = match &envelope.message {
        Some(message) => serde_json::to_value(message)?,
        None => Value::Object(Map::new()),
    };
    if let (Some(cid), Value::Object(map)) = (&envelope.cid, &mut value) {
        map.insert("cid".into(), Value::String(cid.clone()));
    }
    Ok(serde_json::to_string(&value)?)
}

/// Decode a JSON text frame into an envelope.
pub fn decode_envelope(text: &str) -> Result<Envelope> {
    let mut map: Map<String, Value> = serde_json::from_str(text)?;

    let cid = match map.remove("cid") {
        Some(Value::String(cid)) => Some(cid),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    let message = if map.is_empty() {
        None
    } else {
        Some(serde_json::from_value(Value::Object(map))?)
    };

    Ok(Envelope { cid, message })
}

/// Server-originated event kinds that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Notification,
    MatchData,
    MatchPresence,
    MatchmakerTicket,
    MatchmakerMatched,
    StatusPresence,
    StreamPresence,
    StreamData,
    ChannelMessage,
    ChannelPresence,
    PartyData,
    PartyPresence,
    PartyClose,
    PartyJoinRequest,
    PartyLeader,
    PartyMatchmakerTicket,
    Party,
}

/// Every payload the socket carries, keyed by its wire name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    // Keep-alive
    Ping(Ping),
    Pong(Pong),

    Error(ErrorPayload),

    // Pushes (some double as replies)
    Notifications(Notifications),
    MatchData(MatchData),
    MatchPresenceEvent(MatchPresenceEvent),
    MatchmakerTicket(MatchmakerTicket),
    MatchmakerMatched(MatchmakerMatched),
    StatusPresenceEvent(StatusPresenceEvent),
    StreamPresenceEvent(StreamPresenceEvent),
    StreamData(StreamData),
    ChannelMessage(ChannelMessage),
    ChannelPresenceEvent(ChannelPresenceEvent),
    PartyData(PartyData),
    PartyPresenceEvent(PartyPresenceEvent),
    PartyClose(PartyClose),
    PartyJoinRequest(PartyJoinRequest),
    PartyLeader(PartyLeader),
    PartyMatchmakerTicket(PartyMatchmakerTicket),
    Party(Party),

    // Replies
    Match(Match),
    Channel(Channel),
    ChannelMessageAck(ChannelMessageAck),
    Status(Status),
    Rpc(Rpc),

    // Requests
    MatchmakerAdd(MatchmakerAdd),
    MatchmakerRemove(MatchmakerRemove),
    PartyMatchmakerAdd(PartyMatchmakerAdd),
    PartyMatchmakerRemove(PartyMatchmakerRemove),
    MatchCreate(MatchCreate),
    MatchJoin(MatchJoin),
    MatchLeave(MatchLeave),
    MatchDataSend(MatchDataSend),
    PartyCreate(PartyCreate),
    PartyJoin(PartyJoin),
    PartyLeave(PartyLeave),
    PartyPromote(PartyPromote),
    PartyAccept(PartyAccept),
    PartyRemove(PartyRemove),
    PartyJoinRequestList(PartyJoinRequestList),
    PartyDataSend(PartyDataSend),
    StatusFollow(StatusFollow),
    StatusUnfollow(StatusUnfollow),
    StatusUpdate(StatusUpdate),
    ChannelJoin(ChannelJoin),
    ChannelLeave(ChannelLeave),
    ChannelMessageSend(ChannelMessageSend),
    ChannelMessageUpdate(ChannelMessageUpdate),
    ChannelMessageRemove(ChannelMessageRemove),
}

impl Message {
    /// The event kind this payload is routed under when pushed.
    pub fn event_kind(&self) -> Option<EventKind> {
        let kind = match self {
            Self::Notifications(_) => EventKind::Notification,
            Self::MatchData(_) => EventKind::MatchData,
            Self::MatchPresenceEvent(_) => EventKind::MatchPresence,
            Self::MatchmakerTicket(_) => EventKind::MatchmakerTicket,
            Self::MatchmakerMatched(_) => EventKind::MatchmakerMatched,
            Self::StatusPresenceEvent(_) => EventKind::StatusPresence,
            Self::StreamPresenceEvent(_) => EventKind::StreamPresence,
            Self::StreamData(_) => EventKind::StreamData,
            Self::ChannelMessage(_) => EventKind::ChannelMessage,
            Self::ChannelPresenceEvent(_) => EventKind::ChannelPresence,
            Self::PartyData(_) => EventKind::PartyData,
            Self::PartyPresenceEvent(_) => EventKind::PartyPresence,
            Self::PartyClose(_) => EventKind::PartyClose,
            Self::PartyJoinRequest(_) => EventKind::PartyJoinRequest,
            Self::PartyLeader(_) => EventKind::PartyLeader,
            Self::PartyMatchmakerTicket(_) => EventKind::PartyMatchmakerTicket,
            Self::Party(_) => EventKind::Party,
            _ => return None,
        };
        Some(kind)
    }
}

// ─── keep-alive & error ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ping {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pong {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
    pub context: HashMap<String, String>,
}

impl From<ErrorPayload> for RealtimeError {
    fn from(payload: ErrorPayload) -> Self {
        RealtimeError::new(payload.code, payload.message, payload.context)
    }
}

// ─── shared ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserPresence {
    pub user_id: String,
    pub session_id: String,
    pub username: String,
    pub persistence: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stream {
    pub mode: i32,
    pub subject: String,
    pub subcontext: String,
    pub label: String,
}

// ─── pushes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notification {
    pub id: String,
    pub subject: String,
    pub content: String,
    pub code: i32,
    pub sender_id: String,
    pub create_time: Option<String>,
    pub persistent: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchData {
    pub match_id: String,
    pub presence: Option<UserPresence>,
    #[serde(with = "int64")]
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub reliable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPresenceEvent {
    pub match_id: String,
    pub joins: Vec<UserPresence>,
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerTicket {
    pub ticket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerUser {
    pub presence: Option<UserPresence>,
    pub party_id: String,
    pub string_properties: HashMap<String, String>,
    pub numeric_properties: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerMatched {
    pub ticket: String,
    pub match_id: Option<String>,
    pub token: Option<String>,
    pub users: Vec<MatchmakerUser>,
    #[serde(rename = "self")]
    pub self_user: Option<MatchmakerUser>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusPresenceEvent {
    pub joins: Vec<UserPresence>,
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamPresenceEvent {
    pub stream: Option<Stream>,
    pub joins: Vec<UserPresence>,
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamData {
    pub stream: Option<Stream>,
    pub sender: Option<UserPresence>,
    pub data: String,
    pub reliable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessage {
    pub channel_id: String,
    pub message_id: String,
    pub code: Option<i32>,
    pub sender_id: String,
    pub username: String,
    pub content: String,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
    pub persistent: Option<bool>,
    pub room_name: String,
    pub group_id: String,
    pub user_id_one: String,
    pub user_id_two: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPresenceEvent {
    pub channel_id: String,
    pub joins: Vec<UserPresence>,
    pub leaves: Vec<UserPresence>,
    pub room_name: String,
    pub group_id: String,
    pub user_id_one: String,
    pub user_id_two: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyData {
    pub party_id: String,
    pub presence: Option<UserPresence>,
    #[serde(with = "int64")]
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyPresenceEvent {
    pub party_id: String,
    pub joins: Vec<UserPresence>,
    pub leaves: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyClose {
    pub party_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyJoinRequest {
    pub party_id: String,
    pub presences: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyLeader {
    pub party_id: String,
    pub presence: Option<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyMatchmakerTicket {
    pub party_id: String,
    pub ticket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Party {
    pub party_id: String,
    pub open: bool,
    pub max_size: i32,
    #[serde(rename = "self")]
    pub self_presence: Option<UserPresence>,
    pub leader: Option<UserPresence>,
    pub presences: Vec<UserPresence>,
}

// ─── replies ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Match {
    pub match_id: String,
    pub authoritative: bool,
    pub label: Option<String>,
    pub size: i32,
    pub presences: Vec<UserPresence>,
    #[serde(rename = "self")]
    pub self_presence: Option<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub presences: Vec<UserPresence>,
    #[serde(rename = "self")]
    pub self_presence: Option<UserPresence>,
    pub room_name: String,
    pub group_id: String,
    pub user_id_one: String,
    pub user_id_two: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessageAck {
    pub channel_id: String,
    pub message_id: String,
    pub code: Option<i32>,
    pub username: String,
    pub create_time: Option<String>,
    pub update_time: Option<String>,
    pub persistent: Option<bool>,
    pub room_name: String,
    pub group_id: String,
    pub user_id_one: String,
    pub user_id_two: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub presences: Vec<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rpc {
    pub id: String,
    pub payload: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_key: String,
}

// ─── requests ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerAdd {
    pub min_count: i32,
    pub max_count: i32,
    pub query: String,
    pub string_properties: HashMap<String, String>,
    pub numeric_properties: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakerRemove {
    pub ticket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyMatchmakerAdd {
    pub party_id: String,
    pub min_count: i32,
    pub max_count: i32,
    pub query: String,
    pub string_properties: HashMap<String, String>,
    pub numeric_properties: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyMatchmakerRemove {
    pub party_id: String,
    pub ticket: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchCreate {
    pub name: String,
}

/// Join by match id or by matchmaker token; exactly one should be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchJoin {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchLeave {
    pub match_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchDataSend {
    pub match_id: String,
    #[serde(with = "int64")]
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub presences: Vec<UserPresence>,
    pub reliable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyCreate {
    pub open: bool,
    pub max_size: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyJoin {
    pub party_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyLeave {
    pub party_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyPromote {
    pub party_id: String,
    pub presence: Option<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyAccept {
    pub party_id: String,
    pub presence: Option<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyRemove {
    pub party_id: String,
    pub presence: Option<UserPresence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyJoinRequestList {
    pub party_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartyDataSend {
    pub party_id: String,
    #[serde(with = "int64")]
    pub op_code: i64,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusFollow {
    pub user_ids: Vec<String>,
    pub usernames: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUnfollow {
    pub user_ids: Vec<String>,
}

/// `status: None` clears the status and appears offline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Chat channel target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Room = 1,
    DirectMessage = 2,
    Group = 3,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelJoin {
    pub target: String,
    #[serde(rename = "type")]
    pub channel_type: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLeave {
    pub channel_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessageSend {
    pub channel_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessageUpdate {
    pub channel_id: String,
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMessageRemove {
    pub channel_id: String,
    pub message_id: String,
}

/// `int64` as a JSON string on the way out, string or number on the way in.
mod int64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

/// `bytes` as standard base64.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}
