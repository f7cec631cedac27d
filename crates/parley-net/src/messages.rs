//! Chat protocol message types and JSON serialization.
//!
//! Every message is a JSON object carrying a `type` field whose value names
//! the variant. Field names are camelCase on the wire. Use
//! [`serialize_message`] and [`deserialize_message`] for payload
//! encoding/decoding, and [`encode_frame`] for the exact bytes to write.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::framing::{FrameConfig, FrameError, frame_payload};

/// Name of the discriminator field present in every wire object.
pub const TYPE_FIELD: &str = "type";

// ---------------------------------------------------------------------------
// Top-level enum
// ---------------------------------------------------------------------------

/// Top-level protocol message. The `type` field is the tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Message {
    // --- Session ---
    /// Client asks the server to open a session for a user.
    NewSessionRequest(NewSessionRequest),
    /// Server answers a [`NewSessionRequest`].
    NewSessionResponse(NewSessionResponse),
    /// Client acknowledges the session it was granted. No reply follows.
    NewSessionConfirm(NewSessionConfirm),

    // --- Chat ---
    /// Client asks for the full chat history.
    GetHistory(GetHistory),
    /// Server returns the chat history.
    GetHistoryResponse(GetHistoryResponse),
    /// Client posts a chat message.
    AddMessage(AddMessage),
    /// Server reports whether the posted message was stored.
    AddMessageResponse(AddMessageResponse),

    // --- Push ---
    /// Unsolicited server push.
    Notification(Notification),
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// `false` when the server refused the requested username.
    pub username_valid: bool,
    /// Echo of the user the session was opened for.
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionConfirm {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetHistory {
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GetHistoryResponse {
    /// Messages in server insertion order (oldest first).
    pub messages: Vec<ChatMessageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddMessage {
    pub session_id: Uuid,
    pub username: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageResponse {
    pub result: SendResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_kind: NotificationKind,
}

/// Outcome reported in [`AddMessageResponse`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendResult {
    Success,
    Failure,
}

/// Kind of an unsolicited [`Notification`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// The chat history changed on the server.
    MessagesUpdated,
}

/// A single chat entry as stored by the server.
///
/// Immutable once received. `id` uniqueness and ordering are server
/// guarantees and are not re-checked here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageData {
    pub id: u64,
    pub username: String,
    pub text: String,
    /// Unix milliseconds, server clock.
    pub post_time: i64,
}

/// Caller-side content of a chat message before it is bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub username: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// MessageTag
// ---------------------------------------------------------------------------

/// Type tag of a [`Message`], as carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    NewSessionRequest,
    NewSessionResponse,
    NewSessionConfirm,
    GetHistory,
    GetHistoryResponse,
    AddMessage,
    AddMessageResponse,
    Notification,
}

impl MessageTag {
    /// Every tag, in declaration order.
    pub const ALL: [MessageTag; 8] = [
        MessageTag::NewSessionRequest,
        MessageTag::NewSessionResponse,
        MessageTag::NewSessionConfirm,
        MessageTag::GetHistory,
        MessageTag::GetHistoryResponse,
        MessageTag::AddMessage,
        MessageTag::AddMessageResponse,
        MessageTag::Notification,
    ];

    /// The wire string for this tag.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageTag::NewSessionRequest => "NewSessionRequest",
            MessageTag::NewSessionResponse => "NewSessionResponse",
            MessageTag::NewSessionConfirm => "NewSessionConfirm",
            MessageTag::GetHistory => "GetHistory",
            MessageTag::GetHistoryResponse => "GetHistoryResponse",
            MessageTag::AddMessage => "AddMessage",
            MessageTag::AddMessageResponse => "AddMessageResponse",
            MessageTag::Notification => "Notification",
        }
    }

    /// Response tag the server answers this request tag with.
    ///
    /// `None` for fire-and-forget requests and for tags that are not
    /// client requests at all.
    pub fn expected_response(self) -> Option<MessageTag> {
        match self {
            MessageTag::NewSessionRequest => Some(MessageTag::NewSessionResponse),
            MessageTag::GetHistory => Some(MessageTag::GetHistoryResponse),
            MessageTag::AddMessage => Some(MessageTag::AddMessageResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageTag {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageTag::ALL
            .into_iter()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| MessageError::UnknownType(s.to_string()))
    }
}

impl Message {
    /// Extract the type tag without consuming the message.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::NewSessionRequest(_) => MessageTag::NewSessionRequest,
            Message::NewSessionResponse(_) => MessageTag::NewSessionResponse,
            Message::NewSessionConfirm(_) => MessageTag::NewSessionConfirm,
            Message::GetHistory(_) => MessageTag::GetHistory,
            Message::GetHistoryResponse(_) => MessageTag::GetHistoryResponse,
            Message::AddMessage(_) => MessageTag::AddMessage,
            Message::AddMessageResponse(_) => MessageTag::AddMessageResponse,
            Message::Notification(_) => MessageTag::Notification,
        }
    }

    /// Whether sending this message means waiting for a reply.
    pub fn expects_response(&self) -> bool {
        self.tag().expected_response().is_some()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while decoding or encoding a message.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The frame carried no bytes.
    #[error("empty payload")]
    Empty,

    /// The payload parsed as JSON but is not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// The object has no string `type` field.
    #[error("missing `type` field")]
    MissingType,

    /// The `type` field names no known message.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Invalid JSON, or fields that do not match the tagged variant.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The encoded message could not be framed.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

/// Serialize a [`Message`] into its JSON payload.
pub fn serialize_message(msg: &Message) -> Result<Vec<u8>, MessageError> {
    Ok(serde_json::to_vec(msg)?)
}

/// Deserialize a JSON payload into a [`Message`].
///
/// The checks run from coarse to fine so each failure is reported with the
/// most specific [`MessageError`] variant.
pub fn deserialize_message(data: &[u8]) -> Result<Message, MessageError> {
    if data.is_empty() {
        return Err(MessageError::Empty);
    }

    let value: serde_json::Value = serde_json::from_slice(data)?;
    let object = value.as_object().ok_or(MessageError::NotAnObject)?;
    let tag = object
        .get(TYPE_FIELD)
        .and_then(serde_json::Value::as_str)
        .ok_or(MessageError::MissingType)?;
    tag.parse::<MessageTag>()?;

    Ok(serde_json::from_value(value)?)
}

/// Encode a [`Message`] into the exact bytes to put on the wire
/// (length prefix followed by the JSON payload).
pub fn encode_frame(msg: &Message, config: &FrameConfig) -> Result<Vec<u8>, MessageError> {
    let payload = serialize_message(msg)?;
    Ok(frame_payload(&payload, config)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
