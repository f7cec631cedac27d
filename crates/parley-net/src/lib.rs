//! Client-side engine for the parley chat protocol: message codec, framing,
//! connection management, session handshake, request dispatch and
//! notification routing, driven by a single worker task.

pub mod channel;
pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod framing;
pub mod messages;
pub mod notifications;
pub mod session;
pub mod state;
mod worker;

pub use channel::{Command, Event, EventSink, StopReason};
pub use client::{ChatClient, ClientError};
pub use connection::{
    CloseOutcome, Connection, ConnectionError, ConnectionState, ConnectionStateWatch,
    ReceivedFrames,
};
pub use dispatcher::{Correlation, Dispatcher, PendingRequest, RequestPhase};
pub use framing::{FrameConfig, FrameDecoder, FrameError, read_frame, write_frame};
pub use messages::{
    ChatMessageData, Message, MessageError, MessageTag, NewChatMessage, NotificationKind,
    deserialize_message, encode_frame, serialize_message,
};
pub use notifications::{NotificationHandler, NotificationRouter};
pub use session::{Session, SessionOutcome, SessionRejection, SessionState, SessionWatch};
pub use state::StateWatch;
pub use worker::EngineConfig;
