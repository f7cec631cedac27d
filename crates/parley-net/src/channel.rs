//! Commands into the engine worker and events out of it.
//!
//! Both directions are unbounded [`mpsc`] channels carrying closed enums, so
//! the caller never blocks on network I/O and events arrive in exactly the
//! order the worker produced them.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::messages::{ChatMessageData, NewChatMessage};
use crate::session::SessionOutcome;

/// Instructions accepted by the engine worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Open a connection. Ignored with a warning if one is open or opening.
    Start { host: String, port: u16 },
    /// Close the connection, abandoning all queued requests.
    Stop,
    /// Stop, then start once the stop has fully completed.
    Restart { host: String, port: u16 },
    /// Ask the server for a session.
    InitSession { user_id: Uuid, username: String },
    /// Confirm a granted session. Fire-and-forget.
    ConfirmSession { user_id: Uuid, session_id: Uuid },
    /// Fetch the chat history.
    GetChatHistory { session_id: Uuid },
    /// Post a chat message.
    SendChatMessage {
        session_id: Uuid,
        message: NewChatMessage,
    },
    /// Stop if needed, then end the worker task.
    Shutdown,
}

/// Why a connection attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The caller asked for it (stop, restart or shutdown).
    Requested,
    /// The connection could not be established.
    StartFailed,
    /// The peer closed the connection or the socket failed.
    ConnectionLost,
    /// The inbound byte stream could not be framed.
    ProtocolError,
}

/// Notifications emitted by the engine worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection is up.
    StartedSuccessfully,
    /// A connection attempt ended. Exactly one per attempt.
    Stopped { reason: StopReason },
    /// The server answered a session request.
    NewSessionInitiated(SessionOutcome),
    /// Chat history in server order.
    ChatHistoryReceived(Vec<ChatMessageData>),
    /// The server stored a posted message.
    ChatMessageSentSuccess,
    /// The server reported that the history changed.
    ChatHasBeenUpdated,
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Sending side of the event channel.
///
/// Emitting never fails: once the caller has dropped its receiver, events
/// are discarded with a trace record.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSink {
    pub fn emit(&self, event: Event) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            tracing::trace!(?event, "Event receiver dropped, discarding");
        }
    }
}

/// Create the command channel.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

/// Create the event channel.
pub fn event_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}
