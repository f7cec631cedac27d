//! Terminal chat view: turns engine events and typed lines into actions.
//!
//! [`ChatView`] holds no I/O. `main` feeds it events and input and performs
//! the [`Action`]s it returns.

use std::collections::HashSet;

use parley_net::{ChatMessageData, Event, NewChatMessage, SessionOutcome, StopReason};
use uuid::Uuid;

/// A line typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Post as a chat message.
    Message(String),
    /// `/refresh`
    Refresh,
    /// `/restart`
    Restart,
    /// `/quit`
    Quit,
    /// Any other `/command`.
    Unknown(String),
    /// Blank line.
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    match line {
        "/refresh" => Input::Refresh,
        "/restart" => Input::Restart,
        "/quit" | "/exit" => Input::Quit,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd.to_string()),
        text => Input::Message(text.to_string()),
    }
}

/// Something `main` should do on behalf of the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    InitSession { user_id: Uuid, username: String },
    ConfirmSession { user_id: Uuid, session_id: Uuid },
    RequestHistory { session_id: Uuid },
    Post { session_id: Uuid, message: NewChatMessage },
    Restart,
    Print(String),
    Exit,
}

/// Client-side view of one chat.
#[derive(Debug)]
pub struct ChatView {
    username: String,
    session_id: Option<Uuid>,
    /// Ids already printed, so refreshes only show what is new.
    shown: HashSet<u64>,
    restart_pending: bool,
}

impl ChatView {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            session_id: None,
            shown: HashSet::new(),
            restart_pending: false,
        }
    }

    #[cfg(test)]
    fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        match event {
            Event::StartedSuccessfully => {
                self.restart_pending = false;
                vec![
                    Action::Print("* connected".to_string()),
                    Action::InitSession {
                        user_id: Uuid::new_v4(),
                        username: self.username.clone(),
                    },
                ]
            }
            Event::Stopped { reason } => {
                self.session_id = None;
                // Only the stop the restart itself causes is expected.
                if std::mem::take(&mut self.restart_pending) {
                    return vec![Action::Print("* reconnecting".to_string())];
                }
                vec![Action::Print(describe_stop(reason).to_string()), Action::Exit]
            }
            Event::NewSessionInitiated(SessionOutcome::Accepted {
                user_id,
                session_id,
            }) => {
                self.session_id = Some(session_id);
                vec![
                    Action::Print(format!("* joined as {}", self.username)),
                    Action::ConfirmSession {
                        user_id,
                        session_id,
                    },
                    Action::RequestHistory { session_id },
                ]
            }
            Event::NewSessionInitiated(SessionOutcome::Rejected { reason, .. }) => {
                vec![Action::Print(format!("* cannot join: {reason}")), Action::Exit]
            }
            Event::ChatHistoryReceived(messages) => self.new_lines(&messages),
            Event::ChatMessageSentSuccess | Event::ChatHasBeenUpdated => self.refresh(),
        }
    }

    pub fn on_input(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Message(text) => match self.session_id {
                Some(session_id) => vec![Action::Post {
                    session_id,
                    message: NewChatMessage {
                        username: self.username.clone(),
                        text,
                    },
                }],
                None => vec![Action::Print("* not joined yet, message dropped".to_string())],
            },
            Input::Refresh => self.refresh(),
            Input::Restart => {
                self.restart_pending = true;
                self.session_id = None;
                vec![Action::Restart]
            }
            Input::Quit => vec![Action::Exit],
            Input::Unknown(cmd) => vec![Action::Print(format!(
                "* unknown command {cmd} (try /refresh, /restart, /quit)"
            ))],
            Input::Empty => Vec::new(),
        }
    }

    fn refresh(&self) -> Vec<Action> {
        self.session_id
            .map(|session_id| Action::RequestHistory { session_id })
            .into_iter()
            .collect()
    }

    fn new_lines(&mut self, messages: &[ChatMessageData]) -> Vec<Action> {
        messages
            .iter()
            .filter(|m| self.shown.insert(m.id))
            .map(|m| Action::Print(format!("{}: {}", m.username, m.text)))
            .collect()
    }
}

fn describe_stop(reason: StopReason) -> &'static str {
    match reason {
        StopReason::Requested => "* disconnected",
        StopReason::StartFailed => "* could not reach the server",
        StopReason::ConnectionLost => "* connection lost",
        StopReason::ProtocolError => "* server sent garbage, disconnected",
    }
}
