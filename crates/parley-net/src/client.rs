//! Caller-facing handle to the chat engine.
//!
//! [`ChatClient`] spawns the engine worker on the current tokio runtime and
//! talks to it only through channels: command methods enqueue a [`Command`]
//! and return immediately, results come back as [`Event`]s in the order the
//! worker produced them. Connection and session state are observable through
//! [`watch`] channels so any number of consumers can react without polling.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::{Command, CommandSender, Event, EventReceiver, command_channel, event_channel};
use crate::connection::{ConnectionState, ConnectionStateWatch};
use crate::messages::NewChatMessage;
use crate::notifications::NotificationRouter;
use crate::session::{Session, SessionWatch};
use crate::worker::{EngineConfig, Worker};

/// Errors returned by [`ChatClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The worker task has exited and no longer accepts commands.
    #[error("engine worker is gone")]
    WorkerGone,

    /// The worker task panicked or was cancelled.
    #[error("engine worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handle to a running chat engine.
///
/// Dropping the handle closes the command channel; the worker then stops any
/// connection and exits on its own. Use [`ChatClient::shutdown`] to wait for
/// that to finish.
pub struct ChatClient {
    commands: CommandSender,
    events: EventReceiver,
    state: Arc<ConnectionStateWatch>,
    session: Arc<SessionWatch>,
    worker: JoinHandle<()>,
}

impl ChatClient {
    /// Spawn the engine with the default notification routing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: EngineConfig) -> Self {
        Self::spawn_with_router(config, NotificationRouter::with_defaults())
    }

    /// Spawn the engine with a custom notification router.
    pub fn spawn_with_router(config: EngineConfig, router: NotificationRouter) -> Self {
        let (commands, command_rx) = command_channel();
        let (sink, events) = event_channel();
        let state = Arc::new(ConnectionStateWatch::default());
        let session = Arc::new(SessionWatch::default());

        let worker = Worker::new(
            config,
            command_rx,
            sink,
            Arc::clone(&state),
            Arc::clone(&session),
            router,
        );
        let worker = tokio::spawn(worker.run());

        Self {
            commands,
            events,
            state,
            session,
            worker,
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::WorkerGone)
    }

    /// Connect to `host:port`. Ignored if already connecting or connected.
    pub fn start(&self, host: impl Into<String>, port: u16) -> Result<(), ClientError> {
        self.send(Command::Start {
            host: host.into(),
            port,
        })
    }

    /// Disconnect, abandoning queued and in-flight requests.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.send(Command::Stop)
    }

    /// Disconnect, then connect to `host:port` once the old connection is gone.
    pub fn restart(&self, host: impl Into<String>, port: u16) -> Result<(), ClientError> {
        self.send(Command::Restart {
            host: host.into(),
            port,
        })
    }

    /// Ask the server for a session for `user_id` under `username`.
    pub fn init_session(
        &self,
        user_id: Uuid,
        username: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send(Command::InitSession {
            user_id,
            username: username.into(),
        })
    }

    /// Confirm a session granted by the server.
    pub fn confirm_session(&self, user_id: Uuid, session_id: Uuid) -> Result<(), ClientError> {
        self.send(Command::ConfirmSession {
            user_id,
            session_id,
        })
    }

    /// Queue a chat history request.
    pub fn add_get_chat_request(&self, session_id: Uuid) -> Result<(), ClientError> {
        self.send(Command::GetChatHistory { session_id })
    }

    /// Queue a chat message post.
    pub fn add_send_chat_message_request(
        &self,
        session_id: Uuid,
        message: NewChatMessage,
    ) -> Result<(), ClientError> {
        self.send(Command::SendChatMessage {
            session_id,
            message,
        })
    }

    /// Wait for the next event. `None` once the worker has exited and every
    /// event has been taken.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Take the next event if one is ready.
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.events.try_recv().ok()
    }

    /// Whether a connection is open or being opened or closed.
    pub fn is_active(&self) -> bool {
        self.state.current() != ConnectionState::Disconnected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Subscribe to connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The session as of the worker's last completed step.
    pub fn session(&self) -> Session {
        self.session.current()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    /// Stop any connection and wait for the worker to exit.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        // A closed channel means the worker is already on its way out.
        let _ = self.commands.send(Command::Shutdown);
        self.worker.await?;
        Ok(())
    }
}
