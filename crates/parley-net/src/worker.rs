//! The engine worker: a single task owning the socket, the request queue,
//! the session and the request timer.
//!
//! Everything the worker does happens inside [`Worker::run`], one event at a
//! time, so none of its state needs locking. It waits on exactly three
//! things: the next [`Command`], the connection (connect completion or socket
//! readiness) and the in-flight request's deadline. The only state shared
//! with other tasks is published through the [`ConnectionStateWatch`] and
//! the [`SessionWatch`], which only the worker writes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::channel::{Command, CommandReceiver, Event, EventSink, StopReason};
use crate::connection::{
    Connection, ConnectionError, ConnectionState, ConnectionStateWatch, ReceivedFrames,
};
use crate::dispatcher::{Correlation, Dispatcher, PendingRequest};
use crate::framing::FrameConfig;
use crate::messages::{
    AddMessage, GetHistory, Message, NewSessionConfirm, NewSessionRequest, SendResult,
    deserialize_message,
};
use crate::notifications::NotificationRouter;
use crate::session::{Session, SessionWatch};

/// Tunables of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a request waits for its response before being abandoned.
    /// Default: 5 s.
    pub request_timeout: Duration,
    /// Bound on a connect attempt. Default: 10 s.
    pub connect_timeout: Duration,
    /// How long a stop waits for the peer to close. Default: 3 s.
    pub stop_grace_period: Duration,
    /// Frame size limits.
    pub frame: FrameConfig,
    /// Size of each socket read. Default: 4096.
    pub read_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            stop_grace_period: Duration::from_secs(3),
            frame: FrameConfig::default(),
            read_buffer_size: 4096,
        }
    }
}

type ConnectAttempt = Pin<Box<dyn Future<Output = Result<Connection, ConnectionError>> + Send>>;

enum Link {
    Idle,
    Connecting(ConnectAttempt),
    Connected(Connection),
}

enum LinkEvent {
    Opened(Result<Connection, ConnectionError>),
    Received(Result<ReceivedFrames, ConnectionError>),
}

/// Wait for whatever the link is waiting on. Never resolves when idle.
async fn next_link_event(link: &mut Link) -> LinkEvent {
    match link {
        Link::Idle => std::future::pending().await,
        Link::Connecting(attempt) => LinkEvent::Opened(attempt.as_mut().await),
        Link::Connected(conn) => LinkEvent::Received(conn.recv_frames().await),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub(crate) struct Worker {
    config: EngineConfig,
    commands: CommandReceiver,
    events: EventSink,
    state: Arc<ConnectionStateWatch>,
    session_watch: Arc<SessionWatch>,
    router: NotificationRouter,
    dispatcher: Dispatcher,
    session: Session,
    link: Link,
}

impl Worker {
    pub(crate) fn new(
        config: EngineConfig,
        commands: CommandReceiver,
        events: EventSink,
        state: Arc<ConnectionStateWatch>,
        session_watch: Arc<SessionWatch>,
        router: NotificationRouter,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.request_timeout);
        Self {
            config,
            commands,
            events,
            state,
            session_watch,
            router,
            dispatcher,
            session: Session::new(),
            link: Link::Idle,
        }
    }

    /// Process commands, socket traffic and timeouts until shut down.
    ///
    /// Returns after a [`Command::Shutdown`] or once every command sender is
    /// gone, with any open connection stopped.
    pub(crate) async fn run(mut self) {
        tracing::debug!("Engine worker started");
        loop {
            let deadline = self.dispatcher.deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.stop(StopReason::Requested).await;
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                event = next_link_event(&mut self.link) => match event {
                    LinkEvent::Opened(result) => self.on_opened(result).await,
                    LinkEvent::Received(result) => self.on_received(result).await,
                },
                () = sleep_until_deadline(deadline) => self.on_timeout().await,
            }
            self.publish_session();
        }
        self.publish_session();
        tracing::debug!("Engine worker exited");
    }

    fn publish_session(&self) {
        if self.session_watch.publish(self.session.clone()) {
            tracing::trace!(state = ?self.session.state(), "Session state published");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { host, port } => self.start(host, port),
            Command::Stop => self.stop(StopReason::Requested).await,
            Command::Restart { host, port } => {
                self.stop(StopReason::Requested).await;
                self.start(host, port);
            }
            Command::InitSession { user_id, username } => {
                self.submit(Message::NewSessionRequest(NewSessionRequest {
                    user_id,
                    username,
                }))
                .await;
            }
            Command::ConfirmSession {
                user_id,
                session_id,
            } => {
                self.submit(Message::NewSessionConfirm(NewSessionConfirm {
                    user_id,
                    session_id,
                }))
                .await;
            }
            Command::GetChatHistory { session_id } => {
                self.submit(Message::GetHistory(GetHistory { session_id }))
                    .await;
            }
            Command::SendChatMessage {
                session_id,
                message,
            } => {
                self.submit(Message::AddMessage(AddMessage {
                    session_id,
                    username: message.username,
                    text: message.text,
                }))
                .await;
            }
            Command::Shutdown => {}
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    fn start(&mut self, host: String, port: u16) {
        if !matches!(self.link, Link::Idle) {
            tracing::warn!(%host, port, state = ?self.state.current(), "Start ignored, already running");
            return;
        }

        tracing::info!(%host, port, "Connecting");
        self.session.begin_connect();
        self.state.publish(ConnectionState::Connecting);

        let connect_timeout = self.config.connect_timeout;
        let frame = self.config.frame.clone();
        let read_buffer_size = self.config.read_buffer_size;
        self.link = Link::Connecting(Box::pin(async move {
            Connection::open(&host, port, connect_timeout, frame, read_buffer_size).await
        }));
    }

    async fn on_opened(&mut self, result: Result<Connection, ConnectionError>) {
        match result {
            Ok(conn) => {
                tracing::info!(peer = %conn.peer_addr(), "Connected");
                self.link = Link::Connected(conn);
                self.state.publish(ConnectionState::Connected);
                self.session.on_connected();
                self.events.emit(Event::StartedSuccessfully);
                // Requests submitted while connecting go out now.
                self.pump().await;
            }
            Err(e) => {
                tracing::warn!("Connect failed: {e}");
                self.link = Link::Idle;
                self.stop(StopReason::StartFailed).await;
            }
        }
    }

    /// Tear down the current connection attempt, if any, and emit its single
    /// [`Event::Stopped`].
    ///
    /// Queued and in-flight requests are abandoned. For a requested stop the
    /// socket is closed gracefully within the configured grace period;
    /// otherwise it is dropped.
    async fn stop(&mut self, reason: StopReason) {
        let link = std::mem::replace(&mut self.link, Link::Idle);
        if matches!(link, Link::Idle) && reason == StopReason::Requested {
            tracing::debug!("Stop ignored, not running");
            return;
        }

        self.state.publish(ConnectionState::Stopping);
        self.session.begin_stop();
        let abandoned = self.dispatcher.clear();
        if abandoned > 0 {
            tracing::info!(abandoned, "Abandoning pending requests");
        }

        match link {
            Link::Connected(conn) if reason == StopReason::Requested => {
                let outcome = conn.close(self.config.stop_grace_period).await;
                tracing::debug!(?outcome, "Connection closed");
            }
            Link::Connected(conn) => drop(conn),
            Link::Connecting(_) => tracing::debug!("Connect attempt aborted"),
            Link::Idle => {}
        }

        self.session.reset();
        self.state.publish(ConnectionState::Disconnected);
        tracing::info!(?reason, "Stopped");
        self.events.emit(Event::Stopped { reason });
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    async fn submit(&mut self, message: Message) {
        if matches!(self.link, Link::Idle) {
            tracing::warn!(tag = %message.tag(), "Not connected, dropping request");
            return;
        }
        let order = self.dispatcher.enqueue(message);
        tracing::trace!(order, queued = self.dispatcher.queued_len(), "Request queued");
        self.pump().await;
    }

    /// Transmit whatever the dispatcher releases.
    async fn pump(&mut self) {
        let Link::Connected(conn) = &mut self.link else {
            return;
        };

        let mut failure = None;
        for message in self.dispatcher.dispatch(Instant::now()) {
            if let Err(e) = conn.send(&message).await {
                failure = Some(e);
                break;
            }
            match &message {
                Message::NewSessionRequest(request) => self.session.on_init_sent(request.user_id),
                Message::NewSessionConfirm(confirm) => {
                    if !self
                        .session
                        .on_confirm_sent(confirm.user_id, confirm.session_id)
                    {
                        tracing::warn!(
                            user_id = %confirm.user_id,
                            session_id = %confirm.session_id,
                            state = ?self.session.state(),
                            "Confirmed a session that was never granted, session stays inactive"
                        );
                    }
                }
                _ => {}
            }
        }

        if let Some(e) = failure {
            tracing::warn!("Send failed: {e}");
            self.stop(StopReason::ConnectionLost).await;
        }
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    async fn on_received(&mut self, result: Result<ReceivedFrames, ConnectionError>) {
        let received = match result {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Connection lost: {e}");
                self.stop(StopReason::ConnectionLost).await;
                return;
            }
        };

        for frame in received.frames {
            if !matches!(self.link, Link::Connected(_)) {
                return;
            }
            self.on_frame(&frame).await;
        }

        if let Some(e) = received.error
            && matches!(self.link, Link::Connected(_))
        {
            tracing::error!("Unframeable input, dropping connection: {e}");
            self.stop(StopReason::ProtocolError).await;
        }
    }

    async fn on_frame(&mut self, frame: &[u8]) {
        let message = match deserialize_message(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(bytes = frame.len(), "Discarding undecodable frame: {e}");
                return;
            }
        };
        tracing::trace!(tag = %message.tag(), "Message received");

        if let Message::Notification(notification) = &message {
            self.router.route(notification, &self.events);
            return;
        }

        match self.dispatcher.on_message(message) {
            Correlation::Matched { request, response } => {
                self.on_response(&request, response);
                self.pump().await;
            }
            Correlation::Mismatched { expected, received } => {
                tracing::debug!(
                    %expected,
                    received = %received.tag(),
                    "Response does not match the request in flight, discarding"
                );
            }
            Correlation::Unsolicited(message) => {
                tracing::debug!(tag = %message.tag(), "No request awaiting a response, discarding");
            }
        }
    }

    fn on_response(&mut self, request: &PendingRequest, response: Message) {
        match response {
            Message::GetHistoryResponse(history) => {
                tracing::debug!(count = history.messages.len(), "History received");
                self.events
                    .emit(Event::ChatHistoryReceived(history.messages));
            }
            Message::AddMessageResponse(added) => match added.result {
                SendResult::Success => self.events.emit(Event::ChatMessageSentSuccess),
                SendResult::Failure => tracing::warn!("Server failed to store the message"),
            },
            Message::NewSessionResponse(granted) => {
                let outcome = self.session.on_init_response(&granted);
                if !outcome.is_success() {
                    tracing::warn!(?outcome, "Session request rejected");
                }
                self.events.emit(Event::NewSessionInitiated(outcome));
            }
            other => {
                tracing::error!(
                    request = %request.message.tag(),
                    response = %other.tag(),
                    "Correlated a message that is not a response, dropping"
                );
            }
        }
    }

    async fn on_timeout(&mut self) {
        if let Some(request) = self.dispatcher.on_timeout(Instant::now()) {
            tracing::warn!(
                tag = %request.message.tag(),
                order = request.enqueue_order,
                timeout = ?self.config.request_timeout,
                "No response in time, abandoning request"
            );
            self.pump().await;
        }
    }
}
