//! Client session lifecycle.
//!
//! Tracks the handshake on top of a live connection: Idle → Connecting →
//! AwaitingSessionInit → AwaitingConfirmation → Active, with Stopping → Idle
//! as the universal reset. The engine worker advances the machine as
//! session requests go out and responses come back; the caller decides when
//! to issue them.

use uuid::Uuid;

use crate::messages::NewSessionResponse;
use crate::state::StateWatch;

/// The worker's session, republished after every command and inbound chunk.
pub type SessionWatch = StateWatch<Session>;

/// State machine for the client session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    #[default]
    Idle,
    /// Transport connect in progress.
    Connecting,
    /// Connected; no session granted yet.
    AwaitingSessionInit,
    /// Session granted by the server, not yet confirmed by the client.
    AwaitingConfirmation,
    /// Session confirmed; chat requests may use it.
    Active,
    /// Connection teardown in progress.
    Stopping,
}

/// Why the server's answer to a session request was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionRejection {
    /// The server refused the username.
    #[error("username rejected by server")]
    UsernameRejected,
    /// The server answered for a different user than the one requested.
    #[error("user id mismatch: sent {sent}, received {received}")]
    UserIdMismatch {
        /// User id carried in the request.
        sent: Uuid,
        /// User id echoed in the response.
        received: Uuid,
    },
}

/// Outcome of a session request, delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Accepted { user_id: Uuid, session_id: Uuid },
    Rejected { user_id: Uuid, reason: SessionRejection },
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionOutcome::Accepted { .. })
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            SessionOutcome::Accepted { user_id, .. } | SessionOutcome::Rejected { user_id, .. } => {
                *user_id
            }
        }
    }

    /// The granted session id, only on success.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            SessionOutcome::Accepted { session_id, .. } => Some(*session_id),
            SessionOutcome::Rejected { .. } => None,
        }
    }
}

/// The client's session identity and handshake progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    state: SessionState,
    /// User id of the outstanding or granted session.
    user_id: Option<Uuid>,
    /// Set once the server grants a session.
    session_id: Option<Uuid>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            user_id: None,
            session_id: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Whether a session has been granted (confirmed or not).
    pub fn is_established(&self) -> bool {
        self.session_id.is_some()
    }

    /// A transport connect attempt started.
    pub fn begin_connect(&mut self) {
        self.reset();
        self.state = SessionState::Connecting;
    }

    /// The transport connected.
    pub fn on_connected(&mut self) {
        self.state = SessionState::AwaitingSessionInit;
    }

    /// A session request for `user_id` was written to the socket.
    ///
    /// Any previously granted session is forgotten.
    pub fn on_init_sent(&mut self, user_id: Uuid) {
        if self.state != SessionState::AwaitingSessionInit {
            tracing::debug!(state = ?self.state, "Session request sent outside the initial state");
        }
        self.state = SessionState::AwaitingSessionInit;
        self.user_id = Some(user_id);
        self.session_id = None;
    }

    /// Apply the server's answer to the outstanding session request.
    ///
    /// A rejection clears the session identity; it is never retried here.
    pub fn on_init_response(&mut self, response: &NewSessionResponse) -> SessionOutcome {
        let Some(sent) = self.user_id else {
            tracing::error!("Session response correlated without a recorded request");
            return SessionOutcome::Rejected {
                user_id: response.user_id,
                reason: SessionRejection::UserIdMismatch {
                    sent: Uuid::nil(),
                    received: response.user_id,
                },
            };
        };

        let rejection = if !response.username_valid {
            Some(SessionRejection::UsernameRejected)
        } else if response.user_id != sent {
            Some(SessionRejection::UserIdMismatch {
                sent,
                received: response.user_id,
            })
        } else {
            None
        };

        match rejection {
            Some(reason) => {
                self.user_id = None;
                self.session_id = None;
                self.state = SessionState::AwaitingSessionInit;
                SessionOutcome::Rejected {
                    user_id: sent,
                    reason,
                }
            }
            None => {
                self.session_id = Some(response.session_id);
                self.state = SessionState::AwaitingConfirmation;
                SessionOutcome::Accepted {
                    user_id: sent,
                    session_id: response.session_id,
                }
            }
        }
    }

    /// The session confirmation was written to the socket.
    ///
    /// Returns whether the confirmation matched the granted session and the
    /// session became active.
    pub fn on_confirm_sent(&mut self, user_id: Uuid, session_id: Uuid) -> bool {
        if self.state != SessionState::AwaitingConfirmation
            || self.user_id != Some(user_id)
            || self.session_id != Some(session_id)
        {
            tracing::debug!(
                state = ?self.state,
                %user_id,
                %session_id,
                "Confirmation does not match the granted session"
            );
            return false;
        }
        self.state = SessionState::Active;
        true
    }

    /// Connection teardown started.
    pub fn begin_stop(&mut self) {
        self.state = SessionState::Stopping;
    }

    /// Forget everything and return to [`SessionState::Idle`].
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn connected() -> Session {
        let mut session = Session::new();
        session.begin_connect();
        session.on_connected();
        session
    }

    fn response(valid: bool, user: Uuid, session: Uuid) -> NewSessionResponse {
        NewSessionResponse {
            username_valid: valid,
            user_id: user,
            session_id: session,
        }
    }

    #[test]
    fn test_new_session_is_idle_and_empty() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.user_id(), None);
        assert_eq!(session.session_id(), None);
        assert!(!session.is_established());
    }

    #[test]
    fn test_full_handshake_reaches_active() {
        let mut session = connected();
        assert_eq!(session.state(), SessionState::AwaitingSessionInit);

        session.on_init_sent(uid(1));
        let outcome = session.on_init_response(&response(true, uid(1), uid(99)));
        assert_eq!(
            outcome,
            SessionOutcome::Accepted {
                user_id: uid(1),
                session_id: uid(99)
            }
        );
        assert_eq!(session.state(), SessionState::AwaitingConfirmation);
        assert!(session.is_established());

        assert!(session.on_confirm_sent(uid(1), uid(99)));
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_username_rejection_leaves_session_unestablished() {
        let mut session = connected();
        session.on_init_sent(uid(1));
        let outcome = session.on_init_response(&response(false, uid(1), uid(99)));

        assert!(!outcome.is_success());
        assert_eq!(
            outcome,
            SessionOutcome::Rejected {
                user_id: uid(1),
                reason: SessionRejection::UsernameRejected
            }
        );
        assert!(!session.is_established());
        assert_eq!(session.state(), SessionState::AwaitingSessionInit);
    }

    #[test]
    fn test_user_id_mismatch_is_rejection() {
        let mut session = connected();
        session.on_init_sent(uid(1));
        let outcome = session.on_init_response(&response(true, uid(2), uid(99)));

        assert_eq!(
            outcome,
            SessionOutcome::Rejected {
                user_id: uid(1),
                reason: SessionRejection::UserIdMismatch {
                    sent: uid(1),
                    received: uid(2)
                }
            }
        );
        assert_eq!(outcome.session_id(), None);
        assert!(!session.is_established());
    }

    #[test]
    fn test_confirm_for_wrong_session_is_refused() {
        let mut session = connected();
        session.on_init_sent(uid(1));
        session.on_init_response(&response(true, uid(1), uid(99)));

        assert!(!session.on_confirm_sent(uid(1), uid(100)));
        assert_eq!(session.state(), SessionState::AwaitingConfirmation);
    }

    #[test]
    fn test_confirm_before_grant_is_refused() {
        let mut session = connected();
        assert!(!session.on_confirm_sent(uid(1), uid(99)));
        assert_eq!(session.state(), SessionState::AwaitingSessionInit);
    }

    #[test]
    fn test_stop_then_reset_returns_to_idle() {
        let mut session = connected();
        session.on_init_sent(uid(1));
        session.on_init_response(&response(true, uid(1), uid(99)));

        session.begin_stop();
        assert_eq!(session.state(), SessionState::Stopping);
        session.reset();
        assert_eq!(session, Session::new());
    }

    #[test]
    fn test_reconnect_clears_previous_identity() {
        let mut session = connected();
        session.on_init_sent(uid(1));
        session.on_init_response(&response(true, uid(1), uid(99)));

        session.begin_connect();
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.session_id(), None);
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = SessionOutcome::Accepted {
            user_id: uid(5),
            session_id: uid(6),
        };
        assert!(ok.is_success());
        assert_eq!(ok.user_id(), uid(5));
        assert_eq!(ok.session_id(), Some(uid(6)));
    }
}
