//! Request queue and response correlation.
//!
//! Requests are dispatched strictly in enqueue order with at most one in
//! flight. The [`Dispatcher`] does no I/O itself: [`Dispatcher::dispatch`]
//! hands back the messages to transmit, [`Dispatcher::on_message`] correlates
//! an inbound response with the in-flight request, and
//! [`Dispatcher::on_timeout`] abandons a request whose deadline passed. The
//! engine worker owns the socket and the timer around it.
//!
//! Per-request lifecycle: `Queued → Sent → (Matched | Mismatched | TimedOut)
//! → Finished`. A mismatch leaves the request `Sent`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::messages::{Message, MessageTag};

/// A request waiting in the queue or in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    /// The message to send.
    pub message: Message,
    /// `false` for fire-and-forget messages.
    pub expects_response: bool,
    /// Monotonic position in enqueue order.
    pub enqueue_order: u64,
}

impl PendingRequest {
    /// Tag of the response that finishes this request, if any.
    pub fn expected_response(&self) -> Option<MessageTag> {
        self.message.tag().expected_response()
    }
}

/// Lifecycle phase of a request, as reported by [`Dispatcher::phase_of`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Queued,
    Sent,
    Finished,
}

#[derive(Debug)]
struct InFlight {
    request: PendingRequest,
    deadline: Instant,
}

/// Result of offering an inbound message to the [`Dispatcher`].
#[derive(Debug, PartialEq)]
pub enum Correlation {
    /// The message answers the in-flight request, which is now finished.
    Matched {
        request: PendingRequest,
        response: Message,
    },
    /// A request is in flight but the message is not its response. The
    /// request keeps waiting.
    Mismatched {
        expected: MessageTag,
        received: Message,
    },
    /// Nothing is in flight; nobody was waiting for this message.
    Unsolicited(Message),
}

/// FIFO request queue enforcing at most one in-flight request.
#[derive(Debug)]
pub struct Dispatcher {
    queue: VecDeque<PendingRequest>,
    current: Option<InFlight>,
    next_order: u64,
    request_timeout: Duration,
}

impl Dispatcher {
    /// Create an empty dispatcher whose requests time out after
    /// `request_timeout`.
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            queue: VecDeque::new(),
            current: None,
            next_order: 0,
            request_timeout,
        }
    }

    /// Append `message` to the queue. Returns its enqueue order.
    pub fn enqueue(&mut self, message: Message) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        let expects_response = message.expects_response();
        self.queue.push_back(PendingRequest {
            message,
            expects_response,
            enqueue_order: order,
        });
        order
    }

    /// Take requests off the head of the queue for transmission.
    ///
    /// Returns nothing while a request is in flight. Otherwise pops the head;
    /// if it expects a response it becomes the in-flight request with a
    /// deadline of `now + request_timeout`, and dispatch stops there. A
    /// fire-and-forget head is finished on the spot and the next head is
    /// considered in the same call.
    ///
    /// The caller must transmit the returned messages in order.
    pub fn dispatch(&mut self, now: Instant) -> Vec<Message> {
        let mut outbound = Vec::new();
        while self.current.is_none() {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            tracing::debug!(
                tag = %request.message.tag(),
                order = request.enqueue_order,
                queued = self.queue.len(),
                "Dispatching request"
            );
            outbound.push(request.message.clone());
            if request.expects_response {
                self.current = Some(InFlight {
                    request,
                    deadline: now + self.request_timeout,
                });
            }
        }
        outbound
    }

    /// Correlate an inbound, non-notification message with the in-flight
    /// request.
    pub fn on_message(&mut self, message: Message) -> Correlation {
        let Some(in_flight) = &self.current else {
            return Correlation::Unsolicited(message);
        };

        let Some(expected) = in_flight.request.expected_response() else {
            // Only requests expecting a reply ever become current.
            tracing::error!(
                tag = %in_flight.request.message.tag(),
                "In-flight request expects no response, finishing it"
            );
            self.current = None;
            return Correlation::Unsolicited(message);
        };

        if message.tag() != expected {
            return Correlation::Mismatched {
                expected,
                received: message,
            };
        }

        match self.current.take() {
            Some(in_flight) => Correlation::Matched {
                request: in_flight.request,
                response: message,
            },
            None => Correlation::Unsolicited(message),
        }
    }

    /// Deadline of the in-flight request, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.current.as_ref().map(|in_flight| in_flight.deadline)
    }

    /// Abandon the in-flight request if its deadline is at or before `now`.
    ///
    /// Returns the abandoned request. The caller should [`dispatch`] next.
    ///
    /// [`dispatch`]: Dispatcher::dispatch
    pub fn on_timeout(&mut self, now: Instant) -> Option<PendingRequest> {
        match &self.current {
            Some(in_flight) if in_flight.deadline <= now => {
                self.current.take().map(|in_flight| in_flight.request)
            }
            _ => None,
        }
    }

    /// The request currently in flight.
    pub fn in_flight(&self) -> Option<&PendingRequest> {
        self.current.as_ref().map(|in_flight| &in_flight.request)
    }

    /// Number of requests waiting behind the in-flight one.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is queued or in flight.
    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.queue.is_empty()
    }

    /// Phase of the request with the given enqueue order.
    pub fn phase_of(&self, order: u64) -> RequestPhase {
        if self
            .in_flight()
            .is_some_and(|request| request.enqueue_order == order)
        {
            RequestPhase::Sent
        } else if self.queue.iter().any(|r| r.enqueue_order == order) {
            RequestPhase::Queued
        } else {
            RequestPhase::Finished
        }
    }

    /// Drop the in-flight request and everything queued.
    ///
    /// Returns how many requests were abandoned.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len() + usize::from(self.current.is_some());
        self.queue.clear();
        self.current = None;
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::*;
    use uuid::Uuid;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn get_history() -> Message {
        Message::GetHistory(GetHistory {
            session_id: Uuid::nil(),
        })
    }

    fn add_message(text: &str) -> Message {
        Message::AddMessage(AddMessage {
            session_id: Uuid::nil(),
            username: "alice".to_string(),
            text: text.to_string(),
        })
    }

    fn confirm() -> Message {
        Message::NewSessionConfirm(NewSessionConfirm {
            user_id: Uuid::nil(),
            session_id: Uuid::nil(),
        })
    }

    fn history_response() -> Message {
        Message::GetHistoryResponse(GetHistoryResponse { messages: vec![] })
    }

    fn add_response() -> Message {
        Message::AddMessageResponse(AddMessageResponse {
            result: SendResult::Success,
        })
    }

    fn notification() -> Message {
        Message::Notification(Notification {
            notification_kind: NotificationKind::MessagesUpdated,
        })
    }

    #[test]
    fn test_single_request_dispatched_and_armed() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let order = d.enqueue(get_history());

        assert_eq!(d.phase_of(order), RequestPhase::Queued);
        assert_eq!(d.dispatch(now), vec![get_history()]);
        assert_eq!(d.phase_of(order), RequestPhase::Sent);
        assert_eq!(d.deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn test_at_most_one_in_flight() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        for i in 0..5 {
            d.enqueue(add_message(&i.to_string()));
        }

        assert_eq!(d.dispatch(now).len(), 1);
        // Further dispatch attempts are no-ops while one is in flight.
        assert!(d.dispatch(now).is_empty());
        assert!(d.dispatch(now).is_empty());
        assert_eq!(d.queued_len(), 4);
    }

    #[test]
    fn test_fifo_order_across_responses() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let texts = ["one", "two", "three"];
        for text in texts {
            d.enqueue(add_message(text));
        }

        let mut sent = Vec::new();
        sent.extend(d.dispatch(now));
        while !d.is_idle() {
            assert!(matches!(
                d.on_message(add_response()),
                Correlation::Matched { .. }
            ));
            sent.extend(d.dispatch(now));
        }

        let expected: Vec<Message> = texts.iter().map(|t| add_message(t)).collect();
        assert_eq!(sent, expected);
    }

    #[test]
    fn test_enqueue_while_in_flight_waits_its_turn() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(get_history());
        assert_eq!(d.dispatch(now), vec![get_history()]);

        let b = d.enqueue(add_message("later"));
        assert!(d.dispatch(now).is_empty());
        assert_eq!(d.phase_of(b), RequestPhase::Queued);

        d.on_message(history_response());
        assert_eq!(d.dispatch(now), vec![add_message("later")]);
        assert_eq!(d.phase_of(b), RequestPhase::Sent);
    }

    #[test]
    fn test_fire_and_forget_finishes_in_same_step() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let c = d.enqueue(confirm());
        let h = d.enqueue(get_history());

        let sent = d.dispatch(now);
        assert_eq!(sent, vec![confirm(), get_history()]);
        assert_eq!(d.phase_of(c), RequestPhase::Finished);
        assert_eq!(d.phase_of(h), RequestPhase::Sent);
        // Only the history request holds a timer.
        assert_eq!(d.deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn test_only_fire_and_forget_leaves_dispatcher_idle() {
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(confirm());
        assert_eq!(d.dispatch(Instant::now()).len(), 1);
        assert!(d.is_idle());
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn test_matching_response_finishes_request() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let order = d.enqueue(get_history());
        d.dispatch(now);

        match d.on_message(history_response()) {
            Correlation::Matched { request, response } => {
                assert_eq!(request.enqueue_order, order);
                assert_eq!(response, history_response());
            }
            other => panic!("expected Matched, got {other:?}"),
        }
        assert!(d.is_idle());
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn test_mismatched_response_keeps_request_waiting() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let order = d.enqueue(get_history());
        d.dispatch(now);

        let result = d.on_message(add_response());
        assert_eq!(
            result,
            Correlation::Mismatched {
                expected: MessageTag::GetHistoryResponse,
                received: add_response(),
            }
        );
        assert_eq!(d.phase_of(order), RequestPhase::Sent);
        assert_eq!(d.deadline(), Some(now + TIMEOUT));
    }

    #[test]
    fn test_response_without_request_is_unsolicited() {
        let mut d = Dispatcher::new(TIMEOUT);
        assert_eq!(
            d.on_message(history_response()),
            Correlation::Unsolicited(history_response())
        );
    }

    #[test]
    fn test_queued_but_undispatched_request_does_not_match() {
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(get_history());
        assert!(matches!(
            d.on_message(history_response()),
            Correlation::Unsolicited(_)
        ));
        assert_eq!(d.queued_len(), 1);
    }

    #[test]
    fn test_notification_shaped_message_does_not_finish_request() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let order = d.enqueue(get_history());
        d.dispatch(now);

        assert!(matches!(
            d.on_message(notification()),
            Correlation::Mismatched { .. }
        ));
        assert_eq!(d.phase_of(order), RequestPhase::Sent);
    }

    #[test]
    fn test_timeout_before_deadline_is_ignored() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(get_history());
        d.dispatch(now);

        assert!(d.on_timeout(now + TIMEOUT / 2).is_none());
        assert!(d.in_flight().is_some());
    }

    #[test]
    fn test_timeout_frees_slot_for_next_request() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        let first = d.enqueue(get_history());
        let second = d.enqueue(add_message("next"));
        d.dispatch(now);

        let abandoned = d.on_timeout(now + TIMEOUT).unwrap();
        assert_eq!(abandoned.enqueue_order, first);
        assert_eq!(d.phase_of(first), RequestPhase::Finished);

        let later = now + TIMEOUT;
        assert_eq!(d.dispatch(later), vec![add_message("next")]);
        assert_eq!(d.phase_of(second), RequestPhase::Sent);
        assert_eq!(d.deadline(), Some(later + TIMEOUT));
    }

    #[test]
    fn test_late_response_after_timeout_is_unsolicited() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(get_history());
        d.dispatch(now);
        d.on_timeout(now + TIMEOUT);

        assert!(matches!(
            d.on_message(history_response()),
            Correlation::Unsolicited(_)
        ));
    }

    #[test]
    fn test_clear_abandons_everything() {
        let now = Instant::now();
        let mut d = Dispatcher::new(TIMEOUT);
        d.enqueue(get_history());
        d.enqueue(add_message("a"));
        d.enqueue(add_message("b"));
        d.dispatch(now);

        assert_eq!(d.clear(), 3);
        assert!(d.is_idle());
        assert_eq!(d.deadline(), None);
    }

    #[test]
    fn test_enqueue_order_is_monotonic() {
        let mut d = Dispatcher::new(TIMEOUT);
        let a = d.enqueue(get_history());
        let b = d.enqueue(get_history());
        d.clear();
        let c = d.enqueue(get_history());
        assert!(a < b && b < c);
    }
}
