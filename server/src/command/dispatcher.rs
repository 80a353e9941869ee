//! Command dispatcher: the single owner of the call router
//!
//! Connection tasks forward decoded requests here; the timer forwards fired
//! ring timeouts. Both are handled one at a time, so every router operation
//! runs to completion before the next one starts.

use crate::session::{SessionId, SessionManager};
use callcenter_shared::{
    CallRouter, Command, Expiry, NotificationSink, Outcome, Request, Response, RouterEvent,
    Target, Timer,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reply sent for a command name the router does not know
pub const INVALID_COMMAND: &str = "Invalid command.";

/// Input from connection tasks
#[derive(Debug)]
pub enum DispatcherInput {
    /// A decoded request from a session
    Request { session: SessionId, request: Request },
    /// The session's connection closed
    Disconnected { session: SessionId },
}

/// Applies client commands and timer expiries to the router and routes the
/// resulting text to the right clients
pub struct CommandDispatcher<T: Timer> {
    router: CallRouter<T>,
    sessions: Arc<SessionManager>,
    /// Which session placed each live call
    owners: NotificationSink<SessionId>,
}

impl<T: Timer> CommandDispatcher<T> {
    /// Create a new command dispatcher
    pub fn new(router: CallRouter<T>, sessions: Arc<SessionManager>) -> Self {
        Self {
            router,
            sessions,
            owners: NotificationSink::new(),
        }
    }

    /// Process inputs and expiries until both channels are closed
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<DispatcherInput>,
        mut expiries: mpsc::UnboundedReceiver<Expiry>,
    ) {
        loop {
            tokio::select! {
                Some(input) = inputs.recv() => match input {
                    DispatcherInput::Request { session, request } => {
                        self.handle_request(session, request).await;
                    }
                    DispatcherInput::Disconnected { session } => {
                        self.handle_disconnect(session);
                    }
                },
                Some(expiry) = expiries.recv() => {
                    self.handle_expiry(expiry).await;
                }
                else => break,
            }
        }

        info!("Command dispatcher stopped");
    }

    /// Apply one client request and reply to the issuing session
    pub async fn handle_request(&mut self, session: SessionId, request: Request) {
        let reply = match request.command.parse::<Command>() {
            Ok(command) => {
                debug!("Session {} -> {} {}", session, command, request.id);
                let outcome = self.router.dispatch(command, &request.id);

                let accepted = outcome
                    .events()
                    .iter()
                    .any(|event| matches!(event, RouterEvent::Received { .. }));
                if accepted {
                    self.owners.claim(&request.id, session);
                }
                self.release_ended(&outcome);

                outcome.text()
            }
            Err(e) => {
                debug!("Session {}: {}", session, e);
                INVALID_COMMAND.to_string()
            }
        };

        if let Err(e) = self.sessions.send_to(session, Response::new(reply)).await {
            warn!("Failed to reply to session {}: {}", session, e);
        }
    }

    /// Apply a fired ring timeout and notify whoever owns the call
    pub async fn handle_expiry(&mut self, expiry: Expiry) {
        let outcome = self.router.timeout_fired(&expiry);
        let Some(call_id) = outcome.ended_calls().next() else {
            return;
        };

        let notification = Response::new(outcome.text());
        match self.owners.resolve(call_id) {
            Target::Session(session) => {
                if let Err(e) = self.sessions.send_to(session, notification).await {
                    warn!("Failed to notify session {}: {}", session, e);
                }
            }
            Target::Broadcast => {
                debug!("Call {} has no owner, broadcasting", call_id);
                self.sessions.broadcast(&notification).await;
            }
        }

        self.release_ended(&outcome);
    }

    /// Forget the calls owned by a closed session
    pub fn handle_disconnect(&mut self, session: SessionId) {
        let orphaned = self.owners.forget_session(&session);
        if !orphaned.is_empty() {
            debug!("Session {} left {} call(s) without an owner", session, orphaned.len());
        }
    }

    fn release_ended(&mut self, outcome: &Outcome) {
        for call_id in outcome.ended_calls() {
            self.owners.release(call_id);
        }
    }

    #[cfg(test)]
    fn router_mut(&mut self) -> &mut CallRouter<T> {
        &mut self.router
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use callcenter_shared::{ManualTimer, RouterConfig};
    use std::time::Duration;

    struct Harness {
        dispatcher: CommandDispatcher<ManualTimer>,
        sessions: Arc<SessionManager>,
    }

    impl Harness {
        fn new() -> Self {
            let sessions = Arc::new(SessionManager::new());
            let router = CallRouter::new(&RouterConfig::default(), ManualTimer::new()).unwrap();
            Self {
                dispatcher: CommandDispatcher::new(router, sessions.clone()),
                sessions,
            }
        }

        async fn connect(&self) -> (SessionId, mpsc::Receiver<Response>) {
            self.connect_with_capacity(16).await
        }

        async fn connect_with_capacity(
            &self,
            capacity: usize,
        ) -> (SessionId, mpsc::Receiver<Response>) {
            let (tx, rx) = mpsc::channel(capacity);
            let id = self.sessions.next_session_id();
            self.sessions
                .register(SessionHandle::new(id, "127.0.0.1:9".parse().unwrap(), tx))
                .await;
            (id, rx)
        }

        async fn send(&mut self, session: SessionId, command: &str, id: &str) {
            self.dispatcher
                .handle_request(session, Request::new(command, id))
                .await;
        }

        async fn elapse(&mut self, secs: u64) {
            let fired = self
                .dispatcher
                .router_mut()
                .timer_mut()
                .advance(Duration::from_secs(secs));
            for expiry in fired {
                self.dispatcher.handle_expiry(expiry).await;
            }
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Response>) -> String {
        rx.recv().await.expect("response expected").response
    }

    #[tokio::test]
    async fn test_reply_goes_to_issuing_session() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;
        let (_s2, mut rx2) = h.connect().await;

        h.send(s1, "call", "100").await;
        assert_eq!(next(&mut rx1).await, "Call 100 received\nCall 100 ringing for operator A");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_command_gets_error_reply() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;

        h.send(s1, "transfer", "100").await;
        assert_eq!(next(&mut rx1).await, INVALID_COMMAND);
    }

    #[tokio::test]
    async fn test_timeout_notifies_call_owner_not_latest_client() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;
        let (s2, mut rx2) = h.connect().await;

        h.send(s1, "call", "1").await;
        next(&mut rx1).await;

        // s2 is the most recently active client
        h.send(s2, "call", "2").await;
        next(&mut rx2).await;
        h.send(s2, "answer", "B").await;
        assert_eq!(next(&mut rx2).await, "Call 2 answered by operator B");

        h.elapse(10).await;

        assert_eq!(next(&mut rx1).await, "Call 1 ignored by operator A");
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_orphaned_call_timeout_is_broadcast() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;
        let (_s2, mut rx2) = h.connect().await;
        let (_s3, mut rx3) = h.connect().await;

        h.send(s1, "call", "1").await;
        next(&mut rx1).await;

        h.sessions.unregister(s1).await;
        h.dispatcher.handle_disconnect(s1);

        h.elapse(10).await;

        assert_eq!(next(&mut rx2).await, "Call 1 ignored by operator A");
        assert_eq!(next(&mut rx3).await, "Call 1 ignored by operator A");
    }

    #[tokio::test]
    async fn test_answered_call_produces_no_notification() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;

        h.send(s1, "call", "1").await;
        next(&mut rx1).await;
        h.send(s1, "answer", "A").await;
        next(&mut rx1).await;

        h.elapse(30).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;

        h.send(s1, "call", "100").await;
        assert_eq!(next(&mut rx1).await, "Call 100 received\nCall 100 ringing for operator A");
        h.send(s1, "call", "200").await;
        assert_eq!(next(&mut rx1).await, "Call 200 received\nCall 200 ringing for operator B");
        h.send(s1, "call", "300").await;
        assert_eq!(next(&mut rx1).await, "Call 300 received\nCall 300 waiting in queue");
        h.send(s1, "answer", "A").await;
        assert_eq!(next(&mut rx1).await, "Call 100 answered by operator A");
        h.send(s1, "hangup", "100").await;
        assert_eq!(
            next(&mut rx1).await,
            "Call 100 finished and operator A available\nCall 300 ringing for operator A"
        );
    }

    #[tokio::test]
    async fn test_stalled_session_does_not_block_others() {
        let mut h = Harness::new();
        // Never drained
        let (slow, _slow_rx) = h.connect_with_capacity(2).await;
        let (s2, mut rx2) = h.connect().await;

        for _ in 0..5 {
            let request = h.dispatcher.handle_request(slow, Request::new("hangup", "9"));
            tokio::time::timeout(Duration::from_secs(2), request)
                .await
                .expect("dispatcher stalled on a full session");
        }

        h.send(s2, "call", "1").await;
        assert_eq!(next(&mut rx2).await, "Call 1 received\nCall 1 ringing for operator A");

        h.elapse(10).await;
        assert_eq!(next(&mut rx2).await, "Call 1 ignored by operator A");
    }

    #[tokio::test]
    async fn test_ownership_released_when_call_ends() {
        let mut h = Harness::new();
        let (s1, mut rx1) = h.connect().await;

        h.send(s1, "call", "1").await;
        next(&mut rx1).await;
        assert_eq!(h.dispatcher.owners.owner("1"), Some(&s1));

        h.send(s1, "hangup", "1").await;
        assert_eq!(next(&mut rx1).await, "Call 1 missed");
        assert!(h.dispatcher.owners.is_empty());
    }
}
