//! Notification routing for asynchronous router events
//!
//! Timer-driven events (a ring timing out) are not replies to any request, so
//! somebody has to decide which connection hears about them. Each call is
//! owned by the session that placed it; ownership is looked up when the
//! notification is produced.

use std::collections::HashMap;

use crate::CallId;

/// Where a notification should be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<S> {
    /// The session that owns the call
    Session(S),
    /// Nobody owns the call any more: tell every connected session
    Broadcast,
}

/// Per-call owner table
#[derive(Debug)]
pub struct NotificationSink<S> {
    owners: HashMap<CallId, S>,
}

impl<S: Clone + PartialEq> NotificationSink<S> {
    pub fn new() -> Self {
        Self {
            owners: HashMap::new(),
        }
    }

    /// Record `session` as the owner of `call_id`, replacing any previous owner
    pub fn claim(&mut self, call_id: &str, session: S) {
        self.owners.insert(call_id.to_string(), session);
    }

    /// Forget the owner of a call that has ended
    pub fn release(&mut self, call_id: &str) -> Option<S> {
        self.owners.remove(call_id)
    }

    /// Drop every ownership held by a disconnected session.
    /// Returns the orphaned calls.
    pub fn forget_session(&mut self, session: &S) -> Vec<CallId> {
        let orphaned: Vec<CallId> = self
            .owners
            .iter()
            .filter(|(_, owner)| *owner == session)
            .map(|(call_id, _)| call_id.clone())
            .collect();

        for call_id in &orphaned {
            self.owners.remove(call_id);
        }
        orphaned
    }

    pub fn owner(&self, call_id: &str) -> Option<&S> {
        self.owners.get(call_id)
    }

    /// Resolve the delivery target for a notification about `call_id`
    pub fn resolve(&self, call_id: &str) -> Target<S> {
        match self.owners.get(call_id) {
            Some(session) => Target::Session(session.clone()),
            None => Target::Broadcast,
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl<S: Clone + PartialEq> Default for NotificationSink<S> {
    fn default() -> Self {
        Self::new()
    }
}
