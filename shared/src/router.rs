//! Call Router
//!
//! Owns the operator table, the wait queue and one ring timeout per ringing
//! operator. Operators move `Available -> Ringing -> Busy -> Available`; a
//! ringing operator drops back to `Available` on timeout, reject or hangup.
//!
//! Every operation runs to completion and returns an [`Outcome`]. Nothing in
//! here fails: invalid targets are reported as events, stale timeouts are
//! absorbed.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::timer::{Expiry, Timer};
use crate::{routing, CallId, Command, OperatorId};

/// Operator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Available,
    Ringing,
    Busy,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorState::Available => write!(f, "available"),
            OperatorState::Ringing => write!(f, "ringing"),
            OperatorState::Busy => write!(f, "busy"),
        }
    }
}

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Operator ids, in the order they are scanned for assignment
    pub operators: Vec<OperatorId>,
    /// How long an operator may ring before the call is ignored
    pub ring_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            operators: routing::DEFAULT_OPERATORS.iter().map(|id| id.to_string()).collect(),
            ring_timeout: Duration::from_millis(routing::RING_TIMEOUT_MS),
        }
    }
}

/// Errors raised while building a router
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("At least one operator must be configured")]
    NoOperators,

    #[error("Operator ids must not be empty")]
    EmptyOperatorId,

    #[error("Duplicate operator id: {0}")]
    DuplicateOperator(OperatorId),
}

/// Broken router invariant, reported by [`CallRouter::check_invariants`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Call {0} is held in more than one place")]
    DuplicateCall(CallId),

    #[error("Operator {operator} is {state} but current call is {call:?}")]
    CallMismatch {
        operator: OperatorId,
        state: OperatorState,
        call: Option<CallId>,
    },

    #[error("Operator {operator} is {state} but ring timeout present = {has_timeout}")]
    TimeoutMismatch {
        operator: OperatorId,
        state: OperatorState,
        has_timeout: bool,
    },
}

/// Something that happened while processing one command or timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Received { call_id: CallId },
    Ringing { call_id: CallId, operator_id: OperatorId },
    Queued { call_id: CallId },
    Answered { call_id: CallId, operator_id: OperatorId },
    Rejected { call_id: CallId, operator_id: OperatorId },
    Missed { call_id: CallId },
    Finished { call_id: CallId, operator_id: OperatorId },
    Ignored { call_id: CallId, operator_id: OperatorId },
    /// Pulled from the queue while no operator was free; gone for good
    Dropped { call_id: CallId },
    AlreadyHandled { call_id: CallId },
    NotRinging { operator_id: OperatorId },
    NotFound { call_id: CallId },
}

impl RouterEvent {
    /// Text line reported to clients, if the event is visible at all
    pub fn line(&self) -> Option<String> {
        use RouterEvent::*;

        let line = match self {
            Received { call_id } => format!("Call {} received", call_id),
            Ringing { call_id, operator_id } => {
                format!("Call {} ringing for operator {}", call_id, operator_id)
            }
            Queued { call_id } => format!("Call {} waiting in queue", call_id),
            Answered { call_id, operator_id } => {
                format!("Call {} answered by operator {}", call_id, operator_id)
            }
            Rejected { call_id, operator_id } => {
                format!("Call {} rejected by operator {}", call_id, operator_id)
            }
            Missed { call_id } => format!("Call {} missed", call_id),
            Finished { call_id, operator_id } => {
                format!("Call {} finished and operator {} available", call_id, operator_id)
            }
            Ignored { call_id, operator_id } => {
                format!("Call {} ignored by operator {}", call_id, operator_id)
            }
            Dropped { .. } => return None,
            AlreadyHandled { call_id } => format!("Call {} is already being handled.", call_id),
            NotRinging { operator_id } => {
                format!("Operator {} is not receiving a call.", operator_id)
            }
            NotFound { call_id } => format!("Call {} not found.", call_id),
        };
        Some(line)
    }

    /// The call this event terminates, if any
    pub fn ended_call(&self) -> Option<&str> {
        match self {
            RouterEvent::Missed { call_id }
            | RouterEvent::Finished { call_id, .. }
            | RouterEvent::Ignored { call_id, .. }
            | RouterEvent::Dropped { call_id } => Some(call_id.as_str()),
            _ => None,
        }
    }
}

/// Result of one router operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    events: Vec<RouterEvent>,
}

impl Outcome {
    pub fn events(&self) -> &[RouterEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Client-facing text, one line per visible event
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(RouterEvent::line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Calls that reached a terminal state during this operation
    pub fn ended_calls(&self) -> impl Iterator<Item = &str> + '_ {
        self.events.iter().filter_map(RouterEvent::ended_call)
    }
}

impl From<Vec<RouterEvent>> for Outcome {
    fn from(events: Vec<RouterEvent>) -> Self {
        Self { events }
    }
}

/// A worker that calls are routed to
#[derive(Debug)]
pub struct Operator<H> {
    id: OperatorId,
    state: OperatorState,
    current_call: Option<CallId>,
    /// Ring generation of the current assignment
    ring: u64,
    timeout: Option<H>,
}

impl<H> Operator<H> {
    fn new(id: OperatorId) -> Self {
        Self {
            id,
            state: OperatorState::Available,
            current_call: None,
            ring: 0,
            timeout: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> OperatorState {
        self.state
    }

    pub fn current_call(&self) -> Option<&str> {
        self.current_call.as_deref()
    }

    /// Whether a ring timeout is outstanding for this operator
    pub fn has_timeout(&self) -> bool {
        self.timeout.is_some()
    }
}

/// The call routing state machine
pub struct CallRouter<T: Timer> {
    operators: Vec<Operator<T::Handle>>,
    queue: VecDeque<CallId>,
    timer: T,
    ring_timeout: Duration,
    rings: u64,
}

impl<T: Timer> CallRouter<T> {
    /// Create a router with every operator available and an empty queue
    pub fn new(config: &RouterConfig, timer: T) -> Result<Self, RouterError> {
        if config.operators.is_empty() {
            return Err(RouterError::NoOperators);
        }

        let mut operators: Vec<Operator<T::Handle>> = Vec::with_capacity(config.operators.len());
        for id in &config.operators {
            if id.is_empty() {
                return Err(RouterError::EmptyOperatorId);
            }
            if operators.iter().any(|op| op.id == *id) {
                return Err(RouterError::DuplicateOperator(id.clone()));
            }
            operators.push(Operator::new(id.clone()));
        }

        Ok(Self {
            operators,
            queue: VecDeque::new(),
            timer,
            ring_timeout: config.ring_timeout,
            rings: 0,
        })
    }

    /// Route a parsed command to its operation
    pub fn dispatch(&mut self, command: Command, id: &str) -> Outcome {
        match command {
            Command::Call => self.call(id),
            Command::Answer => self.answer(id),
            Command::Reject => self.reject(id),
            Command::Hangup => self.hangup(id),
        }
    }

    /// A new call arrives: ring the first available operator or queue it
    pub fn call(&mut self, call_id: &str) -> Outcome {
        if self.holds(call_id) {
            debug!("Call {} is already being handled", call_id);
            return self.finish(vec![RouterEvent::AlreadyHandled {
                call_id: call_id.to_string(),
            }]);
        }

        let mut events = vec![RouterEvent::Received {
            call_id: call_id.to_string(),
        }];

        match self.assign(call_id) {
            Some(ringing) => events.push(ringing),
            None => {
                self.queue.push_back(call_id.to_string());
                info!("Call {} queued (queue length {})", call_id, self.queue.len());
                events.push(RouterEvent::Queued {
                    call_id: call_id.to_string(),
                });
            }
        }

        self.finish(events)
    }

    /// Operator picks up the call ringing for them
    pub fn answer(&mut self, operator_id: &str) -> Outcome {
        let Some((idx, call_id)) = self.ringing(operator_id) else {
            return self.not_ringing(operator_id);
        };

        self.cancel_timeout(idx);
        self.operators[idx].state = OperatorState::Busy;
        info!("Call {} answered by operator {}", call_id, operator_id);

        self.finish(vec![RouterEvent::Answered {
            call_id,
            operator_id: operator_id.to_string(),
        }])
    }

    /// Operator declines: the call goes back to the front of the queue and
    /// the queue head is routed right away.
    pub fn reject(&mut self, operator_id: &str) -> Outcome {
        let Some((idx, call_id)) = self.ringing(operator_id) else {
            return self.not_ringing(operator_id);
        };

        self.release(idx);
        self.queue.push_front(call_id.clone());
        info!("Call {} rejected by operator {}, requeued at front", call_id, operator_id);

        let mut events = vec![RouterEvent::Rejected {
            call_id,
            operator_id: operator_id.to_string(),
        }];
        self.dequeue_and_route(&mut events);

        self.finish(events)
    }

    /// Caller hangs up, wherever the call currently is
    pub fn hangup(&mut self, call_id: &str) -> Outcome {
        let assigned = self
            .operators
            .iter()
            .position(|op| op.current_call.as_deref() == Some(call_id));

        if let Some(idx) = assigned {
            let operator_id = self.operators[idx].id.clone();
            let was_ringing = self.operators[idx].state == OperatorState::Ringing;
            self.release(idx);

            let mut events = if was_ringing {
                info!("Call {} missed while ringing operator {}", call_id, operator_id);
                vec![RouterEvent::Missed {
                    call_id: call_id.to_string(),
                }]
            } else {
                info!("Call {} finished, operator {} available", call_id, operator_id);
                vec![RouterEvent::Finished {
                    call_id: call_id.to_string(),
                    operator_id,
                }]
            };
            self.dequeue_and_route(&mut events);

            return self.finish(events);
        }

        if let Some(pos) = self.queue.iter().position(|queued| queued == call_id) {
            self.queue.remove(pos);
            info!("Call {} missed while waiting in queue", call_id);
            return self.finish(vec![RouterEvent::Missed {
                call_id: call_id.to_string(),
            }]);
        }

        debug!("Hangup for unknown call {}", call_id);
        self.finish(vec![RouterEvent::NotFound {
            call_id: call_id.to_string(),
        }])
    }

    /// A ring timeout elapsed
    ///
    /// Only effective while the operator is still ringing for the assignment
    /// that scheduled it; anything else is a stale fire and is ignored. The
    /// freed operator does not pull from the queue.
    pub fn timeout_fired(&mut self, expiry: &Expiry) -> Outcome {
        let matched = self
            .ringing(&expiry.operator_id)
            .filter(|&(idx, _)| self.operators[idx].ring == expiry.ring);

        let Some((idx, call_id)) = matched else {
            debug!(
                "Stale ring timeout for call {} on operator {} ignored",
                expiry.call_id, expiry.operator_id
            );
            return Outcome::default();
        };

        self.release(idx);
        info!("Call {} ignored by operator {}", call_id, expiry.operator_id);

        self.finish(vec![RouterEvent::Ignored {
            call_id,
            operator_id: expiry.operator_id.clone(),
        }])
    }

    /// Operators in assignment order
    pub fn operators(&self) -> &[Operator<T::Handle>] {
        &self.operators
    }

    pub fn operator(&self, operator_id: &str) -> Option<&Operator<T::Handle>> {
        self.operators.iter().find(|op| op.id == operator_id)
    }

    /// Waiting calls, head first
    pub fn queued(&self) -> impl Iterator<Item = &str> + '_ {
        self.queue.iter().map(String::as_str)
    }

    pub fn ring_timeout(&self) -> Duration {
        self.ring_timeout
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Verify the structural invariants of the operator table and queue
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let mut seen = HashSet::new();

        for op in &self.operators {
            let consistent = matches!(
                (op.state, &op.current_call),
                (OperatorState::Available, None)
                    | (OperatorState::Ringing, Some(_))
                    | (OperatorState::Busy, Some(_))
            );
            if !consistent {
                return Err(InvariantViolation::CallMismatch {
                    operator: op.id.clone(),
                    state: op.state,
                    call: op.current_call.clone(),
                });
            }

            if op.timeout.is_some() != (op.state == OperatorState::Ringing) {
                return Err(InvariantViolation::TimeoutMismatch {
                    operator: op.id.clone(),
                    state: op.state,
                    has_timeout: op.timeout.is_some(),
                });
            }

            if let Some(call) = &op.current_call {
                if !seen.insert(call.as_str()) {
                    return Err(InvariantViolation::DuplicateCall(call.clone()));
                }
            }
        }

        for call in &self.queue {
            if !seen.insert(call.as_str()) {
                return Err(InvariantViolation::DuplicateCall(call.clone()));
            }
        }

        Ok(())
    }

    /// Pop the queue head and try to ring an operator for it.
    ///
    /// Unlike a new call, a dequeued call that finds no free operator is
    /// dropped, not put back.
    fn dequeue_and_route(&mut self, events: &mut Vec<RouterEvent>) {
        let Some(call_id) = self.queue.pop_front() else {
            return;
        };

        match self.assign(&call_id) {
            Some(ringing) => events.push(ringing),
            None => {
                warn!("No operator available for dequeued call {}, dropping it", call_id);
                events.push(RouterEvent::Dropped { call_id });
            }
        }
    }

    /// Ring the first available operator, in configuration order
    fn assign(&mut self, call_id: &str) -> Option<RouterEvent> {
        let idx = self
            .operators
            .iter()
            .position(|op| op.state == OperatorState::Available)?;

        self.cancel_timeout(idx);

        self.rings += 1;
        let expiry = Expiry {
            call_id: call_id.to_string(),
            operator_id: self.operators[idx].id.clone(),
            ring: self.rings,
        };
        let handle = self.timer.schedule(self.ring_timeout, expiry);

        let operator = &mut self.operators[idx];
        operator.state = OperatorState::Ringing;
        operator.current_call = Some(call_id.to_string());
        operator.ring = self.rings;
        operator.timeout = Some(handle);

        info!("Call {} ringing for operator {}", call_id, operator.id);

        Some(RouterEvent::Ringing {
            call_id: call_id.to_string(),
            operator_id: operator.id.clone(),
        })
    }

    /// Index and call of an operator that is currently ringing
    fn ringing(&self, operator_id: &str) -> Option<(usize, CallId)> {
        self.operators
            .iter()
            .enumerate()
            .find_map(|(idx, op)| match (&op.state, &op.current_call) {
                (OperatorState::Ringing, Some(call)) if op.id == operator_id => {
                    Some((idx, call.clone()))
                }
                _ => None,
            })
    }

    /// Whether the call is ringing, in progress or waiting
    fn holds(&self, call_id: &str) -> bool {
        self.operators
            .iter()
            .any(|op| op.current_call.as_deref() == Some(call_id))
            || self.queue.iter().any(|queued| queued == call_id)
    }

    /// Put an operator back to `Available`
    fn release(&mut self, idx: usize) {
        self.cancel_timeout(idx);
        let operator = &mut self.operators[idx];
        operator.state = OperatorState::Available;
        operator.current_call = None;
    }

    fn cancel_timeout(&mut self, idx: usize) {
        if let Some(handle) = self.operators[idx].timeout.take() {
            self.timer.cancel(handle);
        }
    }

    fn not_ringing(&self, operator_id: &str) -> Outcome {
        debug!("Operator {} is not ringing", operator_id);
        self.finish(vec![RouterEvent::NotRinging {
            operator_id: operator_id.to_string(),
        }])
    }

    fn finish(&self, events: Vec<RouterEvent>) -> Outcome {
        debug_assert_eq!(self.check_invariants(), Ok(()));
        Outcome::from(events)
    }
}
