use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::api::{CallId, RpcResponse, RuntimeCall, RuntimeClient, TransportError};
use crate::edit::error::EditError;
use crate::edit::translate::{EditKind, EditPlan};

#[derive(Clone, Debug, PartialEq)]
pub enum SequenceStep {
    Dispatched(CallId),
    Completed(EditKind),
    Failed(EditError),
}

#[derive(Clone, Debug)]
struct InFlight {
    id: CallId,
    operation: &'static str,
    sent_at: Instant,
}

/// Runs the calls of one plan strictly in order, one at a time.
///
/// The next call only goes out after the previous one reported success. The
/// first rejection, transport failure or timeout ends the sequence and the
/// remaining calls are dropped.
#[derive(Clone, Debug)]
pub struct CallSequence {
    kind: EditKind,
    remaining: VecDeque<RuntimeCall>,
    in_flight: Option<InFlight>,
    timeout: Duration,
}

impl CallSequence {
    pub fn start(plan: EditPlan, client: &mut dyn RuntimeClient, now: Instant, timeout: Duration) -> (Self, SequenceStep) {
        let mut seq = Self { kind: plan.kind, remaining: plan.calls.into(), in_flight: None, timeout };
        let step = seq.dispatch_next(client, now);
        (seq, step)
    }

    pub fn kind(&self) -> EditKind { self.kind }
    pub fn in_flight(&self) -> Option<CallId> { self.in_flight.as_ref().map(|f| f.id) }
    pub fn is_done(&self) -> bool { self.in_flight.is_none() }
    pub fn remaining(&self) -> usize { self.remaining.len() }

    pub fn owns(&self, id: CallId) -> bool { self.in_flight() == Some(id) }

    pub fn on_response(
        &mut self,
        id: CallId,
        result: Result<RpcResponse, TransportError>,
        client: &mut dyn RuntimeClient,
        now: Instant,
    ) -> Option<SequenceStep> {
        if !self.owns(id) {
            return None;
        }
        let flight = self.in_flight.take()?;
        let step = match result {
            Ok(resp) if resp.success => {
                log::debug!("{} ({}) succeeded", flight.operation, id);
                self.dispatch_next(client, now)
            }
            Ok(resp) => self.abort(EditError::rejected(flight.operation, &resp.error_message)),
            Err(cause) => self.abort(EditError::transport(flight.operation, &cause)),
        };
        Some(step)
    }

    /// Fails the sequence if the call in flight has been waiting too long.
    pub fn check_timeout(&mut self, now: Instant) -> Option<SequenceStep> {
        let flight = self.in_flight.as_ref()?;
        if now.saturating_duration_since(flight.sent_at) < self.timeout {
            return None;
        }
        let operation = flight.operation;
        self.in_flight = None;
        Some(self.abort(EditError::transport(operation, &TransportError::Timeout(self.timeout))))
    }

    fn dispatch_next(&mut self, client: &mut dyn RuntimeClient, now: Instant) -> SequenceStep {
        let Some(call) = self.remaining.pop_front() else {
            return SequenceStep::Completed(self.kind);
        };
        let operation = call.operation();
        let id = client.call(call);
        log::info!("dispatched {} ({}), {} call(s) left", operation, id, self.remaining.len());
        self.in_flight = Some(InFlight { id, operation, sent_at: now });
        SequenceStep::Dispatched(id)
    }

    fn abort(&mut self, error: EditError) -> SequenceStep {
        if !self.remaining.is_empty() {
            log::warn!("abandoning {} remaining call(s) after: {}", self.remaining.len(), error);
        }
        self.remaining.clear();
        SequenceStep::Failed(error)
    }
}
