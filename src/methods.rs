//! Outbound call correlation.
//!
//! Every outbound `Method` packet gets a sequence number and a
//! [`PendingRequest`]. The record leaves the table exactly once: when the
//! matching response arrives, or when its timer expires. Whoever removes it
//! fires its callback, so a callback can never run twice.

use std::collections::HashMap;
use std::time::Instant;

use crate::peer::OwnerId;
use crate::router::Response;
use crate::scheduler::{Execution, TimerHandle};

/// Receives the single outcome of an outbound call.
pub(crate) type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

pub(crate) struct PendingRequest {
    pub(crate) seq: u32,
    pub(crate) owner: OwnerId,
    pub(crate) path: String,
    pub(crate) callback: ResponseCallback,
    pub(crate) execution: Execution,
    pub(crate) created: Instant,
    pub(crate) timer: Option<TimerHandle>,
}

impl PendingRequest {
    pub(crate) fn new(
        seq: u32,
        owner: OwnerId,
        path: String,
        execution: Execution,
        callback: ResponseCallback,
    ) -> Self {
        Self {
            seq,
            owner,
            path,
            callback,
            execution,
            created: Instant::now(),
            timer: None,
        }
    }

    /// Disarm the timeout. A no-op once the timer already fired.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// Lookup result for an inbound `MethodResponse`.
pub(crate) enum Completion {
    /// No pending call has this sequence number.
    Unknown,
    /// The response came from a different owner than the call went to.
    OwnerMismatch { expected: OwnerId },
    Done(PendingRequest),
}

#[derive(Default)]
pub(crate) struct MethodTable {
    next_seq: u32,
    pending: HashMap<u32, PendingRequest>,
}

impl MethodTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Allocate the next sequence number.
    pub(crate) fn next_sequence(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Register a pending call.
    ///
    /// Returns the call previously holding the same sequence number, with its
    /// timer disarmed. Its callback has not fired and the caller must run it.
    pub(crate) fn insert(&mut self, request: PendingRequest) -> Option<PendingRequest> {
        let mut replaced = self.pending.insert(request.seq, request)?;
        // Only reachable after the counter wraps onto a call still pending
        tracing::warn!("Sequence {} reused while still pending", replaced.seq);
        replaced.cancel_timer();
        Some(replaced)
    }

    /// Take the pending call answered by a response from `from`.
    ///
    /// A response from the wrong owner leaves the call pending.
    pub(crate) fn complete(&mut self, seq: u32, from: Option<OwnerId>) -> Completion {
        let Some(request) = self.pending.get(&seq) else {
            return Completion::Unknown;
        };
        if from != Some(request.owner) {
            return Completion::OwnerMismatch {
                expected: request.owner,
            };
        }
        match self.pending.remove(&seq) {
            Some(request) => Completion::Done(request),
            None => Completion::Unknown,
        }
    }

    /// Take a call whose timer fired.
    pub(crate) fn expire(&mut self, seq: u32) -> Option<PendingRequest> {
        self.pending.remove(&seq)
    }

    /// Take every pending call.
    pub(crate) fn drain(&mut self) -> Vec<PendingRequest> {
        self.pending.drain().map(|(_, request)| request).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Status;
    use std::sync::{Arc, Mutex};

    fn pending(table: &mut MethodTable, owner: u64, log: &Arc<Mutex<Vec<Status>>>) -> u32 {
        let seq = table.next_sequence();
        let log = log.clone();
        let _ = table.insert(PendingRequest::new(
            seq,
            OwnerId::new(owner),
            "/x".into(),
            Execution::Dispatcher,
            Box::new(move |response| log.lock().unwrap().push(response.status)),
        ));
        seq
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let mut table = MethodTable::new();
        assert_eq!(table.next_sequence(), 0);
        assert_eq!(table.next_sequence(), 1);
        assert_eq!(table.next_sequence(), 2);
    }

    #[test]
    fn test_complete_out_of_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = MethodTable::new();
        let first = pending(&mut table, 1, &log);
        let second = pending(&mut table, 1, &log);

        for seq in [second, first] {
            match table.complete(seq, Some(OwnerId::new(1))) {
                Completion::Done(request) => {
                    assert_eq!(request.seq, seq);
                    (request.callback)(Response::ok());
                }
                _ => panic!("expected completion for {}", seq),
            }
        }
        assert!(table.is_empty());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_owner_mismatch_keeps_request() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = MethodTable::new();
        let seq = pending(&mut table, 1, &log);

        assert!(matches!(
            table.complete(seq, Some(OwnerId::new(2))),
            Completion::OwnerMismatch { expected } if expected == OwnerId::new(1)
        ));
        assert!(matches!(table.complete(seq, None), Completion::OwnerMismatch { .. }));
        assert_eq!(table.len(), 1);
        assert!(matches!(
            table.complete(seq, Some(OwnerId::new(1))),
            Completion::Done(_)
        ));
    }

    #[test]
    fn test_expired_request_is_unknown_afterwards() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = MethodTable::new();
        let seq = pending(&mut table, 1, &log);

        let expired = table.expire(seq).unwrap();
        (expired.callback)(Response::new(Status::Timeout));
        assert!(table.expire(seq).is_none());
        assert!(matches!(
            table.complete(seq, Some(OwnerId::new(1))),
            Completion::Unknown
        ));
        assert_eq!(*log.lock().unwrap(), vec![Status::Timeout]);
    }

    #[test]
    fn test_reused_sequence_hands_back_previous_call() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = MethodTable::new();
        let seq = pending(&mut table, 1, &log);

        let second = log.clone();
        let replaced = table
            .insert(PendingRequest::new(
                seq,
                OwnerId::new(2),
                "/y".into(),
                Execution::Dispatcher,
                Box::new(move |response| second.lock().unwrap().push(response.status)),
            ))
            .expect("previous call returned");
        assert_eq!(replaced.owner, OwnerId::new(1));
        assert!(replaced.timer.is_none());
        assert!(log.lock().unwrap().is_empty());

        (replaced.callback)(Response::new(Status::Timeout));
        assert_eq!(table.len(), 1);
        assert!(matches!(
            table.complete(seq, Some(OwnerId::new(2))),
            Completion::Done(request) if request.path == "/y"
        ));
        assert_eq!(*log.lock().unwrap(), vec![Status::Timeout]);
    }

    #[test]
    fn test_drain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = MethodTable::new();
        pending(&mut table, 1, &log);
        pending(&mut table, 2, &log);
        assert_eq!(table.drain().len(), 2);
        assert!(table.is_empty());
    }
}
