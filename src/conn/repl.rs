//! Pending replication tracking.
//!
//! Every `repl` and state-transfer submission registers a pending entry
//! keyed by its per-sender action serial. The dispatch loop completes the
//! entry when the matching delivery surfaces; a view dissolution or close
//! fails every outstanding entry.

use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::Seqno;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

/// Successful completion of a pending submission.
#[derive(Debug, Clone, Copy)]
pub enum ReplOutcome {
    /// An ordered application action was delivered.
    Data {
        /// Assigned global seqno.
        global: Seqno,
        /// Assigned local seqno.
        local: Seqno,
    },
    /// A state-transfer request was ordered.
    StateReq {
        /// Selected donor index; `None` when no member can donate.
        donor: Option<i64>,
        /// The local seqno the request consumed; the caller must skip it.
        local: Seqno,
    },
}

/// Terminal failure of a pending submission.
#[derive(Debug, Clone, Copy)]
pub enum ReplFailure {
    /// The view dissolved before delivery.
    ViewLost,
    /// The connection closed.
    Closed,
}

impl From<ReplFailure> for GcsError {
    fn from(failure: ReplFailure) -> Self {
        match failure {
            ReplFailure::ViewLost => GcsError::ViewLost,
            ReplFailure::Closed => GcsError::Closed,
        }
    }
}

#[derive(Debug, Default)]
struct Pending {
    outcome: Option<Result<ReplOutcome, ReplFailure>>,
}

/// Table of in-flight submissions awaiting their ordered delivery.
#[derive(Default)]
pub struct ReplCoordinator {
    inner: Mutex<HashMap<u64, Pending>>,
    done: Condvar,
}

impl ReplCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submission before its first fragment is transmitted.
    pub fn register(&self, serial: u64) {
        self.inner.lock().insert(serial, Pending::default());
    }

    /// Forget a submission whose transmission failed.
    pub fn abort(&self, serial: u64) {
        self.inner.lock().remove(&serial);
    }

    /// Block until the submission completes; consumes the entry.
    pub fn wait(&self, serial: u64) -> GcsResult<ReplOutcome> {
        let mut inner = self.inner.lock();
        loop {
            let Some(pending) = inner.get_mut(&serial) else {
                return Err(GcsError::Closed);
            };
            if pending.outcome.is_some() {
                let outcome = inner.remove(&serial).and_then(|p| p.outcome);
                return outcome.expect("completed entry").map_err(Into::into);
            }
            self.done.wait(&mut inner);
        }
    }

    /// Complete a pending submission, if one is registered for `serial`.
    pub fn complete(&self, serial: u64, outcome: ReplOutcome) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.get_mut(&serial) {
            pending.outcome = Some(Ok(outcome));
            self.done.notify_all();
        }
    }

    /// Whether a submission is still pending.
    pub fn is_pending(&self, serial: u64) -> bool {
        self.inner.lock().contains_key(&serial)
    }

    /// Fail one pending submission, if still outstanding.
    pub fn fail(&self, serial: u64, failure: ReplFailure) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.get_mut(&serial) {
            if pending.outcome.is_none() {
                pending.outcome = Some(Err(failure));
                self.done.notify_all();
            }
        }
    }

    /// Fail every outstanding submission.
    pub fn fail_all(&self, failure: ReplFailure) {
        let mut inner = self.inner.lock();
        for pending in inner.values_mut() {
            if pending.outcome.is_none() {
                pending.outcome = Some(Err(failure));
            }
        }
        self.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn wait_returns_completion() {
        let coord = Arc::new(ReplCoordinator::new());
        coord.register(5);
        let waiter = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || coord.wait(5))
        };
        std::thread::sleep(Duration::from_millis(20));
        coord.complete(5, ReplOutcome::Data { global: 1, local: 1 });
        match waiter.join().unwrap().unwrap() {
            ReplOutcome::Data { global, local } => {
                assert_eq!(global, 1);
                assert_eq!(local, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!coord.is_pending(5));
    }

    #[test]
    fn fail_all_wakes_waiters() {
        let coord = Arc::new(ReplCoordinator::new());
        coord.register(1);
        coord.register(2);
        let waiter = {
            let coord = Arc::clone(&coord);
            std::thread::spawn(move || coord.wait(1))
        };
        std::thread::sleep(Duration::from_millis(20));
        coord.fail_all(ReplFailure::ViewLost);
        assert!(matches!(waiter.join().unwrap(), Err(GcsError::ViewLost)));
        assert!(matches!(
            coord.wait(2),
            Err(GcsError::ViewLost)
        ));
    }

    #[test]
    fn completion_without_registration_is_ignored() {
        let coord = ReplCoordinator::new();
        coord.complete(9, ReplOutcome::Data { global: 1, local: 1 });
        assert!(!coord.is_pending(9));
    }
}
