//! Flow control.
//!
//! Each member watches its own receive-queue depth. Crossing the high
//! watermark broadcasts a stop signal; draining back under the low
//! watermark broadcasts a continue. Signals travel in-band as ordered
//! actions, so every member observes flow transitions at the same point
//! in the history. The semantics are advisory: submissions still succeed
//! while flow is stopped, `congested` just tells cooperating applications
//! to back off.

use crate::backend::MemberId;
use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug, Default)]
struct FlowInner {
    /// Members whose stop signal is outstanding.
    stops: HashSet<MemberId>,
    /// Whether this member's own stop signal is outstanding.
    self_stopped: bool,
}

/// Watermark-based flow controller.
#[derive(Debug)]
pub struct FlowController {
    upper: usize,
    lower: usize,
    inner: Mutex<FlowInner>,
}

impl FlowController {
    pub fn new(upper: usize, lower: usize) -> Self {
        debug_assert!(lower <= upper);
        Self {
            upper,
            lower,
            inner: Mutex::new(FlowInner::default()),
        }
    }

    /// Called after enqueueing; true when a stop signal should be sent.
    pub fn on_queue_growth(&self, depth: usize) -> bool {
        let mut inner = self.inner.lock();
        if depth >= self.upper && !inner.self_stopped {
            inner.self_stopped = true;
            return true;
        }
        false
    }

    /// Called after dequeueing; true when a continue signal should be sent.
    pub fn on_queue_drain(&self, depth: usize) -> bool {
        let mut inner = self.inner.lock();
        if depth <= self.lower && inner.self_stopped {
            inner.self_stopped = false;
            return true;
        }
        false
    }

    /// Record a delivered flow signal.
    pub fn on_flow(&self, member: &str, stop: bool) {
        let mut inner = self.inner.lock();
        if stop {
            inner.stops.insert(member.to_string());
        } else {
            inner.stops.remove(member);
        }
    }

    /// Forget stop signals from members no longer in the view.
    pub fn on_view(&self, retained: &HashSet<MemberId>) {
        self.inner.lock().stops.retain(|m| retained.contains(m));
    }

    /// Whether any member's stop signal is outstanding.
    pub fn congested(&self) -> bool {
        !self.inner.lock().stops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_emitted_once_per_crossing() {
        let flow = FlowController::new(4, 2);
        assert!(!flow.on_queue_growth(3));
        assert!(flow.on_queue_growth(4));
        assert!(!flow.on_queue_growth(5));
        assert!(flow.on_queue_drain(2));
        assert!(!flow.on_queue_drain(1));
        assert!(flow.on_queue_growth(4));
    }

    #[test]
    fn congestion_tracks_delivered_signals() {
        let flow = FlowController::new(4, 2);
        assert!(!flow.congested());
        flow.on_flow("a", true);
        flow.on_flow("b", true);
        assert!(flow.congested());
        flow.on_flow("a", false);
        assert!(flow.congested());
        flow.on_flow("b", false);
        assert!(!flow.congested());
    }

    #[test]
    fn departed_member_stops_forgotten() {
        let flow = FlowController::new(4, 2);
        flow.on_flow("gone", true);
        assert!(flow.congested());
        flow.on_view(&["stay".to_string()].into());
        assert!(!flow.congested());
    }
}
