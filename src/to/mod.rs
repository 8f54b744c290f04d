//! Total-Order monitor.
//!
//! A seqno-gated critical section: `grab(n)` returns exactly after
//! `release(n - 1)`, so application threads enter commit work strictly in
//! sequence order. Waiters sit in a ring of `len` slots indexed by
//! `seqno mod len`; a bounded ring keeps memory fixed and turns runaway
//! gaps into a retriable `Again` instead of unbounded growth.
//!
//! Cancellation is terminal for a seqno (successors treat it as released);
//! interruption is not (the seqno stays pending and must be grabbed again
//! or self-cancelled). The critical section itself is logical: exclusivity
//! comes from the slot state machine, at most one slot is HOLDING.

use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::{Seqno, SEQNO_ILL};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Waiting,
    Holding,
    Canceled { waiter: bool },
    Interrupted,
    Used,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    seqno: Seqno,
    state: SlotState,
}

struct ToInner {
    slots: Box<[Slot]>,
    /// Last seqno out of use (released or swept past as cancelled).
    released: Seqno,
}

/// Seqno-ordered critical section monitor.
pub struct TotalOrder {
    len: usize,
    inner: Mutex<ToInner>,
    cond: Condvar,
    /// Lock-free mirror of the released cursor.
    cursor: AtomicI64,
}

impl TotalOrder {
    /// Create a monitor with `len` waiter slots; `start` is the first
    /// seqno `grab` will admit.
    pub fn new(len: usize, start: Seqno) -> GcsResult<Arc<Self>> {
        if len == 0 {
            return Err(GcsError::InvalidArg("ring length must be positive"));
        }
        let slots = vec![
            Slot {
                seqno: SEQNO_ILL,
                state: SlotState::Free,
            };
            len
        ]
        .into_boxed_slice();
        Ok(Arc::new(Self {
            len,
            inner: Mutex::new(ToInner {
                slots,
                released: start - 1,
            }),
            cond: Condvar::new(),
            cursor: AtomicI64::new(start - 1),
        }))
    }

    /// Tear the monitor down; fails while waiters or other references are
    /// outstanding.
    pub fn destroy(this: Arc<Self>) -> GcsResult<()> {
        if Arc::strong_count(&this) > 1 {
            return Err(GcsError::Busy("monitor has outstanding references"));
        }
        Ok(())
    }

    fn slot_idx(&self, seqno: Seqno) -> usize {
        seqno.rem_euclid(self.len as Seqno) as usize
    }

    /// Every seqno between the released cursor and `seqno` is cancelled.
    fn can_enter(&self, inner: &ToInner, seqno: Seqno) -> bool {
        (inner.released + 1..seqno).all(|q| {
            let slot = inner.slots[self.slot_idx(q)];
            slot.seqno == q && matches!(slot.state, SlotState::Canceled { .. })
        })
    }

    /// Enter the critical section at `seqno`, blocking until the
    /// predecessor releases.
    ///
    /// Errors: `Again` when the ring is too small for the current gap (or
    /// has wrapped onto an earlier holder); `Canceled` when the waiter was
    /// cancelled; `Interrupted` when it was interrupted; `OutOfRange`
    /// when the seqno is already out of use.
    pub fn grab(&self, seqno: Seqno) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        if seqno <= inner.released {
            return Err(GcsError::OutOfRange(seqno));
        }
        if seqno > inner.released + self.len as Seqno {
            return Err(GcsError::Again);
        }

        let idx = self.slot_idx(seqno);
        {
            let slot = &mut inner.slots[idx];
            match slot.state {
                SlotState::Free | SlotState::Used => {
                    *slot = Slot {
                        seqno,
                        state: SlotState::Waiting,
                    };
                }
                _ if slot.seqno != seqno => return Err(GcsError::Again),
                SlotState::Canceled { .. } => {
                    slot.state = SlotState::Canceled { waiter: false };
                    return Err(GcsError::Canceled(seqno));
                }
                SlotState::Interrupted => slot.state = SlotState::Waiting,
                SlotState::Waiting | SlotState::Holding => {
                    return Err(GcsError::Busy("seqno already claimed"));
                }
            }
        }

        loop {
            match inner.slots[idx].state {
                SlotState::Canceled { .. } => {
                    inner.slots[idx].state = if seqno <= inner.released {
                        SlotState::Used
                    } else {
                        SlotState::Canceled { waiter: false }
                    };
                    self.cond.notify_all();
                    return Err(GcsError::Canceled(seqno));
                }
                SlotState::Interrupted => return Err(GcsError::Interrupted(seqno)),
                _ => {}
            }
            if self.can_enter(&inner, seqno) {
                inner.slots[idx].state = SlotState::Holding;
                return Ok(());
            }
            self.cond.wait(&mut inner);
        }
    }

    /// Leave the critical section at `seqno` and wake the successor.
    ///
    /// An out-of-order release is an application bug and is reported, not
    /// absorbed; a concurrent cancel wins over release.
    pub fn release(&self, seqno: Seqno) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        let idx = self.slot_idx(seqno);
        let slot = inner.slots[idx];
        if slot.seqno != seqno || slot.state != SlotState::Holding {
            return if seqno <= inner.released {
                Err(GcsError::OutOfRange(seqno))
            } else {
                Err(GcsError::BadState("release does not pair with a held grab"))
            };
        }

        // Sweep the cancelled gap along with the released slot itself.
        // Cancelled slots with a still-parked waiter convert when it wakes.
        for q in inner.released + 1..=seqno {
            let qidx = self.slot_idx(q);
            let slot = &mut inner.slots[qidx];
            if slot.seqno == q && slot.state != (SlotState::Canceled { waiter: true }) {
                slot.state = SlotState::Used;
            }
        }
        inner.released = seqno;
        self.cursor.store(seqno, Ordering::Release);
        self.cond.notify_all();
        Ok(())
    }

    fn cancel_impl(&self, seqno: Seqno) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        if seqno <= inner.released {
            return Err(GcsError::OutOfRange(seqno));
        }
        if seqno > inner.released + self.len as Seqno {
            return Err(GcsError::Again);
        }

        let idx = self.slot_idx(seqno);
        let slot = &mut inner.slots[idx];
        match slot.state {
            SlotState::Free | SlotState::Used => {
                *slot = Slot {
                    seqno,
                    state: SlotState::Canceled { waiter: false },
                };
            }
            _ if slot.seqno != seqno => return Err(GcsError::Again),
            SlotState::Waiting => slot.state = SlotState::Canceled { waiter: true },
            SlotState::Interrupted | SlotState::Holding => {
                slot.state = SlotState::Canceled { waiter: false };
            }
            SlotState::Canceled { .. } => {}
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Cancel the waiter at `seqno`; it returns `Canceled` and successors
    /// treat the seqno as released. Issued by the current holder against
    /// any waiter, earlier or later.
    pub fn cancel(&self, seqno: Seqno) -> GcsResult<()> {
        self.cancel_impl(seqno)
    }

    /// Cancel one's own pending seqno without entering the section.
    pub fn self_cancel(&self, seqno: Seqno) -> GcsResult<()> {
        self.cancel_impl(seqno)
    }

    /// Wake the waiter at `seqno` with `Interrupted`, keeping the seqno
    /// alive: successors still wait for it.
    pub fn interrupt(&self, seqno: Seqno) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        if seqno <= inner.released {
            return Err(GcsError::OutOfRange(seqno));
        }
        if seqno > inner.released + self.len as Seqno {
            return Err(GcsError::Again);
        }

        let idx = self.slot_idx(seqno);
        let slot = &mut inner.slots[idx];
        match slot.state {
            SlotState::Free | SlotState::Used => {
                *slot = Slot {
                    seqno,
                    state: SlotState::Interrupted,
                };
            }
            _ if slot.seqno != seqno => return Err(GcsError::Again),
            SlotState::Waiting | SlotState::Interrupted => {
                slot.state = SlotState::Interrupted;
            }
            SlotState::Holding => {
                return Err(GcsError::BadState("cannot interrupt a holder"));
            }
            SlotState::Canceled { .. } => return Err(GcsError::OutOfRange(seqno)),
        }
        self.cond.notify_all();
        Ok(())
    }

    /// Conservative lower bound of the last seqno known to be out of use.
    /// No locks held.
    pub fn last_used_seqno(&self) -> Seqno {
        self.cursor.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_grab_is_immediate() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.grab(1).unwrap();
        to.release(1).unwrap();
        assert_eq!(to.last_used_seqno(), 1);
    }

    #[test]
    fn zero_length_ring_rejected() {
        assert!(TotalOrder::new(0, 1).is_err());
    }

    #[test]
    fn grab_beyond_window_is_again() {
        let to = TotalOrder::new(4, 1).unwrap();
        assert!(matches!(to.grab(6), Err(GcsError::Again)));
    }

    #[test]
    fn released_seqno_is_out_of_range() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.grab(1).unwrap();
        to.release(1).unwrap();
        assert!(matches!(to.grab(1), Err(GcsError::OutOfRange(1))));
        assert!(matches!(to.cancel(1), Err(GcsError::OutOfRange(1))));
        assert!(matches!(to.interrupt(1), Err(GcsError::OutOfRange(1))));
    }

    #[test]
    fn out_of_order_release_reported() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.grab(1).unwrap();
        assert!(matches!(to.release(2), Err(GcsError::BadState(_))));
        to.release(1).unwrap();
    }

    #[test]
    fn precancelled_grab_returns_cancelled() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.grab(1).unwrap();
        to.cancel(2).unwrap();
        assert!(matches!(to.grab(2), Err(GcsError::Canceled(2))));
        to.release(1).unwrap();
        // The cancelled seqno is skipped for ordering purposes.
        to.grab(3).unwrap();
        to.release(3).unwrap();
        assert_eq!(to.last_used_seqno(), 3);
    }

    #[test]
    fn self_cancel_unblocks_successor() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.self_cancel(1).unwrap();
        to.grab(2).unwrap();
        to.release(2).unwrap();
    }

    #[test]
    fn cancel_beats_release() {
        let to = TotalOrder::new(4, 1).unwrap();
        to.grab(1).unwrap();
        to.cancel(1).unwrap();
        assert!(to.release(1).is_err());
    }

    #[test]
    fn destroy_with_clone_is_busy() {
        let to = TotalOrder::new(4, 1).unwrap();
        let extra = Arc::clone(&to);
        assert!(matches!(
            TotalOrder::destroy(to),
            Err(GcsError::Busy(_))
        ));
        TotalOrder::destroy(extra).unwrap();
    }
}
