//! Receive queue.
//!
//! A bounded FIFO of sealed, ordered actions. The producer is the dispatch
//! loop; consumers are `recv` callers. Ordering correctness is the
//! fragmentation layer's responsibility; the queue only preserves
//! insertion order.

use crate::act::{Action, ActionKind};
use crate::core::error::{GcsError, GcsResult};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueInner {
    buf: VecDeque<Action>,
    closed: bool,
}

/// Bounded blocking action queue.
pub struct RecvQueue {
    cap: usize,
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RecvQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            inner: Mutex::new(QueueInner {
                buf: VecDeque::with_capacity(cap.min(64)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueue a sealed action, blocking while the queue is full.
    ///
    /// Fails only on shutdown.
    pub fn push(&self, action: Action) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        while inner.buf.len() >= self.cap && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(GcsError::Closed);
        }
        inner.buf.push_back(action);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeue the next action, blocking while the queue is empty.
    ///
    /// After close, remaining entries drain with kind [`ActionKind::Error`]
    /// (payload and seqnos preserved); an empty drained queue reports
    /// `NotConnected`.
    pub fn pop(&self) -> GcsResult<Action> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(mut action) = inner.buf.pop_front() {
                if inner.closed {
                    action.kind = ActionKind::Error;
                }
                self.not_full.notify_one();
                return Ok(action);
            }
            if inner.closed {
                return Err(GcsError::NotConnected);
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Current queue depth.
    pub fn len(&self) -> usize {
        self.inner.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut the queue down, waking blocked producers and consumers.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn data(n: u8) -> Action {
        Action::ordered(ActionKind::Data, Bytes::from(vec![n]), n as i64, n as i64)
    }

    #[test]
    fn fifo_order() {
        let queue = RecvQueue::new(8);
        queue.push(data(1)).unwrap();
        queue.push(data(2)).unwrap();
        assert_eq!(queue.pop().unwrap().payload[0], 1);
        assert_eq!(queue.pop().unwrap().payload[0], 2);
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = Arc::new(RecvQueue::new(8));
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop().unwrap())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.push(data(7)).unwrap();
        assert_eq!(consumer.join().unwrap().payload[0], 7);
    }

    #[test]
    fn push_blocks_at_capacity() {
        let queue = Arc::new(RecvQueue::new(1));
        queue.push(data(1)).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.push(data(2)))
        };
        std::thread::sleep(Duration::from_millis(20));
        assert!(!producer.is_finished());
        assert_eq!(queue.pop().unwrap().payload[0], 1);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn close_drains_remainder_as_error() {
        let queue = RecvQueue::new(8);
        queue.push(data(1)).unwrap();
        queue.close();

        let drained = queue.pop().unwrap();
        assert_eq!(drained.kind, ActionKind::Error);
        assert_eq!(drained.payload[0], 1);
        assert!(matches!(queue.pop(), Err(GcsError::NotConnected)));
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue = Arc::new(RecvQueue::new(8));
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(consumer.join().unwrap().is_err());
    }

    #[test]
    fn push_after_close_rejected() {
        let queue = RecvQueue::new(8);
        queue.close();
        assert!(matches!(queue.push(data(1)), Err(GcsError::Closed)));
    }
}
