//! Connection lifecycle and public operations.
//!
//! A connection is created detached, optionally initialized with a
//! history hint, opened onto a named channel, driven by delivered actions,
//! closed, and dropped. A dedicated dispatch thread drains the backend
//! receiver into the protocol core; application threads call the public
//! operations concurrently from any thread.

mod core;
pub mod queue;
pub mod repl;

use crate::act::frag::fragment;
use crate::act::wire::WireMsg;
use crate::act::{Action, ActionKind};
use crate::backend::{self, BackendEvent, BackendReceiver, BackendSender, BackendUrl};
use crate::conn::core::GcsCore;
use crate::conn::queue::RecvQueue;
use crate::conn::repl::{ReplCoordinator, ReplFailure, ReplOutcome};
use crate::core::config::GcsConfig;
use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::{Seqno, SEQNO_NIL};
use crate::group::flow::FlowController;
use crate::group::ConnState;
use crate::ops::stats::{ConnStats, StatsSnapshot};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use uuid::Uuid;

/// Result of a successful replication: the accepted byte count and the
/// seqnos the group assigned to the action.
#[derive(Debug, Clone, Copy)]
pub struct ReplTicket {
    /// Accepted payload size.
    pub size: usize,
    /// Group-wide seqno of the delivered action.
    pub global_seqno: Seqno,
    /// This connection's local seqno of the delivered action.
    pub local_seqno: Seqno,
}

/// Result of a successful state-transfer request.
#[derive(Debug, Clone, Copy)]
pub struct StateTransfer {
    /// Configuration index of the selected donor.
    pub donor_idx: i64,
    /// The local seqno the ordered request consumed; the caller must skip
    /// it (e.g. self-cancel it on its TO monitor).
    pub local_seqno: Seqno,
}

/// Donor-side verdict on a finished state transfer.
#[derive(Debug, Clone, Copy)]
pub enum JoinStatus {
    /// Transfer succeeded; optionally the seqno the joiner has reached.
    Complete(Seqno),
    /// Transfer failed; the joiner is not marked joined.
    Failed,
}

struct OpenConn {
    core: Arc<Mutex<GcsCore>>,
    repl: Arc<ReplCoordinator>,
    flow: Arc<FlowController>,
    sender: Arc<dyn BackendSender>,
    serial: Arc<AtomicU64>,
    dispatch: Option<JoinHandle<()>>,
}

enum LifeCycle {
    Closed,
    Open(OpenConn),
}

struct ConnInner {
    lifecycle: LifeCycle,
    hint: (Seqno, Uuid),
    /// Kept across close so remaining entries drain as ERROR.
    queue: Option<Arc<RecvQueue>>,
}

/// A group communication connection.
pub struct Connection {
    config: GcsConfig,
    url: BackendUrl,
    stats: Arc<ConnStats>,
    inner: Mutex<ConnInner>,
}

/// Handle set cloned out of the state lock so blocking operations do not
/// hold it.
struct Handles {
    core: Arc<Mutex<GcsCore>>,
    repl: Arc<ReplCoordinator>,
    flow: Arc<FlowController>,
    sender: Arc<dyn BackendSender>,
    serial: Arc<AtomicU64>,
}

impl Connection {
    /// Create a detached connection for the backend named by `url`
    /// (`scheme://address`, scheme one of dummy, spread, gcomm).
    pub fn create(url: &str, config: GcsConfig) -> GcsResult<Self> {
        config
            .validate()
            .map_err(|err| GcsError::Config(err.to_string()))?;
        let url = BackendUrl::parse(url)?;
        Ok(Self {
            config,
            url,
            stats: Arc::new(ConnStats::default()),
            inner: Mutex::new(ConnInner {
                lifecycle: LifeCycle::Closed,
                hint: (SEQNO_NIL, Uuid::nil()),
                queue: None,
            }),
        })
    }

    /// Provide the group history hint `(seqno, uuid)` persisted from a
    /// previous run. Only a hint; the actual position is settled by the
    /// group. Legal only while the connection is closed.
    pub fn init(&self, seqno: Seqno, uuid: Uuid) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        if matches!(inner.lifecycle, LifeCycle::Open(_)) {
            return Err(GcsError::Busy("connection is open"));
        }
        inner.hint = (seqno, uuid);
        Ok(())
    }

    /// Join the named channel.
    pub fn open(&self, channel: &str) -> GcsResult<()> {
        let mut inner = self.inner.lock();
        if matches!(inner.lifecycle, LifeCycle::Open(_)) {
            return Err(GcsError::Busy("connection is open"));
        }

        let conn = backend::connect(&self.url, channel)?;
        let queue = Arc::new(RecvQueue::new(self.config.recv_queue_cap));
        let repl = Arc::new(ReplCoordinator::new());
        let flow = Arc::new(FlowController::new(
            self.config.fc_upper,
            self.config.fc_lower,
        ));
        let core = Arc::new(Mutex::new(GcsCore::new(
            conn.local_id,
            inner.hint,
            Arc::clone(&queue),
            Arc::clone(&repl),
            Arc::clone(&flow),
            Arc::clone(&conn.sender),
            Arc::clone(&self.stats),
        )));

        let dispatch = {
            let core = Arc::clone(&core);
            std::thread::Builder::new()
                .name(format!("gcs-dispatch-{channel}"))
                .spawn(move || dispatch_loop(conn.receiver, core))
                .map_err(|_| GcsError::Busy("failed to spawn dispatch thread"))?
        };

        tracing::info!(channel, "channel opened");
        inner.queue = Some(queue);
        inner.lifecycle = LifeCycle::Open(OpenConn {
            core,
            repl,
            flow,
            sender: conn.sender,
            serial: Arc::new(AtomicU64::new(0)),
            dispatch: Some(dispatch),
        });
        Ok(())
    }

    /// Leave the channel. Pending `repl` and `recv` callers wake with an
    /// error; queued actions drain as ERROR on subsequent `recv` calls.
    pub fn close(&self) -> GcsResult<()> {
        let (open, queue) = {
            let mut inner = self.inner.lock();
            match std::mem::replace(&mut inner.lifecycle, LifeCycle::Closed) {
                LifeCycle::Open(open) => (open, inner.queue.clone()),
                LifeCycle::Closed => return Err(GcsError::NotConnected),
            }
        };

        // Close the queue first: the dispatch thread may be blocked on a
        // full queue while holding the core lock.
        if let Some(queue) = queue {
            queue.close();
        }
        open.core.lock().begin_close();
        open.sender.close();
        open.repl.fail_all(ReplFailure::Closed);
        if let Some(handle) = open.dispatch {
            let _ = handle.join();
        }
        tracing::info!("connection closed");
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        match &self.inner.lock().lifecycle {
            LifeCycle::Closed => ConnState::Closed,
            LifeCycle::Open(open) => open.core.lock().state(),
        }
    }

    /// Configuration id of the current view; -1 outside a primary one.
    pub fn conf_id(&self) -> i64 {
        match &self.inner.lock().lifecycle {
            LifeCycle::Closed => -1,
            LifeCycle::Open(open) => open.core.lock().conf_id(),
        }
    }

    /// Group identity settled by the current configuration; nil before
    /// the first primary view.
    pub fn group_uuid(&self) -> Uuid {
        match &self.inner.lock().lifecycle {
            LifeCycle::Closed => Uuid::nil(),
            LifeCycle::Open(open) => open.core.lock().group_uuid(),
        }
    }

    /// Traffic counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Send an action to the group and return immediately with the
    /// accepted byte count. Ownership of the payload moves to the core;
    /// the action comes back through `recv` or is discarded if the group
    /// cannot deliver it.
    pub fn send(&self, payload: Bytes, kind: ActionKind) -> GcsResult<usize> {
        if !kind.is_application_kind() {
            return Err(GcsError::InvalidArg(
                "only DATA and STATE_REQ actions may be sent",
            ));
        }
        let handles = self.handles()?;
        let serial = handles.serial.fetch_add(1, Ordering::AcqRel) + 1;
        let size = payload.len();
        let frames = fragment(kind, serial, &payload, self.config.packet_size);
        let count = frames.len();
        for frame in frames {
            handles.sender.send(frame.encode())?;
        }
        self.stats.record_action_sent(size, count);
        Ok(size)
    }

    /// Receive the next delivered action, blocking while none is
    /// available. The caller owns the returned payload.
    pub fn recv(&self) -> GcsResult<Action> {
        let (queue, flow) = {
            let inner = self.inner.lock();
            let Some(queue) = inner.queue.clone() else {
                return Err(GcsError::NotConnected);
            };
            let flow = match &inner.lifecycle {
                LifeCycle::Open(open) => {
                    Some((Arc::clone(&open.flow), Arc::clone(&open.sender)))
                }
                LifeCycle::Closed => None,
            };
            (queue, flow)
        };

        let action = queue.pop()?;
        if let Some((flow, sender)) = flow {
            if flow.on_queue_drain(queue.len()) {
                let _ = sender.send(WireMsg::Flow(false).encode());
            }
        }
        Ok(action)
    }

    /// Replicate an action: send it to the group and block until its
    /// ordered delivery assigns seqnos.
    pub fn repl(&self, payload: Bytes) -> GcsResult<ReplTicket> {
        let handles = self.handles()?;
        if !handles.core.lock().state().in_primary() {
            return Err(GcsError::NotConnected);
        }

        let serial = handles.serial.fetch_add(1, Ordering::AcqRel) + 1;
        let size = payload.len();
        handles.repl.register(serial);
        let frames = fragment(ActionKind::Data, serial, &payload, self.config.packet_size);
        let count = frames.len();
        for frame in frames {
            if let Err(err) = handles.sender.send(frame.encode()) {
                handles.repl.abort(serial);
                return Err(err);
            }
        }
        self.stats.record_action_sent(size, count);

        match handles.repl.wait(serial)? {
            ReplOutcome::Data { global, local } => Ok(ReplTicket {
                size,
                global_seqno: global,
                local_seqno: local,
            }),
            ReplOutcome::StateReq { .. } => {
                Err(GcsError::InvalidArg("mismatched replication completion"))
            }
        }
    }

    /// Broadcast a state-transfer request and block until the ordered
    /// request selects a donor. At most one request may be in flight;
    /// further calls are busy until the handshake completes.
    ///
    /// On success the donor's configuration index is returned together
    /// with the local seqno the request consumed, which the caller must
    /// skip in its local ordering. [`GcsError::DonorUnavailable`] carries
    /// the same seqno when no member can donate right now.
    pub fn request_state_transfer(&self, req: Bytes) -> GcsResult<StateTransfer> {
        let handles = self.handles()?;
        handles.core.lock().begin_state_request()?;

        let serial = handles.serial.fetch_add(1, Ordering::AcqRel) + 1;
        let size = req.len();
        handles.repl.register(serial);
        let frames = fragment(ActionKind::StateReq, serial, &req, self.config.packet_size);
        let count = frames.len();
        for frame in frames {
            if let Err(err) = handles.sender.send(frame.encode()) {
                handles.repl.abort(serial);
                handles.core.lock().abort_state_request();
                return Err(err);
            }
        }
        self.stats.record_action_sent(size, count);

        match handles.repl.wait(serial)? {
            ReplOutcome::StateReq {
                donor: Some(donor_idx),
                local,
            } => Ok(StateTransfer {
                donor_idx,
                local_seqno: local,
            }),
            ReplOutcome::StateReq { donor: None, local } => {
                Err(GcsError::DonorUnavailable { local_seqno: local })
            }
            ReplOutcome::Data { .. } => {
                Err(GcsError::InvalidArg("mismatched replication completion"))
            }
        }
    }

    /// Donor-side completion of a state transfer.
    pub fn join(&self, status: JoinStatus) -> GcsResult<()> {
        let handles = self.handles()?;
        if !handles.core.lock().is_donor() {
            return Err(GcsError::BadState("join is the donor-side completion"));
        }
        let wire_status = match status {
            JoinStatus::Complete(seqno) => {
                if seqno < SEQNO_NIL {
                    return Err(GcsError::InvalidArg("completion seqno must not be negative"));
                }
                seqno
            }
            JoinStatus::Failed => -1,
        };
        handles.sender.send(WireMsg::Join(wire_status).encode())?;
        Ok(())
    }

    /// Broadcast the highest seqno this node has applied; feeds the
    /// group-wide commit cut.
    pub fn set_last_applied(&self, seqno: Seqno) -> GcsResult<()> {
        let handles = self.handles()?;
        handles.sender.send(WireMsg::LastApplied(seqno).encode())?;
        Ok(())
    }

    /// Whether cooperating applications should defer submissions: true
    /// while any member's stop signal is outstanding. Advisory only.
    pub fn congested(&self) -> GcsResult<bool> {
        let handles = self.handles()?;
        Ok(handles.flow.congested())
    }

    fn handles(&self) -> GcsResult<Handles> {
        match &self.inner.lock().lifecycle {
            LifeCycle::Closed => Err(GcsError::NotConnected),
            LifeCycle::Open(open) => Ok(Handles {
                core: Arc::clone(&open.core),
                repl: Arc::clone(&open.repl),
                flow: Arc::clone(&open.flow),
                sender: Arc::clone(&open.sender),
                serial: Arc::clone(&open.serial),
            }),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn dispatch_loop(mut receiver: Box<dyn BackendReceiver>, core: Arc<Mutex<GcsCore>>) {
    loop {
        let event = receiver.recv();
        let closed = matches!(event, BackendEvent::Closed);
        core.lock().handle_event(event);
        if closed {
            break;
        }
    }
}
