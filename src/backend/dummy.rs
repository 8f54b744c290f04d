//! In-process reference transport.
//!
//! Every channel is a bus: one lock orders all broadcasts and view
//! changes, which trivially yields the total order and inline view
//! delivery the core demands. Channels live for the process lifetime, so
//! a member rejoining a channel name finds the same group identity.
//!
//! The address part of a `dummy://address` URL names the member on the
//! bus; when empty, a unique name is generated.

use super::{BackendConn, BackendEvent, BackendReceiver, BackendSender, MemberId, ViewEvent};
use crate::core::error::{GcsError, GcsResult};
use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<Bus>>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Arc<Bus>>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

struct BusMember {
    name: MemberId,
    tx: Sender<BackendEvent>,
}

struct BusInner {
    conf_seq: i64,
    members: Vec<BusMember>,
    /// Member names of the last primary component.
    prev_primary: HashSet<MemberId>,
    primary: bool,
}

struct Bus {
    uuid: Uuid,
    inner: Mutex<BusInner>,
}

impl Bus {
    fn new() -> Self {
        Self {
            uuid: Uuid::new_v4(),
            inner: Mutex::new(BusInner {
                conf_seq: 0,
                members: Vec::new(),
                prev_primary: HashSet::new(),
                primary: false,
            }),
        }
    }

    fn join(&self, name: &str) -> GcsResult<Receiver<BackendEvent>> {
        let mut inner = self.inner.lock();
        if inner.members.iter().any(|m| m.name == name) {
            return Err(GcsError::InvalidArg("duplicate member name on channel"));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        inner.members.push(BusMember {
            name: name.to_string(),
            tx,
        });

        // A join always restores quorum: everyone on the bus is reachable.
        inner.primary = true;
        inner.prev_primary = inner.members.iter().map(|m| m.name.clone()).collect();
        inner.conf_seq += 1;
        self.broadcast_view(&inner);
        Ok(rx)
    }

    fn leave(&self, name: &str, graceful: bool) {
        let mut inner = self.inner.lock();
        let Some(pos) = inner.members.iter().position(|m| m.name == name) else {
            return;
        };
        inner.members.remove(pos);
        if graceful {
            inner.prev_primary.remove(name);
        }
        if inner.members.is_empty() {
            inner.primary = false;
            return;
        }

        if inner.primary {
            let surviving = inner
                .members
                .iter()
                .filter(|m| inner.prev_primary.contains(&m.name))
                .count();
            inner.primary = 2 * surviving > inner.prev_primary.len();
        }
        if inner.primary {
            inner.prev_primary = inner.members.iter().map(|m| m.name.clone()).collect();
            inner.conf_seq += 1;
        }
        self.broadcast_view(&inner);
    }

    fn broadcast_view(&self, inner: &BusInner) {
        let members: Vec<MemberId> = inner.members.iter().map(|m| m.name.clone()).collect();
        let conf_id = if inner.primary { inner.conf_seq } else { -1 };
        for (idx, member) in inner.members.iter().enumerate() {
            let _ = member.tx.send(BackendEvent::View(ViewEvent {
                conf_id,
                primary: inner.primary,
                members: members.clone(),
                my_idx: idx as i64,
                view_uuid: self.uuid,
            }));
        }
    }

    fn send(&self, from: &str, payload: Bytes) -> GcsResult<usize> {
        let inner = self.inner.lock();
        if !inner.members.iter().any(|m| m.name == from) {
            return Err(GcsError::Closed);
        }
        let size = payload.len();
        for member in &inner.members {
            let _ = member.tx.send(BackendEvent::Message {
                sender: from.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(size)
    }
}

struct DummySender {
    bus: Arc<Bus>,
    name: MemberId,
    closed: AtomicBool,
}

impl BackendSender for DummySender {
    fn send(&self, msg: Bytes) -> GcsResult<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GcsError::Closed);
        }
        self.bus.send(&self.name, msg)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus.leave(&self.name, true);
        }
    }
}

struct DummyReceiver {
    rx: Receiver<BackendEvent>,
}

impl BackendReceiver for DummyReceiver {
    fn recv(&mut self) -> BackendEvent {
        self.rx.recv().unwrap_or(BackendEvent::Closed)
    }
}

/// Join `channel` on the in-process bus.
pub(super) fn connect(address: &str, channel: &str) -> GcsResult<BackendConn> {
    let name = if address.is_empty() {
        format!("m-{}", Uuid::new_v4().simple())
    } else {
        address.to_string()
    };

    let bus = registry()
        .lock()
        .entry(channel.to_string())
        .or_insert_with(|| Arc::new(Bus::new()))
        .clone();
    let rx = bus.join(&name)?;

    Ok(BackendConn {
        local_id: name.clone(),
        sender: Arc::new(DummySender {
            bus,
            name,
            closed: AtomicBool::new(false),
        }),
        receiver: Box::new(DummyReceiver { rx }),
    })
}

/// Abruptly remove `member` from `channel`, as if its process died.
///
/// Survivors observe a view change; whether it retains quorum follows the
/// bus quorum policy (a strict majority of the previous primary component
/// must survive). Intended for fault-injection in tests.
pub fn drop_member(channel: &str, member: &str) {
    let bus = registry().lock().get(channel).cloned();
    if let Some(bus) = bus {
        bus.leave(member, false);
    }
}
