//! Action reassembly.
//!
//! Receivers keep a per-sender map from action serial to a partial buffer.
//! Fragment `i` must arrive at position `i`; anything else is a transport
//! ordering violation. A member that joined after an action's first
//! fragment skips the remainder of that action but still learns when it
//! seals, so its seqno accounting stays aligned with the group.

use crate::act::frag::Frame;
use crate::act::ActionKind;
use crate::backend::MemberId;
use crate::core::error::{GcsError, GcsResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{HashMap, HashSet};

/// A fully reassembled action, not yet ordered.
#[derive(Debug, Clone)]
pub struct SealedAction {
    /// Sender identity.
    pub sender: MemberId,
    /// Per-sender action serial.
    pub act_serial: u64,
    /// Action kind from the fragment headers.
    pub kind: ActionKind,
    /// Reassembled payload.
    pub payload: Bytes,
}

/// A partial assembly dropped because its sender left the view.
#[derive(Debug, Clone)]
pub struct DroppedPartial {
    /// Sender identity.
    pub sender: MemberId,
    /// Per-sender action serial.
    pub act_serial: u64,
    /// Action kind from the fragment headers.
    pub kind: ActionKind,
}

/// Outcome of feeding one fragment.
#[derive(Debug)]
pub enum Feed {
    /// More fragments are needed.
    Incomplete,
    /// The action is sealed and ready for ordering.
    Sealed(SealedAction),
    /// The final fragment of an action whose beginning this member never
    /// saw; the action still occupies its position in the total order.
    Skipped {
        /// Sender identity.
        sender: MemberId,
        /// Action kind from the fragment header.
        kind: ActionKind,
    },
}

#[derive(Debug)]
struct Partial {
    kind: ActionKind,
    next_idx: u32,
    buf: BytesMut,
}

/// Per-sender reassembly state.
#[derive(Debug, Default)]
pub struct Defragmenter {
    partials: HashMap<MemberId, HashMap<u64, Partial>>,
    skipping: HashMap<MemberId, HashSet<u64>>,
}

impl Defragmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment from `sender`.
    pub fn feed(&mut self, sender: &str, frame: Frame) -> GcsResult<Feed> {
        if let Some(skips) = self.skipping.get_mut(sender) {
            if skips.contains(&frame.act_serial) {
                if frame.is_last() {
                    skips.remove(&frame.act_serial);
                    return Ok(Feed::Skipped {
                        sender: sender.to_string(),
                        kind: frame.kind,
                    });
                }
                return Ok(Feed::Incomplete);
            }
        }

        let partials = self.partials.entry(sender.to_string()).or_default();
        match partials.get_mut(&frame.act_serial) {
            None if frame.frag_idx == 0 => {
                if frame.is_last() {
                    return Ok(Feed::Sealed(SealedAction {
                        sender: sender.to_string(),
                        act_serial: frame.act_serial,
                        kind: frame.kind,
                        payload: frame.payload,
                    }));
                }
                let mut buf = BytesMut::new();
                buf.put_slice(&frame.payload);
                partials.insert(
                    frame.act_serial,
                    Partial {
                        kind: frame.kind,
                        next_idx: 1,
                        buf,
                    },
                );
                Ok(Feed::Incomplete)
            }
            None => {
                // Continuation of an action that started before this member
                // joined the channel.
                if frame.is_last() {
                    return Ok(Feed::Skipped {
                        sender: sender.to_string(),
                        kind: frame.kind,
                    });
                }
                self.skipping
                    .entry(sender.to_string())
                    .or_default()
                    .insert(frame.act_serial);
                Ok(Feed::Incomplete)
            }
            Some(partial) if frame.frag_idx == partial.next_idx => {
                partial.buf.put_slice(&frame.payload);
                partial.next_idx += 1;
                if frame.is_last() {
                    if let Some(partial) = partials.remove(&frame.act_serial) {
                        return Ok(Feed::Sealed(SealedAction {
                            sender: sender.to_string(),
                            act_serial: frame.act_serial,
                            kind: partial.kind,
                            payload: partial.buf.freeze(),
                        }));
                    }
                }
                Ok(Feed::Incomplete)
            }
            Some(partial) => Err(GcsError::ProtocolViolation(format!(
                "sender {} action {}: fragment {} arrived, expected {}",
                sender, frame.act_serial, frame.frag_idx, partial.next_idx
            ))),
        }
    }

    /// Drop partial assemblies from senders no longer in the view.
    ///
    /// Returns the dropped partials so the caller can surface ERROR actions.
    pub fn drop_departed(&mut self, retained: &HashSet<MemberId>) -> Vec<DroppedPartial> {
        let mut dropped = Vec::new();
        self.partials.retain(|sender, actions| {
            if retained.contains(sender) {
                return true;
            }
            for (serial, partial) in actions.drain() {
                dropped.push(DroppedPartial {
                    sender: sender.clone(),
                    act_serial: serial,
                    kind: partial.kind,
                });
            }
            false
        });
        self.skipping.retain(|sender, _| retained.contains(sender));
        dropped
    }

    /// Drop every partial assembly (non-primary transition).
    pub fn drop_all(&mut self) -> Vec<DroppedPartial> {
        self.drop_departed(&HashSet::new())
    }

    /// Whether any partial assembly is outstanding for `sender`.
    pub fn has_partial(&self, sender: &str) -> bool {
        self.partials
            .get(sender)
            .is_some_and(|actions| !actions.is_empty())
    }
}
