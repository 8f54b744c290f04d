//! Transport message envelope.
//!
//! Every elementary message starts with a one-byte type tag. Fragments
//! carry pieces of application actions; the remaining types are service
//! messages the core exchanges in-band, so that every member observes them
//! at the same position in the totally ordered history.

use crate::act::frag::Frame;
use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::Seqno;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

const TAG_FRAG: u8 = 0;
const TAG_STATE: u8 = 1;
const TAG_FLOW: u8 = 2;
const TAG_JOIN: u8 = 3;
const TAG_SYNC: u8 = 4;
const TAG_LAST_APPLIED: u8 = 5;

/// A member's announcement during state exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMsg {
    /// Configuration the announcement belongs to.
    pub conf_id: i64,
    /// The member's current global seqno (its init hint if it has not
    /// delivered anything yet).
    pub seqno: Seqno,
    /// The member's history identity; nil when it has none.
    pub uuid: Uuid,
}

/// A decoded transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMsg {
    /// An action fragment.
    Frag(Frame),
    /// State-exchange announcement.
    State(StateMsg),
    /// Flow-control signal; `true` = stop, `false` = continue.
    Flow(bool),
    /// Donor's transfer-complete announcement; negative = failure.
    Join(Seqno),
    /// Joiner's caught-up announcement.
    Sync,
    /// Applied-seqno hint feeding commit-cut computation.
    LastApplied(Seqno),
}

impl WireMsg {
    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Frag(frame) => frame.encode(),
            Self::State(state) => {
                let mut buf = BytesMut::with_capacity(1 + 8 + 8 + 16);
                buf.put_u8(TAG_STATE);
                buf.put_i64(state.conf_id);
                buf.put_i64(state.seqno);
                buf.put_slice(state.uuid.as_bytes());
                buf.freeze()
            }
            Self::Flow(stop) => {
                let mut buf = BytesMut::with_capacity(2);
                buf.put_u8(TAG_FLOW);
                buf.put_u8(*stop as u8);
                buf.freeze()
            }
            Self::Join(status) => {
                let mut buf = BytesMut::with_capacity(1 + 8);
                buf.put_u8(TAG_JOIN);
                buf.put_i64(*status);
                buf.freeze()
            }
            Self::Sync => Bytes::from_static(&[TAG_SYNC]),
            Self::LastApplied(seqno) => {
                let mut buf = BytesMut::with_capacity(1 + 8);
                buf.put_u8(TAG_LAST_APPLIED);
                buf.put_i64(*seqno);
                buf.freeze()
            }
        }
    }

    /// Decode from wire bytes.
    pub fn decode(mut raw: Bytes) -> GcsResult<Self> {
        if raw.is_empty() {
            return Err(GcsError::ProtocolViolation("empty message".into()));
        }
        let tag = raw[0];
        match tag {
            TAG_FRAG => Ok(Self::Frag(Frame::decode(raw)?)),
            TAG_STATE => {
                if raw.len() != 1 + 8 + 8 + 16 {
                    return Err(GcsError::ProtocolViolation("short state message".into()));
                }
                raw.advance(1);
                let conf_id = raw.get_i64();
                let seqno = raw.get_i64();
                let mut uuid_bytes = [0u8; 16];
                raw.copy_to_slice(&mut uuid_bytes);
                Ok(Self::State(StateMsg {
                    conf_id,
                    seqno,
                    uuid: Uuid::from_bytes(uuid_bytes),
                }))
            }
            TAG_FLOW => {
                if raw.len() != 2 {
                    return Err(GcsError::ProtocolViolation("short flow message".into()));
                }
                Ok(Self::Flow(raw[1] != 0))
            }
            TAG_JOIN => {
                if raw.len() != 1 + 8 {
                    return Err(GcsError::ProtocolViolation("short join message".into()));
                }
                raw.advance(1);
                Ok(Self::Join(raw.get_i64()))
            }
            TAG_SYNC => Ok(Self::Sync),
            TAG_LAST_APPLIED => {
                if raw.len() != 1 + 8 {
                    return Err(GcsError::ProtocolViolation(
                        "short last-applied message".into(),
                    ));
                }
                raw.advance(1);
                Ok(Self::LastApplied(raw.get_i64()))
            }
            other => Err(GcsError::ProtocolViolation(format!(
                "unknown message tag {other}"
            ))),
        }
    }

    pub(crate) const FRAG_TAG: u8 = TAG_FRAG;
}
