//! Action fragmentation.
//!
//! An action of arbitrary size is split into frames whose payload is
//! bounded by the configured packet size. Each frame carries the action
//! kind, the per-sender action serial, its fragment index, and a last-
//! fragment flag; sender identity comes from the transport envelope.

use crate::act::wire::WireMsg;
use crate::act::ActionKind;
use crate::core::error::{GcsError, GcsResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

bitflags::bitflags! {
    /// Frame header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        /// This frame carries the final fragment of its action.
        const LAST = 0b0000_0001;
    }
}

/// Fixed frame header length: tag, kind, flags, reserved, index, serial.
pub const FRAME_HEADER_LEN: usize = 1 + 1 + 1 + 1 + 4 + 8;

/// A single fragment of an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Kind of the action this fragment belongs to.
    pub kind: ActionKind,
    /// Header flags.
    pub flags: FrameFlags,
    /// Zero-based fragment index within the action.
    pub frag_idx: u32,
    /// Per-sender action serial, monotonic per connection.
    pub act_serial: u64,
    /// Payload slice.
    pub payload: Bytes,
}

impl Frame {
    /// Whether this frame seals its action.
    pub fn is_last(&self) -> bool {
        self.flags.contains(FrameFlags::LAST)
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u8(WireMsg::FRAG_TAG);
        buf.put_u8(self.kind.to_wire());
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u32(self.frag_idx);
        buf.put_u64(self.act_serial);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode from wire bytes (tag byte included).
    pub fn decode(mut raw: Bytes) -> GcsResult<Self> {
        if raw.len() < FRAME_HEADER_LEN {
            return Err(GcsError::ProtocolViolation(format!(
                "frame too short: {} bytes",
                raw.len()
            )));
        }
        let tag = raw.get_u8();
        if tag != WireMsg::FRAG_TAG {
            return Err(GcsError::ProtocolViolation(format!(
                "not a fragment: tag {tag}"
            )));
        }
        let kind = ActionKind::from_wire(raw.get_u8());
        let flags = FrameFlags::from_bits_truncate(raw.get_u8());
        raw.advance(1);
        let frag_idx = raw.get_u32();
        let act_serial = raw.get_u64();
        Ok(Self {
            kind,
            flags,
            frag_idx,
            act_serial,
            payload: raw,
        })
    }
}

/// Split an action payload into frames.
///
/// A zero-length action still produces one (empty, last) frame so that it
/// occupies a position in the total order.
pub fn fragment(
    kind: ActionKind,
    act_serial: u64,
    payload: &Bytes,
    packet_size: usize,
) -> Vec<Frame> {
    debug_assert!(packet_size > 0);
    let total = payload.len();
    let count = usize::max(1, total.div_ceil(packet_size));
    let mut frames = Vec::with_capacity(count);
    for idx in 0..count {
        let start = idx * packet_size;
        let end = usize::min(start + packet_size, total);
        let last = idx + 1 == count;
        frames.push(Frame {
            kind,
            flags: if last {
                FrameFlags::LAST
            } else {
                FrameFlags::empty()
            },
            frag_idx: idx as u32,
            act_serial,
            payload: payload.slice(start..end),
        });
    }
    frames
}
