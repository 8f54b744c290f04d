//! Configuration action wire record.
//!
//! A CONF action payload is a packed record:
//!
//! ```text
//! seqno:      i64    last global seqno applied by the group
//! conf_id:    i64    configuration id (-1 if non-primary)
//! group_uuid: 16 B   group identity
//! st_required: u8    state transfer required (history gap)
//! memb_num:   i64    number of members
//! my_idx:     i64    index of this node, -1 when memb_num = 0
//! data:       ...    null-terminated member ids
//! ```

use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::Seqno;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Member id bound, including the terminating null.
pub const MEMBER_NAME_MAX: usize = 40;

const FIXED_LEN: usize = 8 + 8 + 16 + 1 + 8 + 8;

/// Decoded configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfAction {
    /// Global seqno at the moment of the configuration.
    pub seqno: Seqno,
    /// Configuration id; -1 when non-primary.
    pub conf_id: i64,
    /// Group identity.
    pub group_uuid: Uuid,
    /// Whether this node must request state transfer.
    pub st_required: bool,
    /// Number of members in the configuration.
    pub memb_num: i64,
    /// This node's index; -1 when the member list is empty.
    pub my_idx: i64,
    /// Member ids, in configuration order.
    pub members: Vec<String>,
}

impl ConfAction {
    /// Whether this configuration is primary.
    pub fn is_primary(&self) -> bool {
        self.conf_id >= 0
    }

    /// Encode into the packed payload carried by a CONF action.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FIXED_LEN + self.members.len() * MEMBER_NAME_MAX);
        buf.put_i64(self.seqno);
        buf.put_i64(self.conf_id);
        buf.put_slice(self.group_uuid.as_bytes());
        buf.put_u8(self.st_required as u8);
        buf.put_i64(self.memb_num);
        buf.put_i64(self.my_idx);
        for member in &self.members {
            let raw = member.as_bytes();
            // Truncate to the bound, leaving room for the terminator.
            let len = raw.len().min(MEMBER_NAME_MAX - 1);
            buf.put_slice(&raw[..len]);
            buf.put_u8(0);
        }
        buf.freeze()
    }

    /// Decode the packed payload of a CONF action.
    pub fn decode(payload: &[u8]) -> GcsResult<Self> {
        if payload.len() < FIXED_LEN {
            return Err(GcsError::ProtocolViolation(format!(
                "conf record too short: {} bytes",
                payload.len()
            )));
        }
        let mut buf = payload;
        let seqno = buf.get_i64();
        let conf_id = buf.get_i64();
        let mut uuid_bytes = [0u8; 16];
        buf.copy_to_slice(&mut uuid_bytes);
        let group_uuid = Uuid::from_bytes(uuid_bytes);
        let st_required = buf.get_u8() != 0;
        let memb_num = buf.get_i64();
        let my_idx = buf.get_i64();

        let mut members = Vec::with_capacity(memb_num.max(0) as usize);
        let mut rest = buf;
        while !rest.is_empty() {
            let end = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| {
                    GcsError::ProtocolViolation("unterminated member id in conf record".into())
                })?;
            let id = std::str::from_utf8(&rest[..end])
                .map_err(|_| GcsError::ProtocolViolation("member id is not UTF-8".into()))?;
            members.push(id.to_string());
            rest = &rest[end + 1..];
        }

        if members.len() as i64 != memb_num {
            return Err(GcsError::ProtocolViolation(format!(
                "conf record declares {} members, carries {}",
                memb_num,
                members.len()
            )));
        }
        if memb_num == 0 {
            if my_idx != -1 {
                return Err(GcsError::ProtocolViolation(
                    "empty configuration with a member index".into(),
                ));
            }
        } else if my_idx < 0 || my_idx >= memb_num {
            return Err(GcsError::ProtocolViolation(format!(
                "member index {} outside [0, {})",
                my_idx, memb_num
            )));
        }

        Ok(Self {
            seqno,
            conf_id,
            group_uuid,
            st_required,
            memb_num,
            my_idx,
            members,
        })
    }
}
