//! Actions: the unit of application visibility.
//!
//! Messages are elementary transport pieces; actions are the arbitrary-size
//! payloads the application replicates, fragmented into as many messages as
//! needed and reassembled at receivers. The application sends DATA and
//! STATE_REQ actions; everything else is synthesized by the core.

pub mod conf;
pub mod defrag;
pub mod frag;
pub mod wire;

use crate::core::seqno::{seqno_or_ill, Seqno};
use bytes::Bytes;

/// Action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Application action, sent by the application.
    Data,
    /// Group-wide commit cut.
    CommitCut,
    /// Request for state transfer.
    StateReq,
    /// New configuration.
    Conf,
    /// State transfer status.
    Join,
    /// Synchronized with group.
    Sync,
    /// Flow control.
    Flow,
    /// Service action, synthesized by the core.
    Service,
    /// Error happened while receiving the action.
    Error,
    /// Undefined action type.
    Unknown,
}

impl ActionKind {
    /// Whether the application may originate this kind.
    pub fn is_application_kind(self) -> bool {
        matches!(self, Self::Data | Self::StateReq)
    }

    /// Wire tag for the fragment header.
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::CommitCut => 1,
            Self::StateReq => 2,
            Self::Conf => 3,
            Self::Join => 4,
            Self::Sync => 5,
            Self::Flow => 6,
            Self::Service => 7,
            Self::Error => 8,
            Self::Unknown => 9,
        }
    }

    /// Decode a wire tag; unrecognized tags map to `Unknown`.
    pub(crate) fn from_wire(raw: u8) -> Self {
        match raw {
            0 => Self::Data,
            1 => Self::CommitCut,
            2 => Self::StateReq,
            3 => Self::Conf,
            4 => Self::Join,
            5 => Self::Sync,
            6 => Self::Flow,
            7 => Self::Service,
            8 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// A delivered action.
///
/// The payload is exclusively owned: it moves from the application into the
/// core at submission and from the core back to the application when `recv`
/// returns it.
#[derive(Debug, Clone)]
pub struct Action {
    /// Action type.
    pub kind: ActionKind,
    /// Payload bytes.
    pub payload: Bytes,
    /// Group-wide gapless id; `None` for actions that do not require
    /// ordering (synthesized kinds, non-primary CONF).
    pub global_seqno: Option<Seqno>,
    /// Per-connection gapless id over the ordered stream.
    pub local_seqno: Option<Seqno>,
}

impl Action {
    /// An ordered application action.
    pub fn ordered(kind: ActionKind, payload: Bytes, global: Seqno, local: Seqno) -> Self {
        Self {
            kind,
            payload,
            global_seqno: Some(global),
            local_seqno: Some(local),
        }
    }

    /// A synthesized action carrying no ordering.
    pub fn unordered(kind: ActionKind, payload: Bytes) -> Self {
        Self {
            kind,
            payload,
            global_seqno: None,
            local_seqno: None,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Global seqno with the boundary sentinel for unordered actions.
    pub fn global_or_ill(&self) -> Seqno {
        seqno_or_ill(self.global_seqno)
    }

    /// Local seqno with the boundary sentinel for unordered actions.
    pub fn local_or_ill(&self) -> Seqno {
        seqno_or_ill(self.local_seqno)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seqno::SEQNO_ILL;

    #[test]
    fn kind_wire_tags_round_trip() {
        for kind in [
            ActionKind::Data,
            ActionKind::CommitCut,
            ActionKind::StateReq,
            ActionKind::Conf,
            ActionKind::Join,
            ActionKind::Sync,
            ActionKind::Flow,
            ActionKind::Service,
            ActionKind::Error,
            ActionKind::Unknown,
        ] {
            assert_eq!(ActionKind::from_wire(kind.to_wire()), kind);
        }
        assert_eq!(ActionKind::from_wire(200), ActionKind::Unknown);
    }

    #[test]
    fn application_kinds() {
        assert!(ActionKind::Data.is_application_kind());
        assert!(ActionKind::StateReq.is_application_kind());
        assert!(!ActionKind::Conf.is_application_kind());
        assert!(!ActionKind::Flow.is_application_kind());
    }

    #[test]
    fn unordered_maps_to_ill() {
        let act = Action::unordered(ActionKind::Error, Bytes::new());
        assert_eq!(act.global_or_ill(), SEQNO_ILL);
        assert_eq!(act.local_or_ill(), SEQNO_ILL);
    }
}
