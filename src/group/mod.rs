//! Group membership and configuration state.

pub mod exchange;
pub mod flow;
pub mod members;

/// Connection lifecycle state.
///
/// ```text
/// CLOSED ──open──▸ OPEN_NON_PRIMARY ──primary view──▸ OPEN_PRIMARY
/// OPEN_PRIMARY ──CONF(st_required)──▸ JOINER ──JOIN──▸ JOINED ──SYNC──▸ SYNCED
/// OPEN_PRIMARY ──donor selected──▸ DONOR ──join delivered──▸ SYNCED
/// any open state ──non-primary view──▸ OPEN_NON_PRIMARY
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Not connected to any channel.
    Closed,
    /// Connected, waiting for a primary view.
    OpenNonPrimary,
    /// Member of a primary configuration with full history.
    OpenPrimary,
    /// History gap detected; must request state transfer.
    Joiner,
    /// Serving a state transfer to a joiner.
    Donor,
    /// State transfer received, not yet caught up.
    Joined,
    /// Fully synchronized with the group.
    Synced,
}

impl ConnState {
    /// Whether the connection is attached to a channel.
    pub fn is_open(self) -> bool {
        self != Self::Closed
    }

    /// Whether the connection participates in a primary configuration.
    pub fn in_primary(self) -> bool {
        matches!(
            self,
            Self::OpenPrimary | Self::Joiner | Self::Donor | Self::Joined | Self::Synced
        )
    }

    /// Whether this node may serve as a state-transfer donor.
    pub fn can_donate(self) -> bool {
        matches!(self, Self::OpenPrimary | Self::Joined | Self::Synced)
    }
}
