//! Member table.
//!
//! Each connection tracks the status and applied-seqno hint of every
//! member of the current configuration. The table is updated only from
//! delivered, ordered events, so every member computes the same table and
//! donor selection needs no extra agreement round.

use crate::backend::MemberId;
use crate::core::seqno::{Seqno, SEQNO_NIL};
use crate::group::ConnState;

/// What a connection knows about one member of its configuration.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Stable member identity.
    pub id: MemberId,
    /// Last status learned from the ordered stream.
    pub status: ConnState,
    /// Highest applied seqno the member announced.
    pub last_applied: Seqno,
}

/// Per-configuration member bookkeeping.
#[derive(Debug, Default)]
pub struct MemberTable {
    members: Vec<MemberInfo>,
}

impl MemberTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the table for a new configuration.
    ///
    /// `entries` are `(id, st_required, announced_seqno)` in configuration
    /// order. Members with full history start `Synced`; the rest are
    /// joiners until their transfer completes.
    pub fn install(&mut self, entries: Vec<(MemberId, bool, Seqno)>) {
        self.members = entries
            .into_iter()
            .map(|(id, st_required, announced)| MemberInfo {
                id,
                status: if st_required {
                    ConnState::Joiner
                } else {
                    ConnState::Synced
                },
                last_applied: announced.max(SEQNO_NIL),
            })
            .collect();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Configuration index of `id`.
    pub fn idx_of(&self, id: &str) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    pub fn get(&self, idx: usize) -> Option<&MemberInfo> {
        self.members.get(idx)
    }

    pub fn set_status(&mut self, idx: usize, status: ConnState) {
        if let Some(member) = self.members.get_mut(idx) {
            member.status = status;
        }
    }

    /// Pick a donor for the requester: the lowest-indexed member whose
    /// status permits donating, excluding the requester itself.
    pub fn select_donor(&self, requester: usize) -> Option<usize> {
        self.members
            .iter()
            .enumerate()
            .find(|(idx, m)| *idx != requester && m.status.can_donate())
            .map(|(idx, _)| idx)
    }

    /// Record a member's applied hint; hints only move forward.
    pub fn record_last_applied(&mut self, idx: usize, seqno: Seqno) {
        if let Some(member) = self.members.get_mut(idx) {
            if seqno > member.last_applied {
                member.last_applied = seqno;
            }
        }
    }

    /// Group-wide commit cut: the minimum applied seqno across members.
    pub fn commit_cut(&self) -> Seqno {
        self.members
            .iter()
            .map(|m| m.last_applied)
            .min()
            .unwrap_or(SEQNO_NIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MemberTable {
        let mut table = MemberTable::new();
        table.install(vec![
            ("a".to_string(), false, 10),
            ("b".to_string(), true, 5),
            ("c".to_string(), false, 10),
        ]);
        table
    }

    #[test]
    fn install_statuses() {
        let table = table();
        assert_eq!(table.get(0).unwrap().status, ConnState::Synced);
        assert_eq!(table.get(1).unwrap().status, ConnState::Joiner);
        assert_eq!(table.idx_of("c"), Some(2));
    }

    #[test]
    fn donor_is_lowest_eligible_excluding_requester() {
        let table = table();
        assert_eq!(table.select_donor(1), Some(0));
        // Requester is the lowest eligible; fall through to the next.
        assert_eq!(table.select_donor(0), Some(2));
    }

    #[test]
    fn no_donor_when_everyone_is_joining() {
        let mut table = MemberTable::new();
        table.install(vec![
            ("a".to_string(), true, 0),
            ("b".to_string(), true, 0),
        ]);
        assert_eq!(table.select_donor(0), None);
    }

    #[test]
    fn commit_cut_is_group_minimum() {
        let mut table = table();
        assert_eq!(table.commit_cut(), 5);
        table.record_last_applied(1, 9);
        assert_eq!(table.commit_cut(), 9);
        // Hints never move backwards.
        table.record_last_applied(1, 2);
        assert_eq!(table.commit_cut(), 9);
    }
}
