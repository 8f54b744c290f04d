//! State exchange.
//!
//! After a primary view change every member broadcasts a STATE message
//! carrying its `(conf_id, seqno, uuid)`. Once announcements from all view
//! members are in, each member deterministically computes the group seqno
//! (the highest announced), the group identity (that of the most advanced
//! member with history, or the view identity for a fresh group), and which
//! members need state transfer.

use crate::act::wire::StateMsg;
use crate::backend::{MemberId, ViewEvent};
use crate::core::seqno::Seqno;
use std::collections::HashMap;
use uuid::Uuid;

/// Result of a completed state exchange.
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// Group seqno at the moment of the configuration.
    pub group_seqno: Seqno,
    /// Group identity.
    pub group_uuid: Uuid,
    /// `(id, st_required, announced_seqno)` in configuration order.
    pub members: Vec<(MemberId, bool, Seqno)>,
}

/// Collector for one state-exchange round.
#[derive(Debug)]
pub struct StateExchange {
    view: ViewEvent,
    announced: HashMap<MemberId, StateMsg>,
}

impl StateExchange {
    pub fn new(view: ViewEvent) -> Self {
        Self {
            view,
            announced: HashMap::new(),
        }
    }

    pub fn view(&self) -> &ViewEvent {
        &self.view
    }

    /// Record one announcement. Announcements for other configurations and
    /// from non-members are ignored. Returns true once all members have
    /// announced.
    pub fn collect(&mut self, sender: &str, msg: StateMsg) -> bool {
        if msg.conf_id == self.view.conf_id && self.view.members.iter().any(|m| m == sender) {
            self.announced.insert(sender.to_string(), msg);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.announced.len() == self.view.members.len()
    }

    /// Compute the configuration outcome. Call only when complete.
    pub fn outcome(&self) -> ExchangeOutcome {
        debug_assert!(self.is_complete());

        // The most advanced member with history defines the group.
        let best = self
            .view
            .members
            .iter()
            .filter_map(|id| self.announced.get(id))
            .filter(|msg| !msg.uuid.is_nil())
            .max_by_key(|msg| msg.seqno);

        let (group_seqno, group_uuid, fresh) = match best {
            Some(msg) => (msg.seqno, msg.uuid, false),
            // Nobody has history: a fresh group under the view identity.
            None => (
                self.view
                    .members
                    .iter()
                    .filter_map(|id| self.announced.get(id))
                    .map(|msg| msg.seqno)
                    .max()
                    .unwrap_or(0),
                self.view.view_uuid,
                true,
            ),
        };

        let members = self
            .view
            .members
            .iter()
            .map(|id| {
                let msg = &self.announced[id];
                // Nothing to transfer while the group history is empty.
                let st_required = !fresh
                    && group_seqno > 0
                    && (msg.uuid != group_uuid || msg.seqno < group_seqno);
                (id.clone(), st_required, msg.seqno)
            })
            .collect();

        ExchangeOutcome {
            group_seqno,
            group_uuid,
            members,
        }
    }
}
