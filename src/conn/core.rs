//! Per-connection protocol core.
//!
//! The core consumes the totally ordered event stream (messages and view
//! changes) and turns it into delivered actions, repl completions, member
//! bookkeeping, and flow signals. Every step is deterministic on the
//! stream, so all members of a primary configuration compute identical
//! global seqnos, donor selections, and commit cuts without any extra
//! agreement round.

use crate::act::conf::ConfAction;
use crate::act::defrag::{Defragmenter, DroppedPartial, Feed, SealedAction};
use crate::act::wire::{StateMsg, WireMsg};
use crate::act::{Action, ActionKind};
use crate::backend::{BackendEvent, BackendSender, MemberId, ViewEvent};
use crate::conn::queue::RecvQueue;
use crate::conn::repl::{ReplCoordinator, ReplFailure, ReplOutcome};
use crate::core::error::{GcsError, GcsResult};
use crate::core::seqno::{Seqno, SEQNO_ILL, SEQNO_NIL};
use crate::group::exchange::StateExchange;
use crate::group::flow::FlowController;
use crate::group::members::MemberTable;
use crate::group::ConnState;
use crate::ops::stats::ConnStats;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// An event whose processing is deferred while a state exchange runs.
enum HeldEvent {
    Sealed(SealedAction),
    Skipped { sender: MemberId, kind: ActionKind },
    Flow { sender: MemberId, stop: bool },
    Join { sender: MemberId, status: Seqno },
    Sync { sender: MemberId },
    LastApplied { sender: MemberId, seqno: Seqno },
}

/// The state-transfer pairing currently in flight in the group.
struct Handshake {
    joiner: MemberId,
    donor: MemberId,
}

pub(crate) struct GcsCore {
    my_id: MemberId,
    state: ConnState,
    conf_id: i64,
    group_uuid: Uuid,
    init_hint: (Seqno, Uuid),
    /// Whether this node holds the full group history.
    has_history: bool,
    global_seqno: Seqno,
    local_seqno: Seqno,
    last_commit_cut: Seqno,
    members: MemberTable,
    exchange: Option<StateExchange>,
    held: Vec<HeldEvent>,
    handshake: Option<Handshake>,
    state_req_active: bool,
    closing: bool,
    defrag: Defragmenter,
    queue: Arc<RecvQueue>,
    repl: Arc<ReplCoordinator>,
    flow: Arc<FlowController>,
    sender: Arc<dyn BackendSender>,
    stats: Arc<ConnStats>,
}

impl GcsCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        my_id: MemberId,
        init_hint: (Seqno, Uuid),
        queue: Arc<RecvQueue>,
        repl: Arc<ReplCoordinator>,
        flow: Arc<FlowController>,
        sender: Arc<dyn BackendSender>,
        stats: Arc<ConnStats>,
    ) -> Self {
        Self {
            my_id,
            state: ConnState::OpenNonPrimary,
            conf_id: -1,
            group_uuid: Uuid::nil(),
            init_hint,
            has_history: false,
            global_seqno: SEQNO_NIL,
            local_seqno: SEQNO_NIL,
            last_commit_cut: SEQNO_NIL,
            members: MemberTable::new(),
            exchange: None,
            held: Vec::new(),
            handshake: None,
            state_req_active: false,
            closing: false,
            defrag: Defragmenter::new(),
            queue,
            repl,
            flow,
            sender,
            stats,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn conf_id(&self) -> i64 {
        self.conf_id
    }

    pub fn group_uuid(&self) -> Uuid {
        self.group_uuid
    }

    /// Mark a state-transfer request as in flight; at most one per
    /// connection until its handshake completes.
    pub fn begin_state_request(&mut self) -> GcsResult<()> {
        if !self.state.in_primary() {
            return Err(GcsError::NotConnected);
        }
        if self.state_req_active {
            return Err(GcsError::Busy("state transfer request already in flight"));
        }
        self.state_req_active = true;
        Ok(())
    }

    /// Clear the in-flight latch after a failed transmission.
    pub fn abort_state_request(&mut self) {
        self.state_req_active = false;
    }

    /// Whether this node currently serves as a donor.
    pub fn is_donor(&self) -> bool {
        self.state == ConnState::Donor
    }

    /// Mark the connection as closing so transport teardown is not
    /// reported as a fatal error.
    pub fn begin_close(&mut self) {
        self.closing = true;
    }

    pub fn handle_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::Message { sender, payload } => self.handle_message(sender, payload),
            BackendEvent::View(view) => self.handle_view(view),
            BackendEvent::Closed => self.handle_transport_closed(),
        }
    }

    fn handle_message(&mut self, sender: MemberId, payload: Bytes) {
        let msg = match WireMsg::decode(payload) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(sender = %sender, error = %err, "undecodable message");
                self.push(Action::unordered(ActionKind::Error, Bytes::new()));
                return;
            }
        };
        match msg {
            WireMsg::Frag(frame) => {
                let serial = frame.act_serial;
                match self.defrag.feed(&sender, frame) {
                    Ok(Feed::Incomplete) => {}
                    Ok(Feed::Sealed(sealed)) => self.enqueue_or_process(HeldEvent::Sealed(sealed)),
                    Ok(Feed::Skipped { sender, kind }) => {
                        self.enqueue_or_process(HeldEvent::Skipped { sender, kind })
                    }
                    Err(err) => {
                        tracing::warn!(sender = %sender, serial, error = %err, "reassembly failed");
                        self.push(Action::unordered(ActionKind::Error, serial_payload(serial)));
                    }
                }
            }
            WireMsg::State(state) => self.handle_state_msg(&sender, state),
            WireMsg::Flow(stop) => self.enqueue_or_process(HeldEvent::Flow { sender, stop }),
            WireMsg::Join(status) => self.enqueue_or_process(HeldEvent::Join { sender, status }),
            WireMsg::Sync => self.enqueue_or_process(HeldEvent::Sync { sender }),
            WireMsg::LastApplied(seqno) => {
                self.enqueue_or_process(HeldEvent::LastApplied { sender, seqno })
            }
        }
    }

    fn enqueue_or_process(&mut self, event: HeldEvent) {
        if self.exchange.is_some() {
            self.held.push(event);
        } else {
            self.process(event);
        }
    }

    fn process(&mut self, event: HeldEvent) {
        match event {
            HeldEvent::Sealed(sealed) => self.deliver_sealed(sealed),
            HeldEvent::Skipped { sender, kind } => {
                if !self.state.in_primary() {
                    return;
                }
                match kind {
                    // The skipped action still occupies its seqno.
                    ActionKind::Data => self.global_seqno += 1,
                    ActionKind::StateReq => self.state_req_delivered(sender, None),
                    _ => {}
                }
            }
            HeldEvent::Flow { sender, stop } => {
                self.flow.on_flow(&sender, stop);
                self.push(Action::unordered(
                    ActionKind::Flow,
                    Bytes::copy_from_slice(&[stop as u8]),
                ));
            }
            HeldEvent::Join { sender, status } => self.process_join(sender, status),
            HeldEvent::Sync { sender } => self.process_sync(sender),
            HeldEvent::LastApplied { sender, seqno } => {
                self.process_last_applied(&sender, seqno)
            }
        }
    }

    fn deliver_sealed(&mut self, sealed: SealedAction) {
        if !self.state.in_primary() {
            // Actions are deliverable only in a primary configuration.
            if sealed.sender == self.my_id {
                self.repl.fail(sealed.act_serial, ReplFailure::ViewLost);
            }
            return;
        }
        match sealed.kind {
            ActionKind::Data => {
                self.global_seqno += 1;
                self.local_seqno += 1;
                let (global, local) = (self.global_seqno, self.local_seqno);
                if sealed.sender == self.my_id {
                    self.repl
                        .complete(sealed.act_serial, ReplOutcome::Data { global, local });
                }
                self.stats.record_action_received(sealed.payload.len());
                self.push(Action::ordered(
                    ActionKind::Data,
                    sealed.payload,
                    global,
                    local,
                ));
            }
            ActionKind::StateReq => {
                self.state_req_delivered(
                    sealed.sender,
                    Some((sealed.act_serial, sealed.payload)),
                );
            }
            other => {
                tracing::debug!(kind = ?other, sender = %sealed.sender, "unexpected action kind");
                self.push(Action::unordered(ActionKind::Unknown, sealed.payload));
            }
        }
    }

    /// An ordered state-transfer request. `detail` carries the serial and
    /// request payload unless the request body was skipped.
    fn state_req_delivered(&mut self, requester: MemberId, detail: Option<(u64, Bytes)>) {
        let Some(req_idx) = self.members.idx_of(&requester) else {
            return;
        };
        self.members.set_status(req_idx, ConnState::Joiner);

        let donor = self.members.select_donor(req_idx);
        if let Some(donor_idx) = donor {
            if let Some(donor_id) = self.members.get(donor_idx).map(|m| m.id.clone()) {
                self.members.set_status(donor_idx, ConnState::Donor);
                tracing::info!(joiner = %requester, donor = %donor_id, "state transfer handshake");
                if donor_id == self.my_id {
                    self.state = ConnState::Donor;
                    let payload = detail
                        .as_ref()
                        .map(|(_, payload)| payload.clone())
                        .unwrap_or_default();
                    self.push(Action::unordered(ActionKind::StateReq, payload));
                }
                self.handshake = Some(Handshake {
                    joiner: requester.clone(),
                    donor: donor_id,
                });
            }
        }

        if requester == self.my_id {
            // The ordered request consumes the local slot the caller must
            // skip, whether or not a donor was found.
            self.local_seqno += 1;
            let local = self.local_seqno;
            if donor.is_none() {
                self.state_req_active = false;
            }
            if let Some((serial, _)) = detail {
                self.repl.complete(
                    serial,
                    ReplOutcome::StateReq {
                        donor: donor.map(|idx| idx as i64),
                        local,
                    },
                );
            }
        }
    }

    fn process_join(&mut self, sender: MemberId, status: Seqno) {
        let Some(handshake) = self.handshake.take() else {
            tracing::debug!(sender = %sender, "join with no handshake in flight");
            return;
        };
        if handshake.donor != sender {
            self.handshake = Some(handshake);
            return;
        }

        let success = status >= SEQNO_NIL;
        if let Some(idx) = self.members.idx_of(&sender) {
            self.members.set_status(idx, ConnState::Synced);
        }
        if let Some(idx) = self.members.idx_of(&handshake.joiner) {
            self.members.set_status(
                idx,
                if success {
                    ConnState::Joined
                } else {
                    ConnState::Joiner
                },
            );
        }

        if sender == self.my_id {
            // Donor returns to normal service.
            self.state = ConnState::Synced;
        }
        if handshake.joiner == self.my_id {
            self.state_req_active = false;
            if success {
                self.state = ConnState::Joined;
                self.has_history = true;
                if status > self.global_seqno {
                    self.global_seqno = status;
                }
                let _ = self.sender.send(WireMsg::Sync.encode());
            } else {
                self.state = ConnState::Joiner;
            }
        }

        self.push(Action::unordered(ActionKind::Join, seqno_payload(status)));
    }

    fn process_sync(&mut self, sender: MemberId) {
        if let Some(idx) = self.members.idx_of(&sender) {
            self.members.set_status(idx, ConnState::Synced);
        }
        if sender == self.my_id {
            self.state = ConnState::Synced;
            self.push(Action::unordered(ActionKind::Sync, Bytes::new()));
        }
    }

    fn process_last_applied(&mut self, sender: &str, seqno: Seqno) {
        let Some(idx) = self.members.idx_of(sender) else {
            return;
        };
        self.members.record_last_applied(idx, seqno);
        let cut = self.members.commit_cut();
        if cut > self.last_commit_cut {
            self.last_commit_cut = cut;
            self.push(Action::unordered(ActionKind::CommitCut, seqno_payload(cut)));
        }
    }

    fn handle_state_msg(&mut self, sender: &str, msg: StateMsg) {
        let Some(exchange) = self.exchange.as_mut() else {
            return;
        };
        if exchange.collect(sender, msg) {
            if let Some(exchange) = self.exchange.take() {
                self.finish_exchange(exchange);
            }
        }
    }

    fn handle_view(&mut self, view: ViewEvent) {
        tracing::info!(
            conf_id = view.conf_id,
            primary = view.primary,
            members = view.members.len(),
            "view change"
        );

        // A view change aborts any handshake and exchange in progress.
        self.handshake = None;
        self.state_req_active = false;
        self.held.clear();

        if view.primary {
            let retained: HashSet<MemberId> = view.members.iter().cloned().collect();
            let dropped = self.defrag.drop_departed(&retained);
            self.surface_dropped(dropped);
            self.flow.on_view(&retained);

            let announce = if self.has_history {
                StateMsg {
                    conf_id: view.conf_id,
                    seqno: self.global_seqno,
                    uuid: self.group_uuid,
                }
            } else {
                StateMsg {
                    conf_id: view.conf_id,
                    seqno: self.init_hint.0,
                    uuid: self.init_hint.1,
                }
            };
            self.exchange = Some(StateExchange::new(view));
            let _ = self.sender.send(WireMsg::State(announce).encode());
        } else {
            self.exchange = None;
            self.state = ConnState::OpenNonPrimary;
            self.conf_id = -1;

            let dropped = self.defrag.drop_all();
            self.surface_dropped(dropped);
            self.repl.fail_all(ReplFailure::ViewLost);
            let retained: HashSet<MemberId> = view.members.iter().cloned().collect();
            self.flow.on_view(&retained);
            self.members.install(
                view.members
                    .iter()
                    .map(|id| (id.clone(), false, SEQNO_NIL))
                    .collect(),
            );

            let conf = ConfAction {
                seqno: SEQNO_ILL,
                conf_id: -1,
                group_uuid: self.group_uuid,
                st_required: false,
                memb_num: view.members.len() as i64,
                my_idx: view.my_idx,
                members: view.members,
            };
            self.push(Action::unordered(ActionKind::Conf, conf.encode()));
        }
    }

    fn finish_exchange(&mut self, exchange: StateExchange) {
        let view = exchange.view().clone();
        let outcome = exchange.outcome();

        self.conf_id = view.conf_id;
        self.group_uuid = outcome.group_uuid;
        self.global_seqno = outcome.group_seqno;

        let st_required = outcome
            .members
            .iter()
            .find(|(id, _, _)| *id == self.my_id)
            .map(|(_, st, _)| *st)
            .unwrap_or(false);
        self.members.install(outcome.members);

        self.state = if st_required {
            ConnState::Joiner
        } else if matches!(
            self.state,
            ConnState::Synced | ConnState::Joined | ConnState::Donor
        ) {
            ConnState::Synced
        } else {
            ConnState::OpenPrimary
        };
        self.has_history = self.has_history || !st_required;

        tracing::info!(
            conf_id = self.conf_id,
            seqno = self.global_seqno,
            group_uuid = %self.group_uuid,
            st_required,
            "primary configuration installed"
        );

        let conf = ConfAction {
            seqno: self.global_seqno,
            conf_id: self.conf_id,
            group_uuid: self.group_uuid,
            st_required,
            memb_num: view.members.len() as i64,
            my_idx: view.my_idx,
            members: view.members,
        };
        self.push(Action::unordered(ActionKind::Conf, conf.encode()));

        let held = std::mem::take(&mut self.held);
        for event in held {
            self.process(event);
        }
    }

    fn surface_dropped(&mut self, dropped: Vec<DroppedPartial>) {
        for partial in dropped {
            tracing::debug!(
                sender = %partial.sender,
                serial = partial.act_serial,
                "dropping partial action from departed member"
            );
            self.push(Action::unordered(
                ActionKind::Error,
                serial_payload(partial.act_serial),
            ));
        }
    }

    fn handle_transport_closed(&mut self) {
        if !self.closing {
            tracing::error!("transport failed");
            let _ = self
                .queue
                .push(Action::unordered(ActionKind::Error, Bytes::new()));
        }
        self.queue.close();
        self.repl.fail_all(ReplFailure::Closed);
        self.state = ConnState::Closed;
    }

    fn push(&mut self, action: Action) {
        if self.queue.push(action).is_err() {
            return;
        }
        if self.flow.on_queue_growth(self.queue.len()) {
            let _ = self.sender.send(WireMsg::Flow(true).encode());
        }
    }
}

fn serial_payload(serial: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u64(serial);
    buf.freeze()
}

fn seqno_payload(seqno: Seqno) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i64(seqno);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::act::frag::fragment;
    use parking_lot::Mutex;

    /// Sender that records frames instead of transmitting them.
    #[derive(Default)]
    struct MockSender {
        sent: Mutex<Vec<Bytes>>,
    }

    impl BackendSender for MockSender {
        fn send(&self, msg: Bytes) -> GcsResult<usize> {
            let size = msg.len();
            self.sent.lock().push(msg);
            Ok(size)
        }

        fn close(&self) {}
    }

    struct Rig {
        core: GcsCore,
        queue: Arc<RecvQueue>,
        repl: Arc<ReplCoordinator>,
        sender: Arc<MockSender>,
    }

    fn rig(my_id: &str, hint: (Seqno, Uuid)) -> Rig {
        let queue = Arc::new(RecvQueue::new(64));
        let repl = Arc::new(ReplCoordinator::new());
        let flow = Arc::new(FlowController::new(32, 16));
        let sender = Arc::new(MockSender::default());
        let core = GcsCore::new(
            my_id.to_string(),
            hint,
            Arc::clone(&queue),
            Arc::clone(&repl),
            flow,
            sender.clone() as Arc<dyn BackendSender>,
            Arc::new(ConnStats::default()),
        );
        Rig {
            core,
            queue,
            repl,
            sender,
        }
    }

    fn view(conf_id: i64, members: &[&str], my_idx: i64) -> ViewEvent {
        ViewEvent {
            conf_id,
            primary: conf_id >= 0,
            members: members.iter().map(|m| m.to_string()).collect(),
            my_idx,
            view_uuid: Uuid::from_bytes([8; 16]),
        }
    }

    /// Deliver the state announcements each rig just broadcast to all rigs.
    fn run_exchange(rigs: &mut [&mut Rig], ids: &[&str]) {
        let announced: Vec<(String, Bytes)> = rigs
            .iter()
            .zip(ids)
            .map(|(rig, id)| {
                let frame = rig.sender.sent.lock().pop().expect("state announcement");
                (id.to_string(), frame)
            })
            .collect();
        for rig in rigs.iter_mut() {
            for (id, frame) in &announced {
                rig.core.handle_message(id.clone(), frame.clone());
            }
        }
    }

    #[test]
    fn single_member_bootstrap_emits_conf() {
        let mut rig = rig("a", (SEQNO_NIL, Uuid::nil()));
        rig.core.handle_view(view(1, &["a"], 0));
        run_exchange(&mut [&mut rig], &["a"]);

        let action = rig.queue.pop().unwrap();
        assert_eq!(action.kind, ActionKind::Conf);
        let conf = ConfAction::decode(&action.payload).unwrap();
        assert!(conf.is_primary());
        assert!(!conf.st_required);
        assert_eq!(conf.seqno, SEQNO_NIL);
        assert_eq!(conf.memb_num, 1);
        assert_eq!(conf.my_idx, 0);
        assert_eq!(rig.core.state(), ConnState::OpenPrimary);
    }

    #[test]
    fn own_data_action_completes_pending_repl_and_surfaces() {
        let mut rig = rig("a", (SEQNO_NIL, Uuid::nil()));
        rig.core.handle_view(view(1, &["a"], 0));
        run_exchange(&mut [&mut rig], &["a"]);
        let _conf = rig.queue.pop().unwrap();

        rig.repl.register(1);
        let payload = Bytes::from_static(b"AB");
        for frame in fragment(ActionKind::Data, 1, &payload, 8) {
            rig.core.handle_message("a".to_string(), frame.encode());
        }

        let action = rig.queue.pop().unwrap();
        assert_eq!(action.kind, ActionKind::Data);
        assert_eq!(action.payload, payload);
        assert_eq!(action.global_seqno, Some(1));
        assert_eq!(action.local_seqno, Some(1));
        match rig.repl.wait(1).unwrap() {
            ReplOutcome::Data { global, local } => {
                assert_eq!(global, 1);
                assert_eq!(local, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn non_primary_view_fails_pending_and_emits_conf() {
        let mut rig = rig("a", (SEQNO_NIL, Uuid::nil()));
        rig.core.handle_view(view(1, &["a", "b"], 0));
        run_exchange(&mut [&mut rig], &["a"]);
        // The exchange is still waiting for b, so no CONF yet; b's state
        // announcement arrives and completes it.
        let b_announce = WireMsg::State(StateMsg {
            conf_id: 1,
            seqno: SEQNO_NIL,
            uuid: Uuid::nil(),
        });
        rig.core.handle_message("b".to_string(), b_announce.encode());
        let conf = rig.queue.pop().unwrap();
        assert_eq!(conf.kind, ActionKind::Conf);

        // A repl is pending; send one fragment of two, then lose quorum.
        rig.repl.register(1);
        let payload = Bytes::from(vec![0u8; 12]);
        let frames = fragment(ActionKind::Data, 1, &payload, 8);
        rig.core.handle_message("a".to_string(), frames[0].encode());
        rig.core.handle_view(view(-1, &["a"], 0));

        assert!(matches!(rig.repl.wait(1), Err(GcsError::ViewLost)));
        // The dropped partial surfaces as ERROR, then the non-primary CONF.
        let kinds = [
            rig.queue.pop().unwrap().kind,
            rig.queue.pop().unwrap().kind,
        ];
        assert!(kinds.contains(&ActionKind::Error));
        assert!(kinds.contains(&ActionKind::Conf));
        assert_eq!(rig.core.state(), ConnState::OpenNonPrimary);
        assert_eq!(rig.core.conf_id(), -1);
    }

    #[test]
    fn joiner_detects_history_gap() {
        let history = Uuid::from_bytes([1; 16]);
        let mut donor = rig("d", (10, history));
        let mut joiner = rig("j", (5, history));

        donor.core.handle_view(view(1, &["d", "j"], 0));
        joiner.core.handle_view(view(1, &["d", "j"], 1));
        run_exchange(&mut [&mut donor, &mut joiner], &["d", "j"]);

        let donor_conf = ConfAction::decode(&donor.queue.pop().unwrap().payload).unwrap();
        let joiner_conf = ConfAction::decode(&joiner.queue.pop().unwrap().payload).unwrap();
        assert!(!donor_conf.st_required);
        assert!(joiner_conf.st_required);
        assert_eq!(joiner_conf.seqno, 10);
        assert_eq!(donor.core.state(), ConnState::OpenPrimary);
        assert_eq!(joiner.core.state(), ConnState::Joiner);
    }

    #[test]
    fn state_request_selects_donor_and_skips_local_seqno() {
        let history = Uuid::from_bytes([1; 16]);
        let mut donor = rig("d", (10, history));
        let mut joiner = rig("j", (5, history));
        donor.core.handle_view(view(1, &["d", "j"], 0));
        joiner.core.handle_view(view(1, &["d", "j"], 1));
        run_exchange(&mut [&mut donor, &mut joiner], &["d", "j"]);
        donor.queue.pop().unwrap();
        joiner.queue.pop().unwrap();

        joiner.core.begin_state_request().unwrap();
        joiner.repl.register(1);
        let req = Bytes::from_static(b"state please");
        for frame in fragment(ActionKind::StateReq, 1, &req, 64) {
            donor.core.handle_message("j".to_string(), frame.encode());
            joiner.core.handle_message("j".to_string(), frame.encode());
        }

        // Donor surfaces the request and becomes the donor.
        let action = donor.queue.pop().unwrap();
        assert_eq!(action.kind, ActionKind::StateReq);
        assert_eq!(action.payload, req);
        assert!(donor.core.is_donor());

        // Joiner's pending request resolves with the donor index and the
        // local seqno to skip; nothing surfaces on the joiner.
        match joiner.repl.wait(1).unwrap() {
            ReplOutcome::StateReq { donor, local } => {
                assert_eq!(donor, Some(0));
                assert_eq!(local, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(joiner.queue.is_empty());

        // A second request while the handshake runs is busy.
        assert!(matches!(
            joiner.core.begin_state_request(),
            Err(GcsError::Busy(_))
        ));

        // Donor announces completion; both sides observe JOIN, the joiner
        // broadcasts SYNC and surfaces it alone.
        let join = WireMsg::Join(10).encode();
        donor.core.handle_message("d".to_string(), join.clone());
        joiner.core.handle_message("d".to_string(), join);
        assert_eq!(donor.queue.pop().unwrap().kind, ActionKind::Join);
        assert_eq!(joiner.queue.pop().unwrap().kind, ActionKind::Join);
        assert_eq!(donor.core.state(), ConnState::Synced);
        assert_eq!(joiner.core.state(), ConnState::Joined);

        let sync = joiner.sender.sent.lock().pop().expect("sync broadcast");
        donor.core.handle_message("j".to_string(), sync.clone());
        joiner.core.handle_message("j".to_string(), sync);
        assert_eq!(joiner.queue.pop().unwrap().kind, ActionKind::Sync);
        assert_eq!(joiner.core.state(), ConnState::Synced);
        assert!(donor.queue.is_empty());
    }

    #[test]
    fn no_donor_resolves_with_again() {
        let history = Uuid::from_bytes([1; 16]);
        let mut rig = rig("a", (5, history));
        rig.core.handle_view(view(1, &["d", "a", "b"], 1));
        let announce = rig.sender.sent.lock().pop().unwrap();
        rig.core.handle_message(
            "d".to_string(),
            WireMsg::State(StateMsg {
                conf_id: 1,
                seqno: 10,
                uuid: history,
            })
            .encode(),
        );
        rig.core.handle_message("a".to_string(), announce);
        rig.core.handle_message(
            "b".to_string(),
            WireMsg::State(StateMsg {
                conf_id: 1,
                seqno: 5,
                uuid: history,
            })
            .encode(),
        );
        let conf = ConfAction::decode(&rig.queue.pop().unwrap().payload).unwrap();
        assert!(conf.st_required);

        // b's request claims the only donor; a's own request then finds
        // nobody eligible.
        for frame in fragment(ActionKind::StateReq, 1, &Bytes::new(), 64) {
            rig.core.handle_message("b".to_string(), frame.encode());
        }
        rig.core.begin_state_request().unwrap();
        rig.repl.register(1);
        for frame in fragment(ActionKind::StateReq, 1, &Bytes::new(), 64) {
            rig.core.handle_message("a".to_string(), frame.encode());
        }
        match rig.repl.wait(1).unwrap() {
            ReplOutcome::StateReq { donor, local } => {
                assert_eq!(donor, None);
                assert_eq!(local, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // The failed handshake clears the busy latch.
        rig.core.begin_state_request().unwrap();
    }

    #[test]
    fn commit_cut_is_group_minimum() {
        let mut rig = rig("a", (SEQNO_NIL, Uuid::nil()));
        rig.core.handle_view(view(1, &["a", "b"], 0));
        run_exchange(&mut [&mut rig], &["a"]);
        rig.core.handle_message(
            "b".to_string(),
            WireMsg::State(StateMsg {
                conf_id: 1,
                seqno: SEQNO_NIL,
                uuid: Uuid::nil(),
            })
            .encode(),
        );
        rig.queue.pop().unwrap();

        rig.core
            .handle_message("a".to_string(), WireMsg::LastApplied(4).encode());
        assert!(rig.queue.is_empty());
        rig.core
            .handle_message("b".to_string(), WireMsg::LastApplied(3).encode());
        let cut = rig.queue.pop().unwrap();
        assert_eq!(cut.kind, ActionKind::CommitCut);
        assert_eq!(&cut.payload[..], &3i64.to_be_bytes()[..]);
    }

    #[test]
    fn transport_failure_surfaces_final_error() {
        let mut rig = rig("a", (SEQNO_NIL, Uuid::nil()));
        rig.core.handle_view(view(1, &["a"], 0));
        run_exchange(&mut [&mut rig], &["a"]);
        rig.queue.pop().unwrap();

        rig.core.handle_event(BackendEvent::Closed);
        let action = rig.queue.pop().unwrap();
        assert_eq!(action.kind, ActionKind::Error);
        assert!(matches!(rig.queue.pop(), Err(GcsError::NotConnected)));
        assert_eq!(rig.core.state(), ConnState::Closed);
    }
}
