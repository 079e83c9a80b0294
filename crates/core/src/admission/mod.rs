//! The admission engine: per (session, AC) state machines driven by client
//! requests and transport events, over one shared flow registry.
//!
//! Every client entry point either completes synchronously, issues exactly one
//! protocol request, or parks the request in the session's command buffer.
//! Terminal responses settle the AC they belong to and then drain the buffer
//! of that session one command at a time for as long as it stays idle.

use std::collections::HashMap;

use thiserror::Error;

use crate::{
    client_events::QosStatus,
    command_buffer::BufferedCommand,
    config::QosConfig,
    errors::{QosError, Unsupported},
    flow::{Flow, FlowIdAllocator, FlowReason, FlowRegistry},
    session::{
        AcState, AssociationSnapshot, ExchangeVia, HandoffMode, PendingExchange, PendingKind,
        SessionState,
    },
    transport::{QosTransport, TransportError, TransportEvent},
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, SessionId, Slot, UapsdMask},
};

use self::policy::PolicyInput;

mod handoff;
mod modify;
mod policy;
mod release;
mod response;
mod setup;

/// Broken bookkeeping found by [`AdmissionEngine::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("session {session} {ac} is requested without a pending exchange")]
    RequestedWithoutPending { session: SessionId, ac: AccessCategory },
    #[error("session {session} {ac} {slot}: slot status disagrees with flow count {count}")]
    SlotStatus {
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        count: usize,
    },
    #[error("session {session} {ac} {slot}: tspec kept on an empty slot")]
    StaleTspec {
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
    },
    #[error("session {session} {ac} {slot}: flow count {counted} but {registered} registered flows")]
    FlowCount {
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        counted: usize,
        registered: usize,
    },
    #[error("flow {flow} belongs to unknown session {session}")]
    OrphanFlow { flow: FlowId, session: SessionId },
    #[error("session {session} has {count} exchanges outstanding")]
    ConcurrentExchanges { session: SessionId, count: usize },
}

pub struct AdmissionEngine<T> {
    config: QosConfig,
    transport: T,
    sessions: HashMap<SessionId, SessionState>,
    flows: FlowRegistry,
    flow_ids: FlowIdAllocator,
}

impl<T> std::fmt::Debug for AdmissionEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionEngine")
            .field("sessions", &self.sessions.len())
            .field("flows", &self.flows.len())
            .finish()
    }
}

impl<T: QosTransport> AdmissionEngine<T> {
    pub fn new(config: QosConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            sessions: HashMap::new(),
            flows: FlowRegistry::new(),
            flow_ids: FlowIdAllocator::new(),
        }
    }

    pub fn config(&self) -> &QosConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn session(&self, id: SessionId) -> Option<&SessionState> {
        self.sessions.get(&id)
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    /// Flow behind a client handle.
    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.client_flow(id)
    }

    /// Opens a session; its ACs wait in `Init` for the association.
    /// Opening an open session changes nothing.
    pub fn open_session(&mut self, id: SessionId) {
        if self.sessions.contains_key(&id) {
            tracing::debug!(session = %id, "session already open");
            return;
        }
        tracing::info!(session = %id, "opening qos session");
        self.sessions.insert(id, SessionState::new(id));
    }

    /// Closes a session, reporting `QosLost` to every live flow.
    pub fn close_session(&mut self, id: SessionId) -> Result<(), QosError> {
        self.flush_session(id, AcState::Closed)?;
        self.sessions.remove(&id);
        tracing::info!(session = %id, "closed qos session");
        Ok(())
    }

    /// Applies one event reported by the transport.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::AddtsResponse {
                session,
                ac,
                accepted,
                negotiated,
            } => self.on_addts_response(session, ac, accepted, negotiated),
            TransportEvent::DeltsResponse { session, ac } => self.on_delts_response(session, ac),
            TransportEvent::DeltsIndication { session, ac } => self.on_delts_indication(session, ac),
            TransportEvent::ReassocComplete {
                session,
                succeeded,
                uapsd,
            } => self.on_reassoc_complete(session, succeeded, uapsd),
            TransportEvent::AssociationComplete { session, snapshot } => {
                self.on_association_complete(session, snapshot)
            }
            TransportEvent::JoinRequest { session } => self.on_join_request(session),
            TransportEvent::Disconnect { session } => self.on_disconnect(session),
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for flow in self.flows.iter() {
            if !self.sessions.contains_key(&flow.session) {
                return Err(InvariantViolation::OrphanFlow {
                    flow: flow.id,
                    session: flow.session,
                });
            }
        }
        for (&session, state) in &self.sessions {
            let pending = state.acs().filter(|ac| ac.pending().is_some()).count();
            if pending > 1 {
                return Err(InvariantViolation::ConcurrentExchanges {
                    session,
                    count: pending,
                });
            }
            for ac_state in state.acs() {
                let ac = ac_state.ac();
                if ac_state.state() == AcState::Requested && ac_state.pending().is_none() {
                    return Err(InvariantViolation::RequestedWithoutPending { session, ac });
                }
                for slot in Slot::BOTH {
                    let count = ac_state.flow_count(slot);
                    if ac_state.slot_status().contains(slot) != (count > 0) {
                        return Err(InvariantViolation::SlotStatus {
                            session,
                            ac,
                            slot,
                            count,
                        });
                    }
                    if count == 0 && ac_state.curr_tspec(slot).is_some() {
                        return Err(InvariantViolation::StaleTspec { session, ac, slot });
                    }
                    let registered = self.flows.count_on_slot(session, ac, slot);
                    if registered != count {
                        return Err(InvariantViolation::FlowCount {
                            session,
                            ac,
                            slot,
                            counted: count,
                            registered,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn session_ref(&self, id: SessionId) -> Result<&SessionState, QosError> {
        self.sessions.get(&id).ok_or(QosError::SessionNotFound(id))
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut SessionState, QosError> {
        self.sessions.get_mut(&id).ok_or(QosError::SessionNotFound(id))
    }

    /// Association a new request can be admitted against.
    fn usable_association(&self, session: &SessionState) -> Result<AssociationSnapshot, QosError> {
        if !self.config.wmm_enabled() {
            return Err(QosError::Unsupported(Unsupported::WmmDisabled));
        }
        let assoc = session
            .association()
            .ok_or(QosError::Unsupported(Unsupported::NotAssociated))?;
        if !assoc.wmm {
            return Err(QosError::Unsupported(Unsupported::NoWmm));
        }
        Ok(assoc.clone())
    }

    /// Admission control applies to `ac`, either because the AP mandates it or
    /// because the configuration asks for ADDTS on every AC.
    pub(crate) fn acm(&self, session: SessionId, ac: AccessCategory) -> bool {
        self.config.addts_when_acm_off
            || self
                .sessions
                .get(&session)
                .and_then(|s| s.association())
                .is_some_and(|assoc| assoc.acm(ac))
    }

    fn policy_input(&self, session: SessionId, ac: AccessCategory, tspec: &TspecInfo) -> PolicyInput {
        let state = self.sessions.get(&session);
        PolicyInput {
            acm: self.acm(session, ac),
            psb: tspec.psb(),
            apsd_active: state.is_some_and(|s| s.uapsd().contains(ac)),
            ap_supports_apsd: state.and_then(|s| s.association()).is_some_and(|a| a.apsd),
        }
    }

    fn allocate_flow_id(&mut self) -> FlowId {
        let Self {
            flows,
            sessions,
            flow_ids,
            ..
        } = self;
        flow_ids.allocate(|id| {
            flows.contains(id) || sessions.values().any(|s| s.buffered.holds_setup(id))
        })
    }

    /// Registers `flow` and counts it on its slot.
    fn insert_flow(&mut self, flow: Flow) {
        if let Some(session) = self.sessions.get_mut(&flow.session) {
            session.ac_mut(flow.ac).add_flow(flow.slot);
        }
        self.flows.insert(flow);
    }

    /// Unregisters a flow, clearing its slot when it was the last one there.
    fn drop_flow(&mut self, id: FlowId) -> Option<Flow> {
        let flow = self.flows.remove(id)?;
        if let Some(session) = self.sessions.get_mut(&flow.session) {
            session.ac_mut(flow.ac).remove_flow(flow.slot);
        }
        Some(flow)
    }

    fn move_flow(&mut self, id: FlowId, to: Slot) {
        let Some(flow) = self.flows.get_mut(id) else {
            return;
        };
        let from = std::mem::replace(&mut flow.slot, to);
        if from == to {
            return;
        }
        let (session, ac) = (flow.session, flow.ac);
        tracing::debug!(flow = %id, %session, %ac, %from, %to, "moving flow between slots");
        if let Some(state) = self.sessions.get_mut(&session) {
            let ac_state = state.ac_mut(ac);
            ac_state.add_flow(to);
            ac_state.remove_flow(from);
        }
    }

    fn set_flow_reason(&mut self, id: FlowId, reason: FlowReason) {
        if let Some(flow) = self.flows.get_mut(id) {
            flow.reason = reason;
        }
    }

    fn set_curr_tspec(&mut self, session: SessionId, ac: AccessCategory, slot: Slot, tspec: Option<TspecInfo>) {
        let Some(tspec) = tspec else {
            return;
        };
        if let Some(state) = self.sessions.get_mut(&session) {
            let ac_state = state.ac_mut(ac);
            if ac_state.slot_status().contains(slot) {
                ac_state.curr_tspec[slot.index()] = Some(tspec);
            }
        }
    }

    fn set_uapsd(&mut self, session: SessionId, uapsd: UapsdMask) {
        if let Some(state) = self.sessions.get_mut(&session) {
            if state.uapsd != uapsd {
                tracing::debug!(%session, from = %state.uapsd, to = %uapsd, "u-apsd mask changed");
                state.uapsd = uapsd;
            }
        }
    }

    /// Marks an exchange outstanding on `ac`.
    fn begin_exchange(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        requested: Option<TspecInfo>,
        pending: PendingExchange,
    ) {
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        tracing::debug!(%session, %ac, slot = %pending.slot, kind = ?pending.kind, via = ?pending.via, "exchange started");
        let ac_state = state.ac_mut(ac);
        ac_state.requested_tspec[pending.slot.index()] = requested;
        ac_state.begin_exchange(pending);
    }

    /// Marks a flow driven reassociation outstanding on `ac`. Every AC of the
    /// session waits in `Handoff` until it completes.
    fn begin_reassoc(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        requested: Option<TspecInfo>,
        kind: PendingKind,
    ) {
        self.begin_exchange(
            session,
            ac,
            requested,
            PendingExchange {
                slot,
                kind,
                via: ExchangeVia::Reassoc,
                exchange: None,
            },
        );
        if let Some(state) = self.sessions.get_mut(&session) {
            state.ac_mut(ac).reassoc_pending = true;
            for ac_state in state.acs_mut() {
                ac_state.enter_handoff();
            }
        }
    }

    /// Returns an AC that just finished an exchange to `QosOn` or `LinkUp`.
    fn settle(&mut self, session: SessionId, ac: AccessCategory) {
        if let Some(state) = self.sessions.get_mut(&session) {
            let ac_state = state.ac_mut(ac);
            if ac_state.pending().is_none()
                && matches!(
                    ac_state.state(),
                    AcState::Requested | AcState::QosOn | AcState::LinkUp
                )
            {
                ac_state.settle();
            }
        }
    }

    fn send_failed(&self, session: SessionId, ac: AccessCategory, err: TransportError) -> QosError {
        tracing::warn!(%session, %ac, %err, "failed to send qos request");
        QosError::Transport(err)
    }

    fn notify(&self, id: FlowId, status: QosStatus) {
        let Some(flow) = self.flows.get(id) else {
            return;
        };
        if !flow.is_client_visible() {
            return;
        }
        let tspec = self
            .sessions
            .get(&flow.session)
            .and_then(|s| s.ac(flow.ac).curr_tspec(flow.slot).copied());
        flow.notify(status, tspec);
    }

    /// Tells the admitted flows sharing `slot` that their aggregate changed.
    fn notify_siblings(&self, session: SessionId, ac: AccessCategory, slot: Slot, except: &[FlowId]) {
        let siblings: Vec<_> = self
            .flows
            .on_slot(session, ac, slot)
            .filter(|f| f.reason == FlowReason::Succeeded && !except.contains(&f.id))
            .map(|f| f.id)
            .collect();
        for id in siblings {
            self.notify(id, QosStatus::Modified);
        }
    }

    /// Removes every flow on `slot`, telling their owners the TSPEC is gone.
    fn lose_slot(&mut self, session: SessionId, ac: AccessCategory, slot: Slot) {
        for id in self.flows.ids_on_slot(session, ac, slot) {
            if let Some(flow) = self.drop_flow(id) {
                if flow.is_client_visible() {
                    flow.notify(QosStatus::QosLost, None);
                }
            }
        }
    }

    /// Reports a failure for a drained command whose flow may be gone by now.
    fn report_drained_failure(&self, id: FlowId, status: QosStatus, err: QosError) {
        match err {
            QosError::FlowNotFound(_) => {
                tracing::debug!(flow = %id, "buffered command outlived its flow")
            }
            err => {
                tracing::warn!(flow = %id, %err, ?status, "buffered command failed");
                self.notify(id, status);
            }
        }
    }

    /// Runs buffered commands of `session` while it stays idle.
    fn drain(&mut self, id: SessionId) {
        loop {
            let Some(session) = self.sessions.get_mut(&id) else {
                return;
            };
            if session.is_busy() {
                return;
            }
            let Some(command) = session.buffered.pop() else {
                return;
            };
            tracing::debug!(session = %id, kind = command.kind(), "draining buffered command");
            self.run_buffered(id, command);
        }
    }

    fn run_buffered(&mut self, session: SessionId, command: BufferedCommand) {
        match command {
            BufferedCommand::Setup(request) => {
                let failed = request.clone();
                if let Err(err) = self.start_setup(session, request) {
                    tracing::warn!(flow = %failed.flow_id, %session, %err, "buffered setup failed");
                    failed.notify(session, QosStatus::SetupFailure);
                }
            }
            BufferedCommand::Modify { flow, tspec } => {
                if let Err(err) = self.modify_flow(flow, tspec) {
                    self.report_drained_failure(flow, QosStatus::ModifyFailure, err);
                }
            }
            BufferedCommand::Release { flow } => {
                if let Err(err) = self.release_flow(flow) {
                    self.report_drained_failure(flow, QosStatus::ReleaseFailure, err);
                }
            }
            BufferedCommand::Renew { ac, slot } => self.renew_slot(session, ac, slot),
            BufferedCommand::Regroup { ac, slot } => self.regroup_slot(session, ac, slot),
            BufferedCommand::Teardown { ac, slot, tspec } => self.teardown_slot(session, ac, slot, tspec),
        }
    }

    /// Drops every flow and buffered command of a session and resets its ACs
    /// to `state`.
    fn flush_session(&mut self, id: SessionId, state: AcState) -> Result<(), QosError> {
        let session = self.session_mut(id)?;
        let buffered = session.buffered.take_all();
        session.reset_acs(state);
        session.assoc = None;
        session.uapsd = UapsdMask::default();
        session.handoff = HandoffMode::Normal;

        let flows = self.flows.ids_for_session(id);
        tracing::info!(session = %id, flows = flows.len(), buffered = buffered.len(), "flushing qos session");
        for flow_id in flows {
            if let Some(flow) = self.flows.remove(flow_id) {
                if flow.is_client_visible() {
                    flow.notify(QosStatus::QosLost, None);
                }
            }
        }
        for command in buffered {
            if let BufferedCommand::Setup(request) = command {
                request.notify(id, QosStatus::SetupFailure);
            }
        }
        Ok(())
    }
}
