use crate::{
    client_events::QosStatus,
    flow::FlowReason,
    session::{AcState, AssociationSnapshot, ExchangeVia, HandoffMode, PendingExchange, PendingKind},
    transport::QosTransport,
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, SessionId, Slot},
};

use super::AdmissionEngine;

impl<T: QosTransport> AdmissionEngine<T> {
    pub fn on_addts_response(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        accepted: bool,
        negotiated: Option<TspecInfo>,
    ) {
        let Some(pending) = self.take_response(session, ac, ExchangeVia::Addts) else {
            return;
        };
        tracing::debug!(%session, %ac, accepted, kind = ?pending.kind, "addts response");
        self.complete_pending(session, ac, pending, accepted, negotiated);
        self.drain(session);
    }

    pub fn on_delts_response(&mut self, session: SessionId, ac: AccessCategory) {
        let Some(pending) = self.take_response(session, ac, ExchangeVia::Delts) else {
            return;
        };
        tracing::debug!(%session, %ac, kind = ?pending.kind, "delts response");
        self.complete_pending(session, ac, pending, true, None);
        self.drain(session);
    }

    /// The AP tore down the admitted traffic of `ac`. Every flow on the AC is
    /// lost, including one whose admission was still in flight.
    pub fn on_delts_indication(&mut self, session: SessionId, ac: AccessCategory) {
        let acm = self.acm(session, ac);
        let Some(state) = self.sessions.get_mut(&session) else {
            tracing::warn!(%session, %ac, "delts indication for unknown session");
            return;
        };
        let ac_state = state.ac_mut(ac);
        match ac_state.state() {
            AcState::Handoff => {
                tracing::warn!(%session, %ac, "dropping delts indication received during handoff");
                return;
            }
            AcState::Closed | AcState::Init | AcState::LinkUp => {
                tracing::debug!(%session, %ac, state = ?ac_state.state(), "delts indication without admitted traffic");
                return;
            }
            AcState::Requested | AcState::QosOn => {}
        }
        ac_state.reset(AcState::LinkUp);
        if acm {
            state.uapsd = state.uapsd.without(ac);
        }

        let lost = self.flows.ids_on_ac(session, ac);
        tracing::info!(%session, %ac, flows = lost.len(), "access point tore down admitted traffic");
        for id in lost {
            if let Some(flow) = self.flows.remove(id) {
                if flow.is_client_visible() {
                    flow.notify(QosStatus::QosLost, None);
                }
            }
        }
        self.drain(session);
    }

    pub fn on_association_complete(&mut self, session: SessionId, snapshot: AssociationSnapshot) {
        let Some(state) = self.sessions.get_mut(&session) else {
            tracing::warn!(%session, "association complete for unknown session");
            return;
        };
        let roaming = state.handoff != HandoffMode::Normal
            || state.acs().any(|ac| ac.state() == AcState::Handoff);
        state.uapsd = snapshot.uapsd;
        tracing::info!(
            %session,
            bssid = ?snapshot.bssid,
            wmm = snapshot.wmm,
            acm = ?snapshot.acm,
            roaming,
            "association complete"
        );
        state.assoc = Some(snapshot);
        if roaming {
            return;
        }
        for ac_state in state.acs_mut() {
            if ac_state.state() == AcState::Init {
                ac_state.transition(AcState::LinkUp);
            }
        }
        self.drain(session);
    }

    pub fn on_join_request(&mut self, session: SessionId) {
        if let Err(err) = self.flush_session(session, AcState::Init) {
            tracing::warn!(%session, %err, "join request for unknown session");
        }
    }

    pub fn on_disconnect(&mut self, session: SessionId) {
        if let Err(err) = self.flush_session(session, AcState::Init) {
            tracing::warn!(%session, %err, "disconnect for unknown session");
        }
    }

    /// Takes the exchange a response answers, or drops a response that does
    /// not match what is outstanding.
    fn take_response(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        via: ExchangeVia,
    ) -> Option<PendingExchange> {
        let Some(state) = self.sessions.get_mut(&session) else {
            tracing::warn!(%session, %ac, ?via, "response for unknown session");
            return None;
        };
        let ac_state = state.ac_mut(ac);
        if ac_state.state() == AcState::Handoff {
            tracing::warn!(%session, %ac, ?via, "dropping response received during handoff");
            return None;
        }
        match ac_state.pending() {
            Some(pending) if pending.via == via => ac_state.take_pending(),
            pending => {
                tracing::warn!(%session, %ac, ?via, outstanding = ?pending, "dropping unexpected response");
                None
            }
        }
    }

    /// Applies the outcome of an exchange that is no longer outstanding and
    /// settles its AC. Draining is left to the caller.
    pub(super) fn complete_pending(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        pending: PendingExchange,
        accepted: bool,
        negotiated: Option<TspecInfo>,
    ) {
        let slot = pending.slot;
        let requested = self
            .sessions
            .get_mut(&session)
            .and_then(|s| s.ac_mut(ac).requested_tspec[slot.index()].take());
        let granted = negotiated.or(requested);

        if accepted
            && pending.via == ExchangeVia::Addts
            && self.acm(session, ac)
            && granted.is_some_and(|t| t.psb())
        {
            if let Some(state) = self.sessions.get(&session) {
                let uapsd = state.uapsd().with(ac);
                self.set_uapsd(session, uapsd);
            }
        }

        let mut release_next = None;
        match pending.kind {
            PendingKind::Admit { flow, merge } => {
                release_next = self.complete_admit(session, ac, slot, flow, merge, accepted, granted);
            }
            PendingKind::Modify { original, shadow } => {
                self.complete_modify(session, ac, slot, original, shadow, accepted, granted)
            }
            PendingKind::Shrink { released } => {
                self.complete_shrink(session, ac, slot, released, accepted, granted)
            }
            PendingKind::Remove { released } => {
                self.complete_remove(session, ac, released, accepted, pending.via)
            }
            PendingKind::Teardown => {
                tracing::debug!(%session, %ac, %slot, "stale tspec torn down");
            }
            PendingKind::Renew => self.complete_renew(session, ac, slot, accepted, granted),
            PendingKind::Regroup => self.complete_regroup(session, ac, slot, accepted, granted),
        }
        self.settle(session, ac);

        if let Some(flow) = release_next {
            if let Err(err) = self.start_release(session, flow) {
                tracing::warn!(%flow, %session, %err, "release after admission failed");
                self.notify(flow, QosStatus::ReleaseFailure);
            }
        }
    }

    /// Returns the flow to release next when the client let go of it while
    /// its admission was in flight.
    #[allow(clippy::too_many_arguments)]
    fn complete_admit(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        flow_id: FlowId,
        merge: bool,
        accepted: bool,
        granted: Option<TspecInfo>,
    ) -> Option<FlowId> {
        let Some(flow) = self.flows.get(flow_id) else {
            tracing::warn!(flow = %flow_id, %session, %ac, "admitted flow vanished");
            return None;
        };
        let releasing = flow.reason == FlowReason::Release;
        if !accepted {
            let flow = self.drop_flow(flow_id)?;
            let status = if releasing {
                QosStatus::ReleaseSuccess
            } else {
                QosStatus::SetupFailure
            };
            tracing::info!(flow = %flow_id, %session, %ac, ?status, "flow admission rejected");
            flow.notify(status, None);
            return None;
        }

        self.set_flow_reason(flow_id, FlowReason::Succeeded);
        self.set_curr_tspec(session, ac, slot, granted);
        if merge {
            self.merge_second_slot(session, ac);
        }
        if releasing {
            return Some(flow_id);
        }
        tracing::info!(flow = %flow_id, %session, %ac, %slot, "flow admitted");
        self.report_admitted(flow_id);
        None
    }

    fn complete_shrink(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        released: FlowId,
        accepted: bool,
        granted: Option<TspecInfo>,
    ) {
        let Some(flow) = self.drop_flow(released) else {
            return;
        };
        if accepted {
            self.set_curr_tspec(session, ac, slot, granted);
            tracing::info!(flow = %released, %session, %ac, %slot, "flow released");
            flow.notify(QosStatus::ReleaseSuccess, None);
            self.notify_siblings(session, ac, slot, &[]);
        } else {
            tracing::warn!(flow = %released, %session, %ac, %slot, "shrinking admitted tspec rejected");
            flow.notify(QosStatus::ReleaseFailure, None);
        }
    }

    fn complete_remove(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        released: FlowId,
        accepted: bool,
        via: ExchangeVia,
    ) {
        let Some(flow) = self.drop_flow(released) else {
            return;
        };
        if via == ExchangeVia::Delts && flow.tspec.psb() && self.acm(session, ac) {
            if let Some(state) = self.sessions.get(&session) {
                let uapsd = state.uapsd().without(ac);
                self.set_uapsd(session, uapsd);
            }
        }
        let status = if accepted {
            QosStatus::ReleaseSuccess
        } else {
            QosStatus::ReleaseFailure
        };
        tracing::info!(flow = %released, %session, %ac, ?status, "flow removed");
        flow.notify(status, None);
    }

    fn complete_renew(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        accepted: bool,
        granted: Option<TspecInfo>,
    ) {
        if !accepted {
            tracing::warn!(%session, %ac, %slot, "renewal after roam rejected");
            self.lose_slot(session, ac, slot);
            return;
        }
        self.set_curr_tspec(session, ac, slot, granted);
        for id in self.flows.ids_on_slot(session, ac, slot) {
            if let Some(flow) = self.flows.get_mut(id) {
                flow.handoff_renewal = false;
            }
        }
        tracing::info!(%session, %ac, %slot, "admitted tspec renewed after roam");
    }

    fn complete_regroup(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        accepted: bool,
        granted: Option<TspecInfo>,
    ) {
        if !accepted {
            tracing::warn!(%session, %ac, %slot, "admission of split flows rejected");
            self.lose_slot(session, ac, slot);
            return;
        }
        self.set_curr_tspec(session, ac, slot, granted);
        self.notify_siblings(session, ac, slot, &[]);
    }
}
