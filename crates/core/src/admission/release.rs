use crate::{
    client_events::{QosStatus, RequestStatus},
    command_buffer::BufferedCommand,
    errors::QosError,
    flow::FlowReason,
    session::{ExchangeVia, PendingExchange, PendingKind},
    transport::QosTransport,
    tspec::{Direction, TspecInfo},
    types::{FlowId, SessionId, Slot},
};

use super::AdmissionEngine;

impl<T: QosTransport> AdmissionEngine<T> {
    /// Releases a flow. Releasing a flow that is already on its way out
    /// returns `Pending` again without touching any state.
    pub fn release_flow(&mut self, flow_id: FlowId) -> Result<RequestStatus, QosError> {
        let Some(flow) = self.flows.client_flow(flow_id) else {
            return self.buffer_behind_setup(flow_id, BufferedCommand::Release { flow: flow_id });
        };
        let (session, ac) = (flow.session, flow.ac);
        let state = self.session_ref(session)?;
        if flow.reason == FlowReason::Release || state.buffered.holds_release(flow_id) {
            tracing::debug!(flow = %flow_id, %session, "release already in progress");
            return Ok(RequestStatus::Pending);
        }
        let admitting = state.ac(ac).pending().is_some_and(
            |p| matches!(p.kind, PendingKind::Admit { flow, .. } if flow == flow_id),
        );
        if admitting {
            tracing::debug!(flow = %flow_id, %session, %ac, "release requested while admission is in flight");
            self.set_flow_reason(flow_id, FlowReason::Release);
            return Ok(RequestStatus::Pending);
        }
        if state.is_busy() {
            tracing::debug!(flow = %flow_id, %session, "session busy, buffering release");
            self.session_mut(session)?
                .buffered
                .buffer(BufferedCommand::Release { flow: flow_id });
            return Ok(RequestStatus::Pending);
        }
        self.start_release(session, flow_id)
    }

    /// Takes an admitted flow out of its slot on an idle session.
    pub(super) fn start_release(
        &mut self,
        session: SessionId,
        flow_id: FlowId,
    ) -> Result<RequestStatus, QosError> {
        let flow = self
            .flows
            .get(flow_id)
            .cloned()
            .ok_or(QosError::FlowNotFound(flow_id))?;
        let (ac, slot) = (flow.ac, flow.slot);
        let acm = self.acm(session, ac);
        let state = self.session_ref(session)?;
        let ac_state = state.ac(ac);
        let uapsd = state.uapsd();
        let admitted = ac_state.curr_tspec(slot).copied();
        let sole_on_ac = ac_state.total_flows() == 1;
        let apsd_from_flow = ac_state.apsd_from_flow;

        let remaining: Vec<_> = self
            .flows
            .on_slot(session, ac, slot)
            .filter(|f| f.id != flow_id && matches!(f.reason, FlowReason::Succeeded | FlowReason::Setup))
            .map(|f| (f.id, f.tspec))
            .collect();

        if remaining.is_empty() {
            if let (true, Some(tspec)) = (acm, admitted) {
                self.transport
                    .send_delts(session, ac, slot, &tspec)
                    .map_err(|err| self.send_failed(session, ac, err))?;
                self.set_flow_reason(flow_id, FlowReason::Release);
                self.begin_exchange(
                    session,
                    ac,
                    None,
                    PendingExchange {
                        slot,
                        kind: PendingKind::Remove { released: flow_id },
                        via: ExchangeVia::Delts,
                        exchange: None,
                    },
                );
                return Ok(RequestStatus::Pending);
            }
            if !acm && apsd_from_flow && sole_on_ac && flow.tspec.psb() {
                self.transport
                    .request_reassoc(session, uapsd.without(ac))
                    .map_err(|err| self.send_failed(session, ac, err))?;
                self.set_flow_reason(flow_id, FlowReason::Release);
                self.begin_reassoc(session, ac, slot, None, PendingKind::Remove { released: flow_id });
                return Ok(RequestStatus::Pending);
            }
            self.drop_flow(flow_id);
            self.settle(session, ac);
            tracing::info!(flow = %flow_id, %session, %ac, %slot, "flow released");
            flow.notify(QosStatus::ReleaseSuccess, None);
            return Ok(RequestStatus::Success);
        }

        let splits = slot == Slot::First
            && flow.direction() == Direction::Bidirectional
            && remaining
                .iter()
                .all(|(_, t)| t.direction() != Direction::Bidirectional)
            && remaining.iter().any(|(_, t)| t.direction() == Direction::Uplink)
            && remaining.iter().any(|(_, t)| t.direction() == Direction::Downlink);
        let (moving, staying): (Vec<_>, Vec<_>) = if splits {
            remaining
                .iter()
                .partition(|(_, t)| t.direction() == Direction::Downlink)
        } else {
            (Vec::new(), remaining.iter().collect())
        };
        let Some(shrunk) = TspecInfo::aggregate_all(staying.iter().map(|(_, t)| t)) else {
            return Err(QosError::FlowNotFound(flow_id));
        };
        let moving: Vec<FlowId> = moving.iter().map(|(id, _)| *id).collect();

        if acm {
            let exchange = self
                .transport
                .send_addts(session, ac, &shrunk)
                .map_err(|err| self.send_failed(session, ac, err))?;
            if splits {
                tracing::debug!(flow = %flow_id, %session, %ac, moved = moving.len(), "splitting slot");
                for id in &moving {
                    self.move_flow(*id, Slot::Second);
                }
                self.session_mut(session)?
                    .buffered
                    .buffer_front(BufferedCommand::Regroup {
                        ac,
                        slot: Slot::Second,
                    });
            }
            self.set_flow_reason(flow_id, FlowReason::Release);
            self.begin_exchange(
                session,
                ac,
                Some(shrunk),
                PendingExchange {
                    slot,
                    kind: PendingKind::Shrink { released: flow_id },
                    via: ExchangeVia::Addts,
                    exchange: Some(exchange),
                },
            );
            return Ok(RequestStatus::Pending);
        }

        for id in &moving {
            self.move_flow(*id, Slot::Second);
        }
        self.drop_flow(flow_id);
        self.set_curr_tspec(session, ac, slot, Some(shrunk));
        if splits {
            let regrouped = self.flows.slot_aggregate(session, ac, Slot::Second);
            self.set_curr_tspec(session, ac, Slot::Second, regrouped);
        }
        tracing::info!(flow = %flow_id, %session, %ac, %slot, "flow released");
        flow.notify(QosStatus::ReleaseSuccess, None);
        self.notify_siblings(session, ac, slot, &[]);
        if splits {
            self.notify_siblings(session, ac, Slot::Second, &[]);
        }
        Ok(RequestStatus::Success)
    }
}
