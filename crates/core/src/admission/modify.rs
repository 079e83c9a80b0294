use crate::{
    client_events::{QosStatus, RequestStatus},
    command_buffer::BufferedCommand,
    errors::{InvalidParam, QosError},
    flow::{Flow, FlowReason},
    session::{ExchangeVia, PendingExchange, PendingKind},
    transport::QosTransport,
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, SessionId, Slot},
};

use super::{
    policy::{self, Admission},
    AdmissionEngine,
};

/// Parameters a modify may not touch.
fn check_immutable(current: &TspecInfo, requested: &TspecInfo) -> Result<(), InvalidParam> {
    if current.direction() != requested.direction() {
        return Err(InvalidParam::DirectionChanged);
    }
    if current.ts_info.tid != requested.ts_info.tid {
        return Err(InvalidParam::TidChanged);
    }
    if current.ts_info.up != requested.ts_info.up {
        return Err(InvalidParam::PriorityChanged);
    }
    Ok(())
}

impl<T: QosTransport> AdmissionEngine<T> {
    /// Renegotiates the TSPEC of an existing flow.
    pub fn modify_flow(&mut self, flow_id: FlowId, tspec: TspecInfo) -> Result<RequestStatus, QosError> {
        let Some(flow) = self.flows.client_flow(flow_id) else {
            return self.buffer_behind_setup(flow_id, BufferedCommand::Modify { flow: flow_id, tspec });
        };
        let session = flow.session;
        let state = self.session_ref(session)?;
        if flow.reason == FlowReason::Release || state.buffered.holds_release(flow_id) {
            tracing::debug!(flow = %flow_id, %session, "modify refused, flow is being released");
            return Err(QosError::FlowNotFound(flow_id));
        }
        let is_ht = state.association().is_some_and(|a| a.is_ht());
        tspec.validate(is_ht)?;
        check_immutable(&flow.tspec, &tspec)?;
        if flow.tspec == tspec {
            return Err(QosError::Unchanged);
        }

        if state.is_busy() {
            tracing::debug!(flow = %flow_id, %session, "session busy, buffering modify");
            self.session_mut(session)?
                .buffered
                .buffer(BufferedCommand::Modify { flow: flow_id, tspec });
            return Ok(RequestStatus::Pending);
        }
        self.start_modify(session, flow_id, tspec)
    }

    /// Queues a command for a flow whose setup is still buffered.
    pub(super) fn buffer_behind_setup(
        &mut self,
        flow_id: FlowId,
        command: BufferedCommand,
    ) -> Result<RequestStatus, QosError> {
        let Some(session) = self
            .sessions
            .values_mut()
            .find(|s| s.buffered.holds_setup(flow_id))
        else {
            return Err(QosError::FlowNotFound(flow_id));
        };
        // a buffered release already ends the flow
        if session.buffered.holds_release(flow_id) {
            return match command {
                BufferedCommand::Release { .. } => Ok(RequestStatus::Pending),
                _ => Err(QosError::FlowNotFound(flow_id)),
            };
        }
        tracing::debug!(flow = %flow_id, session = %session.id(), kind = command.kind(), "buffering behind pending setup");
        session.buffered.buffer(command);
        Ok(RequestStatus::Pending)
    }

    fn start_modify(
        &mut self,
        session: SessionId,
        flow_id: FlowId,
        tspec: TspecInfo,
    ) -> Result<RequestStatus, QosError> {
        let original = self
            .flows
            .get(flow_id)
            .cloned()
            .ok_or(QosError::FlowNotFound(flow_id))?;
        let (ac, slot) = (original.ac, original.slot);

        let shadow_id = self.allocate_flow_id();
        self.insert_flow(Flow::new(
            shadow_id,
            session,
            ac,
            slot,
            tspec,
            FlowReason::ModifyPending,
            original.callback.clone(),
        ));
        self.set_flow_reason(flow_id, FlowReason::Modify);
        let aggregate = self.flows.slot_aggregate(session, ac, slot).unwrap_or(tspec);
        tracing::debug!(flow = %flow_id, shadow = %shadow_id, %session, %ac, %slot, "modifying flow");

        let kind = PendingKind::Modify {
            original: flow_id,
            shadow: shadow_id,
        };
        let outcome = match policy::decide(self.policy_input(session, ac, &aggregate)) {
            Admission::Reject(reason) => Err(QosError::Unsupported(reason)),
            Admission::Admit => {
                self.complete_modify(session, ac, slot, flow_id, shadow_id, true, Some(aggregate));
                return Ok(RequestStatus::Success);
            }
            Admission::SendAddts => match self.transport.send_addts(session, ac, &aggregate) {
                Ok(exchange) => {
                    self.begin_exchange(
                        session,
                        ac,
                        Some(aggregate),
                        PendingExchange {
                            slot,
                            kind,
                            via: ExchangeVia::Addts,
                            exchange: Some(exchange),
                        },
                    );
                    Ok(RequestStatus::Pending)
                }
                Err(err) => Err(self.send_failed(session, ac, err)),
            },
            Admission::Reassociate => {
                let uapsd = self.session_ref(session)?.uapsd().with(ac);
                match self.transport.request_reassoc(session, uapsd) {
                    Ok(()) => {
                        self.begin_reassoc(session, ac, slot, Some(aggregate), kind);
                        Ok(RequestStatus::Pending)
                    }
                    Err(err) => Err(self.send_failed(session, ac, err)),
                }
            }
        };
        if outcome.is_err() {
            self.drop_flow(shadow_id);
            self.set_flow_reason(flow_id, FlowReason::Succeeded);
        }
        outcome
    }

    /// Finishes a modify: on success the shadow takes over the original id.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn complete_modify(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        original: FlowId,
        shadow: FlowId,
        accepted: bool,
        granted: Option<TspecInfo>,
    ) {
        if !accepted {
            self.drop_flow(shadow);
            self.set_flow_reason(original, FlowReason::Succeeded);
            tracing::info!(flow = %original, %session, %ac, "flow modify rejected");
            self.notify(original, QosStatus::ModifyFailure);
            return;
        }
        self.drop_flow(original);
        match self.flows.rekey(shadow, original) {
            Some(flow) => flow.reason = FlowReason::Succeeded,
            None => {
                tracing::warn!(flow = %original, %shadow, "modified flow vanished before completion");
                return;
            }
        }
        self.set_curr_tspec(session, ac, slot, granted);
        tracing::info!(flow = %original, %session, %ac, %slot, "flow modified");
        self.notify(original, QosStatus::ModifySuccess);
        self.notify_siblings(session, ac, slot, &[original]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tspec::Direction, types::UserPriority};

    #[test]
    fn direction_tid_and_priority_are_fixed() {
        let current = TspecInfo::default_for(UserPriority::new(6).unwrap());

        let mut other = current;
        other.ts_info.direction = Direction::Uplink;
        assert_eq!(check_immutable(&current, &other), Err(InvalidParam::DirectionChanged));

        let mut other = current;
        other.ts_info.tid = 5;
        assert_eq!(check_immutable(&current, &other), Err(InvalidParam::TidChanged));

        let mut other = current;
        other.ts_info.up = UserPriority::new(7).unwrap();
        assert_eq!(check_immutable(&current, &other), Err(InvalidParam::PriorityChanged));

        let mut other = current;
        other.mean_data_rate *= 2;
        assert_eq!(check_immutable(&current, &other), Ok(()));
    }
}
