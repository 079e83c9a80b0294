use crate::{
    client_events::{FlowCallback, QosStatus, RequestStatus, SetupOutcome},
    command_buffer::{BufferedCommand, SetupRequest},
    errors::{QosError, Unsupported},
    flow::{Flow, FlowReason},
    session::{AcState, ExchangeVia, PendingExchange, PendingKind},
    transport::QosTransport,
    tspec::{Direction, TspecInfo},
    types::{AccessCategory, FlowId, SessionId, Slot, UserPriority},
};

use super::{
    policy::{self, Admission},
    AdmissionEngine,
};

impl<T: QosTransport> AdmissionEngine<T> {
    /// Requests QoS for a new flow of priority `up`.
    ///
    /// Without a TSPEC the per-AC defaults are used, asking for U-APSD when the
    /// AC is part of the configured default mask. A busy session queues the
    /// request and returns `Pending` with the id the flow will carry.
    pub fn setup_flow(
        &mut self,
        session: SessionId,
        tspec: Option<TspecInfo>,
        up: UserPriority,
        callback: FlowCallback,
    ) -> Result<SetupOutcome, QosError> {
        let state = self.session_ref(session)?;
        let assoc = self.usable_association(state)?;
        let busy = state.is_busy();

        let ac = up.access_category();
        let tspec = tspec.unwrap_or_else(|| {
            let mut tspec = TspecInfo::default_for(up);
            tspec.ts_info.psb = self.config.default_uapsd_mask.contains(ac);
            tspec
        });
        tspec.validate(assoc.is_ht())?;

        let flow_id = self.allocate_flow_id();
        let request = SetupRequest {
            flow_id,
            ac,
            tspec,
            callback,
        };
        if busy {
            tracing::debug!(flow = %flow_id, %session, %ac, "session busy, buffering setup");
            self.session_mut(session)?
                .buffered
                .buffer(BufferedCommand::Setup(request));
            return Ok(SetupOutcome {
                flow_id,
                status: RequestStatus::Pending,
            });
        }
        let status = self.start_setup(session, request)?;
        Ok(SetupOutcome { flow_id, status })
    }

    /// Admits a setup on an idle session.
    pub(super) fn start_setup(
        &mut self,
        session: SessionId,
        request: SetupRequest,
    ) -> Result<RequestStatus, QosError> {
        let SetupRequest {
            flow_id,
            ac,
            tspec,
            callback,
        } = request;
        let (slot, merge) = match self.session_ref(session)?.ac(ac).state() {
            AcState::LinkUp => (Slot::First, false),
            AcState::QosOn => self.choose_slot(session, ac, tspec.direction()),
            state => {
                tracing::debug!(flow = %flow_id, %session, %ac, ?state, "cannot admit flow in this state");
                return Err(QosError::Unsupported(Unsupported::NotAssociated));
            }
        };

        let mut aggregate = self
            .flows
            .slot_aggregate(session, ac, slot)
            .map_or(tspec, |current| current.aggregate(&tspec));
        if merge {
            if let Some(other) = self.flows.slot_aggregate(session, ac, slot.other()) {
                aggregate = aggregate.aggregate(&other);
            }
        }

        let flow = Flow::new(flow_id, session, ac, slot, tspec, FlowReason::Setup, callback);
        match policy::decide(self.policy_input(session, ac, &aggregate)) {
            Admission::Reject(reason) => {
                tracing::info!(flow = %flow_id, %session, %ac, %reason, "flow setup refused");
                Err(QosError::Unsupported(reason))
            }
            Admission::Admit => {
                self.insert_flow(flow);
                self.set_flow_reason(flow_id, FlowReason::Succeeded);
                self.set_curr_tspec(session, ac, slot, Some(aggregate));
                if merge {
                    self.merge_second_slot(session, ac);
                }
                self.settle(session, ac);
                tracing::info!(flow = %flow_id, %session, %ac, %slot, "flow admitted without exchange");
                self.report_admitted(flow_id);
                Ok(RequestStatus::Success)
            }
            Admission::SendAddts => {
                let exchange = self
                    .transport
                    .send_addts(session, ac, &aggregate)
                    .map_err(|err| self.send_failed(session, ac, err))?;
                self.insert_flow(flow);
                self.begin_exchange(
                    session,
                    ac,
                    Some(aggregate),
                    PendingExchange {
                        slot,
                        kind: PendingKind::Admit {
                            flow: flow_id,
                            merge,
                        },
                        via: ExchangeVia::Addts,
                        exchange: Some(exchange),
                    },
                );
                Ok(RequestStatus::Pending)
            }
            Admission::Reassociate => {
                let uapsd = self.session_ref(session)?.uapsd().with(ac);
                self.transport
                    .request_reassoc(session, uapsd)
                    .map_err(|err| self.send_failed(session, ac, err))?;
                self.insert_flow(flow);
                self.begin_reassoc(
                    session,
                    ac,
                    slot,
                    Some(aggregate),
                    PendingKind::Admit {
                        flow: flow_id,
                        merge,
                    },
                );
                Ok(RequestStatus::Pending)
            }
        }
    }

    /// Picks the slot for a new flow on an AC that already carries traffic.
    /// The second value asks for the second slot to be merged into the first
    /// once the flow is admitted.
    fn choose_slot(&self, session: SessionId, ac: AccessCategory, direction: Direction) -> (Slot, bool) {
        let Some(state) = self.sessions.get(&session) else {
            return (Slot::First, false);
        };
        let status = state.ac(ac).slot_status();
        let bidirectional = direction == Direction::Bidirectional
            || self
                .flows
                .on_ac(session, ac)
                .any(|f| f.direction() == Direction::Bidirectional);
        if bidirectional {
            return (Slot::First, status.contains(Slot::Second));
        }
        let matching = Slot::BOTH.into_iter().find(|&slot| {
            status.contains(slot)
                && self
                    .flows
                    .on_slot(session, ac, slot)
                    .any(|f| f.direction() == direction)
        });
        let slot = matching
            .or_else(|| Slot::BOTH.into_iter().find(|&slot| !status.contains(slot)))
            .unwrap_or(Slot::First);
        (slot, false)
    }

    /// Folds the flows of the second slot into the first. Under admission
    /// control the TSPEC left behind is torn down before anything else runs.
    pub(super) fn merge_second_slot(&mut self, session: SessionId, ac: AccessCategory) {
        let acm = self.acm(session, ac);
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        let stale = state.ac_mut(ac).curr_tspec[Slot::Second.index()].take();
        let moved = self.flows.ids_on_slot(session, ac, Slot::Second);
        tracing::debug!(%session, %ac, flows = moved.len(), "merging second slot into first");
        for id in moved {
            self.move_flow(id, Slot::First);
        }
        if let (true, Some(tspec)) = (acm, stale) {
            if let Some(state) = self.sessions.get_mut(&session) {
                state.buffered.buffer_front(BufferedCommand::Teardown {
                    ac,
                    slot: Slot::Second,
                    tspec,
                });
            }
        }
    }

    /// Tells a freshly admitted flow and its slot siblings about the result.
    pub(super) fn report_admitted(&self, id: FlowId) {
        let Some(flow) = self.flows.get(id) else {
            return;
        };
        let apsd = self
            .sessions
            .get(&flow.session)
            .is_some_and(|s| s.uapsd().contains(flow.ac));
        let status = if flow.tspec.psb() && apsd {
            QosStatus::SetupSuccessApsdPending
        } else {
            QosStatus::SetupSuccess
        };
        self.notify(id, status);
        self.notify_siblings(flow.session, flow.ac, flow.slot, &[id]);
    }
}
