//! Keeping admitted traffic alive across a roam.
//!
//! A legacy roam renews every admitted TSPEC with a fresh ADDTS once the new
//! association is up. A fast transition carries them inside the reassociation
//! as RIC requests, so the flows survive without any renewal. Reassociations
//! the engine itself triggers to switch U-APSD go through the same path.

use crate::{
    command_buffer::BufferedCommand,
    errors::QosError,
    session::{AcState, ExchangeVia, HandoffMode, PendingExchange, PendingKind},
    transport::{AggregatedTspec, QosTransport, TransportError},
    tspec::TspecInfo,
    types::{AccessCategory, SessionId, Slot, UapsdMask},
};

use super::AdmissionEngine;

impl<T: QosTransport> AdmissionEngine<T> {
    /// The station is about to roam. Requests arriving until the handoff
    /// completes are buffered.
    pub fn notify_handoff_started(&mut self, session: SessionId) -> Result<(), QosError> {
        let fast_transition = self.config.fast_transition;
        let state = self.session_mut(session)?;
        if state.handoff != HandoffMode::Normal {
            tracing::debug!(%session, mode = ?state.handoff, "handoff already in progress");
            return Ok(());
        }
        for ac_state in state.acs_mut() {
            ac_state.enter_handoff();
        }
        state.handoff = HandoffMode::LegacyHandoffPending;
        let use_ft = fast_transition && state.association().is_some_and(|a| a.fast_transition);

        if use_ft {
            match self.request_fast_transition(session) {
                Ok(carried) => {
                    if let Some(state) = self.sessions.get_mut(&session) {
                        state.handoff = HandoffMode::FastTransitionInProgress;
                    }
                    tracing::info!(%session, tspecs = carried, "fast transition handoff started");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(%session, %err, "fast transition request failed, falling back to legacy handoff");
                    if let Some(state) = self.sessions.get_mut(&session) {
                        for ac_state in state.acs_mut() {
                            ac_state.ric = [None, None];
                        }
                    }
                }
            }
        }
        tracing::info!(%session, "legacy handoff started");
        Ok(())
    }

    /// The roam finished without a reassociation report, e.g. because the
    /// association came up through another path. Does nothing when no handoff
    /// is in progress.
    pub fn notify_handoff_complete(&mut self, session: SessionId) -> Result<(), QosError> {
        self.session_ref(session)?;
        self.finish_handoff(session, None);
        Ok(())
    }

    pub fn on_reassoc_complete(&mut self, session: SessionId, succeeded: bool, uapsd: UapsdMask) {
        if !self.sessions.contains_key(&session) {
            tracing::warn!(%session, "reassociation complete for unknown session");
            return;
        }
        self.finish_handoff(session, Some((succeeded, uapsd)));
    }

    /// Builds a RIC for every admitted TSPEC under admission control and sends
    /// them in one aggregated request. Returns how many were carried.
    fn request_fast_transition(&mut self, session: SessionId) -> Result<usize, TransportError> {
        let mut admitted = Vec::new();
        if let Some(state) = self.sessions.get(&session) {
            for ac_state in state.acs() {
                let ac = ac_state.ac();
                if !self.acm(session, ac) {
                    continue;
                }
                for slot in Slot::BOTH {
                    if let Some(tspec) = ac_state.curr_tspec(slot) {
                        admitted.push((ac, slot, *tspec));
                    }
                }
            }
        }

        let mut tspecs = Vec::with_capacity(admitted.len());
        for (ac, slot, tspec) in admitted {
            let ric = self.transport.send_ric(session, &tspec)?;
            if let Some(state) = self.sessions.get_mut(&session) {
                state.ac_mut(ac).ric[slot.index()] = Some(ric);
            }
            tspecs.push(AggregatedTspec {
                ac,
                slot,
                tspec,
                ric: Some(ric),
            });
        }
        if !tspecs.is_empty() {
            self.transport.send_aggregated_qos(session, &tspecs)?;
        }
        Ok(tspecs.len())
    }

    /// Restores the ACs of a session after a roam or a U-APSD reassociation.
    fn finish_handoff(&mut self, session: SessionId, reassoc: Option<(bool, UapsdMask)>) {
        let Some(state) = self.sessions.get_mut(&session) else {
            return;
        };
        let mode = state.handoff;
        let in_handoff = state.acs().any(|ac| ac.state() == AcState::Handoff);
        if reassoc.is_none() && mode == HandoffMode::Normal && !in_handoff {
            tracing::debug!(%session, "no handoff to complete");
            return;
        }
        if let Some((true, uapsd)) = reassoc {
            state.uapsd = uapsd;
        }
        let associated = state.association().is_some();
        for ac_state in state.acs_mut() {
            ac_state.leave_handoff();
            if associated && ac_state.state() == AcState::Init {
                ac_state.transition(AcState::LinkUp);
            }
        }
        state.handoff = HandoffMode::Normal;
        tracing::info!(%session, ?mode, ?reassoc, "handoff complete");

        // only exchanges that were on the air before the roam
        self.resume_in_flight(session);
        if let Some((succeeded, uapsd)) = reassoc {
            self.resolve_reassoc(session, succeeded, uapsd);
        }

        let succeeded = reassoc.map_or(true, |(succeeded, _)| succeeded);
        match mode {
            HandoffMode::LegacyHandoffPending if succeeded => self.schedule_renewals(session),
            HandoffMode::FastTransitionInProgress => {
                if let Some(state) = self.sessions.get_mut(&session) {
                    for ac_state in state.acs_mut() {
                        ac_state.ric = [None, None];
                    }
                }
            }
            _ => {}
        }

        self.drain(session);
    }

    /// Completes the exchanges that waited on a flow driven reassociation.
    fn resolve_reassoc(&mut self, session: SessionId, succeeded: bool, uapsd: UapsdMask) {
        for ac in AccessCategory::ALL {
            let Some(state) = self.sessions.get_mut(&session) else {
                return;
            };
            let ac_state = state.ac_mut(ac);
            if !ac_state.is_reassoc_pending() {
                continue;
            }
            ac_state.reassoc_pending = false;
            let Some(pending) = ac_state.take_pending() else {
                continue;
            };
            let wanted = !matches!(pending.kind, PendingKind::Remove { .. });
            let accepted = succeeded && uapsd.contains(ac) == wanted;
            if accepted {
                ac_state.apsd_from_flow = wanted;
            }
            tracing::debug!(%session, %ac, accepted, kind = ?pending.kind, "u-apsd reassociation resolved");
            self.complete_pending(session, ac, pending, accepted, None);
        }
    }

    /// Queues a renewal for every TSPEC the new AP has to admit again.
    fn schedule_renewals(&mut self, session: SessionId) {
        let mut renewals = Vec::new();
        if let Some(state) = self.sessions.get(&session) {
            for ac_state in state.acs() {
                let ac = ac_state.ac();
                if !self.acm(session, ac) {
                    continue;
                }
                for slot in Slot::BOTH {
                    if ac_state.curr_tspec(slot).is_some() {
                        renewals.push((ac, slot));
                    }
                }
            }
        }
        for &(ac, slot) in &renewals {
            for id in self.flows.ids_on_slot(session, ac, slot) {
                if let Some(flow) = self.flows.get_mut(id) {
                    flow.handoff_renewal = true;
                }
            }
        }
        tracing::debug!(%session, renewals = renewals.len(), "scheduling tspec renewals");
        if let Some(state) = self.sessions.get_mut(&session) {
            state.buffered.buffer_front_all(
                renewals
                    .into_iter()
                    .map(|(ac, slot)| BufferedCommand::Renew { ac, slot }),
            );
        }
    }

    /// Re-sends an ADDTS that was in flight when the roam started and
    /// completes a DELTS locally, the old AP having dropped the TSPEC anyway.
    fn resume_in_flight(&mut self, session: SessionId) {
        for ac in AccessCategory::ALL {
            let Some(state) = self.sessions.get_mut(&session) else {
                return;
            };
            let ac_state = state.ac_mut(ac);
            let Some(pending) = ac_state.pending().copied() else {
                continue;
            };
            match pending.via {
                ExchangeVia::Reassoc => {}
                ExchangeVia::Delts => {
                    if let Some(pending) = ac_state.take_pending() {
                        tracing::debug!(%session, %ac, "completing interrupted delts locally");
                        self.complete_pending(session, ac, pending, true, None);
                    }
                }
                ExchangeVia::Addts => {
                    let Some(tspec) = ac_state.requested_tspec(pending.slot).copied() else {
                        continue;
                    };
                    match self.transport.send_addts(session, ac, &tspec) {
                        Ok(exchange) => {
                            tracing::debug!(%session, %ac, %exchange, "re-sent interrupted addts");
                            if let Some(state) = self.sessions.get_mut(&session) {
                                if let Some(pending) = state.ac_mut(ac).pending.as_mut() {
                                    pending.exchange = Some(exchange);
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!(%session, %ac, %err, "failed to re-send interrupted addts");
                            let pending = self
                                .sessions
                                .get_mut(&session)
                                .and_then(|s| s.ac_mut(ac).take_pending());
                            if let Some(pending) = pending {
                                self.complete_pending(session, ac, pending, false, None);
                            }
                        }
                    }
                }
            }
        }
    }

    pub(super) fn renew_slot(&mut self, session: SessionId, ac: AccessCategory, slot: Slot) {
        let Some(tspec) = self.flows.slot_aggregate(session, ac, slot) else {
            return;
        };
        if !self.acm(session, ac) {
            tracing::debug!(%session, %ac, %slot, "new access point does not need admission");
            for id in self.flows.ids_on_slot(session, ac, slot) {
                if let Some(flow) = self.flows.get_mut(id) {
                    flow.handoff_renewal = false;
                }
            }
            return;
        }
        self.exchange_for_slot(session, ac, slot, tspec, PendingKind::Renew);
    }

    pub(super) fn regroup_slot(&mut self, session: SessionId, ac: AccessCategory, slot: Slot) {
        let Some(tspec) = self.flows.slot_aggregate(session, ac, slot) else {
            return;
        };
        if !self.acm(session, ac) {
            self.set_curr_tspec(session, ac, slot, Some(tspec));
            self.notify_siblings(session, ac, slot, &[]);
            return;
        }
        self.exchange_for_slot(session, ac, slot, tspec, PendingKind::Regroup);
    }

    pub(super) fn teardown_slot(&mut self, session: SessionId, ac: AccessCategory, slot: Slot, tspec: TspecInfo) {
        match self.transport.send_delts(session, ac, slot, &tspec) {
            Ok(()) => self.begin_exchange(
                session,
                ac,
                None,
                PendingExchange {
                    slot,
                    kind: PendingKind::Teardown,
                    via: ExchangeVia::Delts,
                    exchange: None,
                },
            ),
            Err(err) => {
                tracing::warn!(%session, %ac, %slot, %err, "failed to tear down merged tspec");
            }
        }
    }

    /// ADDTS for a slot whose flows are already in place.
    fn exchange_for_slot(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: TspecInfo,
        kind: PendingKind,
    ) {
        match self.transport.send_addts(session, ac, &tspec) {
            Ok(exchange) => self.begin_exchange(
                session,
                ac,
                Some(tspec),
                PendingExchange {
                    slot,
                    kind,
                    via: ExchangeVia::Addts,
                    exchange: Some(exchange),
                },
            ),
            Err(err) => {
                tracing::warn!(%session, %ac, %slot, %err, ?kind, "failed to send slot admission");
                self.lose_slot(session, ac, slot);
                self.settle(session, ac);
            }
        }
    }
}
