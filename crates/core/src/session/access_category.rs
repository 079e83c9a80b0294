use crate::{
    transport::{ExchangeId, RicIdentifier},
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, Slot, SlotMask},
};

/// State of the admission state machine of one access category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcState {
    Closed,
    Init,
    LinkUp,
    Requested,
    QosOn,
    Handoff,
}

impl AcState {
    /// States from which a roam moves the AC into [`AcState::Handoff`].
    pub fn is_active(self) -> bool {
        matches!(self, AcState::LinkUp | AcState::Requested | AcState::QosOn)
    }
}

/// How the outstanding request went on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeVia {
    Addts,
    Delts,
    Reassoc,
}

/// What the outstanding request is meant to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Admit a new flow into the slot. `merge` folds the other slot into this
    /// one once admitted.
    Admit { flow: FlowId, merge: bool },
    Modify { original: FlowId, shadow: FlowId },
    /// Re-admit the remaining flows of the slot without `released`.
    Shrink { released: FlowId },
    /// Remove the last flow of the slot.
    Remove { released: FlowId },
    /// Tear down a slot that no longer carries flows.
    Teardown,
    /// Re-admit the slot after a legacy roam.
    Renew,
    /// Admit the aggregate of flows moved to this slot by a split.
    Regroup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingExchange {
    pub slot: Slot,
    pub kind: PendingKind,
    pub via: ExchangeVia,
    pub exchange: Option<ExchangeId>,
}

/// Per (session, AC) admission state.
#[derive(Debug, Clone)]
pub struct AccessCategoryState {
    ac: AccessCategory,
    pub(crate) state: AcState,
    pub(crate) prev_state: AcState,
    pub(crate) slot_status: SlotMask,
    pub(crate) pending: Option<PendingExchange>,
    pub(crate) curr_tspec: [Option<TspecInfo>; 2],
    pub(crate) requested_tspec: [Option<TspecInfo>; 2],
    pub(crate) flow_count: [usize; 2],
    /// A reassociation changing this AC's U-APSD bit is outstanding.
    pub(crate) reassoc_pending: bool,
    /// The U-APSD bit of this AC was set by a flow-driven reassociation.
    pub(crate) apsd_from_flow: bool,
    pub(crate) ric: [Option<RicIdentifier>; 2],
}

impl AccessCategoryState {
    pub(crate) fn new(ac: AccessCategory) -> Self {
        Self {
            ac,
            state: AcState::Closed,
            prev_state: AcState::Closed,
            slot_status: SlotMask::None,
            pending: None,
            curr_tspec: [None, None],
            requested_tspec: [None, None],
            flow_count: [0, 0],
            reassoc_pending: false,
            apsd_from_flow: false,
            ric: [None, None],
        }
    }

    pub fn ac(&self) -> AccessCategory {
        self.ac
    }

    pub fn state(&self) -> AcState {
        self.state
    }

    pub fn previous_state(&self) -> AcState {
        self.prev_state
    }

    pub fn slot_status(&self) -> SlotMask {
        self.slot_status
    }

    pub fn pending(&self) -> Option<&PendingExchange> {
        self.pending.as_ref()
    }

    pub fn pending_slot(&self) -> Option<Slot> {
        self.pending.map(|p| p.slot)
    }

    pub fn curr_tspec(&self, slot: Slot) -> Option<&TspecInfo> {
        self.curr_tspec[slot.index()].as_ref()
    }

    pub fn requested_tspec(&self, slot: Slot) -> Option<&TspecInfo> {
        self.requested_tspec[slot.index()].as_ref()
    }

    pub fn flow_count(&self, slot: Slot) -> usize {
        self.flow_count[slot.index()]
    }

    pub fn total_flows(&self) -> usize {
        self.flow_count.iter().sum()
    }

    pub fn is_reassoc_pending(&self) -> bool {
        self.reassoc_pending
    }

    pub(crate) fn transition(&mut self, next: AcState) {
        if self.state != next {
            tracing::debug!(ac = %self.ac, from = ?self.state, to = ?next, "ac state transition");
        }
        self.state = next;
    }

    /// Settles a non-pending AC in the state its slots call for.
    pub(crate) fn settle(&mut self) {
        debug_assert!(self.pending.is_none());
        let next = if self.slot_status.is_empty() {
            AcState::LinkUp
        } else {
            AcState::QosOn
        };
        self.transition(next);
    }

    pub(crate) fn begin_exchange(&mut self, pending: PendingExchange) {
        debug_assert!(self.pending.is_none(), "one pending exchange per AC");
        self.pending = Some(pending);
        self.transition(AcState::Requested);
    }

    pub(crate) fn take_pending(&mut self) -> Option<PendingExchange> {
        self.pending.take()
    }

    pub(crate) fn add_flow(&mut self, slot: Slot) {
        self.flow_count[slot.index()] += 1;
        self.slot_status = self.slot_status.with(slot);
    }

    /// Drops one flow from the slot, clearing the slot when it was the last.
    pub(crate) fn remove_flow(&mut self, slot: Slot) {
        let count = &mut self.flow_count[slot.index()];
        debug_assert!(*count > 0);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.clear_slot(slot);
        }
    }

    pub(crate) fn clear_slot(&mut self, slot: Slot) {
        self.flow_count[slot.index()] = 0;
        self.slot_status = self.slot_status.without(slot);
        self.curr_tspec[slot.index()] = None;
        self.requested_tspec[slot.index()] = None;
        self.ric[slot.index()] = None;
    }

    pub(crate) fn enter_handoff(&mut self) {
        if !self.state.is_active() {
            return;
        }
        self.prev_state = if self.reassoc_pending {
            AcState::Requested
        } else {
            self.state
        };
        self.transition(AcState::Handoff);
    }

    pub(crate) fn leave_handoff(&mut self) {
        if self.state == AcState::Handoff {
            let prev = self.prev_state;
            self.transition(prev);
        }
    }

    /// Forgets every flow and exchange and moves to `state`.
    pub(crate) fn reset(&mut self, state: AcState) {
        let ac = self.ac;
        *self = Self::new(ac);
        self.state = state;
        self.prev_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_flow_clears_slot() {
        let mut ac = AccessCategoryState::new(AccessCategory::Voice);
        ac.reset(AcState::LinkUp);
        ac.add_flow(Slot::First);
        ac.add_flow(Slot::First);
        ac.curr_tspec[0] = Some(TspecInfo::default());
        assert_eq!(ac.slot_status(), SlotMask::Slot1);

        ac.remove_flow(Slot::First);
        assert!(ac.curr_tspec(Slot::First).is_some());
        ac.remove_flow(Slot::First);
        assert_eq!(ac.slot_status(), SlotMask::None);
        assert!(ac.curr_tspec(Slot::First).is_none());
        ac.settle();
        assert_eq!(ac.state(), AcState::LinkUp);
    }

    #[test]
    fn reassoc_pending_forces_requested_on_resume() {
        let mut ac = AccessCategoryState::new(AccessCategory::Video);
        ac.reset(AcState::LinkUp);
        ac.reassoc_pending = true;
        ac.enter_handoff();
        assert_eq!(ac.state(), AcState::Handoff);
        assert_eq!(ac.previous_state(), AcState::Requested);
        ac.leave_handoff();
        assert_eq!(ac.state(), AcState::Requested);
    }

    #[test]
    fn inactive_ac_stays_out_of_handoff() {
        let mut ac = AccessCategoryState::new(AccessCategory::Background);
        ac.reset(AcState::Init);
        ac.enter_handoff();
        assert_eq!(ac.state(), AcState::Init);
    }
}
