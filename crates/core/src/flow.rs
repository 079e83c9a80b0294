//! Registry of application flows and their handles.

use std::collections::BTreeMap;

use crate::{
    client_events::{FlowCallback, FlowNotification, QosStatus},
    tspec::{Direction, TspecInfo},
    types::{AccessCategory, FlowId, SessionId, Slot},
};

/// Why a flow is currently in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowReason {
    /// Waiting for its first admission.
    Setup,
    /// Release requested, waiting for the exchange that removes it.
    Release,
    /// Original entry of a modify in progress.
    Modify,
    /// Shadow entry carrying the new parameters of a modify in progress.
    ModifyPending,
    Succeeded,
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub id: FlowId,
    pub session: SessionId,
    pub ac: AccessCategory,
    pub slot: Slot,
    pub tspec: TspecInfo,
    pub reason: FlowReason,
    /// Being re-admitted after a roam; completion is not reported.
    pub handoff_renewal: bool,
    pub(crate) callback: FlowCallback,
}

impl Flow {
    pub(crate) fn new(
        id: FlowId,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: TspecInfo,
        reason: FlowReason,
        callback: FlowCallback,
    ) -> Self {
        Self {
            id,
            session,
            ac,
            slot,
            tspec,
            reason,
            handoff_renewal: false,
            callback,
        }
    }

    pub fn direction(&self) -> Direction {
        self.tspec.direction()
    }

    /// Entries the client can address (shadow entries are internal).
    pub fn is_client_visible(&self) -> bool {
        self.reason != FlowReason::ModifyPending
    }

    pub(crate) fn notify(&self, status: QosStatus, tspec: Option<TspecInfo>) {
        tracing::debug!(
            flow = %self.id,
            session = %self.session,
            ac = %self.ac,
            ?status,
            "notifying flow owner"
        );
        self.callback.notify(FlowNotification {
            flow_id: self.id,
            session: self.session,
            ac: self.ac,
            status,
            tspec,
        });
    }
}

/// All flows known to one engine, ordered by id.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: BTreeMap<FlowId, Flow>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn contains(&self, id: FlowId) -> bool {
        self.flows.contains_key(&id)
    }

    pub fn get(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(&id)
    }

    /// Looks up a handle the client holds; internal shadow entries never match.
    pub fn client_flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id).filter(|f| f.is_client_visible())
    }

    pub(crate) fn insert(&mut self, flow: Flow) {
        let previous = self.flows.insert(flow.id, flow);
        debug_assert!(previous.is_none(), "flow id reused while live");
    }

    pub(crate) fn remove(&mut self, id: FlowId) -> Option<Flow> {
        self.flows.remove(&id)
    }

    /// Moves an entry to a new id, used when a modify shadow takes over the
    /// handle of the flow it replaces.
    pub(crate) fn rekey(&mut self, from: FlowId, to: FlowId) -> Option<&mut Flow> {
        if self.flows.contains_key(&to) {
            return None;
        }
        let mut flow = self.flows.remove(&from)?;
        flow.id = to;
        self.flows.insert(to, flow);
        self.flows.get_mut(&to)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn for_session(&self, session: SessionId) -> impl Iterator<Item = &Flow> {
        self.flows.values().filter(move |f| f.session == session)
    }

    pub fn on_ac(&self, session: SessionId, ac: AccessCategory) -> impl Iterator<Item = &Flow> {
        self.for_session(session).filter(move |f| f.ac == ac)
    }

    pub fn on_slot(
        &self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
    ) -> impl Iterator<Item = &Flow> {
        self.on_ac(session, ac).filter(move |f| f.slot == slot)
    }

    pub fn with_reason(
        &self,
        session: SessionId,
        ac: AccessCategory,
        reason: FlowReason,
    ) -> impl Iterator<Item = &Flow> {
        self.on_ac(session, ac).filter(move |f| f.reason == reason)
    }

    pub fn count_on_slot(&self, session: SessionId, ac: AccessCategory, slot: Slot) -> usize {
        self.on_slot(session, ac, slot).count()
    }

    pub(crate) fn ids_on_slot(&self, session: SessionId, ac: AccessCategory, slot: Slot) -> Vec<FlowId> {
        self.on_slot(session, ac, slot).map(|f| f.id).collect()
    }

    pub(crate) fn ids_on_ac(&self, session: SessionId, ac: AccessCategory) -> Vec<FlowId> {
        self.on_ac(session, ac).map(|f| f.id).collect()
    }

    pub(crate) fn ids_for_session(&self, session: SessionId) -> Vec<FlowId> {
        self.for_session(session).map(|f| f.id).collect()
    }

    /// Aggregate TSPEC of the flows on a slot that count towards admission,
    /// i.e. excluding originals of a modify and flows on their way out.
    pub fn slot_aggregate(
        &self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
    ) -> Option<TspecInfo> {
        TspecInfo::aggregate_all(
            self.on_slot(session, ac, slot)
                .filter(|f| !matches!(f.reason, FlowReason::Modify | FlowReason::Release))
                .map(|f| &f.tspec),
        )
    }
}

/// Hands out flow ids in sequence, skipping those still in use.
#[derive(Debug)]
pub struct FlowIdAllocator {
    next: FlowId,
}

impl Default for FlowIdAllocator {
    fn default() -> Self {
        Self {
            next: FlowId::FIRST,
        }
    }
}

impl FlowIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the sequence at `next`, for wrap-around tests.
    #[cfg(test)]
    pub(crate) fn starting_at(next: FlowId) -> Self {
        Self { next }
    }

    /// Returns the next id for which `in_use` is false.
    pub fn allocate(&mut self, in_use: impl Fn(FlowId) -> bool) -> FlowId {
        let mut candidate = self.next;
        while in_use(candidate) {
            candidate = candidate.successor();
        }
        self.next = candidate.successor();
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserPriority;

    fn flow(id: u32, ac: AccessCategory, slot: Slot, reason: FlowReason) -> Flow {
        Flow::new(
            FlowId::new(id),
            SessionId(0),
            ac,
            slot,
            TspecInfo::default_for(UserPriority::new(6).unwrap()),
            reason,
            FlowCallback::noop(),
        )
    }

    #[test]
    fn allocator_skips_live_ids_and_wraps() {
        let mut alloc = FlowIdAllocator::starting_at(FlowId::new(u32::MAX - 2));
        let live = [FlowId::new(u32::MAX - 1), FlowId::new(1)];
        let first = alloc.allocate(|id| live.contains(&id));
        assert_eq!(first, FlowId::new(u32::MAX - 2));
        let second = alloc.allocate(|id| live.contains(&id));
        assert_eq!(second, FlowId::new(2));
        assert!(second.is_valid());
    }

    #[test]
    fn queries_filter_by_slot_and_reason() {
        let mut registry = FlowRegistry::new();
        registry.insert(flow(1, AccessCategory::Voice, Slot::First, FlowReason::Succeeded));
        registry.insert(flow(2, AccessCategory::Voice, Slot::Second, FlowReason::Setup));
        registry.insert(flow(3, AccessCategory::Video, Slot::First, FlowReason::Succeeded));
        registry.insert(flow(4, AccessCategory::Voice, Slot::First, FlowReason::Modify));

        let session = SessionId(0);
        assert_eq!(registry.count_on_slot(session, AccessCategory::Voice, Slot::First), 2);
        assert_eq!(registry.on_ac(session, AccessCategory::Voice).count(), 3);
        assert_eq!(
            registry
                .with_reason(session, AccessCategory::Voice, FlowReason::Setup)
                .map(|f| f.id)
                .collect::<Vec<_>>(),
            vec![FlowId::new(2)]
        );
        let agg = registry
            .slot_aggregate(session, AccessCategory::Voice, Slot::First)
            .unwrap();
        assert_eq!(agg.mean_data_rate, 83_200);
    }

    #[test]
    fn rekey_moves_entry_to_free_id() {
        let mut registry = FlowRegistry::new();
        registry.insert(flow(10, AccessCategory::Voice, Slot::First, FlowReason::ModifyPending));
        registry.insert(flow(11, AccessCategory::Voice, Slot::First, FlowReason::Modify));
        assert!(registry.rekey(FlowId::new(10), FlowId::new(11)).is_none());
        registry.remove(FlowId::new(11));
        let moved = registry.rekey(FlowId::new(10), FlowId::new(11)).unwrap();
        assert_eq!(moved.id, FlowId::new(11));
        assert!(!registry.contains(FlowId::new(10)));
        assert!(registry.client_flow(FlowId::new(11)).is_none());
    }
}
