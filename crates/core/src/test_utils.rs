//! Test doubles for driving the admission engine without a radio.
//!
//! [`MockTransport`] records every request the engine sends and can be told
//! to fail sends; [`CallbackRecorder`] collects flow notifications in order.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{
    client_events::{FlowCallback, FlowNotification, QosStatus},
    session::{AssociationSnapshot, PhyMode},
    transport::{AggregatedTspec, ExchangeId, QosTransport, RicIdentifier, TransportError},
    tspec::{Direction, TspecInfo},
    types::{AccessCategory, FlowId, SessionId, Slot, UapsdMask, UserPriority},
};

/// One request the engine handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentRequest {
    Addts {
        session: SessionId,
        ac: AccessCategory,
        tspec: TspecInfo,
        exchange: ExchangeId,
    },
    Delts {
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: TspecInfo,
    },
    AggregatedQos {
        session: SessionId,
        tspecs: Vec<AggregatedTspec>,
    },
    Ric {
        session: SessionId,
        tspec: TspecInfo,
        ric: RicIdentifier,
    },
    Reassoc {
        session: SessionId,
        uapsd: UapsdMask,
    },
}

/// Kinds of request a [`MockTransport`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Addts,
    Delts,
    AggregatedQos,
    Ric,
    Reassoc,
}

impl SentRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            SentRequest::Addts { .. } => RequestKind::Addts,
            SentRequest::Delts { .. } => RequestKind::Delts,
            SentRequest::AggregatedQos { .. } => RequestKind::AggregatedQos,
            SentRequest::Ric { .. } => RequestKind::Ric,
            SentRequest::Reassoc { .. } => RequestKind::Reassoc,
        }
    }
}

/// Transport that records requests instead of sending them. Clones share the
/// same log, so a test can keep one while the engine owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentRequest>>>,
    failing: Arc<Mutex<Vec<RequestKind>>>,
    next_exchange: Arc<AtomicU64>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later request of `kind` fail until [`Self::heal`].
    pub fn fail(&self, kind: RequestKind) {
        self.failing.lock().push(kind);
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: RequestKind) -> usize {
        self.sent.lock().iter().filter(|r| r.kind() == kind).count()
    }

    pub fn last(&self) -> Option<SentRequest> {
        self.sent.lock().last().cloned()
    }

    /// TSPEC of the most recent ADDTS.
    pub fn last_addts(&self) -> Option<TspecInfo> {
        self.sent.lock().iter().rev().find_map(|r| match r {
            SentRequest::Addts { tspec, .. } => Some(*tspec),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    fn check(&self, kind: RequestKind) -> Result<(), TransportError> {
        if self.failing.lock().contains(&kind) {
            return Err(TransportError::SendFailed(format!("{kind:?} refused by mock")));
        }
        Ok(())
    }

    fn record(&self, request: SentRequest) {
        self.sent.lock().push(request);
    }
}

impl QosTransport for MockTransport {
    fn send_addts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        tspec: &TspecInfo,
    ) -> Result<ExchangeId, TransportError> {
        self.check(RequestKind::Addts)?;
        let exchange = ExchangeId(self.next_exchange.fetch_add(1, Ordering::Relaxed));
        self.record(SentRequest::Addts {
            session,
            ac,
            tspec: *tspec,
            exchange,
        });
        Ok(exchange)
    }

    fn send_delts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: &TspecInfo,
    ) -> Result<(), TransportError> {
        self.check(RequestKind::Delts)?;
        self.record(SentRequest::Delts {
            session,
            ac,
            slot,
            tspec: *tspec,
        });
        Ok(())
    }

    fn send_aggregated_qos(
        &mut self,
        session: SessionId,
        tspecs: &[AggregatedTspec],
    ) -> Result<(), TransportError> {
        self.check(RequestKind::AggregatedQos)?;
        self.record(SentRequest::AggregatedQos {
            session,
            tspecs: tspecs.to_vec(),
        });
        Ok(())
    }

    fn send_ric(
        &mut self,
        session: SessionId,
        tspec: &TspecInfo,
    ) -> Result<RicIdentifier, TransportError> {
        self.check(RequestKind::Ric)?;
        let ric = RicIdentifier(self.count(RequestKind::Ric) as u8 + 1);
        self.record(SentRequest::Ric {
            session,
            tspec: *tspec,
            ric,
        });
        Ok(ric)
    }

    fn request_reassoc(&mut self, session: SessionId, uapsd: UapsdMask) -> Result<(), TransportError> {
        self.check(RequestKind::Reassoc)?;
        self.record(SentRequest::Reassoc { session, uapsd });
        Ok(())
    }
}

/// Collects the notifications of any number of flows.
#[derive(Clone, Default)]
pub struct CallbackRecorder {
    seen: Arc<Mutex<Vec<FlowNotification>>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> FlowCallback {
        let seen = self.seen.clone();
        FlowCallback::new(move |notification| seen.lock().push(notification))
    }

    pub fn all(&self) -> Vec<FlowNotification> {
        self.seen.lock().clone()
    }

    pub fn statuses(&self) -> Vec<QosStatus> {
        self.seen.lock().iter().map(|n| n.status).collect()
    }

    pub fn statuses_for(&self, flow: FlowId) -> Vec<QosStatus> {
        self.seen
            .lock()
            .iter()
            .filter(|n| n.flow_id == flow)
            .map(|n| n.status)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// TSPEC with only the fields the engine cares about set to round values.
pub fn tspec(up: u8, direction: Direction, mean_data_rate: u32) -> TspecInfo {
    let up = UserPriority::new(up).unwrap_or(UserPriority::BEST_EFFORT);
    let mut tspec = TspecInfo::default_for(up);
    tspec.ts_info.direction = direction;
    tspec.min_data_rate = 0;
    tspec.peak_data_rate = 0;
    tspec.mean_data_rate = mean_data_rate;
    tspec
}

pub fn voice_tspec(direction: Direction, mean_data_rate: u32) -> TspecInfo {
    tspec(6, direction, mean_data_rate)
}

pub fn with_psb(mut tspec: TspecInfo) -> TspecInfo {
    tspec.ts_info.psb = true;
    tspec
}

/// WMM association on an HT link, admission control on the given ACs.
pub fn association(acm: &[AccessCategory]) -> AssociationSnapshot {
    acm.iter().fold(
        AssociationSnapshot::new([0x02, 0, 0, 0, 0, 1]).with_phy(PhyMode::Ht),
        |snapshot, ac| snapshot.with_acm(*ac),
    )
}

pub fn voice() -> UserPriority {
    UserPriority::new(6).unwrap_or(UserPriority::BEST_EFFORT)
}

pub fn video() -> UserPriority {
    UserPriority::new(5).unwrap_or(UserPriority::BEST_EFFORT)
}
