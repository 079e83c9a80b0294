//! Boundary with the MAC layer that actually puts ADDTS, DELTS and
//! reassociation frames on the air.
//!
//! The engine only talks to the radio through [`QosTransport`]; replies come
//! back as [`TransportEvent`]s, either applied directly on the engine or fed
//! through the [`QosService`](crate::service::QosService) event loop.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    session::AssociationSnapshot,
    tspec::TspecInfo,
    types::{AccessCategory, SessionId, Slot, UapsdMask},
};

/// Identifier the transport assigns to an outgoing ADDTS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub u64);

impl Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a resource information container built for a fast
/// transition reassociation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RicIdentifier(pub u8);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,
    #[error("failed to queue frame: {0}")]
    SendFailed(String),
}

/// TSPEC carried inside an aggregated fast transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedTspec {
    pub ac: AccessCategory,
    pub slot: Slot,
    pub tspec: TspecInfo,
    pub ric: Option<RicIdentifier>,
}

/// Send side of the MAC collaborator.
///
/// Calls are made while the admission lock is held and must not block. A
/// returned error means nothing was queued; the engine leaves its state as it
/// was before the call.
pub trait QosTransport: Send {
    fn send_addts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        tspec: &TspecInfo,
    ) -> Result<ExchangeId, TransportError>;

    fn send_delts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: &TspecInfo,
    ) -> Result<(), TransportError>;

    /// Pushes every negotiated TSPEC of the session in one 802.11r
    /// reassociation.
    fn send_aggregated_qos(
        &mut self,
        session: SessionId,
        tspecs: &[AggregatedTspec],
    ) -> Result<(), TransportError>;

    fn send_ric(
        &mut self,
        session: SessionId,
        tspec: &TspecInfo,
    ) -> Result<RicIdentifier, TransportError>;

    /// Reassociates with the current AP advertising `uapsd` in the QoS-info.
    fn request_reassoc(&mut self, session: SessionId, uapsd: UapsdMask)
        -> Result<(), TransportError>;
}

/// Receive side of the MAC collaborator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    AddtsResponse {
        session: SessionId,
        ac: AccessCategory,
        accepted: bool,
        negotiated: Option<TspecInfo>,
    },
    DeltsResponse {
        session: SessionId,
        ac: AccessCategory,
    },
    /// The AP tore down the admitted traffic of this AC.
    DeltsIndication {
        session: SessionId,
        ac: AccessCategory,
    },
    ReassocComplete {
        session: SessionId,
        succeeded: bool,
        uapsd: UapsdMask,
    },
    AssociationComplete {
        session: SessionId,
        snapshot: AssociationSnapshot,
    },
    JoinRequest {
        session: SessionId,
    },
    Disconnect {
        session: SessionId,
    },
}

impl TransportEvent {
    pub fn session(&self) -> SessionId {
        match self {
            TransportEvent::AddtsResponse { session, .. }
            | TransportEvent::DeltsResponse { session, .. }
            | TransportEvent::DeltsIndication { session, .. }
            | TransportEvent::ReassocComplete { session, .. }
            | TransportEvent::AssociationComplete { session, .. }
            | TransportEvent::JoinRequest { session }
            | TransportEvent::Disconnect { session } => *session,
        }
    }
}
