use thiserror::Error;

use crate::{
    transport::TransportError,
    types::{FlowId, SessionId},
};

/// Errors returned synchronously by the client entry points of the engine.
///
/// `ProtocolRejected` and `Lost` are never returned from a call; they describe
/// outcomes delivered later through a flow callback (see
/// [`QosStatus::error`](crate::client_events::QosStatus::error)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QosError {
    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] InvalidParam),
    #[error("flow {0} not found")]
    FlowNotFound(FlowId),
    #[error("session {0} is not open")]
    SessionNotFound(SessionId),
    #[error("unsupported: {0}")]
    Unsupported(Unsupported),
    #[error("request leaves the flow unchanged")]
    Unchanged,
    #[error("request rejected by the access point")]
    ProtocolRejected,
    #[error("admitted traffic specification lost")]
    Lost,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidParam {
    #[error("reserved traffic direction")]
    ReservedDirection,
    #[error("tid {0} out of range")]
    Tid(u8),
    #[error("HT immediate block-ack requested on a non-HT link")]
    BlockAckWithoutHt,
    #[error("nominal MSDU size {nominal} exceeds maximum {max}")]
    MsduSize { nominal: u16, max: u16 },
    #[error("minimum service interval {min} exceeds maximum {max}")]
    ServiceInterval { min: u32, max: u32 },
    #[error("data rates must satisfy min <= mean <= peak")]
    DataRateOrder,
    #[error("direction cannot change on modify")]
    DirectionChanged,
    #[error("tid cannot change on modify")]
    TidChanged,
    #[error("user priority cannot change on modify")]
    PriorityChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("station is not associated")]
    NotAssociated,
    #[error("access point does not support WMM")]
    NoWmm,
    #[error("WMM is disabled by configuration")]
    WmmDisabled,
    #[error("access point does not support APSD")]
    NoApsd,
}
