//! Client facing notification types: what a flow owner is told and how.

use std::{fmt, sync::Arc};

use tokio::sync::mpsc;

use crate::{
    errors::QosError,
    tspec::TspecInfo,
    types::{AccessCategory, FlowId, SessionId},
};

/// Outcome delivered to the owner of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosStatus {
    SetupSuccess,
    /// Admitted; U-APSD delivery on the AC takes effect once the station
    /// enters power save.
    SetupSuccessApsdPending,
    SetupFailure,
    ModifySuccess,
    ModifyFailure,
    ReleaseSuccess,
    ReleaseFailure,
    /// Another flow sharing the TSPEC changed the negotiated aggregate.
    Modified,
    /// The AP or the link tore down the admitted TSPEC.
    QosLost,
}

impl QosStatus {
    pub fn error(self) -> Option<QosError> {
        match self {
            QosStatus::SetupFailure | QosStatus::ModifyFailure | QosStatus::ReleaseFailure => {
                Some(QosError::ProtocolRejected)
            }
            QosStatus::QosLost => Some(QosError::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowNotification {
    pub flow_id: FlowId,
    pub session: SessionId,
    pub ac: AccessCategory,
    pub status: QosStatus,
    /// The aggregate TSPEC in effect for the flow's slot, when there is one.
    pub tspec: Option<TspecInfo>,
}

/// Callback registered with a flow.
///
/// Invoked with the admission lock held: a callback must not call back into
/// the [`QosService`](crate::service::QosService). Use [`FlowCallback::channel`]
/// to hand notifications to another task instead.
#[derive(Clone)]
pub struct FlowCallback(Arc<dyn Fn(FlowNotification) + Send + Sync>);

impl FlowCallback {
    pub fn new(f: impl Fn(FlowNotification) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn channel(tx: mpsc::UnboundedSender<FlowNotification>) -> Self {
        Self::new(move |notification| {
            if tx.send(notification).is_err() {
                tracing::debug!("flow owner dropped its notification receiver");
            }
        })
    }

    /// Callback that ignores every notification.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub(crate) fn notify(&self, notification: FlowNotification) {
        (self.0)(notification)
    }
}

impl fmt::Debug for FlowCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FlowCallback")
    }
}

/// Synchronous result of a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Completed without an over-the-air exchange. The callback has already
    /// been invoked.
    Success,
    /// Waiting on a protocol exchange or queued behind one; the outcome
    /// arrives through the callback.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupOutcome {
    pub flow_id: FlowId,
    pub status: RequestStatus,
}
