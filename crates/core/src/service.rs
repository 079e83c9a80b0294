//! Shared handle over one admission engine.
//!
//! All client requests and transport events are serialized through a single
//! lock; the engine never blocks while holding it, so request latency is
//! bounded by the transport's send calls.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    admission::AdmissionEngine,
    client_events::{FlowCallback, RequestStatus, SetupOutcome},
    config::QosConfig,
    errors::QosError,
    transport::{QosTransport, TransportEvent},
    tspec::TspecInfo,
    types::{FlowId, SessionId, UserPriority},
};

pub struct QosService<T> {
    engine: Arc<Mutex<AdmissionEngine<T>>>,
}

impl<T> Clone for QosService<T> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<T: QosTransport + 'static> QosService<T> {
    pub fn new(config: QosConfig, transport: T) -> Self {
        Self {
            engine: Arc::new(Mutex::new(AdmissionEngine::new(config, transport))),
        }
    }

    /// Runs `f` with the admission lock held.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut AdmissionEngine<T>) -> R) -> R {
        f(&mut self.engine.lock())
    }

    pub fn open_session(&self, session: SessionId) {
        self.engine.lock().open_session(session)
    }

    pub fn close_session(&self, session: SessionId) -> Result<(), QosError> {
        self.engine.lock().close_session(session)
    }

    pub fn setup_flow(
        &self,
        session: SessionId,
        tspec: Option<TspecInfo>,
        up: UserPriority,
        callback: FlowCallback,
    ) -> Result<SetupOutcome, QosError> {
        self.engine.lock().setup_flow(session, tspec, up, callback)
    }

    pub fn modify_flow(&self, flow: FlowId, tspec: TspecInfo) -> Result<RequestStatus, QosError> {
        self.engine.lock().modify_flow(flow, tspec)
    }

    pub fn release_flow(&self, flow: FlowId) -> Result<RequestStatus, QosError> {
        self.engine.lock().release_flow(flow)
    }

    pub fn notify_handoff_started(&self, session: SessionId) -> Result<(), QosError> {
        self.engine.lock().notify_handoff_started(session)
    }

    pub fn notify_handoff_complete(&self, session: SessionId) -> Result<(), QosError> {
        self.engine.lock().notify_handoff_complete(session)
    }

    pub fn apply(&self, event: TransportEvent) {
        self.engine.lock().handle_event(event)
    }

    /// Applies transport events until every sender is dropped.
    pub async fn run_event_loop(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            tracing::trace!(session = %event.session(), ?event, "transport event");
            self.apply(event);
        }
        tracing::debug!("transport event channel closed, stopping qos event loop");
    }

    pub fn spawn_event_loop(&self, events: mpsc::Receiver<TransportEvent>) -> JoinHandle<()> {
        tokio::spawn(self.clone().run_event_loop(events))
    }
}
