/// Admission decisions and the per access category state machines.
pub mod admission;

/// Flow notifications and the callbacks that carry them.
pub mod client_events;

/// Requests parked while a session waits on the air.
pub mod command_buffer;

/// Engine configuration and logger setup.
pub mod config;

pub mod errors;

/// Application flows and the registry that indexes them.
pub mod flow;

/// The lock-holding handle shared by clients and the transport event loop.
pub mod service;

/// Per session state: access categories, association and roaming mode.
pub mod session;

/// Mock transport and fixtures for exercising the engine in tests.
pub mod test_utils;

/// Tracing subscriber setup.
#[cfg_attr(test, allow(dead_code))]
pub mod tracing;

/// Boundary with the MAC layer.
pub mod transport;

/// Traffic specifications and their aggregation.
pub mod tspec;

pub mod types;

pub use admission::{AdmissionEngine, InvariantViolation};
pub use client_events::{FlowCallback, FlowNotification, QosStatus, RequestStatus, SetupOutcome};
pub use config::QosConfig;
pub use errors::{InvalidParam, QosError, Unsupported};
pub use service::QosService;
pub use transport::{QosTransport, TransportError, TransportEvent};
pub use tspec::TspecInfo;
pub use types::{AccessCategory, FlowId, SessionId, Slot, UserPriority};
