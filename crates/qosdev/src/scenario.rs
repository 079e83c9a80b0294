//! Scenario files: a TOML list of client requests and transport events
//! replayed in order against one engine.
//!
//! ```toml
//! [[step]]
//! op = "open"
//! session = 1
//!
//! [[step]]
//! op = "associate"
//! session = 1
//! assoc = { acm = ["voice"], phy = "ht" }
//!
//! [[step]]
//! op = "setup"
//! session = 1
//! up = 6
//! direction = "uplink"
//! mean_rate = 64000
//! ```
//!
//! Flows are referred to by the position of the `setup` step that created
//! them, starting at 0.

use std::{fs, path::Path};

use anyhow::Context;
use serde::Deserialize;
use tokio::sync::mpsc;
use wmm_qos::{
    client_events::FlowNotification,
    session::AssociationSnapshot,
    tspec::{Direction, TspecInfo},
    types::UapsdMask,
    AccessCategory, FlowCallback, FlowId, InvariantViolation, QosConfig, QosService, SessionId,
    TransportEvent, UserPriority,
};

use crate::loopback::{self, LoopbackTransport};

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub engine: Option<QosConfig>,
    #[serde(default, rename = "step")]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid scenario {}", path.display()))
    }
}

fn accepted() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Open {
        session: u8,
    },
    Close {
        session: u8,
    },
    Associate {
        session: u8,
        #[serde(default)]
        assoc: Option<AssociationSnapshot>,
    },
    Setup {
        session: u8,
        up: u8,
        #[serde(default)]
        direction: Option<Direction>,
        #[serde(default)]
        mean_rate: Option<u32>,
        #[serde(default)]
        psb: bool,
    },
    Modify {
        flow: usize,
        mean_rate: u32,
    },
    Release {
        flow: usize,
    },
    AddtsResponse {
        session: u8,
        ac: AccessCategory,
        #[serde(default = "accepted")]
        accepted: bool,
    },
    DeltsResponse {
        session: u8,
        ac: AccessCategory,
    },
    DeltsIndication {
        session: u8,
        ac: AccessCategory,
    },
    HandoffStart {
        session: u8,
    },
    HandoffComplete {
        session: u8,
    },
    ReassocComplete {
        session: u8,
        #[serde(default = "accepted")]
        succeeded: bool,
        #[serde(default)]
        uapsd: u8,
    },
    Join {
        session: u8,
    },
    Disconnect {
        session: u8,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("step {step}: no flow was set up at position {index}")]
    UnknownFlow { step: usize, index: usize },
    #[error("step {step}: user priority {up} out of range")]
    InvalidPriority { step: usize, up: u8 },
    #[error("step {step}: inconsistent engine state: {source}")]
    Inconsistent {
        step: usize,
        #[source]
        source: InvariantViolation,
    },
}

/// Tally of a finished replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub steps: usize,
    pub notifications: usize,
    pub rejected_requests: usize,
}

pub struct Replay {
    service: QosService<LoopbackTransport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    notifications: mpsc::UnboundedReceiver<FlowNotification>,
    notify_tx: mpsc::UnboundedSender<FlowNotification>,
    flows: Vec<FlowId>,
    check: bool,
    summary: Summary,
}

impl Replay {
    pub fn new(config: QosConfig, auto_respond: bool, check: bool) -> Self {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let transport = LoopbackTransport::new(events_tx, auto_respond);
        Self {
            service: QosService::new(config, transport),
            events,
            notifications,
            notify_tx,
            flows: Vec::new(),
            check,
            summary: Summary::default(),
        }
    }

    pub fn run(mut self, steps: &[Step]) -> Result<Summary, ReplayError> {
        for (index, step) in steps.iter().enumerate() {
            println!("[{index}] {step:?}");
            self.step(index, step)?;
            self.pump();
            if self.check {
                self.service
                    .with_engine(|engine| engine.check_invariants())
                    .map_err(|source| ReplayError::Inconsistent { step: index, source })?;
            }
            self.summary.steps += 1;
        }
        Ok(self.summary)
    }

    fn flow(&self, step: usize, index: usize) -> Result<FlowId, ReplayError> {
        self.flows
            .get(index)
            .copied()
            .ok_or(ReplayError::UnknownFlow { step, index })
    }

    fn step(&mut self, index: usize, step: &Step) -> Result<(), ReplayError> {
        let outcome = match step {
            Step::Open { session } => {
                self.service.open_session(SessionId(*session));
                Ok(String::new())
            }
            Step::Close { session } => self
                .service
                .close_session(SessionId(*session))
                .map(|()| String::new()),
            Step::Associate { session, assoc } => {
                let snapshot = assoc.clone().unwrap_or_else(loopback::default_association);
                self.service.apply(TransportEvent::AssociationComplete {
                    session: SessionId(*session),
                    snapshot,
                });
                Ok(String::new())
            }
            Step::Setup {
                session,
                up,
                direction,
                mean_rate,
                psb,
            } => {
                let priority = UserPriority::new(*up)
                    .ok_or(ReplayError::InvalidPriority { step: index, up: *up })?;
                let tspec = (direction.is_some() || mean_rate.is_some() || *psb).then(|| {
                    let mut tspec = TspecInfo::default_for(priority);
                    if let Some(direction) = direction {
                        tspec.ts_info.direction = *direction;
                    }
                    if let Some(rate) = mean_rate {
                        tspec.mean_data_rate = *rate;
                        tspec.peak_data_rate = 0;
                    }
                    tspec.ts_info.psb = *psb;
                    tspec
                });
                let callback = FlowCallback::channel(self.notify_tx.clone());
                let result = self
                    .service
                    .setup_flow(SessionId(*session), tspec, priority, callback);
                if let Ok(outcome) = &result {
                    self.flows.push(outcome.flow_id);
                }
                result.map(|o| format!("flow {} {:?}", o.flow_id, o.status))
            }
            Step::Modify { flow, mean_rate } => {
                let id = self.flow(index, *flow)?;
                let current = self.service.with_engine(|engine| engine.flow(id).map(|f| f.tspec));
                match current {
                    Some(mut tspec) => {
                        tspec.mean_data_rate = *mean_rate;
                        tspec.peak_data_rate = 0;
                        self.service.modify_flow(id, tspec).map(|s| format!("{s:?}"))
                    }
                    None => Err(wmm_qos::QosError::FlowNotFound(id)),
                }
            }
            Step::Release { flow } => {
                let id = self.flow(index, *flow)?;
                self.service.release_flow(id).map(|s| format!("{s:?}"))
            }
            Step::AddtsResponse {
                session,
                ac,
                accepted,
            } => {
                self.service.apply(TransportEvent::AddtsResponse {
                    session: SessionId(*session),
                    ac: *ac,
                    accepted: *accepted,
                    negotiated: None,
                });
                Ok(String::new())
            }
            Step::DeltsResponse { session, ac } => {
                self.service.apply(TransportEvent::DeltsResponse {
                    session: SessionId(*session),
                    ac: *ac,
                });
                Ok(String::new())
            }
            Step::DeltsIndication { session, ac } => {
                self.service.apply(TransportEvent::DeltsIndication {
                    session: SessionId(*session),
                    ac: *ac,
                });
                Ok(String::new())
            }
            Step::HandoffStart { session } => self
                .service
                .notify_handoff_started(SessionId(*session))
                .map(|()| String::new()),
            Step::HandoffComplete { session } => self
                .service
                .notify_handoff_complete(SessionId(*session))
                .map(|()| String::new()),
            Step::ReassocComplete {
                session,
                succeeded,
                uapsd,
            } => {
                self.service.apply(TransportEvent::ReassocComplete {
                    session: SessionId(*session),
                    succeeded: *succeeded,
                    uapsd: UapsdMask(*uapsd),
                });
                Ok(String::new())
            }
            Step::Join { session } => {
                self.service.apply(TransportEvent::JoinRequest {
                    session: SessionId(*session),
                });
                Ok(String::new())
            }
            Step::Disconnect { session } => {
                self.service.apply(TransportEvent::Disconnect {
                    session: SessionId(*session),
                });
                Ok(String::new())
            }
        };
        match outcome {
            Ok(result) if result.is_empty() => {}
            Ok(result) => println!("  = {result}"),
            Err(err) => {
                self.summary.rejected_requests += 1;
                println!("  ! {err}");
            }
        }
        Ok(())
    }

    /// Applies queued loopback answers and prints notifications until both
    /// channels are quiet.
    fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(notification) = self.notifications.try_recv() {
                progressed = true;
                self.summary.notifications += 1;
                println!(
                    "  <- flow {} {} {:?}{}",
                    notification.flow_id,
                    notification.ac,
                    notification.status,
                    notification
                        .tspec
                        .map(|t| format!(" [{}]", loopback::describe(&t)))
                        .unwrap_or_default()
                );
            }
            if let Ok(event) = self.events.try_recv() {
                progressed = true;
                tracing::debug!(session = %event.session(), ?event, "loopback answer");
                self.service.apply(event);
            }
            if !progressed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOICE_ACM: &str = r#"
        [engine]
        fast_transition = false

        [[step]]
        op = "open"
        session = 1

        [[step]]
        op = "associate"
        session = 1
        assoc = { acm = ["voice"], phy = "ht" }

        [[step]]
        op = "setup"
        session = 1
        up = 6
        direction = "uplink"
        mean_rate = 64000

        [[step]]
        op = "addts_response"
        session = 1
        ac = "voice"

        [[step]]
        op = "release"
        flow = 0

        [[step]]
        op = "delts_response"
        session = 1
        ac = "voice"
    "#;

    #[test]
    fn parses_steps_and_engine_table() -> testresult::TestResult {
        let scenario: Scenario = toml::from_str(VOICE_ACM)?;
        assert_eq!(scenario.steps.len(), 6);
        assert_eq!(scenario.engine.map(|c| c.fast_transition), Some(false));
        assert!(matches!(
            scenario.steps[3],
            Step::AddtsResponse { accepted: true, .. }
        ));
        Ok(())
    }

    #[test]
    fn replays_voice_admission() -> testresult::TestResult {
        let scenario: Scenario = toml::from_str(VOICE_ACM)?;
        let summary = Replay::new(scenario.engine.unwrap_or_default(), false, true).run(&scenario.steps)?;
        assert_eq!(summary.steps, 6);
        // SetupSuccess then ReleaseSuccess
        assert_eq!(summary.notifications, 2);
        assert_eq!(summary.rejected_requests, 0);
        Ok(())
    }

    #[test]
    fn auto_respond_completes_exchanges() -> testresult::TestResult {
        let steps: Vec<Step> = toml::from_str::<Scenario>(VOICE_ACM)?
            .steps
            .into_iter()
            .filter(|s| !matches!(s, Step::AddtsResponse { .. } | Step::DeltsResponse { .. }))
            .collect();
        let summary = Replay::new(QosConfig::default(), true, true).run(&steps)?;
        assert_eq!(summary.notifications, 2);
        Ok(())
    }

    #[test]
    fn modify_raises_rate_past_default_peak() -> testresult::TestResult {
        let scenario: Scenario = toml::from_str(
            r#"
            [[step]]
            op = "open"
            session = 1

            [[step]]
            op = "associate"
            session = 1

            [[step]]
            op = "setup"
            session = 1
            up = 5

            [[step]]
            op = "modify"
            flow = 0
            mean_rate = 3000000
        "#,
        )?;
        let summary = Replay::new(QosConfig::default(), false, true).run(&scenario.steps)?;
        assert_eq!(summary.rejected_requests, 0);
        // SetupSuccess then ModifySuccess
        assert_eq!(summary.notifications, 2);
        Ok(())
    }

    #[test]
    fn unknown_flow_stops_replay() {
        let steps = vec![Step::Release { flow: 3 }];
        let err = Replay::new(QosConfig::default(), false, true).run(&steps);
        assert!(matches!(err, Err(ReplayError::UnknownFlow { index: 3, .. })));
    }
}
