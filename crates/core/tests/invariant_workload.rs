//! Random sequences of client requests and transport events against one
//! engine with two sessions. After every step the engine's bookkeeping must
//! be consistent and no flow may hear anything after it is gone.

use std::collections::HashSet;

use rand::{rngs::SmallRng, Rng, SeedableRng};
use wmm_qos::{
    session::{ExchangeVia, PhyMode},
    test_utils::{association, tspec, CallbackRecorder, MockTransport, SentRequest},
    tspec::Direction,
    types::UapsdMask,
    AccessCategory, AdmissionEngine, FlowId, QosConfig, QosStatus, SessionId, UserPriority,
};

const SESSIONS: [SessionId; 2] = [SessionId(1), SessionId(2)];
const STEPS: usize = 400;

struct Workload {
    rng: SmallRng,
    engine: AdmissionEngine<MockTransport>,
    transport: MockTransport,
    recorder: CallbackRecorder,
    handles: Vec<FlowId>,
    gone: HashSet<FlowId>,
    seen: usize,
}

impl Workload {
    fn new(seed: u64, config: QosConfig) -> Self {
        let transport = MockTransport::new();
        let mut workload = Self {
            rng: SmallRng::seed_from_u64(seed),
            engine: AdmissionEngine::new(config, transport.clone()),
            transport,
            recorder: CallbackRecorder::new(),
            handles: Vec::new(),
            gone: HashSet::new(),
            seen: 0,
        };
        for session in SESSIONS {
            workload.engine.open_session(session);
            workload.associate(session);
        }
        workload
    }

    fn session(&mut self) -> SessionId {
        SESSIONS[self.rng.gen_range(0..SESSIONS.len())]
    }

    fn ac(&mut self) -> AccessCategory {
        AccessCategory::ALL[self.rng.gen_range(0..AccessCategory::ALL.len())]
    }

    fn associate(&mut self, session: SessionId) {
        let acm: Vec<_> = AccessCategory::ALL
            .into_iter()
            .filter(|_| self.rng.gen_bool(0.5))
            .collect();
        let mut snapshot = association(&acm);
        if self.rng.gen_bool(0.7) {
            snapshot = snapshot.with_apsd();
        }
        if self.rng.gen_bool(0.5) {
            snapshot = snapshot.with_fast_transition();
        }
        if self.rng.gen_bool(0.2) {
            snapshot = snapshot.with_phy(PhyMode::Legacy);
        }
        self.engine.on_association_complete(session, snapshot);
    }

    fn setup(&mut self) {
        let session = self.session();
        let up = UserPriority::new(self.rng.gen_range(0..=7)).unwrap();
        let direction = match self.rng.gen_range(0..3) {
            0 => Direction::Uplink,
            1 => Direction::Downlink,
            _ => Direction::Bidirectional,
        };
        let requested = if self.rng.gen_bool(0.2) {
            None
        } else {
            let mut t = tspec(up.value(), direction, self.rng.gen_range(8_000..400_000));
            t.ts_info.psb = self.rng.gen_bool(0.3);
            Some(t)
        };
        if let Ok(outcome) = self
            .engine
            .setup_flow(session, requested, up, self.recorder.callback())
        {
            self.handles.push(outcome.flow_id);
        }
    }

    fn handle(&mut self) -> Option<FlowId> {
        if self.handles.is_empty() {
            return None;
        }
        Some(self.handles[self.rng.gen_range(0..self.handles.len())])
    }

    fn modify(&mut self) {
        let Some(id) = self.handle() else { return };
        let Some(mut t) = self.engine.flow(id).map(|f| f.tspec) else {
            return;
        };
        t.mean_data_rate = self.rng.gen_range(8_000..400_000);
        t.peak_data_rate = 0;
        t.min_data_rate = 0;
        let _ = self.engine.modify_flow(id, t);
    }

    fn release(&mut self) {
        if let Some(id) = self.handle() {
            let _ = self.engine.release_flow(id);
        }
    }

    /// Answers whatever exchange a session is waiting on, the way an AP would.
    fn respond(&mut self) {
        let session = self.session();
        let Some(state) = self.engine.session(session) else {
            return;
        };
        let pending = state
            .acs()
            .find_map(|ac| ac.pending().map(|p| (ac.ac(), p.via)));
        let Some((ac, via)) = pending else {
            return;
        };
        let accepted = self.rng.gen_bool(0.75);
        match via {
            ExchangeVia::Addts => {
                let granted = self.transport.last_addts();
                self.engine.on_addts_response(session, ac, accepted, granted);
            }
            ExchangeVia::Delts => self.engine.on_delts_response(session, ac),
            ExchangeVia::Reassoc => {
                let asked = self.transport.sent().into_iter().rev().find_map(|r| match r {
                    SentRequest::Reassoc { session: s, uapsd } if s == session => Some(uapsd),
                    _ => None,
                });
                self.engine
                    .on_reassoc_complete(session, accepted, asked.unwrap_or_default());
            }
        }
    }

    fn noise(&mut self) {
        let session = self.session();
        let ac = self.ac();
        match self.rng.gen_range(0..4) {
            0 => self.engine.on_addts_response(session, ac, true, None),
            1 => self.engine.on_delts_response(session, ac),
            2 => self.engine.on_delts_indication(session, ac),
            _ => self.engine.on_addts_response(SessionId(9), ac, true, None),
        }
    }

    fn roam(&mut self) {
        let session = self.session();
        let _ = self.engine.notify_handoff_started(session);
        if self.rng.gen_bool(0.5) {
            self.associate(session);
        }
    }

    fn finish_roam(&mut self) {
        let session = self.session();
        if self.rng.gen_bool(0.5) {
            let _ = self.engine.notify_handoff_complete(session);
        } else {
            let uapsd = self
                .engine
                .session(session)
                .map_or(UapsdMask::default(), |s| s.uapsd());
            let succeeded = self.rng.gen_bool(0.8);
            self.engine.on_reassoc_complete(session, succeeded, uapsd);
        }
    }

    fn reconnect(&mut self) {
        let session = self.session();
        if self.rng.gen_bool(0.5) {
            self.engine.on_disconnect(session);
        } else {
            self.engine.on_join_request(session);
        }
        if self.rng.gen_bool(0.8) {
            self.associate(session);
        }
    }

    fn step(&mut self) {
        match self.rng.gen_range(0..100) {
            0..=24 => self.setup(),
            25..=34 => self.modify(),
            35..=49 => self.release(),
            50..=79 => self.respond(),
            80..=86 => self.noise(),
            87..=91 => self.roam(),
            92..=96 => self.finish_roam(),
            _ => self.reconnect(),
        }
    }

    fn verify(&mut self, step: usize) {
        if let Err(violation) = self.engine.check_invariants() {
            panic!("step {step}: {violation}");
        }
        let notifications = self.recorder.all();
        for n in &notifications[self.seen..] {
            assert!(
                !self.gone.contains(&n.flow_id),
                "step {step}: flow {} notified {:?} after it was gone",
                n.flow_id,
                n.status
            );
            if matches!(
                n.status,
                QosStatus::ReleaseSuccess | QosStatus::QosLost | QosStatus::SetupFailure
            ) {
                self.gone.insert(n.flow_id);
            }
        }
        self.seen = notifications.len();
        for id in &self.gone {
            assert!(
                self.engine.flow(*id).is_none(),
                "step {step}: flow {id} still registered after it was gone"
            );
        }
    }
}

fn run(seed: u64, config: QosConfig) {
    let mut workload = Workload::new(seed, config);
    for step in 0..STEPS {
        workload.step();
        workload.verify(step);
    }
}

#[test]
fn random_workloads_keep_bookkeeping_consistent() {
    for seed in 0..24 {
        run(seed, QosConfig::default());
    }
}

#[test]
fn random_workloads_with_addts_everywhere() {
    let config = QosConfig {
        addts_when_acm_off: true,
        fast_transition: false,
        ..Default::default()
    };
    for seed in 100..116 {
        run(seed, config.clone());
    }
}

#[test]
fn random_workloads_with_default_power_save() {
    let config = QosConfig {
        default_uapsd_mask: UapsdMask(0x0f),
        ..Default::default()
    };
    for seed in 200..216 {
        run(seed, config.clone());
    }
}
