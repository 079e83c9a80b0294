use std::time::Duration;

use tokio::{sync::mpsc, time::timeout};
use wmm_qos::{
    test_utils::{association, voice, voice_tspec, MockTransport, RequestKind},
    tspec::Direction,
    AccessCategory, FlowCallback, QosConfig, QosService, QosStatus, RequestStatus, SessionId,
    TransportEvent,
};

const SESSION: SessionId = SessionId(3);

#[tokio::test]
async fn transport_events_drive_pending_flows() -> testresult::TestResult {
    let transport = MockTransport::new();
    let service = QosService::new(QosConfig::default(), transport.clone());
    let (events_tx, events_rx) = mpsc::channel(16);
    let event_loop = service.spawn_event_loop(events_rx);

    service.open_session(SESSION);
    events_tx
        .send(TransportEvent::AssociationComplete {
            session: SESSION,
            snapshot: association(&[AccessCategory::Voice]),
        })
        .await?;

    let (notify_tx, mut notifications) = mpsc::unbounded_channel();
    // the association is applied by the loop; wait until the AC is usable
    let outcome = timeout(Duration::from_secs(5), async {
        loop {
            let attempt = service.setup_flow(
                SESSION,
                Some(voice_tspec(Direction::Uplink, 64_000)),
                voice(),
                FlowCallback::channel(notify_tx.clone()),
            );
            if let Ok(outcome) = attempt {
                break outcome;
            }
            tokio::task::yield_now().await;
        }
    })
    .await?;
    assert_eq!(outcome.status, RequestStatus::Pending);
    assert_eq!(transport.count(RequestKind::Addts), 1);

    events_tx
        .send(TransportEvent::AddtsResponse {
            session: SESSION,
            ac: AccessCategory::Voice,
            accepted: true,
            negotiated: transport.last_addts(),
        })
        .await?;
    let admitted = timeout(Duration::from_secs(5), notifications.recv())
        .await?
        .ok_or("notification channel closed")?;
    assert_eq!(admitted.flow_id, outcome.flow_id);
    assert_eq!(admitted.status, QosStatus::SetupSuccess);
    assert!(admitted.tspec.is_some());

    events_tx
        .send(TransportEvent::DeltsIndication {
            session: SESSION,
            ac: AccessCategory::Voice,
        })
        .await?;
    let lost = timeout(Duration::from_secs(5), notifications.recv())
        .await?
        .ok_or("notification channel closed")?;
    assert_eq!(lost.status, QosStatus::QosLost);
    assert_eq!(lost.status.error(), Some(wmm_qos::QosError::Lost));

    drop(events_tx);
    timeout(Duration::from_secs(5), event_loop).await??;
    service.with_engine(|engine| engine.check_invariants())?;
    assert!(service.with_engine(|engine| engine.flows().is_empty()));
    Ok(())
}

#[tokio::test]
async fn clones_share_one_engine() -> testresult::TestResult {
    let service = QosService::new(QosConfig::default(), MockTransport::new());
    let other = service.clone();
    service.open_session(SESSION);
    other.apply(TransportEvent::AssociationComplete {
        session: SESSION,
        snapshot: association(&[]),
    });

    let task = tokio::spawn(async move {
        other.setup_flow(SESSION, None, voice(), FlowCallback::noop())
    });
    let outcome = task.await??;
    assert_eq!(outcome.status, RequestStatus::Success);
    assert_eq!(service.with_engine(|engine| engine.flows().len()), 1);

    assert_eq!(service.release_flow(outcome.flow_id)?, RequestStatus::Success);
    service.close_session(SESSION)?;
    Ok(())
}
