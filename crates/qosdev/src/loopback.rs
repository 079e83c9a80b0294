//! Transport that prints requests instead of putting them on the air and,
//! when asked to, answers them like a permissive access point.

use std::fmt::Write;

use tokio::sync::mpsc;
use wmm_qos::{
    session::AssociationSnapshot,
    transport::{AggregatedTspec, ExchangeId, RicIdentifier},
    tspec::TspecInfo,
    types::{Slot, UapsdMask},
    AccessCategory, QosTransport, SessionId, TransportError, TransportEvent,
};

pub struct LoopbackTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    auto_respond: bool,
    next_exchange: u64,
    next_ric: u8,
}

impl LoopbackTransport {
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>, auto_respond: bool) -> Self {
        Self {
            events,
            auto_respond,
            next_exchange: 0,
            next_ric: 1,
        }
    }

    fn respond(&self, event: TransportEvent) -> Result<(), TransportError> {
        if !self.auto_respond {
            return Ok(());
        }
        self.events.send(event).map_err(|_| TransportError::Closed)
    }
}

pub(crate) fn describe(tspec: &TspecInfo) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "up={} dir={:?} psb={} mean={} min={} peak={} msdu={}",
        tspec.ts_info.up.value(),
        tspec.direction(),
        tspec.psb(),
        tspec.mean_data_rate,
        tspec.min_data_rate,
        tspec.peak_data_rate,
        tspec.nominal_msdu_size,
    );
    out
}

impl QosTransport for LoopbackTransport {
    fn send_addts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        tspec: &TspecInfo,
    ) -> Result<ExchangeId, TransportError> {
        let exchange = ExchangeId(self.next_exchange);
        self.next_exchange += 1;
        println!("  -> ADDTS  session={session} {ac} exchange={exchange} {}", describe(tspec));
        self.respond(TransportEvent::AddtsResponse {
            session,
            ac,
            accepted: true,
            negotiated: None,
        })?;
        Ok(exchange)
    }

    fn send_delts(
        &mut self,
        session: SessionId,
        ac: AccessCategory,
        slot: Slot,
        tspec: &TspecInfo,
    ) -> Result<(), TransportError> {
        println!("  -> DELTS  session={session} {ac} {slot} {}", describe(tspec));
        self.respond(TransportEvent::DeltsResponse { session, ac })
    }

    fn send_aggregated_qos(
        &mut self,
        session: SessionId,
        tspecs: &[AggregatedTspec],
    ) -> Result<(), TransportError> {
        println!("  -> AGGREGATED QOS session={session} tspecs={}", tspecs.len());
        for entry in tspecs {
            println!("       {} {} ric={:?} {}", entry.ac, entry.slot, entry.ric, describe(&entry.tspec));
        }
        Ok(())
    }

    fn send_ric(
        &mut self,
        session: SessionId,
        tspec: &TspecInfo,
    ) -> Result<RicIdentifier, TransportError> {
        let ric = RicIdentifier(self.next_ric);
        self.next_ric = self.next_ric.wrapping_add(1).max(1);
        println!("  -> RIC    session={session} ric={} {}", ric.0, describe(tspec));
        Ok(ric)
    }

    fn request_reassoc(&mut self, session: SessionId, uapsd: UapsdMask) -> Result<(), TransportError> {
        println!("  -> REASSOC session={session} uapsd={uapsd}");
        self.respond(TransportEvent::ReassocComplete {
            session,
            succeeded: true,
            uapsd,
        })
    }
}

/// Association used by scenarios that do not describe one.
pub(crate) fn default_association() -> AssociationSnapshot {
    AssociationSnapshot::new([0x02, 0, 0, 0, 0, 1])
}
