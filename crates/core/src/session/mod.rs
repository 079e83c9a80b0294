//! Per-session admission state: the four access categories, the U-APSD
//! bitmap, what we know about the current association and the commands
//! waiting for the session to become idle.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    command_buffer::CommandBuffer,
    types::{AccessCategory, SessionId, UapsdMask},
};

mod access_category;

pub use access_category::{AcState, AccessCategoryState, ExchangeVia, PendingExchange, PendingKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhyMode {
    #[default]
    Legacy,
    Ht,
    Vht,
}

/// Capabilities of the BSS the session is associated with, captured when the
/// association completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationSnapshot {
    pub bssid: [u8; 6],
    pub wmm: bool,
    /// Access categories on which the AP mandates admission control.
    pub acm: BTreeSet<AccessCategory>,
    /// The AP advertises U-APSD support.
    pub apsd: bool,
    pub phy: PhyMode,
    /// The association supports 802.11r fast transition.
    pub fast_transition: bool,
    /// U-APSD bitmap negotiated in the association request.
    pub uapsd: UapsdMask,
}

impl Default for AssociationSnapshot {
    fn default() -> Self {
        Self {
            bssid: [0; 6],
            wmm: true,
            acm: BTreeSet::new(),
            apsd: false,
            phy: PhyMode::Legacy,
            fast_transition: false,
            uapsd: UapsdMask::default(),
        }
    }
}

impl AssociationSnapshot {
    pub fn new(bssid: [u8; 6]) -> Self {
        Self {
            bssid,
            ..Default::default()
        }
    }

    pub fn with_acm(mut self, ac: AccessCategory) -> Self {
        self.acm.insert(ac);
        self
    }

    pub fn with_apsd(mut self) -> Self {
        self.apsd = true;
        self
    }

    pub fn with_phy(mut self, phy: PhyMode) -> Self {
        self.phy = phy;
        self
    }

    pub fn with_fast_transition(mut self) -> Self {
        self.fast_transition = true;
        self
    }

    pub fn with_uapsd(mut self, uapsd: UapsdMask) -> Self {
        self.uapsd = uapsd;
        self
    }

    pub fn without_wmm(mut self) -> Self {
        self.wmm = false;
        self
    }

    pub fn acm(&self, ac: AccessCategory) -> bool {
        self.acm.contains(&ac)
    }

    pub fn is_ht(&self) -> bool {
        matches!(self.phy, PhyMode::Ht | PhyMode::Vht)
    }
}

/// Roaming situation of a session. Exactly one applies at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandoffMode {
    #[default]
    Normal,
    LegacyHandoffPending,
    FastTransitionInProgress,
}

#[derive(Debug)]
pub struct SessionState {
    id: SessionId,
    acs: [AccessCategoryState; 4],
    pub(crate) uapsd: UapsdMask,
    pub(crate) assoc: Option<AssociationSnapshot>,
    pub(crate) buffered: CommandBuffer,
    pub(crate) handoff: HandoffMode,
}

impl SessionState {
    pub(crate) fn new(id: SessionId) -> Self {
        let mut session = Self {
            id,
            acs: AccessCategory::ALL.map(AccessCategoryState::new),
            uapsd: UapsdMask::default(),
            assoc: None,
            buffered: CommandBuffer::default(),
            handoff: HandoffMode::Normal,
        };
        session.reset_acs(AcState::Init);
        session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ac(&self, ac: AccessCategory) -> &AccessCategoryState {
        &self.acs[ac.index()]
    }

    pub(crate) fn ac_mut(&mut self, ac: AccessCategory) -> &mut AccessCategoryState {
        &mut self.acs[ac.index()]
    }

    pub fn acs(&self) -> impl Iterator<Item = &AccessCategoryState> {
        self.acs.iter()
    }

    pub(crate) fn acs_mut(&mut self) -> impl Iterator<Item = &mut AccessCategoryState> {
        self.acs.iter_mut()
    }

    pub fn uapsd(&self) -> UapsdMask {
        self.uapsd
    }

    pub fn association(&self) -> Option<&AssociationSnapshot> {
        self.assoc.as_ref()
    }

    pub fn handoff_mode(&self) -> HandoffMode {
        self.handoff
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    pub fn has_pending_exchange(&self) -> bool {
        self.acs.iter().any(|ac| ac.pending.is_some())
    }

    /// Whether a new request must wait in the command buffer.
    pub fn is_busy(&self) -> bool {
        self.handoff != HandoffMode::Normal
            || self.has_pending_exchange()
            || self.acs.iter().any(|ac| ac.state == AcState::Handoff)
    }

    pub(crate) fn reset_acs(&mut self, state: AcState) {
        for ac in self.acs.iter_mut() {
            ac.reset(state);
        }
    }
}
