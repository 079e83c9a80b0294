//! Identifiers and small value types shared by every layer of the engine.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Identifier of one station session (one association context on one interface).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u8);

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned to the client for every QoS request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowId(u32);

impl FlowId {
    /// Sentinel never handed out to a client.
    pub const INVALID: Self = FlowId(u32::MAX);

    pub(crate) const FIRST: Self = FlowId(1);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 != 0 && self != Self::INVALID
    }

    /// Next id in sequence, skipping `0` and the sentinel on wrap-around.
    pub(crate) fn successor(self) -> Self {
        match self.0.wrapping_add(1) {
            0 | u32::MAX => Self::FIRST,
            n => FlowId(n),
        }
    }
}

impl Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The four WMM access categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessCategory {
    BestEffort = 0,
    Background = 1,
    Video = 2,
    Voice = 3,
}

impl AccessCategory {
    pub const ALL: [AccessCategory; 4] = [
        AccessCategory::BestEffort,
        AccessCategory::Background,
        AccessCategory::Video,
        AccessCategory::Voice,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Bit of this AC inside the WMM QoS-info U-APSD field.
    pub fn uapsd_bit(self) -> u8 {
        match self {
            AccessCategory::Voice => 0x01,
            AccessCategory::Video => 0x02,
            AccessCategory::Background => 0x04,
            AccessCategory::BestEffort => 0x08,
        }
    }
}

impl Display for AccessCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AccessCategory::BestEffort => "AC_BE",
            AccessCategory::Background => "AC_BK",
            AccessCategory::Video => "AC_VI",
            AccessCategory::Voice => "AC_VO",
        };
        f.write_str(name)
    }
}

/// 802.1D user priority, 0 to 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct UserPriority(u8);

impl UserPriority {
    pub const MAX: u8 = 7;
    pub const BEST_EFFORT: UserPriority = UserPriority(0);

    pub fn new(up: u8) -> Option<Self> {
        (up <= Self::MAX).then_some(UserPriority(up))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn access_category(self) -> AccessCategory {
        match self.0 {
            0 | 3 => AccessCategory::BestEffort,
            1 | 2 => AccessCategory::Background,
            4 | 5 => AccessCategory::Video,
            _ => AccessCategory::Voice,
        }
    }
}

impl TryFrom<u8> for UserPriority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        UserPriority::new(value).ok_or_else(|| format!("user priority {value} out of range"))
    }
}

impl From<UserPriority> for u8 {
    fn from(up: UserPriority) -> u8 {
        up.0
    }
}

/// One of the two TSPEC negotiation slots of an access category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    First,
    Second,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::First, Slot::Second];

    pub(crate) fn index(self) -> usize {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::First => f.write_str("slot1"),
            Slot::Second => f.write_str("slot2"),
        }
    }
}

/// Which slots of an access category currently carry flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotMask {
    #[default]
    None,
    Slot1,
    Slot2,
    Both,
}

impl SlotMask {
    pub fn contains(self, slot: Slot) -> bool {
        matches!(
            (self, slot),
            (SlotMask::Both, _) | (SlotMask::Slot1, Slot::First) | (SlotMask::Slot2, Slot::Second)
        )
    }

    #[must_use]
    pub fn with(self, slot: Slot) -> SlotMask {
        match (self, slot) {
            (SlotMask::None, Slot::First) => SlotMask::Slot1,
            (SlotMask::None, Slot::Second) => SlotMask::Slot2,
            (SlotMask::Slot1, Slot::Second) | (SlotMask::Slot2, Slot::First) => SlotMask::Both,
            (mask, _) => mask,
        }
    }

    #[must_use]
    pub fn without(self, slot: Slot) -> SlotMask {
        match (self, slot) {
            (SlotMask::Both, Slot::First) => SlotMask::Slot2,
            (SlotMask::Both, Slot::Second) => SlotMask::Slot1,
            (SlotMask::Slot1, Slot::First) | (SlotMask::Slot2, Slot::Second) => SlotMask::None,
            (mask, _) => mask,
        }
    }

    pub fn is_empty(self) -> bool {
        matches!(self, SlotMask::None)
    }

    pub fn slots(self) -> impl Iterator<Item = Slot> {
        Slot::BOTH.into_iter().filter(move |s| self.contains(*s))
    }
}

/// U-APSD bitmap as carried in the WMM QoS-info field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UapsdMask(pub u8);

impl UapsdMask {
    pub fn contains(self, ac: AccessCategory) -> bool {
        self.0 & ac.uapsd_bit() != 0
    }

    #[must_use]
    pub fn with(self, ac: AccessCategory) -> UapsdMask {
        UapsdMask(self.0 | ac.uapsd_bit())
    }

    #[must_use]
    pub fn without(self, ac: AccessCategory) -> UapsdMask {
        UapsdMask(self.0 & !ac.uapsd_bit())
    }
}

impl Display for UapsdMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_priority_maps_to_access_category() {
        let expected = [
            AccessCategory::BestEffort,
            AccessCategory::Background,
            AccessCategory::Background,
            AccessCategory::BestEffort,
            AccessCategory::Video,
            AccessCategory::Video,
            AccessCategory::Voice,
            AccessCategory::Voice,
        ];
        for (up, ac) in expected.iter().enumerate() {
            let up = UserPriority::new(up as u8).unwrap();
            assert_eq!(up.access_category(), *ac);
        }
        assert!(UserPriority::new(8).is_none());
    }

    #[test]
    fn slot_mask_transitions() {
        let mask = SlotMask::None.with(Slot::First);
        assert_eq!(mask, SlotMask::Slot1);
        assert_eq!(mask.with(Slot::Second), SlotMask::Both);
        assert_eq!(SlotMask::Both.without(Slot::First), SlotMask::Slot2);
        assert_eq!(SlotMask::Slot2.without(Slot::First), SlotMask::Slot2);
        assert_eq!(SlotMask::Slot2.without(Slot::Second), SlotMask::None);
        assert_eq!(
            SlotMask::Both.slots().collect::<Vec<_>>(),
            vec![Slot::First, Slot::Second]
        );
        assert!(SlotMask::None.slots().next().is_none());
    }

    #[test]
    fn flow_id_wraps_past_sentinel() {
        let last = FlowId::new(u32::MAX - 1);
        assert_eq!(last.successor(), FlowId::FIRST);
        assert!(!FlowId::INVALID.is_valid());
        assert!(!FlowId::new(0).is_valid());
        assert_eq!(FlowId::new(7).successor(), FlowId::new(8));
    }

    #[test]
    fn uapsd_bits_follow_wmm_layout() {
        let mask = UapsdMask::default()
            .with(AccessCategory::Voice)
            .with(AccessCategory::BestEffort);
        assert_eq!(mask.0, 0x09);
        assert!(mask.contains(AccessCategory::Voice));
        assert!(!mask.contains(AccessCategory::Video));
        assert_eq!(mask.without(AccessCategory::Voice).0, 0x08);
    }
}
