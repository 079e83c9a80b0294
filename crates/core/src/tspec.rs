//! Traffic specification values and the arithmetic used to fold several
//! application flows into the single TSPEC negotiated over the air.

use serde::{Deserialize, Serialize};

use crate::{
    errors::InvalidParam,
    types::{AccessCategory, UserPriority},
};

/// Highest TID a WMM TSPEC may carry.
pub const MAX_TID: u8 = 7;

/// Surplus bandwidth allowance of 1.0 in the 3.13 fixed point encoding.
const SURPLUS_BW_UNITY: u16 = 0x2000;

/// Traffic direction from the TS-info field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Uplink,
    Downlink,
    /// Direct-link encoding, not usable for WMM admission.
    Reserved,
    #[default]
    Bidirectional,
}

impl Direction {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Direction::Uplink,
            1 => Direction::Downlink,
            2 => Direction::Reserved,
            _ => Direction::Bidirectional,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Direction::Uplink => 0,
            Direction::Downlink => 1,
            Direction::Reserved => 2,
            Direction::Bidirectional => 3,
        }
    }

    fn combine(self, other: Direction) -> Direction {
        if self == other {
            self
        } else {
            Direction::Bidirectional
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    #[default]
    NormalAck,
    /// Only legal when the link runs HT or VHT.
    HtImmediateBlockAck,
}

/// The TS-info sub-field of a TSPEC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TsInfo {
    pub up: UserPriority,
    pub tid: u8,
    pub direction: Direction,
    /// Power-save behaviour bit: the application wants U-APSD delivery.
    pub psb: bool,
    pub ack_policy: AckPolicy,
}

impl TsInfo {
    pub fn new(up: UserPriority, direction: Direction) -> Self {
        Self {
            up,
            tid: up.value(),
            direction,
            psb: false,
            ack_policy: AckPolicy::NormalAck,
        }
    }
}

/// One traffic specification. Rates are in bits per second, intervals in
/// microseconds, sizes in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TspecInfo {
    pub ts_info: TsInfo,
    pub nominal_msdu_size: u16,
    pub max_msdu_size: u16,
    pub min_service_interval: u32,
    pub max_service_interval: u32,
    pub inactivity_interval: u32,
    pub suspension_interval: u32,
    pub svc_start_time: u32,
    pub min_data_rate: u32,
    pub mean_data_rate: u32,
    pub peak_data_rate: u32,
    pub max_burst_size: u32,
    pub delay_bound: u32,
    pub min_phy_rate: u32,
    pub surplus_bw_allowance: u16,
    pub medium_time: u16,
}

impl Default for TspecInfo {
    fn default() -> Self {
        TspecInfo::default_for(UserPriority::BEST_EFFORT)
    }
}

impl TspecInfo {
    /// Parameters used when a client asks for QoS without giving a TSPEC.
    pub fn default_for(up: UserPriority) -> Self {
        let ts_info = TsInfo::new(up, Direction::Bidirectional);
        let base = Self {
            ts_info,
            nominal_msdu_size: 1500,
            max_msdu_size: 1500,
            min_service_interval: 0,
            max_service_interval: 0,
            inactivity_interval: 0,
            suspension_interval: 0,
            svc_start_time: 0,
            min_data_rate: 0,
            mean_data_rate: 100_000,
            peak_data_rate: 0,
            max_burst_size: 0,
            delay_bound: 0,
            min_phy_rate: 6_000_000,
            surplus_bw_allowance: SURPLUS_BW_UNITY,
            medium_time: 0,
        };
        match up.access_category() {
            AccessCategory::Voice => Self {
                nominal_msdu_size: 208,
                max_msdu_size: 208,
                min_service_interval: 20_000,
                max_service_interval: 20_000,
                mean_data_rate: 83_200,
                min_phy_rate: 5_500_000,
                ..base
            },
            AccessCategory::Video => Self {
                mean_data_rate: 1_000_000,
                peak_data_rate: 2_000_000,
                ..base
            },
            AccessCategory::BestEffort | AccessCategory::Background => base,
        }
    }

    pub fn direction(&self) -> Direction {
        self.ts_info.direction
    }

    pub fn psb(&self) -> bool {
        self.ts_info.psb
    }

    /// Checks the fields a client controls. `link_is_ht` tells whether the
    /// current association negotiated HT or VHT.
    pub fn validate(&self, link_is_ht: bool) -> Result<(), InvalidParam> {
        if self.ts_info.direction == Direction::Reserved {
            return Err(InvalidParam::ReservedDirection);
        }
        if self.ts_info.tid > MAX_TID {
            return Err(InvalidParam::Tid(self.ts_info.tid));
        }
        if self.ts_info.ack_policy == AckPolicy::HtImmediateBlockAck && !link_is_ht {
            return Err(InvalidParam::BlockAckWithoutHt);
        }
        if self.max_msdu_size != 0 && self.nominal_msdu_size > self.max_msdu_size {
            return Err(InvalidParam::MsduSize {
                nominal: self.nominal_msdu_size,
                max: self.max_msdu_size,
            });
        }
        if self.min_service_interval != 0
            && self.max_service_interval != 0
            && self.min_service_interval > self.max_service_interval
        {
            return Err(InvalidParam::ServiceInterval {
                min: self.min_service_interval,
                max: self.max_service_interval,
            });
        }
        let rates = [self.min_data_rate, self.mean_data_rate, self.peak_data_rate];
        let mut floor = 0;
        for rate in rates.into_iter().filter(|r| *r != 0) {
            if rate < floor {
                return Err(InvalidParam::DataRateOrder);
            }
            floor = rate;
        }
        Ok(())
    }

    /// Folds `other` into `self`, producing the TSPEC that covers both flows.
    ///
    /// Every rule is commutative and associative so the result does not depend
    /// on the order in which flows joined. Rates and medium time add up and
    /// saturate; sizes and allowances take the maximum; intervals and bounds
    /// take the tightest non-zero value.
    #[must_use]
    pub fn aggregate(&self, other: &TspecInfo) -> TspecInfo {
        TspecInfo {
            ts_info: TsInfo {
                up: self.ts_info.up.max(other.ts_info.up),
                tid: self.ts_info.tid.min(other.ts_info.tid),
                direction: self.ts_info.direction.combine(other.ts_info.direction),
                psb: self.ts_info.psb || other.ts_info.psb,
                ack_policy: if self.ts_info.ack_policy == AckPolicy::HtImmediateBlockAck
                    || other.ts_info.ack_policy == AckPolicy::HtImmediateBlockAck
                {
                    AckPolicy::HtImmediateBlockAck
                } else {
                    AckPolicy::NormalAck
                },
            },
            nominal_msdu_size: self.nominal_msdu_size.max(other.nominal_msdu_size),
            max_msdu_size: self.max_msdu_size.max(other.max_msdu_size),
            min_service_interval: min_nonzero(self.min_service_interval, other.min_service_interval),
            max_service_interval: min_nonzero(self.max_service_interval, other.max_service_interval),
            inactivity_interval: self.inactivity_interval.max(other.inactivity_interval),
            suspension_interval: min_nonzero(self.suspension_interval, other.suspension_interval),
            svc_start_time: self.svc_start_time.max(other.svc_start_time),
            min_data_rate: self.min_data_rate.saturating_add(other.min_data_rate),
            mean_data_rate: self.mean_data_rate.saturating_add(other.mean_data_rate),
            peak_data_rate: self.peak_data_rate.saturating_add(other.peak_data_rate),
            max_burst_size: self.max_burst_size.max(other.max_burst_size),
            delay_bound: min_nonzero(self.delay_bound, other.delay_bound),
            min_phy_rate: self.min_phy_rate.max(other.min_phy_rate),
            surplus_bw_allowance: self.surplus_bw_allowance.max(other.surplus_bw_allowance),
            medium_time: self.medium_time.saturating_add(other.medium_time),
        }
    }

    /// Aggregate of every TSPEC yielded, `None` for an empty iterator.
    pub fn aggregate_all<'a>(tspecs: impl IntoIterator<Item = &'a TspecInfo>) -> Option<TspecInfo> {
        tspecs
            .into_iter()
            .fold(None, |acc: Option<TspecInfo>, t| match acc {
                None => Some(*t),
                Some(acc) => Some(acc.aggregate(t)),
            })
    }
}

fn min_nonzero(a: u32, b: u32) -> u32 {
    match (a, b) {
        (0, x) | (x, 0) => x,
        (a, b) => a.min(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice(direction: Direction) -> TspecInfo {
        let up = UserPriority::new(6).unwrap();
        let mut tspec = TspecInfo::default_for(up);
        tspec.ts_info.direction = direction;
        tspec
    }

    #[test]
    fn aggregation_is_order_independent() {
        let mut a = voice(Direction::Uplink);
        a.mean_data_rate = 64_000;
        a.peak_data_rate = 100_000;
        a.delay_bound = 40_000;
        let mut b = voice(Direction::Uplink);
        b.mean_data_rate = 96_000;
        b.peak_data_rate = 80_000;
        b.min_service_interval = 10_000;
        b.max_service_interval = 10_000;

        let ab = a.aggregate(&b);
        let ba = b.aggregate(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.mean_data_rate, 160_000);
        assert_eq!(ab.peak_data_rate, 180_000);
        assert_eq!(ab.min_service_interval, 10_000);
        assert_eq!(ab.delay_bound, 40_000);
        assert_eq!(ab.direction(), Direction::Uplink);
    }

    #[test]
    fn aggregated_rates_saturate() {
        let mut a = voice(Direction::Downlink);
        a.mean_data_rate = u32::MAX - 10;
        a.peak_data_rate = u32::MAX;
        let mut b = voice(Direction::Downlink);
        b.mean_data_rate = 1_000;
        b.peak_data_rate = 1_000;

        for agg in [a.aggregate(&b), b.aggregate(&a)] {
            assert_eq!(agg.mean_data_rate, u32::MAX);
            assert_eq!(agg.peak_data_rate, u32::MAX);
        }
    }

    #[test]
    fn mixed_directions_become_bidirectional() {
        let mut up = voice(Direction::Uplink);
        up.ts_info.psb = true;
        let down = voice(Direction::Downlink);
        let agg = up.aggregate(&down);
        assert_eq!(agg.direction(), Direction::Bidirectional);
        assert!(agg.psb());
    }

    #[test]
    fn aggregate_all_folds_every_entry() {
        let tspecs = [
            voice(Direction::Uplink),
            voice(Direction::Uplink),
            voice(Direction::Uplink),
        ];
        let agg = TspecInfo::aggregate_all(tspecs.iter()).unwrap();
        assert_eq!(agg.mean_data_rate, 3 * 83_200);
        assert!(TspecInfo::aggregate_all(std::iter::empty()).is_none());
    }

    #[test]
    fn validation_rejects_malformed_requests() {
        let mut t = voice(Direction::Reserved);
        assert_eq!(t.validate(true), Err(InvalidParam::ReservedDirection));

        t.ts_info.direction = Direction::Uplink;
        t.ts_info.ack_policy = AckPolicy::HtImmediateBlockAck;
        assert_eq!(t.validate(false), Err(InvalidParam::BlockAckWithoutHt));
        assert_eq!(t.validate(true), Ok(()));

        t.ts_info.ack_policy = AckPolicy::NormalAck;
        t.nominal_msdu_size = 400;
        assert!(matches!(t.validate(false), Err(InvalidParam::MsduSize { .. })));

        let mut t = voice(Direction::Uplink);
        t.min_data_rate = 90_000;
        assert_eq!(t.validate(false), Err(InvalidParam::DataRateOrder));
    }

    #[test]
    fn direction_bits_round_trip() {
        for bits in 0..4 {
            assert_eq!(Direction::from_bits(bits).bits(), bits);
        }
    }
}
