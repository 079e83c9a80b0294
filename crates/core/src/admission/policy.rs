use crate::errors::Unsupported;

/// What has to happen on the air before a TSPEC counts as admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Nothing to negotiate, the flow is admitted on the spot.
    Admit,
    SendAddts,
    /// U-APSD has to be switched on for the AC through a reassociation.
    Reassociate,
    Reject(Unsupported),
}

/// Inputs of the admission decision for one AC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PolicyInput {
    /// Admission control applies to the AC.
    pub acm: bool,
    /// The aggregate TSPEC asks for U-APSD delivery.
    pub psb: bool,
    /// U-APSD is already on for the AC.
    pub apsd_active: bool,
    /// The AP advertises U-APSD support.
    pub ap_supports_apsd: bool,
}

pub(crate) fn decide(input: PolicyInput) -> Admission {
    let PolicyInput {
        acm,
        psb,
        apsd_active,
        ap_supports_apsd,
    } = input;
    if psb && !ap_supports_apsd && (acm || !apsd_active) {
        return Admission::Reject(Unsupported::NoApsd);
    }
    match (acm, psb, apsd_active) {
        (true, _, _) => Admission::SendAddts,
        (false, false, _) => Admission::Admit,
        (false, true, true) => Admission::Admit,
        (false, true, false) => Admission::Reassociate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(acm: bool, psb: bool, apsd_active: bool, ap_supports_apsd: bool) -> PolicyInput {
        PolicyInput {
            acm,
            psb,
            apsd_active,
            ap_supports_apsd,
        }
    }

    #[test]
    fn no_acm_without_power_save_needs_no_exchange() {
        for apsd_active in [false, true] {
            for ap in [false, true] {
                assert_eq!(decide(input(false, false, apsd_active, ap)), Admission::Admit);
            }
        }
    }

    #[test]
    fn power_save_without_acm() {
        assert_eq!(
            decide(input(false, true, false, false)),
            Admission::Reject(Unsupported::NoApsd)
        );
        assert_eq!(decide(input(false, true, false, true)), Admission::Reassociate);
        assert_eq!(decide(input(false, true, true, true)), Admission::Admit);
        // already in U-APSD, nothing left to ask the AP
        assert_eq!(decide(input(false, true, true, false)), Admission::Admit);
    }

    #[test]
    fn acm_always_goes_through_addts() {
        assert_eq!(decide(input(true, false, false, false)), Admission::SendAddts);
        assert_eq!(decide(input(true, false, true, true)), Admission::SendAddts);
        assert_eq!(decide(input(true, true, true, true)), Admission::SendAddts);
        assert_eq!(
            decide(input(true, true, true, false)),
            Admission::Reject(Unsupported::NoApsd)
        );
    }
}
