use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::UapsdMask;

/// Whether WMM may be negotiated at all on this station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WmmMode {
    /// Use WMM whenever the associated AP advertises it.
    #[default]
    Auto,
    Disabled,
}

/// Knobs of the admission engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    pub wmm_mode: WmmMode,
    /// Carry admitted TSPECs across 802.11r roams through RIC requests.
    pub fast_transition: bool,
    /// Negotiate an ADDTS even on ACs where the AP does not mandate admission.
    pub addts_when_acm_off: bool,
    /// ACs for which flows set up without an explicit TSPEC request U-APSD.
    pub default_uapsd_mask: UapsdMask,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            wmm_mode: WmmMode::Auto,
            fast_transition: true,
            addts_when_acm_off: false,
            default_uapsd_mask: UapsdMask::default(),
        }
    }
}

impl QosConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn wmm_enabled(&self) -> bool {
        self.wmm_mode != WmmMode::Disabled
    }
}

/// Installs the global tracing subscriber. Later calls are ignored.
pub fn set_logger(level: Option<tracing::level_filters::LevelFilter>) {
    #[cfg(feature = "trace")]
    {
        use std::sync::atomic::AtomicBool;

        static LOGGER_SET: AtomicBool = AtomicBool::new(false);
        if LOGGER_SET
            .compare_exchange(
                false,
                true,
                std::sync::atomic::Ordering::Release,
                std::sync::atomic::Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        if let Err(err) = crate::tracing::tracer::init_tracer(level) {
            eprintln!("failed tracing initialization: {err}");
        }
    }
    #[cfg(not(feature = "trace"))]
    let _ = level;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccessCategory;

    #[test]
    fn partial_toml_keeps_defaults() -> testresult::TestResult {
        let config = QosConfig::from_toml(
            r#"
            addts_when_acm_off = true
            default_uapsd_mask = 1
            "#,
        )?;
        assert!(config.addts_when_acm_off);
        assert!(config.fast_transition);
        assert!(config.wmm_enabled());
        assert!(config.default_uapsd_mask.contains(AccessCategory::Voice));
        Ok(())
    }

    #[test]
    fn wmm_can_be_disabled() -> testresult::TestResult {
        let config = QosConfig::from_toml("wmm_mode = \"disabled\"")?;
        assert!(!config.wmm_enabled());
        Ok(())
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(QosConfig::from_toml("wmm_mode = \"sometimes\"").is_err());
    }
}
