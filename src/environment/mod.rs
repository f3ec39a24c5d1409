//! Environment signals consumed by the timeout calculator.
//!
//! # Data Flow
//! ```text
//! EnvironmentProbe (injected)
//!     → network_class / downlink / save_data / device_class / is_visible
//!     → EnvironmentSignals snapshot
//!     → resilience::timeouts (adaptive deadline)
//! ```
//!
//! # Design Decisions
//! - Probes are read-only and return safe defaults for anything unsupported
//! - No probe at all means a headless context: timeouts are not adjusted
//! - Tests use `StaticProbe` for deterministic signals

pub mod probe;

pub use probe::{is_mobile_user_agent, StaticProbe};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Effective connection class, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkClass {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
}

impl NetworkClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Slow2g => "slow-2g",
            Self::TwoG => "2g",
            Self::ThreeG => "3g",
            Self::FourG => "4g",
        }
    }
}

impl fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "slow-2g" => Ok(Self::Slow2g),
            "2g" => Ok(Self::TwoG),
            "3g" => Ok(Self::ThreeG),
            "4g" => Ok(Self::FourG),
            other => Err(format!("unknown network class '{}'", other)),
        }
    }
}

/// Coarse device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    #[default]
    Desktop,
    MobileLike,
}

/// Snapshot of everything a probe reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentSignals {
    pub network_class: Option<NetworkClass>,
    pub downlink_mbps: Option<f64>,
    pub save_data: Option<bool>,
    pub is_mobile_like: bool,
    pub is_hidden: bool,
}

impl EnvironmentSignals {
    /// True when any network information is present.
    pub fn has_network_info(&self) -> bool {
        self.network_class.is_some() || self.downlink_mbps.is_some() || self.save_data.is_some()
    }
}

/// Source of environment signals.
///
/// Every method has a default so probes only implement what their platform supports.
pub trait EnvironmentProbe: Send + Sync {
    fn network_class(&self) -> Option<NetworkClass> {
        None
    }

    fn downlink_mbps(&self) -> Option<f64> {
        None
    }

    fn save_data(&self) -> Option<bool> {
        None
    }

    fn device_class(&self) -> DeviceClass {
        DeviceClass::Desktop
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn signals(&self) -> EnvironmentSignals {
        EnvironmentSignals {
            network_class: self.network_class(),
            downlink_mbps: self.downlink_mbps(),
            save_data: self.save_data(),
            is_mobile_like: self.device_class() == DeviceClass::MobileLike,
            is_hidden: !self.is_visible(),
        }
    }
}
