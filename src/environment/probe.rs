//! Concrete probes.

use crate::config::EnvironmentConfig;
use crate::environment::{DeviceClass, EnvironmentProbe, EnvironmentSignals, NetworkClass};

const MOBILE_MARKERS: &[&str] = &[
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
    "mobile",
];

/// Whether a user-agent string looks like a phone or tablet.
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    MOBILE_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// Probe returning fixed signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticProbe {
    signals: EnvironmentSignals,
}

impl StaticProbe {
    pub fn new(signals: EnvironmentSignals) -> Self {
        Self { signals }
    }

    /// Device class inferred from a user agent, nothing else known.
    pub fn from_user_agent(user_agent: &str) -> Self {
        Self::new(EnvironmentSignals {
            is_mobile_like: is_mobile_user_agent(user_agent),
            ..Default::default()
        })
    }

    pub fn from_config(config: &EnvironmentConfig) -> Self {
        let is_mobile_like = config.mobile.unwrap_or_else(|| {
            config
                .user_agent
                .as_deref()
                .map(is_mobile_user_agent)
                .unwrap_or(false)
        });

        Self::new(EnvironmentSignals {
            network_class: config.network_class,
            downlink_mbps: config.downlink_mbps,
            save_data: config.save_data,
            is_mobile_like,
            is_hidden: config.hidden,
        })
    }

    pub fn with_network_class(mut self, class: NetworkClass) -> Self {
        self.signals.network_class = Some(class);
        self
    }

    pub fn with_downlink(mut self, mbps: f64) -> Self {
        self.signals.downlink_mbps = Some(mbps);
        self
    }

    pub fn with_save_data(mut self, save_data: bool) -> Self {
        self.signals.save_data = Some(save_data);
        self
    }

    pub fn mobile(mut self) -> Self {
        self.signals.is_mobile_like = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.signals.is_hidden = true;
        self
    }
}

impl EnvironmentProbe for StaticProbe {
    fn network_class(&self) -> Option<NetworkClass> {
        self.signals.network_class
    }

    fn downlink_mbps(&self) -> Option<f64> {
        self.signals.downlink_mbps
    }

    fn save_data(&self) -> Option<bool> {
        self.signals.save_data
    }

    fn device_class(&self) -> DeviceClass {
        if self.signals.is_mobile_like {
            DeviceClass::MobileLike
        } else {
            DeviceClass::Desktop
        }
    }

    fn is_visible(&self) -> bool {
        !self.signals.is_hidden
    }

    fn signals(&self) -> EnvironmentSignals {
        self.signals.clone()
    }
}
