//! Configuration structures for lines, devices and the driver itself
//!
//! Loading these from a configuration file is left to the embedding
//! application; everything here is plain serde data with sane defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{Result, SccpError};
use crate::types::{Codec, DndMode, RingerMode};

/// Driver-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SccpConfig {
    /// Codec preference order used when neither device nor line provides one
    pub codec_preferences: Vec<Codec>,
    /// Codec capability set used when neither device nor line provides one
    pub codec_capabilities: Vec<Codec>,
    /// Ringer mode for new inbound channels
    pub ringer_mode: RingerMode,
    /// Music-on-hold class passed to the routing engine on hold
    pub music_class: String,
    /// Seconds without a keypad digit before the collected number is dialed
    pub digit_timeout_secs: u64,
    /// Delay before a failed call (congestion, invalid number) is hung up
    pub hangup_delay_ms: u64,
    /// Media is opened before answer; suppresses the local alerting tone
    pub early_rtp: bool,
    /// Name of the hotline line, never propagated to shared-line peers
    pub hotline: Option<String>,
    pub threadpool: ThreadPoolConfig,
    pub lines: Vec<LineConfig>,
    pub devices: Vec<DeviceConfig>,
}

impl Default for SccpConfig {
    fn default() -> Self {
        Self {
            codec_preferences: vec![Codec::G711Ulaw, Codec::G711Alaw, Codec::G729],
            codec_capabilities: vec![Codec::G711Ulaw, Codec::G711Alaw, Codec::G729],
            ringer_mode: RingerMode::Outside,
            music_class: "default".to_string(),
            digit_timeout_secs: 8,
            hangup_delay_ms: 2_000,
            early_rtp: false,
            hotline: None,
            threadpool: ThreadPoolConfig::default(),
            lines: Vec::new(),
            devices: Vec::new(),
        }
    }
}

impl SccpConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SccpError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.threadpool.validate()?;
        let mut names: Vec<&str> = self.lines.iter().map(|l| l.name.as_str()).collect();
        names.sort_unstable();
        if let Some(dup) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(SccpError::Config(format!("Duplicate line name: {}", dup[0])));
        }
        for device in &self.devices {
            for button in &device.lines {
                if !self.lines.iter().any(|l| l.name == button.line) {
                    return Err(SccpError::Config(format!(
                        "Device {} references unknown line {}",
                        device.id, button.line
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn with_line(mut self, line: LineConfig) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_hotline(mut self, line: impl Into<String>) -> Self {
        self.hotline = Some(line.into());
        self
    }

    pub fn with_early_rtp(mut self) -> Self {
        self.early_rtp = true;
        self
    }

    pub fn digit_timeout(&self) -> Duration {
        Duration::from_secs(self.digit_timeout_secs)
    }

    pub fn hangup_delay(&self) -> Duration {
        Duration::from_millis(self.hangup_delay_ms)
    }
}

/// Limits of the background worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    /// Minimum seconds between two resize checks
    pub resize_interval_secs: u64,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            min_threads: 2,
            max_threads: 10,
            resize_interval_secs: 10,
        }
    }
}

impl ThreadPoolConfig {
    pub fn resize_interval(&self) -> Duration {
        Duration::from_secs(self.resize_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_threads == 0 || self.min_threads > self.max_threads {
            return Err(SccpError::Config(format!(
                "Invalid thread pool limits: min {} max {}",
                self.min_threads, self.max_threads
            )));
        }
        Ok(())
    }
}

/// A dialable line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineConfig {
    pub name: String,
    pub label: String,
    pub description: String,
    pub cid_name: String,
    pub cid_num: String,
    /// Dialplan context calls on this line are routed in
    pub context: String,
    pub mailboxes: Vec<String>,
    pub transfer: bool,
    pub music_class: Option<String>,
    /// Initial unconditional forward of every device on the line
    pub cfwd_all: Option<String>,
    pub cfwd_busy: Option<String>,
    pub codec_preferences: Vec<Codec>,
    pub codec_capabilities: Vec<Codec>,
    /// Subscription that addresses every device of the line
    pub default_subscription: Option<SubscriptionConfig>,
    /// Lines sharing a group can pick up each other's ringing calls
    pub pickup_group: Option<String>,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            label: String::new(),
            description: String::new(),
            cid_name: String::new(),
            cid_num: String::new(),
            context: "default".to_string(),
            mailboxes: Vec::new(),
            transfer: true,
            music_class: None,
            cfwd_all: None,
            cfwd_busy: None,
            codec_preferences: Vec::new(),
            codec_capabilities: Vec::new(),
            default_subscription: None,
            pickup_group: None,
        }
    }
}

impl LineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            cid_num: name.clone(),
            name,
            ..Default::default()
        }
    }

    pub fn with_caller_id(mut self, name: impl Into<String>, number: impl Into<String>) -> Self {
        self.cid_name = name.into();
        self.cid_num = number.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_transfer(mut self, enabled: bool) -> Self {
        self.transfer = enabled;
        self
    }

    pub fn with_forward_all(mut self, target: impl Into<String>) -> Self {
        self.cfwd_all = Some(target.into());
        self
    }

    pub fn with_default_subscription(mut self, subscription: SubscriptionConfig) -> Self {
        self.default_subscription = Some(subscription);
        self
    }

    pub fn with_pickup_group(mut self, group: impl Into<String>) -> Self {
        self.pickup_group = Some(group.into());
        self
    }

    pub fn with_mailbox(mut self, mailbox: impl Into<String>) -> Self {
        self.mailboxes.push(mailbox.into());
        self
    }
}

/// Line button on a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineButton {
    pub line: String,
    pub instance: u16,
    /// Subscription id; only shared-line calls addressed to it ring this device
    #[serde(default)]
    pub subscription: Option<SubscriptionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub number: String,
    pub name: String,
    /// `"silent"` suppresses the ringer on this device
    pub aux: String,
}

impl SubscriptionConfig {
    pub fn new(number: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            name: name.into(),
            aux: String::new(),
        }
    }
}

/// Speed-dial button watching the hint of a line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeeddialButton {
    pub instance: u16,
    pub name: String,
    pub hint_line: Option<String>,
}

/// A phone endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub description: String,
    pub transfer: bool,
    pub dnd: DndMode,
    pub privacy: bool,
    pub codec_preferences: Vec<Codec>,
    pub codec_capabilities: Vec<Codec>,
    pub lines: Vec<LineButton>,
    pub speeddials: Vec<SpeeddialButton>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            description: String::new(),
            transfer: true,
            dnd: DndMode::Off,
            privacy: false,
            codec_preferences: Vec::new(),
            codec_capabilities: Vec::new(),
            lines: Vec::new(),
            speeddials: Vec::new(),
        }
    }
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_line(mut self, line: impl Into<String>, instance: u16) -> Self {
        self.lines.push(LineButton {
            line: line.into(),
            instance,
            subscription: None,
        });
        self
    }

    pub fn with_subscribed_line(
        mut self,
        line: impl Into<String>,
        instance: u16,
        subscription: SubscriptionConfig,
    ) -> Self {
        self.lines.push(LineButton {
            line: line.into(),
            instance,
            subscription: Some(subscription),
        });
        self
    }

    pub fn with_speeddial(mut self, instance: u16, name: impl Into<String>, hint_line: impl Into<String>) -> Self {
        self.speeddials.push(SpeeddialButton {
            instance,
            name: name.into(),
            hint_line: Some(hint_line.into()),
        });
        self
    }

    pub fn with_dnd(mut self, dnd: DndMode) -> Self {
        self.dnd = dnd;
        self
    }

    pub fn with_transfer(mut self, enabled: bool) -> Self {
        self.transfer = enabled;
        self
    }

    pub fn with_codecs(mut self, preferences: Vec<Codec>, capabilities: Vec<Codec>) -> Self {
        self.codec_preferences = preferences;
        self.codec_capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SccpConfig::default();
        assert_eq!(config.threadpool.min_threads, 2);
        assert_eq!(config.threadpool.max_threads, 10);
        assert_eq!(config.threadpool.resize_interval(), Duration::from_secs(10));
        assert_eq!(config.ringer_mode, RingerMode::Outside);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "music_class": "jazz",
            "lines": [{ "name": "100", "cid_name": "Reception", "cid_num": "100" }],
            "devices": [{ "id": "SEP0001", "dnd": "Reject", "lines": [{ "line": "100", "instance": 1 }] }]
        }"#;
        let config = SccpConfig::from_json(json).unwrap();
        assert_eq!(config.music_class, "jazz");
        assert_eq!(config.lines[0].context, "default");
        assert!(config.lines[0].transfer);
        assert_eq!(config.devices[0].dnd, DndMode::Reject);
        assert_eq!(config.devices[0].lines[0].instance, 1);
    }

    #[test]
    fn test_validate_rejects_unknown_line() {
        let config = SccpConfig::default()
            .with_line(LineConfig::new("100"))
            .with_device(DeviceConfig::new("SEP0001").with_line("200", 1));
        assert!(matches!(config.validate(), Err(SccpError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_duplicate_lines() {
        let config = SccpConfig::default()
            .with_line(LineConfig::new("100"))
            .with_line(LineConfig::new("100"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_threadpool_limits() {
        let mut config = SccpConfig::default();
        config.threadpool.min_threads = 12;
        assert!(config.validate().is_err());
    }
}
