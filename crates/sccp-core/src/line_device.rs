//! Association between one line and one device

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::SubscriptionConfig;
use crate::device::Device;
use crate::line::Line;
use crate::types::Party;

/// Subscription id selecting which shared-line calls ring a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionId {
    pub number: String,
    pub name: String,
    pub aux: String,
}

impl SubscriptionId {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            ..Default::default()
        }
    }

    pub fn is_silent(&self) -> bool {
        self.aux.eq_ignore_ascii_case("silent")
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.is_char_boundary(prefix.len())
        && value[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Whether a device subscribed under `device_number` is offered a call
/// addressed to `wanted`.
///
/// Calls without a subscription, or addressed to the line's default one, go
/// to every device. Otherwise only devices whose number starts with `wanted`
/// ring, plus devices that carry no subscription number at all.
pub fn subscription_matches(wanted: &str, line_default: &str, device_number: &str) -> bool {
    if wanted.is_empty() || starts_with_ignore_case(line_default, wanted) {
        return true;
    }
    device_number.is_empty() || starts_with_ignore_case(device_number, wanted)
}

impl From<SubscriptionConfig> for SubscriptionId {
    fn from(config: SubscriptionConfig) -> Self {
        Self {
            number: config.number,
            name: config.name,
            aux: config.aux,
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallForwardType {
    All,
    Busy,
}

/// Call-forward targets of one (device, line) pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallForward {
    pub all: Option<String>,
    pub busy: Option<String>,
}

/// Binds a [`Line`] to a [`Device`].
///
/// Holds both sides strongly; the cycle through `Line::devices` and
/// `Device::lines` is broken when the pair is detached.
pub struct LineDevice {
    line: Arc<Line>,
    device: Arc<Device>,
    line_instance: u16,
    subscription: Option<SubscriptionId>,
    call_forward: Mutex<CallForward>,
}

impl LineDevice {
    pub fn new(line: Arc<Line>, device: Arc<Device>, line_instance: u16, subscription: Option<SubscriptionId>) -> Self {
        let call_forward = CallForward {
            all: line.config().cfwd_all.clone(),
            busy: line.config().cfwd_busy.clone(),
        };
        Self {
            line,
            device,
            line_instance,
            subscription,
            call_forward: Mutex::new(call_forward),
        }
    }

    pub fn line(&self) -> &Arc<Line> {
        &self.line
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn line_instance(&self) -> u16 {
        self.line_instance
    }

    pub fn subscription(&self) -> Option<&SubscriptionId> {
        self.subscription.as_ref()
    }

    /// Whether a call addressed to `subscription` rings on this pair
    pub fn accepts(&self, subscription: Option<&SubscriptionId>) -> bool {
        let Some(wanted) = subscription else {
            return true;
        };
        let config = self.line.config();
        let line_default = config.default_subscription.as_ref().map(|s| s.number.as_str()).unwrap_or("");
        let own = self.subscription.as_ref().map(|s| s.number.as_str()).unwrap_or("");
        subscription_matches(&wanted.number, line_default, own)
    }

    /// Called party shown once the call is answered here: the line's caller
    /// id with this pair's subscription suffix, or the line default's
    pub fn called_party(&self) -> Party {
        let config = self.line.config();
        let default = config.default_subscription.as_ref();
        let own = self.subscription.as_ref();
        let number = own
            .map(|s| s.number.as_str())
            .filter(|n| !n.is_empty())
            .or_else(|| default.map(|s| s.number.as_str()))
            .unwrap_or("");
        let name = own
            .map(|s| s.name.as_str())
            .filter(|n| !n.is_empty())
            .or_else(|| default.map(|s| s.name.as_str()))
            .unwrap_or("");
        Party::new(format!("{}{}", config.cid_name, name), format!("{}{}", config.cid_num, number))
    }

    /// Ringer is suppressed for calls presented through this pair
    pub fn is_silent(&self) -> bool {
        self.subscription.as_ref().map(|s| s.is_silent()).unwrap_or(false)
    }

    pub fn call_forward(&self) -> CallForward {
        self.call_forward.lock().clone()
    }

    pub fn forward_target(&self, kind: CallForwardType) -> Option<String> {
        let forward = self.call_forward.lock();
        match kind {
            CallForwardType::All => forward.all.clone(),
            CallForwardType::Busy => forward.busy.clone(),
        }
    }

    pub fn set_call_forward(&self, kind: CallForwardType, target: Option<String>) {
        let target = target.filter(|t| !t.is_empty());
        let mut forward = self.call_forward.lock();
        match kind {
            CallForwardType::All => forward.all = target,
            CallForwardType::Busy => forward.busy = target,
        }
    }
}

impl std::fmt::Debug for LineDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineDevice")
            .field("line", &self.line.name())
            .field("device", self.device.id())
            .field("instance", &self.line_instance)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaddressed_call_rings_everyone() {
        assert!(subscription_matches("", "", "11"));
        assert!(subscription_matches("", "", ""));
    }

    #[test]
    fn test_default_subscription_rings_everyone() {
        assert!(subscription_matches("0", "00", "11"));
    }

    #[test]
    fn test_addressed_call_filters_by_prefix() {
        assert!(subscription_matches("11", "", "11"));
        assert!(subscription_matches("1", "", "11"));
        assert!(subscription_matches("ab", "", "AB7"));
        assert!(!subscription_matches("11", "", "12"));
        assert!(!subscription_matches("111", "", "11"));
        // devices without a subscription take every call
        assert!(subscription_matches("11", "", ""));
    }
}
