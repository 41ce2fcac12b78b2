use serde::{Deserialize, Serialize};

/// Direction a device can be opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRole {
    Render,
    Capture,
    /// Virtual devices that can be opened in either direction.
    Duplex,
}

impl DeviceRole {
    /// Whether a device with this role can serve `wanted`.
    pub fn supports(self, wanted: DeviceRole) -> bool {
        self == wanted || self == DeviceRole::Duplex
    }
}

/// An audio endpoint reported by a backend.
///
/// `id` is backend-defined and stable across enumerations of the same
/// physical device; `is_default` may change between enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    pub role: DeviceRole,
    pub is_default: bool,
}

impl AudioDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: DeviceRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
            is_default: false,
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Identity comparison; ignores name and default flag.
    pub fn is_same(&self, other: &AudioDevice) -> bool {
        self.id == other.id
    }
}

/// The default device for `role` in an enumeration result.
pub fn find_default(devices: &[AudioDevice], role: DeviceRole) -> Option<&AudioDevice> {
    devices
        .iter()
        .find(|d| d.is_default && d.role.supports(role))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_default_flag() {
        let a = AudioDevice::new("hw:0", "Speakers", DeviceRole::Render);
        let b = a.clone().with_default(true);
        assert!(a.is_same(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn duplex_supports_both_roles() {
        assert!(DeviceRole::Duplex.supports(DeviceRole::Render));
        assert!(DeviceRole::Duplex.supports(DeviceRole::Capture));
        assert!(!DeviceRole::Render.supports(DeviceRole::Capture));
    }

    #[test]
    fn find_default_respects_role() {
        let devices = vec![
            AudioDevice::new("mic", "Mic", DeviceRole::Capture).with_default(true),
            AudioDevice::new("spk", "Speakers", DeviceRole::Render),
            AudioDevice::new("hdmi", "HDMI", DeviceRole::Render).with_default(true),
        ];
        assert_eq!(find_default(&devices, DeviceRole::Render).map(|d| d.id.as_str()), Some("hdmi"));
        assert_eq!(find_default(&devices, DeviceRole::Capture).map(|d| d.id.as_str()), Some("mic"));
    }
}
