use audio_engine_core::{AudioDevice, DeviceRole};

use crate::error::VirtualDeviceError;

/// A simulated endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDevice {
    pub info: AudioDevice,
    /// Rate the device forces on every stream; `None` accepts the requested rate.
    pub native_rate: Option<u32>,
}

impl VirtualDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: DeviceRole) -> Self {
        Self {
            info: AudioDevice::new(id, name, role),
            native_rate: None,
        }
    }

    pub fn with_native_rate(mut self, sample_rate: u32) -> Self {
        self.native_rate = Some(sample_rate);
        self
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl From<AudioDevice> for VirtualDevice {
    fn from(info: AudioDevice) -> Self {
        Self {
            info,
            native_rate: None,
        }
    }
}

/// The set of plugged-in devices and the per-role defaults.
///
/// Behaves like an OS endpoint list: the first device plugged in for a role
/// becomes its default, and unplugging the default promotes the next device
/// in plug order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<VirtualDevice>,
    default_render: Option<String>,
    default_capture: Option<String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a device in. An `is_default` flag on it claims the default for its roles.
    pub fn plug(&mut self, device: VirtualDevice) -> Result<(), VirtualDeviceError> {
        if self.contains(device.id()) {
            return Err(VirtualDeviceError::AlreadyPresent(device.info.id));
        }
        let id = device.info.id.clone();
        let role = device.info.role;
        let claims_default = device.info.is_default;
        log::debug!("Plugging virtual device '{}' ({:?})", id, role);
        self.devices.push(device);

        for wanted in [DeviceRole::Render, DeviceRole::Capture] {
            if role.supports(wanted) && (claims_default || self.default_id(wanted).is_none()) {
                *self.default_slot(wanted) = Some(id.clone());
            }
        }
        Ok(())
    }

    pub fn unplug(&mut self, id: &str) -> Result<VirtualDevice, VirtualDeviceError> {
        let index = self
            .devices
            .iter()
            .position(|d| d.id() == id)
            .ok_or_else(|| VirtualDeviceError::NotPresent(id.to_string()))?;
        let removed = self.devices.remove(index);
        log::debug!("Unplugged virtual device '{}'", id);

        for role in [DeviceRole::Render, DeviceRole::Capture] {
            if self.default_id(role) == Some(id) {
                let next = self
                    .devices
                    .iter()
                    .find(|d| d.info.role.supports(role))
                    .map(|d| d.info.id.clone());
                *self.default_slot(role) = next;
            }
        }
        Ok(removed)
    }

    pub fn set_default(&mut self, role: DeviceRole, id: &str) -> Result<(), VirtualDeviceError> {
        let device = self
            .get(id)
            .ok_or_else(|| VirtualDeviceError::NotPresent(id.to_string()))?;
        if role == DeviceRole::Duplex || !device.info.role.supports(role) {
            return Err(VirtualDeviceError::WrongRole {
                id: id.to_string(),
                wanted: role,
            });
        }
        *self.default_slot(role) = Some(id.to_string());
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&VirtualDevice> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn default_device(&self, role: DeviceRole) -> Option<&VirtualDevice> {
        self.default_id(role).and_then(|id| self.get(id))
    }

    /// Device descriptors in plug order, with default flags filled in.
    pub fn enumerate(&self) -> Vec<AudioDevice> {
        self.devices
            .iter()
            .map(|d| {
                let is_default = self.default_id(DeviceRole::Render) == Some(d.id())
                    || self.default_id(DeviceRole::Capture) == Some(d.id());
                d.info.clone().with_default(is_default)
            })
            .collect()
    }

    /// The device an open request targets: the given one, or the role's default.
    pub fn resolve(
        &self,
        requested: Option<&AudioDevice>,
        role: DeviceRole,
    ) -> Result<&VirtualDevice, VirtualDeviceError> {
        let device = match requested {
            Some(wanted) => self
                .get(&wanted.id)
                .ok_or_else(|| VirtualDeviceError::NotPresent(wanted.id.clone()))?,
            None => self
                .default_device(role)
                .ok_or(VirtualDeviceError::NoDefault(role))?,
        };
        if !device.info.role.supports(role) {
            return Err(VirtualDeviceError::WrongRole {
                id: device.info.id.clone(),
                wanted: role,
            });
        }
        Ok(device)
    }

    fn default_id(&self, role: DeviceRole) -> Option<&str> {
        match role {
            DeviceRole::Render => self.default_render.as_deref(),
            DeviceRole::Capture => self.default_capture.as_deref(),
            DeviceRole::Duplex => None,
        }
    }

    fn default_slot(&mut self, role: DeviceRole) -> &mut Option<String> {
        match role {
            DeviceRole::Capture => &mut self.default_capture,
            _ => &mut self.default_render,
        }
    }
}
