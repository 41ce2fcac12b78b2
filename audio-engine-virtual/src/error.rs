use audio_engine_core::{DeviceRole, EngineError};
use thiserror::Error;

/// API name reported in [`EngineError::Device`] for simulated failures.
pub const VIRTUAL_API: &str = "VirtualAudio";

/// Failures of the simulated hardware.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VirtualDeviceError {
    #[error("device '{0}' is not plugged in")]
    NotPresent(String),

    #[error("device '{0}' is already plugged in")]
    AlreadyPresent(String),

    #[error("no default {0:?} device")]
    NoDefault(DeviceRole),

    #[error("device '{id}' cannot be used for {wanted:?}")]
    WrongRole { id: String, wanted: DeviceRole },

    #[error("{0} stream is not open")]
    NotOpen(&'static str),

    /// A written chunk does not match the layout or rate the stream was opened with.
    #[error("chunk of {channels} ch at {sample_rate} Hz does not match the open stream")]
    FormatMismatch { channels: u16, sample_rate: u32 },
}

impl VirtualDeviceError {
    /// errno-style code, the way native APIs report them.
    pub fn code(&self) -> i32 {
        match self {
            Self::NotPresent(_) => -19,
            Self::AlreadyPresent(_) => -17,
            Self::NoDefault(_) => -2,
            Self::WrongRole { .. } | Self::FormatMismatch { .. } => -22,
            Self::NotOpen(_) => -77,
        }
    }
}

impl From<VirtualDeviceError> for EngineError {
    fn from(e: VirtualDeviceError) -> Self {
        EngineError::device(e.code(), VIRTUAL_API, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_to_device_error_with_code() {
        let err: EngineError = VirtualDeviceError::NotPresent("spk".into()).into();
        assert!(err.is_device_error());
        match err {
            EngineError::Device { code, api, message } => {
                assert_eq!(code, -19);
                assert_eq!(api, VIRTUAL_API);
                assert!(message.contains("spk"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
