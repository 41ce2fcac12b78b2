use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Sample encoding tag, numbered like the WAVE format codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    Pcm,
    IeeeFloat,
    ALaw,
    MuLaw,
}

impl SampleEncoding {
    pub fn wave_tag(self) -> u16 {
        match self {
            Self::Pcm => 1,
            Self::IeeeFloat => 3,
            Self::ALaw => 6,
            Self::MuLaw => 7,
        }
    }

    pub fn from_wave_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::Pcm),
            3 => Some(Self::IeeeFloat),
            6 => Some(Self::ALaw),
            7 => Some(Self::MuLaw),
            _ => None,
        }
    }
}

/// Channel count plus a speaker-role mask (WAVE_FORMAT_EXTENSIBLE bit layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelLayout {
    pub count: u16,
    pub mask: u32,
}

impl ChannelLayout {
    pub const MONO: Self = Self::new(1, 0x4);
    pub const STEREO: Self = Self::new(2, 0x3);
    pub const QUAD: Self = Self::new(4, 0x33);
    pub const SURROUND_5_1: Self = Self::new(6, 0x3F);
    pub const SURROUND_7_1: Self = Self::new(8, 0x63F);

    pub const fn new(count: u16, mask: u32) -> Self {
        Self { count, mask }
    }

    /// Conventional layout for a channel count; unknown counts get an empty mask.
    pub fn from_count(count: u16) -> Self {
        match count {
            1 => Self::MONO,
            2 => Self::STEREO,
            4 => Self::QUAD,
            6 => Self::SURROUND_5_1,
            8 => Self::SURROUND_7_1,
            n => Self::new(n, 0),
        }
    }
}

/// Immutable description of how samples are laid out.
///
/// Two formats are equal iff every field matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub encoding: SampleEncoding,
    pub bits_per_sample: u16,
    pub channel_layout: ChannelLayout,
    pub sample_rate: u32,
    pub bit_rate: u32,
}

impl AudioFormat {
    /// Uncompressed format; the bit rate is derived from the other fields.
    pub fn new(
        encoding: SampleEncoding,
        bits_per_sample: u16,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> Self {
        let bit_rate = sample_rate
            .saturating_mul(bits_per_sample as u32)
            .saturating_mul(channel_layout.count as u32);
        Self {
            encoding,
            bits_per_sample,
            channel_layout,
            sample_rate,
            bit_rate,
        }
    }

    /// The engine's mixing format: 32-bit float in the given layout and rate.
    pub fn internal(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self::new(SampleEncoding::IeeeFloat, 32, channel_layout, sample_rate)
    }

    pub fn pcm16(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self::new(SampleEncoding::Pcm, 16, channel_layout, sample_rate)
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_layout.count
    }

    /// Bytes per frame (one sample for every channel).
    pub fn frame_size(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channel_layout.count as usize
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.frame_size() as u32
    }

    pub fn is_internal(&self) -> bool {
        self.encoding == SampleEncoding::IeeeFloat && self.bits_per_sample == 32
    }

    /// Same layout and rate, in the internal float encoding.
    pub fn to_internal(&self) -> Self {
        Self::internal(self.channel_layout, self.sample_rate)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.channel_layout.count == 0 {
            return Err(EngineError::Configuration("channel count must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(EngineError::Configuration("sample rate must be positive".into()));
        }
        let valid_bits: &[u16] = match self.encoding {
            SampleEncoding::Pcm => &[8, 16, 24, 32],
            SampleEncoding::IeeeFloat => &[32, 64],
            SampleEncoding::ALaw | SampleEncoding::MuLaw => &[8],
        };
        if !valid_bits.contains(&self.bits_per_sample) {
            return Err(EngineError::Configuration(format!(
                "unsupported bit depth {} for {:?}",
                self.bits_per_sample, self.encoding
            )));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::internal(ChannelLayout::STEREO, 48000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_and_bit_rate() {
        let format = AudioFormat::pcm16(ChannelLayout::STEREO, 48000);
        assert_eq!(format.frame_size(), 4);
        assert_eq!(format.byte_rate(), 192000);
        assert_eq!(format.bit_rate, 1_536_000);
    }

    #[test]
    fn equality_requires_every_field() {
        let a = AudioFormat::internal(ChannelLayout::STEREO, 48000);
        let mut b = a;
        assert_eq!(a, b);
        b.bit_rate += 1;
        assert_ne!(a, b);
        assert_ne!(a, AudioFormat::internal(ChannelLayout::MONO, 48000));
    }

    #[test]
    fn validate_rejects_empty_layout_and_zero_rate() {
        let mut format = AudioFormat::default();
        format.channel_layout = ChannelLayout::new(0, 0);
        assert!(format.validate().is_err());

        let format = AudioFormat::internal(ChannelLayout::STEREO, 0);
        assert!(format.validate().is_err());
    }

    #[test]
    fn validate_checks_bit_depth_per_encoding() {
        assert!(AudioFormat::new(SampleEncoding::Pcm, 24, ChannelLayout::MONO, 44100)
            .validate()
            .is_ok());
        assert!(AudioFormat::new(SampleEncoding::IeeeFloat, 16, ChannelLayout::MONO, 44100)
            .validate()
            .is_err());
        assert!(AudioFormat::new(SampleEncoding::MuLaw, 8, ChannelLayout::MONO, 8000)
            .validate()
            .is_ok());
    }

    #[test]
    fn layout_from_count() {
        assert_eq!(ChannelLayout::from_count(2), ChannelLayout::STEREO);
        assert_eq!(ChannelLayout::from_count(3).mask, 0);
    }

    #[test]
    fn wave_tags_round_trip() {
        for encoding in [
            SampleEncoding::Pcm,
            SampleEncoding::IeeeFloat,
            SampleEncoding::ALaw,
            SampleEncoding::MuLaw,
        ] {
            assert_eq!(SampleEncoding::from_wave_tag(encoding.wave_tag()), Some(encoding));
        }
        assert_eq!(SampleEncoding::from_wave_tag(0xFFFE), None);
    }
}
