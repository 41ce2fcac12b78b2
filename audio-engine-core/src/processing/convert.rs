//! Sample-rate and channel-layout conversion on [`SampleBuffer`]s.
//!
//! Linear interpolation only; good enough for matching a source to the
//! render format, not a replacement for a proper polyphase resampler.

use crate::models::buffer::SampleBuffer;
use crate::models::error::EngineError;
use crate::models::format::ChannelLayout;
use crate::traits::transform::AudioTransform;

/// Linear interpolation resampling of every channel to `target_rate`.
///
/// Returns a copy of the input if the rates already match.
pub fn resample(buffer: &SampleBuffer, target_rate: u32) -> Result<SampleBuffer, EngineError> {
    if target_rate == 0 {
        return Err(EngineError::Configuration("target sample rate must be positive".into()));
    }
    let source_rate = buffer.sample_rate();
    if source_rate == target_rate || buffer.is_empty() {
        let mut copy = buffer.clone();
        if copy.is_empty() {
            copy = SampleBuffer::empty(buffer.channel_layout(), target_rate);
        }
        return Ok(copy);
    }

    let channels = buffer.channel_count();
    let frame_count = buffer.frame_count();
    let ratio = target_rate as f64 / source_rate as f64;
    let output_frames = (frame_count as f64 * ratio) as usize;

    let mut output = SampleBuffer::new(output_frames, buffer.channel_layout(), target_rate)?;
    let input = buffer.samples();
    let out = output.samples_mut();
    for i in 0..output_frames {
        let source_index = i as f64 / ratio;
        let index = source_index as usize;
        let fraction = (source_index - index as f64) as f32;

        for ch in 0..channels {
            if index + 1 < frame_count {
                out[i * channels + ch] =
                    input[index * channels + ch] * (1.0 - fraction) + input[(index + 1) * channels + ch] * fraction;
            } else if index < frame_count {
                out[i * channels + ch] = input[index * channels + ch];
            }
        }
    }
    Ok(output)
}

/// Convert to `target` channel layout.
///
/// Mono sources are copied to every output channel, mono targets get the
/// average of all source channels. Otherwise the first channels are kept
/// and any extra output channels are silent.
pub fn rematrix(buffer: &SampleBuffer, target: ChannelLayout) -> Result<SampleBuffer, EngineError> {
    if target.count == 0 {
        return Err(EngineError::Configuration("target layout has no channels".into()));
    }
    let source_channels = buffer.channel_count();
    let target_channels = target.count as usize;
    if source_channels == target_channels {
        return SampleBuffer::from_samples(buffer.samples().to_vec(), target, buffer.sample_rate());
    }

    let frame_count = buffer.frame_count();
    let mut output = SampleBuffer::new(frame_count, target, buffer.sample_rate())?;
    for frame in 0..frame_count {
        let source = buffer.frame(frame);
        let dest = output.frame_mut(frame);
        if source_channels == 1 {
            dest.fill(source[0]);
        } else if target_channels == 1 {
            dest[0] = downmix_frame(source);
        } else {
            let shared = source_channels.min(target_channels);
            dest[..shared].copy_from_slice(&source[..shared]);
        }
    }
    Ok(output)
}

fn downmix_frame(frame: &[f32]) -> f32 {
    let scale = 1.0 / frame.len() as f32;
    frame.iter().sum::<f32>() * scale
}

/// Resample and rematrix in one go, skipping whichever step is a no-op.
pub fn convert(
    buffer: &SampleBuffer,
    target_layout: ChannelLayout,
    target_rate: u32,
) -> Result<SampleBuffer, EngineError> {
    let resampled = if buffer.sample_rate() != target_rate {
        resample(buffer, target_rate)?
    } else {
        buffer.clone()
    };
    if resampled.channel_layout() == target_layout {
        Ok(resampled)
    } else {
        rematrix(&resampled, target_layout)
    }
}

/// [`AudioTransform`] that resamples buffers to a fixed rate.
#[derive(Debug, Clone)]
pub struct SampleRateConverter {
    pub target_rate: u32,
}

impl SampleRateConverter {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }
}

impl AudioTransform for SampleRateConverter {
    fn process(&mut self, buffer: &mut SampleBuffer) -> Result<(), EngineError> {
        if buffer.sample_rate() != self.target_rate {
            *buffer = resample(buffer, self.target_rate)?;
        }
        Ok(())
    }
}

/// [`AudioTransform`] that rematrixes buffers to a fixed layout.
#[derive(Debug, Clone)]
pub struct ChannelMapper {
    pub target: ChannelLayout,
}

impl ChannelMapper {
    pub fn new(target: ChannelLayout) -> Self {
        Self { target }
    }
}

impl AudioTransform for ChannelMapper {
    fn process(&mut self, buffer: &mut SampleBuffer) -> Result<(), EngineError> {
        if buffer.channel_layout() != self.target {
            *buffer = rematrix(buffer, self.target)?;
        }
        Ok(())
    }
}
