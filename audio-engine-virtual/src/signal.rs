use std::f64::consts::TAU;

use audio_engine_core::{ChannelLayout, EngineError, SampleBuffer};

/// What the virtual microphone hears.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub enum CaptureSignal {
    #[default]
    Silence,
    Constant(f32),
    Sine { frequency: f32, amplitude: f32 },
}

/// Produces consecutive capture chunks; a sine continues across chunk boundaries.
#[derive(Debug, Default)]
pub struct SignalGenerator {
    signal: CaptureSignal,
    /// Position within one period, in [0, 1).
    phase: f64,
}

impl SignalGenerator {
    pub fn new(signal: CaptureSignal) -> Self {
        Self { signal, phase: 0.0 }
    }

    pub fn signal(&self) -> CaptureSignal {
        self.signal
    }

    pub fn set_signal(&mut self, signal: CaptureSignal) {
        self.signal = signal;
        self.phase = 0.0;
    }

    /// The next `frame_count` frames, identical on every channel.
    pub fn next_chunk(
        &mut self,
        frame_count: usize,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<SampleBuffer, EngineError> {
        match self.signal {
            CaptureSignal::Silence => SampleBuffer::new(frame_count, channel_layout, sample_rate),
            CaptureSignal::Constant(value) => {
                SampleBuffer::filled(frame_count, channel_layout, sample_rate, value)
            }
            CaptureSignal::Sine {
                frequency,
                amplitude,
            } => {
                let mut buffer = SampleBuffer::new(frame_count, channel_layout, sample_rate)?;
                let step = frequency as f64 / sample_rate as f64;
                for i in 0..frame_count {
                    let value = (amplitude as f64 * (TAU * self.phase).sin()) as f32;
                    buffer.frame_mut(i).fill(value);
                    self.phase = (self.phase + step).fract();
                }
                Ok(buffer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_fills_every_channel() {
        let mut generator = SignalGenerator::new(CaptureSignal::Constant(0.25));
        let chunk = generator.next_chunk(16, ChannelLayout::STEREO, 48000).unwrap();
        assert_eq!(chunk.frame_count(), 16);
        assert!(chunk.samples().iter().all(|s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn silence_is_zero() {
        let mut generator = SignalGenerator::default();
        let chunk = generator.next_chunk(8, ChannelLayout::MONO, 16000).unwrap();
        assert!(chunk.samples().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn sine_is_continuous_across_chunks() {
        let signal = CaptureSignal::Sine {
            frequency: 440.0,
            amplitude: 0.5,
        };
        let mut whole = SignalGenerator::new(signal);
        let reference = whole.next_chunk(200, ChannelLayout::MONO, 48000).unwrap();

        let mut split = SignalGenerator::new(signal);
        let first = split.next_chunk(73, ChannelLayout::MONO, 48000).unwrap();
        let second = split.next_chunk(127, ChannelLayout::MONO, 48000).unwrap();

        let joined: Vec<f32> = first.samples().iter().chain(second.samples()).copied().collect();
        for (a, b) in joined.iter().zip(reference.samples()) {
            assert!((a - b).abs() < 1e-5);
        }
        assert!(reference.samples().iter().all(|s| s.abs() <= 0.5 + 1e-6));
    }
}
