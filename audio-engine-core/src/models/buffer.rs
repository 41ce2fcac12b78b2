use super::error::EngineError;
use super::format::{AudioFormat, ChannelLayout};

/// Owned block of interleaved 32-bit float samples.
///
/// The buffer is always in the engine's internal encoding
/// (see [`AudioFormat::internal`]); backends and codecs convert at the edges.
/// Invariant: `samples.len() == frame_count * channel_count`, so
/// `size_bytes() == frame_count * format().frame_size()`. A zero-frame buffer
/// holds no allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    frame_count: usize,
    channel_layout: ChannelLayout,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Zero-initialized buffer of `frame_count` frames.
    pub fn new(frame_count: usize, channel_layout: ChannelLayout, sample_rate: u32) -> Result<Self, EngineError> {
        Self::filled(frame_count, channel_layout, sample_rate, 0.0)
    }

    /// Buffer with every sample set to `value`.
    pub fn filled(
        frame_count: usize,
        channel_layout: ChannelLayout,
        sample_rate: u32,
        value: f32,
    ) -> Result<Self, EngineError> {
        if frame_count > 0 && channel_layout.count == 0 {
            return Err(EngineError::Configuration(
                "a buffer with frames needs at least one channel".into(),
            ));
        }
        let len = frame_count
            .checked_mul(channel_layout.count as usize)
            .ok_or_else(|| EngineError::ResourceExhausted(format!("{} frames overflow", frame_count)))?;
        let mut samples = allocate(len)?;
        samples.resize(len, value);
        Ok(Self {
            samples,
            frame_count,
            channel_layout,
            sample_rate,
        })
    }

    pub fn empty(channel_layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            samples: Vec::new(),
            frame_count: 0,
            channel_layout,
            sample_rate,
        }
    }

    /// Wrap already interleaved samples.
    pub fn from_samples(
        samples: Vec<f32>,
        channel_layout: ChannelLayout,
        sample_rate: u32,
    ) -> Result<Self, EngineError> {
        let channels = channel_layout.count as usize;
        if channels == 0 {
            if samples.is_empty() {
                return Ok(Self::empty(channel_layout, sample_rate));
            }
            return Err(EngineError::Configuration(
                "a buffer with frames needs at least one channel".into(),
            ));
        }
        if samples.len() % channels != 0 {
            return Err(EngineError::Configuration(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        Ok(Self {
            frame_count: samples.len() / channels,
            samples,
            channel_layout,
            sample_rate,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channel_layout.count as usize
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        self.channel_layout
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat::internal(self.channel_layout, self.sample_rate)
    }

    pub fn size_bytes(&self) -> usize {
        self.frame_count * self.format().frame_size()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Samples of one frame. Panics if `index >= frame_count()`.
    pub fn frame(&self, index: usize) -> &[f32] {
        let channels = self.channel_count();
        &self.samples[index * channels..(index + 1) * channels]
    }

    pub fn frame_mut(&mut self, index: usize) -> &mut [f32] {
        let channels = self.channel_count();
        &mut self.samples[index * channels..(index + 1) * channels]
    }

    pub fn get(&self, frame: usize, channel: usize) -> f32 {
        self.samples[frame * self.channel_count() + channel]
    }

    pub fn set(&mut self, frame: usize, channel: usize, value: f32) {
        let channels = self.channel_count();
        self.samples[frame * channels + channel] = value;
    }

    /// Deep copy of up to `count` frames starting at `start`.
    ///
    /// Frames past the end are not padded: the result is shorter when the
    /// range runs off the buffer.
    pub fn sub_buffer(&self, start: usize, count: usize) -> Result<Self, EngineError> {
        let start = start.min(self.frame_count);
        let end = start.saturating_add(count).min(self.frame_count);
        let channels = self.channel_count();
        let slice = &self.samples[start * channels..end * channels];
        let mut samples = allocate(slice.len())?;
        samples.extend_from_slice(slice);
        Ok(Self {
            samples,
            frame_count: end - start,
            channel_layout: self.channel_layout,
            sample_rate: self.sample_rate,
        })
    }

    /// Reallocate to `frame_count` frames; new frames are silent.
    pub fn resize(&mut self, frame_count: usize) -> Result<(), EngineError> {
        if frame_count == self.frame_count {
            return Ok(());
        }
        if frame_count == 0 {
            self.samples = Vec::new();
            self.frame_count = 0;
            return Ok(());
        }
        let len = frame_count * self.channel_count();
        if len > self.samples.len() {
            self.samples
                .try_reserve_exact(len - self.samples.len())
                .map_err(|e| EngineError::ResourceExhausted(format!("failed to grow buffer: {}", e)))?;
        }
        self.samples.resize(len, 0.0);
        self.samples.shrink_to_fit();
        self.frame_count = frame_count;
        Ok(())
    }

    /// Append the frames of `other`, which must share this buffer's layout.
    pub fn append(&mut self, other: &SampleBuffer) -> Result<(), EngineError> {
        if other.channel_layout != self.channel_layout {
            return Err(EngineError::Configuration(
                "cannot append buffers with different channel layouts".into(),
            ));
        }
        self.samples
            .try_reserve(other.samples.len())
            .map_err(|e| EngineError::ResourceExhausted(format!("failed to grow buffer: {}", e)))?;
        self.samples.extend_from_slice(&other.samples);
        self.frame_count += other.frame_count;
        Ok(())
    }

    /// Move the contents out, leaving this buffer empty with the same format.
    pub fn take(&mut self) -> Self {
        let taken = Self {
            samples: std::mem::take(&mut self.samples),
            frame_count: self.frame_count,
            channel_layout: self.channel_layout,
            sample_rate: self.sample_rate,
        };
        self.frame_count = 0;
        taken
    }

    /// Multiply every sample by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        for sample in &mut self.samples {
            *sample *= gain;
        }
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::empty(ChannelLayout::STEREO, 48000)
    }
}

fn allocate(len: usize) -> Result<Vec<f32>, EngineError> {
    let mut samples = Vec::new();
    samples
        .try_reserve_exact(len)
        .map_err(|e| EngineError::ResourceExhausted(format!("failed to allocate {} samples: {}", len, e)))?;
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_zeroed_and_sized() {
        let buf = SampleBuffer::new(10, ChannelLayout::STEREO, 48000).unwrap();
        assert_eq!(buf.frame_count(), 10);
        assert_eq!(buf.samples().len(), 20);
        assert_eq!(buf.size_bytes(), 10 * 8);
        assert!(buf.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn zero_frame_buffer_owns_no_storage() {
        let buf = SampleBuffer::new(0, ChannelLayout::STEREO, 48000).unwrap();
        assert!(buf.is_empty());
        assert_eq!(buf.samples.capacity(), 0);
        assert_eq!(buf.size_bytes(), 0);
    }

    #[test]
    fn frames_require_channels() {
        assert!(SampleBuffer::new(4, ChannelLayout::new(0, 0), 48000).is_err());
        assert!(SampleBuffer::from_samples(vec![0.0; 3], ChannelLayout::STEREO, 48000).is_err());
    }

    #[test]
    fn clone_is_deep() {
        let mut original = SampleBuffer::filled(2, ChannelLayout::MONO, 8000, 0.5).unwrap();
        let copy = original.clone();
        original.set(0, 0, 1.0);
        assert_eq!(copy.get(0, 0), 0.5);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut source = SampleBuffer::filled(3, ChannelLayout::STEREO, 48000, 0.25).unwrap();
        let moved = source.take();
        assert_eq!(moved.frame_count(), 3);
        assert!(source.is_empty());
        assert!(source.samples().is_empty());
        assert_eq!(source.channel_layout(), ChannelLayout::STEREO);
    }

    #[test]
    fn resize_zero_fills_tail() {
        let mut buf = SampleBuffer::filled(2, ChannelLayout::STEREO, 48000, 1.0).unwrap();
        buf.resize(4).unwrap();
        assert_eq!(buf.frame_count(), 4);
        assert_eq!(buf.frame(1), &[1.0, 1.0]);
        assert_eq!(buf.frame(3), &[0.0, 0.0]);

        buf.resize(1).unwrap();
        assert_eq!(buf.samples(), &[1.0, 1.0]);

        buf.resize(0).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn sub_buffer_clips_at_end() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let buf = SampleBuffer::from_samples(samples, ChannelLayout::STEREO, 48000).unwrap();

        let sub = buf.sub_buffer(3, 10).unwrap();
        assert_eq!(sub.frame_count(), 2);
        assert_eq!(sub.samples(), &[6.0, 7.0, 8.0, 9.0]);

        assert!(buf.sub_buffer(7, 2).unwrap().is_empty());
    }

    #[test]
    fn append_requires_matching_layout() {
        let mut a = SampleBuffer::filled(1, ChannelLayout::STEREO, 48000, 0.1).unwrap();
        let b = SampleBuffer::filled(2, ChannelLayout::STEREO, 48000, 0.2).unwrap();
        a.append(&b).unwrap();
        assert_eq!(a.frame_count(), 3);

        let mono = SampleBuffer::filled(1, ChannelLayout::MONO, 48000, 0.0).unwrap();
        assert!(a.append(&mono).is_err());
    }
}
