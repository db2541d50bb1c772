use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Shared, immutable decoded sample data.
///
/// `AudioArc` is the handle the sample cache hands out: cloning only bumps a
/// reference count, so every trigger of the same sample plays from one buffer.
///
/// # Memory Layout
///
/// ```text
/// AudioArc (24 bytes on stack)
/// ├─ samples: Arc<[f32]> (16 bytes) ────> Heap: [f32; N]
/// ├─ sample_rate: u32 (4 bytes)
/// └─ channels: u16 (2 bytes)
/// ```
///
/// # Examples
///
/// ```
/// use beatgrid_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(audio.frames(), 2);
/// assert!(audio.shares_storage(&shared));
/// ```
#[derive(Clone)]
pub struct AudioArc {
    /// Interleaved samples, [L, R, L, R, ...] for stereo.
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// Create a new `AudioArc` from owned interleaved samples.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    /// A zero-length buffer, used where a sample has not been bound yet.
    pub fn silent(sample_rate: u32, channels: u16) -> Self {
        Self::new(Vec::new(), sample_rate, channels)
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Whether two handles point at the same decoded buffer.
    pub fn shares_storage(&self, other: &AudioArc) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    /// Stereo frame at `frame`, duplicating mono sources into both sides.
    ///
    /// Returns silence past the end of the buffer.
    #[inline]
    pub fn stereo_frame(&self, frame: usize) -> (f32, f32) {
        let channels = self.channels as usize;
        let base = frame * channels;
        match (self.samples.get(base), channels) {
            (Some(&mono), 1) => (mono, mono),
            (Some(&left), _) => (left, self.samples.get(base + 1).copied().unwrap_or(left)),
            (None, _) => (0.0, 0.0),
        }
    }

    /// Resample this audio to a target sample rate.
    ///
    /// If the audio is already at the target rate, returns a clone (cheap refcount bump).
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(Self::silent(target_sample_rate, self.channels));
        }

        let channels = self.channels as usize;
        let input_frames = self.frames();
        let resample_ratio = target_sample_rate as f64 / self.sample_rate as f64;
        let output_frames = (input_frames as f64 * resample_ratio).ceil() as usize;

        // rubato works on planar buffers
        let mut input_channels = vec![Vec::with_capacity(input_frames); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                input_channels[ch].push(*sample);
            }
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let mut resampler =
            SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;
        let output_channels = resampler.process(&input_channels, None)?;

        let mut output_samples = Vec::with_capacity(output_frames * channels);
        for frame_idx in 0..output_channels[0].len() {
            for channel in &output_channels {
                output_samples.push(channel[frame_idx]);
            }
        }

        Ok(Self::new(output_samples, target_sample_rate, self.channels))
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}
