use basedrop::Shared;
use beatgrid_transport::{pan_gains, AudioArc, TrackId};

/// Polyphony limit. When all voices are busy the oldest one is stolen.
pub const MAX_VOICES: usize = 64;

/// Anything a voice can read samples from.
///
/// The realtime output holds buffers as [`basedrop::Shared`] so that the last
/// reference is never freed on the audio thread; offline rendering uses plain
/// [`AudioArc`] handles.
pub trait VoiceSource {
    fn audio(&self) -> &AudioArc;
}

impl VoiceSource for AudioArc {
    fn audio(&self) -> &AudioArc {
        self
    }
}

impl VoiceSource for Shared<AudioArc> {
    fn audio(&self) -> &AudioArc {
        self
    }
}

struct Voice<S> {
    source: S,
    channel: Option<TrackId>,
    start_frame: u64,
    gain_l: f32,
    gain_r: f32,
}

impl<S: VoiceSource> Voice<S> {
    fn finished(&self, frame: u64) -> bool {
        frame >= self.start_frame + self.source.audio().frames() as u64
    }
}

/// Sums scheduled one-shot voices into a stereo stream.
///
/// The mixer keeps its own frame counter; voices are scheduled against it and
/// start sample-accurately once the counter reaches their start frame. No
/// method allocates once the mixer is constructed, so it can run inside an
/// output callback.
pub struct VoiceMixer<S> {
    voices: Vec<Voice<S>>,
    master_gain: f32,
    frame: u64,
}

impl<S: VoiceSource> VoiceMixer<S> {
    pub fn new() -> Self {
        Self {
            voices: Vec::with_capacity(MAX_VOICES),
            master_gain: 1.0,
            frame: 0,
        }
    }

    /// Frames rendered so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    /// Schedule a voice. A start frame already in the past starts now.
    ///
    /// Returns the source of the voice that was stolen to make room, if any.
    pub fn add(
        &mut self,
        source: S,
        gain: f32,
        pan: f32,
        start_frame: u64,
        channel: Option<TrackId>,
    ) -> Option<S> {
        let mut stolen = None;
        if self.voices.len() >= MAX_VOICES {
            let oldest = self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, voice)| voice.start_frame)
                .map(|(index, _)| index);
            if let Some(index) = oldest {
                stolen = Some(self.voices.swap_remove(index).source);
            }
        }

        let (left, right) = pan_gains(pan);
        self.voices.push(Voice {
            source,
            channel,
            start_frame: start_frame.max(self.frame),
            gain_l: gain * left,
            gain_r: gain * right,
        });
        stolen
    }

    /// Cut every voice routed through `channel`.
    pub fn release_channel(&mut self, channel: TrackId) {
        self.voices.retain(|voice| voice.channel != Some(channel));
    }

    /// Render one stereo frame and advance the frame counter.
    #[inline]
    pub fn next_frame(&mut self) -> (f32, f32) {
        let mut left = 0.0;
        let mut right = 0.0;
        for voice in &self.voices {
            if self.frame < voice.start_frame {
                continue;
            }
            let position = (self.frame - voice.start_frame) as usize;
            let (l, r) = voice.source.audio().stereo_frame(position);
            left += l * voice.gain_l;
            right += r * voice.gain_r;
        }
        self.frame += 1;
        (left * self.master_gain, right * self.master_gain)
    }

    /// Fill an interleaved buffer with `channels` channels per frame.
    ///
    /// Stereo goes to the first two channels (mono output gets the average);
    /// any further channels are silent.
    pub fn process(&mut self, out: &mut [f32], channels: usize) {
        for frame in out.chunks_mut(channels.max(1)) {
            let (left, right) = self.next_frame();
            match frame {
                [mono] => *mono = (left + right) * 0.5,
                [l, r, rest @ ..] => {
                    *l = left;
                    *r = right;
                    rest.fill(0.0);
                }
                [] => {}
            }
        }
        self.reap();
    }

    /// Drop voices that have played to the end.
    pub fn reap(&mut self) {
        let frame = self.frame;
        self.voices.retain(|voice| !voice.finished(frame));
    }

    /// Whether nothing is playing or scheduled.
    pub fn is_idle(&self) -> bool {
        self.voices.is_empty()
    }

    /// Last frame any current voice will produce sound on.
    pub fn tail_end(&self) -> u64 {
        self.voices
            .iter()
            .map(|voice| voice.start_frame + voice.source.audio().frames() as u64)
            .max()
            .unwrap_or(self.frame)
    }
}

impl<S: VoiceSource> Default for VoiceMixer<S> {
    fn default() -> Self {
        Self::new()
    }
}
