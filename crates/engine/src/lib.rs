//! The audio output boundary.
//!
//! Everything above this crate talks to an [`AudioSink`]: hand it a decoded
//! buffer, a gain, a pan position and a time, and it renders the sound.
//! [`CpalSink`] plays through the default output device, [`RecordingSink`]
//! just remembers what it was asked to do.

mod mix;
mod output;
mod recording;

use std::time::Instant;

use beatgrid_transport::{AudioArc, TrackId};

pub use mix::{VoiceMixer, VoiceSource, MAX_VOICES};
pub use output::CpalSink;
pub use recording::RecordingSink;

/// One sound to render.
#[derive(Debug, Clone)]
pub struct PlayRequest {
    pub audio: AudioArc,
    /// Linear amplitude factor (already includes the channel's volume).
    pub gain: f32,
    /// Stereo position, -1.0 (left) ..= 1.0 (right).
    pub pan: f32,
    /// When the sound should start. Times in the past start immediately.
    pub at: Instant,
    /// Channel the sound is routed through, `None` for previews.
    pub channel: Option<TrackId>,
}

pub trait AudioSink: Send + Sync {
    /// Rate that buffers passed to [`AudioSink::play`] are expected to be at.
    fn sample_rate(&self) -> u32;

    fn play(&self, request: PlayRequest);

    /// Scale the aggregate output. Applied after per-voice gain and pan.
    fn set_master_gain(&self, gain: f32);

    /// Release everything the sink holds for a channel, silencing its voices.
    fn release_channel(&self, channel: TrackId);
}
