use std::sync::Arc;
use std::time::Instant;

use beatgrid_engine::{AudioSink, PlayRequest};
use beatgrid_transport::{
    db_to_gain, is_audible, pan_to_position, volume_to_db, AudioArc, ParamError, Track, TrackId,
    MAX_LEVEL,
};
use tracing::debug;

/// Live routing state of one track: its gain, stereo position and the
/// flags that feed the solo rule.
///
/// A channel holds a reference to the output sink until it is disposed.
/// Disposal releases the channel's voices in the sink and is idempotent;
/// dropping an undisposed channel disposes it.
pub struct TrackChannel {
    track_id: TrackId,
    volume: u8,
    pan: u8,
    muted: bool,
    soloed: bool,
    gain_db: f32,
    position: f32,
    sink: Option<Arc<dyn AudioSink>>,
}

impl TrackChannel {
    pub fn new(track: &Track, sink: Arc<dyn AudioSink>) -> Self {
        let mut channel = Self {
            track_id: track.id,
            volume: 0,
            pan: 0,
            muted: false,
            soloed: false,
            gain_db: f32::NEG_INFINITY,
            position: 0.0,
            sink: Some(sink),
        };
        channel.sync(track);
        channel
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<(), ParamError> {
        if volume > MAX_LEVEL {
            return Err(ParamError::Volume(volume));
        }
        self.volume = volume;
        self.gain_db = volume_to_db(volume);
        Ok(())
    }

    pub fn set_pan(&mut self, pan: u8) -> Result<(), ParamError> {
        if pan > MAX_LEVEL {
            return Err(ParamError::Pan(pan));
        }
        self.pan = pan;
        self.position = pan_to_position(pan);
        Ok(())
    }

    pub fn set_mute(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_solo(&mut self, soloed: bool) {
        self.soloed = soloed;
    }

    /// Recompute everything from the track's mixer fields.
    pub fn sync(&mut self, track: &Track) {
        self.volume = track.volume.min(MAX_LEVEL);
        self.gain_db = volume_to_db(self.volume);
        self.pan = track.pan.min(MAX_LEVEL);
        self.position = pan_to_position(self.pan);
        self.muted = track.muted;
        self.soloed = track.soloed;
    }

    pub fn volume(&self) -> u8 {
        self.volume
    }

    pub fn pan(&self) -> u8 {
        self.pan
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Linear amplitude factor for the current volume.
    pub fn gain(&self) -> f32 {
        db_to_gain(self.gain_db)
    }

    /// Stereo position in -1.0 ..= 1.0.
    pub fn position(&self) -> f32 {
        self.position
    }

    /// Whether this channel sounds, given whether any sibling is soloed.
    pub fn is_audible(&self, any_soloed: bool) -> bool {
        is_audible(self.muted, self.soloed, any_soloed)
    }

    pub fn is_disposed(&self) -> bool {
        self.sink.is_none()
    }

    /// Send audio through this channel's gain and pan. Returns false once
    /// the channel is disposed.
    pub fn route(&self, audio: AudioArc, at: Instant) -> bool {
        let Some(sink) = &self.sink else {
            return false;
        };
        sink.play(PlayRequest {
            audio,
            gain: self.gain(),
            pan: self.position,
            at,
            channel: Some(self.track_id),
        });
        true
    }

    /// Release the channel's engine-side resources. Only the first call has
    /// an effect; it returns true.
    pub fn dispose(&mut self) -> bool {
        match self.sink.take() {
            Some(sink) => {
                sink.release_channel(self.track_id);
                debug!(track = %self.track_id, "Channel disposed");
                true
            }
            None => false,
        }
    }
}

impl Drop for TrackChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TrackChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackChannel")
            .field("track_id", &self.track_id)
            .field("volume", &self.volume)
            .field("pan", &self.pan)
            .field("muted", &self.muted)
            .field("soloed", &self.soloed)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatgrid_engine::RecordingSink;
    use beatgrid_transport::{ProjectId, StepCount};

    fn track() -> Track {
        Track::new(TrackId(3), ProjectId(1), "Snare".to_string(), 0, StepCount::Sixteen)
    }

    fn channel() -> (TrackChannel, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (TrackChannel::new(&track(), sink.clone()), sink)
    }

    #[test]
    fn test_new_channel_follows_track_defaults() {
        let (channel, _) = channel();
        assert_eq!(channel.volume(), 75);
        assert!((channel.gain_db() - -15.0).abs() < 1e-4);
        assert_eq!(channel.position(), 0.0);
        assert!(channel.is_audible(false));
    }

    #[test]
    fn test_volume_and_pan_mapping() {
        let (mut channel, _) = channel();

        channel.set_volume(0).unwrap();
        assert_eq!(channel.gain_db(), f32::NEG_INFINITY);
        assert_eq!(channel.gain(), 0.0);

        channel.set_volume(100).unwrap();
        assert_eq!(channel.gain(), 1.0);

        channel.set_pan(0).unwrap();
        assert_eq!(channel.position(), -1.0);
        channel.set_pan(100).unwrap();
        assert_eq!(channel.position(), 1.0);
    }

    #[test]
    fn test_invalid_values_leave_channel_untouched() {
        let (mut channel, _) = channel();
        assert_eq!(channel.set_volume(101), Err(ParamError::Volume(101)));
        assert_eq!(channel.set_pan(255), Err(ParamError::Pan(255)));
        assert_eq!((channel.volume(), channel.pan()), (75, 50));
    }

    #[test]
    fn test_audibility_under_solo() {
        let (mut channel, _) = channel();
        assert!(!channel.is_audible(true), "another channel is soloed");

        channel.set_solo(true);
        assert!(channel.is_audible(true));

        channel.set_mute(true);
        assert!(!channel.is_audible(true));
        assert!(!channel.is_audible(false));
    }

    #[test]
    fn test_route_applies_gain_and_pan() {
        let (mut channel, sink) = channel();
        channel.set_volume(100).unwrap();
        channel.set_pan(100).unwrap();

        assert!(channel.route(AudioArc::new(vec![0.0; 2], 44100, 1), Instant::now()));
        let play = &sink.plays()[0];
        assert_eq!(play.gain, 1.0);
        assert_eq!(play.pan, 1.0);
        assert_eq!(play.channel, Some(TrackId(3)));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (mut channel, sink) = channel();

        assert!(channel.dispose());
        assert!(!channel.dispose());
        drop(channel);

        assert_eq!(sink.released(), vec![TrackId(3)]);
    }

    #[test]
    fn test_disposed_channel_does_not_route() {
        let (mut channel, sink) = channel();
        channel.dispose();

        assert!(!channel.route(AudioArc::new(vec![0.0; 2], 44100, 1), Instant::now()));
        assert_eq!(sink.play_count(), 0);
    }

    #[test]
    fn test_drop_disposes() {
        let (channel, sink) = channel();
        drop(channel);
        assert_eq!(sink.released(), vec![TrackId(3)]);
    }
}
