use std::collections::BTreeMap;
use std::sync::Arc;

use beatgrid_engine::AudioSink;
use beatgrid_transport::{
    db_to_gain, volume_to_db, ParamError, Sample, Track, TrackId, TriggerEvent, MAX_LEVEL,
};
use tracing::{debug, info};

use crate::cache::{SampleCache, TriggerOutcome};
use crate::channel::TrackChannel;
use crate::error::CoreError;

/// One per running session: owns every track channel and the master gain.
///
/// Channels are inserted when a track is created and removed (and disposed)
/// when it is deleted. Closing the bus disposes all of them before the sink
/// is let go.
pub struct MixerBus {
    channels: BTreeMap<TrackId, TrackChannel>,
    master_volume: u8,
    sink: Arc<dyn AudioSink>,
    closed: bool,
}

impl MixerBus {
    pub fn new(sink: Arc<dyn AudioSink>, master_volume: u8) -> Result<Self, ParamError> {
        let mut bus = Self {
            channels: BTreeMap::new(),
            master_volume: 0,
            sink,
            closed: false,
        };
        bus.set_master_volume(master_volume)?;
        Ok(bus)
    }

    pub fn sink(&self) -> Arc<dyn AudioSink> {
        Arc::clone(&self.sink)
    }

    pub fn add_channel(&mut self, track: &Track) -> Result<(), CoreError> {
        if self.closed {
            return Err(CoreError::Closed);
        }
        if self.channels.contains_key(&track.id) {
            return Err(CoreError::DuplicateChannel(track.id));
        }
        self.channels
            .insert(track.id, TrackChannel::new(track, self.sink()));
        debug!(track = %track.id, "Channel added");
        Ok(())
    }

    /// Remove and dispose a channel. Returns false if there was none.
    pub fn remove_channel(&mut self, id: TrackId) -> bool {
        match self.channels.remove(&id) {
            Some(mut channel) => {
                channel.dispose();
                true
            }
            None => false,
        }
    }

    pub fn channel(&self, id: TrackId) -> Option<&TrackChannel> {
        self.channels.get(&id)
    }

    pub fn channel_mut(&mut self, id: TrackId) -> Option<&mut TrackChannel> {
        self.channels.get_mut(&id)
    }

    /// Recompute a channel from its track's mixer fields.
    pub fn sync_channel(&mut self, track: &Track) {
        if let Some(channel) = self.channels.get_mut(&track.id) {
            channel.sync(track);
        }
    }

    pub fn any_soloed(&self) -> bool {
        self.channels.values().any(TrackChannel::is_soloed)
    }

    /// Audibility of one channel against its siblings. Unknown ids are silent.
    pub fn is_audible(&self, id: TrackId) -> bool {
        let any_soloed = self.any_soloed();
        self.channels
            .get(&id)
            .is_some_and(|channel| channel.is_audible(any_soloed))
    }

    pub fn master_volume(&self) -> u8 {
        self.master_volume
    }

    /// Same 0-100 mapping as a channel's volume, applied after channel gain.
    pub fn set_master_volume(&mut self, volume: u8) -> Result<(), ParamError> {
        if volume > MAX_LEVEL {
            return Err(ParamError::Volume(volume));
        }
        self.master_volume = volume;
        self.sink.set_master_gain(db_to_gain(volume_to_db(volume)));
        Ok(())
    }

    /// Hand one trigger to the cache through the track's channel.
    ///
    /// `sample` is `None` when the bound sample is unknown to the library;
    /// such triggers are reported as not loaded.
    pub fn trigger(
        &self,
        cache: &SampleCache,
        event: &TriggerEvent,
        sample: Option<&Sample>,
    ) -> TriggerOutcome {
        let (Some(channel), Some(sample)) = (self.channels.get(&event.track_id), sample) else {
            return TriggerOutcome::NotLoaded;
        };
        cache.trigger(channel, self.any_soloed(), sample, event.scheduled_at)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Dispose every channel. Only the first call does anything.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let count = self.channels.len();
        for (_, mut channel) in std::mem::take(&mut self.channels) {
            channel.dispose();
        }
        info!(channels = count, "Mixer bus closed");
    }
}

impl Drop for MixerBus {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MixerBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixerBus")
            .field("channels", &self.channels.len())
            .field("master_volume", &self.master_volume)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{sample, CountingDecoder};
    use beatgrid_engine::RecordingSink;
    use beatgrid_transport::{AudioArc, ProjectId, SampleId, StepCount};
    use std::time::Instant;

    fn track(id: u64) -> Track {
        Track::new(
            TrackId(id),
            ProjectId(1),
            format!("Track {id}"),
            id as u32,
            StepCount::Sixteen,
        )
    }

    fn bus() -> (MixerBus, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let mut bus = MixerBus::new(sink.clone(), 100).unwrap();
        bus.add_channel(&track(1)).unwrap();
        bus.add_channel(&track(2)).unwrap();
        (bus, sink)
    }

    #[test]
    fn test_solo_silences_siblings() {
        let (mut bus, _) = bus();
        let (a, b) = (TrackId(1), TrackId(2));

        bus.channel_mut(a).unwrap().set_solo(true);
        assert!(bus.is_audible(a));
        assert!(!bus.is_audible(b));

        bus.channel_mut(a).unwrap().set_solo(false);
        assert!(bus.is_audible(a));
        assert!(bus.is_audible(b));
    }

    #[test]
    fn test_master_volume_reaches_sink() {
        let (mut bus, sink) = bus();
        assert_eq!(sink.master_gain(), 1.0);

        bus.set_master_volume(0).unwrap();
        assert_eq!(sink.master_gain(), 0.0);

        assert_eq!(bus.set_master_volume(150), Err(ParamError::Volume(150)));
        assert_eq!(bus.master_volume(), 0);
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let (mut bus, _) = bus();
        assert!(matches!(
            bus.add_channel(&track(1)),
            Err(CoreError::DuplicateChannel(TrackId(1)))
        ));
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn test_remove_disposes_channel() {
        let (mut bus, sink) = bus();

        assert!(bus.remove_channel(TrackId(2)));
        assert!(!bus.remove_channel(TrackId(2)));
        assert_eq!(sink.released(), vec![TrackId(2)]);
        assert!(!bus.is_audible(TrackId(2)));
    }

    #[test]
    fn test_close_releases_everything_once() {
        let (mut bus, sink) = bus();

        bus.close();
        bus.close();
        assert!(bus.is_empty());
        assert!(matches!(bus.add_channel(&track(3)), Err(CoreError::Closed)));
        drop(bus);

        assert_eq!(sink.released(), vec![TrackId(1), TrackId(2)]);
    }

    #[test]
    fn test_trigger_routes_through_channel() {
        let (mut bus, sink) = bus();
        let cache = SampleCache::new(Arc::new(CountingDecoder::default()), 44100);
        let kick = sample(1);
        cache.insert(kick.id, AudioArc::new(vec![1.0; 4], 44100, 1));
        bus.channel_mut(TrackId(1)).unwrap().set_volume(50).unwrap();

        let event = TriggerEvent {
            track_id: TrackId(1),
            sample_id: SampleId(1),
            step: 0,
            scheduled_at: Instant::now(),
        };
        assert_eq!(bus.trigger(&cache, &event, Some(&kick)), TriggerOutcome::Played);
        assert_eq!(bus.trigger(&cache, &event, None), TriggerOutcome::NotLoaded);

        let play = &sink.plays()[0];
        assert_eq!(play.channel, Some(TrackId(1)));
        // 50 maps to -30 dB
        assert!((play.gain - db_to_gain(-30.0)).abs() < 1e-6);
    }
}
