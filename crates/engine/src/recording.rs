use beatgrid_transport::TrackId;
use parking_lot::Mutex;
use tracing::debug;

use crate::{AudioSink, PlayRequest};

#[derive(Debug)]
struct Recorded {
    plays: Vec<PlayRequest>,
    master_gain: f32,
    released: Vec<TrackId>,
}

/// A sink that renders nothing and records every request it receives.
#[derive(Debug)]
pub struct RecordingSink {
    sample_rate: u32,
    recorded: Mutex<Recorded>,
}

impl RecordingSink {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            recorded: Mutex::new(Recorded {
                plays: Vec::new(),
                master_gain: 1.0,
                released: Vec::new(),
            }),
        }
    }

    pub fn plays(&self) -> Vec<PlayRequest> {
        self.recorded.lock().plays.clone()
    }

    pub fn play_count(&self) -> usize {
        self.recorded.lock().plays.len()
    }

    /// Plays routed through `channel`.
    pub fn plays_on(&self, channel: TrackId) -> usize {
        self.recorded
            .lock()
            .plays
            .iter()
            .filter(|play| play.channel == Some(channel))
            .count()
    }

    pub fn master_gain(&self) -> f32 {
        self.recorded.lock().master_gain
    }

    pub fn released(&self) -> Vec<TrackId> {
        self.recorded.lock().released.clone()
    }

    pub fn clear(&self) {
        let mut recorded = self.recorded.lock();
        recorded.plays.clear();
        recorded.released.clear();
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new(44100)
    }
}

impl AudioSink for RecordingSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn play(&self, request: PlayRequest) {
        debug!(
            channel = ?request.channel,
            gain = request.gain,
            pan = request.pan,
            frames = request.audio.frames(),
            "Play"
        );
        self.recorded.lock().plays.push(request);
    }

    fn set_master_gain(&self, gain: f32) {
        self.recorded.lock().master_gain = gain;
    }

    fn release_channel(&self, channel: TrackId) {
        self.recorded.lock().released.push(channel);
    }
}
