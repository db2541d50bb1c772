//! Serializable views of a session for front ends.
//!
//! These are plain snapshots: nothing in here points back into the live
//! session, so a snapshot can be sent to another thread or written out as
//! JSON.

use beatgrid_transport::{Track, TransportState};
use serde::{Deserialize, Serialize};

use crate::time::StepPosition;

/// Complete snapshot of the session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub project_id: u64,
    pub name: String,
    pub tempo: u32,
    pub playback_state: PlaybackState,
    pub current_step: usize,
    /// Bar/beat/sixteenth of `current_step`, e.g. `"1.2.3"`.
    pub position: String,
    pub step_count: usize,
    pub master_volume: u8,
    pub tracks: Vec<TrackSnapshot>,
}

/// Playback state as a string enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl From<TransportState> for PlaybackState {
    fn from(state: TransportState) -> Self {
        match state {
            TransportState::Stopped => PlaybackState::Stopped,
            TransportState::Playing => PlaybackState::Playing,
            TransportState::Paused => PlaybackState::Paused,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSnapshot {
    pub id: u64,
    pub name: String,
    pub volume: u8,
    pub pan: u8,
    pub muted: bool,
    pub soloed: bool,
    /// Derived from the solo rule across all tracks.
    pub audible: bool,
    pub sample_id: Option<u64>,
    pub sample_name: Option<String>,
    pub steps: Vec<bool>,
}

impl TrackSnapshot {
    pub fn new(track: &Track, audible: bool, sample_name: Option<String>) -> Self {
        Self {
            id: track.id.0,
            name: track.name.clone(),
            volume: track.volume,
            pan: track.pan,
            muted: track.muted,
            soloed: track.soloed,
            audible,
            sample_id: track.sample_id.map(|id| id.0),
            sample_name,
            steps: track.steps().to_vec(),
        }
    }

    /// One line of the grid, `x` for set steps and `.` otherwise, with a
    /// space every four steps.
    pub fn pattern(&self) -> String {
        let mut out = String::with_capacity(self.steps.len() * 5 / 4);
        for (index, &on) in self.steps.iter().enumerate() {
            if index > 0 && index % 4 == 0 {
                out.push(' ');
            }
            out.push(if on { 'x' } else { '.' });
        }
        out
    }
}

impl SessionSnapshot {
    pub fn position(current_step: usize) -> String {
        StepPosition::from_step(current_step).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beatgrid_transport::{ProjectId, SampleId, StepCount, TrackId};

    #[test]
    fn test_track_snapshot_json_shape() {
        let mut track = Track::new(TrackId(7), ProjectId(1), "Kick".to_string(), 0, StepCount::Sixteen);
        track.sample_id = Some(SampleId(1));
        track.set_step(0, true).unwrap();

        let snapshot = TrackSnapshot::new(&track, true, Some("Kick 01".to_string()));
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["sampleId"], 1);
        assert_eq!(json["sampleName"], "Kick 01");
        assert_eq!(json["steps"].as_array().unwrap().len(), 16);
        assert_eq!(snapshot.pattern(), "x... .... .... ....");
    }

    #[test]
    fn test_playback_state_is_lowercase() {
        let json = serde_json::to_string(&PlaybackState::from(TransportState::Paused)).unwrap();
        assert_eq!(json, "\"paused\"");
    }
}
