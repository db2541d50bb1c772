//! Step position and pattern evaluation.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::ParamError;
use crate::mixing::is_audible;
use crate::model::{SampleId, StepCount, Track, TrackId};

/// Instruction to play a track's bound sample at one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub track_id: TrackId,
    pub sample_id: SampleId,
    pub step: usize,
    pub scheduled_at: Instant,
}

/// Result of advancing the sequencer by one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: usize,
    pub triggers: Vec<TriggerEvent>,
}

/// Owns the track list and the play cursor.
///
/// Tracks are held as a copy-on-write snapshot. [`StepSequencer::advance`]
/// evaluates a clone of the `Arc` it sees when it starts, and every mutation
/// goes through `Arc::make_mut`, so a tick observes either the whole track set
/// before a change or the whole set after it.
#[derive(Debug, Clone)]
pub struct StepSequencer {
    tracks: Arc<Vec<Track>>,
    step_count: StepCount,
    /// `None` means "before the first step": the next tick lands on step 0.
    cursor: Option<usize>,
}

impl StepSequencer {
    pub fn new(step_count: StepCount) -> Self {
        Self {
            tracks: Arc::new(Vec::new()),
            step_count,
            cursor: None,
        }
    }

    /// Build a sequencer over existing tracks, resizing every pattern to
    /// `step_count` and ordering tracks by their `order` field.
    pub fn with_tracks(mut tracks: Vec<Track>, step_count: StepCount) -> Self {
        for track in &mut tracks {
            track.resize(step_count);
        }
        tracks.sort_by_key(|track| track.order);
        Self {
            tracks: Arc::new(tracks),
            step_count,
            cursor: None,
        }
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Cheap handle to the current track set.
    pub fn snapshot(&self) -> Arc<Vec<Track>> {
        Arc::clone(&self.tracks)
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        Arc::make_mut(&mut self.tracks)
            .iter_mut()
            .find(|track| track.id == id)
    }

    pub fn step_count(&self) -> StepCount {
        self.step_count
    }

    /// The last committed step, or 0 before the first tick.
    pub fn current_step(&self) -> usize {
        self.cursor.unwrap_or(0)
    }

    pub fn any_soloed(&self) -> bool {
        self.tracks.iter().any(|track| track.soloed)
    }

    /// Add a track, fitting its pattern to the current step count.
    pub fn add_track(&mut self, mut track: Track) {
        track.resize(self.step_count);
        let tracks = Arc::make_mut(&mut self.tracks);
        let position = tracks
            .iter()
            .position(|existing| existing.order > track.order)
            .unwrap_or(tracks.len());
        tracks.insert(position, track);
    }

    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        let index = self.tracks.iter().position(|track| track.id == id)?;
        Some(Arc::make_mut(&mut self.tracks).remove(index))
    }

    /// Flip one step of one track.
    ///
    /// Returns `Ok(None)` when the track no longer exists; toggling a deleted
    /// track is a stale operation, not an error.
    pub fn toggle_step(&mut self, id: TrackId, index: usize) -> Result<Option<bool>, ParamError> {
        let len = self.step_count.len();
        if index >= len {
            return Err(ParamError::Step { index, len });
        }
        match self.track_mut(id) {
            Some(track) => track.toggle_step(index).map(Some),
            None => {
                debug!(track = %id, step = index, "Ignoring toggle on a removed track");
                Ok(None)
            }
        }
    }

    /// Resize every pattern, truncating or zero-padding.
    pub fn set_step_count(&mut self, step_count: StepCount) {
        if step_count == self.step_count {
            return;
        }
        debug!(from = %self.step_count, to = %step_count, "Resizing patterns");
        self.step_count = step_count;
        for track in Arc::make_mut(&mut self.tracks) {
            track.resize(step_count);
        }
        self.cursor = self.cursor.map(|step| step % step_count.len());
    }

    /// Move back before step 0.
    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// The step the next call to `advance` will land on.
    pub fn next_step(&self) -> usize {
        self.cursor
            .map_or(0, |step| (step + 1) % self.step_count.len())
    }

    /// Advance one step and collect a trigger for every audible track with a
    /// bound sample whose pattern is set at the new step.
    pub fn advance(&mut self, at: Instant) -> StepOutcome {
        let snapshot = self.snapshot();
        let step = self.next_step();
        let any_soloed = snapshot.iter().any(|track| track.soloed);

        let triggers = snapshot
            .iter()
            .filter(|track| track.is_active(step))
            .filter(|track| is_audible(track.muted, track.soloed, any_soloed))
            .filter_map(|track| {
                track.sample_id.map(|sample_id| TriggerEvent {
                    track_id: track.id,
                    sample_id,
                    step,
                    scheduled_at: at,
                })
            })
            .collect();

        self.cursor = Some(step);
        StepOutcome { step, triggers }
    }
}

impl Default for StepSequencer {
    fn default() -> Self {
        Self::new(StepCount::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProjectId;

    fn track(id: u64, steps: &[usize], sample: Option<u64>) -> Track {
        let mut track = Track::new(
            TrackId(id),
            ProjectId(1),
            format!("Track {id}"),
            id as u32,
            StepCount::Sixteen,
        );
        for &step in steps {
            track.set_step(step, true).unwrap();
        }
        track.sample_id = sample.map(SampleId);
        track
    }

    fn fired(outcome: &StepOutcome) -> Vec<u64> {
        outcome.triggers.iter().map(|t| t.track_id.0).collect()
    }

    #[test]
    fn test_first_advance_lands_on_step_zero() {
        let mut sequencer = StepSequencer::default();
        assert_eq!(sequencer.current_step(), 0);

        let outcome = sequencer.advance(Instant::now());
        assert_eq!(outcome.step, 0);
        assert_eq!(sequencer.current_step(), 0);

        assert_eq!(sequencer.advance(Instant::now()).step, 1);
    }

    #[test]
    fn test_every_step_visited_once_per_cycle() {
        for count in StepCount::all() {
            for start in [0, 3, count.len() - 1] {
                let mut sequencer = StepSequencer::new(count);
                for _ in 0..=start {
                    sequencer.advance(Instant::now());
                }
                assert_eq!(sequencer.current_step(), start);

                let mut seen = vec![0; count.len()];
                for _ in 0..count.len() {
                    seen[sequencer.advance(Instant::now()).step] += 1;
                }
                assert!(seen.iter().all(|&n| n == 1), "{count} steps from {start}");
                assert_eq!(sequencer.current_step(), start);
            }
        }
    }

    #[test]
    fn test_kick_on_the_quarters() {
        let mut sequencer =
            StepSequencer::with_tracks(vec![track(1, &[0, 4, 8, 12], Some(10))], StepCount::Sixteen);

        let steps_fired: Vec<usize> = (0..5)
            .map(|_| sequencer.advance(Instant::now()))
            .filter(|outcome| !outcome.triggers.is_empty())
            .map(|outcome| outcome.step)
            .collect();
        assert_eq!(steps_fired, vec![0, 4]);
    }

    #[test]
    fn test_tracks_without_sample_do_not_fire() {
        let mut sequencer =
            StepSequencer::with_tracks(vec![track(1, &[0], None)], StepCount::Sixteen);
        assert!(sequencer.advance(Instant::now()).triggers.is_empty());
    }

    #[test]
    fn test_solo_and_mute_filter_triggers() {
        let mut a = track(1, &[0, 1], Some(1));
        let b = track(2, &[0, 1], Some(2));
        a.soloed = true;
        let mut sequencer = StepSequencer::with_tracks(vec![a, b], StepCount::Sixteen);

        assert_eq!(fired(&sequencer.advance(Instant::now())), vec![1]);

        sequencer.track_mut(TrackId(1)).unwrap().soloed = false;
        sequencer.track_mut(TrackId(2)).unwrap().muted = true;
        assert_eq!(fired(&sequencer.advance(Instant::now())), vec![1]);
    }

    #[test]
    fn test_toggle_step() {
        let mut sequencer =
            StepSequencer::with_tracks(vec![track(1, &[], Some(1))], StepCount::Sixteen);

        assert_eq!(sequencer.toggle_step(TrackId(1), 5), Ok(Some(true)));
        assert_eq!(sequencer.toggle_step(TrackId(1), 5), Ok(Some(false)));
        assert_eq!(sequencer.toggle_step(TrackId(9), 5), Ok(None));
        assert_eq!(
            sequencer.toggle_step(TrackId(1), 16),
            Err(ParamError::Step { index: 16, len: 16 })
        );
    }

    #[test]
    fn test_set_step_count_resizes_all_patterns() {
        let mut sequencer = StepSequencer::with_tracks(
            vec![track(1, &[15], Some(1)), track(2, &[0], Some(2))],
            StepCount::Sixteen,
        );

        sequencer.set_step_count(StepCount::SixtyFour);
        for track in sequencer.tracks() {
            assert_eq!(track.steps().len(), 64);
            assert!(!track.is_active(40));
        }
        sequencer.toggle_step(TrackId(1), 40).unwrap();

        sequencer.set_step_count(StepCount::ThirtyTwo);
        assert_eq!(sequencer.track(TrackId(1)).unwrap().active_steps(), vec![15]);
    }

    #[test]
    fn test_shrinking_wraps_cursor() {
        let mut sequencer = StepSequencer::new(StepCount::ThirtyTwo);
        for _ in 0..21 {
            sequencer.advance(Instant::now());
        }
        assert_eq!(sequencer.current_step(), 20);

        sequencer.set_step_count(StepCount::Sixteen);
        assert_eq!(sequencer.current_step(), 4);
        assert_eq!(sequencer.advance(Instant::now()).step, 5);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutation() {
        let mut sequencer =
            StepSequencer::with_tracks(vec![track(1, &[0], Some(1))], StepCount::Sixteen);
        let before = sequencer.snapshot();

        sequencer.add_track(track(2, &[0], Some(2)));
        sequencer.remove_track(TrackId(1));

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, TrackId(1));
        assert_eq!(sequencer.tracks().len(), 1);
        assert_eq!(sequencer.tracks()[0].id, TrackId(2));
    }

    #[test]
    fn test_reset_returns_to_step_zero() {
        let mut sequencer = StepSequencer::default();
        sequencer.advance(Instant::now());
        sequencer.advance(Instant::now());
        sequencer.reset();

        assert_eq!(sequencer.current_step(), 0);
        assert_eq!(sequencer.advance(Instant::now()).step, 0);
    }
}
