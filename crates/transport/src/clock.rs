//! The transport clock: play/pause/stop state, tempo and the sixteenth-note
//! tick schedule.
//!
//! The clock never sleeps or spawns anything. Callers feed it the current
//! time through [`TransportClock::poll`] and receive at most one [`Tick`] per
//! call, which keeps the schedule deterministic under test.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ParamError;

pub const DEFAULT_TEMPO: u32 = 128;
pub const MIN_TEMPO: u32 = 1;
pub const MAX_TEMPO: u32 = 999;

/// Sequencer steps are sixteenth notes.
pub const STEPS_PER_BEAT: u32 = 4;

/// Length of one sequencer step: `60000 / bpm / 4` milliseconds.
///
/// ```
/// use beatgrid_transport::step_interval;
///
/// assert_eq!(step_interval(120).as_millis(), 125);
/// ```
pub fn step_interval(bpm: u32) -> Duration {
    Duration::from_secs_f64(60.0 / bpm.max(MIN_TEMPO) as f64 / STEPS_PER_BEAT as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing)
    }
}

/// One sixteenth-note pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Transport epoch the tick was scheduled in; see [`TransportClock::is_current`].
    pub epoch: u64,
    /// Running count of ticks emitted by this clock.
    pub index: u64,
    pub scheduled_at: Instant,
}

#[derive(Debug)]
pub struct TransportClock {
    state: TransportState,
    tempo: u32,
    /// Bumped on every state transition so ticks from an earlier run can be told apart.
    epoch: u64,
    emitted: u64,
    last_tick: Option<Instant>,
    next_tick: Option<Instant>,
}

impl TransportClock {
    pub fn new(tempo: u32) -> Result<Self, ParamError> {
        Ok(Self {
            state: TransportState::Stopped,
            tempo: validate_tempo(tempo)?,
            epoch: 0,
            emitted: 0,
            last_tick: None,
            next_tick: None,
        })
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn interval(&self) -> Duration {
        step_interval(self.tempo)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// When the next tick is due, or `None` while not playing.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Change the tempo for ticks not yet scheduled.
    ///
    /// A pending tick is never pulled earlier. When the new interval is longer
    /// the pending tick is pushed back so that it is at least one new interval
    /// after the previous tick.
    pub fn set_tempo(&mut self, bpm: u32) -> Result<(), ParamError> {
        let bpm = validate_tempo(bpm)?;
        if bpm == self.tempo {
            return Ok(());
        }
        debug!(from = self.tempo, to = bpm, "Tempo changed");
        self.tempo = bpm;

        if let (Some(last), Some(next)) = (self.last_tick, self.next_tick) {
            let earliest = last + self.interval();
            if earliest > next {
                self.next_tick = Some(earliest);
            }
        }
        Ok(())
    }

    /// Stopped/paused -> playing.
    ///
    /// From stopped the first tick is due at `now`. Resuming from a pause
    /// never lands closer than one interval to the last tick before it.
    /// Returns false (and changes nothing) when already playing.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.state.is_playing() {
            return false;
        }
        let due = match (self.state, self.last_tick) {
            (TransportState::Paused, Some(last)) => now.max(last + self.interval()),
            _ => now,
        };
        self.transition(TransportState::Playing);
        self.next_tick = Some(due);
        true
    }

    /// Playing -> paused. A no-op in any other state.
    pub fn pause(&mut self) -> bool {
        if !self.state.is_playing() {
            return false;
        }
        self.transition(TransportState::Paused);
        true
    }

    /// Any state -> stopped.
    pub fn stop(&mut self) {
        self.transition(TransportState::Stopped);
        self.last_tick = None;
    }

    /// Emit the pending tick if it is due at `now`.
    ///
    /// The following tick is scheduled one interval after this tick's
    /// scheduled time rather than after `now`, so a late poll catches up
    /// without dropping or merging steps.
    pub fn poll(&mut self, now: Instant) -> Option<Tick> {
        let due = self.next_tick.filter(|deadline| *deadline <= now)?;

        let tick = Tick {
            epoch: self.epoch,
            index: self.emitted,
            scheduled_at: due,
        };
        self.emitted += 1;
        self.last_tick = Some(due);
        self.next_tick = Some(due + self.interval());
        Some(tick)
    }

    /// Stale-tick guard: a tick may only be committed while the transport is
    /// still playing in the epoch that produced it.
    pub fn is_current(&self, tick: &Tick) -> bool {
        self.state.is_playing() && tick.epoch == self.epoch
    }

    fn transition(&mut self, state: TransportState) {
        debug!(from = ?self.state, to = ?state, "Transport state change");
        self.state = state;
        self.epoch += 1;
        self.next_tick = None;
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self {
            state: TransportState::Stopped,
            tempo: DEFAULT_TEMPO,
            epoch: 0,
            emitted: 0,
            last_tick: None,
            next_tick: None,
        }
    }
}

fn validate_tempo(bpm: u32) -> Result<u32, ParamError> {
    if (MIN_TEMPO..=MAX_TEMPO).contains(&bpm) {
        Ok(bpm)
    } else {
        Err(ParamError::Tempo(bpm))
    }
}
