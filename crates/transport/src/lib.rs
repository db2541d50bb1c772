//! Pure pattern and timing model for the step sequencer.
//!
//! Nothing in this crate touches an audio device, a file or a runtime: the
//! clock is driven by the caller's `Instant`s and the sequencer by the clock's
//! ticks, so both can be tested deterministically.

mod audio;
mod clock;
mod error;
mod mixing;
mod model;
mod sequencer;

pub use audio::AudioArc;
pub use clock::{
    step_interval, Tick, TransportClock, TransportState, DEFAULT_TEMPO, MAX_TEMPO, MIN_TEMPO,
    STEPS_PER_BEAT,
};
pub use error::ParamError;
pub use mixing::{db_to_gain, is_audible, pan_gains, pan_to_position, volume_to_db, MAX_LEVEL};
pub use model::{
    Project, ProjectId, Sample, SampleCategory, SampleId, StepCount, Track, TrackId,
    DEFAULT_EFFECT_VALUE, DEFAULT_PAN, DEFAULT_VOLUME,
};
pub use sequencer::{StepOutcome, StepSequencer, TriggerEvent};
