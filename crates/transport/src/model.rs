use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::clock::DEFAULT_TEMPO;
use crate::error::ParamError;
use crate::mixing::{check_level, MAX_LEVEL};

/// Knob value reported for an effect that has never been set.
pub const DEFAULT_EFFECT_VALUE: f32 = 50.0;

pub const DEFAULT_VOLUME: u8 = 75;
pub const DEFAULT_PAN: u8 = 50;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ProjectId);
id_type!(TrackId);
id_type!(SampleId);

/// Number of steps in every pattern of a sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepCount {
    #[default]
    Sixteen,
    ThirtyTwo,
    SixtyFour,
}

impl StepCount {
    pub fn len(self) -> usize {
        match self {
            StepCount::Sixteen => 16,
            StepCount::ThirtyTwo => 32,
            StepCount::SixtyFour => 64,
        }
    }

    pub fn all() -> [StepCount; 3] {
        [StepCount::Sixteen, StepCount::ThirtyTwo, StepCount::SixtyFour]
    }
}

impl TryFrom<usize> for StepCount {
    type Error = ParamError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            16 => Ok(StepCount::Sixteen),
            32 => Ok(StepCount::ThirtyTwo),
            64 => Ok(StepCount::SixtyFour),
            other => Err(ParamError::StepCount(other)),
        }
    }
}

impl fmt::Display for StepCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleCategory {
    Drums,
    Bass,
    Synths,
    Leads,
    Pads,
    Fx,
    Vocals,
}

impl SampleCategory {
    pub const ALL: [SampleCategory; 7] = [
        SampleCategory::Drums,
        SampleCategory::Bass,
        SampleCategory::Synths,
        SampleCategory::Leads,
        SampleCategory::Pads,
        SampleCategory::Fx,
        SampleCategory::Vocals,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SampleCategory::Drums => "drums",
            SampleCategory::Bass => "bass",
            SampleCategory::Synths => "synths",
            SampleCategory::Leads => "leads",
            SampleCategory::Pads => "pads",
            SampleCategory::Fx => "fx",
            SampleCategory::Vocals => "vocals",
        }
    }
}

impl FromStr for SampleCategory {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SampleCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| ParamError::Category(s.to_string()))
    }
}

impl fmt::Display for SampleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A library or user-uploaded sample record.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: SampleId,
    pub name: String,
    pub category: SampleCategory,
    /// File name relative to the samples root (or an absolute path).
    pub filename: PathBuf,
    pub tempo: Option<u32>,
    pub duration_ms: Option<u32>,
    pub tags: Vec<String>,
    pub user_uploaded: bool,
}

impl Sample {
    /// Case-insensitive substring match over the name and tags.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Beats per minute.
    pub tempo: u32,
    pub current_step: usize,
    pub is_playing: bool,
}

impl Project {
    pub fn new(id: ProjectId, name: String) -> Self {
        Self {
            id,
            name,
            tempo: DEFAULT_TEMPO,
            current_step: 0,
            is_playing: false,
        }
    }
}

/// One row of the sequencer grid together with its mixer fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub project_id: ProjectId,
    pub name: String,
    /// 0-100, see [`crate::volume_to_db`].
    pub volume: u8,
    /// 0-100, 50 is center.
    pub pan: u8,
    pub muted: bool,
    pub soloed: bool,
    pub sample_id: Option<SampleId>,
    pub effects: BTreeMap<String, f32>,
    pub order: u32,
    /// Always exactly as long as the sequencer's step count.
    /// Use resize() to change the length.
    steps: Vec<bool>,
}

impl Track {
    pub fn new(
        id: TrackId,
        project_id: ProjectId,
        name: String,
        order: u32,
        step_count: StepCount,
    ) -> Self {
        Self {
            id,
            project_id,
            name,
            volume: DEFAULT_VOLUME,
            pan: DEFAULT_PAN,
            muted: false,
            soloed: false,
            sample_id: None,
            effects: BTreeMap::new(),
            order,
            steps: vec![false; step_count.len()],
        }
    }

    /// Replace the pattern wholesale. The caller is expected to `resize` afterwards
    /// if the stored pattern came from a different step count.
    pub fn with_steps(mut self, steps: Vec<bool>) -> Self {
        self.steps = steps;
        self
    }

    pub fn steps(&self) -> &[bool] {
        &self.steps
    }

    pub fn is_active(&self, step: usize) -> bool {
        self.steps.get(step).copied().unwrap_or(false)
    }

    /// Indices of all active steps, in order.
    pub fn active_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(index, &on)| on.then_some(index))
            .collect()
    }

    /// Flip one step and return its new value.
    pub fn toggle_step(&mut self, index: usize) -> Result<bool, ParamError> {
        let len = self.steps.len();
        let step = self
            .steps
            .get_mut(index)
            .ok_or(ParamError::Step { index, len })?;
        *step = !*step;
        Ok(*step)
    }

    pub fn set_step(&mut self, index: usize, on: bool) -> Result<(), ParamError> {
        let len = self.steps.len();
        let step = self
            .steps
            .get_mut(index)
            .ok_or(ParamError::Step { index, len })?;
        *step = on;
        Ok(())
    }

    /// Truncate or zero-pad the pattern to `step_count`.
    pub fn resize(&mut self, step_count: StepCount) {
        self.steps.resize(step_count.len(), false);
    }

    pub fn set_volume(&mut self, volume: u8) -> Result<(), ParamError> {
        self.volume = check_level(volume).map_err(ParamError::Volume)?;
        Ok(())
    }

    pub fn set_pan(&mut self, pan: u8) -> Result<(), ParamError> {
        self.pan = check_level(pan).map_err(ParamError::Pan)?;
        Ok(())
    }

    pub fn effect(&self, name: &str) -> f32 {
        self.effects.get(name).copied().unwrap_or(DEFAULT_EFFECT_VALUE)
    }

    pub fn set_effect(&mut self, name: &str, value: f32) {
        self.effects
            .insert(name.to_string(), value.clamp(0.0, MAX_LEVEL as f32));
    }
}
