mod library;
mod load;
mod save;
mod store;
mod upload;

use std::collections::BTreeMap;
use std::path::PathBuf;

use beatgrid_transport::{
    ParamError, Project, ProjectId, Sample, SampleCategory, SampleId, Track, TrackId, MAX_LEVEL,
};
use serde::{Deserialize, Serialize};

pub use library::{default_library, search};
pub use load::read_store;
pub use save::write_store;
pub use store::{FileStore, ProjectStore};
pub use upload::{import_sample, Upload, ALLOWED_EXTENSIONS, MAX_UPLOAD_BYTES};

/// On-disk layout of a store file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub projects: Vec<ProjectData>,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
    #[serde(default)]
    pub samples: Vec<SampleData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectData {
    pub id: u64,
    pub name: String,
    #[serde(default = "default_bpm")]
    pub bpm: u32,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub current_step: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackData {
    pub id: u64,
    pub project_id: u64,
    pub name: String,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default = "default_pan")]
    pub pan: u8,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_soloed: bool,
    #[serde(default)]
    pub sample_id: Option<u64>,
    #[serde(default)]
    pub steps: Vec<bool>,
    #[serde(default)]
    pub effects: BTreeMap<String, f32>,
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleData {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub filename: PathBuf,
    #[serde(default)]
    pub bpm: Option<u32>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_user_uploaded: bool,
}

/// Fields of a sample record before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub name: String,
    pub category: SampleCategory,
    pub filename: PathBuf,
    pub tempo: Option<u32>,
    pub duration_ms: Option<u32>,
    pub tags: Vec<String>,
    pub user_uploaded: bool,
}

impl NewSample {
    pub fn into_sample(self, id: SampleId) -> Sample {
        Sample {
            id,
            name: self.name,
            category: self.category,
            filename: self.filename,
            tempo: self.tempo,
            duration_ms: self.duration_ms,
            tags: self.tags,
            user_uploaded: self.user_uploaded,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("invalid record: {0}")]
    Invalid(#[from] ParamError),

    #[error("upload rejected: {0}")]
    Rejected(String),
}

fn default_bpm() -> u32 {
    beatgrid_transport::DEFAULT_TEMPO
}

fn default_volume() -> u8 {
    beatgrid_transport::DEFAULT_VOLUME
}

fn default_pan() -> u8 {
    beatgrid_transport::DEFAULT_PAN
}

impl From<&Project> for ProjectData {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.0,
            name: project.name.clone(),
            bpm: project.tempo,
            is_playing: project.is_playing,
            current_step: project.current_step,
        }
    }
}

impl From<ProjectData> for Project {
    fn from(data: ProjectData) -> Self {
        Project {
            id: ProjectId(data.id),
            name: data.name,
            tempo: data.bpm,
            current_step: data.current_step,
            is_playing: data.is_playing,
        }
    }
}

impl From<&Track> for TrackData {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id.0,
            project_id: track.project_id.0,
            name: track.name.clone(),
            volume: track.volume,
            pan: track.pan,
            is_muted: track.muted,
            is_soloed: track.soloed,
            sample_id: track.sample_id.map(|id| id.0),
            steps: track.steps().to_vec(),
            effects: track.effects.clone(),
            order: track.order,
        }
    }
}

impl From<TrackData> for Track {
    /// Out-of-range mixer values written by other tools are clamped. The
    /// pattern keeps its stored length; the sequencer resizes it on load.
    fn from(data: TrackData) -> Self {
        let steps = data.steps;
        let mut track = Track::new(
            TrackId(data.id),
            ProjectId(data.project_id),
            data.name,
            data.order,
            Default::default(),
        )
        .with_steps(steps);
        track.volume = data.volume.min(MAX_LEVEL);
        track.pan = data.pan.min(MAX_LEVEL);
        track.muted = data.is_muted;
        track.soloed = data.is_soloed;
        track.sample_id = data.sample_id.map(SampleId);
        track.effects = data.effects;
        track
    }
}

impl From<&Sample> for SampleData {
    fn from(sample: &Sample) -> Self {
        Self {
            id: sample.id.0,
            name: sample.name.clone(),
            category: sample.category.to_string(),
            filename: sample.filename.clone(),
            bpm: sample.tempo,
            duration: sample.duration_ms,
            tags: sample.tags.clone(),
            is_user_uploaded: sample.user_uploaded,
        }
    }
}

impl TryFrom<SampleData> for Sample {
    type Error = StoreError;

    fn try_from(data: SampleData) -> Result<Self, Self::Error> {
        Ok(Sample {
            id: SampleId(data.id),
            name: data.name,
            category: data.category.parse()?,
            filename: data.filename,
            tempo: data.bpm,
            duration_ms: data.duration,
            tags: data.tags,
            user_uploaded: data.is_user_uploaded,
        })
    }
}
