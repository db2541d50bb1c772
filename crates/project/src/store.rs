use std::path::{Path, PathBuf};

use beatgrid_transport::{Project, ProjectId, Sample, SampleId, Track, TrackId};
use tracing::{debug, info};

use crate::{
    default_library, read_store, write_store, NewSample, ProjectData, SampleData, StoreData,
    StoreError, TrackData,
};

/// Read/write access to project, track and sample records.
///
/// Writes are synchronous and report failure to the caller; the session
/// decides what a failure means for its in-memory state.
pub trait ProjectStore {
    fn projects(&self) -> Result<Vec<Project>, StoreError>;

    fn project(&self, id: ProjectId) -> Result<Project, StoreError>;

    fn create_project(&mut self, name: &str) -> Result<Project, StoreError>;

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError>;

    /// Tracks of a project, ordered by their `order` field.
    fn tracks(&self, project: ProjectId) -> Result<Vec<Track>, StoreError>;

    /// Reserve an id for a track that has not been written yet.
    fn allocate_track_id(&mut self) -> Result<TrackId, StoreError>;

    /// Insert or replace a track record.
    fn put_track(&mut self, track: &Track) -> Result<(), StoreError>;

    /// Returns whether a record was deleted.
    fn delete_track(&mut self, id: TrackId) -> Result<bool, StoreError>;

    fn samples(&self) -> Result<Vec<Sample>, StoreError>;

    fn sample(&self, id: SampleId) -> Result<Sample, StoreError>;

    fn create_sample(&mut self, sample: NewSample) -> Result<Sample, StoreError>;

    /// Pick up samples another writer added since this store was opened.
    fn refresh(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A store kept in memory and mirrored to one file after every write.
#[derive(Debug)]
pub struct FileStore {
    path: Option<PathBuf>,
    data: StoreData,
    /// Highest track id handed out by `allocate_track_id`.
    reserved_track_id: u64,
}

impl FileStore {
    /// Open the store at `path`, creating and seeding it if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            read_store(&path)?
        } else {
            info!(path = %path.display(), "Creating project store");
            StoreData::default()
        };

        let mut store = Self {
            path: Some(path),
            data,
            reserved_track_id: 0,
        };
        if store.seed_library() || !store.path().is_some_and(Path::exists) {
            store.flush()?;
        }
        Ok(store)
    }

    /// A seeded store that is never written to disk.
    pub fn in_memory() -> Self {
        let mut store = Self {
            path: None,
            data: StoreData::default(),
            reserved_track_id: 0,
        };
        store.seed_library();
        store
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Fill an empty sample table with the default library.
    fn seed_library(&mut self) -> bool {
        if !self.data.samples.is_empty() {
            return false;
        }
        for sample in default_library() {
            let id = SampleId(next_id(self.data.samples.iter().map(|s| s.id)));
            self.data.samples.push(SampleData::from(&sample.into_sample(id)));
        }
        debug!(count = self.data.samples.len(), "Seeded default sample library");
        true
    }

    fn flush(&self) -> Result<(), StoreError> {
        match &self.path {
            Some(path) => write_store(path, &self.data),
            None => Ok(()),
        }
    }

    fn project_data_mut(&mut self, id: ProjectId) -> Result<&mut ProjectData, StoreError> {
        self.data
            .projects
            .iter_mut()
            .find(|project| project.id == id.0)
            .ok_or(StoreError::NotFound {
                kind: "project",
                id: id.0,
            })
    }
}

fn next_id(ids: impl Iterator<Item = u64>) -> u64 {
    ids.max().unwrap_or(0) + 1
}

impl ProjectStore for FileStore {
    fn projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self.data.projects.iter().cloned().map(Project::from).collect())
    }

    fn project(&self, id: ProjectId) -> Result<Project, StoreError> {
        self.data
            .projects
            .iter()
            .find(|project| project.id == id.0)
            .cloned()
            .map(Project::from)
            .ok_or(StoreError::NotFound {
                kind: "project",
                id: id.0,
            })
    }

    fn create_project(&mut self, name: &str) -> Result<Project, StoreError> {
        let id = ProjectId(next_id(self.data.projects.iter().map(|p| p.id)));
        let project = Project::new(id, name.to_string());
        self.data.projects.push(ProjectData::from(&project));
        self.flush()?;
        info!(project = %id, name, "Created project");
        Ok(project)
    }

    fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
        *self.project_data_mut(project.id)? = ProjectData::from(project);
        self.flush()
    }

    fn tracks(&self, project: ProjectId) -> Result<Vec<Track>, StoreError> {
        let mut tracks: Vec<Track> = self
            .data
            .tracks
            .iter()
            .filter(|track| track.project_id == project.0)
            .cloned()
            .map(Track::from)
            .collect();
        tracks.sort_by_key(|track| track.order);
        Ok(tracks)
    }

    fn allocate_track_id(&mut self) -> Result<TrackId, StoreError> {
        let existing = next_id(self.data.tracks.iter().map(|t| t.id));
        let id = existing.max(self.reserved_track_id + 1);
        self.reserved_track_id = id;
        Ok(TrackId(id))
    }

    fn put_track(&mut self, track: &Track) -> Result<(), StoreError> {
        let record = TrackData::from(track);
        match self.data.tracks.iter_mut().find(|t| t.id == record.id) {
            Some(existing) => *existing = record,
            None => self.data.tracks.push(record),
        }
        self.flush()
    }

    fn delete_track(&mut self, id: TrackId) -> Result<bool, StoreError> {
        let before = self.data.tracks.len();
        self.data.tracks.retain(|track| track.id != id.0);
        let deleted = self.data.tracks.len() != before;
        if deleted {
            self.flush()?;
        }
        Ok(deleted)
    }

    fn samples(&self) -> Result<Vec<Sample>, StoreError> {
        self.data
            .samples
            .iter()
            .cloned()
            .map(Sample::try_from)
            .collect()
    }

    fn sample(&self, id: SampleId) -> Result<Sample, StoreError> {
        self.data
            .samples
            .iter()
            .find(|sample| sample.id == id.0)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "sample",
                id: id.0,
            })
            .and_then(Sample::try_from)
    }

    fn create_sample(&mut self, sample: NewSample) -> Result<Sample, StoreError> {
        let id = SampleId(next_id(self.data.samples.iter().map(|s| s.id)));
        let sample = sample.into_sample(id);
        self.data.samples.push(SampleData::from(&sample));
        self.flush()?;
        info!(sample = %id, name = %sample.name, "Created sample");
        Ok(sample)
    }

    fn refresh(&mut self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref().filter(|path| path.exists()) else {
            return Ok(());
        };
        let samples = read_store(path)?.samples;
        debug!(before = self.data.samples.len(), after = samples.len(), "Refreshed samples");
        self.data.samples = samples;
        Ok(())
    }
}
