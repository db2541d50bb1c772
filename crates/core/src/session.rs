use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use beatgrid_engine::AudioSink;
use beatgrid_project::{ProjectStore, StoreError};
use beatgrid_render::{render_pattern, write_wav, RenderSettings};
use beatgrid_transport::{
    AudioArc, ParamError, Project, ProjectId, Sample, SampleId, StepCount, StepSequencer, Tick,
    Track, TrackId, TransportClock, TransportState, DEFAULT_VOLUME,
};
use tracing::{debug, info, warn};

use crate::cache::{SampleCache, SampleDecoder, TriggerOutcome};
use crate::error::CoreError;
use crate::mixer::MixerBus;
use crate::snapshot::{SessionSnapshot, TrackSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub step_count: StepCount,
    pub master_volume: u8,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            step_count: StepCount::default(),
            master_volume: DEFAULT_VOLUME,
        }
    }
}

/// Something a front end should surface that did not fail the call that
/// caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A store write failed. The in-memory state was kept.
    PersistenceFailed { target: String, message: String },
}

/// What one committed tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: usize,
    pub tick: Tick,
    pub triggers: Vec<(TrackId, TriggerOutcome)>,
}

impl StepReport {
    pub fn played(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.triggers
            .iter()
            .filter(|(_, outcome)| *outcome == TriggerOutcome::Played)
            .map(|(track, _)| *track)
    }
}

/// A preview detached from the session, so the caller can await the load
/// without holding the session.
pub struct PreviewTask {
    cache: SampleCache,
    sample: Sample,
    sink: Arc<dyn AudioSink>,
}

impl PreviewTask {
    pub fn sample_id(&self) -> SampleId {
        self.sample.id
    }

    pub async fn run(self) -> Result<(), CoreError> {
        self.cache.preview(&self.sample, self.sink).await
    }
}

/// A bounce of the pattern as it was when the job was taken. Decoding and
/// mixing happen away from the session.
pub struct RenderJob {
    cache: SampleCache,
    samples: Vec<Sample>,
    tracks: Vec<Track>,
    settings: RenderSettings,
}

impl RenderJob {
    /// Load any missing samples on the runtime, then mix and write on a
    /// blocking thread.
    pub async fn write(self, path: PathBuf) -> anyhow::Result<()> {
        let RenderJob {
            cache,
            samples,
            tracks,
            settings,
        } = self;
        let mut audio = HashMap::new();
        for sample in &samples {
            match cache.load(sample).await {
                Ok(decoded) => {
                    audio.insert(sample.id, decoded);
                }
                Err(err) => warn!(error = %err, "Leaving sample out of render"),
            }
        }
        tokio::task::spawn_blocking(move || bounce(&tracks, &audio, settings, &path)).await?
    }

    /// Same as [`RenderJob::write`], decoding on the calling thread.
    pub fn write_blocking(self, path: &Path) -> anyhow::Result<()> {
        let mut audio = HashMap::new();
        for sample in &self.samples {
            match self.cache.load_blocking(sample) {
                Ok(decoded) => {
                    audio.insert(sample.id, decoded);
                }
                Err(err) => warn!(error = %err, "Leaving sample out of render"),
            }
        }
        bounce(&self.tracks, &audio, self.settings, path)
    }
}

fn bounce(
    tracks: &[Track],
    samples: &HashMap<SampleId, AudioArc>,
    settings: RenderSettings,
    path: &Path,
) -> anyhow::Result<()> {
    let audio = render_pattern(tracks, samples, settings)?;
    write_wav(&audio, path)?;
    info!(
        path = %path.display(),
        loops = settings.loops,
        seconds = audio.duration_secs(),
        "Rendered to file"
    );
    Ok(())
}

/// One open project: transport, pattern, channels and sample cache.
///
/// Every mutation updates memory first and then writes through to the
/// store. A failed write is logged and queued as a [`SessionEvent`]; the
/// in-memory state stays authoritative for the rest of the session.
///
/// Ticks are pulled, never pushed: the owner asks [`Session::next_tick`]
/// (or [`Session::poll`]) when the next deadline passes and hands the tick
/// back to [`Session::handle_tick`]. Because both take `&mut self`, a tick
/// can never interleave with a mutation.
pub struct Session {
    project: Project,
    clock: TransportClock,
    sequencer: StepSequencer,
    bus: MixerBus,
    cache: SampleCache,
    library: BTreeMap<SampleId, Sample>,
    store: Box<dyn ProjectStore + Send>,
    events: Vec<SessionEvent>,
    closed: bool,
}

impl Session {
    pub fn open(
        store: Box<dyn ProjectStore + Send>,
        project_id: ProjectId,
        sink: Arc<dyn AudioSink>,
        decoder: Arc<dyn SampleDecoder>,
        options: SessionOptions,
    ) -> Result<Self, CoreError> {
        let mut project = store.project(project_id)?;
        let tracks = store.tracks(project_id)?;
        let resized: Vec<TrackId> = tracks
            .iter()
            .filter(|track| track.steps().len() != options.step_count.len())
            .map(|track| track.id)
            .collect();
        let library = store
            .samples()?
            .into_iter()
            .map(|sample| (sample.id, sample))
            .collect();

        let clock = TransportClock::new(project.tempo)?;
        let sequencer = StepSequencer::with_tracks(tracks, options.step_count);
        let mut bus = MixerBus::new(Arc::clone(&sink), options.master_volume)?;
        for track in sequencer.tracks() {
            bus.add_channel(track)?;
        }
        let cache = SampleCache::new(decoder, sink.sample_rate());

        project.is_playing = false;
        project.current_step = 0;

        let mut session = Self {
            project,
            clock,
            sequencer,
            bus,
            cache,
            library,
            store,
            events: Vec::new(),
            closed: false,
        };
        for id in resized {
            session.persist_track(id);
        }
        session.prefetch_bound();

        info!(
            project = %session.project.id,
            name = %session.project.name,
            tracks = session.sequencer.tracks().len(),
            bpm = session.project.tempo,
            "Session opened"
        );
        Ok(session)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn tracks(&self) -> &[Track] {
        self.sequencer.tracks()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.sequencer.track(id)
    }

    pub fn state(&self) -> TransportState {
        self.clock.state()
    }

    pub fn is_playing(&self) -> bool {
        self.clock.is_playing()
    }

    pub fn tempo(&self) -> u32 {
        self.clock.tempo()
    }

    pub fn current_step(&self) -> usize {
        self.sequencer.current_step()
    }

    pub fn step_count(&self) -> StepCount {
        self.sequencer.step_count()
    }

    pub fn master_volume(&self) -> u8 {
        self.bus.master_volume()
    }

    pub fn cache(&self) -> &SampleCache {
        &self.cache
    }

    pub fn bus(&self) -> &MixerBus {
        &self.bus
    }

    pub fn store(&self) -> &(dyn ProjectStore + Send) {
        self.store.as_ref()
    }

    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.library.get(&id)
    }

    pub fn library(&self) -> impl Iterator<Item = &Sample> {
        self.library.values()
    }

    /// Re-read the sample table, e.g. after an import by another process.
    pub fn reload_library(&mut self) -> Result<usize, CoreError> {
        self.store.refresh()?;
        self.library = self
            .store
            .samples()?
            .into_iter()
            .map(|sample| (sample.id, sample))
            .collect();
        Ok(self.library.len())
    }

    // Transport

    /// Begin or resume playback. From stopped the first tick is due at
    /// `now`; a resume keeps the step spacing of the run before the pause.
    pub fn start(&mut self, now: Instant) -> bool {
        if !self.clock.start(now) {
            return false;
        }
        self.project.is_playing = true;
        self.persist_project();
        info!(bpm = self.clock.tempo(), step = self.sequencer.next_step(), "Playback started");
        true
    }

    /// Halt ticks and keep the position.
    pub fn pause(&mut self) -> bool {
        if !self.clock.pause() {
            return false;
        }
        self.project.is_playing = false;
        self.project.current_step = self.sequencer.current_step();
        self.persist_project();
        info!(step = self.project.current_step, "Playback paused");
        true
    }

    /// Halt ticks and rewind to step 0.
    pub fn stop(&mut self) {
        self.clock.stop();
        self.sequencer.reset();
        self.project.is_playing = false;
        self.project.current_step = 0;
        self.persist_project();
        info!("Playback stopped");
    }

    pub fn set_tempo(&mut self, bpm: u32) -> Result<(), CoreError> {
        self.clock.set_tempo(bpm)?;
        if self.project.tempo != bpm {
            self.project.tempo = bpm;
            self.persist_project();
        }
        Ok(())
    }

    /// Resize every pattern to 16, 32 or 64 steps.
    pub fn set_step_count(&mut self, steps: usize) -> Result<(), CoreError> {
        let step_count = StepCount::try_from(steps)?;
        if step_count == self.sequencer.step_count() {
            return Ok(());
        }
        self.sequencer.set_step_count(step_count);
        let ids: Vec<TrackId> = self.sequencer.tracks().iter().map(|t| t.id).collect();
        for id in ids {
            self.persist_track(id);
        }
        Ok(())
    }

    // Pattern

    /// Flip one step. `Ok(None)` means the track is gone.
    pub fn toggle_step(&mut self, track: TrackId, step: usize) -> Result<Option<bool>, CoreError> {
        let value = self.sequencer.toggle_step(track, step)?;
        if value.is_some() {
            self.persist_track(track);
        }
        Ok(value)
    }

    /// Append a track with an empty pattern. Without a name it is called
    /// `Track N`.
    pub fn add_track(&mut self, name: Option<String>) -> Result<TrackId, CoreError> {
        let id = self.store.allocate_track_id()?;
        let tracks = self.sequencer.tracks();
        let order = tracks.iter().map(|t| t.order + 1).max().unwrap_or(0);
        let name = name.unwrap_or_else(|| format!("Track {}", tracks.len() + 1));

        let track = Track::new(id, self.project.id, name, order, self.sequencer.step_count());
        self.bus.add_channel(&track)?;
        self.sequencer.add_track(track);
        self.persist_track(id);

        info!(track = %id, order, "Track added");
        Ok(id)
    }

    /// Delete a track and dispose its channel. False if it was already gone.
    pub fn remove_track(&mut self, id: TrackId) -> bool {
        if self.sequencer.remove_track(id).is_none() {
            debug!(track = %id, "Ignoring removal of an unknown track");
            return false;
        }
        self.bus.remove_channel(id);
        let result = self.store.delete_track(id);
        self.record(format!("track {id}"), result);
        info!(track = %id, "Track removed");
        true
    }

    // Mixer

    pub fn set_volume(&mut self, id: TrackId, volume: u8) -> Result<bool, CoreError> {
        self.update_track(id, |track| track.set_volume(volume))
    }

    pub fn set_pan(&mut self, id: TrackId, pan: u8) -> Result<bool, CoreError> {
        self.update_track(id, |track| track.set_pan(pan))
    }

    pub fn set_mute(&mut self, id: TrackId, muted: bool) -> Result<bool, CoreError> {
        self.update_track(id, |track| {
            track.muted = muted;
            Ok(())
        })
    }

    pub fn set_solo(&mut self, id: TrackId, soloed: bool) -> Result<bool, CoreError> {
        self.update_track(id, |track| {
            track.soloed = soloed;
            Ok(())
        })
    }

    pub fn set_master_volume(&mut self, volume: u8) -> Result<(), CoreError> {
        self.bus.set_master_volume(volume)?;
        Ok(())
    }

    /// Bind a library sample to a track, or unbind with `None`. The sample
    /// starts loading in the background, even if an earlier load failed.
    pub fn bind_sample(&mut self, id: TrackId, sample: Option<SampleId>) -> Result<bool, CoreError> {
        if let Some(sample_id) = sample {
            if !self.library.contains_key(&sample_id) {
                return Err(CoreError::UnknownSample(sample_id));
            }
        }
        let bound = self.update_track(id, |track| {
            track.sample_id = sample;
            Ok(())
        })?;
        if let Some(sample) = sample.and_then(|id| self.library.get(&id)) {
            self.cache.clear_failure(sample.id);
            self.cache.prefetch(sample);
        }
        Ok(bound)
    }

    /// Store an effect parameter. Effects are kept with the track but not
    /// applied to the signal.
    pub fn set_effect(&mut self, id: TrackId, name: &str, value: f32) -> Result<bool, CoreError> {
        self.update_track(id, |track| {
            track.set_effect(name, value);
            Ok(())
        })
    }

    pub fn rename_track(&mut self, id: TrackId, name: String) -> Result<bool, CoreError> {
        self.update_track(id, |track| {
            track.name = name;
            Ok(())
        })
    }

    pub fn rename(&mut self, name: String) {
        self.project.name = name;
        self.persist_project();
    }

    // Samples

    /// Prepare a preview of a library sample. Await [`PreviewTask::run`] to
    /// load and play it.
    pub fn preview(&self, id: SampleId) -> Result<PreviewTask, CoreError> {
        let sample = self.library.get(&id).ok_or(CoreError::UnknownSample(id))?;
        Ok(PreviewTask {
            cache: self.cache.clone(),
            sample: sample.clone(),
            sink: self.bus.sink(),
        })
    }

    // Ticks

    pub fn next_deadline(&self) -> Option<Instant> {
        self.clock.next_deadline()
    }

    /// The pending tick if it is due at `now`.
    pub fn next_tick(&mut self, now: Instant) -> Option<Tick> {
        self.clock.poll(now)
    }

    /// Commit one tick: advance the step and fire its triggers.
    ///
    /// A tick from before the last start/pause/stop is dropped without
    /// touching the step position.
    pub fn handle_tick(&mut self, tick: Tick) -> Option<StepReport> {
        if !self.clock.is_current(&tick) {
            debug!(epoch = tick.epoch, current = self.clock.epoch(), "Dropping stale tick");
            return None;
        }

        let outcome = self.sequencer.advance(tick.scheduled_at);
        let triggers = outcome
            .triggers
            .iter()
            .map(|event| {
                let sample = self.library.get(&event.sample_id);
                (event.track_id, self.bus.trigger(&self.cache, event, sample))
            })
            .collect();
        self.project.current_step = outcome.step;

        Some(StepReport {
            step: outcome.step,
            tick,
            triggers,
        })
    }

    /// Commit every tick due at `now`.
    pub fn poll(&mut self, now: Instant) -> Vec<StepReport> {
        let mut reports = Vec::new();
        while let Some(tick) = self.next_tick(now) {
            reports.extend(self.handle_tick(tick));
        }
        reports
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let any_soloed = self.sequencer.any_soloed();
        let current_step = self.sequencer.current_step();
        SessionSnapshot {
            project_id: self.project.id.0,
            name: self.project.name.clone(),
            tempo: self.clock.tempo(),
            playback_state: self.clock.state().into(),
            current_step,
            position: SessionSnapshot::position(current_step),
            step_count: self.sequencer.step_count().len(),
            master_volume: self.bus.master_volume(),
            tracks: self
                .sequencer
                .tracks()
                .iter()
                .map(|track| {
                    let audible = beatgrid_transport::is_audible(track.muted, track.soloed, any_soloed);
                    let sample_name = track
                        .sample_id
                        .and_then(|id| self.library.get(&id))
                        .map(|sample| sample.name.clone());
                    TrackSnapshot::new(track, audible, sample_name)
                })
                .collect(),
        }
    }

    /// Drain queued events.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Take a bounce of `loops` passes over the current pattern.
    ///
    /// Samples that fail to load are left out of the mix.
    pub fn render_job(&self, loops: u32) -> RenderJob {
        let mut samples: BTreeMap<SampleId, Sample> = BTreeMap::new();
        for id in self.sequencer.tracks().iter().filter_map(|t| t.sample_id) {
            match self.library.get(&id) {
                Some(sample) => {
                    samples.entry(id).or_insert_with(|| sample.clone());
                }
                None => warn!(sample = %id, "Bound sample missing from library"),
            }
        }
        RenderJob {
            cache: self.cache.clone(),
            samples: samples.into_values().collect(),
            tracks: self.sequencer.tracks().to_vec(),
            settings: RenderSettings {
                tempo: self.clock.tempo(),
                step_count: self.sequencer.step_count(),
                loops,
                master_volume: self.bus.master_volume(),
                sample_rate: self.cache.sample_rate(),
                tail: true,
            },
        }
    }

    /// Bounce `loops` passes of the current pattern to a WAV file on the
    /// calling thread.
    pub fn render_to_file(&self, path: &Path, loops: u32) -> anyhow::Result<()> {
        self.render_job(loops).write_blocking(path)
    }

    /// Stop playback, dispose every channel and drop cached audio.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.clock.stop();
        self.sequencer.reset();
        self.project.is_playing = false;
        self.project.current_step = 0;
        self.persist_project();
        self.bus.close();
        self.cache.clear();
        info!(project = %self.project.id, "Session closed");
    }

    fn update_track(
        &mut self,
        id: TrackId,
        apply: impl FnOnce(&mut Track) -> Result<(), ParamError>,
    ) -> Result<bool, CoreError> {
        let Some(track) = self.sequencer.track_mut(id) else {
            debug!(track = %id, "Ignoring update on an unknown track");
            return Ok(false);
        };
        apply(track)?;
        self.bus.sync_channel(track);
        self.persist_track(id);
        Ok(true)
    }

    fn prefetch_bound(&self) {
        for id in self.sequencer.tracks().iter().filter_map(|t| t.sample_id) {
            if let Some(sample) = self.library.get(&id) {
                self.cache.prefetch(sample);
            }
        }
    }

    fn persist_track(&mut self, id: TrackId) {
        let result = match self.sequencer.track(id) {
            Some(track) => self.store.put_track(track),
            None => return,
        };
        self.record(format!("track {id}"), result);
    }

    fn persist_project(&mut self) {
        let result = self.store.update_project(&self.project);
        self.record(format!("project {}", self.project.id), result);
    }

    fn record<T>(&mut self, target: String, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(target = %target, error = %err, "Store write failed, keeping in-memory state");
                self.events.push(SessionEvent::PersistenceFailed {
                    target,
                    message: err.to_string(),
                });
                None
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("project", &self.project.id)
            .field("state", &self.clock.state())
            .field("step", &self.sequencer.current_step())
            .field("tracks", &self.sequencer.tracks().len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::tests::{wait_until_loaded, CountingDecoder};
    use beatgrid_engine::RecordingSink;
    use beatgrid_project::{FileStore, NewSample};
    use beatgrid_transport::{step_interval, SampleCategory};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    /// Store wrapper whose writes can be switched to fail.
    pub(crate) struct FlakyStore {
        inner: FileStore,
        failing: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Io(std::io::Error::other("disk unavailable")));
            }
            Ok(())
        }
    }

    impl ProjectStore for FlakyStore {
        fn projects(&self) -> Result<Vec<Project>, StoreError> {
            self.inner.projects()
        }
        fn project(&self, id: ProjectId) -> Result<Project, StoreError> {
            self.inner.project(id)
        }
        fn create_project(&mut self, name: &str) -> Result<Project, StoreError> {
            self.check()?;
            self.inner.create_project(name)
        }
        fn update_project(&mut self, project: &Project) -> Result<(), StoreError> {
            self.check()?;
            self.inner.update_project(project)
        }
        fn tracks(&self, project: ProjectId) -> Result<Vec<Track>, StoreError> {
            self.inner.tracks(project)
        }
        fn allocate_track_id(&mut self) -> Result<TrackId, StoreError> {
            self.inner.allocate_track_id()
        }
        fn put_track(&mut self, track: &Track) -> Result<(), StoreError> {
            self.check()?;
            self.inner.put_track(track)
        }
        fn delete_track(&mut self, id: TrackId) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.delete_track(id)
        }
        fn samples(&self) -> Result<Vec<Sample>, StoreError> {
            self.inner.samples()
        }
        fn refresh(&mut self) -> Result<(), StoreError> {
            self.inner.refresh()
        }
        fn sample(&self, id: SampleId) -> Result<Sample, StoreError> {
            self.inner.sample(id)
        }
        fn create_sample(&mut self, sample: NewSample) -> Result<Sample, StoreError> {
            self.check()?;
            self.inner.create_sample(sample)
        }
    }

    pub(crate) struct Fixture {
        pub session: Session,
        pub sink: Arc<RecordingSink>,
        pub decoder: Arc<CountingDecoder>,
        pub failing: Arc<AtomicBool>,
        pub kick: TrackId,
        pub snare: TrackId,
    }

    /// A project with "Kick" on steps 0/4/8/12 bound to sample 1 and an
    /// empty "Snare" bound to sample 2, both samples already decoded.
    pub(crate) fn fixture() -> Fixture {
        fixture_with(SessionOptions::default())
    }

    pub(crate) fn fixture_with(options: SessionOptions) -> Fixture {
        let mut store = FileStore::in_memory();
        let project = store.create_project("Test").unwrap();

        let kick = store.allocate_track_id().unwrap();
        let mut kick_track = Track::new(kick, project.id, "Kick".to_string(), 0, StepCount::Sixteen);
        for step in [0, 4, 8, 12] {
            kick_track.set_step(step, true).unwrap();
        }
        kick_track.sample_id = Some(SampleId(1));
        store.put_track(&kick_track).unwrap();

        let snare = store.allocate_track_id().unwrap();
        let mut snare_track = Track::new(snare, project.id, "Snare".to_string(), 1, StepCount::Sixteen);
        snare_track.sample_id = Some(SampleId(2));
        store.put_track(&snare_track).unwrap();

        let failing = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(RecordingSink::default());
        let decoder = Arc::new(CountingDecoder::default());
        let session = Session::open(
            Box::new(FlakyStore {
                inner: store,
                failing: failing.clone(),
            }),
            project.id,
            sink.clone(),
            decoder.clone(),
            options,
        )
        .unwrap();
        for id in [SampleId(1), SampleId(2)] {
            session
                .cache()
                .insert(id, AudioArc::new(vec![0.5; 32], 44100, 1));
        }

        Fixture {
            session,
            sink,
            decoder,
            failing,
            kick,
            snare,
        }
    }

    fn fired_steps(reports: &[StepReport], track: TrackId) -> Vec<usize> {
        reports
            .iter()
            .filter(|report| report.triggers.iter().any(|(id, _)| *id == track))
            .map(|report| report.step)
            .collect()
    }

    #[test]
    fn test_open_builds_one_channel_per_track() {
        let f = fixture();
        assert_eq!(f.session.bus().len(), 2);
        assert_eq!(f.session.tracks()[0].name, "Kick");
        assert_eq!(f.session.state(), TransportState::Stopped);
        assert_eq!(f.session.tempo(), 128);
    }

    #[test]
    fn test_kick_fires_on_downbeats() {
        let mut f = fixture();
        let t0 = Instant::now();
        let interval = step_interval(128);

        assert!(f.session.start(t0));
        let mut reports = Vec::new();
        // the downbeat plus four more ticks
        for i in 0..=4 {
            reports.extend(f.session.poll(t0 + interval * i));
        }

        assert_eq!(reports.iter().map(|r| r.step).collect::<Vec<_>>(), [0, 1, 2, 3, 4]);
        assert_eq!(fired_steps(&reports, f.kick), [0, 4]);
        assert!(fired_steps(&reports, f.snare).is_empty());
        assert_eq!(f.sink.plays_on(f.kick), 2);
        assert_eq!(f.session.current_step(), 4);
    }

    #[test]
    fn test_ticks_are_equally_spaced() {
        let mut f = fixture();
        let t0 = Instant::now();
        let interval = step_interval(128);
        f.session.start(t0);

        // a late poll catches up on every missed step
        let reports = f.session.poll(t0 + interval * 3);
        let times: Vec<_> = reports.iter().map(|r| r.tick.scheduled_at).collect();
        assert_eq!(times, [t0, t0 + interval, t0 + interval * 2, t0 + interval * 3]);
    }

    #[test]
    fn test_full_cycle_visits_every_step_once() {
        let mut f = fixture();
        f.session.set_step_count(32).unwrap();
        let t0 = Instant::now();
        let interval = step_interval(128);
        f.session.start(t0);

        let steps: Vec<usize> = f
            .session
            .poll(t0 + interval * 32)
            .iter()
            .map(|r| r.step)
            .collect();
        let mut expected: Vec<usize> = (0..32).collect();
        expected.push(0);
        assert_eq!(steps, expected);
    }

    #[test]
    fn test_stop_drops_in_flight_tick() {
        let mut f = fixture();
        let t0 = Instant::now();
        let interval = step_interval(128);
        f.session.start(t0);
        f.session.poll(t0 + interval * 2);

        let in_flight = f.session.next_tick(t0 + interval * 3).unwrap();
        f.session.stop();
        assert_eq!(f.session.current_step(), 0);
        assert!(f.session.handle_tick(in_flight).is_none());
        assert_eq!(f.session.current_step(), 0);
        assert_eq!(f.session.next_deadline(), None);
    }

    #[test]
    fn test_pause_keeps_position() {
        let mut f = fixture();
        let t0 = Instant::now();
        let interval = step_interval(128);
        f.session.start(t0);
        f.session.poll(t0 + interval * 2);

        assert!(f.session.pause());
        assert!(!f.session.pause());
        assert_eq!(f.session.current_step(), 2);
        assert!(f.session.poll(t0 + interval * 10).is_empty());

        let resume = t0 + interval * 20;
        f.session.start(resume);
        let reports = f.session.poll(resume);
        assert_eq!(reports[0].step, 3);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let mut f = fixture();
        let t0 = Instant::now();
        assert!(f.session.start(t0));
        let deadline = f.session.next_deadline();
        assert!(!f.session.start(t0 + step_interval(128)));
        assert_eq!(f.session.next_deadline(), deadline);
    }

    #[test]
    fn test_invalid_parameters_leave_state_untouched() {
        let mut f = fixture();
        let kick = f.kick;

        assert!(matches!(f.session.set_tempo(0), Err(CoreError::Param(ParamError::Tempo(0)))));
        assert_eq!(f.session.tempo(), 128);
        assert!(f.session.set_volume(kick, 101).is_err());
        assert!(f.session.set_pan(kick, 200).is_err());
        assert!(f.session.set_step_count(24).is_err());
        assert!(f.session.toggle_step(kick, 16).is_err());

        let track = f.session.track(kick).unwrap();
        assert_eq!((track.volume, track.pan), (75, 50));
        assert_eq!(f.session.step_count(), StepCount::Sixteen);
        assert!(f.session.take_events().is_empty());
    }

    #[test]
    fn test_toggle_twice_restores_step() {
        let mut f = fixture();
        let kick = f.kick;

        assert_eq!(f.session.toggle_step(kick, 3).unwrap(), Some(true));
        assert_eq!(f.session.toggle_step(kick, 3).unwrap(), Some(false));
        assert_eq!(f.session.track(kick).unwrap().active_steps(), [0, 4, 8, 12]);
    }

    #[test]
    fn test_stale_operations_are_noops() {
        let mut f = fixture();
        let kick = f.kick;

        assert!(f.session.remove_track(kick));
        assert!(!f.session.remove_track(kick));
        assert_eq!(f.session.toggle_step(kick, 0).unwrap(), None);
        assert!(!f.session.set_volume(kick, 10).unwrap());
        assert_eq!(f.sink.released(), vec![kick]);
        assert!(f.session.store().tracks(f.session.project().id).unwrap().len() == 1);
    }

    #[test]
    fn test_solo_and_mute() {
        let mut f = fixture();
        let (kick, snare) = (f.kick, f.snare);
        f.session.toggle_step(snare, 0).unwrap();
        f.session.set_solo(snare, true).unwrap();

        let t0 = Instant::now();
        f.session.start(t0);
        let report = f.session.poll(t0).remove(0);
        assert_eq!(report.played().collect::<Vec<_>>(), [snare]);
        assert!(!f.session.bus().is_audible(kick));

        // mute wins over solo
        f.session.set_mute(snare, true).unwrap();
        assert!(!f.session.bus().is_audible(snare));

        f.session.set_solo(snare, false).unwrap();
        assert!(f.session.bus().is_audible(kick));
        let snapshot = f.session.snapshot();
        assert!(snapshot.tracks[0].audible);
        assert!(!snapshot.tracks[1].audible);
    }

    #[test]
    fn test_unloaded_sample_does_not_stall() {
        let mut f = fixture();
        let kick = f.kick;
        f.session.cache().forget(SampleId(1));

        let t0 = Instant::now();
        f.session.start(t0);
        let report = f.session.poll(t0).remove(0);

        assert_eq!(report.step, 0);
        assert_eq!(report.triggers, [(kick, TriggerOutcome::NotLoaded)]);
        assert_eq!(f.sink.play_count(), 0);
    }

    #[test]
    fn test_persistence_failure_keeps_memory_state() {
        let mut f = fixture();
        let kick = f.kick;
        f.failing.store(true, Ordering::SeqCst);

        assert!(f.session.set_volume(kick, 40).unwrap());
        assert_eq!(f.session.track(kick).unwrap().volume, 40);
        assert_eq!(f.session.bus().channel(kick).unwrap().volume(), 40);

        let events = f.session.take_events();
        assert_eq!(events.len(), 1);
        let SessionEvent::PersistenceFailed { target, message } = &events[0];
        assert_eq!(target, &format!("track {kick}"));
        assert!(message.contains("disk unavailable"));
        assert!(f.session.take_events().is_empty());

        f.failing.store(false, Ordering::SeqCst);
        f.session.set_pan(kick, 10).unwrap();
        assert!(f.session.take_events().is_empty());
        let stored = f.session.store().tracks(f.session.project().id).unwrap();
        assert_eq!((stored[0].volume, stored[0].pan), (40, 10));
    }

    #[test]
    fn test_add_track_defaults_and_persists() {
        let mut f = fixture();
        let id = f.session.add_track(None).unwrap();

        let track = f.session.track(id).unwrap();
        assert_eq!(track.name, "Track 3");
        assert_eq!(track.order, 2);
        assert_eq!(track.steps().len(), 16);
        assert!(f.session.bus().channel(id).is_some());
        assert_eq!(f.session.store().tracks(f.session.project().id).unwrap().len(), 3);
    }

    #[test]
    fn test_step_count_resizes_patterns() {
        let mut f = fixture();
        let kick = f.kick;

        f.session.set_step_count(64).unwrap();
        assert_eq!(f.session.track(kick).unwrap().steps().len(), 64);
        f.session.toggle_step(kick, 40).unwrap();

        f.session.set_step_count(16).unwrap();
        let track = f.session.track(kick).unwrap();
        assert_eq!(track.active_steps(), [0, 4, 8, 12]);
        let stored = f.session.store().tracks(f.session.project().id).unwrap();
        assert_eq!(stored[0].steps().len(), 16);
    }

    #[test]
    fn test_bind_unknown_sample() {
        let mut f = fixture();
        let kick = f.kick;
        assert!(matches!(
            f.session.bind_sample(kick, Some(SampleId(999))),
            Err(CoreError::UnknownSample(SampleId(999)))
        ));
        assert!(f.session.bind_sample(kick, None).unwrap());
        assert_eq!(f.session.track(kick).unwrap().sample_id, None);
    }

    #[test]
    fn test_tempo_is_persisted() {
        let mut f = fixture();
        f.session.set_tempo(140).unwrap();
        let id = f.session.project().id;
        assert_eq!(f.session.store().project(id).unwrap().tempo, 140);
    }

    #[tokio::test]
    async fn test_preview_plays_without_channel() {
        let f = fixture();
        let task = f.session.preview(SampleId(3)).unwrap();
        task.run().await.unwrap();

        let plays = f.sink.plays();
        assert_eq!(plays.len(), 1);
        assert_eq!(plays[0].channel, None);
        assert!(matches!(f.session.preview(SampleId(404)), Err(CoreError::UnknownSample(_))));
    }

    #[test]
    fn test_close_disposes_channels() {
        let f = fixture();
        let (sink, kick, snare) = (f.sink.clone(), f.kick, f.snare);
        f.session.close();
        assert_eq!(sink.released(), vec![kick, snare]);
    }

    #[test]
    fn test_render_to_file() {
        let f = fixture();
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bounce.wav");

        f.session.render_to_file(&path, 2).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        let frames = reader.duration() as f64;
        let expected = step_interval(128).as_secs_f64() * 32.0 * 44100.0;
        assert!((frames - expected).abs() < 2.0, "{frames} vs {expected}");
    }

    #[tokio::test]
    async fn test_rebinding_retries_a_failed_sample() {
        let mut f = fixture();
        let kick = f.kick;
        let kick_sample = f.session.sample(SampleId(1)).unwrap().clone();
        f.session.cache().forget(SampleId(1));
        f.decoder.failing.lock().insert(SampleId(1));
        assert!(f.session.cache().load(&kick_sample).await.is_err());

        let t0 = Instant::now();
        f.session.start(t0);
        let report = f.session.poll(t0).remove(0);
        assert_eq!(report.triggers, [(kick, TriggerOutcome::NotLoaded)]);

        // the file was replaced on disk
        f.decoder.failing.lock().clear();
        assert!(f.session.bind_sample(kick, Some(SampleId(1))).unwrap());
        wait_until_loaded(f.session.cache(), SampleId(1)).await;

        f.session.stop();
        let t1 = Instant::now();
        f.session.start(t1);
        let report = f.session.poll(t1).remove(0);
        assert_eq!(report.triggers, [(kick, TriggerOutcome::Played)]);
        assert_eq!(f.sink.plays_on(kick), 1);
    }

    #[test]
    fn test_resume_keeps_step_spacing() {
        let mut f = fixture();
        let t0 = Instant::now();
        let interval = step_interval(128);
        f.session.start(t0);
        let first = f.session.poll(t0).remove(0);

        f.session.pause();
        let resume = t0 + std::time::Duration::from_millis(2);
        f.session.start(resume);
        assert!(f.session.poll(resume).is_empty());

        let second = f.session.poll(t0 + interval).remove(0);
        assert_eq!(second.step, 1);
        assert_eq!(second.tick.scheduled_at - first.tick.scheduled_at, interval);
    }

    #[test]
    fn test_effects_are_clamped_and_persisted() {
        let mut f = fixture();
        let kick = f.kick;

        assert!(f.session.set_effect(kick, "reverb", 150.0).unwrap());
        assert!(f.session.set_effect(kick, "delay", -3.0).unwrap());
        assert!(!f.session.set_effect(TrackId(999), "reverb", 10.0).unwrap());

        let track = f.session.track(kick).unwrap();
        assert_eq!((track.effect("reverb"), track.effect("delay")), (100.0, 0.0));
        let stored = f.session.store().tracks(f.session.project().id).unwrap();
        assert_eq!(stored[0].effect("reverb"), 100.0);
        assert!(f.session.take_events().is_empty());
    }

    #[test]
    fn test_renames_are_persisted() {
        let mut f = fixture();
        let snare = f.snare;
        let project = f.session.project().id;

        f.session.rename("Warehouse".to_string());
        assert!(f.session.rename_track(snare, "Clap".to_string()).unwrap());

        assert_eq!(f.session.snapshot().name, "Warehouse");
        assert_eq!(f.session.store().project(project).unwrap().name, "Warehouse");
        assert_eq!(f.session.store().tracks(project).unwrap()[1].name, "Clap");
    }

    #[test]
    fn test_open_writes_back_resized_patterns() {
        let mut f = fixture_with(SessionOptions {
            step_count: StepCount::ThirtyTwo,
            ..Default::default()
        });

        let stored = f.session.store().tracks(f.session.project().id).unwrap();
        assert!(stored.iter().all(|track| track.steps().len() == 32));
        assert_eq!(stored[0].active_steps(), [0, 4, 8, 12]);
        assert!(f.session.take_events().is_empty());
    }

    #[test]
    fn test_reload_library_sees_other_writers() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let mut store = FileStore::open(&path).unwrap();
        let project = store.create_project("Shared").unwrap();
        let mut session = Session::open(
            Box::new(store),
            project.id,
            Arc::new(RecordingSink::default()),
            Arc::new(CountingDecoder::default()),
            SessionOptions::default(),
        )
        .unwrap();
        let before = session.library().count();

        let mut other = FileStore::open(&path).unwrap();
        let clap = other
            .create_sample(NewSample {
                name: "Clap".to_string(),
                category: SampleCategory::Drums,
                filename: PathBuf::from("uploads/clap.wav"),
                tempo: None,
                duration_ms: None,
                tags: vec![],
                user_uploaded: true,
            })
            .unwrap();
        assert!(session.sample(clap.id).is_none());

        assert_eq!(session.reload_library().unwrap(), before + 1);
        assert_eq!(session.sample(clap.id).unwrap().name, "Clap");
    }
}
