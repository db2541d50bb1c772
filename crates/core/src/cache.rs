//! Load-once, play-many access to decoded samples.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use beatgrid_decode::SampleResolver;
use beatgrid_engine::{AudioSink, PlayRequest};
use beatgrid_transport::{AudioArc, Sample, SampleId};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::channel::TrackChannel;
use crate::error::CoreError;

/// Turns a sample record into audio at a given sample rate.
///
/// Called on a blocking thread; implementations may do file I/O.
pub trait SampleDecoder: Send + Sync + 'static {
    fn decode(&self, sample: &Sample, sample_rate: u32) -> anyhow::Result<AudioArc>;
}

/// Decodes sample files from disk and resamples them to the output rate.
#[derive(Debug, Clone, Default)]
pub struct FileDecoder {
    resolver: SampleResolver,
}

impl FileDecoder {
    pub fn new(resolver: SampleResolver) -> Self {
        Self { resolver }
    }
}

impl SampleDecoder for FileDecoder {
    fn decode(&self, sample: &Sample, sample_rate: u32) -> anyhow::Result<AudioArc> {
        self.resolver.decode(&sample.filename)?.resample(sample_rate)
    }
}

/// What happened to one trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Sent to the sink through the track's channel.
    Played,
    /// The step fired but the channel is not audible.
    Silent,
    /// The sample is not decoded yet (or failed to load); a load was
    /// started in the background if possible. Failed ids are retried at
    /// most once per [`RETRY_AFTER`].
    NotLoaded,
}

/// How long a failed id is left alone before a trigger may load it again.
pub const RETRY_AFTER: Duration = Duration::from_secs(2);

type Cell = Arc<OnceCell<AudioArc>>;

struct Inner {
    decoder: Arc<dyn SampleDecoder>,
    sample_rate: u32,
    cells: Mutex<HashMap<SampleId, Cell>>,
    /// Ids whose last load failed, with the time of the failure.
    failed: Mutex<HashMap<SampleId, Instant>>,
}

/// Shared cache of decoded samples keyed by sample id.
///
/// Each id owns a [`OnceCell`]; concurrent loads of the same id wait on the
/// first caller's decode instead of starting their own. A failed decode
/// leaves the cell empty and removes it, so a later load starts over.
#[derive(Clone)]
pub struct SampleCache {
    inner: Arc<Inner>,
}

impl SampleCache {
    pub fn new(decoder: Arc<dyn SampleDecoder>, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                decoder,
                sample_rate,
                cells: Mutex::new(HashMap::new()),
                failed: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// The decoded audio for `id`, if it has finished loading. Never waits.
    pub fn get(&self, id: SampleId) -> Option<AudioArc> {
        self.inner
            .cells
            .lock()
            .get(&id)
            .and_then(|cell| cell.get().cloned())
    }

    pub fn is_loaded(&self, id: SampleId) -> bool {
        self.get(id).is_some()
    }

    pub fn has_failed(&self, id: SampleId) -> bool {
        self.inner.failed.lock().contains_key(&id)
    }

    /// Forget that `id` failed so the next prefetch tries it again.
    pub fn clear_failure(&self, id: SampleId) -> bool {
        self.inner.failed.lock().remove(&id).is_some()
    }

    /// Number of decoded samples held.
    pub fn len(&self) -> usize {
        self.inner
            .cells
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Put already decoded audio in the cache. Ignored if the id is loaded
    /// or loading.
    pub fn insert(&self, id: SampleId, audio: AudioArc) {
        let cell = self.cell(id);
        if cell.set(audio).is_ok() {
            self.inner.failed.lock().remove(&id);
        }
    }

    /// Return the cached audio for `sample`, decoding it on a blocking thread
    /// if nobody has yet.
    pub async fn load(&self, sample: &Sample) -> Result<AudioArc, CoreError> {
        let id = sample.id;
        let cell = self.cell(id);

        let result = cell
            .get_or_try_init(|| {
                let decoder = Arc::clone(&self.inner.decoder);
                let sample = sample.clone();
                let sample_rate = self.inner.sample_rate;
                async move {
                    debug!(sample = %sample.id, file = %sample.filename.display(), "Decoding sample");
                    let audio =
                        tokio::task::spawn_blocking(move || decoder.decode(&sample, sample_rate))
                            .await??;
                    anyhow::Ok(audio)
                }
            })
            .await;

        match result {
            Ok(audio) => {
                self.inner.failed.lock().remove(&id);
                info!(sample = %id, frames = audio.frames(), "Sample loaded");
                Ok(audio.clone())
            }
            Err(error) => {
                self.evict(id, &cell);
                self.inner.failed.lock().insert(id, Instant::now());
                warn!(sample = %id, error = %format!("{error:#}"), "Sample failed to load");
                Err(CoreError::Load { id, error })
            }
        }
    }

    /// Decode on the calling thread. For offline work outside the runtime.
    pub fn load_blocking(&self, sample: &Sample) -> Result<AudioArc, CoreError> {
        if let Some(audio) = self.get(sample.id) {
            return Ok(audio);
        }
        match self.inner.decoder.decode(sample, self.inner.sample_rate) {
            Ok(audio) => {
                self.insert(sample.id, audio.clone());
                Ok(audio)
            }
            Err(error) => {
                self.inner.failed.lock().insert(sample.id, Instant::now());
                Err(CoreError::Load {
                    id: sample.id,
                    error,
                })
            }
        }
    }

    /// Start loading `sample` in the background.
    ///
    /// Does nothing when the sample is loaded or already loading, when it
    /// failed less than [`RETRY_AFTER`] ago, or when no Tokio runtime is
    /// available. Returns whether a load was started.
    pub fn prefetch(&self, sample: &Sample) -> bool {
        self.prefetch_at(sample, Instant::now())
    }

    fn prefetch_at(&self, sample: &Sample, now: Instant) -> bool {
        let failed_at = self.inner.failed.lock().get(&sample.id).copied();
        if failed_at.is_some_and(|at| now.saturating_duration_since(at) < RETRY_AFTER) {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        {
            let mut cells = self.inner.cells.lock();
            if cells.contains_key(&sample.id) {
                return false;
            }
            cells.insert(sample.id, Cell::default());
        }

        let cache = self.clone();
        let sample = sample.clone();
        runtime.spawn(async move {
            // failures are logged by load
            let _ = cache.load(&sample).await;
        });
        true
    }

    /// Load if necessary, then play at unity gain through the master bus,
    /// bypassing every track channel.
    pub async fn preview(&self, sample: &Sample, sink: Arc<dyn AudioSink>) -> Result<(), CoreError> {
        let audio = self.load(sample).await?;
        sink.play(PlayRequest {
            audio,
            gain: 1.0,
            pan: 0.0,
            at: Instant::now(),
            channel: None,
        });
        debug!(sample = %sample.id, "Preview");
        Ok(())
    }

    /// Play `sample` through `channel` at `at`.
    ///
    /// An inaudible channel still counts as fired but produces no output.
    /// Never waits for a load.
    pub fn trigger(
        &self,
        channel: &TrackChannel,
        any_soloed: bool,
        sample: &Sample,
        at: Instant,
    ) -> TriggerOutcome {
        let Some(audio) = self.get(sample.id) else {
            self.prefetch(sample);
            return TriggerOutcome::NotLoaded;
        };
        if !channel.is_audible(any_soloed) {
            return TriggerOutcome::Silent;
        }
        if channel.route(audio, at) {
            TriggerOutcome::Played
        } else {
            TriggerOutcome::Silent
        }
    }

    /// Drop a sample and its failure record.
    pub fn forget(&self, id: SampleId) {
        self.inner.cells.lock().remove(&id);
        self.inner.failed.lock().remove(&id);
    }

    pub fn clear(&self) {
        self.inner.cells.lock().clear();
        self.inner.failed.lock().clear();
    }

    fn cell(&self, id: SampleId) -> Cell {
        Arc::clone(self.inner.cells.lock().entry(id).or_default())
    }

    fn evict(&self, id: SampleId, cell: &Cell) {
        let mut cells = self.inner.cells.lock();
        let stale = cells
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            cells.remove(&id);
        }
    }
}

impl std::fmt::Debug for SampleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleCache")
            .field("sample_rate", &self.inner.sample_rate)
            .field("loaded", &self.len())
            .finish()
    }
}
