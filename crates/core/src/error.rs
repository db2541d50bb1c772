use beatgrid_project::StoreError;
use beatgrid_transport::{ParamError, SampleId, TrackId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to load sample {id}: {error:#}")]
    Load { id: SampleId, error: anyhow::Error },

    #[error("unknown sample {0}")]
    UnknownSample(SampleId),

    #[error("track {0} already has a channel")]
    DuplicateChannel(TrackId),

    #[error("session is closed")]
    Closed,
}
