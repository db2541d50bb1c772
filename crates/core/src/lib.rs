pub mod cache;
pub mod channel;
pub mod driver;
pub mod error;
pub mod mixer;
pub mod session;
pub mod snapshot;
pub mod time;

pub use cache::{FileDecoder, SampleCache, SampleDecoder, TriggerOutcome};
pub use channel::TrackChannel;
pub use driver::{spawn, SessionDriver, SessionHandle, StepUpdate};
pub use error::CoreError;
pub use mixer::MixerBus;
pub use session::{PreviewTask, RenderJob, Session, SessionEvent, SessionOptions, StepReport};
pub use snapshot::{PlaybackState, SessionSnapshot, TrackSnapshot};
pub use time::StepPosition;

pub use beatgrid_decode::{decode_file, SampleResolver};
pub use beatgrid_engine::{AudioSink, CpalSink, PlayRequest, RecordingSink};
pub use beatgrid_project::{
    default_library, import_sample, search, FileStore, NewSample, ProjectStore, StoreError, Upload,
};
pub use beatgrid_render::{render_pattern, write_wav, RenderSettings};
pub use beatgrid_transport::{
    AudioArc, ParamError, Project, ProjectId, Sample, SampleCategory, SampleId, StepCount, Track,
    TrackId, TransportState,
};
