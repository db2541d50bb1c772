/// A value rejected at the engine boundary. No state is mutated when one of
/// these is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParamError {
    #[error("tempo must be between 1 and 999 BPM, got {0}")]
    Tempo(u32),

    #[error("volume must be between 0 and 100, got {0}")]
    Volume(u8),

    #[error("pan must be between 0 and 100, got {0}")]
    Pan(u8),

    #[error("step {index} is outside a {len}-step pattern")]
    Step { index: usize, len: usize },

    #[error("unsupported step count {0}, expected 16, 32 or 64")]
    StepCount(usize),

    #[error("unknown sample category '{0}'")]
    Category(String),
}
