use beatgrid_transport::STEPS_PER_BEAT;

const BEATS_PER_BAR: usize = 4;

/// Bar/beat/sixteenth of a sequencer step, all 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPosition {
    pub bar: u32,
    pub beat: u32,
    pub sixteenth: u32,
}

impl StepPosition {
    pub fn from_step(step: usize) -> Self {
        let per_beat = STEPS_PER_BEAT as usize;
        let per_bar = per_beat * BEATS_PER_BAR;
        Self {
            bar: (step / per_bar) as u32 + 1,
            beat: (step % per_bar / per_beat) as u32 + 1,
            sixteenth: (step % per_beat) as u32 + 1,
        }
    }
}

impl std::fmt::Display for StepPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.bar, self.beat, self.sixteenth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_position() {
        assert_eq!(StepPosition::from_step(0).to_string(), "1.1.1");
        assert_eq!(StepPosition::from_step(5).to_string(), "1.2.2");
        assert_eq!(StepPosition::from_step(15).to_string(), "1.4.4");
        assert_eq!(StepPosition::from_step(16).to_string(), "2.1.1");
        assert_eq!(StepPosition::from_step(63).to_string(), "4.4.4");
    }
}
