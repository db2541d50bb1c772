use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use beatgrid_engine::VoiceMixer;
use beatgrid_transport::{
    db_to_gain, pan_to_position, volume_to_db, AudioArc, SampleId, StepCount, StepSequencer,
    Track, TransportClock, DEFAULT_TEMPO, DEFAULT_VOLUME,
};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub tempo: u32,
    pub step_count: StepCount,
    /// Full passes over the pattern.
    pub loops: u32,
    pub master_volume: u8,
    pub sample_rate: u32,
    /// Keep rendering after the last loop until every voice has finished.
    pub tail: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            step_count: StepCount::default(),
            loops: 1,
            master_volume: DEFAULT_VOLUME,
            sample_rate: 44100,
            tail: true,
        }
    }
}

/// Bounce a pattern to a stereo buffer.
///
/// The pattern is walked with the same sequencer the live session uses, so
/// mute, solo and unbound tracks behave identically. Triggers whose sample
/// is missing from `samples` are skipped.
pub fn render_pattern(
    tracks: &[Track],
    samples: &HashMap<SampleId, AudioArc>,
    settings: RenderSettings,
) -> anyhow::Result<AudioArc> {
    let interval = TransportClock::new(settings.tempo)?.interval();
    let sample_rate = settings.sample_rate;
    let frames_per_step = interval.as_secs_f64() * sample_rate as f64;
    let total_steps = settings.loops as usize * settings.step_count.len();

    let mut sequencer = StepSequencer::with_tracks(tracks.to_vec(), settings.step_count);
    let mut mixer = VoiceMixer::<AudioArc>::new();
    mixer.set_master_gain(db_to_gain(volume_to_db(settings.master_volume)));

    let mut resampled: HashMap<SampleId, AudioArc> = HashMap::new();
    let mut out = Vec::new();
    let origin = Instant::now();

    for step_index in 0..total_steps {
        let start_frame = (step_index as f64 * frames_per_step).round() as u64;
        render_until(&mut mixer, &mut out, start_frame);

        let outcome = sequencer.advance(origin + interval * step_index as u32);
        for trigger in outcome.triggers {
            let Some(track) = sequencer.track(trigger.track_id) else {
                continue;
            };
            let audio = match resampled.get(&trigger.sample_id) {
                Some(audio) => audio.clone(),
                None => {
                    let Some(source) = samples.get(&trigger.sample_id) else {
                        warn!(sample = %trigger.sample_id, track = %trigger.track_id, "Sample missing from render");
                        continue;
                    };
                    let audio = source.resample(sample_rate)?;
                    resampled.insert(trigger.sample_id, audio.clone());
                    audio
                }
            };

            mixer.add(
                audio,
                db_to_gain(volume_to_db(track.volume)),
                pan_to_position(track.pan),
                start_frame,
                Some(track.id),
            );
        }
    }

    let loop_end = (total_steps as f64 * frames_per_step).round() as u64;
    let end = if settings.tail {
        loop_end.max(mixer.tail_end())
    } else {
        loop_end
    };
    render_until(&mut mixer, &mut out, end);

    debug!(
        steps = total_steps,
        frames = out.len() / 2,
        sample_rate,
        "Rendered pattern"
    );
    Ok(AudioArc::new(out, sample_rate, 2))
}

fn render_until(mixer: &mut VoiceMixer<AudioArc>, out: &mut Vec<f32>, frame: u64) {
    let frames = frame.saturating_sub(mixer.frame()) as usize;
    if frames == 0 {
        return;
    }
    let start = out.len();
    out.resize(start + frames * 2, 0.0);
    mixer.process(&mut out[start..], 2);
}

pub fn write_wav(audio: &AudioArc, path: &Path) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;

    for &sample in audio.samples() {
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(())
}
