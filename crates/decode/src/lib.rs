use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use beatgrid_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

pub const DEFAULT_SAMPLES_ROOT: &str = "samples";

/// Maps stored sample filenames to files on disk.
///
/// Library samples are stored relative to the samples root (`kick_01.wav`),
/// uploads may be stored with the root included (`samples/uploads/x.wav`) or
/// as absolute paths.
#[derive(Debug, Clone)]
pub struct SampleResolver {
    root: PathBuf,
}

impl SampleResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, filename: &Path) -> Option<PathBuf> {
        if filename.exists() {
            return Some(filename.to_path_buf());
        }

        let with_root = self.root.join(filename);
        if with_root.exists() {
            return Some(with_root);
        }

        None
    }

    /// Strip the samples root prefix from a path if present.
    /// Use this when storing filenames in sample records.
    pub fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// Resolve and decode a stored sample filename.
    pub fn decode(&self, filename: &Path) -> anyhow::Result<AudioArc> {
        let resolved = self
            .resolve(filename)
            .ok_or_else(|| anyhow::anyhow!("sample not found: {}", filename.display()))?;
        decode_file(&resolved)
    }
}

impl Default for SampleResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLES_ROOT)
    }
}

pub fn decode_file(path: &Path) -> anyhow::Result<AudioArc> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognized audio format: {}", path.display()))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track in {}", path.display()))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(2) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity() as u64;

        let mut sample_buf = SampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    // a truncated final packet can leave a partial frame
    samples.truncate(samples.len() - samples.len() % channels.max(1) as usize);

    debug!(
        path = %path.display(),
        sample_rate,
        channels,
        frames = samples.len() / channels.max(1) as usize,
        "Decoded sample"
    );
    Ok(AudioArc::new(samples, sample_rate, channels.max(1)))
}
