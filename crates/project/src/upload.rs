use std::fs;
use std::path::{Path, PathBuf};

use beatgrid_decode::SampleResolver;
use beatgrid_transport::{Sample, SampleCategory};
use tracing::{info, warn};

use crate::{NewSample, ProjectStore, StoreError};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["wav", "mp3", "ogg"];

pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// A user-supplied audio file and the metadata entered with it.
#[derive(Debug, Clone)]
pub struct Upload<'a> {
    /// File name the user picked, used for the extension and as the default name.
    pub original_name: &'a str,
    pub bytes: &'a [u8],
    pub name: Option<String>,
    pub category: Option<SampleCategory>,
    pub tempo: Option<u32>,
    pub tags: Vec<String>,
}

/// Copy an upload into `uploads_dir` and create a user sample record for it.
///
/// The record's filename is relative to the resolver's samples root when
/// `uploads_dir` lies under it. Only the extension and size are checked. The
/// bytes are not decoded, so a corrupt file surfaces as a load failure when
/// the sample is first played. If the record cannot be written the copy is
/// removed again.
pub fn import_sample<S: ProjectStore + ?Sized>(
    store: &mut S,
    upload: Upload<'_>,
    resolver: &SampleResolver,
    uploads_dir: &Path,
) -> Result<Sample, StoreError> {
    let original = Path::new(upload.original_name);
    let extension = original
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| {
            StoreError::Rejected(format!(
                "'{}' is not a .wav, .mp3 or .ogg file",
                upload.original_name
            ))
        })?;

    if upload.bytes.is_empty() {
        return Err(StoreError::Rejected("file is empty".to_string()));
    }
    if upload.bytes.len() > MAX_UPLOAD_BYTES {
        return Err(StoreError::Rejected(format!(
            "file is {} bytes, the limit is {MAX_UPLOAD_BYTES}",
            upload.bytes.len()
        )));
    }

    let stem = original
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("sample");

    fs::create_dir_all(uploads_dir)?;
    let destination = unique_path(uploads_dir, &sanitize(stem), &extension);
    fs::write(&destination, upload.bytes)?;

    let created = store.create_sample(NewSample {
        name: upload.name.unwrap_or_else(|| upload.original_name.to_string()),
        category: upload.category.unwrap_or(SampleCategory::Drums),
        filename: resolver.relative(&destination),
        tempo: upload.tempo,
        duration_ms: None,
        tags: upload.tags,
        user_uploaded: true,
    });
    let sample = match created {
        Ok(sample) => sample,
        Err(err) => {
            if let Err(cleanup) = fs::remove_file(&destination) {
                warn!(path = %destination.display(), error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(err);
        }
    };

    info!(
        sample = %sample.id,
        path = %destination.display(),
        bytes = upload.bytes.len(),
        "Imported sample"
    );
    Ok(sample)
}

fn sanitize(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "sample".to_string() } else { cleaned }
}

fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{extension}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}-{n}.{extension}"));
        n += 1;
    }
    candidate
}
