use std::path::PathBuf;

use beatgrid_transport::{Sample, SampleCategory};

use crate::NewSample;

/// The sample set every new store starts with.
pub fn default_library() -> Vec<NewSample> {
    let entry = |name: &str, category, filename: &str, duration_ms, tags: [&str; 2]| NewSample {
        name: name.to_string(),
        category,
        filename: PathBuf::from(filename),
        tempo: Some(128),
        duration_ms: Some(duration_ms),
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        user_uploaded: false,
    };

    vec![
        entry("Kick 01", SampleCategory::Drums, "kick_01.wav", 2100, ["techno", "punchy"]),
        entry("Snare 02", SampleCategory::Drums, "snare_02.wav", 1800, ["sharp", "crisp"]),
        entry("Hi-Hat 03", SampleCategory::Drums, "hihat_03.wav", 500, ["metallic", "bright"]),
        entry("Deep Bass", SampleCategory::Bass, "bass_01.wav", 4000, ["deep", "rumble"]),
        entry("Trance Lead", SampleCategory::Synths, "lead_01.wav", 8000, ["pluck", "melodic"]),
        entry("Acid Bass", SampleCategory::Bass, "acid_bass.wav", 2000, ["303", "acid"]),
    ]
}

/// Filter a sample list by category and a case-insensitive query over names
/// and tags. An empty query matches everything.
pub fn search<'a>(
    samples: &'a [Sample],
    category: Option<SampleCategory>,
    query: Option<&str>,
) -> Vec<&'a Sample> {
    let query = query.map(str::trim).filter(|q| !q.is_empty());
    samples
        .iter()
        .filter(|sample| category.is_none_or(|c| sample.category == c))
        .filter(|sample| query.is_none_or(|q| sample.matches(q)))
        .collect()
}
