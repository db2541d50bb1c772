use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::{StoreData, StoreError};

/// Extensions that select MessagePack over JSON.
pub const MSGPACK_EXTENSIONS: [&str; 2] = ["msgpack", "mpk"];

/// Write the whole store, creating parent directories.
///
/// Pretty-printed JSON unless the extension is one of
/// [`MSGPACK_EXTENSIONS`].
pub fn write_store(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    if is_msgpack(path) {
        rmp_serde::encode::write_named(&mut writer, data)?;
    } else {
        serde_json::to_writer_pretty(&mut writer, data)?;
    }
    writer.flush()?;

    Ok(())
}

fn is_msgpack(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MSGPACK_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
