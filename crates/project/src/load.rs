use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{StoreData, StoreError};

/// Read a store file. JSON is tried first, MessagePack second.
pub fn read_store(path: &Path) -> Result<StoreData, StoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(StoreError::from)
    })
}
