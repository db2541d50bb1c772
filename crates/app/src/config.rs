use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use beatgrid_core::{ParamError, StepCount};

const DEFAULT_STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project store file.
    pub store_path: PathBuf,
    /// Directory sample filenames are resolved against.
    pub samples_root: PathBuf,
    /// Where imported samples are copied. Defaults to `<samples_root>/uploads`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<PathBuf>,
    pub step_count: usize,
    pub master_volume: u8,
    pub render_sample_rate: u32,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: dirs::data_dir()
                .map(|p| p.join("beatgrid").join(DEFAULT_STORE_FILE))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            samples_root: PathBuf::from("samples"),
            uploads_dir: None,
            step_count: 16,
            master_volume: 75,
            render_sample_rate: 44100,
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("beatgrid").join("config.toml"))
    }

    /// Read the user config. A missing file is not an error.
    pub fn load() -> anyhow::Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.uploads_dir
            .clone()
            .unwrap_or_else(|| self.samples_root.join("uploads"))
    }

    pub fn step_count(&self) -> Result<StepCount, ParamError> {
        StepCount::try_from(self.step_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "samples_root = \"/srv/samples\"\nstep_count = 32\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.samples_root, PathBuf::from("/srv/samples"));
        assert_eq!(config.step_count().unwrap(), StepCount::ThirtyTwo);
        assert_eq!(config.master_volume, 75);
        assert_eq!(config.uploads_dir(), PathBuf::from("/srv/samples/uploads"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().expect("tempdir");
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "step_count = \"many\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let config = Config {
            uploads_dir: Some(PathBuf::from("/tmp/uploads")),
            log_filter: "beatgrid=debug".to_string(),
            ..Config::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_unsupported_step_count() {
        let config = Config {
            step_count: 12,
            ..Config::default()
        };
        assert_eq!(config.step_count(), Err(ParamError::StepCount(12)));
    }
}
