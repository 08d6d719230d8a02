//! Job configuration.
//!
//! Layers, lowest first: built-in defaults, an optional JSON file, `PACKJOB_*`
//! environment variables, then whatever the command line sets explicitly.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::{ArchiveFormat, WriterSettings};
use crate::progress::EstimatorWeights;
use crate::PackError;

pub const ENV_LEVEL: &str = "PACKJOB_LEVEL";
pub const ENV_SCAN_CEILING: &str = "PACKJOB_SCAN_CEILING";
pub const ENV_SIZE_WEIGHT: &str = "PACKJOB_SIZE_WEIGHT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub format: ArchiveFormat,
    /// zstd level, 1..=22.
    pub level: i32,
    /// zstd worker threads. 0 keeps the codec single threaded.
    pub codec_threads: u32,
    /// Highest fraction shown while the scanner is still counting.
    pub scan_ceiling: f32,
    /// Weight of the by-size fraction; the by-count fraction gets the rest.
    pub size_weight: f32,
    pub comment: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        let weights = EstimatorWeights::default();
        Self {
            format: ArchiveFormat::Zip,
            level: 3,
            codec_threads: 0,
            scan_ceiling: weights.scan_ceiling,
            size_weight: weights.size_weight,
            comment: None,
        }
    }
}

impl JobConfig {
    pub fn from_file(path: &Path) -> Result<Self, PackError> {
        let text = fs::read_to_string(path).map_err(|e| PackError::io(path, e))?;
        let config: JobConfig = serde_json::from_str(&text)?;
        debug!(path = %path.display(), "loaded job configuration");
        Ok(config)
    }

    /// Overlays `PACKJOB_*` variables from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env`](Self::apply_env) with an injectable lookup.
    /// Unparsable values are ignored with a warning.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Option<T> {
            let value = value?;
            let parsed = value.trim().parse::<T>().ok();
            if parsed.is_none() {
                warn!(variable = key, value = %value, "ignoring unparsable environment override");
            }
            parsed
        }

        if let Some(level) = parsed(ENV_LEVEL, lookup(ENV_LEVEL)) {
            self.level = level;
        }
        if let Some(ceiling) = parsed(ENV_SCAN_CEILING, lookup(ENV_SCAN_CEILING)) {
            self.scan_ceiling = ceiling;
        }
        if let Some(weight) = parsed(ENV_SIZE_WEIGHT, lookup(ENV_SIZE_WEIGHT)) {
            self.size_weight = weight;
        }
    }

    pub fn validate(&self) -> Result<(), PackError> {
        if !(1..=22).contains(&self.level) {
            return Err(PackError::Config(format!("level must be within 1..=22, got {}", self.level)));
        }
        for (name, value) in [("scan_ceiling", self.scan_ceiling), ("size_weight", self.size_weight)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PackError::Config(format!("{name} must be within [0, 1], got {value}")));
            }
        }
        Ok(())
    }

    pub fn weights(&self) -> EstimatorWeights {
        EstimatorWeights { scan_ceiling: self.scan_ceiling, size_weight: self.size_weight }
    }

    pub fn writer_settings(&self) -> WriterSettings {
        WriterSettings { level: self.level, codec_threads: self.codec_threads, comment: self.comment.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn partial_files_keep_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "format": "tar-zst", "level": 9 }}"#).unwrap();

        let config = JobConfig::from_file(file.path()).unwrap();
        assert_eq!(config.format, ArchiveFormat::TarZst);
        assert_eq!(config.level, 9);
        assert_eq!(config.size_weight, 0.8);
        assert_eq!(config.scan_ceiling, 0.05);
    }

    #[test]
    fn environment_overrides_and_bad_values_are_ignored() {
        let vars: HashMap<&str, &str> =
            [(ENV_LEVEL, "7"), (ENV_SCAN_CEILING, "0.1"), (ENV_SIZE_WEIGHT, "heavy")].into_iter().collect();
        let mut config = JobConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.level, 7);
        assert_eq!(config.scan_ceiling, 0.1);
        assert_eq!(config.size_weight, 0.8);
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        assert!(JobConfig::default().validate().is_ok());
        let config = JobConfig { size_weight: 1.5, ..JobConfig::default() };
        assert!(matches!(config.validate(), Err(PackError::Config(_))));
        let config = JobConfig { level: 0, ..JobConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(JobConfig::from_file(file.path()), Err(PackError::SerdeJson(_))));
    }
}
