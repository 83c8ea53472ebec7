use serde::{Deserialize, Serialize};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("depth must be at least 1")]
    Depth,
}

/// Tuning for a single resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Levels of children materialized below the root. 1 lists the root's
    /// direct children only.
    pub depth: usize,
    /// Emit every column of every row at trace level.
    pub trace_columns: bool,
    /// Send `Progress` messages as documents are read.
    pub emit_progress: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            depth: 1,
            trace_columns: false,
            emit_progress: true,
        }
    }
}

impl ResolveOptions {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let options: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 {
            return Err(ConfigError::Depth);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "depth": 3 }}"#).unwrap();
        let options = ResolveOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.depth, 3);
        assert!(options.emit_progress);
        assert!(!options.trace_columns);
    }

    #[test]
    fn zero_depth_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "depth": 0 }}"#).unwrap();
        assert!(matches!(
            ResolveOptions::from_json_file(file.path()),
            Err(ConfigError::Depth)
        ));
    }

    #[test]
    fn missing_file() {
        let err = ResolveOptions::from_json_file(Path::new("/nonexistent/doctree.json"));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }
}
