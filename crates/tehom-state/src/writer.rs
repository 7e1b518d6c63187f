//! State file writer

use crate::error::StateError;
use crate::format::{StateFile, StateFormat};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct StateWriter {
    format: StateFormat,
}

impl StateWriter {
    pub fn new(format: StateFormat) -> Self {
        Self { format }
    }

    /// Replace the state file at `path`.
    ///
    /// The new content is written to a sibling temporary file, synced, and
    /// renamed over the target, so readers see either the old or the new
    /// state and never a partial write.
    pub fn write(&self, path: &Path, state: &StateFile) -> Result<(), StateError> {
        let bytes = match self.format.resolve(path) {
            StateFormat::Bson => bson::to_vec(state)?,
            _ => serde_json::to_vec_pretty(state)?,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
            }
        }

        let tmp = temp_path(path);
        let mut file = File::create(&tmp).map_err(|e| StateError::io(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| StateError::io(&tmp, e))?;
        file.sync_all().map_err(|e| StateError::io(&tmp, e))?;
        drop(file);

        std::fs::rename(&tmp, path).map_err(|e| StateError::io(path, e))?;
        Ok(())
    }

    /// Remove the state file. Missing files are not an error.
    pub fn remove(path: &Path) -> Result<bool, StateError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::io(path, e)),
        }
    }
}

impl Default for StateWriter {
    fn default() -> Self {
        Self::new(StateFormat::Auto)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ProgressRecord, StatePayload};
    use crate::reader::StateReader;
    use chrono::{TimeZone, Utc};

    fn payload() -> StatePayload {
        StatePayload {
            progress: vec![ProgressRecord {
                sensor: "ICLISTENHF1252".into(),
                begin: Utc.with_ymd_and_hms(2016, 2, 1, 0, 0, 0).unwrap(),
                certified_end: Utc.with_ymd_and_hms(2016, 2, 15, 0, 0, 1).unwrap(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_read_bson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.bson");
        let state = StateFile::new(payload()).unwrap();

        StateWriter::default().write(&path, &state).unwrap();
        let loaded = StateReader::read(&path, StateFormat::Auto).unwrap().unwrap();

        assert_eq!(loaded.payload, state.payload);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_remove_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!StateWriter::remove(&dir.path().join("none.json")).unwrap());
    }
}
