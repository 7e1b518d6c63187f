//! State file reader

use crate::error::StateError;
use crate::format::{StateFile, StateFormat};
use std::path::Path;

pub struct StateReader;

impl StateReader {
    /// Read and verify a state file.
    ///
    /// Returns `Ok(None)` when no file exists yet. Anything that exists but
    /// does not decode and verify is an error.
    pub fn read(path: &Path, format: StateFormat) -> Result<Option<StateFile>, StateError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(path, e)),
        };

        let file: StateFile = match format.resolve(path) {
            StateFormat::Bson => bson::from_slice(&bytes)?,
            _ => serde_json::from_slice(&bytes)?,
        };

        file.verify()?;
        Ok(Some(file))
    }
}
