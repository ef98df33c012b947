//! Session artifact: the last session id seen by any agent run.
//!
//! Unlike `Task::session_id`, which keeps the first session a task attached
//! to, this file is overwritten by every run that reports a session.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::fs::write_atomic;

/// Contents of `session.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    /// Read the artifact. A missing or empty file, or an empty id, yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let record: SessionRecord =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::CorruptState {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        Ok(Some(record).filter(|r| !r.session_id.is_empty()))
    }

    /// Overwrite the artifact.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        json.push(b'\n');
        write_atomic(path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_overwrites_and_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        SessionRecord::new("first").save(&path).unwrap();
        SessionRecord::new("second").save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"sessionId": "second"}));
        assert_eq!(
            SessionRecord::load(&path).unwrap(),
            Some(SessionRecord::new("second"))
        );
    }

    #[test]
    fn test_missing_or_blank_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        assert!(SessionRecord::load(&path).unwrap().is_none());

        std::fs::write(&path, r#"{"sessionId":""}"#).unwrap();
        assert!(SessionRecord::load(&path).unwrap().is_none());
    }

    #[test]
    fn test_malformed_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "session=abc").unwrap();
        assert!(SessionRecord::load(&path).is_err());
    }
}
