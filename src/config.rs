/// Session configuration - fixed when a session is built
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SequencerError};
use crate::sequencer::{cell_count, SoundTable};

pub const DEFAULT_ROW_COUNT: usize = 4;
pub const DEFAULT_ROW_LENGTH: usize = 8;
pub const DEFAULT_SPEED_MS: u64 = 175;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub row_count: usize,
    pub row_length: usize,
    /// Milliseconds between ticks.
    pub speed_ms: u64,
    pub sounds: SoundTable,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            row_count: DEFAULT_ROW_COUNT,
            row_length: DEFAULT_ROW_LENGTH,
            speed_ms: DEFAULT_SPEED_MS,
            sounds: SoundTable::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_rows(mut self, row_count: usize) -> Self {
        self.row_count = row_count;
        self
    }

    pub fn with_row_length(mut self, row_length: usize) -> Self {
        self.row_length = row_length;
        self
    }

    pub fn with_speed_ms(mut self, speed_ms: u64) -> Self {
        self.speed_ms = speed_ms;
        self
    }

    pub fn with_sounds(mut self, sounds: SoundTable) -> Self {
        self.sounds = sounds;
        self
    }

    /// Reject configurations that cannot produce a playable session.
    ///
    /// Rows the sound table does not cover are allowed; they build as
    /// silent rows.
    pub fn validate(&self) -> Result<()> {
        cell_count(self.row_count, self.row_length)?;
        if self.speed_ms == 0 {
            return Err(SequencerError::InvalidSpeed);
        }
        if let Some((row, sound)) = self.sounds.iter().find(|(_, sound)| sound.note > 127) {
            return Err(SequencerError::InvalidNote {
                row,
                note: sound.note,
            });
        }
        Ok(())
    }

    /// Parse a (possibly partial) JSON document over the defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| SequencerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| SequencerError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn speed(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.speed_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.row_count, 4);
        assert_eq!(config.row_length, 8);
        assert_eq!(config.speed_ms, 175);
        assert_eq!(config.sounds.get(1).map(|s| s.name.as_str()), Some("D2"));
        assert_eq!(config.sounds.get(4).map(|s| s.name.as_str()), Some("B2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let err = SessionConfig::default().with_rows(0).validate().unwrap_err();
        assert_eq!(
            err,
            SequencerError::InvalidDimensions {
                row_count: 0,
                row_length: 8
            }
        );
        assert!(SessionConfig::default()
            .with_row_length(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_oversized_dimensions_rejected() {
        let err = SessionConfig::from_json_str(
            r#"{ "row_count": 4611686018427387904, "row_length": 4 }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SequencerError::InvalidDimensions { .. }));

        let err = SessionConfig::default().with_rows(1000).validate().unwrap_err();
        assert!(matches!(err, SequencerError::InvalidDimensions { .. }));
    }

    #[test]
    fn test_out_of_range_note_rejected() {
        let json = r#"{ "sounds": { "2": { "name": "bad", "note": 200 } } }"#;
        let err = SessionConfig::from_json_str(json).unwrap_err();
        assert_eq!(err, SequencerError::InvalidNote { row: 2, note: 200 });
    }

    #[test]
    fn test_zero_speed_rejected() {
        let err = SessionConfig::default().with_speed_ms(0).validate().unwrap_err();
        assert_eq!(err, SequencerError::InvalidSpeed);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(r#"{ "row_length": 16 }"#).unwrap();
        assert_eq!(config.row_length, 16);
        assert_eq!(config.row_count, 4);
        assert_eq!(config.speed_ms, 175);
    }

    #[test]
    fn test_json_sound_table() {
        let json = r#"{
            "row_count": 2,
            "sounds": { "1": { "name": "kick", "note": 36 } }
        }"#;
        let config = SessionConfig::from_json_str(json).unwrap();
        assert_eq!(config.sounds.get(1).map(|s| s.note), Some(36));
        assert!(config.sounds.get(2).is_none());
    }

    #[test]
    fn test_invalid_json() {
        let err = SessionConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, SequencerError::Config(_)));

        let err = SessionConfig::from_json_str(r#"{ "speed_ms": 0 }"#).unwrap_err();
        assert_eq!(err, SequencerError::InvalidSpeed);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{ "speed_ms": 120 }"#).unwrap();
        let config = SessionConfig::from_json_file(&path).unwrap();
        assert_eq!(config.speed_ms, 120);

        let missing = SessionConfig::from_json_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(SequencerError::Config(_))));
    }
}
