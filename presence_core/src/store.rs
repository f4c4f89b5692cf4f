//! Durable telemetry store: one JSON file per (persona, run).

use crate::telemetry::TelemetryRecord;
use presence_env::RunId;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl TelemetryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        TelemetryError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A telemetry file that could not be read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Everything readable from a store directory.
#[derive(Debug, Default)]
pub struct StoreContents {
    pub records: Vec<TelemetryRecord>,
    pub skipped: Vec<SkippedFile>,
}

/// Directory of per-run telemetry files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryStore {
    dir: PathBuf,
}

impl TelemetryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic file name for a (persona, run) pair.
    ///
    /// Distinct personas always get distinct names, whatever characters
    /// their session ids contain.
    pub fn path_for(&self, persona: &str, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}-{}.json", encode_persona(persona), run_id))
    }

    /// Writes a record, replacing any earlier snapshot of the same run.
    ///
    /// The file is written next to its target and renamed into place so a
    /// reader never sees a partial record.
    pub fn write(&self, record: &TelemetryRecord) -> Result<PathBuf, TelemetryError> {
        fs::create_dir_all(&self.dir).map_err(|e| TelemetryError::io(&self.dir, e))?;

        let path = self.path_for(&record.persona, &record.run_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record)?;

        fs::write(&tmp, json).map_err(|e| TelemetryError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            TelemetryError::io(&path, e)
        })?;

        debug!("telemetry written: {}", path.display());
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<TelemetryRecord, TelemetryError> {
        let contents = fs::read_to_string(path).map_err(|e| TelemetryError::io(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Reads every `*.json` record in the directory.
    ///
    /// Unreadable or corrupt files are logged and listed in `skipped`; a
    /// missing directory is simply empty. Records come back ordered by file
    /// name.
    pub fn read_all(&self) -> StoreContents {
        let mut contents = StoreContents::default();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("telemetry dir {} not readable: {}", self.dir.display(), e);
                return contents;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        for path in paths {
            match Self::read(&path) {
                Ok(record) => contents.records.push(record),
                Err(e) => {
                    warn!("skipping corrupt telemetry file {}: {}", path.display(), e);
                    contents.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        contents
    }
}

/// Escapes everything but ASCII alphanumerics and `-` as `_XX` (hex of each
/// UTF-8 byte). `_` only ever starts an escape, so the mapping is one-to-one.
fn encode_persona(persona: &str) -> String {
    if persona.is_empty() {
        return "_".to_string();
    }
    let mut out = String::with_capacity(persona.len());
    for byte in persona.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("_{:02X}", byte));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(persona: &str) -> TelemetryRecord {
        TelemetryRecord::new(persona, RunId::from_bytes([7; 16]))
    }

    #[test]
    fn test_path_is_deterministic_and_safe() {
        let store = TelemetryStore::new("/tmp/runs");
        let run = RunId::from_bytes([1; 16]);
        let a = store.path_for("maya/../x y", &run);
        assert_eq!(a, store.path_for("maya/../x y", &run));
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("maya_2F_2E_2E_2Fx_20y-"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_personas_that_differ_only_in_punctuation_keep_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryStore::new(dir.path());
        let run = RunId::from_bytes([3; 16]);

        let personas = ["maya.b", "maya_b", "maya b", "maya_2Eb", ""];
        let mut paths = Vec::new();
        for persona in personas {
            paths.push(store.write(&TelemetryRecord::new(persona, run)).unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), personas.len());

        let mut stored: Vec<String> = store.read_all().records.into_iter().map(|r| r.persona).collect();
        stored.sort();
        let mut expected: Vec<String> = personas.iter().map(|p| p.to_string()).collect();
        expected.sort();
        assert_eq!(stored, expected);
    }

    #[test]
    fn test_write_overwrites_same_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryStore::new(dir.path());

        let mut rec = record("maya");
        let first = store.write(&rec).unwrap();
        rec.errors.push("late".into());
        let second = store.write(&rec).unwrap();

        assert_eq!(first, second);
        let back = TelemetryStore::read(&second).unwrap();
        assert_eq!(back.errors, vec!["late".to_string()]);
        assert_eq!(store.read_all().records.len(), 1);
    }

    #[test]
    fn test_corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryStore::new(dir.path());
        store.write(&record("maya")).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let contents = store.read_all();
        assert_eq!(contents.records.len(), 1);
        assert_eq!(contents.skipped.len(), 1);
        assert!(contents.skipped[0].path.ends_with("broken.json"));
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TelemetryStore::new(dir.path().join("nope"));
        let contents = store.read_all();
        assert!(contents.records.is_empty());
        assert!(contents.skipped.is_empty());
    }
}
