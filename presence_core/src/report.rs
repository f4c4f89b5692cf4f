//! Cumulative friction report log.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Between consecutive report sections.
pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Error)]
#[error("report I/O error at {path}: {source}")]
pub struct ReportError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Markdown document that only ever grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLog {
    path: PathBuf,
}

impl ReportLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one section after the existing contents.
    pub fn append(&self, section: &str) -> Result<(), ReportError> {
        let err = |path: &Path, source| ReportError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| err(parent, e))?;
        }

        // Existing bytes are never rewritten; each section lands in one write.
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| err(&self.path, e))?;
        let len = file.metadata().map_err(|e| err(&self.path, e))?.len();

        let mut chunk = String::with_capacity(section.len() + SECTION_SEPARATOR.len());
        if len > 0 {
            chunk.push_str(SECTION_SEPARATOR);
        }
        chunk.push_str(section);
        file.write_all(chunk.as_bytes()).map_err(|e| err(&self.path, e))?;

        info!("report section appended to {}", self.path.display());
        Ok(())
    }

    /// Sections currently in the log, oldest first.
    pub fn sections(&self) -> Result<Vec<String>, ReportError> {
        match fs::read_to_string(&self.path) {
            Ok(text) if text.is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(text.split(SECTION_SEPARATOR).map(str::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ReportError {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}
