//! Artifact store
//!
//! Every durable output of the pipeline lives at a path that is a pure
//! function of the configuration and the artifact kind, so re-running a
//! stage overwrites the same file. Writes go through a temporary file in the
//! target directory and are renamed into place; a failed stage never leaves
//! a half-written artifact behind.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::errors::{PipelineError, Result};
use crate::serialization::to_canonical_json_pretty;

/// Named artifacts exchanged between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    RawArchive,
    RawTable,
    TransformedTable,
    FeatureSchema,
    TestSplit,
    Model,
    Metrics,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::RawArchive => "raw_archive",
            ArtifactKind::RawTable => "raw_table",
            ArtifactKind::TransformedTable => "transformed_table",
            ArtifactKind::FeatureSchema => "feature_schema",
            ArtifactKind::TestSplit => "test_split",
            ArtifactKind::Model => "model",
            ArtifactKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved location of every artifact kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub raw_archive: PathBuf,
    pub raw_table: PathBuf,
    pub transformed_table: PathBuf,
    pub feature_schema: PathBuf,
    pub test_split: PathBuf,
    pub model: PathBuf,
    pub metrics: PathBuf,
}

impl ArtifactLayout {
    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::RawArchive => &self.raw_archive,
            ArtifactKind::RawTable => &self.raw_table,
            ArtifactKind::TransformedTable => &self.transformed_table,
            ArtifactKind::FeatureSchema => &self.feature_schema,
            ArtifactKind::TestSplit => &self.test_split,
            ArtifactKind::Model => &self.model,
            ArtifactKind::Metrics => &self.metrics,
        }
    }
}

/// Reads and writes artifacts at their layout paths.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: ArtifactLayout,
}

impl ArtifactStore {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        self.layout.path(kind)
    }

    pub fn exists(&self, kind: ArtifactKind) -> bool {
        self.path(kind).is_file()
    }

    /// Atomically replace the artifact with `data`.
    pub fn write(&self, kind: ArtifactKind, data: &[u8]) -> Result<PathBuf> {
        let path = self.path(kind).to_path_buf();
        write_atomic(&path, data)?;
        debug!(artifact = %kind, bytes = data.len(), "Wrote {}", path.display());
        Ok(path)
    }

    /// Write `value` as canonical, pretty-printed JSON.
    pub fn write_json<T: Serialize>(&self, kind: ArtifactKind, value: &T) -> Result<PathBuf> {
        let bytes = to_canonical_json_pretty(value)?;
        self.write(kind, &bytes)
    }

    pub fn read(&self, kind: ArtifactKind) -> Result<Vec<u8>> {
        let path = self.require(kind)?;
        Ok(std::fs::read(path)?)
    }

    pub fn read_json<T: DeserializeOwned>(&self, kind: ArtifactKind) -> Result<T> {
        let bytes = self.read(kind)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PipelineError::Serialization(format!(
                "{} at {}: {}",
                kind,
                self.path(kind).display(),
                e
            ))
        })
    }

    /// Open the artifact for streaming reads.
    pub fn open(&self, kind: ArtifactKind) -> Result<File> {
        let path = self.require(kind)?;
        Ok(File::open(path)?)
    }

    fn require(&self, kind: ArtifactKind) -> Result<&Path> {
        let path = self.path(kind);
        if !path.is_file() {
            return Err(PipelineError::ArtifactMissing {
                kind,
                path: path.to_path_buf(),
            });
        }
        Ok(path)
    }
}

/// Stream `reader` into a temp file beside `path`, then rename it into place.
///
/// Readers of `path` see either the previous content or all of the new one.
/// Returns the number of bytes written.
pub fn write_atomic<R: Read>(path: &Path, mut reader: R) -> Result<u64> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    let written = io::copy(&mut reader, &mut staged)?;
    staged.flush()?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(written)
}
