#![forbid(unsafe_code)]

//! Input artifacts for load steps.
//!
//! A step names its input relative to an artifact root. Plain inputs are read
//! in place; archived inputs are single-file ZIP archives unpacked into a
//! scratch directory for the duration of the step.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Failure while locating or unpacking an artifact.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Filesystem failure on `path`.
    #[error("artifact io error at {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Archive could not be parsed.
    #[error("invalid archive {}: {source}", path.display())]
    Zip {
        /// Archive path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: zip::result::ZipError,
    },
    /// No artifact at the resolved path.
    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),
    /// Archive holds no regular file.
    #[error("archive {} contains no file", .0.display())]
    EmptyArchive(PathBuf),
}

impl SourceError {
    fn io(path: &Path, source: io::Error) -> Self {
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where load steps get their input files from.
pub trait ArtifactSource {
    /// Resolves `name` to a readable local file.
    fn fetch_local_file(&self, name: &str) -> Result<PathBuf, SourceError>;

    /// Unpacks the single file inside `archive` and returns its local path.
    ///
    /// The caller owns the returned file and removes it when done.
    fn extract_archive(&self, archive: &Path) -> Result<PathBuf, SourceError>;
}

/// Artifacts kept in a local directory.
#[derive(Debug, Clone)]
pub struct LocalArtifacts {
    root: PathBuf,
    scratch: PathBuf,
}

impl LocalArtifacts {
    /// Artifacts under `root`, unpacked into `scratch`.
    pub fn new(root: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scratch: scratch.into(),
        }
    }

    /// Artifact root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory archives are unpacked into.
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }
}

impl ArtifactSource for LocalArtifacts {
    fn fetch_local_file(&self, name: &str) -> Result<PathBuf, SourceError> {
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(SourceError::MissingArtifact(path));
        }
        Ok(path)
    }

    fn extract_archive(&self, archive: &Path) -> Result<PathBuf, SourceError> {
        let file = File::open(archive).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SourceError::MissingArtifact(archive.to_path_buf()),
            _ => SourceError::io(archive, err),
        })?;
        let mut zip = ZipArchive::new(file).map_err(|source| SourceError::Zip {
            path: archive.to_path_buf(),
            source,
        })?;
        fs::create_dir_all(&self.scratch).map_err(|err| SourceError::io(&self.scratch, err))?;

        for index in 0..zip.len() {
            let mut entry = zip.by_index(index).map_err(|source| SourceError::Zip {
                path: archive.to_path_buf(),
                source,
            })?;
            if entry.is_dir() {
                continue;
            }
            // Entry names are flattened to their last component.
            let Some(file_name) = Path::new(entry.name()).file_name().map(PathBuf::from) else {
                continue;
            };
            let target = self.scratch.join(file_name);
            let mut out = File::create(&target).map_err(|err| SourceError::io(&target, err))?;
            if let Err(err) = io::copy(&mut entry, &mut out) {
                drop(out);
                if let Err(cleanup) = fs::remove_file(&target) {
                    debug!(path = %target.display(), error = %cleanup, "source.scratch.cleanup_failed");
                }
                return Err(SourceError::io(&target, err));
            }
            debug!(
                archive = %archive.display(),
                extracted = %target.display(),
                bytes = entry.size(),
                "source.archive.extracted"
            );
            return Ok(target);
        }
        Err(SourceError::EmptyArchive(archive.to_path_buf()))
    }
}
