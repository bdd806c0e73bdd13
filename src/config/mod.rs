#![forbid(unsafe_code)]

//! TOML job manifests.
//!
//! ```toml
//! [store]
//! path = "graph.db"
//! artifacts = "downloads"
//!
//! [[step]]
//! kind = "file"
//! name = "genes"
//! file = "genes.tsv.zip"
//! archived = true
//! query = "INSERT INTO nodes (key, properties) SELECT json_extract(value, '$.id'), value FROM json_each(:rows)"
//! decoding = { mode = "multi-value", separator = "|" }
//!
//! [[step]]
//! kind = "loop"
//! name = "prune"
//! loop_query = "SELECT key FROM nodes WHERE labels = '[]' LIMIT 500"
//! exec_query = "DELETE FROM nodes WHERE key IN (SELECT ids.value FROM json_each(:nodes) AS batch, json_each(batch.value) AS ids)"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::ingest::{
    Delimiter, IngestConfig, KeySchema, LoadError, LoopSpec, QuerySpec, ValueDecoding,
    DEFAULT_CHUNK_SIZE,
};
use crate::store::SqliteOptions;

/// Scratch directory name used when the manifest does not set one.
pub const DEFAULT_SCRATCH_DIR: &str = ".graphload-scratch";

/// Failure to load a manifest.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Manifest file unreadable.
    #[error("failed to read manifest {path}: {source}")]
    Read {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Manifest is not valid TOML or has the wrong shape.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// Manifest path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
    /// A step carries an invalid value.
    #[error("manifest {path}, step '{step}': {source}")]
    Invalid {
        /// Manifest path.
        path: PathBuf,
        /// Offending step.
        step: String,
        /// What is wrong with it.
        #[source]
        source: LoadError,
    },
    /// No manifest given and no default location exists.
    #[error("no manifest given and no config directory found; pass a manifest path")]
    NoManifestPath,
}

/// Where the store lives and where step inputs come from.
#[derive(Debug, Clone)]
pub struct StoreSection {
    /// SQLite database file. Required unless the job is a dry run.
    pub path: Option<PathBuf>,
    /// Connection options.
    pub options: SqliteOptions,
    /// Directory step inputs are resolved against.
    pub artifacts: PathBuf,
    /// Directory archived inputs are unpacked into.
    pub scratch: PathBuf,
}

/// A validated step.
#[derive(Debug, Clone)]
pub struct Step {
    /// Step name, unique within the manifest.
    pub name: String,
    /// What the step does.
    pub action: StepAction,
}

/// Work performed by a step.
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Load one delimited file.
    File(FileStep),
    /// Repeat a write while a read query returns ids.
    Loop(LoopSpec),
}

/// A validated file-load step. `config.path` is relative to the artifact root.
#[derive(Debug, Clone)]
pub struct FileStep {
    /// Artifact name under the artifact root.
    pub file: String,
    /// Whether the artifact is a single-file ZIP archive.
    pub archived: bool,
    /// Pipeline settings; the path is filled in once the artifact is local.
    pub config: IngestConfig,
}

impl FileStep {
    /// Pipeline settings reading from `local_path`.
    pub fn ingest_config(&self, local_path: impl Into<PathBuf>) -> IngestConfig {
        IngestConfig {
            path: local_path.into(),
            ..self.config.clone()
        }
    }
}

/// A parsed and validated job manifest.
#[derive(Debug, Clone)]
pub struct JobManifest {
    /// Manifest location.
    pub path: PathBuf,
    /// Store and artifact settings.
    pub store: StoreSection,
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

impl JobManifest {
    /// Reads `explicit`, or the default manifest when `None`.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit
            .or_else(default_manifest_path)
            .ok_or(ConfigError::NoManifestPath)?;
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&path, &contents)
    }

    /// Parses manifest text. Relative paths resolve against the manifest's directory.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let raw: RawManifest = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let artifacts = match raw.store.artifacts {
            Some(dir) => base.join(dir),
            None => base.to_path_buf(),
        };
        let scratch = raw
            .store
            .scratch
            .map(|dir| base.join(dir))
            .unwrap_or_else(|| artifacts.join(DEFAULT_SCRATCH_DIR));
        let store = StoreSection {
            path: raw.store.path.map(|db| base.join(db)),
            options: raw.store.sqlite,
            artifacts,
            scratch,
        };

        let mut steps: Vec<Step> = Vec::with_capacity(raw.step.len());
        for (position, raw_step) in raw.step.into_iter().enumerate() {
            let step = raw_step.validate(position).map_err(|(step, source)| {
                ConfigError::Invalid {
                    path: path.to_path_buf(),
                    step,
                    source,
                }
            })?;
            if steps.iter().any(|seen| seen.name == step.name) {
                return Err(ConfigError::Invalid {
                    path: path.to_path_buf(),
                    step: step.name.clone(),
                    source: LoadError::Argument(format!("duplicate step name '{}'", step.name)),
                });
            }
            steps.push(step);
        }
        Ok(Self {
            path: path.to_path_buf(),
            store,
            steps,
        })
    }
}

/// `<config dir>/graphload/job.toml`.
pub fn default_manifest_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("graphload").join("job.toml"))
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    step: Vec<RawStep>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStore {
    path: Option<PathBuf>,
    artifacts: Option<PathBuf>,
    scratch: Option<PathBuf>,
    #[serde(flatten)]
    sqlite: SqliteOptions,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum RawStep {
    File(RawFileStep),
    Loop(RawLoopStep),
}

#[derive(Debug, Deserialize)]
struct RawFileStep {
    name: Option<String>,
    file: String,
    #[serde(default)]
    archived: bool,
    query: String,
    keys: Option<RawKeys>,
    #[serde(default)]
    delimiter: Delimiter,
    #[serde(default)]
    start_at: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default)]
    decoding: ValueDecoding,
    #[serde(default)]
    read_ahead: usize,
}

#[derive(Debug, Deserialize)]
struct RawLoopStep {
    name: Option<String>,
    #[serde(flatten)]
    spec: LoopSpec,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawKeys {
    Joined(String),
    List(Vec<String>),
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl RawStep {
    fn validate(self, position: usize) -> Result<Step, (String, LoadError)> {
        match self {
            RawStep::File(raw) => {
                let name = raw.name.clone().unwrap_or_else(|| format!("step-{position}"));
                let action = raw.validate(&name).map_err(|err| (name.clone(), err))?;
                Ok(Step {
                    name,
                    action: StepAction::File(action),
                })
            }
            RawStep::Loop(raw) => {
                let name = raw.name.unwrap_or_else(|| format!("step-{position}"));
                if raw.spec.loop_query.trim().is_empty() || raw.spec.exec_query.trim().is_empty() {
                    return Err((
                        name,
                        LoadError::Argument("loop step needs both a loop and an exec query".into()),
                    ));
                }
                Ok(Step {
                    name,
                    action: StepAction::Loop(raw.spec),
                })
            }
        }
    }
}

impl RawFileStep {
    fn validate(self, name: &str) -> Result<FileStep, LoadError> {
        if self.chunk_size == 0 {
            return Err(LoadError::Argument("chunk_size must be at least 1".into()));
        }
        let keys = match self.keys {
            None => None,
            Some(RawKeys::Joined(list)) => Some(KeySchema::parse_key_list(&list)?),
            Some(RawKeys::List(keys)) => Some(KeySchema::new(keys)?),
        };
        let config = IngestConfig {
            name: Some(name.to_string()),
            path: PathBuf::from(&self.file),
            delimiter: self.delimiter,
            keys,
            query: QuerySpec::new(self.query)?,
            start_at: self.start_at,
            chunk_size: self.chunk_size,
            decoding: self.decoding,
            read_ahead: self.read_ahead,
        };
        Ok(FileStep {
            file: self.file,
            archived: self.archived,
            config,
        })
    }
}
