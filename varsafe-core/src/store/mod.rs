pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::batch::{BatchOptions, BatchOutcome, BatchRunner};
use crate::scope::Scope;
use crate::variable::Variable;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid backend {backend:?}: {reason}")]
    InvalidBackend { backend: String, reason: String },
    #[error("no backend could be connected (tried: {})", .attempts.join("; "))]
    NoBackend { attempts: Vec<String> },
    #[error("backend rejected operation: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn io(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableFilter {
    pub project: String,
    pub environment: String,
    pub scope: Option<Scope>,
}

impl VariableFilter {
    pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn matches(&self, variable: &Variable) -> bool {
        variable.project == self.project
            && variable.environment == self.environment
            && self
                .scope
                .as_ref()
                .map(|scope| scope == &variable.scope)
                .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetManyOptions {
    pub preserve_metadata: bool,
    pub batch: BatchOptions,
}

impl Default for SetManyOptions {
    fn default() -> Self {
        Self {
            preserve_metadata: true,
            batch: BatchOptions::default(),
        }
    }
}

pub type SetManyOutcome = BatchOutcome<Variable, Variable, StoreError>;
/// `true` values are confirmed removals; errors stay per key.
pub type DeleteManyOutcome = BatchOutcome<String, bool, StoreError>;

/// Remote variable store. Values cross this boundary in plaintext; any
/// encryption is the backend's concern.
#[async_trait]
pub trait VariableStore: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> StoreResult<()>;

    async fn disconnect(&self) -> StoreResult<()>;

    async fn get(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Variable>>;

    async fn set(&self, variable: &Variable) -> StoreResult<Variable>;

    /// Returns whether a variable was actually removed.
    async fn delete(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<bool>;

    async fn list(&self, filter: &VariableFilter) -> StoreResult<Vec<Variable>>;

    async fn export(
        &self,
        project: &str,
        environment: &str,
        scope: Option<&Scope>,
    ) -> StoreResult<BTreeMap<String, String>> {
        let filter = VariableFilter::new(project, environment).with_scope(scope.cloned());
        Ok(self
            .list(&filter)
            .await?
            .into_iter()
            .map(|variable| (variable.key, variable.value))
            .collect())
    }

    async fn set_many(&self, variables: Vec<Variable>, options: SetManyOptions) -> SetManyOutcome {
        let runner = BatchRunner::new(options.batch);
        runner
            .run(variables, |variable: Variable| async move {
                let incoming = if options.preserve_metadata {
                    self.merge_existing(variable).await?
                } else {
                    variable
                };
                self.set(&incoming).await
            })
            .await
    }

    async fn delete_many_by_keys(
        &self,
        keys: &[String],
        project: &str,
        environment: &str,
        scope: &Scope,
        options: BatchOptions,
    ) -> DeleteManyOutcome {
        let runner = BatchRunner::new(options);
        runner
            .run_with_callbacks(
                keys.to_vec(),
                |key: String| async move { self.delete(&key, project, environment, scope).await },
                |key, removed| {
                    if !removed {
                        debug!(%key, "delete reported nothing to remove");
                    }
                },
                |key, err| warn!(%key, error = %err, "delete failed"),
            )
            .await
    }

    async fn get_many(
        &self,
        keys: &[String],
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<BTreeMap<String, Variable>> {
        let mut found = BTreeMap::new();
        for key in keys {
            if let Some(variable) = self.get(key, project, environment, scope).await? {
                found.insert(key.clone(), variable);
            }
        }
        Ok(found)
    }

    async fn merge_existing(&self, mut variable: Variable) -> StoreResult<Variable> {
        let existing = self
            .get(
                &variable.key,
                &variable.project,
                &variable.environment,
                &variable.scope,
            )
            .await?;
        if let Some(existing) = existing {
            if variable.tags.is_empty() {
                variable.tags = existing.tags;
            }
            let mut metadata = existing.metadata;
            metadata.append(&mut variable.metadata);
            variable.metadata = metadata;
        }
        Ok(variable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendSpec {
    Memory,
    File(PathBuf),
}

/// `memory://` or `file://<path>`; relative file paths resolve against `base_dir`.
pub fn parse_backend(backend: &str, base_dir: &Path) -> StoreResult<BackendSpec> {
    let invalid = |reason: &str| StoreError::InvalidBackend {
        backend: backend.to_string(),
        reason: reason.to_string(),
    };
    if let Some(rest) = backend.strip_prefix("file://") {
        if !rest.starts_with('/') {
            if rest.is_empty() {
                return Err(invalid("missing file path"));
            }
            return Ok(BackendSpec::File(base_dir.join(rest)));
        }
    }
    let url = Url::parse(backend).map_err(|err| invalid(&err.to_string()))?;
    match url.scheme() {
        "memory" => Ok(BackendSpec::Memory),
        "file" => url
            .to_file_path()
            .map(BackendSpec::File)
            .map_err(|_| invalid("not a local file path")),
        other => Err(invalid(&format!("unsupported scheme {other}"))),
    }
}

pub async fn connect_first(
    backends: &[String],
    base_dir: &Path,
) -> StoreResult<Arc<dyn VariableStore>> {
    let mut attempts = Vec::new();
    for backend in backends {
        let store: Arc<dyn VariableStore> = match parse_backend(backend, base_dir) {
            Ok(BackendSpec::Memory) => Arc::new(MemoryStore::new()),
            Ok(BackendSpec::File(path)) => Arc::new(FileStore::new(path)),
            Err(err) => {
                warn!(%backend, error = %err, "skipping backend");
                attempts.push(format!("{backend}: {err}"));
                continue;
            }
        };
        match store.connect().await {
            Ok(()) => {
                debug!(%backend, "connected to store");
                return Ok(store);
            }
            Err(err) => {
                warn!(%backend, error = %err, "backend connection failed");
                attempts.push(format!("{backend}: {err}"));
            }
        }
    }
    Err(StoreError::NoBackend { attempts })
}
