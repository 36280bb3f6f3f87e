pub mod envfile;

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::fsutil::atomic_write;
use crate::scope::Scope;
use crate::variable::{ProvenanceSource, Variable};

pub use envfile::{EnvFile, EnvParseError};

const SERVICES_DIR: &str = "services";
const STATE_DIR: &str = ".varsafe";
const PROVENANCE_LOG: &str = "provenance.jsonl";

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: EnvParseError,
    },
    #[error("provenance log error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl LocalError {
    fn io(source: std::io::Error, path: &Path) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type LocalResult<T> = Result<T, LocalError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvenanceEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub source: ProvenanceSource,
    pub operation: String,
    pub project: String,
    pub environment: String,
    pub scope: Scope,
    pub keys: Vec<String>,
}

impl ProvenanceEntry {
    pub fn new(
        operation: impl Into<String>,
        source: ProvenanceSource,
        project: impl Into<String>,
        environment: impl Into<String>,
        scope: Scope,
        keys: Vec<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: None,
            source,
            operation: operation.into(),
            project: project.into(),
            environment: environment.into(),
            scope,
            keys,
        }
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }
}

/// Desired state on disk:
/// `<root>/<env>.env` for shared and `<root>/services/<name>/<env>.env` per service.
#[derive(Debug, Clone)]
pub struct LocalStateDir {
    root: PathBuf,
}

impl LocalStateDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_file_path(&self, environment: &str, scope: &Scope) -> PathBuf {
        let file = format!("{environment}.env");
        match scope {
            Scope::Shared => self.root.join(file),
            Scope::Service(name) => self.root.join(SERVICES_DIR).join(name).join(file),
        }
    }

    pub fn read_env_file(
        &self,
        environment: &str,
        scope: &Scope,
    ) -> LocalResult<Option<BTreeMap<String, String>>> {
        let path = self.env_file_path(environment, scope);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LocalError::io(err, &path)),
        };
        let file = EnvFile::parse(&content).map_err(|source| LocalError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Some(file.entries))
    }

    pub fn read_scope(
        &self,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> LocalResult<Vec<Variable>> {
        let entries = self.read_env_file(environment, scope)?.unwrap_or_default();
        Ok(entries
            .into_iter()
            .map(|(key, value)| {
                Variable::new(key, value, environment, scope.clone()).with_project(project)
            })
            .collect())
    }

    /// One scope, or shared plus every discovered service when `scope` is `None`.
    pub fn read_variables(
        &self,
        project: &str,
        environment: &str,
        scope: Option<&Scope>,
    ) -> LocalResult<Vec<Variable>> {
        if let Some(scope) = scope {
            return self.read_scope(project, environment, scope);
        }
        let mut variables = self.read_scope(project, environment, &Scope::Shared)?;
        for service in self.known_services()? {
            let scope = Scope::Service(service);
            variables.extend(self.read_scope(project, environment, &scope)?);
        }
        Ok(variables)
    }

    pub fn write_env_file(
        &self,
        environment: &str,
        scope: &Scope,
        entries: &BTreeMap<String, String>,
    ) -> LocalResult<PathBuf> {
        let path = self.env_file_path(environment, scope);
        let rendered = EnvFile::new(entries.clone()).render();
        atomic_write(&path, rendered.as_bytes()).map_err(|err| LocalError::io(err, &path))?;
        debug!(path = %path.display(), count = entries.len(), "wrote env file");
        Ok(path)
    }

    pub fn known_services(&self) -> LocalResult<Vec<String>> {
        let dir = self.root.join(SERVICES_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut services = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(&dir).to_path_buf();
                LocalError::Io {
                    path,
                    source: err
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
                }
            })?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            match Scope::service(name.clone()) {
                Ok(_) => services.push(name),
                Err(err) => debug!(%name, error = %err, "ignoring service directory"),
            }
        }
        services.sort();
        Ok(services)
    }

    pub fn provenance_log_path(&self) -> PathBuf {
        self.root.join(STATE_DIR).join(PROVENANCE_LOG)
    }

    pub fn append_provenance(&self, entry: &ProvenanceEntry) -> LocalResult<()> {
        let path = self.provenance_log_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| LocalError::io(err, parent))?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| LocalError::io(err, &path))?;
        file.write_all(line.as_bytes())
            .map_err(|err| LocalError::io(err, &path))
    }

    pub fn read_provenance(&self) -> LocalResult<Vec<ProvenanceEntry>> {
        let path = self.provenance_log_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LocalError::io(err, &path)),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(LocalError::from))
            .collect()
    }

    pub fn provenance_modified(&self) -> LocalResult<Option<SystemTime>> {
        let path = self.provenance_log_path();
        match fs::metadata(&path) {
            Ok(meta) => meta
                .modified()
                .map(Some)
                .map_err(|err| LocalError::io(err, &path)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LocalError::io(err, &path)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lays_out_scopes_and_discovers_services() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalStateDir::new(dir.path());
        let mut shared = BTreeMap::new();
        shared.insert("PORT".to_string(), "3000".to_string());
        local.write_env_file("dev", &Scope::Shared, &shared).unwrap();
        let mut api = BTreeMap::new();
        api.insert("WORKERS".to_string(), "4".to_string());
        local
            .write_env_file("dev", &Scope::Service("api".into()), &api)
            .unwrap();

        assert_eq!(
            local.env_file_path("dev", &Scope::Service("api".into())),
            dir.path().join("services/api/dev.env")
        );
        assert_eq!(local.known_services().unwrap(), vec!["api"]);

        let all = local.read_variables("shop", "dev", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .any(|var| var.key == "WORKERS" && var.scope == Scope::Service("api".into())));
        assert!(local.read_scope("shop", "prd", &Scope::Shared).unwrap().is_empty());
    }

    #[test]
    fn provenance_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let local = LocalStateDir::new(dir.path());
        assert!(local.provenance_modified().unwrap().is_none());

        for key in ["A", "B"] {
            let entry = ProvenanceEntry::new(
                "push",
                ProvenanceSource::Sync,
                "shop",
                "dev",
                Scope::Shared,
                vec![key.to_string()],
            );
            local.append_provenance(&entry).unwrap();
        }
        let entries = local.read_provenance().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].keys, vec!["B"]);
        assert!(local.provenance_modified().unwrap().is_some());
    }
}
