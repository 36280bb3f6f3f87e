use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::fsutil::atomic_write;
use crate::scope::Scope;
use crate::variable::Variable;

use super::memory::{lookup_key, record_key, stamped, RecordKey};
use super::{StoreError, StoreResult, VariableFilter, VariableStore};

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    #[serde(default)]
    variables: Vec<Variable>,
}

/// JSON document on disk; every write replaces the file atomically.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
    connected: AtomicBool,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn load(&self) -> StoreResult<BTreeMap<RecordKey, Variable>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(StoreError::io(err, &self.path)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let document: StoreDocument = serde_json::from_str(&raw)?;
        if document.version != DOCUMENT_VERSION {
            return Err(StoreError::Rejected(format!(
                "unsupported store document version {}",
                document.version
            )));
        }
        Ok(document
            .variables
            .into_iter()
            .map(|variable| (record_key(&variable), variable))
            .collect())
    }

    fn save(&self, records: &BTreeMap<RecordKey, Variable>) -> StoreResult<()> {
        let document = StoreDocument {
            version: DOCUMENT_VERSION,
            variables: records.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&document)?;
        atomic_write(&self.path, &json).map_err(|err| StoreError::io(err, &self.path))
    }
}

#[async_trait]
impl VariableStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn connect(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        if self.path.exists() {
            self.load()?;
        } else {
            self.save(&BTreeMap::new())?;
            debug!(path = %self.path.display(), "created store document");
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Variable>> {
        self.ensure_connected()?;
        let _guard = self.lock.lock().await;
        let mut records = self.load()?;
        Ok(records.remove(&lookup_key(key, project, environment, scope)))
    }

    async fn set(&self, variable: &Variable) -> StoreResult<Variable> {
        self.ensure_connected()?;
        let _guard = self.lock.lock().await;
        let mut records = self.load()?;
        let stored = stamped(variable);
        records.insert(record_key(&stored), stored.clone());
        self.save(&records)?;
        Ok(stored)
    }

    async fn delete(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<bool> {
        self.ensure_connected()?;
        let _guard = self.lock.lock().await;
        let mut records = self.load()?;
        let removed = records
            .remove(&lookup_key(key, project, environment, scope))
            .is_some();
        if removed {
            self.save(&records)?;
        }
        Ok(removed)
    }

    async fn list(&self, filter: &VariableFilter) -> StoreResult<Vec<Variable>> {
        self.ensure_connected()?;
        let _guard = self.lock.lock().await;
        Ok(self
            .load()?
            .into_values()
            .filter(|variable| filter.matches(variable))
            .collect())
    }
}
