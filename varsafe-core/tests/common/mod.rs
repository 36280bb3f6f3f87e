#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use varsafe_core::{
    MemoryStore, Scope, StoreError, StoreResult, VarIdentity, Variable, VariableFilter,
    VariableStore,
};

/// Memory store whose `set`/`delete` can be made to fail per identity.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_set: Mutex<HashSet<VarIdentity>>,
    fail_delete: Mutex<HashSet<VarIdentity>>,
    pub calls: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(variables: Vec<Variable>) -> Self {
        Self {
            inner: MemoryStore::with_variables(variables),
            fail_set: Mutex::new(HashSet::new()),
            fail_delete: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_set(&self, key: &str, scope: Scope) {
        self.fail_set
            .lock()
            .unwrap()
            .insert(VarIdentity::new(key, scope));
    }

    pub fn fail_delete(&self, key: &str, scope: Scope) {
        self.fail_delete
            .lock()
            .unwrap()
            .insert(VarIdentity::new(key, scope));
    }

    pub async fn snapshot(&self) -> Vec<Variable> {
        self.inner.snapshot().await
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VariableStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn connect(&self) -> StoreResult<()> {
        self.inner.connect().await
    }

    async fn disconnect(&self) -> StoreResult<()> {
        self.inner.disconnect().await
    }

    async fn get(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<Option<Variable>> {
        self.inner.get(key, project, environment, scope).await
    }

    async fn set(&self, variable: &Variable) -> StoreResult<Variable> {
        let identity = variable.identity();
        self.log(format!("set {identity}"));
        if self.fail_set.lock().unwrap().contains(&identity) {
            return Err(StoreError::Rejected(format!("injected set failure for {identity}")));
        }
        self.inner.set(variable).await
    }

    async fn delete(
        &self,
        key: &str,
        project: &str,
        environment: &str,
        scope: &Scope,
    ) -> StoreResult<bool> {
        let identity = VarIdentity::new(key, scope.clone());
        self.log(format!("delete {identity}"));
        if self.fail_delete.lock().unwrap().contains(&identity) {
            return Err(StoreError::Rejected(format!(
                "injected delete failure for {identity}"
            )));
        }
        self.inner.delete(key, project, environment, scope).await
    }

    async fn list(&self, filter: &VariableFilter) -> StoreResult<Vec<Variable>> {
        self.inner.list(filter).await
    }
}

pub fn remote(key: &str, value: &str, environment: &str, scope: Scope) -> Variable {
    Variable::new(key, value, environment, scope).with_project("shop")
}

pub fn write_env(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

pub fn values(variables: &[Variable]) -> BTreeMap<String, String> {
    variables
        .iter()
        .map(|var| (format!("{}@{}", var.key, var.scope), var.value.clone()))
        .collect()
}
