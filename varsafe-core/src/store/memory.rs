use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::scope::{Scope, VarIdentity};
use crate::variable::{Provenance, ProvenanceSource, Variable};

use super::{StoreError, StoreResult, VariableFilter, VariableStore};

/// `(project, environment, identity)`.
pub(crate) type RecordKey = (String, String, VarIdentity);

pub(crate) fn record_key(variable: &Variable) -> RecordKey {
    (
        variable.project.clone(),
        variable.environment.clone(),
        variable.identity(),
    )
}

pub(crate) fn lookup_key(key: &str, project: &str, environment: &str, scope: &Scope) -> RecordKey {
    (
        project.to_string(),
        environment.to_string(),
        VarIdentity::new(key, scope.clone()),
    )
}

/// Stamps provenance when the caller supplied none.
pub(crate) fn stamped(variable: &Variable) -> Variable {
    let mut stored = variable.clone();
    if stored.provenance.is_none() {
        stored.provenance = Some(Provenance::now(ProvenanceSource::Manual, None));
    }
    stored
}

/// Process-local store. Holds nothing across runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordKey, Variable>>,
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated and already connected.
    pub fn with_variables(variables: impl IntoIterator<Item = Variable>) -> Self {
        let records = variables
            .into_iter()
            .map(|variable| {
                let stored = stamped(&variable);
                (record_key(&stored), stored)
            })
            .collect();
        Self {
            records: RwLock::new(records),
            connected: AtomicBool::new(true),
        }
    }

    pub async fn snapshot(&self) -> Vec<Variable> {
        self.records.read().await.values().cloned().collect()
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }
}

#[async_trait]
impl VariableStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> StoreResult<()> {
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
        let records = self.records.read().await;
        Ok(records
            .get(&lookup_key(key, project, environment, scope))
            .cloned())
    }

    async fn set(&self, variable: &Variable) -> StoreResult<Variable> {
        self.ensure_connected()?;
        let stored = stamped(variable);
        self.records
            .write()
            .await
            .insert(record_key(&stored), stored.clone());
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
        Ok(self
            .records
            .write()
            .await
            .remove(&lookup_key(key, project, environment, scope))
            .is_some())
    }

    async fn list(&self, filter: &VariableFilter) -> StoreResult<Vec<Variable>> {
        self.ensure_connected()?;
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|variable| filter.matches(variable))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SetManyOptions;

    fn var(key: &str, value: &str, scope: Scope) -> Variable {
        Variable::new(key, value, "dev", scope).with_project("shop")
    }

    #[tokio::test]
    async fn shared_and_service_keys_are_distinct_records() {
        let store = MemoryStore::new();
        store.connect().await.unwrap();
        store.set(&var("PORT", "80", Scope::Shared)).await.unwrap();
        store
            .set(&var("PORT", "3000", Scope::Service("api".into())))
            .await
            .unwrap();

        let shared = store
            .get("PORT", "shop", "dev", &Scope::Shared)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared.value, "80");
        assert!(shared.provenance.is_some());

        let filter = VariableFilter::new("shop", "dev").with_scope(Some(Scope::Service("api".into())));
        let exported = store
            .export("shop", "dev", filter.scope.as_ref())
            .await
            .unwrap();
        assert_eq!(exported.get("PORT").map(String::as_str), Some("3000"));
        assert_eq!(store.list(&VariableFilter::new("shop", "dev")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn set_many_preserves_metadata_when_asked() {
        let mut existing = var("TOKEN", "a", Scope::Shared);
        existing.tags = vec!["team:core".into()];
        existing.metadata.insert("owner".into(), "ops".into());
        let store = MemoryStore::with_variables([existing]);

        let outcome = store
            .set_many(vec![var("TOKEN", "b", Scope::Shared)], SetManyOptions::default())
            .await;
        assert!(outcome.is_clean());
        let stored = store
            .get("TOKEN", "shop", "dev", &Scope::Shared)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.value, "b");
        assert_eq!(stored.tags, vec!["team:core"]);
        assert_eq!(stored.metadata.get("owner").map(String::as_str), Some("ops"));

        let overwrite = SetManyOptions {
            preserve_metadata: false,
            ..SetManyOptions::default()
        };
        store
            .set_many(vec![var("TOKEN", "c", Scope::Shared)], overwrite)
            .await;
        let stored = store
            .get("TOKEN", "shop", "dev", &Scope::Shared)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.tags.is_empty());
    }

    #[tokio::test]
    async fn disconnected_store_refuses_calls() {
        let store = MemoryStore::new();
        let err = store
            .get("X", "shop", "dev", &Scope::Shared)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotConnected));
    }
}
