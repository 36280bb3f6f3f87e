use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::governance::{GovernanceEngine, ESCAPE_HATCH_HINT};
use crate::local::{LocalStateDir, ProvenanceEntry};
use crate::scope::{Scope, VarIdentity};
use crate::store::{StoreError, VariableStore};
use crate::variable::{validate_key, Provenance, ProvenanceSource, Variable};

pub const META_OPERATION: &str = "varsafe.operation";
pub const META_OPERATION_ID: &str = "varsafe.operation_id";
pub const META_ORIGIN: &str = "varsafe.origin";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Move,
    Rename,
    Promote,
    Demote,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Move => "move",
            MutationKind::Rename => "rename",
            MutationKind::Promote => "promote",
            MutationKind::Demote => "demote",
        }
    }

    fn provenance_source(&self) -> ProvenanceSource {
        match self {
            MutationKind::Move => ProvenanceSource::Move,
            MutationKind::Rename => ProvenanceSource::Rename,
            MutationKind::Promote => ProvenanceSource::Promote,
            MutationKind::Demote => ProvenanceSource::Demote,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
    /// Failed before anything was written.
    CleanFailure,
    /// Source and destination are back to their pre-operation state.
    RolledBack,
    /// Restoration was attempted; these steps failed.
    RollbackFailed { errors: Vec<String> },
}

impl fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackOutcome::CleanFailure => f.write_str("nothing was changed"),
            RollbackOutcome::RolledBack => f.write_str("rolled back to the previous state"),
            RollbackOutcome::RollbackFailed { errors } => {
                write!(f, "ROLLBACK FAILED, manual repair needed: {}", errors.join("; "))
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("{0} does not exist")]
    NotFound(VarIdentity),
    #[error("{0} already exists; pass overwrite to replace it")]
    Exists(VarIdentity),
    #[error("blocked: {reason} ({hint})")]
    Blocked { reason: String, hint: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("operation failed: {cause}; {rollback}")]
    Aborted {
        cause: String,
        rollback: RollbackOutcome,
    },
}

pub type MutationResult<T> = Result<T, MutationError>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MutationOptions {
    pub overwrite: bool,
    pub dry_run: bool,
    pub keep_source: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutationReport {
    pub kind: MutationKind,
    pub operation_id: String,
    pub source: VarIdentity,
    pub destination: VarIdentity,
    pub dry_run: bool,
    pub overwritten: bool,
    pub source_deleted: bool,
    pub sensitivity_corrected: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
struct Snapshot {
    source: Variable,
    destination: Option<Variable>,
}

/// Single-variable cross-scope operations with compensating rollback.
pub struct ScopeMutator {
    store: Arc<dyn VariableStore>,
    governance: GovernanceEngine,
    local: Option<LocalStateDir>,
    actor: Option<String>,
}

impl ScopeMutator {
    pub fn new(store: Arc<dyn VariableStore>, governance: GovernanceEngine) -> Self {
        Self {
            store,
            governance,
            local: None,
            actor: None,
        }
    }

    pub fn with_local(mut self, local: LocalStateDir) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub async fn move_variable(
        &self,
        project: &str,
        environment: &str,
        key: &str,
        from: Scope,
        to: Scope,
        options: MutationOptions,
    ) -> MutationResult<MutationReport> {
        let options = MutationOptions {
            keep_source: false,
            ..options
        };
        self.execute(
            MutationKind::Move,
            project,
            environment,
            VarIdentity::new(key, from),
            VarIdentity::new(key, to),
            options,
        )
        .await
    }

    pub async fn rename(
        &self,
        project: &str,
        environment: &str,
        scope: Scope,
        key: &str,
        new_key: &str,
        options: MutationOptions,
    ) -> MutationResult<MutationReport> {
        let options = MutationOptions {
            keep_source: false,
            ..options
        };
        self.execute(
            MutationKind::Rename,
            project,
            environment,
            VarIdentity::new(key, scope.clone()),
            VarIdentity::new(new_key, scope),
            options,
        )
        .await
    }

    pub async fn promote(
        &self,
        project: &str,
        environment: &str,
        key: &str,
        service: &str,
        options: MutationOptions,
    ) -> MutationResult<MutationReport> {
        let from = service_scope(service)?;
        self.execute(
            MutationKind::Promote,
            project,
            environment,
            VarIdentity::new(key, from),
            VarIdentity::new(key, Scope::Shared),
            options,
        )
        .await
    }

    pub async fn demote(
        &self,
        project: &str,
        environment: &str,
        key: &str,
        service: &str,
        options: MutationOptions,
    ) -> MutationResult<MutationReport> {
        let to = service_scope(service)?;
        self.execute(
            MutationKind::Demote,
            project,
            environment,
            VarIdentity::new(key, Scope::Shared),
            VarIdentity::new(key, to),
            options,
        )
        .await
    }

    async fn execute(
        &self,
        kind: MutationKind,
        project: &str,
        environment: &str,
        source: VarIdentity,
        destination: VarIdentity,
        options: MutationOptions,
    ) -> MutationResult<MutationReport> {
        if source == destination {
            return Err(MutationError::Validation(format!(
                "source and destination are both {source}"
            )));
        }
        validate_key(&source.key).map_err(MutationError::Validation)?;
        validate_key(&destination.key).map_err(MutationError::Validation)?;
        if environment.trim().is_empty() {
            return Err(MutationError::Validation("environment must not be empty".into()));
        }

        let snapshot = Snapshot {
            source: self
                .store
                .get(&source.key, project, environment, &source.scope)
                .await?
                .ok_or_else(|| MutationError::NotFound(source.clone()))?,
            destination: self
                .store
                .get(&destination.key, project, environment, &destination.scope)
                .await?,
        };

        let operation_id = Uuid::new_v4().to_string();
        let mut candidate = snapshot.source.clone();
        candidate.key = destination.key.clone();
        candidate.scope = destination.scope.clone();
        candidate.provenance = Some(Provenance::now(kind.provenance_source(), self.actor.clone()));
        candidate
            .metadata
            .insert(META_OPERATION.to_string(), kind.as_str().to_string());
        candidate
            .metadata
            .insert(META_ORIGIN.to_string(), source.to_string());
        candidate
            .metadata
            .insert(META_OPERATION_ID.to_string(), operation_id.clone());

        let validation = self.governance.validate_variable(&candidate, environment);
        if validation.blocked {
            let reason = validation.block_reason.unwrap_or_default();
            warn!(%kind, destination = %destination, %reason, "mutation blocked by governance");
            return Err(MutationError::Blocked {
                reason,
                hint: ESCAPE_HATCH_HINT.to_string(),
            });
        }
        let candidate = validation.variable;

        if snapshot.destination.is_some() && !options.overwrite {
            return Err(MutationError::Exists(destination));
        }

        let delete_source = match kind {
            MutationKind::Move | MutationKind::Rename => true,
            MutationKind::Promote | MutationKind::Demote => !options.keep_source,
        };
        let mut report = MutationReport {
            kind,
            operation_id,
            source: source.clone(),
            destination: destination.clone(),
            dry_run: options.dry_run,
            overwritten: snapshot.destination.is_some(),
            source_deleted: false,
            sensitivity_corrected: validation.sensitivity_corrected,
            warnings: validation.result.warnings.clone(),
        };
        if options.dry_run {
            return Ok(report);
        }

        if let Err(err) = self.store.set(&candidate).await {
            warn!(%kind, operation_id = %report.operation_id, error = %err, "destination write failed");
            return Err(MutationError::Aborted {
                cause: format!("writing {destination}: {err}"),
                rollback: RollbackOutcome::CleanFailure,
            });
        }

        if delete_source {
            match self
                .store
                .delete(&source.key, project, environment, &source.scope)
                .await
            {
                Ok(true) => report.source_deleted = true,
                Ok(false) => report
                    .warnings
                    .push(format!("{source} was already gone when deleting it")),
                Err(err) => {
                    let cause = format!("deleting {source}: {err}");
                    let rollback = self.rollback(project, environment, &snapshot, &destination).await;
                    warn!(
                        %kind,
                        operation_id = %report.operation_id,
                        %cause,
                        %rollback,
                        "mutation aborted"
                    );
                    return Err(MutationError::Aborted { cause, rollback });
                }
            }
        }

        self.record(kind, project, environment, &source, &destination, &mut report);
        info!(
            %kind,
            operation_id = %report.operation_id,
            source = %source,
            destination = %destination,
            "mutation completed"
        );
        Ok(report)
    }

    /// Restores both identities to their snapshot. Never returns an error itself.
    async fn rollback(
        &self,
        project: &str,
        environment: &str,
        snapshot: &Snapshot,
        destination: &VarIdentity,
    ) -> RollbackOutcome {
        let mut errors = Vec::new();
        let restored_destination = match &snapshot.destination {
            Some(previous) => self.store.set(previous).await.map(|_| ()),
            None => self
                .store
                .delete(&destination.key, project, environment, &destination.scope)
                .await
                .map(|_| ()),
        };
        if let Err(err) = restored_destination {
            errors.push(format!("restoring {destination}: {err}"));
        }
        if let Err(err) = self.store.set(&snapshot.source).await {
            errors.push(format!("restoring {}: {err}", snapshot.source.identity()));
        }
        if errors.is_empty() {
            RollbackOutcome::RolledBack
        } else {
            RollbackOutcome::RollbackFailed { errors }
        }
    }

    fn record(
        &self,
        kind: MutationKind,
        project: &str,
        environment: &str,
        source: &VarIdentity,
        destination: &VarIdentity,
        report: &mut MutationReport,
    ) {
        let Some(local) = &self.local else {
            return;
        };
        let entry = ProvenanceEntry::new(
            kind.as_str(),
            kind.provenance_source(),
            project,
            environment,
            destination.scope.clone(),
            vec![destination.key.clone()],
        )
        .with_actor(self.actor.clone());
        if let Err(err) = local.append_provenance(&entry) {
            warn!(error = %err, source = %source, "failed to record provenance");
            report.warnings.push(format!("provenance not recorded: {err}"));
        }
    }
}

fn service_scope(service: &str) -> MutationResult<Scope> {
    Scope::service(service).map_err(|err| MutationError::Validation(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VarsafeConfig;
    use crate::store::MemoryStore;

    fn mutator(store: Arc<MemoryStore>) -> ScopeMutator {
        let engine = GovernanceEngine::new(&VarsafeConfig::default()).unwrap();
        ScopeMutator::new(store, engine)
    }

    fn seeded() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_variables([Variable::new(
            "STRIPE_KEY",
            "sk_live_123",
            "dev",
            Scope::Service("billing".into()),
        )
        .with_project("shop")
        .with_sensitive(false)]))
    }

    #[tokio::test]
    async fn promote_moves_and_annotates() {
        let store = seeded();
        let report = mutator(store.clone())
            .promote("shop", "dev", "STRIPE_KEY", "billing", MutationOptions::default())
            .await
            .unwrap();
        assert!(report.source_deleted);
        assert!(report.sensitivity_corrected);

        let shared = store
            .get("STRIPE_KEY", "shop", "dev", &Scope::Shared)
            .await
            .unwrap()
            .unwrap();
        assert!(shared.sensitive);
        assert_eq!(shared.metadata.get(META_OPERATION).map(String::as_str), Some("promote"));
        assert_eq!(
            shared.metadata.get(META_ORIGIN).map(String::as_str),
            Some("STRIPE_KEY@service:billing")
        );
        assert!(store
            .get("STRIPE_KEY", "shop", "dev", &Scope::Service("billing".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn keep_source_copies() {
        let store = seeded();
        let options = MutationOptions {
            keep_source: true,
            ..MutationOptions::default()
        };
        let report = mutator(store.clone())
            .promote("shop", "dev", "STRIPE_KEY", "billing", options)
            .await
            .unwrap();
        assert!(!report.source_deleted);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn existing_destination_needs_overwrite_and_dry_run_writes_nothing() {
        let store = seeded();
        let mutator = mutator(store.clone());
        mutator
            .demote("shop", "dev", "STRIPE_KEY", "billing", MutationOptions::default())
            .await
            .map(|_| ())
            .unwrap_err();

        store
            .set(&Variable::new("STRIPE_KEY", "other", "dev", Scope::Shared).with_project("shop"))
            .await
            .unwrap();
        let before = store.snapshot().await;
        let err = mutator
            .promote("shop", "dev", "STRIPE_KEY", "billing", MutationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Exists(_)));

        let rehearsal = MutationOptions {
            overwrite: true,
            dry_run: true,
            keep_source: false,
        };
        let report = mutator
            .promote("shop", "dev", "STRIPE_KEY", "billing", rehearsal)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert!(report.overwritten);
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn rename_validates_the_new_key() {
        let store = seeded();
        let err = mutator(store)
            .rename(
                "shop",
                "dev",
                Scope::Service("billing".into()),
                "STRIPE_KEY",
                "9BAD",
                MutationOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MutationError::Validation(_)));
    }
}
