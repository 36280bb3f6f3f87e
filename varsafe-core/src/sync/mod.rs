pub mod merge;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::BatchOptions;
use crate::config::VarsafeConfig;
use crate::error::Result as ConfigResult;
use crate::governance::{GovernanceEngine, ESCAPE_HATCH_HINT};
use crate::local::{LocalError, LocalStateDir, ProvenanceEntry};
use crate::pattern::KeyPattern;
use crate::scope::Scope;
use crate::store::{SetManyOptions, StoreError, VariableFilter, VariableStore};
use crate::variable::{looks_sensitive, validate_key, Provenance, ProvenanceSource, Variable};

pub use merge::{plan_merge, ConflictResolution, MergeConflict, MergePlan};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    Local,
    Remote,
    #[default]
    Error,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Local => "local",
            ConflictStrategy::Remote => "remote",
            ConflictStrategy::Error => "error",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ConflictStrategy::Local),
            "remote" => Ok(ConflictStrategy::Remote),
            "error" => Ok(ConflictStrategy::Error),
            other => Err(format!("unknown conflict strategy: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid sync request: {0}")]
    Validation(String),
    #[error("write blocked: {reason} ({hint})")]
    Blocked { reason: String, hint: String },
    #[error("merge refused: {} conflicting key(s): {}; choose strategy local or remote", .keys.len(), .keys.join(", "))]
    Conflict { keys: Vec<String> },
    #[error("merge refused: required variable(s) still missing: {}", .keys.join(", "))]
    MissingRequired { keys: Vec<String> },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("local state error: {0}")]
    Local(#[from] LocalError),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub project: String,
    pub environment: String,
    pub scope: Scope,
    pub dry_run: bool,
    pub prune: bool,
    pub strategy: Option<ConflictStrategy>,
}

impl SyncRequest {
    pub fn new(project: impl Into<String>, environment: impl Into<String>, scope: Scope) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            scope,
            dry_run: false,
            prune: false,
            strategy: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn strategy(mut self, strategy: Option<ConflictStrategy>) -> Self {
        self.strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PushReport {
    pub dry_run: bool,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub deleted: Vec<String>,
    pub failures: Vec<SyncFailure>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PullReport {
    pub dry_run: bool,
    pub path: PathBuf,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeReport {
    pub dry_run: bool,
    pub strategy: ConflictStrategy,
    pub pushed: Vec<String>,
    pub pulled: Vec<String>,
    pub unchanged: usize,
    pub conflicts: Vec<MergeConflict>,
    pub ignored: Vec<String>,
    pub failures: Vec<SyncFailure>,
    pub warnings: Vec<String>,
}

pub struct SyncEngine {
    store: Arc<dyn VariableStore>,
    governance: GovernanceEngine,
    local: LocalStateDir,
    default_strategy: ConflictStrategy,
    ignore: Vec<KeyPattern>,
    required: BTreeMap<String, Vec<String>>,
    batch: BatchOptions,
    actor: Option<String>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn VariableStore>,
        governance: GovernanceEngine,
        local: LocalStateDir,
        config: &VarsafeConfig,
    ) -> ConfigResult<Self> {
        let required = config
            .sync
            .required
            .keys()
            .map(|env| (env.clone(), config.sync_required_keys(env)))
            .collect();
        Ok(Self {
            store,
            governance,
            local,
            default_strategy: config.sync.strategy,
            ignore: config.sync_ignore_patterns()?,
            required,
            batch: BatchOptions {
                concurrency: config.store.concurrency,
                continue_on_error: true,
            },
            actor: None,
        })
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub async fn push(&self, request: &SyncRequest) -> SyncResult<PushReport> {
        validate_request(request)?;
        let local = self
            .local
            .read_env_file(&request.environment, &request.scope)?
            .ok_or_else(|| {
                SyncError::Validation(format!(
                    "no local file at {}",
                    self.local
                        .env_file_path(&request.environment, &request.scope)
                        .display()
                ))
            })?;
        let remote = self.remote_variables(request).await?;

        let mut report = PushReport {
            dry_run: request.dry_run,
            ..PushReport::default()
        };
        for (key, value) in &local {
            match remote.get(key) {
                None => report.added.push(key.clone()),
                Some(current) if &current.value != value => report.updated.push(key.clone()),
                Some(_) => report.unchanged += 1,
            }
        }
        let candidates = self.candidates(request, &local, &remote)?;
        self.guard(&candidates, &request.environment)?;

        let stale: Vec<String> = remote
            .keys()
            .filter(|key| !local.contains_key(*key))
            .cloned()
            .collect();
        if request.dry_run {
            if request.prune {
                report.deleted = stale;
            }
            return Ok(report);
        }

        report.failures = self.write(candidates).await;
        if request.prune && !stale.is_empty() {
            let outcome = self
                .store
                .delete_many_by_keys(
                    &stale,
                    &request.project,
                    &request.environment,
                    &request.scope,
                    self.batch,
                )
                .await;
            let mut unconfirmed = Vec::new();
            for success in outcome.succeeded {
                if success.value {
                    report.deleted.push(success.item);
                } else {
                    unconfirmed.push(success.item);
                }
            }
            report.failures.extend(outcome.failed.into_iter().map(|failure| SyncFailure {
                key: failure.item,
                error: failure.error.to_string(),
            }));
            if !unconfirmed.is_empty() {
                report.warnings.push(format!(
                    "stale key(s) not confirmed deleted: {}",
                    unconfirmed.join(", ")
                ));
            }
        }

        let written: Vec<String> = local
            .keys()
            .filter(|key| !report.failures.iter().any(|failure| &failure.key == *key))
            .cloned()
            .collect();
        self.record(request, "push", written, &mut report.warnings);
        info!(
            environment = %request.environment,
            scope = %request.scope,
            added = report.added.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            failed = report.failures.len(),
            "push completed"
        );
        Ok(report)
    }

    pub async fn pull(&self, request: &SyncRequest) -> SyncResult<PullReport> {
        validate_request(request)?;
        let incoming = self
            .store
            .export(&request.project, &request.environment, Some(&request.scope))
            .await?;
        let existing = self
            .local
            .read_env_file(&request.environment, &request.scope)?
            .unwrap_or_default();

        let mut report = PullReport {
            dry_run: request.dry_run,
            path: self
                .local
                .env_file_path(&request.environment, &request.scope),
            ..PullReport::default()
        };
        for (key, value) in &incoming {
            match existing.get(key) {
                None => report.added.push(key.clone()),
                Some(current) if current != value => report.updated.push(key.clone()),
                Some(_) => report.unchanged += 1,
            }
        }
        report.deleted = existing
            .keys()
            .filter(|key| !incoming.contains_key(*key))
            .cloned()
            .collect();
        if request.dry_run {
            return Ok(report);
        }

        self.local
            .write_env_file(&request.environment, &request.scope, &incoming)?;
        self.record(
            request,
            "pull",
            incoming.keys().cloned().collect(),
            &mut report.warnings,
        );
        info!(
            environment = %request.environment,
            scope = %request.scope,
            count = incoming.len(),
            "pull completed"
        );
        Ok(report)
    }

    /// Every refusal (conflicts, missing required keys, governance) happens before any write.
    pub async fn merge(&self, request: &SyncRequest) -> SyncResult<MergeReport> {
        validate_request(request)?;
        let strategy = request.strategy.unwrap_or(self.default_strategy);
        let local = self
            .local
            .read_env_file(&request.environment, &request.scope)?
            .unwrap_or_default();
        let remote = self.remote_variables(request).await?;
        let remote_values: BTreeMap<String, String> = remote
            .iter()
            .map(|(key, variable)| (key.clone(), variable.value.clone()))
            .collect();

        let plan = plan_merge(&local, &remote_values, strategy, &self.ignore);
        let unresolved = plan.unresolved();
        if !unresolved.is_empty() {
            warn!(environment = %request.environment, conflicts = unresolved.len(), "merge refused on conflicts");
            return Err(SyncError::Conflict { keys: unresolved });
        }

        let merged_keys = plan.merged_keys(&local);
        let missing: Vec<String> = self
            .required
            .get(&request.environment)
            .map(|keys| {
                keys.iter()
                    .filter(|key| !merged_keys.contains(*key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !missing.is_empty() {
            warn!(environment = %request.environment, missing = ?missing, "merge refused on missing required keys");
            return Err(SyncError::MissingRequired { keys: missing });
        }

        let candidates = self.candidates(request, &plan.push, &remote)?;
        self.guard(&candidates, &request.environment)?;

        let mut report = MergeReport {
            dry_run: request.dry_run,
            strategy,
            pushed: plan.push.keys().cloned().collect(),
            pulled: plan.pull.keys().cloned().collect(),
            unchanged: plan.unchanged.len(),
            conflicts: plan.conflicts.clone(),
            ignored: plan.ignored.clone(),
            failures: Vec::new(),
            warnings: Vec::new(),
        };
        if request.dry_run {
            return Ok(report);
        }

        if !plan.pull.is_empty() {
            self.local.write_env_file(
                &request.environment,
                &request.scope,
                &plan.merged_local(&local),
            )?;
        }
        report.failures = self.write(candidates).await;
        let mut touched: Vec<String> = report
            .pushed
            .iter()
            .filter(|key| !report.failures.iter().any(|failure| &failure.key == *key))
            .cloned()
            .collect();
        touched.extend(report.pulled.iter().cloned());
        touched.sort();
        if !touched.is_empty() {
            self.record(request, "merge", touched, &mut report.warnings);
        }
        info!(
            environment = %request.environment,
            scope = %request.scope,
            strategy = %strategy,
            pushed = report.pushed.len(),
            pulled = report.pulled.len(),
            failed = report.failures.len(),
            "merge completed"
        );
        Ok(report)
    }

    async fn remote_variables(&self, request: &SyncRequest) -> SyncResult<BTreeMap<String, Variable>> {
        let filter = VariableFilter::new(&request.project, &request.environment)
            .with_scope(Some(request.scope.clone()));
        Ok(self
            .store
            .list(&filter)
            .await?
            .into_iter()
            .map(|variable| (variable.key.clone(), variable))
            .collect())
    }

    fn candidates(
        &self,
        request: &SyncRequest,
        values: &BTreeMap<String, String>,
        remote: &BTreeMap<String, Variable>,
    ) -> SyncResult<Vec<Variable>> {
        let invalid: Vec<String> = values
            .keys()
            .filter_map(|key| validate_key(key).err())
            .collect();
        if !invalid.is_empty() {
            return Err(SyncError::Validation(invalid.join("; ")));
        }
        Ok(values
            .iter()
            .map(|(key, value)| {
                let sensitive = looks_sensitive(key)
                    || remote.get(key).map(|current| current.sensitive).unwrap_or(false);
                Variable::new(key, value, &request.environment, request.scope.clone())
                    .with_project(&request.project)
                    .with_sensitive(sensitive)
                    .with_provenance(Provenance::now(ProvenanceSource::Sync, self.actor.clone()))
            })
            .collect())
    }

    fn guard(&self, candidates: &[Variable], environment: &str) -> SyncResult<()> {
        let verdict = self.governance.guard_writes(candidates, environment);
        for warning in &verdict.warnings {
            debug!(%warning, "write guard warning");
        }
        match verdict.block_reason() {
            Some(reason) => {
                warn!(%environment, %reason, "write guard blocked sync");
                Err(SyncError::Blocked {
                    reason,
                    hint: ESCAPE_HATCH_HINT.to_string(),
                })
            }
            None => Ok(()),
        }
    }

    async fn write(&self, candidates: Vec<Variable>) -> Vec<SyncFailure> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let options = SetManyOptions {
            preserve_metadata: true,
            batch: self.batch,
        };
        let outcome = self.store.set_many(candidates, options).await;
        outcome
            .failed
            .into_iter()
            .map(|failure| {
                warn!(key = %failure.item.key, error = %failure.error, "sync write failed");
                SyncFailure {
                    key: failure.item.key,
                    error: failure.error.to_string(),
                }
            })
            .collect()
    }

    fn record(
        &self,
        request: &SyncRequest,
        operation: &str,
        keys: Vec<String>,
        warnings: &mut Vec<String>,
    ) {
        let entry = ProvenanceEntry::new(
            operation,
            ProvenanceSource::Sync,
            &request.project,
            &request.environment,
            request.scope.clone(),
            keys,
        )
        .with_actor(self.actor.clone());
        if let Err(err) = self.local.append_provenance(&entry) {
            warn!(error = %err, "failed to record provenance");
            warnings.push(format!("provenance not recorded: {err}"));
        }
    }
}

fn validate_request(request: &SyncRequest) -> SyncResult<()> {
    if request.environment.trim().is_empty() {
        return Err(SyncError::Validation("environment must not be empty".into()));
    }
    if request.project.trim().is_empty() {
        return Err(SyncError::Validation("project must not be empty".into()));
    }
    Ok(())
}
