use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::governance::is_production;
use crate::local::{LocalStateDir, ProvenanceEntry};
use crate::scope::Scope;
use crate::store::VariableStore;
use crate::variable::{Provenance, ProvenanceSource, Variable};

use super::models::{ChangeAction, Plan, PlanChange, PlanStatus};
use super::store::PlanArtifactStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyFailure {
    pub key: String,
    pub scope: Scope,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplyReport {
    pub plan_id: String,
    pub status: PlanStatus,
    pub applied: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<ApplyFailure>,
    /// Set when execution never started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refused: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ApplyReport {
    fn new(plan: &Plan, status: PlanStatus) -> Self {
        Self {
            plan_id: plan.id.clone(),
            status,
            applied: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            refused: None,
            warnings: Vec::new(),
        }
    }

    fn refuse(plan: &Plan, status: PlanStatus, reason: String) -> Self {
        let mut report = Self::new(plan, status);
        report.skipped = plan.changes.len();
        report.refused = Some(reason);
        report
    }
}

pub struct Applier {
    store: Arc<dyn VariableStore>,
    artifacts: Option<PlanArtifactStore>,
    local: Option<LocalStateDir>,
    actor: Option<String>,
}

impl Applier {
    pub fn new(store: Arc<dyn VariableStore>) -> Self {
        Self {
            store,
            artifacts: None,
            local: None,
            actor: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: PlanArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_local(mut self, local: LocalStateDir) -> Self {
        self.local = Some(local);
        self
    }

    pub fn with_actor(mut self, actor: Option<String>) -> Self {
        self.actor = actor;
        self
    }

    pub async fn apply(&self, plan: &mut Plan, options: ApplyOptions) -> ApplyReport {
        if plan.status == PlanStatus::Blocked {
            warn!(plan_id = %plan.id, "refusing blocked plan");
            return ApplyReport::refuse(
                plan,
                PlanStatus::Blocked,
                "plan is blocked by governance; fix the reported issues and plan again".into(),
            );
        }
        if is_production(&plan.environment) && !options.force && !plan.is_empty() {
            warn!(plan_id = %plan.id, environment = %plan.environment, "production apply without force");
            return ApplyReport::refuse(
                plan,
                PlanStatus::Failed,
                format!(
                    "{} is a production environment; re-run with --force to apply",
                    plan.environment
                ),
            );
        }

        if plan.is_empty() {
            plan.status = PlanStatus::Applied;
            plan.applied_at = Some(Utc::now());
            let mut report = ApplyReport::new(plan, PlanStatus::Applied);
            self.persist(plan, &mut report);
            return report;
        }

        if options.dry_run {
            let mut report = ApplyReport::new(plan, PlanStatus::Planned);
            report.skipped = plan.changes.len();
            return report;
        }

        let mut report = ApplyReport::new(plan, PlanStatus::Applied);
        let mut written: BTreeMap<Scope, Vec<String>> = BTreeMap::new();
        for change in &plan.changes {
            match self.apply_change(plan, change).await {
                Ok(()) => {
                    report.applied += 1;
                    written
                        .entry(change.scope.clone())
                        .or_default()
                        .push(change.key.clone());
                    debug!(key = %change.key, scope = %change.scope, action = %change.action, "change applied");
                }
                Err(error) => {
                    warn!(key = %change.key, scope = %change.scope, %error, "change failed");
                    report.failed += 1;
                    report.failures.push(ApplyFailure {
                        key: change.key.clone(),
                        scope: change.scope.clone(),
                        error,
                    });
                }
            }
        }

        report.status = if report.failed == 0 {
            PlanStatus::Applied
        } else {
            PlanStatus::Failed
        };
        plan.status = report.status;
        plan.applied_at = Some(Utc::now());
        info!(
            plan_id = %plan.id,
            applied = report.applied,
            failed = report.failed,
            status = %report.status,
            "plan executed"
        );

        self.record_provenance(plan, written, &mut report);
        self.persist(plan, &mut report);
        report
    }

    async fn apply_change(&self, plan: &Plan, change: &PlanChange) -> Result<(), String> {
        match change.action {
            ChangeAction::Add | ChangeAction::Update => {
                let value = change
                    .local_value
                    .clone()
                    .ok_or_else(|| format!("{} change has no local value", change.action))?;
                let variable = Variable::new(&change.key, value, &plan.environment, change.scope.clone())
                    .with_project(&plan.project)
                    .with_sensitive(change.sensitive)
                    .with_provenance(Provenance::now(ProvenanceSource::Sync, self.actor.clone()));
                let variable = self
                    .store
                    .merge_existing(variable)
                    .await
                    .map_err(|err| err.to_string())?;
                self.store
                    .set(&variable)
                    .await
                    .map(|_| ())
                    .map_err(|err| err.to_string())
            }
            ChangeAction::Delete => {
                let removed = self
                    .store
                    .delete(&change.key, &plan.project, &plan.environment, &change.scope)
                    .await
                    .map_err(|err| err.to_string())?;
                if !removed {
                    debug!(key = %change.key, scope = %change.scope, "already absent");
                }
                Ok(())
            }
        }
    }

    fn record_provenance(
        &self,
        plan: &Plan,
        written: BTreeMap<Scope, Vec<String>>,
        report: &mut ApplyReport,
    ) {
        let Some(local) = &self.local else {
            return;
        };
        for (scope, keys) in written {
            let entry = ProvenanceEntry::new(
                "apply",
                ProvenanceSource::Sync,
                &plan.project,
                &plan.environment,
                scope,
                keys,
            )
            .with_actor(self.actor.clone());
            if let Err(err) = local.append_provenance(&entry) {
                warn!(plan_id = %plan.id, error = %err, "failed to record provenance");
                report.warnings.push(format!("provenance not recorded: {err}"));
            }
        }
    }

    fn persist(&self, plan: &Plan, report: &mut ApplyReport) {
        let Some(artifacts) = &self.artifacts else {
            return;
        };
        if let Err(err) = artifacts.update(plan) {
            warn!(plan_id = %plan.id, error = %err, "failed to update plan artifact");
            report.warnings.push(format!("plan artifact not updated: {err}"));
        }
    }
}
