use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::governance::{GovernanceEngine, GovernanceResult};
use crate::local::LocalStateDir;
use crate::scope::Scope;
use crate::store::{VariableFilter, VariableStore};

use super::diff::diff_variables;
use super::models::{ChangeAction, Plan, PlanStatus};
use super::scorecard::Scorecard;
use super::store::{ArtifactPaths, PlanArtifactStore};
use super::{PlanError, PlanResult};

#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    pub project: String,
    pub environment: String,
    pub scope: Option<Scope>,
    pub prune: bool,
}

impl PlanRequest {
    pub fn new(project: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            environment: environment.into(),
            scope: None,
            prune: false,
        }
    }

    pub fn with_scope(mut self, scope: Option<Scope>) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    fn from_plan(plan: &Plan) -> Self {
        Self {
            project: plan.project.clone(),
            environment: plan.environment.clone(),
            scope: plan.scope.clone(),
            prune: plan.prune,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub governance: GovernanceResult,
    pub artifacts: Option<ArtifactPaths>,
}

/// `project-environment-YYYYMMDDTHHMMSSZ` with anything outside
/// `[A-Za-z0-9._-]` replaced by `-`. Sorts by time within one project/environment.
pub fn plan_id(project: &str, environment: &str, at: DateTime<Utc>) -> String {
    sanitize(&format!(
        "{project}-{environment}-{}",
        at.format("%Y%m%dT%H%M%SZ")
    ))
}

pub(crate) fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '-'
            }
        })
        .collect()
}

pub struct Planner {
    store: Arc<dyn VariableStore>,
    governance: GovernanceEngine,
    local: LocalStateDir,
    artifacts: Option<PlanArtifactStore>,
}

impl Planner {
    pub fn new(
        store: Arc<dyn VariableStore>,
        governance: GovernanceEngine,
        local: LocalStateDir,
    ) -> Self {
        Self {
            store,
            governance,
            local,
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: PlanArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub async fn compute(
        &self,
        request: &PlanRequest,
        now: DateTime<Utc>,
    ) -> PlanResult<(Plan, GovernanceResult)> {
        let local = self.local.read_variables(
            &request.project,
            &request.environment,
            request.scope.as_ref(),
        )?;
        let filter = VariableFilter::new(&request.project, &request.environment)
            .with_scope(request.scope.clone());
        let remote = self.store.list(&filter).await?;
        debug!(
            local = local.len(),
            remote = remote.len(),
            environment = %request.environment,
            "computing plan"
        );

        let diff = diff_variables(&local, &remote, request.prune);
        let governance = self
            .governance
            .clone()
            .with_discovered_services(self.local.known_services()?)
            .evaluate(&local, &request.environment, now);
        let status = if governance.blocked {
            PlanStatus::Blocked
        } else {
            PlanStatus::Planned
        };

        let plan = Plan {
            id: plan_id(&request.project, &request.environment, now),
            project: request.project.clone(),
            environment: request.environment.clone(),
            scope: request.scope.clone(),
            prune: request.prune,
            status,
            generated_at: now,
            applied_at: None,
            scorecard: Scorecard::summarize(&governance, &diff.summary),
            changes: diff.changes,
            summary: diff.summary,
        };
        Ok((plan, governance))
    }

    pub async fn plan(&self, request: &PlanRequest, now: DateTime<Utc>) -> PlanResult<PlanOutcome> {
        let (plan, governance) = self.compute(request, now).await?;
        let artifacts = match &self.artifacts {
            Some(store) => Some(store.save(&plan)?),
            None => None,
        };
        if plan.status == PlanStatus::Blocked {
            warn!(
                plan_id = %plan.id,
                reason = %governance.block_reason().unwrap_or_default(),
                "plan blocked by governance"
            );
        } else {
            info!(
                plan_id = %plan.id,
                add = plan.summary.to_add,
                update = plan.summary.to_update,
                delete = plan.summary.to_delete,
                drift = plan.summary.conflicts,
                "plan computed"
            );
        }
        Ok(PlanOutcome {
            plan,
            governance,
            artifacts,
        })
    }

    /// Re-derives a reviewed (masked) plan against current state so it can be applied.
    ///
    /// Refuses when local state was written after the plan was generated, or when
    /// the recomputed `(key, scope, action)` set differs from the reviewed one.
    pub async fn prepare_reviewed(&self, reviewed: &Plan, now: DateTime<Utc>) -> PlanResult<Plan> {
        if reviewed.status == PlanStatus::Applied {
            return Err(PlanError::InvalidStatus {
                plan_id: reviewed.id.clone(),
                status: reviewed.status.to_string(),
            });
        }
        if let Some(store) = &self.artifacts {
            if store.is_stale(reviewed, &self.local)? {
                return Err(PlanError::Stale {
                    plan_id: reviewed.id.clone(),
                });
            }
        }

        let (mut current, _) = self.compute(&PlanRequest::from_plan(reviewed), now).await?;
        let expected = reviewed.change_set();
        let actual = current.change_set();
        if expected != actual {
            return Err(PlanError::Diverged {
                plan_id: reviewed.id.clone(),
                detail: describe_divergence(&expected, &actual),
            });
        }
        current.id = reviewed.id.clone();
        current.generated_at = reviewed.generated_at;
        Ok(current)
    }
}

fn describe_divergence(
    expected: &[(crate::scope::VarIdentity, ChangeAction)],
    actual: &[(crate::scope::VarIdentity, ChangeAction)],
) -> String {
    let missing: Vec<String> = expected
        .iter()
        .filter(|entry| !actual.contains(entry))
        .map(|(id, action)| format!("-{action} {id}"))
        .collect();
    let extra: Vec<String> = actual
        .iter()
        .filter(|entry| !expected.contains(entry))
        .map(|(id, action)| format!("+{action} {id}"))
        .collect();
    missing.into_iter().chain(extra).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn plan_ids_are_sanitized_and_sortable() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(plan_id("shop", "dev", at), "shop-dev-20260301T090507Z");
        assert_eq!(plan_id("my shop", "dev/eu", at), "my-shop-dev-eu-20260301T090507Z");
        let later = Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap();
        assert!(plan_id("shop", "dev", at) < plan_id("shop", "dev", later));
    }
}
