use std::collections::BTreeMap;

use crate::scope::VarIdentity;
use crate::variable::Variable;

use super::models::{PlanChange, PlanSummary};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub changes: Vec<PlanChange>,
    pub summary: PlanSummary,
}

/// Matches local desired state against remote state by `(key, scope)`.
///
/// Changes come out ordered by identity: adds and updates first, then deletes.
/// Remote-only variables become deletes only under `prune`; otherwise they are
/// counted as drift in `summary.conflicts`.
pub fn diff_variables(local: &[Variable], remote: &[Variable], prune: bool) -> Diff {
    let local: BTreeMap<VarIdentity, &Variable> =
        local.iter().map(|var| (var.identity(), var)).collect();
    let mut remote: BTreeMap<VarIdentity, &Variable> =
        remote.iter().map(|var| (var.identity(), var)).collect();

    let mut diff = Diff::default();
    for (identity, wanted) in local {
        match remote.remove(&identity) {
            None => {
                diff.summary.to_add += 1;
                diff.changes.push(PlanChange::add(
                    identity.key,
                    identity.scope,
                    wanted.sensitive,
                    wanted.value.clone(),
                ));
            }
            Some(current) if current.value != wanted.value => {
                diff.summary.to_update += 1;
                diff.changes.push(PlanChange::update(
                    identity.key,
                    identity.scope,
                    wanted.sensitive || current.sensitive,
                    wanted.value.clone(),
                    current.value.clone(),
                ));
            }
            Some(_) => diff.summary.unchanged += 1,
        }
    }

    for (identity, current) in remote {
        if prune {
            diff.summary.to_delete += 1;
            diff.changes.push(PlanChange::delete(
                identity.key,
                identity.scope,
                current.sensitive,
                current.value.clone(),
            ));
        } else {
            diff.summary.conflicts += 1;
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::models::ChangeAction;
    use crate::scope::Scope;

    fn var(key: &str, value: &str, scope: Scope) -> Variable {
        Variable::new(key, value, "dev", scope)
    }

    #[test]
    fn update_add_and_drift() {
        let local = [
            var("API_KEY", "a1b2c3", Scope::Shared),
            var("PORT", "3000", Scope::Shared),
        ];
        let remote = [
            var("API_KEY", "old", Scope::Shared),
            var("DEBUG", "true", Scope::Shared),
        ];
        let diff = diff_variables(&local, &remote, false);
        let actions: Vec<_> = diff
            .changes
            .iter()
            .map(|change| (change.key.as_str(), change.action))
            .collect();
        assert_eq!(
            actions,
            vec![("API_KEY", ChangeAction::Update), ("PORT", ChangeAction::Add)]
        );
        assert_eq!(diff.summary.conflicts, 1);
        assert_eq!(diff.summary.to_delete, 0);
        assert_eq!(diff.changes[0].remote_value.as_deref(), Some("old"));
        assert!(diff.changes[1].remote_value.is_none());
    }

    #[test]
    fn prune_turns_drift_into_deletes() {
        let remote = [var("DEBUG", "true", Scope::Shared)];
        let diff = diff_variables(&[], &remote, true);
        assert_eq!(diff.summary.to_delete, 1);
        assert_eq!(diff.summary.conflicts, 0);
        let change = &diff.changes[0];
        assert_eq!(change.action, ChangeAction::Delete);
        assert!(change.local_value.is_none());
        assert_eq!(change.remote_value.as_deref(), Some("true"));
    }

    #[test]
    fn same_key_in_different_scopes_never_collides() {
        let local = [
            var("PORT", "80", Scope::Shared),
            var("PORT", "3000", Scope::Service("api".into())),
        ];
        let remote = [var("PORT", "80", Scope::Service("api".into()))];
        let diff = diff_variables(&local, &remote, true);
        assert_eq!(diff.summary.to_add, 1);
        assert_eq!(diff.summary.to_update, 1);
        assert_eq!(diff.summary.to_delete, 0);
        assert_eq!(diff.changes[0].scope, Scope::Shared);
        assert_eq!(diff.changes[0].action, ChangeAction::Add);
    }

    #[test]
    fn equal_values_are_unchanged_and_emit_nothing() {
        let local = [var("A", "1", Scope::Shared), var("B", "", Scope::Shared)];
        let diff = diff_variables(&local, &local, false);
        assert!(diff.changes.is_empty());
        assert_eq!(diff.summary.unchanged, 2);
    }
}
