use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::{Scope, VarIdentity};

use super::scorecard::Scorecard;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planned,
    Applied,
    Blocked,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planned => "planned",
            PlanStatus::Applied => "applied",
            PlanStatus::Blocked => "blocked",
            PlanStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, PlanStatus::Applied | PlanStatus::Failed)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(PlanStatus::Planned),
            "applied" => Ok(PlanStatus::Applied),
            "blocked" => Ok(PlanStatus::Blocked),
            "failed" => Ok(PlanStatus::Failed),
            other => Err(format!("unknown plan status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Update,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Add => "add",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            ChangeAction::Add => '+',
            ChangeAction::Update => '~',
            ChangeAction::Delete => '-',
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `add` carries only `local_value`, `delete` only `remote_value`, `update` both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanChange {
    pub key: String,
    pub scope: Scope,
    pub action: ChangeAction,
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_value: Option<String>,
}

impl PlanChange {
    pub fn add(key: impl Into<String>, scope: Scope, sensitive: bool, local: String) -> Self {
        Self {
            key: key.into(),
            scope,
            action: ChangeAction::Add,
            sensitive,
            local_value: Some(local),
            remote_value: None,
        }
    }

    pub fn update(
        key: impl Into<String>,
        scope: Scope,
        sensitive: bool,
        local: String,
        remote: String,
    ) -> Self {
        Self {
            key: key.into(),
            scope,
            action: ChangeAction::Update,
            sensitive,
            local_value: Some(local),
            remote_value: Some(remote),
        }
    }

    pub fn delete(key: impl Into<String>, scope: Scope, sensitive: bool, remote: String) -> Self {
        Self {
            key: key.into(),
            scope,
            action: ChangeAction::Delete,
            sensitive,
            local_value: None,
            remote_value: Some(remote),
        }
    }

    pub fn identity(&self) -> VarIdentity {
        VarIdentity::new(self.key.clone(), self.scope.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    pub to_add: usize,
    pub to_update: usize,
    pub to_delete: usize,
    pub unchanged: usize,
    pub conflicts: usize,
}

impl PlanSummary {
    pub fn total_changes(&self) -> usize {
        self.to_add + self.to_update + self.to_delete
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub project: String,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub prune: bool,
    pub status: PlanStatus,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
    pub changes: Vec<PlanChange>,
    pub summary: PlanSummary,
    pub scorecard: Scorecard,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn change_set(&self) -> Vec<(VarIdentity, ChangeAction)> {
        let mut set: Vec<_> = self
            .changes
            .iter()
            .map(|change| (change.identity(), change.action))
            .collect();
        set.sort();
        set
    }
}
