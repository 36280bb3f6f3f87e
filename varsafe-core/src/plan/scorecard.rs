use std::fmt;

use serde::{Deserialize, Serialize};

use crate::governance::GovernanceResult;

use super::models::PlanSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Warning => "warning",
            Health::Critical => "critical",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Scorecard {
    pub health: Health,
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Scorecard {
    pub fn summarize(governance: &GovernanceResult, summary: &PlanSummary) -> Self {
        let mut issues = Vec::new();
        if let Some(reason) = governance.block_reason() {
            issues.push(format!("blocked: {reason}"));
        }
        issues.extend(governance.warnings.iter().cloned());
        if summary.conflicts > 0 {
            issues.push(format!(
                "{} remote-only variable(s) drifted from local state",
                summary.conflicts
            ));
        }
        let health = if governance.blocked {
            Health::Critical
        } else if issues.is_empty() {
            Health::Healthy
        } else {
            Health::Warning
        };
        Self {
            health,
            issues,
            suggestions: governance.suggestions.clone(),
        }
    }
}
