pub mod guardrails;
pub mod orphans;
pub mod policy;
pub mod required;
pub mod rotation;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EnforcementMode, GuardOverrides, PolicyRule, VarsafeConfig};
use crate::error::Result;
use crate::pattern::KeyPattern;
use crate::scope::VarIdentity;
use crate::variable::{looks_sensitive, Variable};

pub use guardrails::{check_value_guardrails, GuardrailCode, GuardrailIssue, GuardrailReport};
pub use orphans::{detect_orphans, OrphanReport, OrphanedService};
pub use policy::{check_scope_policy, PolicyIssue, PolicyReport};
pub use required::{check_required, RequiredReport};
pub use rotation::{check_rotation, OverdueVariable, RotationReport};

pub const ESCAPE_HATCH_HINT: &str =
    "relax with --policy-mode warn / --guardrails warn (or VARSAFE_POLICY_MODE / VARSAFE_GUARDRAILS_MODE)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// `prd`, `prod` and `production`, case-insensitive.
pub fn is_production(environment: &str) -> bool {
    matches!(
        environment.trim().to_ascii_lowercase().as_str(),
        "prd" | "prod" | "production"
    )
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GovernanceResult {
    pub policy: PolicyReport,
    pub required: RequiredReport,
    pub rotation: RotationReport,
    pub guardrails: GuardrailReport,
    pub orphans: OrphanReport,
    pub sensitivity: Vec<VarIdentity>,
    pub blocked: bool,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl GovernanceResult {
    fn finish(mut self) -> Self {
        self.blocked = self.policy.has_violations() || self.guardrails.blocked;
        self.warnings = self.collect_warnings();
        self.suggestions = self.collect_suggestions();
        self
    }

    fn collect_warnings(&self) -> Vec<String> {
        let mut warnings: Vec<String> = self
            .policy
            .warnings
            .iter()
            .map(|issue| issue.message.clone())
            .collect();
        warnings.extend(
            self.guardrails
                .warnings()
                .map(|issue| format!("{}: {}", issue.code, issue.message)),
        );
        warnings.extend(
            self.required
                .missing
                .iter()
                .map(|key| format!("missing required variable {key}")),
        );
        warnings.extend(self.rotation.overdue.iter().map(|entry| {
            format!(
                "{}@{} last written {} days ago (max {})",
                entry.key, entry.scope, entry.age_days, self.rotation.max_age_days
            )
        }));
        warnings.extend(self.orphans.services.iter().map(|service| {
            format!(
                "service {} is not a known service ({} variables)",
                service.name,
                service.keys.len()
            )
        }));
        warnings.extend(
            self.sensitivity
                .iter()
                .map(|id| format!("{id} looks secret but is not marked sensitive")),
        );
        warnings
    }

    fn collect_suggestions(&self) -> Vec<String> {
        let mut suggestions = Vec::new();
        let misplaced = self.policy.issues().count();
        if misplaced > 0 {
            suggestions.push(format!(
                "{misplaced} variable(s) are outside the scope required by policy; use move/promote/demote"
            ));
        }
        let errors = self.guardrails.errors().count();
        if errors > 0 {
            suggestions.push(format!(
                "{errors} value(s) fail guardrails; replace empty or placeholder values before writing"
            ));
        }
        let fixes: Vec<&str> = self
            .guardrails
            .issues
            .iter()
            .filter_map(|issue| issue.suggestion.as_deref())
            .collect();
        if !fixes.is_empty() {
            suggestions.push(format!("add a URL scheme, e.g. {}", fixes.join(", ")));
        }
        if !self.required.missing.is_empty() {
            suggestions.push(format!(
                "add {} missing required variable(s): {}",
                self.required.missing.len(),
                self.required.missing.join(", ")
            ));
        }
        if self.rotation.overdue_count > 0 {
            suggestions.push(format!(
                "{} variable(s) overdue for rotation; use the rotation workflow",
                self.rotation.overdue_count
            ));
        }
        if !self.orphans.services.is_empty() {
            let names: Vec<&str> = self
                .orphans
                .services
                .iter()
                .map(|service| service.name.as_str())
                .collect();
            suggestions.push(format!(
                "remove or re-scope variables for unknown services: {}",
                names.join(", ")
            ));
        }
        if !self.sensitivity.is_empty() {
            suggestions.push(format!(
                "mark {} secret-like variable(s) as sensitive",
                self.sensitivity.len()
            ));
        }
        if self.blocked {
            suggestions.push(ESCAPE_HATCH_HINT.to_string());
        }
        suggestions
    }

    /// Describes exactly the sub-checks that blocked, `None` when not blocked.
    pub fn block_reason(&self) -> Option<String> {
        if !self.blocked {
            return None;
        }
        let mut parts: Vec<String> = self
            .policy
            .violations
            .iter()
            .map(|issue| format!("scope policy: {}", issue.message))
            .collect();
        parts.extend(
            self.guardrails
                .errors()
                .map(|issue| format!("guardrail {}: {}", issue.code, issue.message)),
        );
        Some(parts.join("; "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteValidation {
    pub variable: Variable,
    pub sensitivity_corrected: bool,
    pub result: GovernanceResult,
    pub blocked: bool,
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GovernanceEngine {
    rules: Vec<PolicyRule>,
    policy_mode: EnforcementMode,
    policy_forced: Option<EnforcementMode>,
    guardrail_mode: EnforcementMode,
    rotation_patterns: Vec<KeyPattern>,
    max_age_days: i64,
    config: VarsafeConfig,
    known_services: Option<Vec<String>>,
}

impl GovernanceEngine {
    pub fn new(config: &VarsafeConfig) -> Result<Self> {
        Ok(Self {
            rules: config.policy_rules()?,
            policy_mode: config.policy.mode,
            policy_forced: None,
            guardrail_mode: config.guardrails.mode,
            rotation_patterns: config.rotation_patterns()?,
            max_age_days: config.rotation.max_age_days,
            known_services: config.known_services.clone(),
            config: config.clone(),
        })
    }

    pub fn with_overrides(mut self, overrides: GuardOverrides) -> Self {
        self.policy_forced = overrides.policy_mode;
        self.policy_mode = self.config.policy_mode(&overrides);
        self.guardrail_mode = self.config.guardrail_mode(&overrides);
        self
    }

    /// Used when config lists no services; an explicit config list wins.
    pub fn with_discovered_services(mut self, services: Vec<String>) -> Self {
        if self.known_services.is_none() && !services.is_empty() {
            self.known_services = Some(services);
        }
        self
    }

    pub fn guardrail_mode(&self) -> EnforcementMode {
        self.guardrail_mode
    }

    /// Runs every check; none short-circuits another.
    pub fn evaluate(
        &self,
        variables: &[Variable],
        environment: &str,
        now: DateTime<Utc>,
    ) -> GovernanceResult {
        let required = self.config.required_keys(environment);
        GovernanceResult {
            policy: self.scope_policy(variables),
            required: check_required(variables, &required),
            rotation: check_rotation(variables, &self.rotation_patterns, self.max_age_days, now),
            guardrails: check_value_guardrails(variables, environment, self.guardrail_mode),
            orphans: detect_orphans(variables, self.known_services.as_deref()),
            sensitivity: sensitivity_hints(variables),
            ..GovernanceResult::default()
        }
        .finish()
    }

    pub fn guard_writes(&self, variables: &[Variable], environment: &str) -> GovernanceResult {
        GovernanceResult {
            policy: self.scope_policy(variables),
            guardrails: check_value_guardrails(variables, environment, self.guardrail_mode),
            ..GovernanceResult::default()
        }
        .finish()
    }

    /// Single-variable pre-write validation. Secret-like keys are forced to
    /// `sensitive = true` before the checks run.
    pub fn validate_variable(&self, variable: &Variable, environment: &str) -> WriteValidation {
        let mut candidate = variable.clone();
        let sensitivity_corrected = !candidate.sensitive && looks_sensitive(&candidate.key);
        if sensitivity_corrected {
            candidate.sensitive = true;
        }
        let result = self.guard_writes(std::slice::from_ref(&candidate), environment);
        WriteValidation {
            variable: candidate,
            sensitivity_corrected,
            blocked: result.blocked,
            block_reason: result.block_reason(),
            result,
        }
    }

    fn scope_policy(&self, variables: &[Variable]) -> PolicyReport {
        check_scope_policy(variables, &self.rules, self.policy_mode, self.policy_forced)
    }
}

fn sensitivity_hints(variables: &[Variable]) -> Vec<VarIdentity> {
    variables
        .iter()
        .filter(|var| !var.sensitive && looks_sensitive(&var.key))
        .map(Variable::identity)
        .collect()
}
