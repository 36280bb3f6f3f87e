use serde::{Deserialize, Serialize};

use crate::config::{EnforcementMode, PolicyRule};
use crate::scope::Scope;
use crate::variable::Variable;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyIssue {
    pub key: String,
    pub scope: Scope,
    pub pattern: String,
    pub expected: String,
    pub mode: EnforcementMode,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicyReport {
    pub mode: EnforcementMode,
    /// Mismatches under `warn`.
    pub warnings: Vec<PolicyIssue>,
    /// Mismatches under `strict`; any entry blocks.
    pub violations: Vec<PolicyIssue>,
}

impl PolicyReport {
    pub fn issues(&self) -> impl Iterator<Item = &PolicyIssue> {
        self.violations.iter().chain(self.warnings.iter())
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }
}

/// The first rule whose pattern matches a key decides its allowed scope.
///
/// A rule's own mode applies unless `forced` is set, which replaces every rule's mode.
/// `global == Off` disables the check entirely.
pub fn check_scope_policy(
    variables: &[Variable],
    rules: &[PolicyRule],
    global: EnforcementMode,
    forced: Option<EnforcementMode>,
) -> PolicyReport {
    let mut report = PolicyReport {
        mode: forced.unwrap_or(global),
        ..PolicyReport::default()
    };
    if forced.unwrap_or(global) == EnforcementMode::Off {
        return report;
    }

    for variable in variables {
        let Some(rule) = rules.iter().find(|rule| rule.pattern.matches(&variable.key)) else {
            continue;
        };
        let mode = forced.or(rule.mode).unwrap_or(global);
        if mode == EnforcementMode::Off || rule.scope.allows(&variable.scope) {
            continue;
        }
        let issue = PolicyIssue {
            key: variable.key.clone(),
            scope: variable.scope.clone(),
            pattern: rule.pattern.to_string(),
            expected: rule.scope.to_string(),
            mode,
            message: format!(
                "{} is scoped {} but policy {} requires {}",
                variable.key, variable.scope, rule.pattern, rule.scope
            ),
        };
        match mode {
            EnforcementMode::Strict => report.violations.push(issue),
            _ => report.warnings.push(issue),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_config, PolicyRule};

    fn rules(toml: &str) -> Vec<PolicyRule> {
        parse_config(toml).unwrap().policy_rules().unwrap()
    }

    const RULES: &str = r#"
[[policy.rules]]
pattern = "DATABASE_*"
scope = "shared"
mode = "strict"
[[policy.rules]]
pattern = "WORKER_*"
scope = "service:*"
[[policy.rules]]
pattern = "STRIPE_*"
scope = "service:billing"
"#;

    #[test]
    fn strict_rule_mismatch_is_a_violation() {
        let vars = [Variable::new("DATABASE_URL", "x", "dev", Scope::Service("api".into()))];
        let report = check_scope_policy(&vars, &rules(RULES), EnforcementMode::Warn, None);
        assert_eq!(report.violations.len(), 1);
        assert!(report.warnings.is_empty());
        assert_eq!(report.violations[0].expected, "shared");
    }

    #[test]
    fn default_mode_mismatch_is_a_warning() {
        let vars = [
            Variable::new("WORKER_THREADS", "4", "dev", Scope::Shared),
            Variable::new("STRIPE_KEY", "sk", "dev", Scope::Service("web".into())),
            Variable::new("STRIPE_WEBHOOK", "wh", "dev", Scope::Service("billing".into())),
        ];
        let report = check_scope_policy(&vars, &rules(RULES), EnforcementMode::Warn, None);
        assert_eq!(report.warnings.len(), 2);
        assert!(!report.has_violations());
    }

    #[test]
    fn off_skips_and_forced_mode_relaxes_strict_rules() {
        let vars = [Variable::new("DATABASE_URL", "x", "dev", Scope::Service("api".into()))];
        let off = check_scope_policy(&vars, &rules(RULES), EnforcementMode::Off, None);
        assert_eq!(off.issues().count(), 0);

        let relaxed = check_scope_policy(
            &vars,
            &rules(RULES),
            EnforcementMode::Warn,
            Some(EnforcementMode::Warn),
        );
        assert!(!relaxed.has_violations());
        assert_eq!(relaxed.warnings.len(), 1);
    }
}
