use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::EnforcementMode;
use crate::scope::Scope;
use crate::variable::Variable;

use super::{is_production, Severity};

static PLACEHOLDER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(todo|tbd|fixme|changeme|change[-_]me|placeholder)$",
        r"(?i)^x{3,}$",
        r"(?i)^your[-_].+[-_]here$",
        r"(?i)^<[a-z0-9_]+>$",
        r"^\$\{[^}]*\}$",
        r"^\{\{.*\}\}$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid placeholder regex"))
    .collect()
});

static PRIVATE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(\blocalhost\b|\[::1\]|^::1$|\b0\.0\.0\.0\b|\b127\.\d{1,3}\.\d{1,3}\.\d{1,3}\b|\b10\.\d{1,3}\.\d{1,3}\.\d{1,3}\b|\b192\.168\.\d{1,3}\.\d{1,3}\b|\b172\.(1[6-9]|2\d|3[01])\.\d{1,3}\.\d{1,3}\b)",
    )
    .expect("valid private host regex")
});

static BARE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^([a-z0-9]([a-z0-9-]*[a-z0-9])?\.)+[a-z]{2,}(:\d{1,5})?(/\S*)?$",
    )
    .expect("valid bare host regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailCode {
    EmptyValue,
    WhitespaceValue,
    Placeholder,
    LocalhostInPrd,
    UrlNoScheme,
}

impl GuardrailCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardrailCode::EmptyValue => "empty-value",
            GuardrailCode::WhitespaceValue => "whitespace-value",
            GuardrailCode::Placeholder => "placeholder",
            GuardrailCode::LocalhostInPrd => "localhost-in-prd",
            GuardrailCode::UrlNoScheme => "url-no-scheme",
        }
    }
}

impl fmt::Display for GuardrailCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardrailIssue {
    pub key: String,
    pub scope: Scope,
    pub code: GuardrailCode,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GuardrailReport {
    pub issues: Vec<GuardrailIssue>,
    /// True iff any issue reached `error`.
    pub blocked: bool,
}

impl GuardrailReport {
    pub fn errors(&self) -> impl Iterator<Item = &GuardrailIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &GuardrailIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }
}

pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    PLACEHOLDER_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(trimmed))
}

pub fn points_to_private_host(value: &str) -> bool {
    PRIVATE_HOST.is_match(value)
}

pub fn is_bare_host(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.contains("://") && BARE_HOST.is_match(trimmed)
}

/// Empty and whitespace-only values are `error` in every mode, `off` included.
/// The remaining checks follow `mode`: `warn` yields warnings, `strict` errors.
pub fn check_value_guardrails(
    variables: &[Variable],
    environment: &str,
    mode: EnforcementMode,
) -> GuardrailReport {
    let mut issues = Vec::new();
    let production = is_production(environment);
    let graded = match mode {
        EnforcementMode::Strict => Severity::Error,
        _ => Severity::Warning,
    };

    for variable in variables {
        let issue = |code: GuardrailCode, severity: Severity, message: String| GuardrailIssue {
            key: variable.key.clone(),
            scope: variable.scope.clone(),
            code,
            severity,
            message,
            suggestion: None,
        };

        if variable.value.is_empty() {
            issues.push(issue(
                GuardrailCode::EmptyValue,
                Severity::Error,
                format!("{} has an empty value", variable.key),
            ));
            continue;
        }
        if variable.value.trim().is_empty() {
            issues.push(issue(
                GuardrailCode::WhitespaceValue,
                Severity::Error,
                format!("{} contains only whitespace", variable.key),
            ));
            continue;
        }
        if mode == EnforcementMode::Off {
            continue;
        }

        if is_placeholder(&variable.value) {
            issues.push(issue(
                GuardrailCode::Placeholder,
                graded,
                format!("{} looks like a placeholder value", variable.key),
            ));
        } else if production && points_to_private_host(&variable.value) {
            issues.push(issue(
                GuardrailCode::LocalhostInPrd,
                graded,
                format!(
                    "{} points to a loopback or private address in {environment}",
                    variable.key
                ),
            ));
        }

        if variable.key.to_ascii_uppercase().ends_with("_URL") && is_bare_host(&variable.value) {
            let mut url_issue = issue(
                GuardrailCode::UrlNoScheme,
                graded,
                format!("{} is missing a URL scheme", variable.key),
            );
            url_issue.suggestion = Some(format!("https://{}", variable.value.trim()));
            issues.push(url_issue);
        }
    }

    let blocked = issues.iter().any(|issue| issue.severity == Severity::Error);
    GuardrailReport { issues, blocked }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(key: &str, value: &str) -> Variable {
        Variable::new(key, value, "dev", Scope::Shared)
    }

    #[test]
    fn todo_in_dev_is_a_warning() {
        let report = check_value_guardrails(&[var("API_KEY", "TODO")], "dev", EnforcementMode::Warn);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code, GuardrailCode::Placeholder);
        assert_eq!(report.issues[0].severity, Severity::Warning);
        assert!(!report.blocked);
    }

    #[test]
    fn placeholder_blocks_only_under_strict() {
        let vars = [var("TOKEN", "CHANGEME")];
        assert!(!check_value_guardrails(&vars, "dev", EnforcementMode::Warn).blocked);
        assert!(check_value_guardrails(&vars, "dev", EnforcementMode::Strict).blocked);
        assert!(!check_value_guardrails(&vars, "dev", EnforcementMode::Off).blocked);
    }

    #[test]
    fn empty_value_blocks_in_every_mode() {
        for mode in [
            EnforcementMode::Off,
            EnforcementMode::Warn,
            EnforcementMode::Strict,
        ] {
            let report = check_value_guardrails(&[var("PORT", "")], "dev", mode);
            assert!(report.blocked, "mode {mode}");
            assert_eq!(report.issues[0].code, GuardrailCode::EmptyValue);
            let report = check_value_guardrails(&[var("PORT", "  \t")], "dev", mode);
            assert_eq!(report.issues[0].code, GuardrailCode::WhitespaceValue);
        }
    }

    #[test]
    fn recognises_placeholder_shapes() {
        for value in [
            "TODO",
            "fixme",
            "xxxxx",
            "your-api-key-here",
            "<API_KEY>",
            "${SECRET}",
            "{{ secret }}",
            "PlaceHolder",
        ] {
            assert!(is_placeholder(value), "{value}");
        }
        for value in ["hunter2", "todo-list-service", "https://x"] {
            assert!(!is_placeholder(value), "{value}");
        }
    }

    #[test]
    fn localhost_only_flagged_in_production() {
        let vars = [var("DATABASE_HOST", "postgres://127.0.0.1:5432/app")];
        assert!(check_value_guardrails(&vars, "dev", EnforcementMode::Warn)
            .issues
            .is_empty());
        for env in ["prd", "PROD", "production"] {
            let report = check_value_guardrails(&vars, env, EnforcementMode::Warn);
            assert_eq!(report.issues.len(), 1);
            assert_eq!(report.issues[0].code, GuardrailCode::LocalhostInPrd);
        }
        assert!(points_to_private_host("http://192.168.1.20"));
        assert!(points_to_private_host("10.0.0.5:6379"));
        assert!(points_to_private_host("172.20.0.1"));
        assert!(!points_to_private_host("172.32.0.1"));
        assert!(!points_to_private_host("https://api.example.com"));
        assert!(points_to_private_host("http://localhost:8080"));
        assert!(!points_to_private_host("https://api.notlocalhost.io"));
        assert!(!points_to_private_host("https://localhostel.com"));
    }

    #[test]
    fn url_without_scheme_gets_suggestion() {
        let report = check_value_guardrails(
            &[var("API_URL", "api.example.com/v1")],
            "dev",
            EnforcementMode::Warn,
        );
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].code, GuardrailCode::UrlNoScheme);
        assert_eq!(
            report.issues[0].suggestion.as_deref(),
            Some("https://api.example.com/v1")
        );
        let ok = check_value_guardrails(
            &[var("API_URL", "https://api.example.com")],
            "dev",
            EnforcementMode::Warn,
        );
        assert!(ok.issues.is_empty());
    }

    #[test]
    fn url_check_is_independent_of_precedence_chain() {
        let report = check_value_guardrails(
            &[var("callback_url", "localhost.example.com:8080")],
            "prd",
            EnforcementMode::Strict,
        );
        let codes: Vec<_> = report.issues.iter().map(|issue| issue.code).collect();
        assert_eq!(
            codes,
            vec![GuardrailCode::LocalhostInPrd, GuardrailCode::UrlNoScheme]
        );
        assert!(report.blocked);
    }
}
