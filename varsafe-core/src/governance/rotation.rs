use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::{any_match, KeyPattern};
use crate::scope::Scope;
use crate::variable::Variable;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverdueVariable {
    pub key: String,
    pub scope: Scope,
    pub last_written: DateTime<Utc>,
    pub age_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RotationReport {
    pub max_age_days: i64,
    pub overdue_count: usize,
    pub overdue: Vec<OverdueVariable>,
}

/// Variables without a provenance timestamp are never overdue.
pub fn check_rotation(
    variables: &[Variable],
    patterns: &[KeyPattern],
    max_age_days: i64,
    now: DateTime<Utc>,
) -> RotationReport {
    let overdue: Vec<OverdueVariable> = variables
        .iter()
        .filter(|var| any_match(patterns, &var.key))
        .filter_map(|var| {
            let written = var.provenance.as_ref()?.timestamp;
            let age = now.signed_duration_since(written);
            (age.num_seconds() > max_age_days * 86_400).then(|| OverdueVariable {
                key: var.key.clone(),
                scope: var.scope.clone(),
                last_written: written,
                age_days: age.num_days(),
            })
        })
        .collect();
    RotationReport {
        max_age_days,
        overdue_count: overdue.len(),
        overdue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{Provenance, ProvenanceSource};
    use chrono::Duration;

    #[test]
    fn flags_only_matching_and_old_variables() {
        let now = Utc::now();
        let aged = |key: &str, days: i64| {
            Variable::new(key, "v", "prd", Scope::Shared).with_provenance(Provenance {
                timestamp: now - Duration::days(days),
                actor: None,
                source: ProvenanceSource::Manual,
            })
        };
        let vars = vec![
            aged("SESSION_SECRET", 120),
            aged("JWT_SECRET", 10),
            aged("API_TOKEN", 400),
            aged("PORT", 400),
            Variable::new("OLD_SECRET", "v", "prd", Scope::Shared),
        ];
        let patterns = vec![
            KeyPattern::new("*_SECRET").unwrap(),
            KeyPattern::new("API_*").unwrap(),
        ];
        let report = check_rotation(&vars, &patterns, 90, now);
        let keys: Vec<_> = report.overdue.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["SESSION_SECRET", "API_TOKEN"]);
        assert_eq!(report.overdue_count, 2);
        assert_eq!(report.overdue[0].age_days, 120);
    }
}
