use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::scope::Scope;
use crate::variable::Variable;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrphanedService {
    pub name: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OrphanReport {
    /// False when no known-services list was available.
    pub checked: bool,
    pub services: Vec<OrphanedService>,
}

/// Each unknown service appears once, with every key scoped to it.
pub fn detect_orphans(variables: &[Variable], known_services: Option<&[String]>) -> OrphanReport {
    let Some(known) = known_services else {
        return OrphanReport::default();
    };
    let known: BTreeSet<&str> = known.iter().map(String::as_str).collect();
    let mut orphaned: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for variable in variables {
        if let Scope::Service(name) = &variable.scope {
            if !known.contains(name.as_str()) {
                orphaned
                    .entry(name.as_str())
                    .or_default()
                    .insert(variable.key.as_str());
            }
        }
    }
    OrphanReport {
        checked: true,
        services: orphaned
            .into_iter()
            .map(|(name, keys)| OrphanedService {
                name: name.to_string(),
                keys: keys.into_iter().map(str::to_string).collect(),
            })
            .collect(),
    }
}
