use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::variable::Variable;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RequiredReport {
    pub required: Vec<String>,
    pub satisfied: usize,
    pub missing: Vec<String>,
}

/// A required key is satisfied by a variable with that key in any scope.
pub fn check_required(variables: &[Variable], required: &[String]) -> RequiredReport {
    let present: BTreeSet<&str> = variables.iter().map(|var| var.key.as_str()).collect();
    let wanted: BTreeSet<&String> = required.iter().collect();
    let missing: Vec<String> = wanted
        .iter()
        .filter(|key| !present.contains(key.as_str()))
        .map(|key| (*key).clone())
        .collect();
    RequiredReport {
        required: wanted.iter().map(|key| (*key).clone()).collect(),
        satisfied: wanted.len() - missing.len(),
        missing,
    }
}
