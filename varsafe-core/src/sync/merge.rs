use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::pattern::{any_match, KeyPattern};

use super::ConflictStrategy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    Local,
    Remote,
    Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConflict {
    pub key: String,
    pub local_value: String,
    pub remote_value: String,
    pub resolution: ConflictResolution,
}

/// Outcome of a three-way comparison; nothing has been written yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub push: BTreeMap<String, String>,
    pub pull: BTreeMap<String, String>,
    pub unchanged: Vec<String>,
    pub conflicts: Vec<MergeConflict>,
    pub ignored: Vec<String>,
}

impl MergePlan {
    pub fn unresolved(&self) -> Vec<String> {
        self.conflicts
            .iter()
            .filter(|conflict| conflict.resolution == ConflictResolution::Unresolved)
            .map(|conflict| conflict.key.clone())
            .collect()
    }

    /// Local file content after the merge, ignored local keys included.
    pub fn merged_local(&self, local: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = local.clone();
        merged.extend(self.pull.iter().map(|(key, value)| (key.clone(), value.clone())));
        merged
    }

    /// Keys present on either side after the merge, ignored keys excluded.
    pub fn merged_keys(&self, local: &BTreeMap<String, String>) -> BTreeSet<String> {
        let ignored: BTreeSet<&String> = self.ignored.iter().collect();
        self.merged_local(local)
            .into_keys()
            .chain(self.push.keys().cloned())
            .filter(|key| !ignored.contains(key))
            .collect()
    }
}

/// Deterministic for a given input: keys are visited in sorted order.
pub fn plan_merge(
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
    strategy: ConflictStrategy,
    ignore: &[KeyPattern],
) -> MergePlan {
    let mut plan = MergePlan::default();
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    for key in keys {
        if any_match(ignore, key) {
            plan.ignored.push(key.clone());
            continue;
        }
        match (local.get(key), remote.get(key)) {
            (Some(mine), Some(theirs)) if mine == theirs => plan.unchanged.push(key.clone()),
            (Some(mine), Some(theirs)) => {
                let resolution = match strategy {
                    ConflictStrategy::Local => {
                        plan.push.insert(key.clone(), mine.clone());
                        ConflictResolution::Local
                    }
                    ConflictStrategy::Remote => {
                        plan.pull.insert(key.clone(), theirs.clone());
                        ConflictResolution::Remote
                    }
                    ConflictStrategy::Error => ConflictResolution::Unresolved,
                };
                plan.conflicts.push(MergeConflict {
                    key: key.clone(),
                    local_value: mine.clone(),
                    remote_value: theirs.clone(),
                    resolution,
                });
            }
            (Some(mine), None) => {
                plan.push.insert(key.clone(), mine.clone());
            }
            (None, Some(theirs)) => {
                plan.pull.insert(key.clone(), theirs.clone());
            }
            (None, None) => {}
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn strategies_pick_a_side() {
        let local = map(&[("A", "1"), ("B", "local"), ("L", "x")]);
        let remote = map(&[("A", "1"), ("B", "remote"), ("R", "y")]);

        let ours = plan_merge(&local, &remote, ConflictStrategy::Local, &[]);
        assert_eq!(ours.push, map(&[("B", "local"), ("L", "x")]));
        assert_eq!(ours.pull, map(&[("R", "y")]));
        assert_eq!(ours.unchanged, vec!["A"]);

        let theirs = plan_merge(&local, &remote, ConflictStrategy::Remote, &[]);
        assert_eq!(theirs.push, map(&[("L", "x")]));
        assert_eq!(theirs.pull, map(&[("B", "remote"), ("R", "y")]));
        assert_eq!(theirs.conflicts[0].resolution, ConflictResolution::Remote);

        let refuse = plan_merge(&local, &remote, ConflictStrategy::Error, &[]);
        assert_eq!(refuse.unresolved(), vec!["B"]);
    }

    #[test]
    fn repeated_runs_agree() {
        let local = map(&[("Z", "1"), ("M", "2"), ("A", "3")]);
        let remote = map(&[("Z", "9"), ("M", "8"), ("Q", "7")]);
        let first = plan_merge(&local, &remote, ConflictStrategy::Local, &[]);
        for _ in 0..5 {
            assert_eq!(plan_merge(&local, &remote, ConflictStrategy::Local, &[]), first);
        }
        let keys: Vec<_> = first.conflicts.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["M", "Z"]);
    }

    #[test]
    fn ignored_keys_stay_out_but_survive_locally() {
        let ignore = vec![KeyPattern::new("LOCAL_*").unwrap()];
        let local = map(&[("LOCAL_DEBUG", "1"), ("A", "1")]);
        let remote = map(&[("LOCAL_DEBUG", "0"), ("B", "2")]);
        let plan = plan_merge(&local, &remote, ConflictStrategy::Error, &ignore);
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.ignored, vec!["LOCAL_DEBUG"]);

        let merged = plan.merged_local(&local);
        assert_eq!(merged.get("LOCAL_DEBUG").map(String::as_str), Some("1"));
        assert_eq!(merged.get("B").map(String::as_str), Some("2"));
        let keys: Vec<_> = plan.merged_keys(&local).into_iter().collect();
        assert_eq!(keys, vec!["A", "B"]);
    }
}
