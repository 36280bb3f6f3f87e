use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::{Scope, VarIdentity};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Active,
    Deprecated,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceSource {
    Manual,
    Sync,
    Promote,
    Demote,
    Rename,
    Move,
    Rotation,
}

impl ProvenanceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenanceSource::Manual => "manual",
            ProvenanceSource::Sync => "sync",
            ProvenanceSource::Promote => "promote",
            ProvenanceSource::Demote => "demote",
            ProvenanceSource::Rename => "rename",
            ProvenanceSource::Move => "move",
            ProvenanceSource::Rotation => "rotation",
        }
    }
}

impl fmt::Display for ProvenanceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvenanceSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ProvenanceSource::Manual),
            "sync" => Ok(ProvenanceSource::Sync),
            "promote" => Ok(ProvenanceSource::Promote),
            "demote" => Ok(ProvenanceSource::Demote),
            "rename" => Ok(ProvenanceSource::Rename),
            "move" => Ok(ProvenanceSource::Move),
            "rotation" => Ok(ProvenanceSource::Rotation),
            other => Err(format!("unknown provenance source: {other}")),
        }
    }
}

/// When, how and by whom a variable was last written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub source: ProvenanceSource,
}

impl Provenance {
    pub fn now(source: ProvenanceSource, actor: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            actor,
            source,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variable {
    pub key: String,
    /// Empty string is an explicit value, not "unset".
    pub value: String,
    #[serde(default)]
    pub project: String,
    pub environment: String,
    pub scope: Scope,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub lifecycle: Lifecycle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Variable {
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        environment: impl Into<String>,
        scope: Scope,
    ) -> Self {
        let key = key.into();
        let sensitive = looks_sensitive(&key);
        Self {
            key,
            value: value.into(),
            project: String::new(),
            environment: environment.into(),
            scope,
            sensitive,
            lifecycle: Lifecycle::Active,
            provenance: None,
            tags: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn identity(&self) -> VarIdentity {
        VarIdentity::new(self.key.clone(), self.scope.clone())
    }
}

const SECRET_SEGMENTS: &[&str] = &[
    "SECRET",
    "SECRETS",
    "PASSWORD",
    "PASSWD",
    "TOKEN",
    "PRIVATE",
    "CREDENTIAL",
    "CREDENTIALS",
    "APIKEY",
    "AUTH",
    "DSN",
    "CERT",
];
const SECRET_PAIRS: &[[&str; 2]] = &[["API", "KEY"], ["ACCESS", "KEY"]];
const SECRET_SUFFIXES: &[&str] = &["KEY", "PASS", "PWD"];

/// Naming heuristic for secret-like keys, matched on whole `_`-separated segments.
pub fn looks_sensitive(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    let segments: Vec<&str> = upper.split('_').filter(|part| !part.is_empty()).collect();
    if segments.len() > 1 {
        if let Some(last) = segments.last() {
            if SECRET_SUFFIXES.contains(last) {
                return true;
            }
        }
    }
    segments
        .iter()
        .any(|segment| SECRET_SEGMENTS.contains(segment))
        || segments
            .windows(2)
            .any(|pair| SECRET_PAIRS.iter().any(|marker| marker[..] == *pair))
}

/// Keys are conventionally upper snake case; anything else is rejected as input.
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("key must not be empty".to_string());
    }
    let mut chars = key.chars();
    let first_ok = chars
        .next()
        .map(|ch| ch.is_ascii_alphabetic() || ch == '_')
        .unwrap_or(false);
    if !first_ok || !key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(format!(
            "invalid key {key:?}: use letters, digits and underscores, not starting with a digit"
        ));
    }
    Ok(())
}
