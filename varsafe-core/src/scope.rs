use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERVICE_PREFIX: &str = "service:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeParseError {
    #[error("scope must not be empty")]
    Empty,
    #[error("service scope requires a name (expected service:<name>)")]
    MissingServiceName,
    #[error("invalid service name {0:?}: only [A-Za-z0-9._-] allowed")]
    InvalidServiceName(String),
    #[error("unknown scope {0:?}: expected shared or service:<name>")]
    Unknown(String),
}

/// Where a variable applies: every service, or exactly one.
///
/// `Shared` sorts before any `Service`, services sort by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Scope {
    Shared,
    Service(String),
}

impl Scope {
    pub fn service(name: impl Into<String>) -> Result<Self, ScopeParseError> {
        let name = name.into();
        validate_service_name(&name)?;
        Ok(Scope::Service(name))
    }

    /// `None` maps to `Shared`.
    pub fn from_service(name: Option<&str>) -> Result<Self, ScopeParseError> {
        match name {
            None => Ok(Scope::Shared),
            Some(name) => Scope::service(name),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Scope::Shared)
    }

    pub fn service_name(&self) -> Option<&str> {
        match self {
            Scope::Shared => None,
            Scope::Service(name) => Some(name.as_str()),
        }
    }
}

fn validate_service_name(name: &str) -> Result<(), ScopeParseError> {
    if name.is_empty() {
        return Err(ScopeParseError::MissingServiceName);
    }
    let valid = name
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ScopeParseError::InvalidServiceName(name.to_string()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Shared => f.write_str("shared"),
            Scope::Service(name) => write!(f, "{SERVICE_PREFIX}{name}"),
        }
    }
}

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ScopeParseError::Empty);
        }
        if trimmed.eq_ignore_ascii_case("shared") {
            return Ok(Scope::Shared);
        }
        match trimmed.strip_prefix(SERVICE_PREFIX) {
            Some(name) => Scope::service(name),
            None => Err(ScopeParseError::Unknown(trimmed.to_string())),
        }
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Composite identity of a variable. `key` alone is never unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarIdentity {
    pub key: String,
    pub scope: Scope,
}

impl VarIdentity {
    pub fn new(key: impl Into<String>, scope: Scope) -> Self {
        Self {
            key: key.into(),
            scope,
        }
    }
}

impl fmt::Display for VarIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_forms() {
        assert_eq!("shared".parse::<Scope>().unwrap(), Scope::Shared);
        assert_eq!(
            "service:api".parse::<Scope>().unwrap(),
            Scope::Service("api".into())
        );
        assert_eq!(
            "service:".parse::<Scope>(),
            Err(ScopeParseError::MissingServiceName)
        );
        assert!(matches!(
            "global".parse::<Scope>(),
            Err(ScopeParseError::Unknown(_))
        ));
        assert!(matches!(
            "service:a b".parse::<Scope>(),
            Err(ScopeParseError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn shared_and_service_identities_never_collide() {
        let shared = VarIdentity::new("API_KEY", Scope::Shared);
        let service = VarIdentity::new("API_KEY", Scope::Service("shared".into()));
        assert_ne!(shared, service);
        assert!(shared < service);
    }

    #[test]
    fn serializes_as_canonical_string() {
        let json = serde_json::to_string(&Scope::Service("web".into())).unwrap();
        assert_eq!(json, "\"service:web\"");
        let back: Scope = serde_json::from_str("\"shared\"").unwrap();
        assert_eq!(back, Scope::Shared);
    }
}
