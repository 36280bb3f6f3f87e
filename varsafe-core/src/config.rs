use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::pattern::KeyPattern;
use crate::scope::Scope;
use crate::sync::ConflictStrategy;

pub const CONFIG_VERSION: u32 = 1;
pub const POLICY_MODE_ENV: &str = "VARSAFE_POLICY_MODE";
pub const GUARDRAILS_MODE_ENV: &str = "VARSAFE_GUARDRAILS_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    Off,
    #[default]
    Warn,
    Strict,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Off => "off",
            EnforcementMode::Warn => "warn",
            EnforcementMode::Strict => "strict",
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnforcementMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(EnforcementMode::Off),
            "warn" => Ok(EnforcementMode::Warn),
            "strict" => Ok(EnforcementMode::Strict),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardOverrides {
    pub policy_mode: Option<EnforcementMode>,
    pub guardrail_mode: Option<EnforcementMode>,
}

impl GuardOverrides {
    /// Reads `VARSAFE_POLICY_MODE` / `VARSAFE_GUARDRAILS_MODE`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|value| value.parse::<EnforcementMode>().ok())
        };
        Self {
            policy_mode: read(POLICY_MODE_ENV),
            guardrail_mode: read(GUARDRAILS_MODE_ENV),
        }
    }

    pub fn or(self, fallback: GuardOverrides) -> Self {
        Self {
            policy_mode: self.policy_mode.or(fallback.policy_mode),
            guardrail_mode: self.guardrail_mode.or(fallback.guardrail_mode),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VarsafeConfig {
    pub version: u32,
    pub project: Option<String>,
    /// `None` disables orphan detection unless services are discovered locally.
    pub known_services: Option<Vec<String>>,
    pub store: StoreSection,
    pub plans: PlansSection,
    pub policy: PolicySection,
    pub guardrails: GuardrailSection,
    pub required: BTreeMap<String, Vec<String>>,
    pub environments: BTreeMap<String, EnvironmentSection>,
    pub rotation: RotationSection,
    pub sync: SyncSection,
}

impl Default for VarsafeConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            project: None,
            known_services: None,
            store: StoreSection::default(),
            plans: PlansSection::default(),
            policy: PolicySection::default(),
            guardrails: GuardrailSection::default(),
            required: BTreeMap::new(),
            environments: BTreeMap::new(),
            rotation: RotationSection::default(),
            sync: SyncSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backends: Vec<String>,
    pub concurrency: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backends: vec!["file://.varsafe/store.json".to_string()],
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlansSection {
    pub dir: String,
}

impl Default for PlansSection {
    fn default() -> Self {
        Self {
            dir: ".varsafe/plans".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    pub mode: EnforcementMode,
    pub rules: Vec<PolicyRuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRuleConfig {
    pub pattern: String,
    pub scope: String,
    #[serde(default)]
    pub mode: Option<EnforcementMode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GuardrailSection {
    pub mode: EnforcementMode,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EnvironmentSection {
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationSection {
    pub max_age_days: i64,
    pub patterns: Vec<String>,
}

impl Default for RotationSection {
    fn default() -> Self {
        Self {
            max_age_days: 90,
            patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub strategy: ConflictStrategy,
    pub ignore: Vec<String>,
    pub required: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRequirement {
    Shared,
    Service(String),
    AnyService,
}

impl ScopeRequirement {
    pub fn allows(&self, scope: &Scope) -> bool {
        match (self, scope) {
            (ScopeRequirement::Shared, Scope::Shared) => true,
            (ScopeRequirement::AnyService, Scope::Service(_)) => true,
            (ScopeRequirement::Service(expected), Scope::Service(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl fmt::Display for ScopeRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeRequirement::Shared => f.write_str("shared"),
            ScopeRequirement::Service(name) => write!(f, "service:{name}"),
            ScopeRequirement::AnyService => f.write_str("service:*"),
        }
    }
}

impl FromStr for ScopeRequirement {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == "service:*" {
            return Ok(ScopeRequirement::AnyService);
        }
        match trimmed.parse::<Scope>() {
            Ok(Scope::Shared) => Ok(ScopeRequirement::Shared),
            Ok(Scope::Service(name)) => Ok(ScopeRequirement::Service(name)),
            Err(source) => Err(ConfigError::InvalidScope {
                value: trimmed.to_string(),
                source,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub pattern: KeyPattern,
    pub scope: ScopeRequirement,
    pub mode: Option<EnforcementMode>,
}

impl VarsafeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        self.policy_rules()?;
        for pattern in self.rotation.patterns.iter().chain(self.sync.ignore.iter()) {
            compile(pattern)?;
        }
        Ok(())
    }

    pub fn policy_rules(&self) -> Result<Vec<PolicyRule>> {
        self.policy
            .rules
            .iter()
            .map(|rule| {
                Ok(PolicyRule {
                    pattern: compile(&rule.pattern)?,
                    scope: rule.scope.parse()?,
                    mode: rule.mode,
                })
            })
            .collect()
    }

    pub fn rotation_patterns(&self) -> Result<Vec<KeyPattern>> {
        self.rotation.patterns.iter().map(|p| compile(p)).collect()
    }

    pub fn sync_ignore_patterns(&self) -> Result<Vec<KeyPattern>> {
        self.sync.ignore.iter().map(|p| compile(p)).collect()
    }

    pub fn policy_mode(&self, overrides: &GuardOverrides) -> EnforcementMode {
        overrides.policy_mode.unwrap_or(self.policy.mode)
    }

    pub fn guardrail_mode(&self, overrides: &GuardOverrides) -> EnforcementMode {
        overrides.guardrail_mode.unwrap_or(self.guardrails.mode)
    }

    /// `[required].<env>` merged with `[environments.<env>].required`, sorted and de-duplicated.
    pub fn required_keys(&self, environment: &str) -> Vec<String> {
        let mut keys = BTreeSet::new();
        if let Some(list) = self.required.get(environment) {
            keys.extend(list.iter().cloned());
        }
        if let Some(section) = self.environments.get(environment) {
            keys.extend(section.required.iter().cloned());
        }
        keys.into_iter().collect()
    }

    pub fn sync_required_keys(&self, environment: &str) -> Vec<String> {
        let keys: BTreeSet<String> = self
            .sync
            .required
            .get(environment)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default();
        keys.into_iter().collect()
    }

    pub fn resolve_path<P: AsRef<Path>>(base_dir: &Path, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }
}

fn compile(pattern: &str) -> Result<KeyPattern> {
    KeyPattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<VarsafeConfig> {
    let config: VarsafeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> std::result::Result<VarsafeConfig, toml::de::Error> {
    toml::from_str(content)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
