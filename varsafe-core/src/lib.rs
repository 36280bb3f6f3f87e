pub mod batch;
pub mod config;
pub mod error;
mod fsutil;
pub mod governance;
pub mod local;
pub mod mutation;
pub mod pattern;
pub mod plan;
pub mod scope;
pub mod store;
pub mod sync;
pub mod variable;

pub use batch::{BatchFailure, BatchOptions, BatchOutcome, BatchRunner, BatchSuccess};
pub use config::{
    load_config, parse_config, EnforcementMode, GuardOverrides, PolicyRule, ScopeRequirement,
    VarsafeConfig,
};
pub use error::{ConfigError, Result};
pub use governance::{
    check_value_guardrails, is_production, GovernanceEngine, GovernanceResult, GuardrailCode,
    GuardrailIssue, GuardrailReport, Severity, WriteValidation,
};
pub use local::{EnvFile, LocalError, LocalResult, LocalStateDir, ProvenanceEntry};
pub use mutation::{
    MutationError, MutationKind, MutationOptions, MutationReport, MutationResult,
    RollbackOutcome, ScopeMutator,
};
pub use pattern::KeyPattern;
pub use plan::{
    diff_variables, mask_value, Applier, ApplyOptions, ApplyReport, ChangeAction, Health, Plan,
    PlanArtifactStore, PlanChange, PlanError, PlanOutcome, PlanRequest, PlanResult, PlanStatus,
    PlanSummary, Planner, Scorecard,
};
pub use scope::{Scope, ScopeParseError, VarIdentity};
pub use store::{
    connect_first, DeleteManyOutcome, FileStore, MemoryStore, SetManyOptions, StoreError,
    StoreResult, VariableFilter, VariableStore,
};
pub use sync::{
    ConflictStrategy, MergeReport, PullReport, PushReport, SyncEngine, SyncError, SyncRequest,
    SyncResult,
};
pub use variable::{Lifecycle, Provenance, ProvenanceSource, Variable};
