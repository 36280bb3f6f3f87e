use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use varsafe_core::plan::mask_plan;
use varsafe_core::{
    connect_first, load_config, mask_value, Applier, ApplyOptions, ApplyReport, ConfigError,
    ConflictStrategy, EnforcementMode, GovernanceEngine, GovernanceResult, GuardOverrides,
    LocalError, LocalStateDir, MergeReport, MutationError, MutationOptions, MutationReport, Plan,
    PlanArtifactStore, PlanError, PlanOutcome, PlanRequest, PlanStatus, Planner, PullReport,
    PushReport, Scope, ScopeMutator, ScopeParseError, StoreError, SyncEngine, SyncError, SyncRequest,
    VariableStore, VarsafeConfig,
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Local(#[from] LocalError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Scope(#[from] ScopeParseError),
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("no project configured: pass --project or set `project` in the config file")]
    MissingProject,
    #[error("governance check blocked: {0}")]
    Blocked(String),
    #[error("plan {plan_id} was refused: {reason}")]
    Refused { plan_id: String, reason: String },
    #[error("plan {plan_id} finished with status {status}")]
    ApplyFailed { plan_id: String, status: PlanStatus },
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Parser)]
#[command(name = "varsafectl", version, about = "Governed environment variable sync")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "varsafe.toml", global = true)]
    pub config: PathBuf,

    /// Local state root (defaults to the config file's directory)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Project name (overrides `project` in the config)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Store backend connection string, tried in order
    #[arg(long = "backend", global = true)]
    pub backends: Vec<String>,

    /// Scope policy mode override (off, warn, strict)
    #[arg(long, global = true)]
    pub policy_mode: Option<EnforcementMode>,

    /// Value guardrail mode override (off, warn, strict)
    #[arg(long, global = true)]
    pub guardrails: Option<EnforcementMode>,

    /// Actor recorded in provenance entries
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Compute and persist a plan from local desired state
    Plan(PlanArgs),
    /// Apply the latest reviewed plan for an environment
    Apply(ApplyArgs),
    /// Run the governance checks over local desired state
    Check(CheckArgs),
    /// Push, pull or merge one scope
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Move a variable between scopes
    Move(MoveArgs),
    /// Rename a variable within a scope
    Rename(RenameArgs),
    /// Move a service variable to shared
    Promote(PromoteArgs),
    /// Move a shared variable into a service
    Demote(PromoteArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[arg(long)]
    pub env: String,
    /// Restrict the plan to one service
    #[arg(long)]
    pub service: Option<String>,
    /// Delete remote keys absent locally
    #[arg(long)]
    pub prune: bool,
}

#[derive(Debug, Args)]
pub struct ApplyArgs {
    #[arg(long)]
    pub env: String,
    /// Required for production environments
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    #[arg(long)]
    pub env: String,
    #[arg(long)]
    pub service: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum SyncCommands {
    /// Write local values to the store
    Push(SyncArgs),
    /// Overwrite the local file with remote values
    Pull(SyncArgs),
    /// Three-way merge between local and remote
    Merge(SyncArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(long)]
    pub env: String,
    #[arg(long)]
    pub service: Option<String>,
    #[arg(long)]
    pub dry_run: bool,
    /// Push only: delete remote keys absent locally
    #[arg(long)]
    pub prune: bool,
    /// Merge only: conflict strategy (local, remote, error)
    #[arg(long)]
    pub strategy: Option<ConflictStrategy>,
}

#[derive(Debug, Args)]
pub struct MutationArgs {
    /// Replace an existing destination
    #[arg(long)]
    pub overwrite: bool,
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub env: String,
    /// Source scope (`shared` or `service:<name>`)
    #[arg(long)]
    pub from: Scope,
    /// Destination scope
    #[arg(long)]
    pub to: Scope,
    #[command(flatten)]
    pub mutation: MutationArgs,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub to_key: String,
    #[arg(long)]
    pub env: String,
    #[arg(long, default_value = "shared")]
    pub scope: Scope,
    #[command(flatten)]
    pub mutation: MutationArgs,
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub env: String,
    #[arg(long)]
    pub service: String,
    /// Copy instead of move
    #[arg(long)]
    pub keep_source: bool,
    #[command(flatten)]
    pub mutation: MutationArgs,
}

impl PromoteArgs {
    fn options(&self) -> MutationOptions {
        MutationOptions {
            keep_source: self.keep_source,
            ..self.mutation.options()
        }
    }
}

impl MutationArgs {
    fn options(&self) -> MutationOptions {
        MutationOptions {
            overwrite: self.overwrite,
            dry_run: self.dry_run,
            keep_source: false,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(*shell, &mut command, "varsafectl", &mut io::stdout());
        return Ok(());
    }

    let ctx = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Plan(args) => {
            let outcome = ctx.plan(args).await?;
            render(&PlanView::from(&outcome), cli.format)
        }
        Commands::Apply(args) => {
            let report = ctx.apply(args).await?;
            render(&report, cli.format)?;
            if let Some(reason) = &report.refused {
                return Err(AppError::Refused {
                    plan_id: report.plan_id.clone(),
                    reason: reason.clone(),
                });
            }
            if report.status == PlanStatus::Failed {
                return Err(AppError::ApplyFailed {
                    plan_id: report.plan_id.clone(),
                    status: report.status,
                });
            }
            Ok(())
        }
        Commands::Check(args) => {
            let result = ctx.check(args)?;
            render(&result, cli.format)?;
            match result.block_reason() {
                Some(reason) if result.blocked => Err(AppError::Blocked(reason)),
                _ => Ok(()),
            }
        }
        Commands::Sync { command } => match command {
            SyncCommands::Push(args) => {
                let report = ctx.sync_engine().await?.push(&ctx.sync_request(args)?).await?;
                render(&report, cli.format)
            }
            SyncCommands::Pull(args) => {
                let report = ctx.sync_engine().await?.pull(&ctx.sync_request(args)?).await?;
                render(&report, cli.format)
            }
            SyncCommands::Merge(args) => {
                let report = ctx.sync_engine().await?.merge(&ctx.sync_request(args)?).await?;
                render(&masked_merge(report), cli.format)
            }
        },
        Commands::Move(args) => {
            let report = ctx
                .mutator()
                .await?
                .move_variable(
                    &ctx.project,
                    &args.env,
                    &args.key,
                    args.from.clone(),
                    args.to.clone(),
                    args.mutation.options(),
                )
                .await?;
            render(&report, cli.format)
        }
        Commands::Rename(args) => {
            let report = ctx
                .mutator()
                .await?
                .rename(
                    &ctx.project,
                    &args.env,
                    args.scope.clone(),
                    &args.key,
                    &args.to_key,
                    args.mutation.options(),
                )
                .await?;
            render(&report, cli.format)
        }
        Commands::Promote(args) => {
            let report = ctx
                .mutator()
                .await?
                .promote(&ctx.project, &args.env, &args.key, &args.service, args.options())
                .await?;
            render(&report, cli.format)
        }
        Commands::Demote(args) => {
            let report = ctx
                .mutator()
                .await?
                .demote(&ctx.project, &args.env, &args.key, &args.service, args.options())
                .await?;
            render(&report, cli.format)
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: VarsafeConfig,
    dir: PathBuf,
    plans_dir: PathBuf,
    project: String,
    backends: Vec<String>,
    overrides: GuardOverrides,
    actor: Option<String>,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let config = if config_path.exists() {
            load_config(&config_path)?
        } else {
            debug!(path = %config_path.display(), "config file not found, using defaults");
            VarsafeConfig::default()
        };

        let config_dir = config_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let dir = cli.dir.clone().unwrap_or(config_dir);
        let plans_dir = VarsafeConfig::resolve_path(&dir, &config.plans.dir);

        let project = cli
            .project
            .clone()
            .or_else(|| config.project.clone())
            .ok_or(AppError::MissingProject)?;

        let backends = if cli.backends.is_empty() {
            config.store.backends.clone()
        } else {
            cli.backends.clone()
        };

        let flags = GuardOverrides {
            policy_mode: cli.policy_mode,
            guardrail_mode: cli.guardrails,
        };
        let overrides = flags.or(GuardOverrides::from_env());

        Ok(Self {
            config,
            dir,
            plans_dir,
            project,
            backends,
            overrides,
            actor: cli.actor.clone(),
        })
    }

    fn local(&self) -> LocalStateDir {
        LocalStateDir::new(&self.dir)
    }

    fn artifacts(&self) -> PlanArtifactStore {
        PlanArtifactStore::new(&self.plans_dir)
    }

    fn governance(&self) -> Result<GovernanceEngine> {
        let services = self.local().known_services()?;
        Ok(GovernanceEngine::new(&self.config)?
            .with_overrides(self.overrides)
            .with_discovered_services(services))
    }

    async fn store(&self) -> Result<Arc<dyn VariableStore>> {
        Ok(connect_first(&self.backends, &self.dir).await?)
    }

    async fn planner(&self) -> Result<Planner> {
        Ok(
            Planner::new(self.store().await?, self.governance()?, self.local())
                .with_artifacts(self.artifacts()),
        )
    }

    async fn plan(&self, args: &PlanArgs) -> Result<PlanOutcome> {
        let scope = args.service.as_deref().map(Scope::service).transpose()?;
        let request = PlanRequest::new(&self.project, &args.env)
            .with_scope(scope)
            .with_prune(args.prune);
        Ok(self.planner().await?.plan(&request, Utc::now()).await?)
    }

    async fn apply(&self, args: &ApplyArgs) -> Result<ApplyReport> {
        let artifacts = self.artifacts();
        let reviewed = artifacts
            .latest(&self.project, &args.env)?
            .ok_or_else(|| PlanError::NotFound {
                project: self.project.clone(),
                environment: args.env.clone(),
            })?;
        info!(plan_id = %reviewed.id, "applying reviewed plan");

        let store = self.store().await?;
        let planner = Planner::new(store.clone(), self.governance()?, self.local())
            .with_artifacts(artifacts.clone());
        let mut plan = planner.prepare_reviewed(&reviewed, Utc::now()).await?;

        let options = ApplyOptions {
            force: args.force,
            dry_run: args.dry_run,
        };
        Ok(Applier::new(store)
            .with_artifacts(artifacts)
            .with_local(self.local())
            .with_actor(self.actor.clone())
            .apply(&mut plan, options)
            .await)
    }

    fn check(&self, args: &CheckArgs) -> Result<GovernanceResult> {
        let scope = args.service.as_deref().map(Scope::service).transpose()?;
        let variables = self
            .local()
            .read_variables(&self.project, &args.env, scope.as_ref())?;
        Ok(self.governance()?.evaluate(&variables, &args.env, Utc::now()))
    }

    async fn sync_engine(&self) -> Result<SyncEngine> {
        let engine = SyncEngine::new(
            self.store().await?,
            self.governance()?,
            self.local(),
            &self.config,
        )?;
        Ok(engine.with_actor(self.actor.clone()))
    }

    fn sync_request(&self, args: &SyncArgs) -> Result<SyncRequest> {
        let scope = match args.service.as_deref() {
            Some(name) => Scope::service(name)?,
            None => Scope::Shared,
        };
        Ok(SyncRequest::new(&self.project, &args.env, scope)
            .dry_run(args.dry_run)
            .prune(args.prune)
            .strategy(args.strategy))
    }

    async fn mutator(&self) -> Result<ScopeMutator> {
        Ok(ScopeMutator::new(self.store().await?, self.governance()?)
            .with_local(self.local())
            .with_actor(self.actor.clone()))
    }
}

/// Plan output with sensitive values masked in every format.
#[derive(Debug, Serialize)]
struct PlanView {
    plan: Plan,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_reason: Option<String>,
}

impl From<&PlanOutcome> for PlanView {
    fn from(outcome: &PlanOutcome) -> Self {
        Self {
            plan: mask_plan(&outcome.plan),
            artifact: outcome.artifacts.as_ref().map(|paths| paths.json.clone()),
            block_reason: outcome.governance.block_reason(),
        }
    }
}

fn masked_merge(mut report: MergeReport) -> MergeReport {
    for conflict in &mut report.conflicts {
        conflict.local_value = mask_value(&conflict.local_value);
        conflict.remote_value = mask_value(&conflict.remote_value);
    }
    report
}

fn list(label: &str, keys: &[String]) -> Option<String> {
    (!keys.is_empty()).then(|| format!("{label}: {}", keys.join(", ")))
}

fn push_warnings(lines: &mut Vec<String>, warnings: &[String]) {
    lines.extend(warnings.iter().map(|warning| format!("warning: {warning}")));
}

impl DisplayFallback for PlanView {
    fn display(&self) -> String {
        let plan = &self.plan;
        let mut lines = vec![format!(
            "plan {} [{}] health={}",
            plan.id, plan.status, plan.scorecard.health
        )];
        if plan.changes.is_empty() {
            lines.push("no changes".to_string());
        }
        for change in &plan.changes {
            let detail = match (&change.remote_value, &change.local_value) {
                (Some(remote), Some(local)) => format!("{remote} -> {local}"),
                (None, Some(local)) => local.clone(),
                (Some(remote), None) => remote.clone(),
                (None, None) => String::new(),
            };
            lines.push(format!(
                "  {} {}@{} {}",
                change.action.symbol(),
                change.key,
                change.scope,
                detail
            ));
        }
        let summary = &plan.summary;
        lines.push(format!(
            "add={} update={} delete={} unchanged={} drift={}",
            summary.to_add, summary.to_update, summary.to_delete, summary.unchanged, summary.conflicts
        ));
        lines.extend(plan.scorecard.issues.iter().map(|issue| format!("issue: {issue}")));
        if let Some(reason) = &self.block_reason {
            lines.push(format!("blocked: {reason}"));
        }
        if let Some(path) = &self.artifact {
            lines.push(format!("saved {}", path.display()));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ApplyReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "plan {} [{}] applied={} failed={} skipped={}",
            self.plan_id, self.status, self.applied, self.failed, self.skipped
        )];
        if let Some(reason) = &self.refused {
            lines.push(format!("refused: {reason}"));
        }
        for failure in &self.failures {
            lines.push(format!(
                "  failed {}@{}: {}",
                failure.key, failure.scope, failure.error
            ));
        }
        push_warnings(&mut lines, &self.warnings);
        lines.join("\n")
    }
}

impl DisplayFallback for GovernanceResult {
    fn display(&self) -> String {
        let mut lines = vec![if self.blocked {
            "governance: BLOCKED".to_string()
        } else {
            "governance: ok".to_string()
        }];
        for issue in self.policy.violations.iter().chain(&self.policy.warnings) {
            lines.push(format!("  [policy/{}] {}", issue.mode, issue.message));
        }
        for issue in &self.guardrails.issues {
            lines.push(format!(
                "  [{}/{}] {}@{}: {}",
                issue.severity, issue.code, issue.key, issue.scope, issue.message
            ));
        }
        if let Some(line) = list("  missing required", &self.required.missing) {
            lines.push(line);
        }
        for overdue in &self.rotation.overdue {
            lines.push(format!(
                "  [rotation] {}@{} is {} days old",
                overdue.key, overdue.scope, overdue.age_days
            ));
        }
        for service in &self.orphans.services {
            lines.push(format!(
                "  [orphan] service {} ({} keys)",
                service.name,
                service.keys.len()
            ));
        }
        push_warnings(&mut lines, &self.warnings);
        lines.extend(self.suggestions.iter().map(|line| format!("suggestion: {line}")));
        lines.join("\n")
    }
}

impl DisplayFallback for PushReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "push{}: unchanged={}",
            if self.dry_run { " (dry run)" } else { "" },
            self.unchanged
        )];
        lines.extend(list("added", &self.added));
        lines.extend(list("updated", &self.updated));
        lines.extend(list("deleted", &self.deleted));
        for failure in &self.failures {
            lines.push(format!("failed {}: {}", failure.key, failure.error));
        }
        push_warnings(&mut lines, &self.warnings);
        lines.join("\n")
    }
}

impl DisplayFallback for PullReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "pull{} -> {}: unchanged={}",
            if self.dry_run { " (dry run)" } else { "" },
            self.path.display(),
            self.unchanged
        )];
        lines.extend(list("added", &self.added));
        lines.extend(list("updated", &self.updated));
        lines.extend(list("deleted", &self.deleted));
        push_warnings(&mut lines, &self.warnings);
        lines.join("\n")
    }
}

impl DisplayFallback for MergeReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "merge{} strategy={}: unchanged={}",
            if self.dry_run { " (dry run)" } else { "" },
            self.strategy,
            self.unchanged
        )];
        lines.extend(list("pushed", &self.pushed));
        lines.extend(list("pulled", &self.pulled));
        lines.extend(list("ignored", &self.ignored));
        for conflict in &self.conflicts {
            lines.push(format!(
                "conflict {}: local={} remote={} ({:?})",
                conflict.key, conflict.local_value, conflict.remote_value, conflict.resolution
            ));
        }
        for failure in &self.failures {
            lines.push(format!("failed {}: {}", failure.key, failure.error));
        }
        push_warnings(&mut lines, &self.warnings);
        lines.join("\n")
    }
}

impl DisplayFallback for MutationReport {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{}{}: {} -> {}",
            self.kind,
            if self.dry_run { " (dry run)" } else { "" },
            self.source,
            self.destination
        )];
        if self.overwritten {
            lines.push("destination overwritten".to_string());
        }
        if !self.source_deleted && !self.dry_run {
            lines.push("source kept".to_string());
        }
        if self.sensitivity_corrected {
            lines.push("marked sensitive".to_string());
        }
        push_warnings(&mut lines, &self.warnings);
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use varsafe_core::FileStore;

    const CONFIG: &str = r#"
project = "shop"

[store]
backends = ["file://.varsafe/store.json"]
"#;

    fn workspace(env_files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("varsafe.toml"), CONFIG).unwrap();
        for (rel, content) in env_files {
            let path = temp.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        temp
    }

    fn cli(temp: &TempDir, args: &[&str]) -> Cli {
        let config = temp.path().join("varsafe.toml");
        let mut argv = vec![
            "varsafectl".to_string(),
            "--config".to_string(),
            config.display().to_string(),
        ];
        argv.extend(args.iter().map(|arg| arg.to_string()));
        Cli::try_parse_from(argv).unwrap()
    }

    async fn remote_value(temp: &TempDir, key: &str, env: &str, scope: &Scope) -> Option<String> {
        let store = FileStore::new(temp.path().join(".varsafe/store.json"));
        store.connect().await.unwrap();
        store
            .get(key, "shop", env, scope)
            .await
            .unwrap()
            .map(|var| var.value)
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[tokio::test]
    async fn plan_then_apply_writes_the_store() {
        let temp = workspace(&[("dev.env", "PORT=3000\nAPI_KEY=a1b2c3\n")]);
        run(cli(&temp, &["plan", "--env", "dev"])).await.unwrap();
        assert!(fs::read_dir(temp.path().join(".varsafe/plans")).unwrap().count() >= 2);

        run(cli(&temp, &["apply", "--env", "dev"])).await.unwrap();
        assert_eq!(
            remote_value(&temp, "PORT", "dev", &Scope::Shared).await.as_deref(),
            Some("3000")
        );
        assert_eq!(
            remote_value(&temp, "API_KEY", "dev", &Scope::Shared).await.as_deref(),
            Some("a1b2c3")
        );
    }

    #[tokio::test]
    async fn apply_without_a_plan_is_an_error() {
        let temp = workspace(&[("dev.env", "PORT=3000\n")]);
        let err = run(cli(&temp, &["apply", "--env", "dev"])).await.unwrap_err();
        assert!(matches!(err, AppError::Plan(PlanError::NotFound { .. })));
    }

    #[tokio::test]
    async fn production_apply_needs_force() {
        let temp = workspace(&[("prd.env", "PORT=3000\n")]);
        run(cli(&temp, &["plan", "--env", "prd"])).await.unwrap();
        let err = run(cli(&temp, &["apply", "--env", "prd"])).await.unwrap_err();
        assert!(matches!(err, AppError::Refused { .. }));
        assert!(remote_value(&temp, "PORT", "prd", &Scope::Shared).await.is_none());
    }

    #[tokio::test]
    async fn check_fails_when_blocked_and_relaxes_with_flag() {
        let temp = workspace(&[("dev.env", "PORT=3000\nTOKEN=CHANGEME\n")]);
        let err = run(cli(&temp, &["--guardrails", "strict", "check", "--env", "dev"]))
            .await
            .unwrap_err();
        match err {
            AppError::Blocked(reason) => assert!(reason.contains("placeholder")),
            other => panic!("unexpected error: {other}"),
        }
        run(cli(&temp, &["--guardrails", "warn", "check", "--env", "dev"]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sync_push_then_promote() {
        let temp = workspace(&[("services/api/dev.env", "WORKERS=4\n")]);
        run(cli(&temp, &["sync", "push", "--env", "dev", "--service", "api"]))
            .await
            .unwrap();
        let api = Scope::Service("api".into());
        assert_eq!(
            remote_value(&temp, "WORKERS", "dev", &api).await.as_deref(),
            Some("4")
        );

        run(cli(
            &temp,
            &["--format", "json", "promote", "--key", "WORKERS", "--env", "dev", "--service", "api"],
        ))
        .await
        .unwrap();
        assert!(remote_value(&temp, "WORKERS", "dev", &api).await.is_none());
        assert_eq!(
            remote_value(&temp, "WORKERS", "dev", &Scope::Shared).await.as_deref(),
            Some("4")
        );
    }

    #[tokio::test]
    async fn missing_project_is_reported() {
        let temp = TempDir::new().unwrap();
        let err = run(cli(&temp, &["check", "--env", "dev"])).await.unwrap_err();
        assert!(matches!(err, AppError::MissingProject));
    }

    #[test]
    fn plan_view_masks_sensitive_values() {
        let mut plan = Plan {
            id: "shop-dev-20260101T000000Z".into(),
            project: "shop".into(),
            environment: "dev".into(),
            scope: None,
            prune: false,
            status: PlanStatus::Planned,
            generated_at: Utc::now(),
            applied_at: None,
            changes: Vec::new(),
            summary: Default::default(),
            scorecard: varsafe_core::Scorecard::summarize(
                &GovernanceResult::default(),
                &Default::default(),
            ),
        };
        plan.changes.push(varsafe_core::PlanChange::add(
            "API_KEY",
            Scope::Shared,
            true,
            "a1b2c3".into(),
        ));
        let view = PlanView::from(&PlanOutcome {
            plan,
            governance: GovernanceResult::default(),
            artifacts: None,
        });
        let text = view.display();
        assert!(text.contains("a1****c3"));
        assert!(!text.contains("a1b2c3"));
    }
}
