use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::fsutil::atomic_write;
use crate::local::LocalStateDir;

use super::mask::mask_plan;
use super::models::{ChangeAction, Plan};
use super::planner::sanitize;
use super::{PlanError, PlanResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PlanArtifactStore {
    dir: PathBuf,
}

impl PlanArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self, plan_id: &str) -> ArtifactPaths {
        ArtifactPaths {
            json: self.dir.join(format!("{plan_id}.json")),
            markdown: self.dir.join(format!("{plan_id}.md")),
        }
    }

    pub fn save(&self, plan: &Plan) -> PlanResult<ArtifactPaths> {
        let masked = mask_plan(plan);
        let paths = self.paths(&plan.id);
        let json = serde_json::to_vec_pretty(&masked)?;
        atomic_write(&paths.json, &json).map_err(|err| PlanError::io(err, &paths.json))?;
        atomic_write(&paths.markdown, render_markdown(&masked).as_bytes())
            .map_err(|err| PlanError::io(err, &paths.markdown))?;
        debug!(plan_id = %plan.id, path = %paths.json.display(), "plan artifact written");
        Ok(paths)
    }

    pub fn update(&self, plan: &Plan) -> PlanResult<ArtifactPaths> {
        self.save(plan)
    }

    pub fn load(&self, plan_id: &str) -> PlanResult<Plan> {
        let path = self.paths(plan_id).json;
        let raw = fs::read_to_string(&path).map_err(|err| PlanError::io(err, &path))?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn latest(&self, project: &str, environment: &str) -> PlanResult<Option<Plan>> {
        let prefix = sanitize(&format!("{project}-{environment}-"));
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PlanError::io(err, &self.dir)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| PlanError::io(err, &self.dir))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(id) = name.strip_suffix(".json") {
                if id.starts_with(&prefix) {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort();

        // A shorter project/environment pair can share the prefix; check the body.
        for id in ids.into_iter().rev() {
            let plan = self.load(&id)?;
            if plan.project == project && plan.environment == environment {
                return Ok(Some(plan));
            }
        }
        Ok(None)
    }

    /// Stale when the provenance log was touched after the plan was generated.
    pub fn is_stale(&self, plan: &Plan, local: &LocalStateDir) -> PlanResult<bool> {
        match local.provenance_modified()? {
            None => Ok(false),
            Some(modified) => Ok(DateTime::<Utc>::from(modified) > plan.generated_at),
        }
    }
}

pub fn render_markdown(plan: &Plan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Plan {}", plan.id);
    let _ = writeln!(out);
    let _ = writeln!(out, "- project: {}", plan.project);
    let _ = writeln!(out, "- environment: {}", plan.environment);
    if let Some(scope) = &plan.scope {
        let _ = writeln!(out, "- scope: {scope}");
    }
    let _ = writeln!(out, "- status: {}", plan.status);
    let _ = writeln!(out, "- generated: {}", plan.generated_at.to_rfc3339());
    if let Some(applied) = plan.applied_at {
        let _ = writeln!(out, "- applied: {}", applied.to_rfc3339());
    }
    let _ = writeln!(out, "- health: {}", plan.scorecard.health);
    let _ = writeln!(out);
    let summary = &plan.summary;
    let _ = writeln!(
        out,
        "{} to add, {} to update, {} to delete, {} unchanged, {} drifted",
        summary.to_add, summary.to_update, summary.to_delete, summary.unchanged, summary.conflicts
    );

    if !plan.changes.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Changes");
        let _ = writeln!(out);
        for change in &plan.changes {
            let detail = match change.action {
                ChangeAction::Add => change.local_value.clone().unwrap_or_default(),
                ChangeAction::Update => format!(
                    "{} -> {}",
                    change.remote_value.as_deref().unwrap_or_default(),
                    change.local_value.as_deref().unwrap_or_default()
                ),
                ChangeAction::Delete => change.remote_value.clone().unwrap_or_default(),
            };
            let _ = writeln!(
                out,
                "- `{} {}@{}` {}",
                change.action.symbol(),
                change.key,
                change.scope,
                detail
            );
        }
    }

    if !plan.scorecard.issues.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Issues");
        let _ = writeln!(out);
        for issue in &plan.scorecard.issues {
            let _ = writeln!(out, "- {issue}");
        }
    }
    out
}
