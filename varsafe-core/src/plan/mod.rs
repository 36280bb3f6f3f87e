pub mod applier;
pub mod diff;
pub mod error;
pub mod mask;
pub mod models;
pub mod planner;
pub mod scorecard;
pub mod store;

pub use applier::{Applier, ApplyFailure, ApplyOptions, ApplyReport};
pub use diff::{diff_variables, Diff};
pub use error::{PlanError, PlanResult};
pub use mask::{mask_plan, mask_value};
pub use models::{ChangeAction, Plan, PlanChange, PlanStatus, PlanSummary};
pub use planner::{plan_id, PlanOutcome, PlanRequest, Planner};
pub use scorecard::{Health, Scorecard};
pub use store::{render_markdown, ArtifactPaths, PlanArtifactStore};
