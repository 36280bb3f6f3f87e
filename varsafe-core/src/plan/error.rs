use std::path::PathBuf;

use thiserror::Error;

use crate::local::LocalError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("local state error: {0}")]
    Local(#[from] LocalError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no plan found for {project}/{environment}")]
    NotFound {
        project: String,
        environment: String,
    },
    #[error("plan {plan_id} is stale: local state changed after it was generated")]
    Stale { plan_id: String },
    #[error("plan {plan_id} no longer matches current state: {detail}")]
    Diverged { plan_id: String, detail: String },
    #[error("plan {plan_id} in unexpected status: {status}")]
    InvalidStatus { plan_id: String, status: String },
}

impl PlanError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type PlanResult<T> = std::result::Result<T, PlanError>;
