//! Per-identity outcomes and the run report.

use crate::clients::Identity;
use crate::error::RotationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStatus {
    Created,
    Rotated,
    Failed,
    Cancelled,
}

impl RotationStatus {
    pub fn is_success(self) -> bool {
        matches!(self, RotationStatus::Created | RotationStatus::Rotated)
    }
}

impl fmt::Display for RotationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RotationStatus::Created => "created",
            RotationStatus::Rotated => "rotated",
            RotationStatus::Failed => "failed",
            RotationStatus::Cancelled => "cancelled",
        })
    }
}

/// Reconciler step at which an identity failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStage {
    Lookup,
    Create,
    Rotate,
    ConvergenceTimeout,
    Readback,
    Propagate,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureStage::Lookup => "lookup",
            FailureStage::Create => "create",
            FailureStage::Rotate => "rotate",
            FailureStage::ConvergenceTimeout => "convergence-timeout",
            FailureStage::Readback => "readback",
            FailureStage::Propagate => "propagate",
        })
    }
}

/// Final result for one identity in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOutcome {
    pub identity: Identity,
    pub status: RotationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_stage: Option<FailureStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when the failure poisons the rest of the run.
    #[serde(skip)]
    pub run_fatal: bool,
}

impl RotationOutcome {
    pub fn success(identity: Identity, status: RotationStatus) -> Self {
        Self {
            identity,
            status,
            failure_stage: None,
            error: None,
            run_fatal: false,
        }
    }

    pub fn failed(identity: Identity, stage: FailureStage, error: &RotationError) -> Self {
        Self {
            identity,
            status: RotationStatus::Failed,
            failure_stage: Some(stage),
            error: Some(error.to_string()),
            run_fatal: error.is_run_fatal(),
        }
    }

    /// Failed outside any reconciler stage, e.g. the task panicked.
    pub fn aborted(identity: Identity, reason: impl Into<String>) -> Self {
        Self {
            identity,
            status: RotationStatus::Failed,
            failure_stage: None,
            error: Some(reason.into()),
            run_fatal: false,
        }
    }

    pub fn cancelled(identity: Identity) -> Self {
        Self {
            identity,
            status: RotationStatus::Cancelled,
            failure_stage: None,
            error: None,
            run_fatal: false,
        }
    }

    /// One human-readable line: `id  email  status  [stage: error]`,
    /// tab separated.
    pub fn to_line(&self) -> String {
        let mut line = format!("{}\t{}\t{}", self.identity.id, self.identity.email, self.status);
        let detail = match (self.failure_stage, self.error.as_deref()) {
            (Some(stage), Some(error)) => Some(format!("{stage}: {error}")),
            (Some(stage), None) => Some(stage.to_string()),
            (None, Some(error)) => Some(error.to_string()),
            (None, None) => None,
        };
        if let Some(detail) = detail {
            line.push_str(&format!("\t[{detail}]"));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub created: usize,
    pub rotated: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Output of one run: every identity's outcome, in group listing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<RotationOutcome>,
}

impl RunReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, outcomes: Vec<RotationOutcome>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.outcomes.len(),
            ..RunSummary::default()
        };
        for outcome in &self.outcomes {
            match outcome.status {
                RotationStatus::Created => summary.created += 1,
                RotationStatus::Rotated => summary.rotated += 1,
                RotationStatus::Failed => summary.failed += 1,
                RotationStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.status.is_success())
    }

    pub fn outcome_for(&self, identity_id: &str) -> Option<&RotationOutcome> {
        self.outcomes.iter().find(|o| o.identity.id == identity_id)
    }

    /// Tab-separated lines followed by a summary line.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for outcome in &self.outcomes {
            out.push_str(&outcome.to_line());
            out.push('\n');
        }
        let s = self.summary();
        out.push_str(&format!(
            "run {}: {} identities, {} created, {} rotated, {} failed, {} cancelled\n",
            self.run_id, s.total, s.created, s.rotated, s.failed, s.cancelled
        ));
        out
    }

    /// One JSON object per outcome, then one summary object.
    pub fn render_json_lines(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for outcome in &self.outcomes {
            out.push_str(&serde_json::to_string(outcome)?);
            out.push('\n');
        }
        out.push_str(&serde_json::to_string(&serde_json::json!({
            "runId": self.run_id,
            "startedAt": self.started_at,
            "finishedAt": self.finished_at,
            "summary": self.summary(),
        }))?);
        out.push('\n');
        Ok(out)
    }
}
