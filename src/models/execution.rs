//! Execution-fact vocabulary and aggregate row shapes.
//!
//! The `executions` table is written by the external ingestion pipeline and
//! is strictly read-only here; this service only ever filters it by status
//! and decodes aggregate results, so the status vocabulary and the two
//! aggregate row structs are all that lives in this module.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a single agent execution. The wire/storage form is
/// lowercase; `as_str` is what the aggregate scans bind into their filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Error,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome counts for a workspace window, decoded straight from one
/// aggregate query.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct OutcomeCounts {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Average duration over a window. `avg_secs` is NULL (not zero) when no
/// execution in the window carried a duration.
#[derive(Debug, Clone, Copy, Default, sqlx::FromRow)]
pub struct DurationStats {
    pub avg_secs: Option<f64>,
    pub samples: i64,
}
