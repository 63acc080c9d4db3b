//! Task and pipeline status types.
//!
//! A task is one unit of work: a module invocation plus gating, looping and
//! registration metadata, targeted at a list of hosts. Task status is
//! created per invocation and folded into the pipeline status, which
//! accumulates monotonically across the run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default wall-clock bound for one task across all of its hosts.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The module invocation embedded in a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Registry name of the module.
    pub name: String,
    /// Opaque module arguments; the executor never interprets them.
    #[serde(default)]
    pub args: Value,
}

/// One unit of work against a set of hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id of this invocation.
    pub id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Concrete target hosts (already resolved from patterns).
    pub hosts: Vec<String>,
    /// The module to dispatch.
    pub module: ModuleSpec,
    /// Gating conditions; all must hold or the host is skipped.
    #[serde(default)]
    pub when: Vec<String>,
    /// Conditions that mark a host failed before dispatch.
    #[serde(default)]
    pub failed_when: Vec<String>,
    /// Raw loop declaration (literal sequence or templated string).
    #[serde(default, rename = "loop")]
    pub loop_: Option<Value>,
    /// Runtime variable name receiving `{stdout, stderr}` after execution.
    #[serde(default)]
    pub register: Option<String>,
    /// When set, failures downgrade the task to Ignored.
    #[serde(default)]
    pub ignore_error: Option<bool>,
}

impl Task {
    /// Create a task for a module invocation.
    pub fn new(name: impl Into<String>, hosts: Vec<String>, module: ModuleSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            hosts,
            module,
            when: Vec::new(),
            failed_when: Vec::new(),
            loop_: None,
            register: None,
            ignore_error: None,
        }
    }

    /// Whether per-host failures downgrade to Ignored instead of Failed.
    pub fn tolerates_errors(&self) -> bool {
        self.ignore_error.unwrap_or(false)
    }
}

/// Phase of a task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    /// Per-host units are in flight.
    Running,
    /// No host reported stderr.
    Success,
    /// At least one host failed but the task tolerates errors.
    Ignored,
    /// At least one host failed.
    Failed,
}

/// Outcome of one host's evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskHostResult {
    /// The host this result belongs to.
    pub host: String,
    /// Captured standard output (or the skip marker).
    pub stdout: String,
    /// Captured standard error; non-empty means the host failed.
    pub stderr: String,
}

/// Status of one task invocation, discarded after folding into the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Aggregate phase across hosts.
    pub phase: TaskPhase,
    /// Per-host outcomes, indexed in task host order.
    pub host_results: Vec<TaskHostResult>,
}

impl TaskStatus {
    /// A running status with one pre-sized slot per host.
    pub fn running(host_count: usize) -> Self {
        Self {
            phase: TaskPhase::Running,
            host_results: vec![TaskHostResult::default(); host_count],
        }
    }

    /// Whether the task ended in the failed phase.
    pub fn is_failed(&self) -> bool {
        self.phase == TaskPhase::Failed
    }
}

/// Monotonic task counters for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultCounters {
    /// Tasks executed.
    pub total: usize,
    /// Tasks that succeeded on every host.
    pub success: usize,
    /// Tasks with tolerated failures.
    pub ignored: usize,
    /// Tasks that failed.
    pub failed: usize,
}

/// Structured record of one failed task for post-run inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDetail {
    /// Name of the failed task.
    pub task: String,
    /// Per-host stdout/stderr at the time of failure.
    pub hosts: Vec<TaskHostResult>,
}

/// Phase of the whole pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    /// Not started yet.
    Pending,
    /// Plays are executing.
    Running,
    /// All plays completed without failure.
    Succeeded,
    /// A task failed and halted execution.
    Failed,
}

/// Accumulated pipeline state: counters plus a structured failure log, kept
/// so a completed-but-failed run remains fully inspectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Current phase.
    pub phase: PipelinePhase,
    /// Task counters.
    pub task_result: TaskResultCounters,
    /// One entry per failed task.
    pub failed_detail: Vec<FailedDetail>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            phase: PipelinePhase::Pending,
            task_result: TaskResultCounters::default(),
            failed_detail: Vec::new(),
        }
    }
}

impl PipelineStatus {
    /// One-line run summary for the CLI.
    pub fn summary(&self) -> String {
        format!(
            "total: {} success: {} ignored: {} failed: {}",
            self.task_result.total,
            self.task_result.success,
            self.task_result.ignored,
            self.task_result.failed
        )
    }
}
