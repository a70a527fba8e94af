use chrono::{DateTime, Utc};
use orrery_core::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Well-known task type: generate a code skeleton from requirements.
pub const CODE_GENERATION: &str = "code_generation";
/// Well-known task type: detect and repair syntax errors.
pub const SYNTAX_CHECK: &str = "syntax_check";
/// Well-known task type: analyze and optimize performance.
pub const PERFORMANCE_OPTIMIZATION: &str = "performance_optimization";
/// Composite task type: generation, then correctness, then optimization.
pub const FULL_PIPELINE: &str = "full_pipeline";

/// Scheduling tier of a task. Higher tiers always dequeue first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Lifecycle state of a task.
///
/// `Pending → Running → {Succeeded, Failed, TimedOut, Cancelled}`, with
/// `Running ⇄ Retrying` while a stage still has retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Retrying,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::TimedOut,
        TaskStatus::Cancelled,
    ];

    /// Terminal states are final for a task instance.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::TimedOut | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(next, Running | Cancelled | Failed),
            Running => matches!(next, Retrying | Succeeded | Failed | TimedOut | Cancelled),
            Retrying => matches!(next, Running | Failed | TimedOut | Cancelled),
            Succeeded | Failed | TimedOut | Cancelled => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How a single stage attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

/// One entry per stage attempt, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Assistant name of the stage.
    pub stage: String,
    /// 1-based attempt number within the stage.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// Feedback about a task, routed to the assistants it names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFeedback {
    /// Payload per assistant name.
    #[serde(default)]
    pub assistant_feedback: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Feedback as stored on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub received_at: DateTime<Utc>,
    pub feedback: TaskFeedback,
}

/// A task as tracked by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub requirements: JsonObject,
    #[serde(default)]
    pub specifications: JsonObject,
    #[serde(default)]
    pub parameters: JsonObject,
    /// Explicit stage order requested by the submitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_order: Option<Vec<String>>,
    /// Stage list produced by the pipeline resolver.
    #[serde(default)]
    pub pipeline: Vec<String>,
    pub priority: Priority,
    /// Per-stage time budget; zero disables the watchdog.
    pub timeout_secs: u64,
    /// Additional attempts allowed per stage.
    pub max_retries: u32,
    pub parallel_execution: bool,
    pub status: TaskStatus,
    #[serde(default)]
    pub stage_results: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Output of the final stage on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub feedback: Vec<FeedbackRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending task with default policy (normal priority, 300s, 3 retries).
    pub fn new(id: impl Into<String>, task_type: impl Into<String>, requirements: JsonObject) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            task_type: task_type.into(),
            requirements,
            specifications: JsonObject::new(),
            parameters: JsonObject::new(),
            pipeline_order: None,
            pipeline: Vec::new(),
            priority: Priority::Normal,
            timeout_secs: 300,
            max_retries: 3,
            parallel_execution: true,
            status: TaskStatus::Pending,
            stage_results: Vec::new(),
            error: None,
            output: None,
            feedback: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_pipeline_order(mut self, order: Vec<String>) -> Self {
        self.pipeline_order = Some(order);
        self
    }

    pub fn with_policy(mut self, timeout_secs: u64, max_retries: u32) -> Self {
        self.timeout_secs = timeout_secs;
        self.max_retries = max_retries;
        self
    }

    /// The per-stage watchdog budget, or `None` when disabled.
    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Number of recorded attempts for the named stage.
    pub fn attempts_for(&self, stage: &str) -> usize {
        self.stage_results.iter().filter(|r| r.stage == stage).count()
    }

    /// Status-query view of this task.
    pub fn report(&self) -> TaskReport {
        TaskReport {
            task_id: self.id.clone(),
            task_type: self.task_type.clone(),
            status: self.status,
            pipeline: self.pipeline.clone(),
            stage_results: self.stage_results.clone(),
            error: self.error.clone(),
            output: self.output.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub pipeline: Vec<String>,
    pub stage_results: Vec<StageResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
