//! Task orchestration engine with validation, pipeline resolution, a priority
//! queue, retrying stage execution and status tracking.
//!
//! Implements the Orchestrator-Workers pattern: submitted task descriptors are
//! validated and resolved into an ordered pipeline of assistants, queued by
//! priority, and driven stage by stage by a bounded pool of workers under a
//! per-stage watchdog with exponential-backoff retries.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Top-level engine: submission, worker pool, cancellation, status.
//! - [`AssistantRegistry`]: Capability-indexed registry with copy-on-write snapshots.
//! - [`TaskQueue`]: Priority queue, FIFO within a tier.
//! - [`StageExecutor`]: Runs one stage with watchdog, retry and cancellation.
//! - [`StatusTracker`]: Single source of truth for task status.
//! - [`AssistantMonitor`]: Tracks in-flight invocations and per-assistant metrics.
//! - [`TaskStore`]: Durable home for terminal tasks ([`FileTaskStore`], [`MemoryTaskStore`]).

/// Orchestrator configuration and retry policy.
pub mod config;
/// Orchestration engine and worker pool.
pub mod engine;
/// Per-stage execution with watchdog, retry and cancellation.
pub mod executor;
/// Assistant health and metrics monitoring.
pub mod monitor;
/// Assistant registry and pipeline definitions.
pub mod registry;
/// Pipeline resolution.
pub mod resolver;
/// Task persistence.
pub mod store;
/// Priority task queue.
pub mod task_queue;
/// Task status tracking.
pub mod tracker;
/// Shared orchestration types (Task, TaskStatus, StageResult, etc.).
pub mod types;
/// Task descriptor validation.
pub mod validator;

pub use config::{OrchestratorConfig, RetryPolicy};
pub use engine::{AssistantStatus, Orchestrator, SystemStatus};
pub use executor::{StageExecutor, StageOutcome};
pub use monitor::{AssistantMetrics, AssistantMonitor, AssistantState, WorkerStatus};
pub use registry::{
    AssistantRegistry, PipelineDefinition, PipelineStage, RegisteredAssistant, RegistrySnapshot,
};
pub use store::{FileTaskStore, MemoryTaskStore, TaskStore};
pub use task_queue::TaskQueue;
pub use tracker::StatusTracker;
pub use types::{
    AttemptOutcome, FeedbackRecord, Priority, StageResult, Task, TaskFeedback, TaskReport,
    TaskStatus, CODE_GENERATION, FULL_PIPELINE, PERFORMANCE_OPTIMIZATION, SYNTAX_CHECK,
};
pub use validator::{ExecutionPreferences, TaskDescriptor, TaskValidator};
