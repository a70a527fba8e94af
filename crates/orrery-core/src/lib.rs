//! Core types and error definitions for the Orrery orchestration core.
//!
//! This crate provides the foundational types shared across all Orrery crates:
//! the error taxonomy, the uniform assistant collaborator contract, and the
//! context handed to an assistant for each stage invocation.
//!
//! # Main types
//!
//! - [`OrreryError`]: Unified error enum for intake, registry, execution and storage.
//! - [`OrreryResult`]: Convenience alias for `Result<T, OrreryError>`.
//! - [`Assistant`]: The single-operation contract every capability provider implements.
//! - [`AssistantContext`]: Accumulated task context passed to one stage attempt.
//! - [`StageOutput`]: Output recorded by a completed stage.

/// Assistant collaborator contract and stage context.
pub mod assistant;

pub use assistant::{Assistant, AssistantContext, JsonObject, StageOutput};
pub use tokio_util::sync::CancellationToken;

// --- Error types ---

/// Top-level error type for the Orrery orchestration core.
///
/// Intake and registry errors are returned synchronously to the submitter.
/// Stage-level errors are produced inside the stage executor and surface only
/// once a stage's retry budget is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum OrreryError {
    /// A task descriptor was malformed; the task never enters the queue.
    #[error("Validation error on `{field}`: {reason}")]
    Validation {
        /// Descriptor field that failed validation.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// No registered assistant covers a stage the task requires.
    #[error("Unresolvable pipeline for task type '{task_type}': {reason}")]
    UnresolvablePipeline {
        /// Task type being resolved.
        task_type: String,
        /// Which stage could not be covered, and why.
        reason: String,
    },

    /// A lookup named an assistant that is not registered.
    #[error("Unknown assistant: {0}")]
    UnknownAssistant(String),

    /// Registration reused a name that is already taken.
    #[error("Assistant already registered: {0}")]
    DuplicateAssistant(String),

    /// A bounded task queue is full.
    #[error("Task queue saturated (capacity: {capacity})")]
    QueueSaturated {
        /// Configured queue bound.
        capacity: usize,
    },

    /// The collaborator returned an error during a stage attempt.
    #[error("Stage '{stage}' failed on attempt {attempt}: {reason}")]
    StageFailure {
        /// Assistant name of the stage.
        stage: String,
        /// 1-based attempt number.
        attempt: u32,
        /// Collaborator error text.
        reason: String,
    },

    /// The watchdog ended a stage attempt.
    #[error("Stage '{stage}' timed out after {timeout_secs}s on attempt {attempt}")]
    StageTimeout {
        /// Assistant name of the stage.
        stage: String,
        /// 1-based attempt number.
        attempt: u32,
        /// Per-stage time budget.
        timeout_secs: u64,
    },

    /// A stage used up its retry budget.
    #[error("Stage '{stage}' exhausted its retry budget after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Assistant name of the stage.
        stage: String,
        /// Attempts made, including the first.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },

    /// An external cancellation request was honored.
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// A status query named a task the tracker has never seen.
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// A status change would move a task backwards or out of a terminal state.
    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task whose transition was refused.
        task_id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// The orchestrator no longer accepts work.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// Free-form error raised by an assistant implementation.
    #[error("Assistant error: {0}")]
    Assistant(String),

    /// An error from a task store collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrreryError {
    /// Builds a [`OrreryError::Validation`] for the given field.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Builds a [`OrreryError::UnresolvablePipeline`].
    pub fn unresolvable(task_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnresolvablePipeline {
            task_type: task_type.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error is rejected at submission time (never queued, never retried).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnresolvablePipeline { .. }
                | Self::QueueSaturated { .. }
                | Self::ShuttingDown
        )
    }
}

/// A convenience `Result` alias using [`OrreryError`].
pub type OrreryResult<T> = Result<T, OrreryError>;
