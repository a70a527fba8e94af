use crate::config::RetryPolicy;
use crate::monitor::AssistantMonitor;
use crate::tracker::StatusTracker;
use crate::types::{AttemptOutcome, StageResult, Task, TaskStatus};
use chrono::Utc;
use orrery_core::{
    Assistant, AssistantContext, CancellationToken, OrreryError, OrreryResult, StageOutput,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How a stage ended once its retry loop is over.
#[derive(Debug)]
pub enum StageOutcome {
    /// Output of the successful attempt.
    Succeeded(Value),
    /// Retry budget exhausted; the last attempt returned an error.
    Failed(OrreryError),
    /// Retry budget exhausted; the last attempt was ended by the watchdog.
    TimedOut(OrreryError),
    /// The task's cancellation token fired.
    Cancelled,
}

/// Result of a single invocation.
enum Attempt {
    Succeeded(Value),
    Failed(OrreryError),
    TimedOut(OrreryError),
    Cancelled,
}

impl Attempt {
    fn outcome(&self) -> AttemptOutcome {
        match self {
            Attempt::Succeeded(_) => AttemptOutcome::Succeeded,
            Attempt::Failed(_) => AttemptOutcome::Failed,
            Attempt::TimedOut(_) => AttemptOutcome::TimedOut,
            Attempt::Cancelled => AttemptOutcome::Cancelled,
        }
    }
}

/// Runs one pipeline stage with watchdog, retry and cancellation.
///
/// Every attempt is appended to the task's `stage_results` and reported to
/// the [`AssistantMonitor`]. Between attempts the task sits in
/// [`TaskStatus::Retrying`] for the backoff delay.
pub struct StageExecutor {
    retry: RetryPolicy,
    cancel_grace: Duration,
    tracker: Arc<StatusTracker>,
    monitor: Arc<AssistantMonitor>,
}

impl StageExecutor {
    pub fn new(
        retry: RetryPolicy,
        cancel_grace: Duration,
        tracker: Arc<StatusTracker>,
        monitor: Arc<AssistantMonitor>,
    ) -> Self {
        Self {
            retry,
            cancel_grace,
            tracker,
            monitor,
        }
    }

    /// Executes `stage` of `task` until it succeeds, the retry budget runs
    /// out, or `cancel` fires. `previous` holds the outputs of earlier stages.
    pub async fn run_stage(
        &self,
        task: &Task,
        stage: &str,
        assistant: &dyn Assistant,
        previous: &[StageOutput],
        cancel: &CancellationToken,
    ) -> OrreryResult<StageOutcome> {
        let max_attempts = task.max_retries.saturating_add(1);
        let timeout = task.stage_timeout();
        let mut last: Option<(AttemptOutcome, OrreryError)> = None;

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Ok(StageOutcome::Cancelled);
            }

            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                self.tracker
                    .transition(&task.id, TaskStatus::Retrying)
                    .await?;
                info!(
                    task_id = %task.id,
                    stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(StageOutcome::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                self.tracker.transition(&task.id, TaskStatus::Running).await?;
            }

            let context = AssistantContext {
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                stage: stage.to_string(),
                attempt,
                requirements: task.requirements.clone(),
                specifications: task.specifications.clone(),
                parameters: task.parameters.clone(),
                previous: previous.to_vec(),
            };

            debug!(task_id = %task.id, stage, attempt, "Invoking assistant");
            let started_at = Utc::now();
            self.monitor.start_invocation(stage, &task.id).await;
            let (result, elapsed) = self
                .invoke(assistant, &context, timeout, task.timeout_secs, cancel)
                .await;
            let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
            let outcome = result.outcome();
            self.monitor
                .finish_invocation(stage, outcome, duration_ms)
                .await;

            let (output, error) = match &result {
                Attempt::Succeeded(value) => (Some(value.clone()), None),
                Attempt::Failed(e) | Attempt::TimedOut(e) => (None, Some(e.to_string())),
                Attempt::Cancelled => (None, Some("cancelled".to_string())),
            };
            self.tracker
                .record_attempt(
                    &task.id,
                    StageResult {
                        stage: stage.to_string(),
                        attempt,
                        outcome,
                        output,
                        error,
                        duration_ms,
                        started_at,
                    },
                )
                .await?;

            match result {
                Attempt::Succeeded(value) => {
                    info!(task_id = %task.id, stage, attempt, duration_ms, "Stage completed");
                    return Ok(StageOutcome::Succeeded(value));
                }
                Attempt::Cancelled => {
                    info!(task_id = %task.id, stage, attempt, "Stage cancelled");
                    return Ok(StageOutcome::Cancelled);
                }
                Attempt::Failed(e) => {
                    warn!(task_id = %task.id, stage, attempt, error = %e, "Stage attempt failed");
                    last = Some((AttemptOutcome::Failed, e));
                }
                Attempt::TimedOut(e) => {
                    warn!(task_id = %task.id, stage, attempt, error = %e, "Stage attempt timed out");
                    last = Some((AttemptOutcome::TimedOut, e));
                }
            }
        }

        let (last_outcome, last_error) = match last {
            Some((outcome, e)) => (outcome, e.to_string()),
            None => (AttemptOutcome::Failed, "no attempt was made".to_string()),
        };
        let exhausted = OrreryError::RetryExhausted {
            stage: stage.to_string(),
            attempts: max_attempts,
            last_error,
        };
        warn!(task_id = %task.id, stage, attempts = max_attempts, "Retry budget exhausted");

        Ok(match last_outcome {
            AttemptOutcome::TimedOut => StageOutcome::TimedOut(exhausted),
            _ => StageOutcome::Failed(exhausted),
        })
    }

    /// One invocation raced against the watchdog and the task's cancellation.
    ///
    /// When either fires first the attempt's own token is cancelled and the
    /// call gets `cancel_grace` to unwind before it is dropped. The returned
    /// duration stops when the race is decided and excludes the grace period.
    async fn invoke(
        &self,
        assistant: &dyn Assistant,
        context: &AssistantContext,
        timeout: Option<Duration>,
        timeout_secs: u64,
        cancel: &CancellationToken,
    ) -> (Attempt, Duration) {
        let attempt_token = cancel.child_token();
        let clock = Instant::now();
        let mut call = assistant.process_task(context, attempt_token.clone());
        let watchdog = async {
            match timeout {
                Some(budget) => tokio::time::sleep(budget).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(watchdog);

        let (attempt, returned) = tokio::select! {
            biased;
            result = &mut call => {
                let attempt = match result {
                    Ok(value) => Attempt::Succeeded(value),
                    Err(_) if cancel.is_cancelled() => Attempt::Cancelled,
                    Err(e) => Attempt::Failed(OrreryError::StageFailure {
                        stage: context.stage.clone(),
                        attempt: context.attempt,
                        reason: e.to_string(),
                    }),
                };
                (attempt, true)
            }
            _ = cancel.cancelled() => (Attempt::Cancelled, false),
            _ = &mut watchdog => (
                Attempt::TimedOut(OrreryError::StageTimeout {
                    stage: context.stage.clone(),
                    attempt: context.attempt,
                    timeout_secs,
                }),
                false,
            ),
        };
        let elapsed = clock.elapsed();

        if !returned {
            attempt_token.cancel();
            if tokio::time::timeout(self.cancel_grace, &mut call)
                .await
                .is_err()
            {
                warn!(
                    task_id = %context.task_id,
                    stage = %context.stage,
                    grace_ms = self.cancel_grace.as_millis() as u64,
                    "Assistant did not unwind within the grace period"
                );
            }
        }
        (attempt, elapsed)
    }
}
