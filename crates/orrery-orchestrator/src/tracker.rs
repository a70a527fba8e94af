use crate::store::TaskStore;
use crate::types::{
    AttemptOutcome, FeedbackRecord, StageResult, Task, TaskFeedback, TaskReport, TaskStatus,
};
use chrono::{DateTime, Utc};
use orrery_core::{OrreryError, OrreryResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

#[derive(Default)]
struct TrackerState {
    tasks: HashMap<String, Task>,
    /// Ids evicted from memory while no store is configured. They stay
    /// reserved so they cannot be reused, and this set is never pruned.
    /// With a store, the stored record reserves the id instead.
    retired: HashSet<String>,
}

/// Single source of truth for task status.
///
/// Every status change goes through [`TaskStatus::can_transition_to`], so a
/// terminal task can never move again. Terminal tasks are written through to
/// the configured [`TaskStore`] and can be evicted from memory later.
pub struct StatusTracker {
    state: RwLock<TrackerState>,
    store: Option<Arc<dyn TaskStore>>,
    changed: Notify,
}

impl StatusTracker {
    pub fn new(store: Option<Arc<dyn TaskStore>>) -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            store,
            changed: Notify::new(),
        }
    }

    /// Starts tracking a freshly validated task.
    pub async fn insert(&self, task: Task) -> OrreryResult<()> {
        if let Some(store) = &self.store {
            if store.load(&task.id).await?.is_some() {
                return Err(duplicate(&task.id));
            }
        }
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) || state.retired.contains(&task.id) {
            return Err(duplicate(&task.id));
        }
        debug!(task_id = %task.id, task_type = %task.task_type, "Tracking task");
        state.tasks.insert(task.id.clone(), task);
        drop(state);
        self.changed.notify_waiters();
        Ok(())
    }

    /// Drops a task that never made it into the queue.
    pub async fn remove(&self, task_id: &str) -> Option<Task> {
        let removed = self.state.write().await.tasks.remove(task_id);
        self.changed.notify_waiters();
        removed
    }

    /// Whether an id is tracked in memory or reserved by an evicted task.
    pub async fn contains(&self, task_id: &str) -> bool {
        let state = self.state.read().await;
        state.tasks.contains_key(task_id) || state.retired.contains(task_id)
    }

    /// Atomically moves a pending task to `Running`. Returns `false` if the
    /// task is gone or was cancelled while queued.
    pub async fn claim(&self, task_id: &str) -> bool {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(task_id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                task.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Applies a non-terminal status change.
    pub async fn transition(&self, task_id: &str, to: TaskStatus) -> OrreryResult<()> {
        {
            let mut state = self.state.write().await;
            let task = tracked_mut(&mut state, task_id)?;
            check_transition(task, to)?;
            task.status = to;
            task.updated_at = Utc::now();
        }
        self.changed.notify_waiters();
        Ok(())
    }

    pub async fn set_pipeline(&self, task_id: &str, pipeline: Vec<String>) -> OrreryResult<()> {
        let mut state = self.state.write().await;
        let task = tracked_mut(&mut state, task_id)?;
        task.pipeline = pipeline;
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Appends one attempt entry to the task's audit trail.
    pub async fn record_attempt(&self, task_id: &str, result: StageResult) -> OrreryResult<()> {
        let mut state = self.state.write().await;
        let task = tracked_mut(&mut state, task_id)?;
        if task.status.is_terminal() {
            return Err(OrreryError::InvalidTransition {
                task_id: task_id.to_string(),
                from: task.status.to_string(),
                to: format!("{} attempt {}", result.stage, result.attempt),
            });
        }
        task.stage_results.push(result);
        task.updated_at = Utc::now();
        Ok(())
    }

    /// Moves a task into a terminal state and writes it through to the store.
    pub async fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
        output: Option<Value>,
    ) -> OrreryResult<Task> {
        if !status.is_terminal() {
            return Err(OrreryError::InvalidTransition {
                task_id: task_id.to_string(),
                from: "active".to_string(),
                to: status.to_string(),
            });
        }
        let finished = {
            let mut state = self.state.write().await;
            let task = tracked_mut(&mut state, task_id)?;
            check_transition(task, status)?;
            complete(task, status, error, output)
        };

        self.persist(&finished).await;
        self.changed.notify_waiters();
        Ok(finished)
    }

    /// Cancels a task only while it is still `Pending`, under one lock.
    ///
    /// Returns `Ok(false)` if a worker claimed it first or it already
    /// finished; such a task must be stopped through its token.
    pub async fn cancel_if_pending(&self, task_id: &str, reason: &str) -> OrreryResult<bool> {
        let cancelled = {
            let mut state = self.state.write().await;
            let task = tracked_mut(&mut state, task_id)?;
            if task.status != TaskStatus::Pending {
                return Ok(false);
            }
            complete(task, TaskStatus::Cancelled, Some(reason.to_string()), None)
        };

        self.persist(&cancelled).await;
        self.changed.notify_waiters();
        Ok(true)
    }

    async fn persist(&self, task: &Task) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(task).await {
                warn!(task_id = %task.id, error = %e, "Failed to persist task");
            }
        }
    }

    /// Full task record, from memory or, after eviction, from the store.
    pub async fn get(&self, task_id: &str) -> OrreryResult<Task> {
        if let Some(task) = self.state.read().await.tasks.get(task_id) {
            return Ok(task.clone());
        }
        if let Some(store) = &self.store {
            if let Some(task) = store.load(task_id).await? {
                return Ok(task);
            }
        }
        Err(OrreryError::UnknownTask(task_id.to_string()))
    }

    pub async fn get_status(&self, task_id: &str) -> OrreryResult<TaskReport> {
        self.get(task_id).await.map(|t| t.report())
    }

    /// Records feedback on a task without touching its status.
    pub async fn add_feedback(&self, task_id: &str, feedback: TaskFeedback) -> OrreryResult<Task> {
        let record = FeedbackRecord {
            received_at: Utc::now(),
            feedback,
        };

        let in_memory = {
            let mut state = self.state.write().await;
            state.tasks.get_mut(task_id).map(|task| {
                task.feedback.push(record.clone());
                task.clone()
            })
        };

        let task = match in_memory {
            Some(task) => task,
            None => {
                let store = self
                    .store
                    .as_ref()
                    .ok_or_else(|| OrreryError::UnknownTask(task_id.to_string()))?;
                let mut task = store
                    .load(task_id)
                    .await?
                    .ok_or_else(|| OrreryError::UnknownTask(task_id.to_string()))?;
                task.feedback.push(record);
                task
            }
        };

        if task.status.is_terminal() {
            self.persist(&task).await;
        }
        Ok(task)
    }

    /// Number of in-memory tasks per status; every status is present.
    pub async fn counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts: BTreeMap<TaskStatus, usize> =
            TaskStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        for task in self.state.read().await.tasks.values() {
            *counts.entry(task.status).or_default() += 1;
        }
        counts
    }

    /// Stages still ahead of unfinished tasks, per assistant name.
    pub async fn pending_load(&self) -> HashMap<String, usize> {
        let mut load = HashMap::new();
        for task in self.state.read().await.tasks.values() {
            if task.status.is_terminal() {
                continue;
            }
            for stage in remaining_stages(task) {
                *load.entry(stage.clone()).or_insert(0) += 1;
            }
        }
        load
    }

    /// Tasks that are pending, running or retrying.
    pub async fn active_count(&self) -> usize {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Drops terminal tasks completed before `cutoff` from memory.
    pub async fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.completed_at.is_some_and(|at| at < cutoff))
            .map(|t| t.id.clone())
            .collect();
        let reserve = self.store.is_none();
        for id in &expired {
            state.tasks.remove(id);
            if reserve {
                state.retired.insert(id.clone());
            }
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Evicted terminal tasks");
        }
        expired.len()
    }

    /// Resolves once the task is terminal.
    pub async fn wait_for(&self, task_id: &str) -> OrreryResult<TaskReport> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let report = self.get_status(task_id).await?;
            if report.status.is_terminal() {
                return Ok(report);
            }
            notified.await;
        }
    }

    /// Resolves once no tracked task is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.active_count().await == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn duplicate(task_id: &str) -> OrreryError {
    OrreryError::validation("task_id", format!("task '{task_id}' already exists"))
}

fn tracked_mut<'a>(state: &'a mut TrackerState, task_id: &str) -> OrreryResult<&'a mut Task> {
    state
        .tasks
        .get_mut(task_id)
        .ok_or_else(|| OrreryError::UnknownTask(task_id.to_string()))
}

fn complete(
    task: &mut Task,
    status: TaskStatus,
    error: Option<String>,
    output: Option<Value>,
) -> Task {
    let now = Utc::now();
    task.status = status;
    task.error = error;
    task.output = output;
    task.updated_at = now;
    task.completed_at = Some(now);
    task.clone()
}

fn check_transition(task: &Task, to: TaskStatus) -> OrreryResult<()> {
    if task.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(OrreryError::InvalidTransition {
            task_id: task.id.clone(),
            from: task.status.to_string(),
            to: to.to_string(),
        })
    }
}

/// Pipeline entries that have not produced a successful attempt yet.
fn remaining_stages(task: &Task) -> impl Iterator<Item = &String> {
    let done = task
        .stage_results
        .iter()
        .filter(|r| r.outcome == AttemptOutcome::Succeeded)
        .count();
    task.pipeline.iter().skip(done)
}
