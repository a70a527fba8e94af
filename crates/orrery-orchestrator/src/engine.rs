use crate::config::OrchestratorConfig;
use crate::executor::{StageExecutor, StageOutcome};
use crate::monitor::{AssistantMetrics, AssistantMonitor, AssistantState};
use crate::registry::AssistantRegistry;
use crate::resolver;
use crate::store::TaskStore;
use crate::task_queue::TaskQueue;
use crate::tracker::StatusTracker;
use crate::types::{Task, TaskFeedback, TaskReport, TaskStatus};
use crate::validator::{TaskDescriptor, TaskValidator};
use chrono::Utc;
use orrery_core::{CancellationToken, OrreryError, OrreryResult, StageOutput};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-assistant view returned by [`Orchestrator::assistant_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantStatus {
    pub name: String,
    pub capabilities: Vec<String>,
    /// Invocations currently in flight.
    pub in_flight: usize,
    /// Stages of unfinished tasks still assigned to this assistant,
    /// including the ones in flight.
    pub queued: usize,
    pub metrics: AssistantMetrics,
}

/// Snapshot returned by [`Orchestrator::system_status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    /// In-memory task count per status.
    pub tasks: BTreeMap<TaskStatus, usize>,
    pub queue_depth: usize,
    pub workers: usize,
    pub assistants: Vec<AssistantStatus>,
    pub aggregate: AssistantMetrics,
}

/// The task orchestrator.
///
/// Accepts descriptors, validates and resolves them, queues them by
/// priority and drives a pool of workers that run each task's pipeline
/// stage by stage through the [`StageExecutor`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<AssistantRegistry>,
    queue: Arc<TaskQueue>,
    tracker: Arc<StatusTracker>,
    monitor: Arc<AssistantMonitor>,
    executor: StageExecutor,
    validator: TaskValidator,
    cancellations: Mutex<HashMap<String, CancellationToken>>,
    exclusive: RwLock<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator that keeps task history in memory only.
    pub fn new(config: OrchestratorConfig, registry: Arc<AssistantRegistry>) -> OrreryResult<Self> {
        Self::build(config, registry, None)
    }

    /// Create an orchestrator that writes terminal tasks through to `store`.
    pub fn with_store(
        config: OrchestratorConfig,
        registry: Arc<AssistantRegistry>,
        store: Arc<dyn TaskStore>,
    ) -> OrreryResult<Self> {
        Self::build(config, registry, Some(store))
    }

    fn build(
        config: OrchestratorConfig,
        registry: Arc<AssistantRegistry>,
        store: Option<Arc<dyn TaskStore>>,
    ) -> OrreryResult<Self> {
        config.validate()?;
        let tracker = Arc::new(StatusTracker::new(store));
        let monitor = Arc::new(AssistantMonitor::new());
        let executor = StageExecutor::new(
            config.retry.clone(),
            config.cancel_grace(),
            Arc::clone(&tracker),
            Arc::clone(&monitor),
        );
        let validator = TaskValidator::new(config.default_timeout_secs, config.default_max_retries);

        Ok(Self {
            queue: Arc::new(TaskQueue::new(config.queue_capacity)),
            config,
            registry,
            tracker,
            monitor,
            executor,
            validator,
            cancellations: Mutex::new(HashMap::new()),
            exclusive: RwLock::new(()),
            workers: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn registry(&self) -> &Arc<AssistantRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<AssistantMonitor> {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Spawn the worker pool (and the retention janitor, if configured).
    /// Calling it again while workers are running has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.shutdown.is_cancelled() {
            return;
        }
        for worker in 0..self.config.max_concurrent_tasks {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.worker_loop(worker).await }));
        }
        if let Some(retention) = self.config.retention() {
            let this = Arc::clone(self);
            workers.push(tokio::spawn(async move { this.janitor(retention).await }));
        }
        info!(
            workers = self.config.max_concurrent_tasks,
            queue_capacity = ?self.config.queue_capacity,
            "Orchestrator started"
        );
    }

    /// Validate, resolve and enqueue a task. Returns the task id.
    pub async fn submit(&self, descriptor: TaskDescriptor) -> OrreryResult<String> {
        if self.shutdown.is_cancelled() {
            return Err(OrreryError::ShuttingDown);
        }
        let snapshot = self.registry.snapshot();
        let mut task = self.validator.validate(descriptor, &snapshot)?;
        task.pipeline =
            resolver::resolve(&snapshot, &task.task_type, task.pipeline_order.as_deref())?;

        let id = task.id.clone();
        let (task_type, priority, stages) =
            (task.task_type.clone(), task.priority, task.pipeline.clone());
        self.tracker.insert(task.clone()).await?;
        self.cancellations
            .lock()
            .insert(id.clone(), CancellationToken::new());

        if let Err(e) = self.queue.enqueue(task) {
            self.tracker.remove(&id).await;
            self.cancellations.lock().remove(&id);
            warn!(task_id = %id, error = %e, "Task rejected by queue");
            return Err(e);
        }
        info!(task_id = %id, task_type = %task_type, priority = %priority, stages = ?stages, "Task accepted");
        Ok(id)
    }

    /// Parse a JSON descriptor and submit it.
    pub async fn submit_json(&self, descriptor: &str) -> OrreryResult<String> {
        let descriptor: TaskDescriptor = serde_json::from_str(descriptor)
            .map_err(|e| OrreryError::validation("descriptor", e.to_string()))?;
        self.submit(descriptor).await
    }

    pub async fn get_status(&self, task_id: &str) -> OrreryResult<TaskReport> {
        self.tracker.get_status(task_id).await
    }

    /// Full task record including requirements and feedback.
    pub async fn get_task(&self, task_id: &str) -> OrreryResult<Task> {
        self.tracker.get(task_id).await
    }

    /// Request cancellation. Returns `false` if the task already finished.
    ///
    /// A task still pending is withdrawn and marked cancelled at once. Once a
    /// worker has claimed it, only its token is triggered: the task stops
    /// before its next stage or as soon as the in-flight invocation observes
    /// the token, and the worker records the outcome.
    pub async fn cancel(&self, task_id: &str) -> OrreryResult<bool> {
        let report = self.tracker.get_status(task_id).await?;
        if report.status.is_terminal() {
            return Ok(false);
        }

        if self
            .tracker
            .cancel_if_pending(task_id, "cancelled before start")
            .await?
        {
            self.queue.remove(task_id);
            self.cancellations.lock().remove(task_id);
            info!(task_id, "Queued task cancelled");
            return Ok(true);
        }

        let token = self.cancellations.lock().get(task_id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                info!(task_id, "Cancellation requested");
                Ok(true)
            }
            // Finished between the status read and now.
            None => Ok(false),
        }
    }

    /// Deliver feedback to the named assistants and record it on the task.
    pub async fn submit_feedback(&self, task_id: &str, feedback: TaskFeedback) -> OrreryResult<()> {
        // Unknown task ids are rejected before any assistant sees the feedback.
        self.tracker.get(task_id).await?;

        let snapshot = self.registry.snapshot();
        let mut targets = Vec::with_capacity(feedback.assistant_feedback.len());
        for (name, payload) in &feedback.assistant_feedback {
            let assistant = snapshot
                .get(name)
                .ok_or_else(|| OrreryError::UnknownAssistant(name.clone()))?;
            targets.push((name, Arc::clone(&assistant.handle), payload));
        }

        for (name, handle, payload) in targets {
            if let Err(e) = handle.handle_feedback(payload).await {
                warn!(task_id, assistant = %name, error = %e, "Assistant rejected feedback");
            }
        }
        self.tracker.add_feedback(task_id, feedback).await?;
        debug!(task_id, "Feedback recorded");
        Ok(())
    }

    /// Remove an assistant and reset its metrics, so a later registration
    /// under the same name starts fresh.
    pub async fn deregister_assistant(&self, name: &str) -> OrreryResult<()> {
        self.registry.deregister(name)?;
        self.monitor.forget(name).await;
        Ok(())
    }

    /// Wait until the task reaches a terminal state.
    pub async fn wait_for(&self, task_id: &str) -> OrreryResult<TaskReport> {
        self.tracker.wait_for(task_id).await
    }

    /// Wait until no task is pending or running.
    pub async fn wait_idle(&self) {
        self.tracker.wait_idle().await;
    }

    pub async fn assistant_status(&self, name: &str) -> OrreryResult<AssistantStatus> {
        let snapshot = self.registry.snapshot();
        let assistant = snapshot
            .get(name)
            .ok_or_else(|| OrreryError::UnknownAssistant(name.to_string()))?;
        let load = self.tracker.pending_load().await;
        let state = self.monitor.get_state(name).await;

        Ok(AssistantStatus {
            name: assistant.name.clone(),
            capabilities: assistant.capabilities.iter().cloned().collect(),
            in_flight: state.as_ref().map_or(0, |s| s.active),
            queued: load.get(name).copied().unwrap_or(0),
            metrics: state.map(|s| s.metrics).unwrap_or_default(),
        })
    }

    pub async fn system_status(&self) -> SystemStatus {
        let snapshot = self.registry.snapshot();
        let load = self.tracker.pending_load().await;

        let mut states: HashMap<String, AssistantState> = self
            .monitor
            .snapshot()
            .await
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let mut assistants = Vec::with_capacity(snapshot.assistants().len());
        for assistant in snapshot.assistants() {
            let state = states.remove(&assistant.name);
            assistants.push(AssistantStatus {
                name: assistant.name.clone(),
                capabilities: assistant.capabilities.iter().cloned().collect(),
                in_flight: state.as_ref().map_or(0, |s| s.active),
                queued: load.get(&assistant.name).copied().unwrap_or(0),
                metrics: state.map(|s| s.metrics).unwrap_or_default(),
            });
        }

        SystemStatus {
            tasks: self.tracker.counts().await,
            queue_depth: self.queue.len(),
            workers: self.config.max_concurrent_tasks,
            assistants,
            aggregate: self.monitor.aggregate_metrics().await,
        }
    }

    /// Stop accepting work, cancel queued tasks, let running pipelines finish
    /// and join the workers.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let drained = self.queue.close();
        for task in drained {
            self.finalize(
                &task.id,
                TaskStatus::Cancelled,
                Some("orchestrator shut down before the task started".to_string()),
                None,
            )
            .await;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker terminated abnormally");
            }
        }
        info!("Orchestrator stopped");
    }

    async fn worker_loop(&self, worker: usize) {
        debug!(worker, "Worker started");
        while let Some(task) = self.queue.dequeue().await {
            self.run_task(task).await;
        }
        debug!(worker, "Worker stopped");
    }

    async fn janitor(&self, retention: Duration) {
        let Ok(window) = chrono::Duration::from_std(retention) else {
            warn!(retention_secs = retention.as_secs(), "Retention window out of range, eviction disabled");
            return;
        };
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.eviction_interval_secs));
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tracker.evict_terminal_before(Utc::now() - window).await;
                }
            }
        }
    }

    async fn run_task(&self, task: Task) {
        let cancel = self
            .cancellations
            .lock()
            .get(&task.id)
            .cloned()
            .unwrap_or_default();

        // Parallel tasks share the gate; the others hold it alone.
        let (_shared, _exclusive) = if task.parallel_execution {
            (Some(self.exclusive.read().await), None)
        } else {
            (None, Some(self.exclusive.write().await))
        };

        if !self.tracker.claim(&task.id).await {
            debug!(task_id = %task.id, "Skipping task that is no longer pending");
            self.cancellations.lock().remove(&task.id);
            return;
        }
        info!(task_id = %task.id, task_type = %task.task_type, "Task started");

        let snapshot = self.registry.snapshot();
        let pipeline = match resolver::resolve(
            &snapshot,
            &task.task_type,
            task.pipeline_order.as_deref(),
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.finalize(&task.id, TaskStatus::Failed, Some(e.to_string()), None)
                    .await;
                return;
            }
        };
        if let Err(e) = self.tracker.set_pipeline(&task.id, pipeline.clone()).await {
            error!(task_id = %task.id, error = %e, "Lost track of running task");
            return;
        }

        let mut previous: Vec<StageOutput> = Vec::with_capacity(pipeline.len());
        for stage in &pipeline {
            if cancel.is_cancelled() {
                self.finalize(
                    &task.id,
                    TaskStatus::Cancelled,
                    Some(format!("cancelled before stage '{stage}'")),
                    None,
                )
                .await;
                return;
            }
            let Some(assistant) = snapshot.get(stage) else {
                let e = OrreryError::UnknownAssistant(stage.clone());
                self.finalize(&task.id, TaskStatus::Failed, Some(e.to_string()), None)
                    .await;
                return;
            };

            let outcome = self
                .executor
                .run_stage(&task, stage, assistant.handle.as_ref(), &previous, &cancel)
                .await;
            match outcome {
                Ok(StageOutcome::Succeeded(output)) => previous.push(StageOutput {
                    stage: stage.clone(),
                    output,
                }),
                Ok(StageOutcome::Failed(e)) => {
                    self.finalize(&task.id, TaskStatus::Failed, Some(e.to_string()), None)
                        .await;
                    return;
                }
                Ok(StageOutcome::TimedOut(e)) => {
                    self.finalize(&task.id, TaskStatus::TimedOut, Some(e.to_string()), None)
                        .await;
                    return;
                }
                Ok(StageOutcome::Cancelled) => {
                    let reason = OrreryError::Cancelled(format!("during stage '{stage}'"));
                    self.finalize(&task.id, TaskStatus::Cancelled, Some(reason.to_string()), None)
                        .await;
                    return;
                }
                Err(e) => {
                    error!(task_id = %task.id, stage = %stage, error = %e, "Stage bookkeeping failed");
                    self.finalize(&task.id, TaskStatus::Failed, Some(e.to_string()), None)
                        .await;
                    return;
                }
            }
        }

        let output: Option<Value> = previous.pop().map(|o| o.output);
        self.finalize(&task.id, TaskStatus::Succeeded, None, output)
            .await;
    }

    async fn finalize(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<String>,
        output: Option<Value>,
    ) {
        self.cancellations.lock().remove(task_id);
        match self.tracker.finish(task_id, status, error, output).await {
            Ok(task) => match &task.error {
                Some(reason) => warn!(task_id, status = %status, error = %reason, "Task finished"),
                None => info!(
                    task_id,
                    status = %status,
                    attempts = task.stage_results.len(),
                    "Task finished"
                ),
            },
            Err(e) => debug!(task_id, error = %e, "Task already finished"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::types::{CODE_GENERATION, FULL_PIPELINE, PERFORMANCE_OPTIMIZATION, SYNTAX_CHECK};
    use async_trait::async_trait;
    use orrery_core::{Assistant, AssistantContext};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Appends its name to the previous stage's trail.
    struct Trail(&'static str);

    #[async_trait]
    impl Assistant for Trail {
        async fn process_task(
            &self,
            context: &AssistantContext,
            _cancel: CancellationToken,
        ) -> OrreryResult<Value> {
            let mut trail: Vec<Value> = context
                .latest_output()
                .and_then(|o| o["trail"].as_array().cloned())
                .unwrap_or_default();
            trail.push(json!(self.0));
            Ok(json!({ "trail": trail }))
        }
    }

    /// Waits for cancellation; counts feedback.
    #[derive(Default)]
    struct Sleeper {
        feedback: AtomicUsize,
    }

    #[async_trait]
    impl Assistant for Sleeper {
        async fn process_task(
            &self,
            context: &AssistantContext,
            cancel: CancellationToken,
        ) -> OrreryResult<Value> {
            cancel.cancelled().await;
            Err(OrreryError::Cancelled(context.task_id.clone()))
        }

        async fn handle_feedback(&self, _feedback: &Value) -> OrreryResult<()> {
            self.feedback.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(workers: usize) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_tasks: workers,
            retry: RetryPolicy::immediate(),
            cancel_grace_ms: 50,
            ..OrchestratorConfig::default()
        }
    }

    fn planetary() -> Arc<AssistantRegistry> {
        let registry = AssistantRegistry::new();
        registry
            .register("Earth", [CODE_GENERATION], Arc::new(Trail("Earth")))
            .unwrap();
        registry
            .register("Moon", [SYNTAX_CHECK], Arc::new(Trail("Moon")))
            .unwrap();
        registry
            .register("Sun", [PERFORMANCE_OPTIMIZATION], Arc::new(Trail("Sun")))
            .unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_full_pipeline_runs_stages_in_order() {
        let orchestrator = Arc::new(Orchestrator::new(config(2), planetary()).unwrap());
        orchestrator.start();

        let id = orchestrator
            .submit(TaskDescriptor::new(FULL_PIPELINE, json!({"programming_language": "rust"})))
            .await
            .unwrap();
        let report = orchestrator.wait_for(&id).await.unwrap();

        assert_eq!(report.status, TaskStatus::Succeeded);
        assert_eq!(report.pipeline, vec!["Earth", "Moon", "Sun"]);
        let stages: Vec<&str> = report.stage_results.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(stages, vec!["Earth", "Moon", "Sun"]);
        assert_eq!(report.output.unwrap()["trail"], json!(["Earth", "Moon", "Sun"]));

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresolvable_task_is_rejected_synchronously() {
        let registry = planetary();
        registry.deregister("Sun").unwrap();
        let orchestrator = Orchestrator::new(config(1), registry).unwrap();

        let err = orchestrator
            .submit(TaskDescriptor::new(FULL_PIPELINE, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, OrreryError::UnresolvablePipeline { .. }));
        assert_eq!(orchestrator.system_status().await.tasks[&TaskStatus::Pending], 0);
    }

    #[tokio::test]
    async fn test_queue_saturation_rolls_back_tracking() {
        let orchestrator = Orchestrator::new(
            OrchestratorConfig {
                queue_capacity: Some(1),
                ..config(1)
            },
            planetary(),
        )
        .unwrap();

        orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})).with_id("a"))
            .await
            .unwrap();
        let err = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})).with_id("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrreryError::QueueSaturated { capacity: 1 }));
        assert!(matches!(
            orchestrator.get_status("b").await,
            Err(OrreryError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        // Not started: tasks stay queued.
        let orchestrator = Orchestrator::new(config(1), planetary()).unwrap();
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();

        assert!(orchestrator.cancel(&id).await.unwrap());
        assert_eq!(
            orchestrator.get_status(&id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(orchestrator.queue().is_empty());
        assert!(!orchestrator.cancel(&id).await.unwrap());
        assert!(orchestrator.cancel("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_after_claim_only_signals_token() {
        let orchestrator = Orchestrator::new(config(1), planetary()).unwrap();
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();
        // A worker claims the task right after cancel() read it as pending.
        assert!(orchestrator.tracker.claim(&id).await);

        assert!(orchestrator.cancel(&id).await.unwrap());
        let token = orchestrator.cancellations.lock().get(&id).cloned().unwrap();
        assert!(token.is_cancelled());
        assert_eq!(
            orchestrator.get_status(&id).await.unwrap().status,
            TaskStatus::Running
        );

        // The in-flight attempt is still recorded and the worker decides the outcome.
        orchestrator
            .tracker
            .record_attempt(
                &id,
                crate::types::StageResult {
                    stage: "Moon".into(),
                    attempt: 1,
                    outcome: crate::types::AttemptOutcome::Cancelled,
                    output: None,
                    error: None,
                    duration_ms: 0,
                    started_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        orchestrator
            .finalize(&id, TaskStatus::Cancelled, Some("during stage 'Moon'".into()), None)
            .await;
        let report = orchestrator.get_status(&id).await.unwrap();
        assert_eq!(report.status, TaskStatus::Cancelled);
        assert_eq!(report.stage_results.len(), 1);
        assert_eq!(report.error.as_deref(), Some("during stage 'Moon'"));
        assert!(!orchestrator.cancel(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let registry = planetary();
        registry
            .register("Pluto", ["deep_scan"], Arc::new(Sleeper::default()))
            .unwrap();
        let orchestrator = Arc::new(Orchestrator::new(config(1), registry).unwrap());
        orchestrator.start();

        let id = orchestrator
            .submit(TaskDescriptor::new("deep_scan", json!({})).with_timeout(0))
            .await
            .unwrap();
        while orchestrator.monitor().get_state("Pluto").await.is_none() {
            tokio::task::yield_now().await;
        }
        assert!(orchestrator.cancel(&id).await.unwrap());

        let report = orchestrator.wait_for(&id).await.unwrap();
        assert_eq!(report.status, TaskStatus::Cancelled);
        assert_eq!(report.stage_results.len(), 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_feedback_is_routed_and_recorded() {
        let sleeper = Arc::new(Sleeper::default());
        let registry = planetary();
        registry
            .register("Pluto", ["deep_scan"], sleeper.clone())
            .unwrap();
        let orchestrator = Arc::new(Orchestrator::new(config(1), registry).unwrap());
        orchestrator.start();

        let id = orchestrator
            .submit(TaskDescriptor::new(CODE_GENERATION, json!({})))
            .await
            .unwrap();
        orchestrator.wait_for(&id).await.unwrap();

        let mut feedback = TaskFeedback::default();
        feedback
            .assistant_feedback
            .insert("Pluto".into(), json!({"useful": true}));
        orchestrator.submit_feedback(&id, feedback).await.unwrap();
        assert_eq!(sleeper.feedback.load(Ordering::SeqCst), 1);

        let task = orchestrator.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.feedback.len(), 1);

        let mut unknown = TaskFeedback::default();
        unknown.assistant_feedback.insert("Vulcan".into(), json!({}));
        assert!(matches!(
            orchestrator.submit_feedback(&id, unknown).await,
            Err(OrreryError::UnknownAssistant(_))
        ));
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_queued_tasks() {
        let orchestrator = Arc::new(Orchestrator::new(config(1), planetary()).unwrap());
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();

        orchestrator.shutdown().await;
        assert_eq!(
            orchestrator.get_status(&id).await.unwrap().status,
            TaskStatus::Cancelled
        );
        assert!(matches!(
            orchestrator
                .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
                .await,
            Err(OrreryError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_system_and_assistant_status() {
        let orchestrator = Arc::new(Orchestrator::new(config(2), planetary()).unwrap());
        orchestrator.start();
        for _ in 0..3 {
            orchestrator
                .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
                .await
                .unwrap();
        }
        orchestrator.wait_idle().await;

        let status = orchestrator.system_status().await;
        assert_eq!(status.tasks[&TaskStatus::Succeeded], 3);
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.workers, 2);
        assert_eq!(status.assistants.len(), 3);
        assert_eq!(status.aggregate.successes, 3);

        let moon = orchestrator.assistant_status("Moon").await.unwrap();
        assert_eq!(moon.capabilities, vec![SYNTAX_CHECK.to_string()]);
        assert_eq!(moon.in_flight, 0);
        assert_eq!(moon.queued, 0);
        assert_eq!(moon.metrics.invocations, 3);
        assert!(orchestrator.assistant_status("Pluto").await.is_err());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["tasks"]["succeeded"], 3);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reregistered_assistant_starts_with_fresh_metrics() {
        let orchestrator = Arc::new(Orchestrator::new(config(1), planetary()).unwrap());
        orchestrator.start();
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();
        orchestrator.wait_for(&id).await.unwrap();
        assert_eq!(
            orchestrator.assistant_status("Moon").await.unwrap().metrics.invocations,
            1
        );

        orchestrator.deregister_assistant("Moon").await.unwrap();
        assert!(orchestrator.monitor().get_state("Moon").await.is_none());
        assert!(matches!(
            orchestrator.deregister_assistant("Moon").await,
            Err(OrreryError::UnknownAssistant(_))
        ));

        orchestrator
            .registry()
            .register("Moon", [SYNTAX_CHECK], Arc::new(Trail("Moon")))
            .unwrap();
        let moon = orchestrator.assistant_status("Moon").await.unwrap();
        assert_eq!(moon.metrics, AssistantMetrics::default());
        orchestrator.shutdown().await;
    }

    fn retaining_config() -> OrchestratorConfig {
        OrchestratorConfig {
            retention_secs: Some(1),
            eviction_interval_secs: 1,
            ..config(1)
        }
    }

    // Real time: the eviction cutoff is taken from the wall clock.
    #[tokio::test]
    async fn test_janitor_evicts_finished_tasks() {
        let orchestrator = Arc::new(Orchestrator::new(retaining_config(), planetary()).unwrap());
        orchestrator.start();
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();
        assert_eq!(orchestrator.wait_for(&id).await.unwrap().status, TaskStatus::Succeeded);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert!(matches!(
            orchestrator.get_status(&id).await,
            Err(OrreryError::UnknownTask(_))
        ));
        assert!(orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})).with_id(id.clone()))
            .await
            .is_err());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_janitor_eviction_falls_back_to_store() {
        let store: Arc<dyn TaskStore> = Arc::new(crate::store::MemoryTaskStore::new());
        let orchestrator = Arc::new(
            Orchestrator::with_store(retaining_config(), planetary(), store).unwrap(),
        );
        orchestrator.start();
        let id = orchestrator
            .submit(TaskDescriptor::new(SYNTAX_CHECK, json!({})))
            .await
            .unwrap();
        orchestrator.wait_for(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(orchestrator.system_status().await.tasks[&TaskStatus::Succeeded], 0);
        let report = orchestrator.get_status(&id).await.unwrap();
        assert_eq!(report.status, TaskStatus::Succeeded);
        assert_eq!(report.stage_results.len(), 1);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_json_descriptor() {
        let orchestrator = Orchestrator::new(config(1), planetary()).unwrap();
        assert!(matches!(
            orchestrator.submit_json("{\"type\": 5").await,
            Err(OrreryError::Validation { field, .. }) if field == "descriptor"
        ));
    }
}
