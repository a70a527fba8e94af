use crate::types::AttemptOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Whether an assistant currently has an invocation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
}

/// Cumulative counters for one assistant (or the whole system).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    /// Wall time spent inside the assistant, in milliseconds.
    pub duration_ms: u64,
}

impl AssistantMetrics {
    fn absorb(&mut self, other: &AssistantMetrics) {
        self.invocations += other.invocations;
        self.successes += other.successes;
        self.failures += other.failures;
        self.timeouts += other.timeouts;
        self.cancellations += other.cancellations;
        self.duration_ms += other.duration_ms;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantState {
    pub name: String,
    /// Invocations currently in flight.
    pub active: usize,
    pub status: WorkerStatus,
    /// Task id of the most recent invocation.
    pub last_task: Option<String>,
    pub metrics: AssistantMetrics,
}

impl AssistantState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            active: 0,
            status: WorkerStatus::Idle,
            last_task: None,
            metrics: AssistantMetrics::default(),
        }
    }
}

/// Tracks in-flight invocations and outcome metrics per assistant.
///
/// Entries are created lazily on first use, so assistants registered after
/// startup are picked up without extra wiring.
pub struct AssistantMonitor {
    states: Arc<RwLock<HashMap<String, AssistantState>>>,
}

impl AssistantMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mark an assistant as working on a task.
    pub async fn start_invocation(&self, name: &str, task_id: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| AssistantState::new(name));
        state.active += 1;
        state.status = WorkerStatus::Working;
        state.last_task = Some(task_id.to_string());
        state.metrics.invocations += 1;
    }

    /// Record how an invocation ended.
    pub async fn finish_invocation(&self, name: &str, outcome: AttemptOutcome, duration_ms: u64) {
        let mut states = self.states.write().await;
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| AssistantState::new(name));
        state.active = state.active.saturating_sub(1);
        if state.active == 0 {
            state.status = WorkerStatus::Idle;
        }
        match outcome {
            AttemptOutcome::Succeeded => state.metrics.successes += 1,
            AttemptOutcome::Failed => state.metrics.failures += 1,
            AttemptOutcome::TimedOut => state.metrics.timeouts += 1,
            AttemptOutcome::Cancelled => state.metrics.cancellations += 1,
        }
        state.metrics.duration_ms += duration_ms;
    }

    /// Get a snapshot of all assistant states, sorted by name.
    pub async fn snapshot(&self) -> Vec<AssistantState> {
        let states = self.states.read().await;
        let mut all: Vec<AssistantState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Get the state of a specific assistant.
    pub async fn get_state(&self, name: &str) -> Option<AssistantState> {
        self.states.read().await.get(name).cloned()
    }

    /// Get aggregate metrics across all assistants.
    pub async fn aggregate_metrics(&self) -> AssistantMetrics {
        let states = self.states.read().await;
        let mut total = AssistantMetrics::default();
        for state in states.values() {
            total.absorb(&state.metrics);
        }
        total
    }

    /// Drop the entry of a deregistered assistant.
    pub async fn forget(&self, name: &str) {
        self.states.write().await.remove(name);
    }
}

impl Default for AssistantMonitor {
    fn default() -> Self {
        Self::new()
    }
}
