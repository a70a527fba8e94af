use crate::OrreryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Schema-free JSON mapping passed through to assistants unmodified.
pub type JsonObject = serde_json::Map<String, Value>;

/// Output recorded by a stage that completed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Assistant name of the stage.
    pub stage: String,
    /// Payload returned by the assistant.
    pub output: Value,
}

/// Everything an assistant sees for one stage attempt: the task's original
/// inputs plus the outputs of every stage that already completed, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantContext {
    pub task_id: String,
    pub task_type: String,
    /// Assistant name of the stage being executed.
    pub stage: String,
    /// 1-based attempt number for this stage.
    pub attempt: u32,
    pub requirements: JsonObject,
    #[serde(default)]
    pub specifications: JsonObject,
    #[serde(default)]
    pub parameters: JsonObject,
    /// Outputs of prior stages, oldest first.
    #[serde(default)]
    pub previous: Vec<StageOutput>,
}

impl AssistantContext {
    /// Output of the most recently completed stage, if any.
    pub fn latest_output(&self) -> Option<&Value> {
        self.previous.last().map(|o| &o.output)
    }

    /// Output produced by the named stage, if it has completed.
    pub fn output_of(&self, stage: &str) -> Option<&Value> {
        self.previous
            .iter()
            .rev()
            .find(|o| o.stage == stage)
            .map(|o| &o.output)
    }

    /// Reads a string requirement such as `programming_language`.
    pub fn requirement_str(&self, key: &str) -> Option<&str> {
        self.requirements.get(key).and_then(Value::as_str)
    }
}

/// Contract implemented by every capability provider.
///
/// The orchestrator never inspects what an assistant does; it only invokes
/// [`Assistant::process_task`] and records the outcome. Implementations must
/// observe `cancel`: the watchdog and external cancellation both trigger it
/// and then wait a short grace period for the call to unwind.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Process one stage attempt and return the result payload.
    async fn process_task(
        &self,
        context: &AssistantContext,
        cancel: CancellationToken,
    ) -> OrreryResult<Value>;

    /// Accept feedback about a previously processed task.
    async fn handle_feedback(&self, _feedback: &Value) -> OrreryResult<()> {
        Ok(())
    }
}
