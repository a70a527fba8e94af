use crate::resolver;
use crate::types::{Task, CODE_GENERATION, FULL_PIPELINE, PERFORMANCE_OPTIMIZATION, SYNTAX_CHECK};
use orrery_core::{Assistant, OrreryError, OrreryResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::info;

/// One entry of a pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Resolved to the first registered assistant carrying this capability.
    Capability(String),
    /// Pinned to a named assistant.
    Assistant(String),
}

/// Ordered stage list for a composite task type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub task_type: String,
    pub stages: Vec<PipelineStage>,
}

impl PipelineDefinition {
    pub fn new(task_type: impl Into<String>, stages: Vec<PipelineStage>) -> Self {
        Self {
            task_type: task_type.into(),
            stages,
        }
    }

    /// `full_pipeline`: generation, then correctness, then optimization.
    pub fn full_pipeline() -> Self {
        Self::new(
            FULL_PIPELINE,
            vec![
                PipelineStage::Capability(CODE_GENERATION.to_string()),
                PipelineStage::Capability(SYNTAX_CHECK.to_string()),
                PipelineStage::Capability(PERFORMANCE_OPTIMIZATION.to_string()),
            ],
        )
    }

    /// Capability tags named by this definition.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().filter_map(|s| match s {
            PipelineStage::Capability(tag) => Some(tag.as_str()),
            PipelineStage::Assistant(_) => None,
        })
    }

    /// Whether the definition pins the named assistant.
    pub fn pins(&self, name: &str) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s, PipelineStage::Assistant(n) if n == name))
    }
}

/// A registered capability provider.
#[derive(Clone)]
pub struct RegisteredAssistant {
    pub name: String,
    pub capabilities: BTreeSet<String>,
    pub handle: Arc<dyn Assistant>,
}

impl RegisteredAssistant {
    pub fn can_handle(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl std::fmt::Debug for RegisteredAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAssistant")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// Immutable view of the registry at one point in time.
///
/// Assistants are kept in registration order, which is the canonical order
/// used when a capability is resolved.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    assistants: Vec<RegisteredAssistant>,
    pipelines: HashMap<String, PipelineDefinition>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&RegisteredAssistant> {
        self.assistants.iter().find(|a| a.name == name)
    }

    pub fn assistants(&self) -> &[RegisteredAssistant] {
        &self.assistants
    }

    /// First assistant, in registration order, that carries `capability`.
    pub fn first_capable(&self, capability: &str) -> Option<&RegisteredAssistant> {
        self.assistants.iter().find(|a| a.can_handle(capability))
    }

    pub fn pipeline(&self, task_type: &str) -> Option<&PipelineDefinition> {
        self.pipelines.get(task_type)
    }

    /// A task type is known if a pipeline is defined for it or some
    /// assistant advertises it as a capability.
    pub fn is_known_task_type(&self, task_type: &str) -> bool {
        self.pipelines.contains_key(task_type) || self.first_capable(task_type).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.assistants.iter().map(|a| a.name.clone()).collect()
    }
}

/// Capability-indexed registry of assistants and pipeline definitions.
///
/// Writers build a new snapshot and swap it in; readers hold an `Arc` to the
/// snapshot they started with, so concurrent registration never disturbs an
/// in-progress lookup or pipeline run.
pub struct AssistantRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl AssistantRegistry {
    /// Creates a registry with the default `full_pipeline` definition.
    pub fn new() -> Self {
        let mut snapshot = RegistrySnapshot::default();
        let full = PipelineDefinition::full_pipeline();
        snapshot.pipelines.insert(full.task_type.clone(), full);
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Registers an assistant under a unique name.
    pub fn register<I, S>(
        &self,
        name: impl Into<String>,
        capabilities: I,
        handle: Arc<dyn Assistant>,
    ) -> OrreryResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(OrreryError::validation("name", "assistant name must not be empty"));
        }
        let capabilities: BTreeSet<String> = capabilities.into_iter().map(Into::into).collect();

        let mut current = self.current.write();
        if current.get(&name).is_some() {
            return Err(OrreryError::DuplicateAssistant(name));
        }
        let mut next = RegistrySnapshot::clone(&current);
        info!(assistant = %name, capabilities = ?capabilities, "Registered assistant");
        next.assistants.push(RegisteredAssistant {
            name,
            capabilities,
            handle,
        });
        *current = Arc::new(next);
        Ok(())
    }

    /// Removes an assistant. Pipelines already running keep their snapshot.
    pub fn deregister(&self, name: &str) -> OrreryResult<()> {
        let mut current = self.current.write();
        if current.get(name).is_none() {
            return Err(OrreryError::UnknownAssistant(name.to_string()));
        }
        let mut next = RegistrySnapshot::clone(&current);
        next.assistants.retain(|a| a.name != name);
        *current = Arc::new(next);
        info!(assistant = %name, "Deregistered assistant");
        Ok(())
    }

    /// Installs or replaces the pipeline definition for its task type.
    pub fn register_pipeline(&self, definition: PipelineDefinition) -> OrreryResult<()> {
        if definition.stages.is_empty() {
            return Err(OrreryError::validation(
                "stages",
                format!("pipeline '{}' must have at least one stage", definition.task_type),
            ));
        }
        let mut current = self.current.write();
        let mut next = RegistrySnapshot::clone(&current);
        info!(
            task_type = %definition.task_type,
            stages = definition.stages.len(),
            "Registered pipeline definition"
        );
        next.pipelines
            .insert(definition.task_type.clone(), definition);
        *current = Arc::new(next);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> OrreryResult<Arc<dyn Assistant>> {
        self.snapshot()
            .get(name)
            .map(|a| Arc::clone(&a.handle))
            .ok_or_else(|| OrreryError::UnknownAssistant(name.to_string()))
    }

    /// Resolves the stage list for a task against the current snapshot.
    pub fn resolve(&self, task: &Task) -> OrreryResult<Vec<String>> {
        resolver::resolve(
            &self.snapshot(),
            &task.task_type,
            task.pipeline_order.as_deref(),
        )
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn len(&self) -> usize {
        self.current.read().assistants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AssistantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orrery_core::{AssistantContext, CancellationToken, JsonObject};
    use serde_json::{json, Value};

    struct Named(&'static str);

    #[async_trait]
    impl Assistant for Named {
        async fn process_task(
            &self,
            _context: &AssistantContext,
            _cancel: CancellationToken,
        ) -> OrreryResult<Value> {
            Ok(json!({ "by": self.0 }))
        }
    }

    fn planetary() -> AssistantRegistry {
        let registry = AssistantRegistry::new();
        registry
            .register("Earth", [CODE_GENERATION, "structure_analysis"], Arc::new(Named("Earth")))
            .unwrap();
        registry
            .register("Moon", [SYNTAX_CHECK], Arc::new(Named("Moon")))
            .unwrap();
        registry
            .register("Sun", [PERFORMANCE_OPTIMIZATION], Arc::new(Named("Sun")))
            .unwrap();
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = planetary();
        assert_eq!(registry.len(), 3);
        assert!(registry.lookup("Moon").is_ok());
        assert!(matches!(
            registry.lookup("Pluto"),
            Err(OrreryError::UnknownAssistant(name)) if name == "Pluto"
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = planetary();
        let err = registry
            .register("Earth", [CODE_GENERATION], Arc::new(Named("Earth")))
            .unwrap_err();
        assert!(matches!(err, OrreryError::DuplicateAssistant(name) if name == "Earth"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = AssistantRegistry::new();
        assert!(matches!(
            registry.register("  ", [CODE_GENERATION], Arc::new(Named("x"))),
            Err(OrreryError::Validation { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_survives_deregistration() {
        let registry = planetary();
        let before = registry.snapshot();
        registry.deregister("Sun").unwrap();

        assert!(before.get("Sun").is_some());
        assert!(registry.snapshot().get("Sun").is_none());
        assert!(matches!(
            registry.deregister("Sun"),
            Err(OrreryError::UnknownAssistant(_))
        ));
    }

    #[test]
    fn test_registration_order_is_canonical() {
        let registry = planetary();
        registry
            .register("Mercury", [CODE_GENERATION], Arc::new(Named("Mercury")))
            .unwrap();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.names(), vec!["Earth", "Moon", "Sun", "Mercury"]);
        assert_eq!(snapshot.first_capable(CODE_GENERATION).unwrap().name, "Earth");
    }

    #[test]
    fn test_known_task_types() {
        let registry = planetary();
        let snapshot = registry.snapshot();
        assert!(snapshot.is_known_task_type(FULL_PIPELINE));
        assert!(snapshot.is_known_task_type(SYNTAX_CHECK));
        assert!(snapshot.is_known_task_type("structure_analysis"));
        assert!(!snapshot.is_known_task_type("security_scan"));
    }

    #[test]
    fn test_register_custom_pipeline() {
        let registry = planetary();
        registry
            .register_pipeline(PipelineDefinition::new(
                "review",
                vec![
                    PipelineStage::Capability(SYNTAX_CHECK.into()),
                    PipelineStage::Assistant("Earth".into()),
                ],
            ))
            .unwrap();
        let task = Task::new("t-1", "review", JsonObject::new());
        assert_eq!(registry.resolve(&task).unwrap(), vec!["Moon", "Earth"]);

        assert!(registry
            .register_pipeline(PipelineDefinition::new("empty", vec![]))
            .is_err());
    }

    #[tokio::test]
    async fn test_lookup_returns_invocable_handle() {
        let registry = planetary();
        let handle = registry.lookup("Earth").unwrap();
        let ctx = AssistantContext {
            task_id: "t".into(),
            task_type: CODE_GENERATION.into(),
            stage: "Earth".into(),
            attempt: 1,
            requirements: JsonObject::new(),
            specifications: JsonObject::new(),
            parameters: JsonObject::new(),
            previous: vec![],
        };
        let out = handle
            .process_task(&ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, json!({"by": "Earth"}));
    }
}
