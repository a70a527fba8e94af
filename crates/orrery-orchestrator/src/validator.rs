use crate::registry::RegistrySnapshot;
use crate::types::{Priority, Task};
use orrery_core::{JsonObject, OrreryError, OrreryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest accepted caller-supplied task id.
pub const MAX_TASK_ID_LEN: usize = 128;

/// Optional scheduling knobs of a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPreferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_execution: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Per-stage timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    /// Additional attempts per stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<i64>,
}

/// A task as submitted, before validation.
///
/// Fields are deliberately loose (`Value`, signed integers, free-form
/// priority) so every mistake is reported by [`TaskValidator`] with the
/// offending field rather than as an opaque deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specifications: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_order: Option<Vec<String>>,
    #[serde(default)]
    pub execution_preferences: ExecutionPreferences,
}

impl TaskDescriptor {
    pub fn new(task_type: impl Into<String>, requirements: Value) -> Self {
        Self {
            task_type: Some(task_type.into()),
            requirements: Some(requirements),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.execution_preferences.priority = Some(priority.to_string());
        self
    }

    pub fn with_timeout(mut self, seconds: i64) -> Self {
        self.execution_preferences.timeout = Some(seconds);
        self
    }

    pub fn with_retry_count(mut self, retries: i64) -> Self {
        self.execution_preferences.retry_count = Some(retries);
        self
    }

    pub fn with_pipeline_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipeline_order = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_parallel_execution(mut self, parallel: bool) -> Self {
        self.execution_preferences.parallel_execution = Some(parallel);
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_specifications(mut self, specifications: Value) -> Self {
        self.specifications = Some(specifications);
        self
    }
}

/// Turns descriptors into normalized [`Task`]s or rejects them.
///
/// Uniqueness of the task id is checked by the status tracker on insert,
/// since only it knows every id in use.
#[derive(Debug, Clone)]
pub struct TaskValidator {
    default_timeout_secs: u64,
    default_max_retries: u32,
}

impl TaskValidator {
    pub fn new(default_timeout_secs: u64, default_max_retries: u32) -> Self {
        Self {
            default_timeout_secs,
            default_max_retries,
        }
    }

    pub fn validate(
        &self,
        descriptor: TaskDescriptor,
        registry: &RegistrySnapshot,
    ) -> OrreryResult<Task> {
        let task_type = match descriptor.task_type.as_deref().map(str::trim) {
            None | Some("") => return Err(OrreryError::validation("type", "is required")),
            Some(t) => t.to_string(),
        };
        if !registry.is_known_task_type(&task_type) {
            return Err(OrreryError::validation(
                "type",
                format!("unknown task type '{task_type}'"),
            ));
        }

        let requirements = match descriptor.requirements {
            None => return Err(OrreryError::validation("requirements", "is required")),
            Some(value) => object("requirements", value)?,
        };
        let specifications = optional_object("specifications", descriptor.specifications)?;
        let parameters = optional_object("parameters", descriptor.parameters)?;

        if let Some(order) = &descriptor.pipeline_order {
            if order.is_empty() {
                return Err(OrreryError::validation(
                    "pipeline_order",
                    "must name at least one assistant",
                ));
            }
            for (i, name) in order.iter().enumerate() {
                if registry.get(name).is_none() {
                    return Err(OrreryError::validation(
                        format!("pipeline_order[{i}]"),
                        format!("assistant '{name}' is not registered"),
                    ));
                }
            }
        }

        let id = match descriptor.task_id {
            Some(id) => {
                check_task_id(&id)?;
                id
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let prefs = descriptor.execution_preferences;
        let timeout_secs = match prefs.timeout {
            Some(t) => non_negative("execution_preferences.timeout", t)?,
            None => self.default_timeout_secs,
        };
        let max_retries = match prefs.retry_count {
            Some(r) => {
                let r = non_negative("execution_preferences.retry_count", r)?;
                u32::try_from(r).map_err(|_| {
                    OrreryError::validation("execution_preferences.retry_count", "is too large")
                })?
            }
            None => self.default_max_retries,
        };
        let priority = match prefs.priority.as_deref() {
            None => Priority::Normal,
            Some(p) => parse_priority(p)?,
        };

        let mut task = Task::new(id, task_type, requirements)
            .with_priority(priority)
            .with_policy(timeout_secs, max_retries);
        task.specifications = specifications;
        task.parameters = parameters;
        task.pipeline_order = descriptor.pipeline_order;
        task.parallel_execution = prefs.parallel_execution.unwrap_or(true);
        Ok(task)
    }
}

fn object(field: &str, value: Value) -> OrreryResult<JsonObject> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(OrreryError::validation(
            field,
            format!("must be an object, got {}", json_kind(&other)),
        )),
    }
}

fn optional_object(field: &str, value: Option<Value>) -> OrreryResult<JsonObject> {
    match value {
        None | Some(Value::Null) => Ok(JsonObject::new()),
        Some(value) => object(field, value),
    }
}

fn non_negative(field: &str, value: i64) -> OrreryResult<u64> {
    u64::try_from(value).map_err(|_| OrreryError::validation(field, "must be non-negative"))
}

fn parse_priority(raw: &str) -> OrreryResult<Priority> {
    match raw.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        other => Err(OrreryError::validation(
            "execution_preferences.priority",
            format!("'{other}' is not one of low, normal, high"),
        )),
    }
}

fn check_task_id(id: &str) -> OrreryResult<()> {
    if id.is_empty() {
        return Err(OrreryError::validation("task_id", "must not be empty"));
    }
    if id.len() > MAX_TASK_ID_LEN {
        return Err(OrreryError::validation(
            "task_id",
            format!("must be at most {MAX_TASK_ID_LEN} characters"),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(OrreryError::validation(
            "task_id",
            "may only contain ASCII letters, digits, '.', '_' and '-'",
        ));
    }
    // Ids double as file names in the task store.
    if id.starts_with('.') {
        return Err(OrreryError::validation("task_id", "must not start with '.'"));
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
