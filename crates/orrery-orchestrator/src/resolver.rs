//! Pipeline resolution: task type (or explicit order) to an ordered list of
//! assistant names.

use crate::registry::{PipelineStage, RegistrySnapshot};
use orrery_core::{OrreryError, OrreryResult};

/// Produces the ordered stage list for a task.
///
/// - An explicit `pipeline_order` is used verbatim once every name is
///   registered and capable of the task type or one of its sub-types.
/// - Otherwise a pipeline definition for the type wins.
/// - Otherwise the type is a simple capability and resolves to the first
///   capable assistant in registration order.
pub fn resolve(
    snapshot: &RegistrySnapshot,
    task_type: &str,
    pipeline_order: Option<&[String]>,
) -> OrreryResult<Vec<String>> {
    match pipeline_order {
        Some(order) => resolve_explicit(snapshot, task_type, order),
        None => resolve_by_type(snapshot, task_type),
    }
}

fn resolve_explicit(
    snapshot: &RegistrySnapshot,
    task_type: &str,
    order: &[String],
) -> OrreryResult<Vec<String>> {
    if order.is_empty() {
        return Err(OrreryError::unresolvable(
            task_type,
            "explicit pipeline order is empty",
        ));
    }
    let definition = snapshot.pipeline(task_type);

    for name in order {
        let assistant = snapshot.get(name).ok_or_else(|| {
            OrreryError::unresolvable(task_type, format!("assistant '{name}' is not registered"))
        })?;

        let pinned = definition.is_some_and(|d| d.pins(name));
        let compatible = assistant.can_handle(task_type)
            || definition.is_some_and(|d| d.capabilities().any(|c| assistant.can_handle(c)));

        if !pinned && !compatible {
            return Err(OrreryError::unresolvable(
                task_type,
                format!("assistant '{name}' has no capability compatible with '{task_type}'"),
            ));
        }
    }
    Ok(order.to_vec())
}

fn resolve_by_type(snapshot: &RegistrySnapshot, task_type: &str) -> OrreryResult<Vec<String>> {
    if let Some(definition) = snapshot.pipeline(task_type) {
        return definition
            .stages
            .iter()
            .map(|stage| match stage {
                PipelineStage::Capability(tag) => snapshot
                    .first_capable(tag)
                    .map(|a| a.name.clone())
                    .ok_or_else(|| {
                        OrreryError::unresolvable(
                            task_type,
                            format!("no registered assistant provides '{tag}'"),
                        )
                    }),
                PipelineStage::Assistant(name) => snapshot
                    .get(name)
                    .map(|a| a.name.clone())
                    .ok_or_else(|| {
                        OrreryError::unresolvable(
                            task_type,
                            format!("assistant '{name}' is not registered"),
                        )
                    }),
            })
            .collect();
    }

    snapshot
        .first_capable(task_type)
        .map(|a| vec![a.name.clone()])
        .ok_or_else(|| {
            OrreryError::unresolvable(
                task_type,
                format!("no registered assistant provides '{task_type}'"),
            )
        })
}
