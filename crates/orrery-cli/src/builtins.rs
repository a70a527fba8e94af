//! Built-in assistants shipped with the `orrery` binary.
//!
//! - **Earth** scaffolds a code skeleton from the task's requirements.
//! - **Moon** scans code for unbalanced delimiters and missing block colons.
//! - **Sun** estimates loop complexity and suggests optimizations.
//!
//! They are deterministic heuristics: enough to drive a real pipeline end to
//! end without any model backend.

use async_trait::async_trait;
use orrery_core::{Assistant, AssistantContext, CancellationToken, OrreryError, OrreryResult};
use orrery_orchestrator::{AssistantRegistry, CODE_GENERATION, PERFORMANCE_OPTIMIZATION, SYNTAX_CHECK};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const EARTH: &str = "Earth";
pub const MOON: &str = "Moon";
pub const SUN: &str = "Sun";

const DEFAULT_LANGUAGE: &str = "python";

/// Registers Earth, Moon and Sun with their capability tags.
pub fn register_builtins(registry: &AssistantRegistry) -> OrreryResult<()> {
    registry.register(
        EARTH,
        [CODE_GENERATION, "structure_analysis"],
        Arc::new(Earth::default()),
    )?;
    registry.register(MOON, [SYNTAX_CHECK, "error_detection"], Arc::new(Moon::default()))?;
    registry.register(SUN, [PERFORMANCE_OPTIMIZATION], Arc::new(Sun::default()))?;
    Ok(())
}

fn check_cancel(context: &AssistantContext, cancel: &CancellationToken) -> OrreryResult<()> {
    if cancel.is_cancelled() {
        return Err(OrreryError::Cancelled(context.task_id.clone()));
    }
    Ok(())
}

fn language_of(context: &AssistantContext) -> String {
    context
        .requirement_str("programming_language")
        .or_else(|| context.requirement_str("language"))
        .unwrap_or(DEFAULT_LANGUAGE)
        .to_lowercase()
}

/// Code to analyse: Earth's output when it ran earlier, else `requirements.code`.
fn source_code(context: &AssistantContext) -> Option<String> {
    context
        .output_of(EARTH)
        .and_then(|out| out.get("generated_code"))
        .and_then(Value::as_str)
        .or_else(|| context.requirement_str("code"))
        .map(str::to_string)
}

fn log_feedback(assistant: &str, counter: &AtomicU64, feedback: &Value) {
    let total = counter.fetch_add(1, Ordering::Relaxed) + 1;
    info!(assistant, total, feedback = %feedback, "Feedback received");
}

// ---------------------------------------------------------------------------
// Earth
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Earth {
    feedback: AtomicU64,
}

fn scaffold(language: &str, project_type: &str, framework: Option<&str>) -> (String, Value) {
    match (language, framework) {
        ("python", Some("fastapi")) => (
            "from fastapi import FastAPI\n\napp = FastAPI()\n\n\n@app.get(\"/health\")\ndef health():\n    return {\"status\": \"ok\"}\n"
                .to_string(),
            json!({"entrypoint": "main.py", "modules": ["main"], "routes": ["/health"]}),
        ),
        ("python", _) => (
            format!("def main():\n    \"\"\"Entry point for the {project_type} project.\"\"\"\n    pass\n\n\nif __name__ == \"__main__\":\n    main()\n"),
            json!({"entrypoint": "main.py", "modules": ["main"]}),
        ),
        ("rust", _) => (
            format!("fn main() {{\n    println!(\"{project_type}\");\n}}\n"),
            json!({"entrypoint": "src/main.rs", "modules": ["main"]}),
        ),
        (other, _) => (
            format!("// {other} {project_type} project\n"),
            json!({"entrypoint": null, "modules": []}),
        ),
    }
}

#[async_trait]
impl Assistant for Earth {
    async fn process_task(
        &self,
        context: &AssistantContext,
        cancel: CancellationToken,
    ) -> OrreryResult<Value> {
        check_cancel(context, &cancel)?;
        let language = language_of(context);
        let project_type = context
            .requirement_str("project_type")
            .unwrap_or("generic")
            .to_string();
        let framework = context.requirement_str("framework").map(str::to_lowercase);

        let (code, structure) = scaffold(&language, &project_type, framework.as_deref());
        debug!(task_id = %context.task_id, %language, %project_type, "Earth generated scaffold");

        Ok(json!({
            "generated_code": code,
            "structure": structure,
            "validation": {"is_valid": true, "issues": [], "suggestions": []},
            "metadata": {
                "language": language,
                "project_type": project_type,
                "framework": framework,
            },
        }))
    }

    async fn handle_feedback(&self, feedback: &Value) -> OrreryResult<()> {
        log_feedback(EARTH, &self.feedback, feedback);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Moon
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Moon {
    feedback: AtomicU64,
}

impl Moon {
    #[cfg(test)]
    pub fn feedback_received(&self) -> u64 {
        self.feedback.load(Ordering::Relaxed)
    }
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Finds unbalanced delimiters and, for Python, block headers without a colon.
fn scan_for_errors(code: &str, language: &str) -> Vec<Value> {
    let mut errors = Vec::new();
    let mut open: Vec<(char, usize)> = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;
        for ch in line.chars() {
            match ch {
                '(' | '[' | '{' => open.push((ch, line_no)),
                ')' | ']' | '}' => match open.pop() {
                    Some((o, _)) if closing_for(o) == ch => {}
                    _ => errors.push(json!({
                        "type": "unbalanced_delimiter",
                        "line": line_no,
                        "message": format!("unexpected '{ch}'"),
                        "severity": "error",
                    })),
                },
                _ => {}
            }
        }

        if language == "python" {
            let trimmed = line.trim();
            let header = ["def ", "class ", "if ", "elif ", "for ", "while ", "with "]
                .iter()
                .any(|kw| trimmed.starts_with(kw))
                || matches!(trimmed, "try" | "else" | "finally");
            if header && !trimmed.ends_with(':') && !trimmed.ends_with(['(', '[', '{', ',']) {
                errors.push(json!({
                    "type": "missing_colon",
                    "line": line_no,
                    "message": "block header must end with ':'",
                    "severity": "error",
                }));
            }
        }
    }

    for (ch, line_no) in open {
        errors.push(json!({
            "type": "unclosed_delimiter",
            "line": line_no,
            "message": format!("'{ch}' is never closed"),
            "severity": "error",
        }));
    }
    errors
}

fn correction_for(error: &Value) -> Value {
    let suggestion = match error.get("type").and_then(Value::as_str) {
        Some("missing_colon") => "append ':' to the block header",
        Some("unclosed_delimiter") => "add the matching closing delimiter",
        _ => "remove the stray closing delimiter",
    };
    json!({
        "error": error,
        "suggestions": [{"description": suggestion}],
        "automatic_fix": null,
    })
}

#[async_trait]
impl Assistant for Moon {
    async fn process_task(
        &self,
        context: &AssistantContext,
        cancel: CancellationToken,
    ) -> OrreryResult<Value> {
        check_cancel(context, &cancel)?;
        let language = language_of(context);
        let code = source_code(context).unwrap_or_default();

        let errors = scan_for_errors(&code, &language);
        check_cancel(context, &cancel)?;
        let corrections: Vec<Value> = errors.iter().map(correction_for).collect();
        debug!(task_id = %context.task_id, errors = errors.len(), "Moon scan complete");

        Ok(json!({
            "errors_found": errors.len(),
            "errors": errors,
            "corrections": corrections,
            "metadata": {"language": language, "lines_scanned": code.lines().count()},
        }))
    }

    async fn handle_feedback(&self, feedback: &Value) -> OrreryResult<()> {
        log_feedback(MOON, &self.feedback, feedback);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sun
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Sun {
    feedback: AtomicU64,
}

fn is_loop(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("for ") || trimmed.starts_with("while ") || trimmed.starts_with("loop ")
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Deepest loop nesting by indentation, plus the lines where nesting exceeds one.
fn loop_nesting(code: &str) -> (usize, Vec<usize>) {
    let mut stack: Vec<usize> = Vec::new();
    let mut deepest = 0;
    let mut nested = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(line);
        while stack.last().is_some_and(|&top| indent <= top) {
            stack.pop();
        }
        if is_loop(line) {
            stack.push(indent);
            deepest = deepest.max(stack.len());
            if stack.len() > 1 {
                nested.push(idx + 1);
            }
        }
    }
    (deepest, nested)
}

fn complexity_label(depth: usize) -> String {
    match depth {
        0 => "O(1)".to_string(),
        1 => "O(n)".to_string(),
        d => format!("O(n^{d})"),
    }
}

#[async_trait]
impl Assistant for Sun {
    async fn process_task(
        &self,
        context: &AssistantContext,
        cancel: CancellationToken,
    ) -> OrreryResult<Value> {
        check_cancel(context, &cancel)?;
        let started = Instant::now();
        let code = source_code(context).unwrap_or_default();

        let (depth, nested_lines) = loop_nesting(&code);
        let bottlenecks: Vec<Value> = nested_lines
            .iter()
            .map(|line| {
                json!({
                    "line": line,
                    "complexity": complexity_label(depth),
                    "description": "nested loop",
                })
            })
            .collect();
        let optimizations: Vec<Value> = if bottlenecks.is_empty() {
            Vec::new()
        } else {
            vec![json!({
                "type": "algorithmic",
                "suggestion": "replace the inner loop with a hash-based lookup",
                "impact": "high",
            })]
        };
        debug!(task_id = %context.task_id, depth, "Sun analysis complete");

        Ok(json!({
            "analysis": {
                "time_complexity": {"overall": complexity_label(depth)},
                "space_complexity": {"overall": "O(n)"},
                "bottlenecks": bottlenecks,
            },
            "optimizations": optimizations,
            "execution_time": started.elapsed().as_secs_f64(),
        }))
    }

    async fn handle_feedback(&self, feedback: &Value) -> OrreryResult<()> {
        log_feedback(SUN, &self.feedback, feedback);
        Ok(())
    }
}
