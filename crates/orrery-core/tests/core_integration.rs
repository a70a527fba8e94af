#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use orrery_core::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// 1. AssistantContext serialization roundtrip
// ---------------------------------------------------------------------------

#[test]
fn context_serialization_roundtrip() {
    let mut requirements = JsonObject::new();
    requirements.insert("programming_language".into(), json!("python"));
    requirements.insert("framework".into(), json!("fastapi"));

    let ctx = AssistantContext {
        task_id: "fastapi-1".into(),
        task_type: "full_pipeline".into(),
        stage: "Moon".into(),
        attempt: 2,
        requirements,
        specifications: JsonObject::new(),
        parameters: JsonObject::new(),
        previous: vec![StageOutput {
            stage: "Earth".into(),
            output: json!({"code": "app = FastAPI()"}),
        }],
    };

    let json = serde_json::to_string(&ctx).unwrap();
    let back: AssistantContext = serde_json::from_str(&json).unwrap();
    assert_eq!(back.task_id, "fastapi-1");
    assert_eq!(back.attempt, 2);
    assert_eq!(back.requirement_str("framework"), Some("fastapi"));
    assert_eq!(back.output_of("Earth"), ctx.output_of("Earth"));
}

#[test]
fn context_defaults_optional_sections() {
    let ctx: AssistantContext = serde_json::from_value(json!({
        "task_id": "t",
        "task_type": "syntax_check",
        "stage": "Moon",
        "attempt": 1,
        "requirements": {}
    }))
    .unwrap();
    assert!(ctx.specifications.is_empty());
    assert!(ctx.previous.is_empty());
    assert!(ctx.latest_output().is_none());
}

// ---------------------------------------------------------------------------
// 2. Error conversions
// ---------------------------------------------------------------------------

#[test]
fn json_and_io_errors_convert() {
    fn parse(raw: &str) -> OrreryResult<Value> {
        Ok(serde_json::from_str(raw)?)
    }
    assert!(matches!(parse("{oops"), Err(OrreryError::Json(_))));

    fn read() -> OrreryResult<String> {
        Ok(std::fs::read_to_string("/definitely/not/here.json")?)
    }
    assert!(matches!(read(), Err(OrreryError::Io(_))));
}

#[test]
fn stage_errors_are_not_rejections() {
    let errors = [
        OrreryError::StageFailure {
            stage: "Moon".into(),
            attempt: 1,
            reason: "boom".into(),
        },
        OrreryError::StageTimeout {
            stage: "Moon".into(),
            attempt: 2,
            timeout_secs: 30,
        },
        OrreryError::Cancelled("t-1".into()),
    ];
    for err in &errors {
        assert!(!err.is_rejection(), "{err}");
    }
    assert_eq!(
        errors[1].to_string(),
        "Stage 'Moon' timed out after 30s on attempt 2"
    );
}

// ---------------------------------------------------------------------------
// 3. Assistant contract through a trait object
// ---------------------------------------------------------------------------

struct Patient;

#[async_trait]
impl Assistant for Patient {
    async fn process_task(
        &self,
        context: &AssistantContext,
        cancel: CancellationToken,
    ) -> OrreryResult<Value> {
        tokio::select! {
            _ = cancel.cancelled() => Err(OrreryError::Cancelled(context.task_id.clone())),
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(json!({"done": true})),
        }
    }
}

#[tokio::test]
async fn assistant_observes_cancellation_through_child_token() {
    let assistant: Arc<dyn Assistant> = Arc::new(Patient);
    let ctx = AssistantContext {
        task_id: "t-9".into(),
        task_type: "syntax_check".into(),
        stage: "Moon".into(),
        attempt: 1,
        requirements: JsonObject::new(),
        specifications: JsonObject::new(),
        parameters: JsonObject::new(),
        previous: vec![],
    };

    let parent = CancellationToken::new();
    let child = parent.child_token();
    parent.cancel();

    let result = assistant.process_task(&ctx, child).await;
    assert!(matches!(result, Err(OrreryError::Cancelled(id)) if id == "t-9"));
}
