//! End-to-end scenarios for simple and phased workflows

use super::common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use workflow_engine::sdk::{apply_patches, EventStore, WorkflowError, WorkflowEvent, ABORTED_BY_USER};
use workflow_engine::{
    ExecuteOptions, ExecutionMode, InMemoryEventStore, InMemoryRecorder, PhaseDef, RuntimeConfig, ScriptedProvider,
    WorkflowDef, WorkflowRuntime,
};

// ============================================================================
// Simple workflows
// ============================================================================

#[tokio::test]
async fn test_simple_workflow_runs_until_condition() {
    let workflow = WorkflowDef::builder("simple", json!({"count": 0}))
        .start(|_: &Value, state: &mut Value| state["tasks"] = json!([]))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 1)
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!({}), ExecuteOptions::new())
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(result.state["tasks"], json!(["Task completed"]));
    assert_eq!(result.state["count"], 0);
    assert_eq!(result.exit_phase, None);
}

#[tokio::test]
async fn test_simple_workflow_loops_until_condition_holds() {
    let workflow = WorkflowDef::builder("loop", json!({"tasks": []}))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 3)
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(task_count(&result.state), 3);
    assert_eq!(count_named(&result.events, "AgentStarted"), 3);
    assert_eq!(count_named(&result.events, "AgentCompleted"), 3);
}

#[tokio::test]
async fn test_event_log_shape_and_causality() {
    let workflow = WorkflowDef::builder("simple", json!({"tasks": []}))
        .agent(completing_agent())
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!({"goal": "x"}), ExecuteOptions::new())
        .await
        .unwrap();

    let names = event_names(&result.events);
    assert_eq!(names.first(), Some(&"WorkflowStarted"));
    assert_eq!(names.last(), Some(&"WorkflowCompleted"));
    assert_eq!(
        names,
        vec![
            "WorkflowStarted",
            "StateIntent",
            "AgentStarted",
            "TextDelta",
            "AgentCompleted",
            "StateIntent",
            "WorkflowCompleted",
        ]
    );

    assert_eq!(result.events[0].caused_by, None);
    for pair in result.events.windows(2) {
        assert_eq!(pair[1].caused_by, Some(pair[0].id));
    }
    assert_eq!(result.events[0].payload["input"], json!({"goal": "x"}));
    assert_eq!(result.events.last().unwrap().payload["finalState"], result.state);
}

#[tokio::test]
async fn test_state_intents_patch_roundtrip() {
    let workflow = WorkflowDef::builder("patches", json!({"tasks": []}))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 2)
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    let mut before = json!({"tasks": []});
    for wire in result.events.iter().filter(|e| e.name == "StateIntent") {
        let WorkflowEvent::StateIntent {
            state,
            patches,
            inverse_patches,
        } = wire.to_event().unwrap()
        else {
            unreachable!()
        };
        assert_eq!(apply_patches(&before, &patches).unwrap(), state);
        assert_eq!(apply_patches(&state, &inverse_patches).unwrap(), before);
        before = state;
    }
    assert_eq!(before, result.state);
}

// ============================================================================
// Phased workflows
// ============================================================================

#[tokio::test]
async fn test_phase_workflow_reaches_terminal_phase() {
    let workflow = WorkflowDef::builder("phased", json!({"tasks": []}))
        .phase("planning", PhaseDef::new().run(completing_agent()).next("done"))
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    let entered: Vec<_> = result
        .events
        .iter()
        .filter(|e| e.name == "PhaseEntered")
        .map(|e| e.payload["phase"].clone())
        .collect();
    assert_eq!(entered, vec![json!("planning"), json!("done")]);
    assert_eq!(result.exit_phase, None);
    assert!(result.completed);

    let done = result
        .events
        .iter()
        .find(|e| e.name == "PhaseEntered" && e.payload["phase"] == "done")
        .unwrap();
    assert_eq!(done.payload["fromPhase"], "planning");

    let exits: Vec<_> = result
        .events
        .iter()
        .filter(|e| e.name == "PhaseExited")
        .map(|e| e.payload["reason"].clone())
        .collect();
    assert_eq!(exits, vec![json!("next"), json!("terminal")]);
}

// ============================================================================
// Playback misses
// ============================================================================

#[tokio::test]
async fn test_playback_without_recording_fails_with_prompt_prefix() {
    let long_prompt = "p".repeat(250);
    let prompt = long_prompt.clone();
    let agent = workflow_engine::AgentDef::<Value, Value>::builder("writer")
        .provider(Arc::new(ScriptedProvider::from_output(json!({"message": "x"}))))
        .output_schema(message_schema())
        .prompt(move |_, _| prompt.clone())
        .update(|_, _, _| {})
        .build()
        .unwrap();
    let workflow = WorkflowDef::builder("playback", json!({})).agent(agent).build().unwrap();

    let runtime = WorkflowRuntime::new(RuntimeConfig::default().with_mode(ExecutionMode::Playback))
        .with_recorder(Arc::new(InMemoryRecorder::new()));
    let err = runtime
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap_err();

    match err {
        WorkflowError::RecordingNotFound { hash, prompt_prefix } => {
            assert_eq!(hash.len(), 64);
            assert_eq!(prompt_prefix, long_prompt[..100]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_playback_requires_recorder() {
    let workflow = WorkflowDef::builder("playback", json!({}))
        .agent(completing_agent())
        .build()
        .unwrap();
    let runtime = WorkflowRuntime::default();

    let err = runtime
        .execute(
            &workflow,
            json!(null),
            ExecuteOptions::new().mode(ExecutionMode::Playback),
        )
        .err()
        .unwrap();
    assert!(matches!(err, WorkflowError::Configuration(_)));
}

// ============================================================================
// Abort
// ============================================================================

#[tokio::test]
async fn test_abort_right_after_start_settles_promptly() {
    let provider = ScriptedProvider::from_output(json!({"message": "late"})).with_delay(Duration::from_millis(200));
    let workflow = WorkflowDef::builder("abort", json!({"tasks": []}))
        .agent(task_agent("slow", Arc::new(provider)))
        .build()
        .unwrap();

    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::default().with_store(store.clone());
    let handle = runtime.execute(&workflow, json!(null), ExecuteOptions::new()).unwrap();
    let session_id = handle.session_id();
    handle.abort();

    let outcome = tokio::time::timeout(Duration::from_millis(100), handle)
        .await
        .expect("abort must not wait for teardown");
    match outcome {
        Err(WorkflowError::Aborted { reason }) => assert_eq!(reason, ABORTED_BY_USER),
        Ok(result) => assert!(result.completed),
        Err(other) => panic!("unexpected error: {other:?}"),
    }

    // Let the delayed provider run past its schedule; nothing more is logged
    tokio::time::sleep(Duration::from_millis(300)).await;
    let persisted = store.read(&session_id).await.unwrap();
    assert_eq!(count_named(&persisted, "AgentCompleted"), 0);
    assert_eq!(count_named(&persisted, "WorkflowCompleted"), 0);
}

// ============================================================================
// for_each fan-out
// ============================================================================

#[tokio::test]
async fn test_for_each_respects_parallel_bound() {
    let probe = ConcurrencyProbe::new(Duration::from_millis(30));
    let agent = workflow_engine::AgentDef::<Value, Value, String>::builder("fan-out")
        .provider(probe.clone())
        .output_schema(message_schema())
        .prompt(|_, item: Option<&String>| item.cloned().unwrap_or_default())
        .update(|out: &Value, state: &mut Value, _| push_task(state, out["message"].clone()))
        .build()
        .unwrap();

    let workflow = WorkflowDef::builder("fan-out", json!({"items": ["a", "b", "c", "d", "e"], "tasks": []}))
        .phase(
            "process",
            PhaseDef::new()
                .for_each(
                    agent,
                    |state: &Value| {
                        state["items"]
                            .as_array()
                            .map(|items| items.iter().filter_map(|i| i.as_str().map(String::from)).collect())
                            .unwrap_or_default()
                    },
                    2,
                )
                .next("done"),
        )
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap();

    let result = WorkflowRuntime::default()
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(probe.calls(), 5);
    assert_eq!(probe.peak(), 2);
    assert_eq!(task_count(&result.state), 5);

    // Every run finishes before the phase exits
    let names = event_names(&result.events);
    let exit = names.iter().position(|n| *n == "PhaseExited").unwrap();
    let last_completed = names.iter().rposition(|n| *n == "AgentCompleted").unwrap();
    assert!(last_completed < exit);
    assert_eq!(count_named(&result.events, "AgentCompleted"), 5);
}
