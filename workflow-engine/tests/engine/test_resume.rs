//! Resuming and forking from checkpoints in a persisted log

use super::common::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use workflow_engine::sdk::{EventStore, WorkflowError};
use workflow_engine::{
    fold_events, ExecuteOptions, InMemoryEventStore, PhaseDef, ResumePoint, ScriptedProvider, WorkflowDef,
    WorkflowRuntime, WorkflowState,
};

fn count_starts(_: &Value, state: &mut Value) {
    state["starts"] = json!(state["starts"].as_u64().unwrap_or(0) + 1);
}

fn pipeline(review: ScriptedProvider) -> WorkflowDef<Value> {
    WorkflowDef::builder("pipeline", json!({"tasks": []}))
        .start(count_starts)
        .phase(
            "planning",
            PhaseDef::new()
                .run(completing_agent())
                .until(|state: &Value, _| task_count(state) >= 2)
                .next("review"),
        )
        .phase(
            "review",
            PhaseDef::new().run(task_agent("reviewer", Arc::new(review))).next("done"),
        )
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap()
}

fn reviewer() -> ScriptedProvider {
    ScriptedProvider::from_output(json!({"message": "Reviewed"}))
}

#[tokio::test]
async fn test_resume_after_abort_reaches_the_same_final_state() {
    let uninterrupted = WorkflowRuntime::default()
        .run(&pipeline(reviewer()), json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::default().with_store(store.clone());
    let slow_review = reviewer().with_delay(Duration::from_millis(100));
    let handle = runtime
        .execute(&pipeline(slow_review), json!(null), ExecuteOptions::new())
        .unwrap();
    let session_id = handle.session_id();

    // Planning is instant; the reviewer is still streaming
    tokio::time::sleep(Duration::from_millis(80)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_aborted());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let point = runtime.resume_point(&session_id).await.unwrap().unwrap();
    assert_eq!(point.phase.as_deref(), Some("review"));
    assert_eq!(point.state["tasks"], json!(["Task completed", "Task completed"]));

    let resumed = runtime
        .run(
            &pipeline(reviewer()),
            json!(null),
            ExecuteOptions::new().resume_from(point),
        )
        .await
        .unwrap();

    assert_eq!(resumed.state, uninterrupted.state);
    assert_eq!(resumed.state["starts"], 1);

    let names = event_names(&resumed.events);
    assert_eq!(names[0], "WorkflowStarted");
    assert_eq!(names[1], "PhaseEntered");
    assert_eq!(resumed.events[0].payload["resumed"], true);
    assert_eq!(resumed.events[1].payload["phase"], "review");
    assert_eq!(count_named(&resumed.events, "AgentStarted"), 1);
}

#[tokio::test]
async fn test_resume_point_replays_the_log_tail() {
    let result = WorkflowRuntime::default()
        .run(&pipeline(reviewer()), json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    // Every checkpoint folds forward to the final state
    for (index, event) in result.events.iter().enumerate() {
        if event.name != "StateCheckpoint" {
            continue;
        }
        let point = ResumePoint::latest(&result.events[..=index]).unwrap().unwrap();
        assert_eq!(point.position, index as u64);
        assert_eq!(point.replay(&result.events).unwrap(), result.state);
    }

    assert_eq!(fold_events(json!({"tasks": []}), &result.events).unwrap(), result.state);
    assert_eq!(ResumePoint::latest(&result.events[..1]).unwrap(), None);
}

#[tokio::test]
async fn test_fork_records_lineage_in_a_new_session() {
    let store = Arc::new(InMemoryEventStore::new());
    let runtime = WorkflowRuntime::default().with_store(store.clone());
    let parent = runtime
        .run(&pipeline(reviewer()), json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    let review_entry = parent
        .events
        .iter()
        .position(|e| e.name == "StateCheckpoint" && e.payload["phase"] == "review")
        .unwrap();
    let point = ResumePoint::latest(&parent.events[..=review_entry]).unwrap().unwrap();

    let child = runtime
        .run(
            &pipeline(reviewer()),
            json!(null),
            ExecuteOptions::new().fork_from(parent.session_id, point.clone()),
        )
        .await
        .unwrap();

    assert_ne!(child.session_id, parent.session_id);
    assert_eq!(child.state, parent.state);
    assert_eq!(
        event_names(&child.events)[..3],
        ["WorkflowStarted", "SessionForked", "PhaseEntered"]
    );
    let forked = &child.events[1];
    assert_eq!(forked.payload["parentSessionId"], json!(parent.session_id));
    assert_eq!(forked.payload["state"], point.state);

    // The parent log is untouched
    assert_eq!(store.read(&parent.session_id).await.unwrap(), parent.events);
    assert_eq!(store.read(&child.session_id).await.unwrap(), child.events);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    count: u32,
}

impl WorkflowState for Counter {}

#[tokio::test]
async fn test_resume_rejects_state_of_another_shape() {
    let agent = workflow_engine::AgentDef::<Counter, Value>::builder("counter")
        .provider(Arc::new(reviewer()))
        .output_schema(message_schema())
        .prompt(|state: &Counter, _| format!("Count is {}", state.count))
        .update(|_, state: &mut Counter, _| state.count += 1)
        .build()
        .unwrap();
    let workflow = WorkflowDef::builder("typed", Counter::default())
        .phase("counting", PhaseDef::new().run(agent).next("done"))
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap();

    let point = ResumePoint {
        state: json!({"tasks": "not a counter"}),
        phase: Some("counting".into()),
        position: 0,
    };
    let err = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new().resume_from(point))
        .err()
        .unwrap();
    assert!(matches!(err, WorkflowError::State(_)));
}
