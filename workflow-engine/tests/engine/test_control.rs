//! Pause, resume, abort, streaming and state observation

use super::common::*;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use workflow_engine::sdk::{EventStore, WorkflowError, ABORTED_BY_USER};
use workflow_engine::{ExecuteOptions, PhaseDef, ScriptedProvider, WorkflowDef, WorkflowRuntime};

fn slow_provider(delay_ms: u64) -> ScriptedProvider {
    ScriptedProvider::from_output(json!({"message": "Task completed"})).with_delay(Duration::from_millis(delay_ms))
}

#[tokio::test]
async fn test_pause_blocks_the_next_phase_until_resumed() {
    let first = slow_provider(100);
    let second = ScriptedProvider::from_output(json!({"message": "Reviewed"}));
    let workflow = WorkflowDef::builder("paused", json!({"tasks": []}))
        .phase(
            "planning",
            PhaseDef::new().run(task_agent("planner", Arc::new(first.clone()))).next("review"),
        )
        .phase(
            "review",
            PhaseDef::new().run(task_agent("reviewer", Arc::new(second.clone()))).next("done"),
        )
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap();

    let log = EventLog::default();
    let handle = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new().on_event(log.callback()))
        .unwrap();

    // Pause while the planner is still streaming
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.pause();
    assert!(handle.is_paused());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);

    let events = log.snapshot();
    let last = events.last().unwrap();
    assert_eq!(last.name, "StateCheckpoint");
    assert_eq!(last.payload["phase"], "review");
    assert_eq!(last.payload["state"]["tasks"], json!(["Task completed"]));
    assert_eq!(handle.state()["tasks"], json!(["Task completed"]));

    handle.resume();
    let result = handle.await.unwrap();
    assert_eq!(second.calls(), 1);
    assert_eq!(result.state["tasks"], json!(["Task completed", "Reviewed"]));
}

#[tokio::test]
async fn test_abort_is_idempotent_and_reported_once() {
    let workflow = WorkflowDef::builder("abort", json!({"tasks": []}))
        .agent(task_agent("slow", Arc::new(slow_provider(100))))
        .build()
        .unwrap();

    let observer = Arc::new(HookRecorder::default());
    let handle = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new().observer(observer.clone()))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.abort();
    handle.abort();
    let control = handle.control().clone();
    control.abort();

    let err = handle.await.unwrap_err();
    assert_eq!(err, WorkflowError::aborted(ABORTED_BY_USER));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(observer.errors(), vec![WorkflowError::aborted(ABORTED_BY_USER)]);
    let hooks = observer.hooks();
    assert!(hooks.contains(&"agent_started:slow".to_string()));
    assert!(!hooks.contains(&"agent_completed:slow".to_string()));
    assert!(!hooks.contains(&"completed".to_string()));
    assert!(control.is_aborted());
}

#[tokio::test]
async fn test_abort_while_paused_settles() {
    let workflow = WorkflowDef::builder("paused-abort", json!({"tasks": []}))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 100)
        .build()
        .unwrap();

    let handle = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new())
        .unwrap();
    handle.pause();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.abort();

    let err = tokio::time::timeout(Duration::from_millis(200), handle)
        .await
        .unwrap()
        .unwrap_err();
    assert!(err.is_aborted());
}

#[tokio::test]
async fn test_observer_sees_hooks_in_order() {
    let workflow = WorkflowDef::builder("observed", json!({"tasks": []}))
        .phase("planning", PhaseDef::new().run(completing_agent()).next("done"))
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap();

    let observer = Arc::new(HookRecorder::default());
    WorkflowRuntime::default()
        .run(&workflow, json!(null), ExecuteOptions::new().observer(observer.clone()))
        .await
        .unwrap();

    assert_eq!(
        observer.hooks(),
        vec![
            "started",
            "state_changed",
            "phase:planning",
            "agent_started:worker",
            "agent_completed:worker",
            "state_changed",
            "phase:done",
            "completed",
        ]
    );
    assert!(observer.errors().is_empty());
}

#[tokio::test]
async fn test_stream_yields_every_event_then_ends() {
    let workflow = WorkflowDef::builder("streamed", json!({"tasks": []}))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 2)
        .build()
        .unwrap();

    let execution = WorkflowRuntime::default()
        .stream(&workflow, json!(null), ExecuteOptions::new())
        .unwrap();
    let streamed: Vec<_> = execution.events.collect().await;
    let result = execution.result.await.unwrap();

    assert_eq!(streamed, result.events);
    assert_eq!(streamed.last().unwrap().name, "WorkflowCompleted");
}

#[tokio::test]
async fn test_dropping_the_stream_aborts_the_execution() {
    let workflow = WorkflowDef::builder("detached", json!({"tasks": []}))
        .agent(task_agent("slow", Arc::new(slow_provider(100))))
        .build()
        .unwrap();

    let execution = WorkflowRuntime::default()
        .stream(&workflow, json!(null), ExecuteOptions::new())
        .unwrap();
    let mut events = execution.events;
    let first = events.next().await.unwrap();
    assert_eq!(first.name, "WorkflowStarted");
    drop(events);

    assert!(execution.control.is_aborted());
    let err = execution.result.await.unwrap_err();
    assert_eq!(err, WorkflowError::aborted("event stream detached"));
}

fn two_rounds() -> WorkflowDef<Value> {
    WorkflowDef::builder("two-rounds", json!({"tasks": []}))
        .agent(completing_agent())
        .until(|state: &Value, _| task_count(state) >= 2)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stopping_the_stream_at_completion_keeps_the_result() {
    let workflow = two_rounds();
    for _ in 0..50 {
        let observer = Arc::new(HookRecorder::default());
        let execution = WorkflowRuntime::default()
            .stream(&workflow, json!(null), ExecuteOptions::new().observer(observer.clone()))
            .unwrap();
        let mut events = execution.events;
        while let Some(event) = events.next().await {
            if event.name == "WorkflowCompleted" {
                break;
            }
        }
        drop(events);

        let result = execution.result.await.unwrap();
        assert!(result.completed);
        assert_eq!(task_count(&result.state), 2);
        assert!(execution.control.is_completed());
        assert!(!execution.control.is_aborted());
        assert!(observer.errors().is_empty());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_after_completion_is_a_no_op() {
    let workflow = two_rounds();
    for _ in 0..20 {
        let observer = Arc::new(HookRecorder::default());
        let execution = WorkflowRuntime::default()
            .stream(&workflow, json!(null), ExecuteOptions::new().observer(observer.clone()))
            .unwrap();
        let mut events = execution.events;
        while let Some(event) = events.next().await {
            if event.name == "WorkflowCompleted" {
                break;
            }
        }
        execution.control.abort();

        let result = execution.result.await.unwrap();
        assert_eq!(result.events.last().unwrap().name, "WorkflowCompleted");
        assert!(!execution.control.is_aborted());
        assert!(observer.errors().is_empty());
    }
}

#[tokio::test]
async fn test_abort_settles_after_emitted_events_are_persisted() {
    let store = SlowStore::new(Duration::from_millis(30));
    let workflow = WorkflowDef::builder("persisted-abort", json!({"tasks": []}))
        .agent(task_agent("slow", Arc::new(slow_provider(100))))
        .build()
        .unwrap();
    let runtime = WorkflowRuntime::default().with_store(store.clone());
    let handle = runtime.execute(&workflow, json!(null), ExecuteOptions::new()).unwrap();
    let session_id = handle.session_id();

    // Three appends land by 90ms; the provider answers at about 190ms
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.abort();
    assert!(handle.await.unwrap_err().is_aborted());

    let settled = store.read(&session_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let later = store.read(&session_id).await.unwrap();

    assert_eq!(settled, later);
    assert_eq!(event_names(&settled), ["WorkflowStarted", "StateIntent", "AgentStarted"]);
    assert!(settled.windows(2).all(|pair| pair[1].caused_by == Some(pair[0].id)));
}

#[tokio::test]
async fn test_emission_waits_for_the_store() {
    let store = SlowStore::new(Duration::from_millis(5));
    let log = EventLog::default();
    let result = WorkflowRuntime::default()
        .with_store(store.clone())
        .run(&two_rounds(), json!(null), ExecuteOptions::new().on_event(log.callback()))
        .await
        .unwrap();

    assert_eq!(store.read(&result.session_id).await.unwrap(), result.events);
    assert_eq!(log.snapshot(), result.events);
}

#[tokio::test]
async fn test_watch_state_follows_updates() {
    let workflow = WorkflowDef::builder("watched", json!({"tasks": []}))
        .agent(task_agent("slow", Arc::new(slow_provider(20))))
        .until(|state: &Value, _| task_count(state) >= 3)
        .build()
        .unwrap();

    let handle = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new())
        .unwrap();
    let mut watch = handle.watch_state();

    let mut seen = Vec::new();
    while task_count(&watch.borrow().state) < 3 {
        watch.changed().await.unwrap();
        let snapshot = watch.borrow_and_update().clone();
        seen.push(snapshot.position);
    }

    // Positions only move forward
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    let result = handle.await.unwrap();
    assert_eq!(task_count(&result.state), 3);
    assert_eq!(watch.borrow().state, result.state);
}

#[tokio::test]
async fn test_respond_after_finish_is_harmless() {
    let workflow = WorkflowDef::builder("done", json!({"tasks": []}))
        .agent(completing_agent())
        .build()
        .unwrap();

    let handle = WorkflowRuntime::default()
        .execute(&workflow, json!(null), ExecuteOptions::new())
        .unwrap();
    let control = handle.control().clone();
    handle.await.unwrap();

    control.respond("late");
    control.abort();
    assert!(control.is_finished());
    assert!(control.is_completed());
    assert!(!control.is_aborted());
}
