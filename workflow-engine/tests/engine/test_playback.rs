//! Record live provider calls, then replay them without the provider

use super::common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use workflow_engine::sdk::{request_hash, AgentResult, EventStore, ProviderEvent, Recorder};
use workflow_engine::{
    ExecuteOptions, ExecutionMode, InMemoryEventStore, InMemoryRecorder, PhaseDef, ScriptedProvider, SqliteStore,
    WorkflowDef, WorkflowRuntime,
};

fn chatty_provider() -> ScriptedProvider {
    ScriptedProvider::new(|request| {
        Ok(vec![
            ProviderEvent::ThinkingDelta {
                delta: "Considering the backlog".into(),
            },
            ProviderEvent::ToolCall {
                id: "t1".into(),
                name: "search".into(),
                input: json!({"query": request.prompt}),
            },
            ProviderEvent::ToolResult {
                id: "t1".into(),
                output: json!(["one hit"]),
                is_error: false,
            },
            ProviderEvent::TextDelta {
                delta: "Found it".into(),
            },
            ProviderEvent::Result(AgentResult::with_output(json!({"message": "Task completed"}))),
        ])
    })
}

fn two_phase(provider: &ScriptedProvider) -> WorkflowDef<Value> {
    WorkflowDef::builder("recorded", json!({"tasks": []}))
        .phase(
            "planning",
            PhaseDef::new()
                .run(task_agent("planner", Arc::new(provider.clone())))
                .until(|state: &Value, _| task_count(state) >= 2)
                .next("done"),
        )
        .phase("done", PhaseDef::terminal())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_playback_replays_recorded_run_without_provider() {
    let provider = chatty_provider();
    let workflow = two_phase(&provider);
    let recorder = Arc::new(InMemoryRecorder::new());
    let runtime = WorkflowRuntime::default().with_recorder(recorder.clone());

    let live = runtime.run(&workflow, json!(null), ExecuteOptions::new()).await.unwrap();
    assert_eq!(provider.calls(), 2);
    assert_eq!(recorder.pending_count().await, 0);

    // The two prompts differ (they include the task list), so two recordings
    let recordings = recorder.list().await.unwrap();
    assert_eq!(recordings.len(), 2);
    assert!(recordings.iter().all(|r| r.event_count == 5));
    assert!(recordings.iter().all(|r| r.meta.agent.as_deref() == Some("planner")));

    let replayed = runtime
        .run(&workflow, json!(null), ExecuteOptions::new().mode(ExecutionMode::Playback))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(event_names(&replayed.events), event_names(&live.events));
    assert_eq!(replayed.state, live.state);
    assert_ne!(replayed.session_id, live.session_id);

    let tools: Vec<_> = replayed
        .events
        .iter()
        .filter(|e| e.name == "ToolCalled")
        .map(|e| e.payload["toolName"].clone())
        .collect();
    assert_eq!(tools, vec![json!("search"), json!("search")]);
}

#[tokio::test]
async fn test_recorded_stream_is_keyed_by_request_hash() {
    let provider = chatty_provider();
    let workflow = WorkflowDef::builder("single", json!({"tasks": []}))
        .agent(task_agent("planner", Arc::new(provider.clone())))
        .build()
        .unwrap();
    let recorder = Arc::new(InMemoryRecorder::new());
    WorkflowRuntime::default()
        .with_recorder(recorder.clone())
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    let prompt = format!("Do the next task (done so far: {})", json!([]));
    let hash = request_hash(&prompt, &message_schema(), &json!({}));
    let entry = recorder.load(&hash).await.unwrap().unwrap();
    assert_eq!(entry.meta.prompt, prompt);
    assert_eq!(entry.stream.len(), 5);
    assert_eq!(entry.result.output, json!({"message": "Task completed"}));

    assert!(recorder.delete(&hash).await.unwrap());
    assert!(recorder.load(&hash).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_records_and_replays_across_runtimes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.db");
    let provider = chatty_provider();
    let workflow = two_phase(&provider);

    let live = {
        let store = Arc::new(SqliteStore::new(&path).unwrap());
        WorkflowRuntime::default()
            .with_store(store.clone())
            .with_recorder(store)
            .run(&workflow, json!(null), ExecuteOptions::new())
            .await
            .unwrap()
    };

    // A fresh runtime over the same file replays and reads the earlier log
    let store = Arc::new(SqliteStore::new(&path).unwrap());
    let runtime = WorkflowRuntime::default()
        .with_store(store.clone())
        .with_recorder(store.clone());
    let replayed = runtime
        .run(&workflow, json!(null), ExecuteOptions::new().mode(ExecutionMode::Playback))
        .await
        .unwrap();

    assert_eq!(provider.calls(), 2);
    assert_eq!(replayed.state, live.state);

    let persisted = runtime.session_events(&live.session_id).await.unwrap();
    assert_eq!(persisted, live.events);
    assert_eq!(store.read(&replayed.session_id).await.unwrap(), replayed.events);
    assert_eq!(store.list_sessions().unwrap().len(), 2);
}

#[tokio::test]
async fn test_persisted_log_matches_in_memory_log() {
    let store = Arc::new(InMemoryEventStore::new());
    let workflow = two_phase(&chatty_provider());
    let result = WorkflowRuntime::default()
        .with_store(store.clone())
        .run(&workflow, json!(null), ExecuteOptions::new())
        .await
        .unwrap();

    assert_eq!(store.read(&result.session_id).await.unwrap(), result.events);
    assert_eq!(store.sessions().await, vec![result.session_id]);
}
