//! Common test utilities for engine tests

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workflow_engine::sdk::{
    async_trait, AgentResult, EventStore, PatchOp, Provider, ProviderError, ProviderEvent, ProviderRequest,
    ProviderStream, SerializedEvent, SessionId, StoreError, WorkflowError, WorkflowObserver,
};
use workflow_engine::{AgentDef, InMemoryEventStore, ScriptedProvider};

/// Output schema of every test agent: `{message: string}`
pub fn message_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"message": {"type": "string"}},
        "required": ["message"]
    })
}

/// Agent that appends its message to `state.tasks`
pub fn task_agent(name: &str, provider: Arc<dyn Provider>) -> AgentDef<Value, Value> {
    AgentDef::builder(name)
        .provider(provider)
        .output_schema(message_schema())
        .prompt(|state: &Value, _| format!("Do the next task (done so far: {})", state["tasks"]))
        .update(|out: &Value, state: &mut Value, _| push_task(state, out["message"].clone()))
        .build()
        .unwrap()
}

/// Agent that always reports `{message: "Task completed"}`
pub fn completing_agent() -> AgentDef<Value, Value> {
    task_agent(
        "worker",
        Arc::new(ScriptedProvider::from_output(json!({"message": "Task completed"}))),
    )
}

pub fn push_task(state: &mut Value, task: Value) {
    match state.get_mut("tasks").and_then(Value::as_array_mut) {
        Some(tasks) => tasks.push(task),
        None => state["tasks"] = json!([task]),
    }
}

pub fn task_count(state: &Value) -> usize {
    state["tasks"].as_array().map_or(0, Vec::len)
}

pub fn event_names(events: &[SerializedEvent]) -> Vec<&str> {
    events.iter().map(|e| e.name.as_str()).collect()
}

pub fn count_named(events: &[SerializedEvent], name: &str) -> usize {
    events.iter().filter(|e| e.name == name).count()
}

/// Collects every serialized event passed to `on_event`
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SerializedEvent>>>,
}

impl EventLog {
    pub fn callback(&self) -> impl Fn(&SerializedEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().unwrap().push(event.clone())
    }

    pub fn snapshot(&self) -> Vec<SerializedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        count_named(&self.snapshot(), name)
    }
}

/// Provider that counts how many streams are open at once.
///
/// Each call answers `{message: <prompt>}` after `hold`.
pub struct ConcurrencyProbe {
    hold: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(hold: Duration) -> Arc<Self> {
        Arc::new(Self {
            hold,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ConcurrencyProbe {
    fn name(&self) -> &str {
        "probe"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        use futures::StreamExt;

        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let result = AgentResult::with_output(json!({"message": request.prompt}));
        Ok(futures::stream::iter(vec![Ok(ProviderEvent::Result(result))]).boxed())
    }
}

/// In-memory store that takes `latency` for every append
pub struct SlowStore {
    inner: InMemoryEventStore,
    latency: Duration,
}

impl SlowStore {
    pub fn new(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryEventStore::new(),
            latency,
        })
    }
}

#[async_trait]
impl EventStore for SlowStore {
    async fn append(&self, session_id: &SessionId, event: &SerializedEvent) -> Result<(), StoreError> {
        tokio::time::sleep(self.latency).await;
        self.inner.append(session_id, event).await
    }

    async fn read(&self, session_id: &SessionId) -> Result<Vec<SerializedEvent>, StoreError> {
        self.inner.read(session_id).await
    }
}

/// Observer that records which hooks fired, in order
#[derive(Default)]
pub struct HookRecorder {
    hooks: Mutex<Vec<String>>,
    errors: Mutex<Vec<WorkflowError>>,
}

impl HookRecorder {
    pub fn hooks(&self) -> Vec<String> {
        self.hooks.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<WorkflowError> {
        self.errors.lock().unwrap().clone()
    }

    fn push(&self, hook: &str) {
        self.hooks.lock().unwrap().push(hook.to_string());
    }
}

impl WorkflowObserver for HookRecorder {
    fn on_started(&self, _: &SessionId, _: &str) {
        self.push("started");
    }

    fn on_phase_changed(&self, phase: &str, _: Option<&str>) {
        self.push(&format!("phase:{}", phase));
    }

    fn on_agent_started(&self, agent: &str, _: Option<&str>) {
        self.push(&format!("agent_started:{}", agent));
    }

    fn on_agent_completed(&self, agent: &str, _: &Value, _: u64) {
        self.push(&format!("agent_completed:{}", agent));
    }

    fn on_state_changed(&self, _: &Value, _: &[PatchOp]) {
        self.push("state_changed");
    }

    fn on_completed(&self, _: &Value, _: Option<&str>) {
        self.push("completed");
    }

    fn on_error(&self, error: &WorkflowError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}
