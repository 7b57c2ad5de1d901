//! Agent execution bridge
//!
//! Runs one agent against a provider (live) or a stored recording (playback)
//! and maps the provider stream onto workflow events. Live runs are recorded
//! incrementally, so a crash mid-stream leaves an unfinalised recording that
//! playback never picks up.

use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use workflow_engine_sdk::{
    AgentError, AgentResult, Provider, ProviderEvent, ProviderRequest, RecordingId, RecordingMeta, Result,
    SerializedEvent, WorkflowError, WorkflowEvent,
};

use crate::config::ExecutionMode;
use crate::definition::{AgentDef, WorkflowState};
use crate::runtime::RuntimeContext;

/// Outcome of one agent run
#[derive(Debug, Clone)]
pub(crate) struct AgentRun<O> {
    pub output: O,
    /// Output as returned by the provider, before deserialization
    pub raw_output: Value,
    /// Events emitted by this run, from `AgentStarted` to `AgentCompleted`
    pub events: Vec<SerializedEvent>,
    pub duration_ms: u64,
    pub text: Option<String>,
    pub thinking: Option<String>,
}

/// Execute `agent` against `state`.
///
/// The caller folds the output into state; this function only emits the
/// agent lifecycle and streaming events.
pub(crate) async fn execute_agent<S, O, C>(
    ctx: &RuntimeContext<S>,
    agent: &AgentDef<S, O, C>,
    state: &S,
    context: Option<&C>,
    phase: Option<&str>,
) -> Result<AgentRun<O>>
where
    S: WorkflowState,
    O: DeserializeOwned,
{
    let started = Instant::now();
    let name = agent.name();
    let mut collector = StreamCollector::new(ctx, name);

    collector.emit(WorkflowEvent::AgentStarted {
        agent: name.to_string(),
        phase: phase.map(str::to_string),
    })
    .await?;

    let prompt = agent.prompt_for(state, context);
    let request = ProviderRequest {
        prompt,
        output_schema: agent.output_schema().clone(),
        provider_options: agent.provider_options(),
        abort_signal: ctx.cancel_token().clone(),
    };
    let hash = request.content_hash();
    info!(agent = name, hash = %hash, mode = %ctx.mode(), "Executing agent");

    let result = match ctx.mode() {
        ExecutionMode::Playback => replay(ctx, &mut collector, &request, &hash).await?,
        ExecutionMode::Live => {
            let operation = format!("agent '{}'", name);
            let provider = agent.provider().clone();
            ctx.guard(
                &operation,
                ctx.agent_timeout(),
                run_live(ctx, &mut collector, provider, request, &hash),
            )
            .await?
        }
    };

    let result = result.ok_or_else(|| AgentError::execution(name, "stream ended without result"))?;
    let output = agent.parse_output(&result.output)?;

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    collector.emit(WorkflowEvent::AgentCompleted {
        agent: name.to_string(),
        output: result.output.clone(),
        duration_ms,
    })
    .await?;
    debug!(agent = name, duration_ms, "Agent completed");

    let (events, text, thinking) = collector.finish();
    Ok(AgentRun {
        output,
        raw_output: result.output,
        events,
        duration_ms,
        text: result.text.or(text),
        thinking: result.thinking.or(thinking),
    })
}

async fn replay<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    collector: &mut StreamCollector<'_, S>,
    request: &ProviderRequest,
    hash: &str,
) -> Result<Option<AgentResult>> {
    let recorder = ctx
        .recorder()
        .ok_or_else(|| WorkflowError::Configuration("playback mode requires a recorder".into()))?;
    let entry = recorder
        .load(hash)
        .await?
        .ok_or_else(|| WorkflowError::recording_not_found(hash, &request.prompt))?;

    debug!(hash, events = entry.stream.len(), "Replaying recording");
    for event in &entry.stream {
        ctx.ensure_active()?;
        // The stored result is authoritative even if the stream also carried it
        collector.forward(event).await?;
    }
    Ok(Some(entry.result))
}

async fn run_live<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    collector: &mut StreamCollector<'_, S>,
    provider: Arc<dyn Provider>,
    request: ProviderRequest,
    hash: &str,
) -> Result<Option<AgentResult>> {
    let recording = start_recording(ctx, provider.as_ref(), collector.agent, &request.prompt, hash).await;

    let mut stream = provider.stream(request).await?;
    let mut result = None;
    while let Some(event) = stream.next().await {
        let event = event?;
        if let (Some(recorder), Some(id)) = (ctx.recorder(), recording.as_ref()) {
            if let Err(e) = recorder.append_event(id, &event).await {
                warn!(recording_id = %id, error = %e, "Failed to append recording event");
            }
        }
        if let Some(terminal) = collector.forward(&event).await? {
            result = Some(terminal);
        }
    }

    if let (Some(recorder), Some(id), Some(result)) = (ctx.recorder(), recording.as_ref(), result.as_ref()) {
        if let Err(e) = recorder.finalize_recording(id, result).await {
            warn!(recording_id = %id, error = %e, "Failed to finalize recording");
        }
    }
    Ok(result)
}

async fn start_recording<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    provider: &dyn Provider,
    agent: &str,
    prompt: &str,
    hash: &str,
) -> Option<RecordingId> {
    let recorder = ctx.recorder()?;
    let meta = RecordingMeta {
        prompt: prompt.to_string(),
        provider: provider.name().to_string(),
        agent: Some(agent.to_string()),
        recorded_at: Utc::now(),
    };
    match recorder.start_recording(hash, meta).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(agent, hash, error = %e, "Failed to start recording; continuing unrecorded");
            None
        }
    }
}

/// Maps provider events to workflow events and keeps what the run emitted
struct StreamCollector<'a, S> {
    ctx: &'a RuntimeContext<S>,
    agent: &'a str,
    events: Vec<SerializedEvent>,
    text: String,
    thinking: String,
}

impl<'a, S: WorkflowState> StreamCollector<'a, S> {
    fn new(ctx: &'a RuntimeContext<S>, agent: &'a str) -> Self {
        Self {
            ctx,
            agent,
            events: Vec::new(),
            text: String::new(),
            thinking: String::new(),
        }
    }

    async fn emit(&mut self, event: WorkflowEvent) -> Result<()> {
        let wire = self.ctx.emit(event).await?;
        self.events.push((*wire).clone());
        Ok(())
    }

    /// Forward one provider event; returns the terminal result when `event`
    /// carries it
    async fn forward(&mut self, event: &ProviderEvent) -> Result<Option<AgentResult>> {
        let agent = self.agent.to_string();
        match event {
            ProviderEvent::TextDelta { delta } => {
                self.text.push_str(delta);
                self.emit(WorkflowEvent::TextDelta {
                    agent,
                    delta: delta.clone(),
                })
                .await?;
            }
            ProviderEvent::ThinkingDelta { delta } => {
                self.thinking.push_str(delta);
                self.emit(WorkflowEvent::ThinkingDelta {
                    agent,
                    delta: delta.clone(),
                })
                .await?;
            }
            ProviderEvent::ToolCall { id, name, input } => {
                self.emit(WorkflowEvent::ToolCalled {
                    agent,
                    tool_id: id.clone(),
                    tool_name: name.clone(),
                    input: input.clone(),
                })
                .await?;
            }
            ProviderEvent::ToolResult { id, output, is_error } => {
                self.emit(WorkflowEvent::ToolResult {
                    agent,
                    tool_id: id.clone(),
                    output: output.clone(),
                    is_error: *is_error,
                })
                .await?;
            }
            ProviderEvent::Result(result) => return Ok(Some(result.clone())),
            ProviderEvent::SessionInit { session_id } => {
                debug!(agent = self.agent, provider_session = %session_id, "Provider session started");
            }
            ProviderEvent::Stop { reason } => {
                debug!(agent = self.agent, reason = %reason, "Provider stopped");
            }
            ProviderEvent::Usage(usage) => {
                debug!(
                    agent = self.agent,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
        }
        Ok(None)
    }

    fn finish(self) -> (Vec<SerializedEvent>, Option<String>, Option<String>) {
        let text = (!self.text.is_empty()).then_some(self.text);
        let thinking = (!self.thinking.is_empty()).then_some(self.thinking);
        (self.events, text, thinking)
    }
}
