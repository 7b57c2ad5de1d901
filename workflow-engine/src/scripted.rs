//! Deterministic provider for tests and demos

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use workflow_engine_sdk::{AgentResult, Provider, ProviderError, ProviderEvent, ProviderRequest, ProviderStream};

type Script = Arc<dyn Fn(&ProviderRequest) -> Result<Vec<ProviderEvent>, ProviderError> + Send + Sync>;

/// Provider that answers every request from a script.
///
/// The script sees the full request, so it can branch on the prompt. With a
/// delay set, the stream sleeps before each event and stops early when the
/// request's abort signal fires.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    script: Script,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ProviderRequest) -> Result<Vec<ProviderEvent>, ProviderError> + Send + Sync + 'static,
    {
        Self {
            name: "scripted".to_string(),
            script: Arc::new(script),
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always return `output` as the structured result, preceded by a short
    /// text delta
    pub fn from_output(output: Value) -> Self {
        Self::new(move |_| {
            Ok(vec![
                ProviderEvent::TextDelta {
                    delta: "Working on it".to_string(),
                },
                ProviderEvent::Result(AgentResult::with_output(output.clone())),
            ])
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of `stream` calls so far, across clones
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("calls", &self.calls())
            .finish()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ProviderStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let events = (self.script)(&request)?;
        let delay = self.delay;
        let abort = request.abort_signal;

        let stream = async_stream::stream! {
            for event in events {
                if let Some(delay) = delay {
                    let cancelled = tokio::select! {
                        _ = abort.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        yield Err(ProviderError::unknown("request cancelled"));
                        return;
                    }
                }
                yield Ok(event);
            }
        };
        Ok(stream.boxed())
    }
}
