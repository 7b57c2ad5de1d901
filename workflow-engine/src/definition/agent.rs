use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use workflow_engine_sdk::{AgentError, Provider, Result, WorkflowError};

use super::{PhaseWork, WorkflowState};
use crate::bridge;
use crate::runtime::RuntimeContext;
use crate::scheduler::batch::execute_bounded;

pub type PromptFn<S, C> = Arc<dyn Fn(&S, Option<&C>) -> String + Send + Sync>;
pub type UpdateFn<S, O, C> = Arc<dyn Fn(&O, &mut S, Option<&C>) + Send + Sync>;
pub type ContextsFn<S, C> = Arc<dyn Fn(&S) -> Vec<C> + Send + Sync>;

/// A named unit of work: prompt in, validated structured output out, folded
/// into state by `update`.
///
/// `C` is the per-iteration context passed by `for_each` phases; agents that
/// never run under `for_each` leave it as `()`.
pub struct AgentDef<S, O, C = ()> {
    name: String,
    provider: Arc<dyn Provider>,
    model: Option<String>,
    provider_options: Map<String, Value>,
    output_schema: Value,
    validator: Arc<JSONSchema>,
    prompt: PromptFn<S, C>,
    update: UpdateFn<S, O, C>,
}

impl<S, O, C> Clone for AgentDef<S, O, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            provider_options: self.provider_options.clone(),
            output_schema: self.output_schema.clone(),
            validator: self.validator.clone(),
            prompt: self.prompt.clone(),
            update: self.update.clone(),
        }
    }
}

impl<S, O, C> std::fmt::Debug for AgentDef<S, O, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDef")
            .field("name", &self.name)
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl<S, O, C> AgentDef<S, O, C> {
    pub fn builder(name: impl Into<String>) -> AgentDefBuilder<S, O, C> {
        AgentDefBuilder {
            name: name.into(),
            provider: None,
            model: None,
            provider_options: Map::new(),
            output_schema: None,
            prompt: None,
            update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn output_schema(&self) -> &Value {
        &self.output_schema
    }

    pub fn prompt_for(&self, state: &S, context: Option<&C>) -> String {
        (self.prompt)(state, context)
    }

    /// Options sent to the provider. The model, when set, is folded in so it
    /// takes part in the recording hash.
    pub fn provider_options(&self) -> Value {
        let mut options = self.provider_options.clone();
        if let Some(model) = &self.model {
            options.insert("model".to_string(), Value::String(model.clone()));
        }
        Value::Object(options)
    }

    pub fn apply_update(&self, output: &O, draft: &mut S, context: Option<&C>) {
        (self.update)(output, draft, context)
    }
}

impl<S, O: DeserializeOwned, C> AgentDef<S, O, C> {
    /// Validate raw provider output against the schema, then deserialize it
    pub fn parse_output(&self, raw: &Value) -> Result<O> {
        if let Err(errors) = self.validator.validate(raw) {
            let detail = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(AgentError::output(&self.name, detail).into());
        }

        serde_json::from_value(raw.clone()).map_err(|e| AgentError::output(&self.name, e.to_string()).into())
    }
}

pub struct AgentDefBuilder<S, O, C = ()> {
    name: String,
    provider: Option<Arc<dyn Provider>>,
    model: Option<String>,
    provider_options: Map<String, Value>,
    output_schema: Option<Value>,
    prompt: Option<PromptFn<S, C>>,
    update: Option<UpdateFn<S, O, C>>,
}

impl<S, O, C> AgentDefBuilder<S, O, C> {
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Extra provider option; part of the recording hash
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.provider_options.insert(key.into(), value.into());
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn prompt<F>(mut self, prompt: F) -> Self
    where
        F: Fn(&S, Option<&C>) -> String + Send + Sync + 'static,
    {
        self.prompt = Some(Arc::new(prompt));
        self
    }

    pub fn update<F>(mut self, update: F) -> Self
    where
        F: Fn(&O, &mut S, Option<&C>) + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(update));
        self
    }

    pub fn build(self) -> Result<AgentDef<S, O, C>> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(WorkflowError::InvalidDefinition("agent name must not be empty".into()));
        }
        let missing = |part: &str| WorkflowError::InvalidDefinition(format!("agent '{}' has no {}", name, part));

        let provider = self.provider.ok_or_else(|| missing("provider"))?;
        let output_schema = self.output_schema.ok_or_else(|| missing("output schema"))?;
        let prompt = self.prompt.ok_or_else(|| missing("prompt function"))?;
        let update = self.update.ok_or_else(|| missing("update function"))?;

        let validator = JSONSchema::compile(&output_schema).map_err(|e| {
            WorkflowError::InvalidDefinition(format!("agent '{}' output schema is invalid: {}", name, e))
        })?;

        Ok(AgentDef {
            name,
            provider,
            model: self.model,
            provider_options: self.provider_options,
            output_schema,
            validator: Arc::new(validator),
            prompt,
            update,
        })
    }
}

/// One agent run per loop iteration
pub(crate) struct SingleRun<S, O> {
    pub agent: AgentDef<S, O>,
}

#[async_trait]
impl<S, O> PhaseWork<S> for SingleRun<S, O>
where
    S: WorkflowState,
    O: DeserializeOwned + Send + Sync + 'static,
{
    fn agent_name(&self) -> &str {
        self.agent.name()
    }

    async fn execute(&self, ctx: &RuntimeContext<S>, phase: Option<&str>) -> Result<Value> {
        let state = ctx.state();
        let run = bridge::execute_agent(ctx, &self.agent, &state, None, phase).await?;
        debug!(
            agent = %self.agent.name(),
            duration_ms = run.duration_ms,
            events = run.events.len(),
            text_len = run.text.as_ref().map_or(0, String::len),
            thinking = run.thinking.is_some(),
            "Agent run finished"
        );
        ctx.update_state(|draft| self.agent.apply_update(&run.output, draft, None))
            .await?;
        Ok(run.raw_output)
    }
}

/// One agent run per context, at most `parallel` in flight
pub(crate) struct ForEachRun<S, O, C> {
    pub agent: AgentDef<S, O, C>,
    pub contexts: ContextsFn<S, C>,
    pub parallel: usize,
}

#[async_trait]
impl<S, O, C> PhaseWork<S> for ForEachRun<S, O, C>
where
    S: WorkflowState,
    O: DeserializeOwned + Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn agent_name(&self) -> &str {
        self.agent.name()
    }

    async fn execute(&self, ctx: &RuntimeContext<S>, phase: Option<&str>) -> Result<Value> {
        let contexts = (self.contexts)(&ctx.state());
        debug!(
            agent = %self.agent.name(),
            iterations = contexts.len(),
            parallel = self.parallel,
            "Running for_each batch"
        );

        let agent = &self.agent;
        let outputs = execute_bounded(contexts, self.parallel, |item, slot| async move {
            debug!(agent = %agent.name(), index = slot.index, total = slot.total, "Running for_each item");
            let state = ctx.state();
            let run = bridge::execute_agent(ctx, agent, &state, Some(&item), phase).await?;
            ctx.update_state(|draft| agent.apply_update(&run.output, draft, Some(&item)))
                .await?;
            Ok(run.raw_output)
        })
        .await?;

        Ok(Value::Array(outputs))
    }
}
