//! Human-in-the-loop gate

use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;
use workflow_engine_sdk::{interpret_approval, HumanPrompt, HumanResponse, InputType, Result, WorkflowEvent};

use crate::definition::{HumanFn, ResponseFn, WorkflowState};
use crate::runtime::RuntimeContext;

/// Ask, wait, record. A gate that resolves to no prompt skips the round.
pub(crate) async fn run_gate<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    phase: &str,
    gate: &HumanFn<S>,
    on_response: Option<&ResponseFn<S>>,
    last_output: Option<&Value>,
) -> Result<()> {
    let Some(prompt) = gate(&ctx.state(), last_output) else {
        debug!(phase, "Human gate skipped this round");
        return Ok(());
    };

    let id = Uuid::new_v4().to_string();
    ctx.emit(WorkflowEvent::InputRequested {
        id: id.clone(),
        prompt: prompt.prompt.clone(),
        input_type: prompt.input_type,
        options: (!prompt.options.is_empty()).then(|| prompt.options.clone()),
    })
    .await?;
    info!(phase, request_id = %id, input_type = ?prompt.input_type, "Waiting for human input");

    let (value, approved) = obtain_response(ctx, &prompt).await?;

    ctx.emit(WorkflowEvent::InputReceived {
        id: id.clone(),
        value: value.clone(),
        approved,
    })
    .await?;

    let response = HumanResponse {
        id,
        phase: Some(phase.to_string()),
        value,
        approved,
    };
    ctx.update_state(|draft| {
        draft.record_human_response(&response);
        if let Some(handler) = on_response {
            handler(&response, draft);
        }
    })
    .await?;
    Ok(())
}

async fn obtain_response<S: WorkflowState>(ctx: &RuntimeContext<S>, prompt: &HumanPrompt) -> Result<(Value, Option<bool>)> {
    if let Some(handler) = ctx.human_handler() {
        let timeout = ctx.input_timeout();
        return match prompt.input_type {
            InputType::Approval => {
                let approved = ctx
                    .guard("human input", timeout, handler.approval(&prompt.prompt))
                    .await?;
                Ok((Value::Bool(approved), Some(approved)))
            }
            InputType::Choice => {
                let choice = ctx
                    .guard("human input", timeout, handler.choice(&prompt.prompt, &prompt.options))
                    .await?;
                Ok((Value::String(choice), None))
            }
        };
    }

    let value = ctx.next_input().await?;
    let approved = match prompt.input_type {
        InputType::Approval => Some(interpret_approval(&value)),
        InputType::Choice => None,
    };
    Ok((value, approved))
}
