//! Phase and agent scheduling
//!
//! Drives either a single looping agent or the phase state machine. Every
//! transition is recorded as an event, and each phase boundary is
//! checkpointed so a later execution can resume from it.

pub(crate) mod batch;
mod human;

use serde_json::Value;
use tracing::{debug, info};
use workflow_engine_sdk::{PhaseError, PhaseExitReason, Result, WorkflowEvent};

use crate::definition::{PhaseGraph, PhaseWork, Transition, UntilFn, WorkflowState};
use crate::runtime::RuntimeContext;

/// Loop a single agent until `until` holds, or once without it
pub(crate) async fn run_simple<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    work: &dyn PhaseWork<S>,
    until: Option<&UntilFn<S>>,
) -> Result<()> {
    let mut iteration = 0u32;
    loop {
        ctx.ensure_active()?;
        ctx.wait_if_paused(None).await?;

        iteration += 1;
        debug!(agent = work.agent_name(), iteration, "Running agent");
        let output = work.execute(ctx, None).await?;

        match until {
            Some(until) if !until(&ctx.state(), Some(&output)) => continue,
            _ => return Ok(()),
        }
    }
}

/// Run the phase machine from its entry phase, or from `resume_phase`.
///
/// # Returns
/// The phase that stopped the machine through `Transition::Exit`, or `None`
/// when a terminal phase was reached
pub(crate) async fn run_phases<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    graph: &PhaseGraph<S>,
    resume_phase: Option<&str>,
) -> Result<Option<String>> {
    graph.validate()?;

    let mut current = match resume_phase {
        Some(phase) => phase.to_string(),
        None => graph.entry()?.to_string(),
    };
    let mut from: Option<String> = None;

    loop {
        ctx.ensure_active()?;
        let phase = graph
            .get(&current)
            .ok_or_else(|| PhaseError::UnknownPhase { phase: current.clone() })?;

        ctx.set_current_phase(&current);
        ctx.emit(WorkflowEvent::PhaseEntered {
            phase: current.clone(),
            from_phase: from.take(),
        })
        .await?;
        info!(phase = %current, "Entered phase");

        if phase.is_terminal() {
            ctx.emit(WorkflowEvent::PhaseExited {
                phase: current.clone(),
                reason: PhaseExitReason::Terminal,
            })
            .await?;
            ctx.checkpoint(Some(&current)).await?;
            return Ok(None);
        }

        ctx.checkpoint(Some(&current)).await?;
        run_phase_body(ctx, &current, phase).await?;

        ctx.emit(WorkflowEvent::PhaseExited {
            phase: current.clone(),
            reason: PhaseExitReason::Next,
        })
        .await?;

        match phase.resolve_next(&current, &ctx.state())? {
            Transition::Goto(next) => {
                if !graph.contains(&next) {
                    return Err(PhaseError::UnknownPhase { phase: next }.into());
                }
                ctx.checkpoint(Some(&next)).await?;
                debug!(from = %current, to = %next, "Phase transition");
                from = Some(std::mem::replace(&mut current, next));
            }
            Transition::Exit => {
                ctx.checkpoint(Some(&current)).await?;
                info!(phase = %current, "Phase machine exited");
                return Ok(Some(current));
            }
        }
    }
}

async fn run_phase_body<S: WorkflowState>(
    ctx: &RuntimeContext<S>,
    name: &str,
    phase: &crate::definition::PhaseDef<S>,
) -> Result<()> {
    let mut last_output: Option<Value> = None;
    let mut iteration = 0u32;

    loop {
        ctx.ensure_active()?;
        ctx.wait_if_paused(Some(name)).await?;

        iteration += 1;
        if let Some(work) = &phase.work {
            debug!(phase = name, agent = work.agent_name(), iteration, "Running phase work");
            last_output = Some(work.execute(ctx, Some(name)).await?);
        }

        if let Some(gate) = &phase.human {
            human::run_gate(ctx, name, gate, phase.on_response.as_ref(), last_output.as_ref()).await?;
        }

        match &phase.until {
            Some(until) if !until(&ctx.state(), last_output.as_ref()) => continue,
            _ => return Ok(()),
        }
    }
}
