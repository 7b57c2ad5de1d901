use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use workflow_engine::sdk::{
    async_trait, HumanInputHandler, HumanPrompt, HumanResponse, ProviderEvent, AgentResult, SerializedEvent,
    WorkflowError,
};
use workflow_engine::{
    AgentDef, ExecuteOptions, ExecutionMode, PhaseDef, RuntimeConfig, ScriptedProvider, SqliteStore, Transition,
    WorkflowDef, WorkflowRuntime, WorkflowState,
};

/// Record a planning workflow against a scripted provider, then replay it
#[derive(Parser, Debug, Clone)]
#[command(name = "workflow-demo")]
struct Args {
    /// What the planner should plan
    #[arg(short, long, default_value = "Ship the 1.0 release")]
    goal: String,

    /// Which half of the demo to run
    #[arg(short, long, value_enum, default_value_t = DemoMode::Both)]
    mode: DemoMode,

    /// SQLite database for events and recordings
    #[arg(long)]
    db: Option<PathBuf>,

    /// Delay between scripted provider events, in milliseconds
    #[arg(long, default_value = "50")]
    delay_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DemoMode {
    /// Live run, recorded to the database
    Record,
    /// Playback from earlier recordings
    Replay,
    Both,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ReleaseState {
    goal: String,
    steps: Vec<String>,
    approved: Option<bool>,
}

impl WorkflowState for ReleaseState {
    fn record_human_response(&mut self, response: &HumanResponse) {
        self.approved = Some(response.is_approved());
    }
}

#[derive(Debug, Deserialize)]
struct Plan {
    steps: Vec<String>,
}

/// Approves every gate and picks the first option of every choice
struct AutoApprove;

#[async_trait]
impl HumanInputHandler for AutoApprove {
    async fn approval(&self, prompt: &str) -> Result<bool, WorkflowError> {
        println!("  [auto-approve] {}", prompt);
        Ok(true)
    }

    async fn choice(&self, prompt: &str, options: &[String]) -> Result<String, WorkflowError> {
        println!("  [auto-choose] {}", prompt);
        options
            .first()
            .cloned()
            .ok_or_else(|| WorkflowError::Configuration("choice without options".into()))
    }
}

fn planner_provider(delay: Duration) -> ScriptedProvider {
    ScriptedProvider::new(|request| {
        let steps = vec!["Freeze the branch", "Run the release checklist", "Tag and publish"];
        Ok(vec![
            ProviderEvent::ThinkingDelta {
                delta: "Breaking the goal into steps".to_string(),
            },
            ProviderEvent::TextDelta {
                delta: format!("Planning: {}", request.prompt),
            },
            ProviderEvent::Result(AgentResult::with_output(serde_json::json!({ "steps": steps }))),
        ])
    })
    .with_name("scripted-planner")
    .with_delay(delay)
}

fn release_workflow(delay: Duration) -> Result<WorkflowDef<ReleaseState, String>> {
    let planner = AgentDef::<ReleaseState, Plan>::builder("planner")
        .provider(Arc::new(planner_provider(delay)))
        .model("demo-model")
        .output_schema(serde_json::json!({
            "type": "object",
            "properties": {
                "steps": {"type": "array", "items": {"type": "string"}, "minItems": 1}
            },
            "required": ["steps"]
        }))
        .prompt(|state: &ReleaseState, _| format!("Plan the steps to: {}", state.goal))
        .update(|plan: &Plan, state: &mut ReleaseState, _| state.steps = plan.steps.clone())
        .build()?;

    let workflow = WorkflowDef::builder("release-planning", ReleaseState::default())
        .start(|goal: &String, state: &mut ReleaseState| state.goal = goal.clone())
        .phase("planning", PhaseDef::new().run(planner).next("review"))
        .phase(
            "review",
            PhaseDef::new()
                .human(HumanPrompt::approval("Approve the release plan?"))
                .next_with(|state: &ReleaseState| {
                    if state.approved == Some(true) {
                        Transition::to("done")
                    } else {
                        Transition::to("planning")
                    }
                }),
        )
        .phase("done", PhaseDef::terminal())
        .build()?;
    Ok(workflow)
}

fn print_event(event: &SerializedEvent) {
    println!("  {:<16} {}", event.name, event.payload);
}

async fn run_once(
    runtime: &WorkflowRuntime,
    workflow: &WorkflowDef<ReleaseState, String>,
    goal: &str,
    mode: ExecutionMode,
) -> Result<ReleaseState> {
    println!("\n=== {} run ===", mode);
    let options = ExecuteOptions::new()
        .mode(mode)
        .human_input(Arc::new(AutoApprove))
        .on_event(print_event);

    let result = runtime
        .run(workflow, goal.to_string(), options)
        .await
        .with_context(|| format!("{} run failed", mode))?;

    println!(
        "=== session {} finished with {} events ===",
        result.session_id,
        result.events.len()
    );
    Ok(result.state)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let mut config = RuntimeConfig::from_env()?;
    if let Some(db) = args.db.clone() {
        config = config.with_database_path(db);
    }
    let db_path = match config.database_path.clone().or_else(RuntimeConfig::default_database_path) {
        Some(path) => path,
        None => bail!("no database path: pass --db or set WORKFLOW_DB_PATH"),
    };

    let store = Arc::new(SqliteStore::new(&db_path)?);
    let runtime = WorkflowRuntime::new(config)
        .with_store(store.clone())
        .with_recorder(store.clone());
    let workflow = release_workflow(Duration::from_millis(args.delay_ms))?;

    println!("Database: {}", db_path.display());
    println!("Workflow: {} {:?}", workflow.name(), workflow.phase_names());

    if matches!(args.mode, DemoMode::Record | DemoMode::Both) {
        let state = run_once(&runtime, &workflow, &args.goal, ExecutionMode::Live).await?;
        println!("Plan: {:?}", state.steps);
    }
    if matches!(args.mode, DemoMode::Replay | DemoMode::Both) {
        let state = run_once(&runtime, &workflow, &args.goal, ExecutionMode::Playback).await?;
        println!("Replayed plan: {:?}", state.steps);
    }

    Ok(())
}
