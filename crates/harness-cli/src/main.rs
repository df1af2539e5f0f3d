// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod config;
mod format;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use harness_config::env::ClaudeStepEngineMode;
use harness_config::HarnessEnv;
use harness_core::ScentTrail;
use harness_error::{ErrorCode, HarnessError};
use harness_orchestrator::{DetourCatalog, FlowOrchestrator};
use harness_selftest::{persist, RegistrySnapshot, SelftestContext, SelftestMode, SelftestRunner};
use harness_store::RunStore;
use harness_transport::stub::StubTransport;
use tracing_subscriber::EnvFilter;

/// Exit code for a blocking failure.
const EXIT_BLOCKING_FAILURE: i32 = 1;
/// Exit code for a configuration or usage error.
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "harness", version, about = "Orchestrated SDLC harness CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one of the six pipeline flows, or the selftest plan, against a run id.
    Flow(FlowArgs),
}

#[derive(Args, Debug)]
struct FlowArgs {
    /// Which flow (or selftest) to run.
    #[arg(value_enum)]
    cmd: FlowCmd,

    /// Run id this invocation operates on.
    run_id: String,

    /// Selftest only: run in degraded mode (kernel failures still block).
    #[arg(long)]
    degraded: bool,

    /// Selftest only: run kernel-tier steps only.
    #[arg(long)]
    kernel_only: bool,

    /// Run a single step (and its microloop partner, if any) instead of the whole flow.
    #[arg(long)]
    step: Option<String>,

    /// Run the flow up to and including this step (and its microloop partner, if any).
    #[arg(long)]
    until: Option<String>,

    /// Print the steps that would run without executing them.
    #[arg(long)]
    plan: bool,

    /// Emit the result as JSON instead of the plain text summary.
    #[arg(long)]
    json: bool,

    /// Emit the result as the v2 JSON shape (same payload, reserved for a future schema bump).
    #[arg(long = "json-v2")]
    json_v2: bool,

    /// Write the result (in the chosen format) to this file as well as stdout.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long)]
    verbose: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FlowCmd {
    Signal,
    Plan,
    Build,
    Gate,
    Deploy,
    Wisdom,
    Selftest,
}

impl FlowCmd {
    fn flow_key(self) -> Option<&'static str> {
        match self {
            Self::Signal => Some("signal"),
            Self::Plan => Some("plan"),
            Self::Build => Some("build"),
            Self::Gate => Some("gate"),
            Self::Deploy => Some("deploy"),
            Self::Wisdom => Some("wisdom"),
            Self::Selftest => None,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let Commands::Flow(args) = cli.command;

    let filter = if args.verbose { EnvFilter::new("harness=debug") } else { EnvFilter::new("harness=info") };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let env = HarnessEnv::from_process_env();

    let exit_code = match run(&env, &args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_CONFIG_ERROR
        }
    };

    std::process::exit(exit_code);
}

async fn run(env: &HarnessEnv, args: &FlowArgs) -> Result<i32> {
    match args.cmd {
        FlowCmd::Selftest => run_selftest(env, args).await,
        _ => run_flow(env, args).await,
    }
}

async fn run_selftest(env: &HarnessEnv, args: &FlowArgs) -> Result<i32> {
    let store = RunStore::new(&env.run_base, &args.run_id).context("open run store")?;

    let registries = config::load_registries().ok().map(|(agents, flows)| {
        let flow_count = flows.ordered_keys().count();
        let referenced_agent_keys = flows
            .ordered_keys()
            .filter_map(|key| flows.get(key))
            .flat_map(|flow| flow.steps.iter().map(|s| s.agent_key.clone()))
            .collect();
        RegistrySnapshot { agent_keys: agents.keys().cloned().collect(), referenced_agent_keys, flow_count }
    });

    let ctx = SelftestContext { run_base: env.run_base.clone(), run_id: Some(args.run_id.clone()), registries };

    let mode = if args.kernel_only {
        SelftestMode::KernelOnly
    } else if args.degraded || env.selftest_force_degraded {
        SelftestMode::Degraded
    } else {
        SelftestMode::Strict
    };

    let outcome = SelftestRunner::new(ctx)
        .with_explicit_skips(env.selftest_skip_steps.clone())
        .run(mode)
        .context("run selftest plan")?;

    persist(&store, &outcome).context("persist selftest report")?;

    if args.json || args.json_v2 {
        emit_json(&outcome.report, args.report.as_deref())?;
    } else {
        format::print_selftest_outcome_plain(&outcome);
        if let Some(path) = &args.report {
            std::fs::write(path, serde_json::to_vec_pretty(&outcome.report)?).with_context(|| format!("write report to {}", path.display()))?;
        }
    }

    Ok(outcome.exit_code)
}

async fn run_flow(env: &HarnessEnv, args: &FlowArgs) -> Result<i32> {
    if env.claude_step_engine_mode == ClaudeStepEngineMode::Sdk {
        return Err(HarnessError::new(
            ErrorCode::ConfigError,
            "SWARM_CLAUDE_STEP_ENGINE_MODE=sdk has no transport in this build; unset it or use the stub engine",
        )
        .into());
    }

    let flow_key = args.cmd.flow_key().expect("non-selftest FlowCmd always has a flow_key");

    let (_agents, flows) = config::load_registries().context("load agent/flow registries")?;
    let flow = flows.get(flow_key).with_context(|| format!("flow registry has no entry for '{flow_key}'"))?;
    let flow = config::restrict_flow(flow, args.step.as_deref(), args.until.as_deref())?;

    if args.plan {
        println!("flow: {flow_key}");
        for step in &flow.steps {
            println!("  {} ({})", step.step_id, step.agent_key);
        }
        return Ok(0);
    }

    let store = RunStore::new(&env.run_base, &args.run_id).context("open run store")?;
    let detours = DetourCatalog::new();
    let transport = StubTransport::new();
    let orchestrator = FlowOrchestrator::new(&store, &detours);

    let mut scent = load_scent_trail(&store).unwrap_or_default();
    let outcome = orchestrator.run_flow(&flow, &args.run_id, &mut scent, &transport).await;
    save_scent_trail(&store, &scent).context("persist scent trail")?;

    if args.json || args.json_v2 {
        let summary = format::FlowOutcomeSummary::from(&outcome);
        emit_json(&summary, args.report.as_deref())?;
    } else {
        format::print_flow_outcome_plain(&outcome);
        if let Some(path) = &args.report {
            let summary = format::FlowOutcomeSummary::from(&outcome);
            std::fs::write(path, serde_json::to_vec_pretty(&summary)?).with_context(|| format!("write report to {}", path.display()))?;
        }
    }

    Ok(if format::flow_has_blocking_failure(&outcome) { EXIT_BLOCKING_FAILURE } else { 0 })
}

fn emit_json<T: serde::Serialize>(value: &T, report: Option<&std::path::Path>) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).context("serialize result as JSON")?;
    println!("{}", String::from_utf8_lossy(&bytes));
    if let Some(path) = report {
        std::fs::write(path, &bytes).with_context(|| format!("write report to {}", path.display()))?;
    }
    Ok(())
}

fn load_scent_trail(store: &RunStore) -> Option<ScentTrail> {
    let bytes = store.read(&config::scent_trail_path()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn save_scent_trail(store: &RunStore, scent: &ScentTrail) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(scent)?;
    store.write(&config::scent_trail_path(), &bytes)?;
    Ok(())
}
