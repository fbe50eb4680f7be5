//! CLI subcommands — init, validate, plan, deploy, status, export, reset.

use crate::audit::eventlog;
use crate::core::config::{self, ProjectConfig, SelectedNetwork};
use crate::core::executor::{self, CancelFlag, DeployConfig};
use crate::core::graph::ActionGraph;
use crate::core::ledger::Ledger;
use crate::core::types::{self, Declaration, DeployEvent};
use crate::core::parser;
use crate::core::resolver;
use crate::error::{Error, Result};
use crate::target::simulated::{self, SimulatedTarget};
use clap::{Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new rivet project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a declaration without submitting anything
    Validate {
        /// Path to the declaration
        #[arg(default_value = "deploy.yaml")]
        file: PathBuf,
    },

    /// Show what a deploy would do for each action
    Plan {
        /// Path to the declaration
        #[arg(default_value = "deploy.yaml")]
        file: PathBuf,

        /// Target network (default: from rivet.yaml)
        #[arg(short, long)]
        network: Option<String>,

        /// Run identity (default: <name>-chain-<chain_id>)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Deploy a declaration, resuming any earlier run with the same id
    Deploy {
        /// Path to the declaration
        #[arg(default_value = "deploy.yaml")]
        file: PathBuf,

        /// Target network (default: from rivet.yaml)
        #[arg(short, long)]
        network: Option<String>,

        /// Run identity (default: <name>-chain-<chain_id>)
        #[arg(long)]
        run_id: Option<String>,

        /// Clear the run's ledger records before deploying
        #[arg(long)]
        reset: bool,

        /// Show the plan without submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show ledger state for all runs, or one run in detail
    Status {
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Print a run's ledger records
    Export {
        #[arg(long)]
        run_id: String,

        #[arg(long, value_enum, default_value_t = ExportFormat::Yaml)]
        format: ExportFormat,
    },

    /// Delete a run's ledger records
    Reset {
        #[arg(long)]
        run_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Yaml,
    Json,
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands, config_path: &Path) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file, config_path),
        Commands::Plan {
            file,
            network,
            run_id,
        } => cmd_plan(&file, config_path, network.as_deref(), run_id.as_deref()),
        Commands::Deploy {
            file,
            network,
            run_id,
            reset,
            dry_run,
        } => {
            let opts = DeployArgs {
                network: network.as_deref(),
                run_id: run_id.as_deref(),
                reset,
                dry_run,
            };
            cmd_deploy(&file, config_path, &opts).await
        }
        Commands::Status { run_id } => cmd_status(config_path, run_id.as_deref()),
        Commands::Export { run_id, format } => {
            let out = cmd_export(config_path, &run_id, format)?;
            print!("{}", out);
            Ok(())
        }
        Commands::Reset { run_id } => cmd_reset(config_path, &run_id),
    }
}

const PROJECT_TEMPLATE: &str = r#"state_dir: state
default_network: hardhat

networks:
  hardhat:
    chain_id: 31337
    confirmations: 1
    submit_timeout_secs: 300
    stale_in_flight_secs: 900
    params: {}
"#;

const DECLARATION_TEMPLATE: &str = r#"version: "1.0"
name: my-deployment
description: "Managed by rivet"

params: {}

actions: {}

results: []

policy:
  on_changed: warn
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("rivet.yaml");
    if config_path.exists() {
        return Err(Error::Config(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)?;
    std::fs::write(&config_path, PROJECT_TEMPLATE)?;

    let decl_path = path.join("deploy.yaml");
    let wrote_decl = !decl_path.exists();
    if wrote_decl {
        std::fs::write(&decl_path, DECLARATION_TEMPLATE)?;
    }

    println!("Initialized rivet project at {}", path.display());
    println!("  Created: {}", config_path.display());
    if wrote_decl {
        println!("  Created: {}", decl_path.display());
    }
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path, config_path: &Path) -> Result<()> {
    let project = config::load_project_config(config_path)?;
    let decl = parse_and_validate(file)?;

    // Check templates resolve on every configured network
    for name in project.networks.keys() {
        let network = project.network(Some(name))?;
        let graph = ActionGraph::build(&decl, Some(&network))?;
        resolver::build_execution_order(&graph)?;
    }

    println!(
        "OK: {} ({} actions, {} results)",
        decl.name,
        decl.actions.len(),
        decl.results.len()
    );
    Ok(())
}

/// Parse and validate a declaration file, printing every problem found.
fn parse_and_validate(file: &Path) -> Result<Declaration> {
    let decl = parser::parse_declaration_file(file)?;
    let errors = parser::validate_declaration(&decl);
    if errors.is_empty() {
        return Ok(decl);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(Error::Validation(errors.len()))
}

/// Everything a plan or deploy needs, loaded from disk.
struct Loaded {
    project: ProjectConfig,
    network: SelectedNetwork,
    graph: ActionGraph,
    run_id: String,
}

fn load(file: &Path, config_path: &Path, network: Option<&str>, run_id: Option<&str>) -> Result<Loaded> {
    let project = config::load_project_config(config_path)?;
    let network = project.network(network)?;
    let decl = parse_and_validate(file)?;
    let graph = ActionGraph::build(&decl, Some(&network))?;
    let run_id = run_id
        .map(str::to_string)
        .unwrap_or_else(|| network.default_run_id(&decl.name));
    Ok(Loaded {
        project,
        network,
        graph,
        run_id,
    })
}

/// Open the ledger for read-only commands. A missing database is not created.
fn open_existing_ledger(project: &ProjectConfig) -> Result<Option<Ledger>> {
    let path = project.ledger_path();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Ledger::open(&path)?))
}

fn cmd_plan(file: &Path, config_path: &Path, network: Option<&str>, run_id: Option<&str>) -> Result<()> {
    let loaded = load(file, config_path, network, run_id)?;
    let ledger = match open_existing_ledger(&loaded.project)? {
        Some(l) => l,
        None => Ledger::open_in_memory()?,
    };
    let plan = executor::dry_run(&loaded.graph, &loaded.run_id, &ledger)?;
    print_plan(&plan, &loaded.network);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::DeployPlan, network: &SelectedNetwork) {
    println!(
        "Planning: {} on {} (run {}, {} actions)",
        plan.name,
        network.name,
        plan.run_id,
        plan.actions.len()
    );
    println!();

    for planned in &plan.actions {
        let symbol = match planned.step {
            types::PlanStep::Submit => "+",
            types::PlanStep::Retry => "!",
            types::PlanStep::Reconcile => "?",
            types::PlanStep::Skip => " ",
        };
        println!("  {} {}", symbol, planned.description);
    }

    println!();
    println!(
        "Plan: {} to submit, {} to retry, {} to reconcile, {} completed.",
        plan.to_submit, plan.to_retry, plan.to_reconcile, plan.completed
    );
}

/// Flags of the deploy command.
pub struct DeployArgs<'a> {
    pub network: Option<&'a str>,
    pub run_id: Option<&'a str>,
    pub reset: bool,
    pub dry_run: bool,
}

async fn cmd_deploy(file: &Path, config_path: &Path, opts: &DeployArgs<'_>) -> Result<()> {
    let loaded = load(file, config_path, opts.network, opts.run_id)?;
    let state_dir = loaded.project.state_dir.as_path();

    if opts.dry_run {
        let ledger = match open_existing_ledger(&loaded.project)? {
            Some(l) => l,
            None => Ledger::open_in_memory()?,
        };
        let plan = executor::dry_run(&loaded.graph, &loaded.run_id, &ledger)?;
        print_plan(&plan, &loaded.network);
        println!("Dry run — nothing submitted.");
        return Ok(());
    }

    let ledger = Ledger::open(&loaded.project.ledger_path())?;
    if opts.reset {
        clear_run(&ledger, state_dir, &loaded.run_id)?;
    }

    let chain_path = simulated::chain_state_path(state_dir, &loaded.network.name);
    let target = SimulatedTarget::open(&loaded.network.config, &chain_path)?;

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current action");
                cancel.cancel();
            }
        })
    };

    let cfg = DeployConfig {
        graph: &loaded.graph,
        run_id: &loaded.run_id,
        network: &loaded.network,
        ledger: &ledger,
        target: &target,
        state_dir: Some(state_dir),
        cancel: Some(&cancel),
    };
    let outcome = executor::deploy(&cfg).await;
    watcher.abort();

    let report = outcome?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &types::DeployReport) {
    println!("Run: {}", report.run_id);
    for (id, outcome) in &report.outcomes {
        let (symbol, label) = match outcome {
            types::ActionOutcome::Submitted => ("+", "submitted"),
            types::ActionOutcome::Skipped => (" ", "already completed"),
            types::ActionOutcome::Reconciled => ("~", "reconciled"),
        };
        let result = report
            .bound
            .get(id)
            .filter(|v| !v.is_null())
            .map(|v| format!(" = {}", types::value_to_string(v)))
            .unwrap_or_default();
        println!("  {} {}: {}{}", symbol, id, label, result);
    }

    println!();
    println!(
        "Deploy complete: {} submitted, {} skipped, {} reconciled ({:.1}s).",
        report.submitted,
        report.skipped,
        report.reconciled,
        report.total_duration.as_secs_f64()
    );

    if !report.exports.is_empty() {
        println!();
        println!("Results:");
        for (id, value) in &report.exports {
            println!("  {}: {}", id, types::value_to_string(value));
        }
    }
}

fn cmd_status(config_path: &Path, run_id: Option<&str>) -> Result<()> {
    let project = config::load_project_config(config_path)?;
    let Some(ledger) = open_existing_ledger(&project)? else {
        println!("No runs found. Run `rivet deploy` first.");
        return Ok(());
    };

    if let Some(run) = run_id {
        let records = ledger.records(run)?;
        if records.is_empty() {
            println!("No records for run {}.", run);
            return Ok(());
        }
        println!("Run: {} ({} actions recorded)", run, records.len());
        for rec in &records {
            let result = rec
                .result
                .as_ref()
                .filter(|v| !v.is_null())
                .map(|v| format!(" = {}", types::value_to_string(v)))
                .unwrap_or_default();
            let error = rec
                .error
                .as_ref()
                .filter(|_| rec.status != types::ActionStatus::Completed)
                .map(|e| format!(" [{}]", e))
                .unwrap_or_default();
            println!(
                "    {}: {} (attempts {}){}{}",
                rec.action_id, rec.status, rec.attempts, result, error
            );
        }
        return Ok(());
    }

    let runs = ledger.runs()?;
    if runs.is_empty() {
        println!("No runs found. Run `rivet deploy` first.");
        return Ok(());
    }
    for run in &runs {
        println!(
            "{}: {} completed, {} failed, {} in flight ({} records, updated {})",
            run.run_id,
            run.completed,
            run.failed,
            run.in_flight,
            run.records,
            run.updated_at.to_rfc3339()
        );
    }
    Ok(())
}

/// Serialize a run's records.
fn cmd_export(config_path: &Path, run_id: &str, format: ExportFormat) -> Result<String> {
    let project = config::load_project_config(config_path)?;
    let records = match open_existing_ledger(&project)? {
        Some(ledger) => ledger.records(run_id)?,
        None => Vec::new(),
    };
    if records.is_empty() {
        return Err(Error::Config(format!("no records for run '{}'", run_id)));
    }
    let out = match format {
        ExportFormat::Yaml => serde_yaml_ng::to_string(&records)?,
        ExportFormat::Json => {
            let mut json = serde_json::to_string_pretty(&records)?;
            json.push('\n');
            json
        }
    };
    Ok(out)
}

fn cmd_reset(config_path: &Path, run_id: &str) -> Result<()> {
    let project = config::load_project_config(config_path)?;
    let Some(ledger) = open_existing_ledger(&project)? else {
        println!("Cleared 0 record(s) for run {}.", run_id);
        return Ok(());
    };
    clear_run(&ledger, &project.state_dir, run_id)?;
    Ok(())
}

fn clear_run(ledger: &Ledger, state_dir: &Path, run_id: &str) -> Result<usize> {
    let cleared = ledger.clear_run(run_id)?;
    eventlog::record(
        Some(state_dir),
        run_id,
        DeployEvent::RunReset {
            run_id: run_id.to_string(),
            records_cleared: cleared,
        },
    );
    println!("Cleared {} record(s) for run {}.", cleared, run_id);
    Ok(cleared)
}
