//! Governance engine for code-modifying workers.
//!
//! Runs from the project root: `.warden/` holds the task graph, governance
//! state, checkpoints, and the audit trail.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use warden::core::judge::{VerificationResult, judge};
use warden::core::scheduler::WaveSelection;
use warden::error::GovernanceError;
use warden::exit_codes;
use warden::graph::Task;
use warden::io::checkpoint::CheckpointManager;
use warden::io::config::load_config;
use warden::io::context::build_packet;
use warden::io::graph_store::load_graph;
use warden::io::init::{InitOptions, WardenPaths, init_warden};
use warden::io::prompt::render_worker_prompt;
use warden::io::scars::{ScarInput, consolidate, record_scar};
use warden::io::state::load_state;
use warden::io::verifier::CommandVerifier;
use warden::io::worker::CommandWorker;
use warden::logging;
use warden::orchestrator::{
    LoopStop, begin_gap_closure, reset_gap_closure, retry_task, run_loop,
};
use warden::validate::validate_warden;
use warden::wave::wave_from_root;

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Governance engine for code-modifying workers"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.warden/` scaffolding in the current directory.
    Init {
        /// Rewrite config, schema, and ignore file if `.warden/` exists.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, and the task graph; report every violation.
    Validate,
    /// Print the next ready wave (exit 2 when complete, 3 when stalled).
    Wave,
    /// Print the context packet for a task.
    Packet {
        task: String,
        /// Print the rendered worker prompt instead of the packet JSON.
        #[arg(long)]
        prompt: bool,
    },
    /// Run governance cycles until the graph completes or stalls.
    Run,
    /// Judge a verification result file (exit 4 unless approved).
    Judge { file: PathBuf },
    #[command(subcommand)]
    Checkpoint(CheckpointCommand),
    #[command(subcommand)]
    Scar(ScarCommand),
    #[command(subcommand)]
    GapClosure(GapClosureCommand),
    /// Give a blocked or escalated task a fresh start.
    Retry { task: String },
}

#[derive(Subcommand)]
enum CheckpointCommand {
    /// Commit exactly the given files and record a checkpoint.
    Create {
        task: String,
        description: String,
        files: Vec<String>,
    },
    /// Quarantine current changes and hard-reset to a checkpoint.
    Rollback {
        id: String,
        /// Also restore the graph and governance state captured with it.
        #[arg(long)]
        restore_state: bool,
    },
    /// Delete the oldest checkpoint records beyond `--keep`.
    Prune {
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ScarCommand {
    /// Record a confirmed prevention rule for a rollback.
    Record {
        #[arg(long)]
        checkpoint: String,
        #[arg(long)]
        failure: String,
        #[arg(long)]
        root_cause: String,
        #[arg(long)]
        rule: String,
        #[arg(long)]
        confirmed_by: String,
    },
    /// Merge scars carrying the same rule.
    Consolidate,
}

#[derive(Subcommand)]
enum GapClosureCommand {
    /// Append remediation tasks (JSON array file) for a phase.
    Begin { phase: String, file: PathBuf },
    /// Re-enable automation for a phase after the cap was reached.
    Reset { phase: String },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            match err.downcast_ref::<GovernanceError>() {
                Some(GovernanceError::EscalationLimitReached { .. }) => exit_codes::REJECTED,
                _ => exit_codes::INVALID,
            }
        }
    };
    process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Validate => cmd_validate(&root),
        Command::Wave => cmd_wave(&root),
        Command::Packet { task, prompt } => cmd_packet(&root, &task, prompt),
        Command::Run => cmd_run(&root),
        Command::Judge { file } => cmd_judge(&file),
        Command::Checkpoint(command) => cmd_checkpoint(&root, command),
        Command::Scar(command) => cmd_scar(&root, command),
        Command::GapClosure(command) => cmd_gap_closure(&root, command),
        Command::Retry { task } => {
            retry_task(&root, &task)?;
            println!("{task} requeued");
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_warden(root, &InitOptions { force })?;
    println!("initialized {}", paths.warden_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_warden(root)?;
    if let Some(warning) = &outcome.checkpoint_warning {
        eprintln!("warning: {warning}");
    }
    println!("valid: {} tasks in {} waves", outcome.tasks, outcome.waves);
    Ok(exit_codes::OK)
}

fn cmd_wave(root: &Path) -> Result<i32> {
    match wave_from_root(root)? {
        WaveSelection::Ready(wave) => {
            println!("wave {}", wave.number);
            for id in &wave.task_ids {
                println!("{id}");
            }
            Ok(exit_codes::OK)
        }
        WaveSelection::Complete => Ok(exit_codes::COMPLETE),
        WaveSelection::Stalled(report) => {
            eprintln!("{report}");
            Ok(exit_codes::STALLED)
        }
    }
}

fn cmd_packet(root: &Path, task_id: &str, prompt: bool) -> Result<i32> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let config = load_config(&paths.config_path)?;
    let graph = load_graph(&paths)?;
    let state = load_state(&paths)?;
    let packet = build_packet(&paths, &config, &graph, &state, task_id)?;
    if prompt {
        print!("{}", render_worker_prompt(&packet)?);
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&packet).context("serialize packet")?
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path) -> Result<i32> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let config = load_config(&paths.config_path)?;
    let worker = CommandWorker::new(config.worker.command.clone())?;
    let verifier = CommandVerifier::new(config.verifier.command.clone())?;

    let outcome = run_loop(root, &worker, &verifier, |report| {
        println!(
            "cycle {} wave {}{}",
            report.cycle,
            report.wave,
            report
                .checkpoint
                .as_ref()
                .map(|id| format!(" (checkpoint {id})"))
                .unwrap_or_default()
        );
        for result in &report.results {
            println!("  {} {}: {}", result.task_id, result.status, result.detail);
        }
    })?;

    match outcome.stop {
        LoopStop::Complete => {
            println!("complete after {} cycles", outcome.cycles);
            Ok(exit_codes::OK)
        }
        LoopStop::Stalled(report) => {
            eprintln!("{report}");
            let state = load_state(&paths)?;
            if state.escalations.is_empty() {
                Ok(exit_codes::STALLED)
            } else {
                eprintln!("escalated: {}", state.escalations.join(", "));
                Ok(exit_codes::REJECTED)
            }
        }
        LoopStop::MaxCycles { max_cycles } => {
            eprintln!("stopped at the {max_cycles}-cycle cap with work left; run again to continue");
            Ok(exit_codes::STALLED)
        }
    }
}

fn cmd_judge(file: &Path) -> Result<i32> {
    let contents =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let result: VerificationResult = serde_json::from_str(&contents)
        .with_context(|| format!("parse verification result {}", file.display()))?;
    let decision = judge(&result);
    println!(
        "{}",
        serde_json::to_string_pretty(&decision).context("serialize decision")?
    );
    if decision.is_approved() {
        Ok(exit_codes::OK)
    } else {
        Ok(exit_codes::REJECTED)
    }
}

fn cmd_checkpoint(root: &Path, command: CheckpointCommand) -> Result<i32> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    let manager = CheckpointManager::new(&paths);
    match command {
        CheckpointCommand::Create {
            task,
            description,
            files,
        } => {
            let checkpoint = manager.create(&task, &description, &files, Utc::now())?;
            println!("{} {}", checkpoint.id, checkpoint.revision);
        }
        CheckpointCommand::Rollback { id, restore_state } => {
            let report = manager.rollback(&id, Utc::now())?;
            if restore_state {
                manager.restore_snapshot(&id)?;
            }
            println!(
                "rolled back to {} ({}); discarded changes in {}",
                report.checkpoint_id,
                report.revision,
                report.quarantine.display()
            );
        }
        CheckpointCommand::Prune { keep } => {
            let keep = match keep {
                Some(keep) => keep,
                None => load_config(&paths.config_path)?.checkpoint_retention,
            };
            for id in manager.prune(keep)? {
                println!("pruned {id}");
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_scar(root: &Path, command: ScarCommand) -> Result<i32> {
    let paths = WardenPaths::new(root);
    paths.ensure_initialized()?;
    match command {
        ScarCommand::Record {
            checkpoint,
            failure,
            root_cause,
            rule,
            confirmed_by,
        } => {
            let scar = record_scar(
                &paths,
                &ScarInput {
                    checkpoint_id: checkpoint,
                    failure,
                    root_cause,
                    rule,
                    confirmed_by,
                },
                Utc::now(),
            )?;
            println!("{}", scar.id);
        }
        ScarCommand::Consolidate => {
            for (folded, survivor) in consolidate(&paths)? {
                println!("{folded} -> {survivor}");
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_gap_closure(root: &Path, command: GapClosureCommand) -> Result<i32> {
    match command {
        GapClosureCommand::Begin { phase, file } => {
            let contents =
                fs::read_to_string(&file).with_context(|| format!("read {}", file.display()))?;
            let tasks: Vec<Task> = serde_json::from_str(&contents)
                .with_context(|| format!("parse remediation tasks {}", file.display()))?;
            let round = begin_gap_closure(root, &phase, tasks)?;
            println!("{phase}: gap-closure round {round}");
        }
        GapClosureCommand::Reset { phase } => {
            for id in reset_gap_closure(root, &phase)? {
                println!("requeued {id}");
            }
        }
    }
    Ok(exit_codes::OK)
}
