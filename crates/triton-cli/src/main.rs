//! `triton-cli` – Triton command line interface.
//!
//! One binary, one process per role:
//!
//! ```text
//! triton run modeling          # observations → fused state
//! triton run mission           # fused state  → commands
//! triton run control           # commands     → actuation
//! triton replay run.obs --snapshot pool.bin
//! triton init-config
//! triton show-config
//! ```
//!
//! Configuration comes from `~/.triton/config.toml` (or `--config`), with
//! `TRITON_*` environment overrides.  Ctrl-C asks the running role to stop;
//! the modeling role still writes its snapshot on the way out.
//!
//! Everything human-readable goes to stderr: a role configured with `-` as
//! its output owns stdout.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use triton_middleware::{open_reader, open_writer};
use triton_runtime::modeling::save_snapshot;
use triton_runtime::{
    ControlRole, LoggingPlanner, LoggingSink, MissionRole, ModelingRole, ShutdownTrigger,
    replay_file, shutdown_pair,
};
use triton_types::{Role, StateIndex};

/// Triton: AUV perception fusion and role processes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.triton/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run one role of the topology until its input closes or Ctrl-C.
    Run {
        /// control, mission or modeling.
        role: Role,
    },
    /// Fuse a recorded observation file offline and print the best estimate.
    Replay {
        /// File of observation messages (`-` for stdin).
        observations: PathBuf,
        /// Write the final pool snapshot here.
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Print the effective configuration (file + environment) as TOML.
    ShowConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let service = match &cli.command {
        CliCommand::Run { role } => format!("triton-{role}"),
        CliCommand::Replay { .. } => "triton-replay".to_string(),
        _ => "triton".to_string(),
    };
    let _guard = triton_runtime::init_tracing(&service);

    let config_path = cli.config.clone().unwrap_or_else(config::config_path);
    let result = match cli.command {
        CliCommand::InitConfig { force } => init_config(&config_path, force),
        CliCommand::ShowConfig => show_config(&config_path),
        CliCommand::Run { role } => run_role(&config_path, role),
        CliCommand::Replay {
            observations,
            snapshot,
        } => replay(&config_path, &observations, snapshot.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subcommands
// ─────────────────────────────────────────────────────────────────────────────

fn init_config(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    config::save_to(&config::Config::default(), path)?;
    eprintln!("  {} wrote {}", "✓".green(), path.display().to_string().bold());
    Ok(())
}

fn show_config(path: &Path) -> Result<(), String> {
    let cfg = config::load_or_default(path)?;
    let raw =
        toml::to_string_pretty(&cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    eprintln!("  # effective configuration ({})", path.display().to_string().dimmed());
    println!("{raw}");
    Ok(())
}

fn run_role(path: &Path, role: Role) -> Result<(), String> {
    let cfg = config::load_or_default(path)?;
    let connection = cfg
        .connections
        .require(role)
        .map_err(|e| e.to_string())?
        .clone();

    print_banner(role);
    eprintln!(
        "  {} {}  →  {}",
        "channels:".dimmed(),
        connection.input.bold(),
        connection.output.bold()
    );

    let (trigger, signal) = shutdown_pair();
    install_ctrlc(trigger);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    runtime
        .block_on(async move {
            let mut reader = open_reader(&connection.input).await?;
            match role {
                Role::Modeling => {
                    let mut writer = open_writer(&connection.output).await?;
                    let mut modeling = ModelingRole::from_settings(&cfg.modeling_settings()).await?;
                    let stats = modeling.run(&mut reader, &mut writer, signal).await?;
                    info!(published = stats.published, "modeling exited");
                }
                Role::Mission => {
                    let mut writer = open_writer(&connection.output).await?;
                    let mut mission = MissionRole::new(LoggingPlanner::default());
                    mission.run(&mut reader, &mut writer, signal).await?;
                }
                Role::Control => {
                    let mut control = ControlRole::new(LoggingSink::default());
                    control.run(&mut reader, signal).await?;
                }
            }
            Ok::<_, triton_types::TritonError>(())
        })
        .map_err(|e| e.to_string())?;

    eprintln!("  {} {} stopped cleanly", "✓".green(), role.to_string().bold());
    Ok(())
}

fn replay(path: &Path, observations: &Path, snapshot: Option<&Path>) -> Result<(), String> {
    let cfg = config::load_or_default(path)?;
    let settings = cfg.modeling_settings();

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;
    let report = runtime
        .block_on(async {
            let report = replay_file(observations, &settings).await?;
            if let Some(out) = snapshot {
                save_snapshot(out, &report.model).await?;
            }
            Ok::<_, triton_types::TritonError>(report)
        })
        .map_err(|e| e.to_string())?;

    eprintln!(
        "  {} messages, {} records fused, {} skipped, {} hypotheses",
        report.stats.messages.to_string().bold(),
        report.stats.fused.to_string().bold(),
        if report.stats.skipped > 0 {
            report.stats.skipped.to_string().yellow()
        } else {
            report.stats.skipped.to_string().normal()
        },
        report.model.size().to_string().bold()
    );
    if let Some(out) = snapshot {
        eprintln!("  {} snapshot written to {}", "✓".green(), out.display());
    }

    let best = report.model.best();
    println!("# weight {:.6}", best.weight());
    for index in StateIndex::ALL {
        println!(
            "{:<14} {:>10.4} {:>10.4}",
            index.name(),
            best.mean_at(index),
            best.variance_at(index)
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn install_ctrlc(trigger: ShutdownTrigger) {
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        trigger.trigger();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will kill the process without cleanup");
    }
}

fn print_banner(role: Role) {
    eprintln!();
    eprintln!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    eprintln!("{}", "  ║                TRITON                ║".bold().cyan());
    eprintln!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    eprintln!("  {} {}", "role:".dimmed(), role.to_string().bold());
}
