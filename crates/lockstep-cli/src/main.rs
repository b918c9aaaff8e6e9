mod config;
mod driver;
mod preflight;
mod render;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use lockstep_core::{OperationRecord, Scenario, ScenarioTemplate};
use lockstep_lifecycle::{Poetry, ProjectLifecycle};
use lockstep_runner::{
    create_run_root, prepare_existing_root, AuditLog, ChangeRecorder, GitCli, ProcessRunner,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::HarnessConfig;
use crate::driver::ScenarioDriver;
use crate::preflight::probe_registries;
use crate::render::{
    current_output_style, render_record_line, render_records_json, render_status_line,
    OutputStyle, StepProgress,
};

#[derive(Parser, Debug)]
#[command(name = "lockstep")]
#[command(
    about = "Drive a package manager through a dependency-chain scenario and record every state change",
    long_about = None
)]
struct Cli {
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a scenario in a fresh root and write the audit log.
    Run(RunArgs),
    /// Print a built-in scenario as TOML.
    Scenario {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = TemplateArg::Chain)]
        template: TemplateArg,
    },
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, conflicts_with = "template")]
    scenario: Option<PathBuf>,
    #[arg(long, value_enum)]
    template: Option<TemplateArg>,
    /// Existing empty directory to create projects in instead of a fresh temp directory.
    #[arg(long)]
    root: Option<PathBuf>,
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Package-manager executable.
    #[arg(long)]
    poetry: Option<String>,
    #[arg(long)]
    preflight: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TemplateArg {
    Chain,
    ChainUpdateAll,
}

impl From<TemplateArg> for ScenarioTemplate {
    fn from(value: TemplateArg) -> Self {
        match value {
            TemplateArg::Chain => Self::Chain,
            TemplateArg::ChainUpdateAll => Self::ChainUpdateAll,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run_cli(cli)
}

fn init_tracing(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("LOCKSTEP_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run(args) => run_scenario_command(args),
        Commands::Scenario { config, template } => {
            let config = HarnessConfig::load(config.as_deref())?;
            let scenario = load_scenario(None, Some(template), &config)?;
            print!("{}", scenario.to_toml_string()?);
            Ok(())
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "lockstep", &mut io::stdout());
            Ok(())
        }
    }
}

fn load_scenario(
    path: Option<&Path>,
    template: Option<TemplateArg>,
    config: &HarnessConfig,
) -> Result<Scenario> {
    match path {
        Some(path) => Scenario::load(path),
        None => {
            let template = ScenarioTemplate::from(template.unwrap_or(TemplateArg::Chain));
            template.build_with(
                &config.registry_source()?,
                config.template.root_dependency.as_ref(),
            )
        }
    }
}

fn apply_overrides(config: &mut HarnessConfig, args: &RunArgs) {
    if let Some(program) = &args.poetry {
        config.package_manager.program = program.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        config.audit.log_dir = log_dir.clone();
    }
    if args.preflight {
        config.index.preflight = true;
    }
}

fn run_scenario_command(args: RunArgs) -> Result<()> {
    let mut config = HarnessConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let scenario = load_scenario(args.scenario.as_deref(), args.template, &config)?;
    scenario.validate()?;
    if config.index.preflight {
        probe_registries(&scenario.registry_urls())?;
    }

    let audit = AuditLog::create_in(&config.audit.log_dir, &config.audit.logger)?;
    let log_path = audit.path().map(Path::to_path_buf).unwrap_or_default();
    let run_root = match args.root.as_deref() {
        Some(root) => prepare_existing_root(root)?,
        None => create_run_root(&std::env::temp_dir())?,
    };

    let recorder = ChangeRecorder::new(
        Box::new(ProcessRunner),
        Box::new(GitCli::new(config.vcs.program.as_str())),
        audit,
    );
    let lifecycle = ProjectLifecycle::new(
        Box::new(Poetry::new(config.package_manager.program.as_str())),
        recorder,
        config.lifecycle_settings(),
    );
    let mut driver = ScenarioDriver::new(run_root, lifecycle);

    let style = if args.json {
        OutputStyle::Plain
    } else {
        current_output_style()
    };
    let progress = StepProgress::start(style, scenario.steps.len());
    let outcome = driver.run(&scenario, |index, step| progress.step(index, step));
    progress.finish();

    let run_root = driver.run_root().to_path_buf();
    info!(records = driver.audit().records().len(), "scenario finished");
    let audit = driver.into_audit();

    if let Err(err) = outcome {
        close_audit_after_failure(audit);
        eprintln!(
            "{}",
            render_status_line(
                style,
                "error",
                &format!("projects left in {}", run_root.display())
            )
        );
        eprintln!(
            "{}",
            render_status_line(style, "error", &format!("audit log {}", log_path.display()))
        );
        return Err(err);
    }

    let records = audit.finish()?;
    print_run_output(&run_root, &log_path, &records, style, args.json)
}

/// Flushes what the log holds so far; a flush failure is reported but never replaces the
/// run's own error.
fn close_audit_after_failure(audit: AuditLog) -> bool {
    match audit.finish() {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "audit log may stop short of the failure");
            false
        }
    }
}

fn print_run_output(
    run_root: &Path,
    log_path: &Path,
    records: &[OperationRecord],
    style: OutputStyle,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", render_records_json(run_root, log_path, records)?);
        return Ok(());
    }

    println!("{}", run_root.display());
    println!("{}", log_path.display());
    for record in records {
        println!("{}", render_record_line(style, record));
    }
    Ok(())
}

#[cfg(test)]
mod tests;
