// src/cli.rs

use crate::core::component::ComponentKind;
use crate::core::orchestrator::{Orchestrator, RunError, RunOptions, RunReport, StepStatus};
use crate::core::plan;
use crate::core::registry::Registry;
use crate::state::GlobalContext;
use crate::system::executor::SystemRunner;
use clap::{ArgAction, Parser, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};

/// kiflow: runs the checks and builds the fabrication documents of a KiCad project.
///
/// The pipeline is described in a plan file (`kiflow.toml` by default):
/// preflights (ERC, DRC) run first, then the outputs. Outputs can be selected
/// by name; by default all of them are built.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The plan file. Defaults to `kiflow.toml` in the current directory.
    #[arg(short = 'c', long = "plan")]
    pub plan: Option<PathBuf>,

    /// The schematic file. Guessed from the project directory when omitted.
    #[arg(short = 'e', long)]
    pub schematic: Option<PathBuf>,

    /// The board file. Guessed from the project directory when omitted.
    #[arg(short = 'b', long)]
    pub board: Option<PathBuf>,

    /// Output directory, overrides the plan's `global.dir`.
    #[arg(short = 'd', long = "out-dir")]
    pub out_dir: Option<PathBuf>,

    /// More output. Repeat for more detail, also passed to the KiCad tools.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only warnings and errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// List the targets without running anything.
    #[arg(short, long)]
    pub list: bool,

    /// Continue with the next output when one fails.
    #[arg(short, long)]
    pub keep_going: bool,

    /// Show the options of every component of a kind and exit.
    #[arg(long, value_name = "KIND")]
    pub help_options: Option<KindArg>,

    /// Outputs to build. All of them when empty.
    pub outputs: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Preflights,
    Filters,
    Variants,
    Outputs,
}

impl From<KindArg> for ComponentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Preflights => Self::Preflight,
            KindArg::Filters => Self::Filter,
            KindArg::Variants => Self::Variant,
            KindArg::Outputs => Self::Output,
        }
    }
}

impl Cli {
    /// The `log` filter matching the verbosity flags.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Runs the whole pipeline as requested on the command line.
pub fn run(cli: &Cli) -> Result<(), RunError> {
    let ctx = GlobalContext::global();
    let registry = Registry::global()?;
    ctx.set_debug_level(cli.verbose);

    if let Some(kind) = cli.help_options {
        let kind = ComponentKind::from(kind);
        println!("{}", format!("Available {kind}s:").bold());
        print!("{}", registry.help(kind, ctx));
        return Ok(());
    }

    let plan_path = match &cli.plan {
        Some(path) => path.clone(),
        None => plan::find_plan_file(Path::new("."))?,
    };
    let file = plan::load_plan_file(&plan_path)?;
    let project_dir = plan_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    ctx.set_project_dir(project_dir);
    if let Some(sch) = &cli.schematic {
        ctx.set_sch_file(sch);
    }
    if let Some(pcb) = &cli.board {
        ctx.set_pcb_file(pcb);
    }
    if let Some(dir) = &cli.out_dir {
        ctx.set_out_dir(dir);
    }
    plan::apply_globals(&file, ctx)?;
    let plan = plan::configure(&file, registry, ctx)?;

    let runner = SystemRunner;
    let mut orchestrator = Orchestrator::new(ctx, &runner);
    let options = RunOptions {
        keep_going: cli.keep_going,
        list_only: cli.list,
        targets: cli.outputs.clone(),
    };
    let report = orchestrator.run(&plan, &options)?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let arrow = "├─>".dimmed();
    for step in &report.steps {
        let status = match step.status {
            StepStatus::Listed => "".normal(),
            StepStatus::Done => "done".green(),
            StepStatus::Skipped => "skipped".yellow(),
            StepStatus::Failed { exit_code } => format!("failed ({exit_code})").red(),
        };
        println!("{} {} {}", format!("[{}]", step.kind).dimmed(), step.name.cyan(), status);
        for target in &step.targets {
            println!("{} {}", arrow, target.display());
        }
    }
}
