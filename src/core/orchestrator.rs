// src/core/orchestrator.rs

//! # Orchestrator
//!
//! Drives a configured [`Plan`] through its states:
//!
//! `Pending -> ResolvingTargets -> RunningPreflights -> RunningOutputs -> Done`
//!
//! Any running state may end in `Failed`. Every target is computed before the
//! first step runs, so a missing design file stops the run before any tool
//! is invoked.

use crate::constants::EXIT_BAD_CONFIG;
use crate::core::component::{Component, ComponentKind, StepEnv, StepError, StepOutcome};
use crate::core::plan::Plan;
use crate::core::schema::ConfigError;
use crate::dev_utils;
use crate::state::GlobalContext;
use crate::system::executor::{RetryPolicy, ToolRunner};
use log::{debug, info, warn};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    ResolvingTargets,
    RunningPreflights,
    RunningOutputs,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::ResolvingTargets => "resolving targets",
            Self::RunningPreflights => "running preflights",
            Self::RunningOutputs => "running outputs",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed while {state}: {source}")]
    Step {
        state: RunState,
        #[source]
        source: StepError,
    },
    /// Output failures collected with `keep_going`.
    #[error("{} output(s) failed, first: {}", .failures.len(), first_failure(.failures))]
    OutputsFailed { failures: Vec<StepError> },
}

fn first_failure(failures: &[StepError]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl RunError {
    /// The process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => EXIT_BAD_CONFIG,
            Self::Step { source, .. } => source.exit_code(),
            Self::OutputsFailed { failures } => failures
                .first()
                .map_or(EXIT_BAD_CONFIG, StepError::exit_code),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Record output failures and continue with the next output.
    pub keep_going: bool,
    /// Resolve and report the targets without running anything.
    pub list_only: bool,
    /// Output names to run. Empty means all of them.
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// Targets resolved, not run (`list_only`).
    Listed,
    Done,
    Skipped,
    Failed { exit_code: i32 },
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub kind: ComponentKind,
    pub name: String,
    pub targets: Vec<PathBuf>,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed { .. }))
    }
}

pub struct Orchestrator<'a> {
    ctx: &'a GlobalContext,
    runner: &'a dyn ToolRunner,
    retry: RetryPolicy,
    state: RunState,
}

impl fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("retry", &self.retry)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a> Orchestrator<'a> {
    pub fn new(ctx: &'a GlobalContext, runner: &'a dyn ToolRunner) -> Self {
        Self {
            ctx,
            runner,
            retry: RetryPolicy::default(),
            state: RunState::Pending,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!("Orchestrator: {} -> {}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, source: StepError) -> RunError {
        let state = self.state;
        self.transition(RunState::Failed);
        RunError::Step { state, source }
    }

    /// Runs the plan.
    ///
    /// Returns the report of every step, or the error that decides the exit status.
    pub fn run(&mut self, plan: &Plan, options: &RunOptions) -> Result<RunReport, RunError> {
        let _timer = dev_utils::BlockTimer::new("Orchestrator::run");

        let outputs = match select_outputs(plan, &options.targets) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.transition(RunState::Failed);
                return Err(e.into());
            }
        };
        let preflights: Vec<&dyn Component> = plan
            .preflights
            .iter()
            .map(Box::as_ref)
            .filter(|p| p.is_enabled())
            .collect();

        // Global side effects of the configuration: filter file, variant ids, ...
        for component in plan.components() {
            if component.kind() != ComponentKind::Preflight || component.is_enabled() {
                component.apply(self.ctx);
            }
        }

        self.transition(RunState::ResolvingTargets);
        let mut report = RunReport::default();
        for step in preflights.iter().chain(&outputs) {
            let targets = match self.resolve_targets(*step) {
                Ok(targets) => targets,
                Err(e) => return Err(self.fail(e)),
            };
            report.steps.push(StepReport {
                kind: step.kind(),
                name: step.name().to_string(),
                targets,
                status: StepStatus::Listed,
            });
        }

        if options.list_only {
            self.transition(RunState::Done);
            return Ok(report);
        }

        let retry = self.retry.clone();
        let env = StepEnv {
            ctx: self.ctx,
            runner: self.runner,
            retry: &retry,
        };

        self.transition(RunState::RunningPreflights);
        for (index, preflight) in preflights.iter().enumerate() {
            match run_step(*preflight, &env) {
                Ok(status) => set_status(&mut report, index, status),
                Err(e) => {
                    set_status(&mut report, index, StepStatus::Failed { exit_code: e.exit_code() });
                    return Err(self.fail(e));
                }
            }
        }

        self.transition(RunState::RunningOutputs);
        let mut failures = Vec::new();
        for (offset, output) in outputs.iter().enumerate() {
            let index = preflights.len() + offset;
            match run_step(*output, &env) {
                Ok(status) => set_status(&mut report, index, status),
                Err(e) => {
                    set_status(&mut report, index, StepStatus::Failed { exit_code: e.exit_code() });
                    if !options.keep_going {
                        return Err(self.fail(e));
                    }
                    warn!("Output '{}' failed, continuing: {}", output.name(), e);
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            self.transition(RunState::Done);
            Ok(report)
        } else {
            self.transition(RunState::Failed);
            Err(RunError::OutputsFailed { failures })
        }
    }

    fn resolve_targets(&self, step: &dyn Component) -> Result<Vec<PathBuf>, StepError> {
        if step.is_sch_related() {
            self.ctx
                .load_schematic()
                .map_err(|e| StepError::context(step.name(), e))?;
        }
        if step.is_pcb_related() {
            self.ctx
                .load_board()
                .map_err(|e| StepError::context(step.name(), e))?;
        }
        let targets = step.get_targets(self.ctx)?;
        debug!("Targets of {} '{}': {:?}", step.kind(), step.name(), targets);
        Ok(targets)
    }
}

fn run_step(step: &dyn Component, env: &StepEnv<'_>) -> Result<StepStatus, StepError> {
    let _timer = dev_utils::BlockTimer::new(format!("{} {}", step.kind(), step.name()));
    info!("- Running {} '{}'", step.kind(), step.name());
    match step.run(env)? {
        StepOutcome::Done { targets } => {
            debug!("{} produced {:?}", step.name(), targets);
            Ok(StepStatus::Done)
        }
        StepOutcome::Skipped => Ok(StepStatus::Skipped),
    }
}

fn set_status(report: &mut RunReport, index: usize, status: StepStatus) {
    if let Some(step) = report.steps.get_mut(index) {
        step.status = status;
    }
}

/// The outputs to run, in plan order. Unknown names are a configuration error.
fn select_outputs<'p>(plan: &'p Plan, names: &[String]) -> Result<Vec<&'p dyn Component>, ConfigError> {
    if let Some(unknown) = names.iter().find(|n| plan.output(n).is_none()) {
        return Err(ConfigError::UnknownTarget(unknown.clone()));
    }
    Ok(plan
        .outputs
        .iter()
        .map(Box::as_ref)
        .filter(|o| names.is_empty() || names.iter().any(|n| n == o.name()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ENV_KICAD_SYMBOL_DIR, ERC_ERROR, NO_PCB_FILE, PDF_PCB_PRINT, PDF_SCH_PRINT};
    use crate::core::kicad_config::ToolEnvironment;
    use crate::core::plan::{self, parse_plan};
    use crate::core::registry::Registry;
    use crate::system::executor::{ExitCategory, Invocation};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records invocations, fails the ones whose first real argument is listed,
    /// and writes the file a successful `export` would produce.
    struct FakeTools {
        calls: Mutex<Vec<Invocation>>,
        failing: Vec<&'static str>,
    }

    impl FakeTools {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing,
            }
        }

        fn commands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|i| format!("{} {}", i.program, i.args.first().cloned().unwrap_or_default()))
                .collect()
        }
    }

    impl ToolRunner for FakeTools {
        fn run(&self, invocation: &Invocation) -> ExitCategory {
            self.calls.lock().unwrap().push(invocation.clone());
            let key = format!("{} {}", invocation.program, invocation.args.first().cloned().unwrap_or_default());
            if self.failing.iter().any(|f| *f == key) {
                return ExitCategory::ReportedErrors { count: 1 };
            }
            if let Some(produced) = exported_file(invocation) {
                fs::create_dir_all(produced.parent().unwrap()).unwrap();
                fs::write(produced, "%PDF-1.4\n").unwrap();
            }
            ExitCategory::Success
        }

        fn is_available(&self, _program: &str) -> bool {
            true
        }
    }

    /// The file an `export` command leaves in its output directory.
    fn exported_file(invocation: &Invocation) -> Option<PathBuf> {
        let args = &invocation.args;
        if args.first().map(String::as_str) != Some("export") {
            return None;
        }
        if invocation.program == "eeschema_do" {
            let [.., sch, dir] = args.as_slice() else { return None };
            let stem = Path::new(sch).file_stem()?.to_owned();
            return Some(Path::new(dir).join(stem).with_extension("pdf"));
        }
        let name_at = args.iter().position(|a| a == "--output_name")? + 1;
        let pcb_at = args.iter().position(|a| a.ends_with(".kicad_pcb"))?;
        Some(Path::new(&args[pcb_at + 1]).join(&args[name_at]))
    }

    fn project(plan_src: &str) -> (TempDir, GlobalContext, Plan) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("amp.sch"), "EESchema Schematic File Version 4\n").unwrap();
        fs::write(tmp.path().join("amp.kicad_pcb"), "(kicad_pcb (version 4))\n").unwrap();
        let ctx = GlobalContext::detached();
        ctx.set_environment(ToolEnvironment::default().with_var(ENV_KICAD_SYMBOL_DIR, "/libs"));
        ctx.set_project_dir(tmp.path());
        ctx.set_out_dir(tmp.path().join("out"));
        let file = parse_plan(plan_src, Path::new("kiflow.toml")).unwrap();
        plan::apply_globals(&file, &ctx).unwrap();
        let plan = plan::configure(&file, Registry::global().unwrap(), &ctx).unwrap();
        (tmp, ctx, plan)
    }

    const PLAN: &str = r#"
[preflight]
run_erc = true

[[outputs]]
name = "sch"
type = "pdf_sch_print"

[[outputs]]
name = "pcb"
type = "pdf_pcb_print"
[outputs.options]
layers = "F.Cu"
"#;

    #[test]
    fn test_list_only_runs_nothing() {
        let (tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec![]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let options = RunOptions {
            list_only: true,
            ..Default::default()
        };
        let report = orchestrator.run(&plan, &options).unwrap();
        assert_eq!(orchestrator.state(), RunState::Done);
        assert!(tools.commands().is_empty());
        assert_eq!(report.steps.len(), 3);
        assert_eq!(report.steps[0].targets, vec![tmp.path().join("out").join("amp-erc.txt")]);
        assert_eq!(report.steps[1].targets, vec![tmp.path().join("out").join("amp-schematic.pdf")]);
    }

    #[test]
    fn test_full_run_order() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec![]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let report = orchestrator.run(&plan, &RunOptions::default()).unwrap();
        assert_eq!(orchestrator.state(), RunState::Done);
        assert_eq!(
            tools.commands(),
            vec!["eeschema_do run_erc", "eeschema_do export", "pcbnew_do export"]
        );
        assert_eq!(report.failed().count(), 0);
    }

    #[test]
    fn test_preflight_failure_aborts() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec!["eeschema_do run_erc"]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let options = RunOptions {
            keep_going: true,
            ..Default::default()
        };
        let err = orchestrator.run(&plan, &options).unwrap_err();
        assert_eq!(err.exit_code(), ERC_ERROR);
        assert_eq!(orchestrator.state(), RunState::Failed);
        assert_eq!(tools.commands(), vec!["eeschema_do run_erc"]);
    }

    #[test]
    fn test_output_failure_aborts_by_default() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec!["eeschema_do export"]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let err = orchestrator.run(&plan, &RunOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), PDF_SCH_PRINT);
        assert!(!tools.commands().contains(&"pcbnew_do export".to_string()));
    }

    #[test]
    fn test_keep_going_first_failure_decides() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec!["pcbnew_do export", "eeschema_do export"]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let options = RunOptions {
            keep_going: true,
            ..Default::default()
        };
        let err = orchestrator.run(&plan, &options).unwrap_err();
        assert!(matches!(err, RunError::OutputsFailed { ref failures } if failures.len() == 2));
        assert_eq!(err.exit_code(), PDF_SCH_PRINT);
        assert_ne!(err.exit_code(), PDF_PCB_PRINT);
        assert_eq!(tools.commands().len(), 3);
    }

    #[test]
    fn test_selected_targets() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec![]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools).with_retry(RetryPolicy::no_retry());
        let options = RunOptions {
            targets: vec!["pcb".to_string()],
            ..Default::default()
        };
        orchestrator.run(&plan, &options).unwrap();
        assert_eq!(tools.commands(), vec!["eeschema_do run_erc", "pcbnew_do export"]);
    }

    #[test]
    fn test_unknown_target_is_config_error() {
        let (_tmp, ctx, plan) = project(PLAN);
        let tools = FakeTools::new(vec![]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools);
        let options = RunOptions {
            targets: vec!["gerbers".to_string()],
            ..Default::default()
        };
        let err = orchestrator.run(&plan, &options).unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::UnknownTarget(_))));
        assert_eq!(err.exit_code(), EXIT_BAD_CONFIG);
        assert!(tools.commands().is_empty());
    }

    #[test]
    fn test_missing_board_fails_before_running() {
        let (tmp, ctx, plan) = project(PLAN);
        fs::remove_file(tmp.path().join("amp.kicad_pcb")).unwrap();
        let tools = FakeTools::new(vec![]);
        let mut orchestrator = Orchestrator::new(&ctx, &tools);
        let err = orchestrator.run(&plan, &RunOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), NO_PCB_FILE);
        assert!(matches!(err, RunError::Step { state: RunState::ResolvingTargets, .. }));
        assert!(tools.commands().is_empty());
    }
}
