// src/components/preflights.rs

//! Checks and global settings that run before the outputs.

use super::{ensure_dir, kiauto_invocation, path_arg, require_tool};
use crate::constants::{CMD_EESCHEMA_DO, CMD_PCBNEW_DO, DRC_ERROR, ERC_ERROR};
use crate::core::component::{
    Component, ComponentKind, StepEnv, StepError, StepOutcome, check_outcome,
};
use crate::core::registry::ComponentInit;
use crate::core::schema::{ConfigError, OptionSet, Schema};
use crate::state::GlobalContext;
use crate::system::executor;
use log::{debug, info};
use std::path::PathBuf;

/// Implements the accessors every preflight shares.
macro_rules! preflight_base {
    () => {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Preflight
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn options(&self) -> &OptionSet {
            &self.options
        }
    };
}

#[derive(Debug)]
pub struct RunErc {
    name: String,
    options: OptionSet,
}

impl RunErc {
    pub fn schema() -> Schema {
        Schema::builder()
            .boolean(
                "enabled",
                false,
                "Runs the ERC (Electrical Rules Check). To ensure the schematic is electrically correct. \
                 The report file name is controlled by the global output pattern (%i=erc %x=txt)",
            )
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
        }))
    }

    fn report_path(&self, ctx: &GlobalContext) -> Result<PathBuf, StepError> {
        ctx.expand_filename_sch(
            &ctx.out_dir(),
            &ctx.effective_output_pattern(),
            "erc",
            "txt",
            None,
        )
        .map_err(|e| StepError::context(&self.name, e))
    }
}

impl Component for RunErc {
    preflight_base!();

    fn is_sch_related(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.options.bool("enabled")
    }

    fn get_targets(&self, ctx: &GlobalContext) -> Result<Vec<PathBuf>, StepError> {
        Ok(vec![self.report_path(ctx)?])
    }

    fn run(&self, env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        require_tool(env, &self.name, CMD_EESCHEMA_DO)?;
        let ctx = env.ctx;
        let schematic = ctx
            .load_schematic()
            .map_err(|e| StepError::context(&self.name, e))?;
        let report = self.report_path(ctx)?;
        let out_dir = ctx.out_dir();
        ensure_dir(&self.name, &out_dir, ERC_ERROR)?;
        debug!("ERC report: {}", report.display());

        let mut args = vec!["run_erc".to_string(), "-o".to_string(), path_arg(&report)];
        if let Some(filter) = ctx.filter_file() {
            args.extend(["-f".to_string(), path_arg(&filter)]);
        }
        args.extend([path_arg(&schematic.path), path_arg(&out_dir)]);

        let invocation = kiauto_invocation(env, CMD_EESCHEMA_DO, args, &out_dir);
        info!("- Running the ERC");
        let outcome = executor::execute(env.runner, &invocation, env.retry);
        check_outcome(&self.name, CMD_EESCHEMA_DO, &outcome, ERC_ERROR)?;
        Ok(StepOutcome::Done {
            targets: vec![report],
        })
    }
}

#[derive(Debug)]
pub struct RunDrc {
    name: String,
    options: OptionSet,
}

impl RunDrc {
    pub fn schema() -> Schema {
        Schema::builder()
            .boolean(
                "enabled",
                false,
                "Runs the DRC (Design Rules Check). To ensure we have a valid PCB. \
                 The report file name is controlled by the global output pattern (%i=drc %x=txt)",
            )
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
        }))
    }

    fn report_path(&self, ctx: &GlobalContext) -> Result<PathBuf, StepError> {
        ctx.expand_filename_pcb(
            &ctx.out_dir(),
            &ctx.effective_output_pattern(),
            "drc",
            "txt",
            None,
        )
        .map_err(|e| StepError::context(&self.name, e))
    }
}

impl Component for RunDrc {
    preflight_base!();

    fn is_pcb_related(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.options.bool("enabled")
    }

    fn get_targets(&self, ctx: &GlobalContext) -> Result<Vec<PathBuf>, StepError> {
        Ok(vec![self.report_path(ctx)?])
    }

    fn run(&self, env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        require_tool(env, &self.name, CMD_PCBNEW_DO)?;
        let ctx = env.ctx;
        let board = ctx
            .load_board()
            .map_err(|e| StepError::context(&self.name, e))?;
        let report = self.report_path(ctx)?;
        let out_dir = ctx.out_dir();
        ensure_dir(&self.name, &out_dir, DRC_ERROR)?;

        let mut args = vec!["run_drc".to_string(), "-o".to_string(), path_arg(&report)];
        if ctx.ignore_unconnected() {
            args.push("--ignore_unconnected".to_string());
        }
        args.extend([path_arg(&board.path), path_arg(&out_dir)]);

        let invocation = kiauto_invocation(env, CMD_PCBNEW_DO, args, &out_dir);
        info!("- Running the DRC");
        let outcome = executor::execute(env.runner, &invocation, env.retry);
        check_outcome(&self.name, CMD_PCBNEW_DO, &outcome, DRC_ERROR)?;
        Ok(StepOutcome::Done {
            targets: vec![report],
        })
    }
}

#[derive(Debug)]
pub struct IgnoreUnconnected {
    name: String,
    options: OptionSet,
}

impl IgnoreUnconnected {
    pub fn schema() -> Schema {
        Schema::builder()
            .boolean(
                "enabled",
                false,
                "Option for `run_drc`. Ignores the unconnected nets. Useful if you didn't finish the routing",
            )
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
        }))
    }
}

impl Component for IgnoreUnconnected {
    preflight_base!();

    fn is_enabled(&self) -> bool {
        self.options.bool("enabled")
    }

    fn apply(&self, ctx: &GlobalContext) {
        ctx.set_ignore_unconnected(true);
    }

    fn run(&self, _env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Skipped)
    }
}

/// `filters = "path"`: the file with the ERC/DRC exclusions passed to the tools.
#[derive(Debug)]
pub struct FiltersFile {
    name: String,
    options: OptionSet,
}

impl FiltersFile {
    pub fn schema() -> Schema {
        Schema::builder()
            .optional_string(
                "file",
                "File with the ERC/DRC filters. Relative paths are relative to the project directory",
            )
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        if init.options.str("file").is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidValue {
                key: init.name,
                reason: "a file name is required".to_string(),
            });
        }
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
        }))
    }

    fn path(&self, ctx: &GlobalContext) -> Option<PathBuf> {
        let file = PathBuf::from(self.options.str("file")?);
        if file.is_absolute() {
            Some(file)
        } else {
            Some(ctx.project_dir().join(file))
        }
    }
}

impl Component for FiltersFile {
    preflight_base!();

    fn apply(&self, ctx: &GlobalContext) {
        if let Some(path) = self.path(ctx) {
            debug!("Using filters from '{}'", path.display());
            ctx.set_filter_file(Some(path));
        }
    }

    fn run(&self, _env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Skipped)
    }
}
