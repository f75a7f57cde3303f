// src/components/outputs.rs

//! PDF prints of the schematic and the board.

use super::{ensure_dir, kiauto_invocation, path_arg, require_tool};
use crate::constants::{CMD_EESCHEMA_DO, CMD_PCBNEW_DO, PDF_PCB_PRINT, PDF_SCH_PRINT, PLOT_ERROR};
use crate::core::component::{
    Component, ComponentKind, StepEnv, StepError, StepOutcome, check_outcome,
};
use crate::core::registry::ComponentInit;
use crate::core::schema::{ConfigError, OptionSet, OptionType, Schema};
use crate::state::GlobalContext;
use crate::system::executor;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value;

fn global_output(ctx: &GlobalContext) -> Value {
    Value::String(ctx.effective_output_pattern())
}

/// Identity and location shared by the outputs.
#[derive(Debug)]
struct OutputBase {
    name: String,
    options: OptionSet,
    dir: Option<String>,
}

impl OutputBase {
    fn new(init: ComponentInit) -> Self {
        Self {
            name: init.name,
            options: init.options,
            dir: init.dir,
        }
    }

    fn out_dir(&self, ctx: &GlobalContext) -> PathBuf {
        let base = ctx.out_dir();
        match &self.dir {
            Some(dir) => base.join(dir),
            None => base,
        }
    }

    fn pattern(&self, ctx: &GlobalContext) -> String {
        self.options
            .str("output")
            .map_or_else(|| ctx.effective_output_pattern(), str::to_string)
    }

    fn variant(&self) -> Option<&str> {
        self.options.str("variant")
    }

    fn references(&self) -> Vec<(ComponentKind, String)> {
        let mut refs = Vec::new();
        if let Some(variant) = self.variant() {
            refs.push((ComponentKind::Variant, variant.to_string()));
        }
        if let Some(filter) = self.options.str("dnf_filter") {
            refs.push((ComponentKind::Filter, filter.to_string()));
        }
        refs
    }
}

fn missing_output(step: &str, path: &Path, exit_code: i32) -> StepError {
    StepError::ToolFailed {
        step: step.to_string(),
        message: format!("the tool didn't create '{}'", path.display()),
        exit_code,
    }
}

#[derive(Debug)]
pub struct PdfSchPrint {
    base: OutputBase,
}

impl PdfSchPrint {
    pub fn schema() -> Schema {
        Schema::builder()
            .global(
                "output",
                OptionType::String,
                global_output,
                "Filename for the output PDF (%i=schematic %x=pdf)",
            )
            .optional_string("variant", "Board variant to apply")
            .optional_string("dnf_filter", "Filter to mark components as not fitted")
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Self {
            base: OutputBase::new(init),
        }))
    }

    fn target(&self, ctx: &GlobalContext) -> Result<PathBuf, StepError> {
        ctx.expand_filename_sch(
            &self.base.out_dir(ctx),
            &self.base.pattern(ctx),
            "schematic",
            "pdf",
            self.base.variant(),
        )
        .map_err(|e| StepError::context(&self.base.name, e))
    }
}

impl Component for PdfSchPrint {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    fn name(&self) -> &str {
        &self.base.name
    }

    fn options(&self) -> &OptionSet {
        &self.base.options
    }

    fn is_sch_related(&self) -> bool {
        true
    }

    fn references(&self) -> Vec<(ComponentKind, String)> {
        self.base.references()
    }

    fn get_targets(&self, ctx: &GlobalContext) -> Result<Vec<PathBuf>, StepError> {
        Ok(vec![self.target(ctx)?])
    }

    fn run(&self, env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        let name = &self.base.name;
        require_tool(env, name, CMD_EESCHEMA_DO)?;
        let ctx = env.ctx;
        let schematic = ctx
            .load_schematic()
            .map_err(|e| StepError::context(name, e))?;
        let target = self.target(ctx)?;
        let out_dir = self.base.out_dir(ctx);
        ensure_dir(name, &out_dir, PLOT_ERROR)?;
        if let Some(dir) = target.parent() {
            ensure_dir(name, dir, PLOT_ERROR)?;
        }
        if let Some(filter) = self.base.options.str("dnf_filter") {
            warn!("`{name}`: the PDF print uses the design as is, `dnf_filter = '{filter}'` has no effect");
        }

        let args = vec![
            "export".to_string(),
            "--all_pages".to_string(),
            "--file_format".to_string(),
            "pdf".to_string(),
            path_arg(&schematic.path),
            path_arg(&out_dir),
        ];
        let invocation = kiauto_invocation(env, CMD_EESCHEMA_DO, args, &out_dir);
        info!("- Printing the schematic to '{}'", target.display());
        let outcome = executor::execute(env.runner, &invocation, env.retry);
        check_outcome(name, CMD_EESCHEMA_DO, &outcome, PDF_SCH_PRINT)?;

        // The tool always names the file after the schematic.
        let produced = out_dir.join(format!("{}.pdf", schematic.name));
        if !produced.is_file() {
            return Err(missing_output(name, &produced, PDF_SCH_PRINT));
        }
        if produced != target {
            debug!("Moving '{}' -> '{}'", produced.display(), target.display());
            fs::rename(&produced, &target).map_err(|e| StepError::Io {
                step: name.clone(),
                message: format!("Unable to rename '{}': {}", produced.display(), e),
                exit_code: PDF_SCH_PRINT,
            })?;
        }
        Ok(StepOutcome::Done {
            targets: vec![target],
        })
    }
}

#[derive(Debug)]
pub struct PdfPcbPrint {
    base: OutputBase,
}

impl PdfPcbPrint {
    pub fn schema() -> Schema {
        Schema::builder()
            .global(
                "output",
                OptionType::String,
                global_output,
                "Filename for the output PDF (%i=layers %x=pdf)",
            )
            .list("layers", OptionType::String, "List of layers to print, e.g. ['F.Cu', 'Edge.Cuts']")
            .boolean("separated", false, "Print the layers in separated pages")
            .optional_string("variant", "Board variant to apply")
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        if init.options.strings("layers").is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.layers", init.name),
                reason: "at least one layer is required".to_string(),
            });
        }
        Ok(Box::new(Self {
            base: OutputBase::new(init),
        }))
    }

    fn target(&self, ctx: &GlobalContext) -> Result<PathBuf, StepError> {
        ctx.expand_filename_pcb(
            &self.base.out_dir(ctx),
            &self.base.pattern(ctx),
            "layers",
            "pdf",
            self.base.variant(),
        )
        .map_err(|e| StepError::context(&self.base.name, e))
    }
}

impl Component for PdfPcbPrint {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Output
    }

    fn name(&self) -> &str {
        &self.base.name
    }

    fn options(&self) -> &OptionSet {
        &self.base.options
    }

    fn is_pcb_related(&self) -> bool {
        true
    }

    fn references(&self) -> Vec<(ComponentKind, String)> {
        self.base.references()
    }

    fn get_targets(&self, ctx: &GlobalContext) -> Result<Vec<PathBuf>, StepError> {
        Ok(vec![self.target(ctx)?])
    }

    fn run(&self, env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        let name = &self.base.name;
        require_tool(env, name, CMD_PCBNEW_DO)?;
        let ctx = env.ctx;
        let board = ctx.load_board().map_err(|e| StepError::context(name, e))?;
        let target = self.target(ctx)?;
        let out_dir = self.base.out_dir(ctx);
        // The pattern may add sub directories of its own.
        let dir = target.parent().map_or_else(|| out_dir.clone(), Path::to_path_buf);
        ensure_dir(name, &dir, PLOT_ERROR)?;
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut args = vec!["export".to_string(), "--output_name".to_string(), file_name];
        if self.base.options.bool("separated") {
            args.push("--separate".to_string());
        }
        args.extend([path_arg(&board.path), path_arg(&dir)]);
        args.extend(self.base.options.strings("layers"));

        let invocation = kiauto_invocation(env, CMD_PCBNEW_DO, args, &dir);
        info!("- Printing the board to '{}'", target.display());
        let outcome = executor::execute(env.runner, &invocation, env.retry);
        check_outcome(name, CMD_PCBNEW_DO, &outcome, PDF_PCB_PRINT)?;
        if !target.is_file() {
            return Err(missing_output(name, &target, PDF_PCB_PRINT));
        }
        Ok(StepOutcome::Done {
            targets: vec![target],
        })
    }
}
