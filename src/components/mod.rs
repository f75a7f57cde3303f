// src/components/mod.rs

//! # Built-in Components
//!
//! The preflights, filters, variants and outputs shipped with kiflow, and the
//! helpers they share to drive the KiAuto tools.

pub mod filters;
pub mod outputs;
pub mod preflights;
pub mod variants;

use crate::constants::ENV_KICAD_SYMBOL_DIR;
use crate::core::component::{ComponentKind, StepEnv, StepError};
use crate::core::kicad_config::KicadConfig;
use crate::core::registry::Registry;
use crate::core::schema::ConfigError;
use crate::system::executor::{self, Cleanup, CleanupWhen, Invocation};
use std::fs;
use std::path::{Path, PathBuf};

/// Registers every built-in component type. Called once, when the process
/// wide registry is first used.
pub fn register_builtin(registry: &mut Registry) -> Result<(), ConfigError> {
    use ComponentKind::{Filter, Output, Preflight, Variant};

    registry.register(
        Preflight,
        "run_erc",
        "Runs the ERC (Electrical Rules Check)",
        preflights::RunErc::schema,
        preflights::RunErc::create,
    )?;
    registry.register(
        Preflight,
        "run_drc",
        "Runs the DRC (Design Rules Check)",
        preflights::RunDrc::schema,
        preflights::RunDrc::create,
    )?;
    registry.register(
        Preflight,
        "ignore_unconnected",
        "Makes the DRC ignore unconnected pads",
        preflights::IgnoreUnconnected::schema,
        preflights::IgnoreUnconnected::create,
    )?;
    registry.register(
        Preflight,
        "filters",
        "Selects the file with the ERC/DRC filters",
        preflights::FiltersFile::schema,
        preflights::FiltersFile::create,
    )?;
    registry.register(
        Filter,
        "generic",
        "Excludes components by reference or empty value",
        filters::GenericFilter::schema,
        filters::GenericFilter::create,
    )?;
    registry.register(
        Variant,
        "basic",
        "A named variant with its own file name suffix",
        variants::BasicVariant::schema,
        variants::BasicVariant::create,
    )?;
    registry.register(
        Output,
        "pdf_sch_print",
        "PDF print of the schematic",
        outputs::PdfSchPrint::schema,
        outputs::PdfSchPrint::create,
    )?;
    registry.register(
        Output,
        "pdf_pcb_print",
        "PDF print of the board layers",
        outputs::PdfPcbPrint::schema,
        outputs::PdfPcbPrint::create,
    )?;
    Ok(())
}

/// Fails with `MissingTool` when `tool` can't be found.
pub(crate) fn require_tool(env: &StepEnv<'_>, step: &str, tool: &str) -> Result<(), StepError> {
    if env.runner.is_available(tool) {
        Ok(())
    } else {
        Err(StepError::MissingTool {
            step: step.to_string(),
            tool: tool.to_string(),
        })
    }
}

pub(crate) fn ensure_dir(step: &str, dir: &Path, exit_code: i32) -> Result<(), StepError> {
    fs::create_dir_all(dir).map_err(|e| StepError::Io {
        step: step.to_string(),
        message: format!("Unable to create '{}': {}", dir.display(), e),
        exit_code,
    })
}

pub(crate) fn path_arg(path: &Path) -> String {
    dunce::simplified(path).to_string_lossy().into_owned()
}

/// Builds a KiAuto invocation, adding the debug and recording options.
///
/// `args` starts with the tool's sub command. When recording was only forced
/// by CI, the screencast the tool leaves in `out_dir` is removed afterwards.
/// Once KiCad's configuration is loaded the symbol library directory found
/// there is exported as `KICAD_SYMBOL_DIR`.
pub(crate) fn kiauto_invocation(
    env: &StepEnv<'_>,
    tool: &str,
    mut args: Vec<String>,
    out_dir: &Path,
) -> Invocation {
    let screencast = screencast_path(out_dir, args.first().map_or("", String::as_str), tool);
    let video_remove = executor::add_extra_options(&mut args, env.ctx.debug_level(), env.ctx.is_ci());
    let mut invocation = Invocation {
        program: tool.to_string(),
        args,
        cleanup: video_remove.then_some(Cleanup {
            path: screencast,
            when: CleanupWhen::Always,
        }),
        ..Default::default()
    };
    if let Some(dir) = env.ctx.kicad_config().as_deref().and_then(KicadConfig::sym_lib_dir) {
        invocation = invocation.env(ENV_KICAD_SYMBOL_DIR, path_arg(dir));
    }
    invocation
}

/// `<out_dir>/<command>_<tool>_screencast.ogv`, e.g. `run_erc_eeschema_screencast.ogv`.
fn screencast_path(out_dir: &Path, command: &str, tool: &str) -> PathBuf {
    let tool = tool.trim_end_matches("_do");
    out_dir.join(format!("{command}_{tool}_screencast.ogv"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fake tool runner shared by the component tests.

    use crate::system::executor::{ExitCategory, Invocation, ToolRunner};
    use std::sync::Mutex;

    pub struct RecordingRunner {
        pub calls: Mutex<Vec<Invocation>>,
        pub result: ExitCategory,
        pub installed: bool,
        /// Written as `(path, content)` when the run succeeds.
        pub produces: Option<(std::path::PathBuf, &'static str)>,
    }

    impl RecordingRunner {
        pub fn ok() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                result: ExitCategory::Success,
                installed: true,
                produces: None,
            }
        }

        pub fn failing(result: ExitCategory) -> Self {
            Self {
                result,
                ..Self::ok()
            }
        }

        pub fn last(&self) -> Invocation {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, invocation: &Invocation) -> ExitCategory {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.result == ExitCategory::Success {
                if let Some((path, content)) = &self.produces {
                    std::fs::write(path, content).unwrap();
                }
            }
            self.result.clone()
        }

        fn is_available(&self, _program: &str) -> bool {
            self.installed
        }
    }
}
