// src/core/component.rs

//! The capability interface shared by every pipeline component.

use crate::constants::{
    CORRUPTED_DESIGN, EXIT_BAD_CONFIG, MISSING_TOOL, NO_PCB_FILE, NO_SCH_FILE,
};
use crate::core::document::{DesignKind, DocumentError};
use crate::core::schema::OptionSet;
use crate::state::{ContextError, GlobalContext};
use crate::system::executor::{ExecutionOutcome, RetryPolicy, ToolRunner};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The four families of configurable components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentKind {
    Preflight,
    Filter,
    Variant,
    Output,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preflight => "preflight",
            Self::Filter => "filter",
            Self::Variant => "variant",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step could not complete. Carries the process exit status to use.
#[derive(Error, Debug)]
pub enum StepError {
    #[error("{step}: {source}")]
    Context {
        step: String,
        #[source]
        source: ContextError,
    },
    #[error("{step}: `{tool}` not installed or not in PATH")]
    MissingTool { step: String, tool: String },
    #[error("{step}: {message}")]
    ToolFailed {
        step: String,
        message: String,
        exit_code: i32,
    },
    #[error("{step}: {message}")]
    Io {
        step: String,
        message: String,
        exit_code: i32,
    },
}

impl StepError {
    pub fn context(step: &str, source: ContextError) -> Self {
        Self::Context {
            step: step.to_string(),
            source,
        }
    }

    /// The process exit status this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Context { source, .. } => match source {
                ContextError::DesignNotFound {
                    kind: DesignKind::Schematic,
                    ..
                } => NO_SCH_FILE,
                ContextError::DesignNotFound {
                    kind: DesignKind::Board,
                    ..
                } => NO_PCB_FILE,
                ContextError::Document(DocumentError::Corrupted { .. }) => CORRUPTED_DESIGN,
                ContextError::Document(DocumentError::Io { kind, .. }) => match kind {
                    DesignKind::Schematic => NO_SCH_FILE,
                    DesignKind::Board => NO_PCB_FILE,
                },
                ContextError::KicadConfig(_) | ContextError::NoInstances => EXIT_BAD_CONFIG,
            },
            Self::MissingTool { .. } => MISSING_TOOL,
            Self::ToolFailed { exit_code, .. } | Self::Io { exit_code, .. } => *exit_code,
        }
    }
}

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step ran and produced its targets.
    Done { targets: Vec<PathBuf> },
    /// Nothing to do (e.g. a disabled preflight).
    Skipped,
}

/// Everything a step needs while running.
pub struct StepEnv<'a> {
    pub ctx: &'a GlobalContext,
    pub runner: &'a dyn ToolRunner,
    pub retry: &'a RetryPolicy,
}

impl fmt::Debug for StepEnv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepEnv")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// A configured preflight, filter, variant or output.
///
/// `get_targets` must be free of side effects other than loading the design
/// files through the context, so targets can be listed without running anything.
pub trait Component: fmt::Debug + Send + Sync {
    fn kind(&self) -> ComponentKind;

    /// The instance name (the preflight key, or the `name` of the plan entry).
    fn name(&self) -> &str;

    fn options(&self) -> &OptionSet;

    /// Steps that need the schematic loaded before their targets are computed.
    fn is_sch_related(&self) -> bool {
        false
    }

    /// Steps that need the board loaded before their targets are computed.
    fn is_pcb_related(&self) -> bool {
        false
    }

    /// False for preflights configured as `false`.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Names of the filters and variants this component refers to.
    fn references(&self) -> Vec<(ComponentKind, String)> {
        Vec::new()
    }

    /// Called after every component is configured, before targets are resolved.
    /// Preflights that alter global options apply them here.
    fn apply(&self, _ctx: &GlobalContext) {}

    fn get_targets(&self, _ctx: &GlobalContext) -> Result<Vec<PathBuf>, StepError> {
        Ok(Vec::new())
    }

    fn run(&self, env: &StepEnv<'_>) -> Result<StepOutcome, StepError>;
}

/// Turns a non successful execution into a [`StepError`] with the given exit status.
pub fn check_outcome(
    step: &str,
    tool: &str,
    outcome: &ExecutionOutcome,
    exit_code: i32,
) -> Result<(), StepError> {
    use crate::system::executor::ExitCategory;
    match &outcome.category {
        ExitCategory::Success => Ok(()),
        ExitCategory::SpawnFailed { not_found: true, .. } => Err(StepError::MissingTool {
            step: step.to_string(),
            tool: tool.to_string(),
        }),
        other => {
            log::error!("{step}: {other}");
            Err(StepError::ToolFailed {
                step: step.to_string(),
                message: format!("{other} (after {} attempt(s))", outcome.attempts),
                exit_code,
            })
        }
    }
}
