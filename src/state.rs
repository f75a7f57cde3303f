// src/state.rs

//! The process wide shared context.
//!
//! Holds the resolved locations of the design files, the output directory and
//! the global options, plus the lazily loaded design handles and KiCad
//! configuration. Every lazy field is filled once by its own accessor and
//! served from the cache afterwards; `reset` drops everything.

use crate::constants::{DEFAULT_OUTPUT_PATTERN, ENV_GITLAB_CI};
use crate::core::document::{DesignDocument, DesignKind, DocumentError};
use crate::core::expand::{self, TokenOverrides};
use crate::core::kicad_config::{self, KicadConfig, KicadConfigError, ToolEnvironment};
use crate::core::paths;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("GlobalContext is fully static, no instances allowed")]
    NoInstances,
    #[error("No {kind} file found, tried: {}", display_paths(tried))]
    DesignNotFound { kind: DesignKind, tried: Vec<PathBuf> },
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    KicadConfig(#[from] KicadConfigError),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Default)]
struct ContextState {
    project_dir: Option<PathBuf>,
    sch_file: Option<PathBuf>,
    pcb_file: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    global_output: Option<String>,
    filter_file: Option<PathBuf>,
    ignore_unconnected: bool,
    debug_level: u8,
    variant: Option<String>,
    variant_ids: BTreeMap<String, String>,
    schematic: Option<Arc<DesignDocument>>,
    board: Option<Arc<DesignDocument>>,
    kicad: Option<Arc<KicadConfig>>,
}

/// Shared state of a pipeline run. See the module docs.
#[derive(Debug)]
pub struct GlobalContext {
    state: Mutex<ContextState>,
    environment: Mutex<Arc<ToolEnvironment>>,
}

static GLOBAL_CONTEXT: OnceLock<GlobalContext> = OnceLock::new();

impl GlobalContext {
    /// The context is a process singleton: constructing one always fails.
    /// Use [`GlobalContext::global`] instead.
    pub fn new() -> Result<Self, ContextError> {
        Err(ContextError::NoInstances)
    }

    /// The process wide context, created on first use from the process environment.
    pub fn global() -> &'static Self {
        GLOBAL_CONTEXT.get_or_init(|| Self::with_environment(ToolEnvironment::from_process()))
    }

    /// A context not shared with the rest of the process, with an empty environment.
    pub(crate) fn detached() -> Self {
        Self::with_environment(ToolEnvironment::default())
    }

    fn with_environment(environment: ToolEnvironment) -> Self {
        Self {
            state: Mutex::new(ContextState::default()),
            environment: Mutex::new(Arc::new(environment)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops every resolved path, option and cached handle.
    pub fn reset(&self) {
        debug!("Resetting the global context");
        *self.lock() = ContextState::default();
    }

    pub fn environment(&self) -> Arc<ToolEnvironment> {
        self.environment
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the environment snapshot used to locate KiCad's files.
    pub fn set_environment(&self, environment: ToolEnvironment) {
        *self.environment.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(environment);
    }

    /// True when running under a CI runner that needs the tools' screen recording.
    pub fn is_ci(&self) -> bool {
        self.environment().var(ENV_GITLAB_CI).is_some()
    }

    // --- Plain options ---

    pub fn set_project_dir(&self, dir: impl Into<PathBuf>) {
        self.lock().project_dir = Some(dir.into());
    }

    pub fn project_dir(&self) -> PathBuf {
        self.lock()
            .project_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn set_sch_file(&self, path: impl Into<PathBuf>) {
        self.lock().sch_file = Some(path.into());
    }

    pub fn sch_file(&self) -> Option<PathBuf> {
        self.lock().sch_file.clone()
    }

    pub fn set_pcb_file(&self, path: impl Into<PathBuf>) {
        self.lock().pcb_file = Some(path.into());
    }

    pub fn pcb_file(&self) -> Option<PathBuf> {
        self.lock().pcb_file.clone()
    }

    pub fn set_out_dir(&self, dir: impl Into<PathBuf>) {
        self.lock().out_dir = Some(dir.into());
    }

    /// Sets the output directory unless one was already chosen.
    pub fn set_out_dir_if_unset(&self, dir: impl Into<PathBuf>) {
        let mut state = self.lock();
        if state.out_dir.is_none() {
            state.out_dir = Some(dir.into());
        }
    }

    pub fn out_dir(&self) -> PathBuf {
        self.lock()
            .out_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn set_global_output(&self, pattern: Option<String>) {
        self.lock().global_output = pattern;
    }

    /// The configured global pattern, or the built-in one.
    pub fn effective_output_pattern(&self) -> String {
        self.lock()
            .global_output
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_PATTERN.to_string())
    }

    pub fn set_filter_file(&self, path: Option<PathBuf>) {
        self.lock().filter_file = path;
    }

    pub fn filter_file(&self) -> Option<PathBuf> {
        self.lock().filter_file.clone()
    }

    /// Makes the DRC skip unconnected pads.
    pub fn set_ignore_unconnected(&self, ignore: bool) {
        self.lock().ignore_unconnected = ignore;
    }

    pub fn ignore_unconnected(&self) -> bool {
        self.lock().ignore_unconnected
    }

    pub fn set_debug_level(&self, level: u8) {
        self.lock().debug_level = level;
    }

    pub fn debug_level(&self) -> u8 {
        self.lock().debug_level
    }

    /// Selects the variant applied to outputs that don't choose one.
    pub fn set_variant(&self, name: Option<String>) {
        self.lock().variant = name;
    }

    pub fn variant(&self) -> Option<String> {
        self.lock().variant.clone()
    }

    /// Records the `%v` value of a configured variant.
    pub fn register_variant(&self, name: &str, file_id: &str) {
        self.lock()
            .variant_ids
            .insert(name.to_string(), file_id.to_string());
    }

    pub fn has_variant(&self, name: &str) -> bool {
        self.lock().variant_ids.contains_key(name)
    }

    /// The `%v` text for `name`, or for the global variant when `name` is `None`.
    pub fn variant_file_id(&self, name: Option<&str>) -> String {
        let state = self.lock();
        let chosen = name.map(str::to_string).or_else(|| state.variant.clone());
        chosen
            .and_then(|n| state.variant_ids.get(&n).cloned())
            .unwrap_or_default()
    }

    // --- Lazy loads ---

    /// Loads the schematic once. The first load also loads KiCad's configuration.
    pub fn load_schematic(&self) -> Result<Arc<DesignDocument>, ContextError> {
        let mut state = self.lock();
        if let Some(doc) = &state.schematic {
            return Ok(doc.clone());
        }
        let path = resolve_design_path(&state, DesignKind::Schematic)?;
        let doc = Arc::new(DesignDocument::load(&path, DesignKind::Schematic)?);
        if state.kicad.is_none() {
            let config = kicad_config::locate_and_load(&path, &self.environment())?;
            state.kicad = Some(Arc::new(config));
        }
        state.sch_file = Some(path);
        state.schematic = Some(doc.clone());
        Ok(doc)
    }

    /// Loads the board once.
    pub fn load_board(&self) -> Result<Arc<DesignDocument>, ContextError> {
        let mut state = self.lock();
        if let Some(doc) = &state.board {
            return Ok(doc.clone());
        }
        let path = resolve_design_path(&state, DesignKind::Board)?;
        let doc = Arc::new(DesignDocument::load(&path, DesignKind::Board)?);
        state.pcb_file = Some(path);
        state.board = Some(doc.clone());
        Ok(doc)
    }

    /// KiCad's configuration, once the schematic has been loaded.
    ///
    /// Used to hand the resolved symbol library directory to the tools.
    pub fn kicad_config(&self) -> Option<Arc<KicadConfig>> {
        self.lock().kicad.clone()
    }

    // --- Output names ---

    /// Expands an output name using the schematic's base name for `%f`.
    pub fn expand_filename_sch(
        &self,
        out_dir: &Path,
        pattern: &str,
        id: &str,
        ext: &str,
        variant: Option<&str>,
    ) -> Result<PathBuf, ContextError> {
        let doc = self.load_schematic()?;
        Ok(self.expand_for(&doc, out_dir, pattern, id, ext, variant))
    }

    /// Expands an output name using the board's base name for `%f`.
    pub fn expand_filename_pcb(
        &self,
        out_dir: &Path,
        pattern: &str,
        id: &str,
        ext: &str,
        variant: Option<&str>,
    ) -> Result<PathBuf, ContextError> {
        let doc = self.load_board()?;
        Ok(self.expand_for(&doc, out_dir, pattern, id, ext, variant))
    }

    fn expand_for(
        &self,
        doc: &DesignDocument,
        out_dir: &Path,
        pattern: &str,
        id: &str,
        ext: &str,
        variant: Option<&str>,
    ) -> PathBuf {
        let mut overrides = TokenOverrides::new();
        overrides.insert('f', doc.name.clone());
        overrides.insert('v', self.variant_file_id(variant));
        expand::expand(out_dir, pattern, id, ext, &overrides)
    }
}

/// Finds the design file of `kind`: the configured path, a sibling of the
/// other design file, or the only candidate in the project directory.
fn resolve_design_path(state: &ContextState, kind: DesignKind) -> Result<PathBuf, ContextError> {
    let (configured, sibling) = match kind {
        DesignKind::Schematic => (&state.sch_file, &state.pcb_file),
        DesignKind::Board => (&state.pcb_file, &state.sch_file),
    };

    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(ContextError::DesignNotFound {
            kind,
            tried: vec![path.clone()],
        });
    }

    let mut tried = Vec::new();
    if let Some(other) = sibling {
        for ext in kind.extensions() {
            let candidate = other.with_extension(ext);
            if candidate.is_file() {
                debug!("Using {} '{}'", kind, candidate.display());
                return Ok(candidate);
            }
            tried.push(candidate);
        }
    }

    let project_dir = state
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let candidates = paths::find_files_with_extension(&project_dir, kind.extensions());
    match candidates.as_slice() {
        [] => {
            tried.push(project_dir.join(format!("*.{{{}}}", kind.extensions().join(","))));
            Err(ContextError::DesignNotFound { kind, tried })
        }
        [only] => Ok(only.clone()),
        [first, ..] => {
            warn!(
                "More than one {} file in '{}', using '{}'",
                kind,
                project_dir.display(),
                first.display()
            );
            Ok(first.clone())
        }
    }
}
