// src/models.rs

use serde::{Deserialize, Serialize};
use toml::{Table, Value};

// --- `kiflow.toml` MODELS (What is read from the plan file) ---

/// Represents the deserialized structure of a `kiflow.toml` file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    #[serde(default)]
    pub global: GlobalSection,
    /// Preflights are configured by a single value each, e.g. `run_erc = true`.
    #[serde(default)]
    pub preflight: Table,
    #[serde(default)]
    pub filters: Vec<ComponentEntry>,
    #[serde(default)]
    pub variants: Vec<ComponentEntry>,
    #[serde(default)]
    pub outputs: Vec<ComponentEntry>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalSection {
    /// Default pattern for every output file name.
    pub output: Option<String>,
    /// Variant applied to the outputs that don't choose one.
    pub variant: Option<String>,
    /// Output directory. `~` and environment variables are expanded.
    pub dir: Option<String>,
}

/// A named filter, variant or output.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ComponentEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub dir: Option<String>,
    pub comment: Option<String>,
    pub options: Option<Value>,
}
