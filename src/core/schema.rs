// src/core/schema.rs

//! # Option Schemas
//!
//! Every configurable component declares its options through a [`Schema`]: an
//! ordered list of typed entries, each carrying a default and a help text.
//! The schema validates the user supplied mapping from the plan file and fills
//! in the defaults, producing an [`OptionSet`].
//!
//! A default can be a fixed value or a function of the [`GlobalContext`]. The
//! latter is evaluated at validation time and flagged in the help text with
//! "Affected by global options".

use crate::state::GlobalContext;
use std::fmt;
use thiserror::Error;
use toml::{Table, Value};

/// Errors detected while reading or validating a pipeline configuration.
/// All of them are fatal and are reported before any step runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown option `{key}`")]
    UnknownOption { key: String },
    #[error("Option `{key}` must be {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: String,
        found: &'static str,
    },
    #[error("Option `{key}` must be one of {allowed}, found '{value}'")]
    InvalidChoice {
        key: String,
        value: String,
        allowed: String,
    },
    #[error("Invalid value for `{key}`: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("A {kind} named '{name}' is already registered")]
    DuplicateRegistration { kind: ComponentKindName, name: String },
    #[error("Unknown {kind} type '{name}'")]
    UnknownComponent { kind: ComponentKindName, name: String },
    #[error("Duplicated {kind} name '{name}'")]
    DuplicateName { kind: ComponentKindName, name: String },
    #[error("Output '{output}' references an unknown {kind} '{name}'")]
    UnknownReference {
        output: String,
        kind: ComponentKindName,
        name: String,
    },
    #[error("Unknown output '{0}' requested")]
    UnknownTarget(String),
    #[error("No pipeline plan found, looked for '{0}'")]
    PlanNotFound(String),
    #[error("Failed to parse plan file '{path}': {source}")]
    PlanParse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Human readable component kind, used inside error messages.
pub type ComponentKindName = &'static str;

/// The semantic type of an option.
#[derive(Debug, Clone)]
pub enum OptionType {
    Boolean,
    /// Integer or floating point.
    Number,
    String,
    /// A string restricted to a fixed set of values.
    Choice(&'static [&'static str]),
    /// A list of items. A single scalar is accepted and promoted to a one item list.
    List(Box<OptionType>),
    /// A nested mapping with its own schema.
    Object(Schema),
}

impl OptionType {
    /// The name used in help strings and type errors.
    pub fn label(&self) -> String {
        match self {
            Self::Boolean => "boolean".to_string(),
            Self::Number => "number".to_string(),
            Self::String => "string".to_string(),
            Self::Choice(choices) => format!("string ({})", choices.join("|")),
            Self::List(item) => format!("list({})", item.label()),
            Self::Object(_) => "dict".to_string(),
        }
    }
}

/// Where the value of an omitted option comes from.
#[derive(Clone)]
pub enum DefaultValue {
    /// The option stays unset.
    Unset,
    Fixed(Value),
    /// Computed from the global context each time a component is instantiated.
    Global(fn(&GlobalContext) -> Value),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "Unset"),
            Self::Fixed(v) => write!(f, "Fixed({v})"),
            Self::Global(_) => write!(f, "Global(..)"),
        }
    }
}

/// A single declared option.
#[derive(Debug, Clone)]
pub struct OptionEntry {
    pub name: &'static str,
    pub ty: OptionType,
    pub default: DefaultValue,
    pub help: &'static str,
}

impl OptionEntry {
    /// True when the default value is read from the global context.
    pub fn affected_by_global(&self) -> bool {
        matches!(self.default, DefaultValue::Global(_))
    }

    /// Resolves the default against the given context.
    pub fn default_value(&self, ctx: &GlobalContext) -> Option<Value> {
        match &self.default {
            DefaultValue::Unset => None,
            DefaultValue::Fixed(v) => Some(v.clone()),
            DefaultValue::Global(f) => Some(f(ctx)),
        }
    }

    /// Builds the documentation line, e.g. `[boolean=true] Other doc. Affected by global options`.
    pub fn help_string(&self, ctx: &GlobalContext) -> String {
        let prefix = match self.default_value(ctx) {
            Some(v) => format!("[{}={}]", self.ty.label(), render_default(&v)),
            None => format!("[{}]", self.ty.label()),
        };
        let mut text = self.help.trim().to_string();
        if self.affected_by_global() {
            if !text.ends_with('.') {
                text.push('.');
            }
            text.push_str(" Affected by global options");
        }
        format!("{prefix} {text}")
    }
}

fn render_default(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::Array(items) if items.is_empty() => "[]".to_string(),
        Value::Table(_) => "{}".to_string(),
        other => other.to_string(),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "a string",
        Value::Integer(_) | Value::Float(_) => "a number",
        Value::Boolean(_) => "a boolean",
        Value::Datetime(_) => "a date",
        Value::Array(_) => "a list",
        Value::Table(_) => "a dict",
    }
}

/// The declared options of a component type, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: Vec<OptionEntry>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entries(&self) -> &[OptionEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&OptionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Validates a mapping against the schema and applies the defaults.
    ///
    /// `key_prefix` is prepended to the names reported in errors, so nested
    /// objects report paths like `options.margins.left`.
    pub fn validate(
        &self,
        config: &Table,
        ctx: &GlobalContext,
        key_prefix: &str,
    ) -> Result<OptionSet, ConfigError> {
        for key in config.keys() {
            if self.entry(key).is_none() {
                return Err(ConfigError::UnknownOption {
                    key: qualify(key_prefix, key),
                });
            }
        }

        let mut values = Table::new();
        for entry in &self.entries {
            let key = qualify(key_prefix, entry.name);
            let value = match config.get(entry.name) {
                Some(raw) => Some(check_value(&entry.ty, raw, &key, ctx)?),
                None => match (entry.default_value(ctx), &entry.ty) {
                    // Nested objects always materialize, so their own defaults apply.
                    (None, OptionType::Object(schema)) => {
                        Some(Value::Table(schema.validate(&Table::new(), ctx, &key)?.into_table()))
                    }
                    (default, _) => default,
                },
            };
            if let Some(v) = value {
                values.insert(entry.name.to_string(), v);
            }
        }
        Ok(OptionSet { values })
    }

    /// Validates a bare scalar against a single entry schema.
    /// Used by preflights, configured as `run_erc = true` rather than a mapping.
    pub fn validate_scalar(
        &self,
        value: &Value,
        ctx: &GlobalContext,
        key: &str,
    ) -> Result<OptionSet, ConfigError> {
        let mut values = Table::new();
        if let Some(entry) = self.entries.first() {
            values.insert(entry.name.to_string(), check_value(&entry.ty, value, key, ctx)?);
        }
        Ok(OptionSet { values })
    }
}

fn qualify(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn check_value(
    ty: &OptionType,
    value: &Value,
    key: &str,
    ctx: &GlobalContext,
) -> Result<Value, ConfigError> {
    let mismatch = || ConfigError::TypeMismatch {
        key: key.to_string(),
        expected: ty.label(),
        found: value_kind(value),
    };
    match (ty, value) {
        (OptionType::Boolean, Value::Boolean(_))
        | (OptionType::Number, Value::Integer(_) | Value::Float(_))
        | (OptionType::String, Value::String(_)) => Ok(value.clone()),
        (OptionType::Choice(choices), Value::String(s)) => {
            if choices.contains(&s.as_str()) {
                Ok(value.clone())
            } else {
                Err(ConfigError::InvalidChoice {
                    key: key.to_string(),
                    value: s.clone(),
                    allowed: choices.join("|"),
                })
            }
        }
        (OptionType::List(item), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, v)| check_value(item, v, &format!("{key}[{i}]"), ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (OptionType::List(item), scalar) if !matches!(scalar, Value::Table(_)) => {
            Ok(Value::Array(vec![check_value(item, scalar, key, ctx)?]))
        }
        (OptionType::Object(schema), Value::Table(table)) => {
            Ok(Value::Table(schema.validate(table, ctx, key)?.into_table()))
        }
        _ => Err(mismatch()),
    }
}

/// Fluent construction of a [`Schema`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entries: Vec<OptionEntry>,
}

impl SchemaBuilder {
    fn push(mut self, name: &'static str, ty: OptionType, default: DefaultValue, help: &'static str) -> Self {
        debug_assert!(
            self.entries.iter().all(|e| e.name != name),
            "option '{name}' declared twice"
        );
        self.entries.push(OptionEntry { name, ty, default, help });
        self
    }

    pub fn boolean(self, name: &'static str, default: bool, help: &'static str) -> Self {
        self.push(name, OptionType::Boolean, DefaultValue::Fixed(Value::Boolean(default)), help)
    }

    pub fn number(self, name: &'static str, default: i64, help: &'static str) -> Self {
        self.push(name, OptionType::Number, DefaultValue::Fixed(Value::Integer(default)), help)
    }

    pub fn string(self, name: &'static str, default: &str, help: &'static str) -> Self {
        self.push(
            name,
            OptionType::String,
            DefaultValue::Fixed(Value::String(default.to_string())),
            help,
        )
    }

    /// A string option with no default: omitted means "not set".
    pub fn optional_string(self, name: &'static str, help: &'static str) -> Self {
        self.push(name, OptionType::String, DefaultValue::Unset, help)
    }

    pub fn choice(
        self,
        name: &'static str,
        choices: &'static [&'static str],
        default: &'static str,
        help: &'static str,
    ) -> Self {
        self.push(
            name,
            OptionType::Choice(choices),
            DefaultValue::Fixed(Value::String(default.to_string())),
            help,
        )
    }

    /// A list option defaulting to an empty list.
    pub fn list(self, name: &'static str, item: OptionType, help: &'static str) -> Self {
        self.push(
            name,
            OptionType::List(Box::new(item)),
            DefaultValue::Fixed(Value::Array(Vec::new())),
            help,
        )
    }

    pub fn object(self, name: &'static str, schema: Schema, help: &'static str) -> Self {
        self.push(name, OptionType::Object(schema), DefaultValue::Unset, help)
    }

    /// An option whose default is read from the global context.
    pub fn global(
        self,
        name: &'static str,
        ty: OptionType,
        default: fn(&GlobalContext) -> Value,
        help: &'static str,
    ) -> Self {
        self.push(name, ty, DefaultValue::Global(default), help)
    }

    pub fn build(self) -> Schema {
        Schema {
            entries: self.entries,
        }
    }
}

/// Validated option values of a configured component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionSet {
    values: Table,
}

impl OptionSet {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn bool(&self, name: &str) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            Value::Integer(i) => Some(*i),
            // Float options are truncated toward zero.
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn strings(&self, name: &str) -> Vec<String> {
        self.get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn object(&self, name: &str) -> Option<Self> {
        self.get(name)
            .and_then(Value::as_table)
            .map(|t| Self { values: t.clone() })
    }

    pub fn into_table(self) -> Table {
        self.values
    }
}
