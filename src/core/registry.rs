// src/core/registry.rs

//! # Component Registry
//!
//! Maps `(kind, type name)` to a factory and a schema builder. The process
//! wide registry is filled once by [`crate::components::register_builtin`] and
//! never modified afterwards. Schemas are built on first use and memoized.

use crate::components;
use crate::core::component::{Component, ComponentKind};
use crate::core::schema::{ConfigError, OptionSet, Schema};
use crate::state::GlobalContext;
use log::debug;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use toml::{Table, Value};

/// What a factory receives: the instance identity and its validated options.
#[derive(Debug, Clone)]
pub struct ComponentInit {
    pub kind: ComponentKind,
    pub name: String,
    pub options: OptionSet,
    /// Output sub directory, relative to the context's output directory.
    pub dir: Option<String>,
    pub comment: Option<String>,
}

pub type Factory = fn(ComponentInit) -> Result<Box<dyn Component>, ConfigError>;

/// A registered component type.
pub struct Descriptor {
    pub kind: ComponentKind,
    pub type_name: &'static str,
    pub description: &'static str,
    build_schema: fn() -> Schema,
    schema: OnceLock<Schema>,
    factory: Factory,
}

impl Descriptor {
    pub fn schema(&self) -> &Schema {
        self.schema.get_or_init(|| {
            debug!("Building schema for {} '{}'", self.kind, self.type_name);
            (self.build_schema)()
        })
    }
}

impl std::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Descriptor")
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Entry of a plan section, before validation.
#[derive(Debug, Clone, Copy)]
pub struct RawComponent<'a> {
    pub type_name: &'a str,
    pub name: &'a str,
    /// A mapping for filters, variants and outputs, a scalar for preflights.
    pub config: Option<&'a Value>,
    pub dir: Option<&'a str>,
    pub comment: Option<&'a str>,
}

#[derive(Debug, Default)]
pub struct Registry {
    descriptors: BTreeMap<(ComponentKind, &'static str), Descriptor>,
}

static GLOBAL_REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process wide registry holding the built-in components.
    pub fn global() -> Result<&'static Self, ConfigError> {
        if let Some(registry) = GLOBAL_REGISTRY.get() {
            return Ok(registry);
        }
        let mut registry = Self::new();
        components::register_builtin(&mut registry)?;
        Ok(GLOBAL_REGISTRY.get_or_init(|| registry))
    }

    pub fn register(
        &mut self,
        kind: ComponentKind,
        type_name: &'static str,
        description: &'static str,
        build_schema: fn() -> Schema,
        factory: Factory,
    ) -> Result<(), ConfigError> {
        if self.descriptors.contains_key(&(kind, type_name)) {
            return Err(ConfigError::DuplicateRegistration {
                kind: kind.as_str(),
                name: type_name.to_string(),
            });
        }
        self.descriptors.insert(
            (kind, type_name),
            Descriptor {
                kind,
                type_name,
                description,
                build_schema,
                schema: OnceLock::new(),
                factory,
            },
        );
        Ok(())
    }

    pub fn descriptor(&self, kind: ComponentKind, type_name: &str) -> Option<&Descriptor> {
        self.descriptors
            .iter()
            .find(|((k, n), _)| *k == kind && *n == type_name)
            .map(|(_, d)| d)
    }

    /// Registered descriptors of `kind`, sorted by type name.
    pub fn of_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &Descriptor> {
        self.descriptors
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|(_, d)| d)
    }

    /// Validates `raw` against the schema of its type and builds the component.
    pub fn instantiate(
        &self,
        kind: ComponentKind,
        raw: RawComponent<'_>,
        ctx: &GlobalContext,
    ) -> Result<Box<dyn Component>, ConfigError> {
        let descriptor =
            self.descriptor(kind, raw.type_name)
                .ok_or_else(|| ConfigError::UnknownComponent {
                    kind: kind.as_str(),
                    name: raw.type_name.to_string(),
                })?;
        let schema = descriptor.schema();

        let options = match (kind, raw.config) {
            (ComponentKind::Preflight, Some(value)) => schema.validate_scalar(value, ctx, raw.name)?,
            (_, Some(Value::Table(table))) => schema.validate(table, ctx, raw.name)?,
            (_, None) => schema.validate(&Table::new(), ctx, raw.name)?,
            (_, Some(other)) => {
                return Err(ConfigError::TypeMismatch {
                    key: format!("{}.options", raw.name),
                    expected: "dict".to_string(),
                    found: match other {
                        Value::Array(_) => "a list",
                        Value::String(_) => "a string",
                        _ => "a scalar",
                    },
                });
            }
        };

        match raw.comment {
            Some(comment) => debug!("Configured {} '{}' ({}): {}", kind, raw.name, raw.type_name, comment),
            None => debug!("Configured {} '{}' ({})", kind, raw.name, raw.type_name),
        }
        (descriptor.factory)(ComponentInit {
            kind,
            name: raw.name.to_string(),
            options,
            dir: raw.dir.map(str::to_string),
            comment: raw.comment.map(str::to_string),
        })
    }

    /// Documents every registered component of `kind` with its options.
    pub fn help(&self, kind: ComponentKind, ctx: &GlobalContext) -> String {
        let mut text = String::new();
        for descriptor in self.of_kind(kind) {
            let _ = writeln!(text, "* {}: {}", descriptor.type_name, descriptor.description);
            for entry in descriptor.schema().entries() {
                let _ = writeln!(text, "  - {}: {}", entry.name, entry.help_string(ctx));
            }
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::component::{StepEnv, StepError, StepOutcome};
    use crate::core::schema::OptionType;

    #[derive(Debug)]
    struct Dummy {
        name: String,
        options: OptionSet,
    }

    impl Component for Dummy {
        fn kind(&self) -> ComponentKind {
            ComponentKind::Filter
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn options(&self) -> &OptionSet {
            &self.options
        }

        fn run(&self, _env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome::Skipped)
        }
    }

    fn dummy_schema() -> Schema {
        Schema::builder()
            .global(
                "avar",
                OptionType::Number,
                |ctx| Value::Integer(i64::from(ctx.debug_level())),
                "Documentation",
            )
            .boolean("bar", false, "Rename fields matching the variant")
            .build()
    }

    fn dummy(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Dummy {
            name: init.name,
            options: init.options,
        }))
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(ComponentKind::Filter, "test", "A test filter", dummy_schema, dummy)
            .unwrap();
        registry
    }

    fn raw<'a>(config: Option<&'a Value>) -> RawComponent<'a> {
        RawComponent {
            type_name: "test",
            name: "mine",
            config,
            dir: None,
            comment: None,
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register(ComponentKind::Filter, "test", "again", dummy_schema, dummy)
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRegistration { .. }));
        // Same name under another kind is fine.
        registry
            .register(ComponentKind::Output, "test", "An output", dummy_schema, dummy)
            .unwrap();
    }

    #[test]
    fn test_instantiate_with_explicit_and_default_values() {
        let ctx = GlobalContext::detached();
        ctx.set_debug_level(3);
        let config: Value = Value::Table(toml::from_str("bar = true").unwrap());
        let component = registry()
            .instantiate(ComponentKind::Filter, raw(Some(&config)), &ctx)
            .unwrap();
        assert_eq!(component.name(), "mine");
        assert!(component.options().bool("bar"));
        assert_eq!(component.options().integer("avar"), Some(3));
    }

    #[test]
    fn test_instantiate_unknown_key() {
        let ctx = GlobalContext::detached();
        let config: Value = Value::Table(toml::from_str("baz = 1").unwrap());
        let err = registry()
            .instantiate(ComponentKind::Filter, raw(Some(&config)), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("mine.baz"), "{err}");
    }

    #[test]
    fn test_instantiate_unknown_type() {
        let ctx = GlobalContext::detached();
        let err = registry()
            .instantiate(ComponentKind::Output, raw(None), &ctx)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownComponent { kind: "output", .. }));
    }

    #[test]
    fn test_schema_is_memoized() {
        let registry = registry();
        let descriptor = registry.descriptor(ComponentKind::Filter, "test").unwrap();
        assert!(std::ptr::eq(descriptor.schema(), descriptor.schema()));
    }

    #[test]
    fn test_help_lists_options() {
        let ctx = GlobalContext::detached();
        let help = registry().help(ComponentKind::Filter, &ctx);
        assert!(help.contains("* test: A test filter"));
        assert!(help.contains("avar: [number=0] Documentation. Affected by global options"));
    }

    #[test]
    fn test_global_registry_has_builtins() {
        let registry = Registry::global().unwrap();
        assert!(registry.descriptor(ComponentKind::Preflight, "run_erc").is_some());
        assert!(registry.descriptor(ComponentKind::Output, "pdf_pcb_print").is_some());
    }
}
