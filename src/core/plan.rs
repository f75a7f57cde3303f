// src/core/plan.rs

//! # Plan Loader
//!
//! Reads a `kiflow.toml` plan and turns it into configured components. Every
//! check that can fail without touching a design file happens here, so a bad
//! plan is rejected before any step runs.

use crate::constants::PLAN_FILENAME;
use crate::core::component::{Component, ComponentKind};
use crate::core::paths;
use crate::core::registry::{RawComponent, Registry};
use crate::core::schema::ConfigError;
use crate::models::{ComponentEntry, PlanFile};
use crate::state::GlobalContext;
use log::{debug, info};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// The configured components of a plan, in execution order.
#[derive(Debug, Default)]
pub struct Plan {
    pub preflights: Vec<Box<dyn Component>>,
    pub filters: Vec<Box<dyn Component>>,
    pub variants: Vec<Box<dyn Component>>,
    pub outputs: Vec<Box<dyn Component>>,
}

impl Plan {
    pub fn output(&self, name: &str) -> Option<&dyn Component> {
        self.outputs.iter().find(|o| o.name() == name).map(Box::as_ref)
    }

    /// Every component, preflights first.
    pub fn components(&self) -> impl Iterator<Item = &dyn Component> {
        self.preflights
            .iter()
            .chain(&self.filters)
            .chain(&self.variants)
            .chain(&self.outputs)
            .map(Box::as_ref)
    }
}

/// Looks for the plan file in `dir`.
pub fn find_plan_file(dir: &Path) -> Result<PathBuf, ConfigError> {
    let candidate = dir.join(PLAN_FILENAME);
    if candidate.is_file() {
        debug!("Using plan '{}'", candidate.display());
        Ok(candidate)
    } else {
        Err(ConfigError::PlanNotFound(candidate.display().to_string()))
    }
}

pub fn load_plan_file(path: &Path) -> Result<PlanFile, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plan(&content, path)
}

/// Parses the plan text. `path` is only used in error messages.
pub fn parse_plan(content: &str, path: &Path) -> Result<PlanFile, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::PlanParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Copies the `[global]` section into the context.
///
/// Values already present in the context (set from the command line) win,
/// except the output pattern and variant, which only the plan defines.
pub fn apply_globals(file: &PlanFile, ctx: &GlobalContext) -> Result<(), ConfigError> {
    let global = &file.global;
    if global.output.is_some() {
        ctx.set_global_output(global.output.clone());
    }
    if global.variant.is_some() {
        ctx.set_variant(global.variant.clone());
    }
    if let Some(dir) = &global.dir {
        let expanded = paths::expand_user_path(dir).map_err(|e| ConfigError::InvalidValue {
            key: "global.dir".to_string(),
            reason: e.to_string(),
        })?;
        ctx.set_out_dir_if_unset(expanded);
    }
    Ok(())
}

/// Instantiates every component of the plan and validates the cross references.
///
/// # Arguments
///
/// * `file` - The parsed plan.
/// * `registry` - Where component types are looked up.
/// * `ctx` - Used to compute the defaults that depend on the global options.
pub fn configure(
    file: &PlanFile,
    registry: &Registry,
    ctx: &GlobalContext,
) -> Result<Plan, ConfigError> {
    let mut plan = Plan::default();

    for (name, value) in &file.preflight {
        let raw = RawComponent {
            type_name: name,
            name,
            config: Some(value),
            dir: None,
            comment: None,
        };
        plan.preflights
            .push(registry.instantiate(ComponentKind::Preflight, raw, ctx)?);
    }

    plan.filters = instantiate_all(ComponentKind::Filter, &file.filters, registry, ctx)?;
    plan.variants = instantiate_all(ComponentKind::Variant, &file.variants, registry, ctx)?;
    plan.outputs = instantiate_all(ComponentKind::Output, &file.outputs, registry, ctx)?;

    check_references(&plan, file.global.variant.as_deref())?;

    info!(
        "Plan: {} preflight(s), {} filter(s), {} variant(s), {} output(s)",
        plan.preflights.len(),
        plan.filters.len(),
        plan.variants.len(),
        plan.outputs.len()
    );
    Ok(plan)
}

fn instantiate_all(
    kind: ComponentKind,
    entries: &[ComponentEntry],
    registry: &Registry,
    ctx: &GlobalContext,
) -> Result<Vec<Box<dyn Component>>, ConfigError> {
    let mut seen = HashSet::new();
    let mut components = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.name.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: format!("{kind}s.name"),
                reason: "must not be empty".to_string(),
            });
        }
        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::DuplicateName {
                kind: kind.as_str(),
                name: entry.name.clone(),
            });
        }
        let raw = RawComponent {
            type_name: &entry.type_name,
            name: &entry.name,
            config: entry.options.as_ref(),
            dir: entry.dir.as_deref(),
            comment: entry.comment.as_deref(),
        };
        components.push(registry.instantiate(kind, raw, ctx)?);
    }
    Ok(components)
}

fn check_references(plan: &Plan, global_variant: Option<&str>) -> Result<(), ConfigError> {
    let filters = component_names(&plan.filters);
    let variants = component_names(&plan.variants);

    if let Some(variant) = global_variant {
        if !variants.contains(variant) {
            return Err(ConfigError::UnknownReference {
                output: "global".to_string(),
                kind: ComponentKind::Variant.as_str(),
                name: variant.to_string(),
            });
        }
    }

    for component in plan.components() {
        for (kind, name) in component.references() {
            let known = match kind {
                ComponentKind::Filter => &filters,
                ComponentKind::Variant => &variants,
                ComponentKind::Preflight | ComponentKind::Output => continue,
            };
            if !known.contains(&name) {
                return Err(ConfigError::UnknownReference {
                    output: component.name().to_string(),
                    kind: kind.as_str(),
                    name,
                });
            }
        }
    }
    Ok(())
}

fn component_names(list: &[Box<dyn Component>]) -> HashSet<String> {
    list.iter().map(|c| c.name().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
[global]
output = "%f-%i%v.%x"
variant = "production"

[preflight]
run_erc = true
ignore_unconnected = true

[[filters]]
name = "no_tp"
type = "generic"
[filters.options]
exclude_refs = ["TP1", "TP2"]

[[variants]]
name = "production"
type = "basic"
[variants.options]
file_id = "_prod"

[[outputs]]
name = "schematic"
type = "pdf_sch_print"
dir = "docs"
[outputs.options]
dnf_filter = "no_tp"

[[outputs]]
name = "copper"
type = "pdf_pcb_print"
[outputs.options]
layers = ["F.Cu", "B.Cu"]
"#;

    fn configure_str(src: &str) -> Result<Plan, ConfigError> {
        let ctx = GlobalContext::detached();
        let file = parse_plan(src, Path::new("kiflow.toml"))?;
        apply_globals(&file, &ctx)?;
        configure(&file, Registry::global()?, &ctx)
    }

    #[test]
    fn test_configure_full_plan() {
        let plan = configure_str(PLAN).unwrap();
        assert_eq!(plan.preflights.len(), 2);
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.variants.len(), 1);
        assert_eq!(plan.outputs.len(), 2);
        let copper = plan.output("copper").unwrap();
        assert_eq!(copper.options().strings("layers"), vec!["F.Cu", "B.Cu"]);
        // Global default resolved at configuration time.
        let schematic = plan.output("schematic").unwrap();
        assert_eq!(schematic.options().str("output"), Some("%f-%i%v.%x"));
    }

    #[test]
    fn test_unknown_top_level_key() {
        let err = configure_str("[globals]\noutput = 'x'\n").unwrap_err();
        assert!(matches!(err, ConfigError::PlanParse { .. }));
    }

    #[test]
    fn test_unknown_output_type() {
        let err = configure_str("[[outputs]]\nname = 'a'\ntype = 'gerber'\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownComponent { kind: "output", .. }));
    }

    #[test]
    fn test_duplicated_output_name() {
        let src = "[[outputs]]\nname = 'a'\ntype = 'pdf_sch_print'\n[[outputs]]\nname = 'a'\ntype = 'pdf_sch_print'\n";
        let err = configure_str(src).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName { .. }));
    }

    #[test]
    fn test_unknown_filter_reference() {
        let src = "[[outputs]]\nname = 'a'\ntype = 'pdf_sch_print'\n[outputs.options]\ndnf_filter = 'nope'\n";
        let err = configure_str(src).unwrap_err();
        assert!(
            matches!(err, ConfigError::UnknownReference { ref output, kind: "filter", ref name } if output == "a" && name == "nope")
        );
    }

    #[test]
    fn test_unknown_global_variant() {
        let err = configure_str("[global]\nvariant = 'ghost'\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownReference { kind: "variant", .. }));
    }

    #[test]
    fn test_preflight_must_be_boolean() {
        let err = configure_str("[preflight]\nrun_erc = 'yes'\n").unwrap_err();
        assert!(err.to_string().contains("run_erc"), "{err}");
    }

    #[test]
    fn test_find_plan_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(matches!(find_plan_file(tmp.path()), Err(ConfigError::PlanNotFound(_))));
        fs::write(tmp.path().join(PLAN_FILENAME), PLAN).unwrap();
        let path = find_plan_file(tmp.path()).unwrap();
        let file = load_plan_file(&path).unwrap();
        assert_eq!(file.outputs.len(), 2);
    }

    #[test]
    fn test_global_dir_does_not_override_command_line() {
        let ctx = GlobalContext::detached();
        ctx.set_out_dir("from_cli");
        let file = parse_plan("[global]\ndir = 'from_plan'\n", Path::new("p")).unwrap();
        apply_globals(&file, &ctx).unwrap();
        assert_eq!(ctx.out_dir(), PathBuf::from("from_cli"));

        let ctx = GlobalContext::detached();
        apply_globals(&file, &ctx).unwrap();
        assert_eq!(ctx.out_dir(), PathBuf::from("from_plan"));
    }
}
