// src/components/filters.rs

use crate::core::component::{Component, ComponentKind, StepEnv, StepError, StepOutcome};
use crate::core::registry::ComponentInit;
use crate::core::schema::{ConfigError, OptionSet, OptionType, Schema};
use crate::state::GlobalContext;
use log::debug;
use regex::Regex;

/// Excludes components by reference (`*` and `?` wildcards) or by an empty value.
#[derive(Debug)]
pub struct GenericFilter {
    name: String,
    options: OptionSet,
    exclude_refs: Vec<Regex>,
}

impl GenericFilter {
    pub fn schema() -> Schema {
        Schema::builder()
            .list(
                "exclude_refs",
                OptionType::String,
                "List of references to be excluded. Use R* for all references with R prefix",
            )
            .boolean(
                "exclude_empty_val",
                false,
                "Exclude components with empty 'Value'",
            )
            .string("comment", "", "A comment for documentation purposes")
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        let exclude_refs = init
            .options
            .strings("exclude_refs")
            .iter()
            .map(|pattern| {
                wildcard_regex(pattern).map_err(|e| ConfigError::InvalidValue {
                    key: format!("{}.exclude_refs", init.name),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
            exclude_refs,
        }))
    }

    /// True when a component with this reference and value must be left out.
    #[cfg(test)]
    pub fn excludes(&self, reference: &str, value: &str) -> bool {
        if self.options.bool("exclude_empty_val") && value.trim().is_empty() {
            return true;
        }
        self.exclude_refs.iter().any(|re| re.is_match(reference))
    }
}

fn wildcard_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = regex::escape(pattern)
        .replace(r"\*", ".*")
        .replace(r"\?", ".");
    Regex::new(&format!("^{body}$"))
}

impl Component for GenericFilter {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Filter
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &OptionSet {
        &self.options
    }

    fn apply(&self, _ctx: &GlobalContext) {
        debug!(
            "Filter '{}': {} excluded reference pattern(s), empty values {}",
            self.name,
            self.exclude_refs.len(),
            if self.options.bool("exclude_empty_val") { "excluded" } else { "kept" }
        );
    }

    fn run(&self, _env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Skipped)
    }
}
