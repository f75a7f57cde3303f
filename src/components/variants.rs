// src/components/variants.rs

use crate::core::component::{Component, ComponentKind, StepEnv, StepError, StepOutcome};
use crate::core::registry::ComponentInit;
use crate::core::schema::{ConfigError, OptionSet, Schema};
use crate::state::GlobalContext;
use log::debug;

/// A named variant. Its only effect on file names is the `%v` suffix.
#[derive(Debug)]
pub struct BasicVariant {
    name: String,
    options: OptionSet,
}

impl BasicVariant {
    pub fn schema() -> Schema {
        Schema::builder()
            .string(
                "file_id",
                "",
                "Text to use as the %v replacement in file names. Empty means `_` followed by the variant name",
            )
            .string("comment", "", "A comment for documentation purposes")
            .build()
    }

    pub fn create(init: ComponentInit) -> Result<Box<dyn Component>, ConfigError> {
        Ok(Box::new(Self {
            name: init.name,
            options: init.options,
        }))
    }

    pub fn file_id(&self) -> String {
        match self.options.str("file_id") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("_{}", self.name),
        }
    }
}

impl Component for BasicVariant {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Variant
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &OptionSet {
        &self.options
    }

    fn apply(&self, ctx: &GlobalContext) {
        let id = self.file_id();
        debug!("Variant '{}' uses file id '{}'", self.name, id);
        ctx.register_variant(&self.name, &id);
    }

    fn run(&self, _env: &StepEnv<'_>) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(name: &str, src: &str, ctx: &GlobalContext) -> Box<dyn Component> {
        let options = BasicVariant::schema()
            .validate(&toml::from_str(src).unwrap(), ctx, name)
            .unwrap();
        BasicVariant::create(ComponentInit {
            kind: ComponentKind::Variant,
            name: name.to_string(),
            options,
            dir: None,
            comment: None,
        })
        .unwrap()
    }

    #[test]
    fn test_apply_registers_file_id() {
        let ctx = GlobalContext::detached();
        variant("production", "file_id = '-PROD'", &ctx).apply(&ctx);
        variant("proto", "", &ctx).apply(&ctx);
        assert!(ctx.has_variant("production"));
        assert_eq!(ctx.variant_file_id(Some("production")), "-PROD");
        assert_eq!(ctx.variant_file_id(Some("proto")), "_proto");
        assert_eq!(ctx.variant_file_id(None), "");
    }
}
