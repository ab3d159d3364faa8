use std::sync::Arc;

use log::debug;

use super::{AppFactoryHook, HookContext, import_bundle_modules};
use crate::{app::App, bundle::Bundle};

/// Declares every bundle's models, then finalizes the registry.
///
/// Declaration order is boot order with each hierarchy walked root-first,
/// which is what lets a later bundle's model take over an earlier one.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelsHook;

impl AppFactoryHook for ModelsHook {
    fn name(&self) -> &str {
        "models"
    }

    fn bundle_module_names(&self) -> Vec<String> {
        vec!["models".to_owned()]
    }

    fn run_after(&self) -> Vec<String> {
        vec!["register_extensions".to_owned()]
    }

    fn run_hook(
        &mut self,
        app: &mut App,
        bundles: &[Arc<Bundle>],
        ctx: &HookContext<'_>,
    ) -> anyhow::Result<()> {
        let module_names = self.bundle_module_names();
        for bundle in bundles {
            let levels = bundle.ancestors_then_self();
            for module in import_bundle_modules(self, bundle, ctx.loader)? {
                // the hierarchy level whose sub-module this is
                let owner = levels
                    .iter()
                    .find(|level| module_names.iter().any(|n| level.submodule(n) == module.name()))
                    .map_or(bundle.name(), |level| level.name());
                for def in module.models() {
                    let mut def = def.clone();
                    if def.bundle.is_none() {
                        def.bundle = Some(owner.to_owned());
                    }
                    let cls = app.models_mut().declare(def)?;
                    debug!("Declared model {} from bundle {owner}", cls.qualname());
                }
            }
        }
        app.models_mut().finalize()?;
        Ok(())
    }
}
