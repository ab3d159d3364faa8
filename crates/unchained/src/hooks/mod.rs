//! Boot pipeline steps
//!
//! Each [`AppFactoryHook`] is one named step of booting an application. The
//! factory orders hooks by their `run_after` / `run_before` declarations and
//! then runs each one with the full bundle list; a hook decides on its own
//! how to walk the bundles. Most hooks consume one kind of bundle
//! sub-module and use [`import_bundle_modules`] to find it on every level
//! of a bundle's hierarchy.

mod configure_app;
mod models;
mod register_commands;
mod register_extensions;

use std::{fmt, sync::Arc};

use log::trace;

pub use configure_app::ConfigureAppHook;
pub use models::ModelsHook;
pub use register_commands::RegisterCommandsHook;
pub use register_extensions::RegisterExtensionsHook;

use crate::{
    app::App,
    bundle::Bundle,
    config::ProjectConfig,
    env::Env,
    error::{Error, Result},
    module::{Module, ModuleLoader},
};

/// Builds a fresh hook instance for each boot
pub type HookFactory = Arc<dyn Fn() -> Box<dyn AppFactoryHook> + Send + Sync>;

/// What a hook can see besides the app and the bundles
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub loader: &'a dyn ModuleLoader,
    pub project: &'a ProjectConfig,
    pub env: Env,
}

pub trait AppFactoryHook: fmt::Debug {
    /// Unique name other hooks refer to in `run_after` / `run_before`
    fn name(&self) -> &str;

    /// Sub-module names looked up on each bundle level (`"config"`, ...)
    fn bundle_module_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn run_after(&self) -> Vec<String> {
        Vec::new()
    }

    /// Hooks that must run after this one
    fn run_before(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fail when a bundle level has more than one of the sub-modules
    fn require_exactly_one_bundle_module(&self) -> bool {
        false
    }

    fn run_hook(
        &mut self,
        app: &mut App,
        bundles: &[Arc<Bundle>],
        ctx: &HookContext<'_>,
    ) -> anyhow::Result<()>;
}

/// The hooks every app runs
pub fn builtin_hooks() -> Vec<HookFactory> {
    vec![
        Arc::new(|| Box::new(ConfigureAppHook) as Box<dyn AppFactoryHook>),
        Arc::new(|| Box::new(RegisterExtensionsHook) as Box<dyn AppFactoryHook>),
        Arc::new(|| Box::new(RegisterCommandsHook) as Box<dyn AppFactoryHook>),
        Arc::new(|| Box::new(ModelsHook) as Box<dyn AppFactoryHook>),
    ]
}

/// Import `hook`'s sub-modules for every level of `bundle`, root-first.
///
/// Levels without any of the sub-modules are skipped.
pub fn import_bundle_modules(
    hook: &dyn AppFactoryHook,
    bundle: &Bundle,
    loader: &dyn ModuleLoader,
) -> Result<Vec<Arc<Module>>> {
    let names = hook.bundle_module_names();
    let mut modules = Vec::new();
    for level in bundle.ancestors_then_self() {
        let mut found = Vec::new();
        for name in &names {
            let module_name = level.submodule(name);
            match loader.load(&module_name) {
                Ok(Some(module)) => found.push(module),
                Ok(None) => trace!("{module_name} not found for hook {}", hook.name()),
                Err(source) => {
                    return Err(Error::ModuleImport {
                        bundle: level.name().to_owned(),
                        module: module_name,
                        source,
                    });
                }
            }
        }
        if hook.require_exactly_one_bundle_module() && found.len() > 1 {
            return Err(Error::MultipleBundleModules {
                bundle: level.name().to_owned(),
                hook: hook.name().to_owned(),
                modules: found.iter().map(|m| m.name().to_owned()).collect(),
            });
        }
        modules.extend(found);
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::module::ModuleCatalog;

    #[derive(Debug)]
    struct ViewsHook {
        exactly_one: bool,
    }

    impl AppFactoryHook for ViewsHook {
        fn name(&self) -> &str {
            "views"
        }

        fn bundle_module_names(&self) -> Vec<String> {
            vec!["views".to_owned(), "routes".to_owned()]
        }

        fn require_exactly_one_bundle_module(&self) -> bool {
            self.exactly_one
        }

        fn run_hook(&mut self, _: &mut App, _: &[Arc<Bundle>], _: &HookContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_import_walks_hierarchy_root_first() {
        let base = Arc::new(Bundle::new("security"));
        let leaf = Bundle::new("app.security").extends(base);
        let catalog = ModuleCatalog::new()
            .with(Module::new("app.security.views"))
            .with(Module::new("security.routes"));

        let hook = ViewsHook { exactly_one: true };
        let modules = import_bundle_modules(&hook, &leaf, &catalog).unwrap();
        let names: Vec<_> = modules.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["security.routes", "app.security.views"]);
    }

    #[test]
    fn test_import_errors() {
        let bundle = Bundle::new("blog");
        let both = ModuleCatalog::new()
            .with(Module::new("blog.views"))
            .with(Module::new("blog.routes"));

        let err = import_bundle_modules(&ViewsHook { exactly_one: true }, &bundle, &both).unwrap_err();
        assert!(matches!(err, Error::MultipleBundleModules { .. }), "{err}");
        let modules = import_bundle_modules(&ViewsHook { exactly_one: false }, &bundle, &both).unwrap();
        assert_eq!(modules.len(), 2);

        let mut broken = ModuleCatalog::new();
        broken.register_broken("blog.views", "boom");
        let err = import_bundle_modules(&ViewsHook { exactly_one: false }, &bundle, &broken).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"failed to import module "blog.views" of bundle "blog": boom"#
        );
    }
}
