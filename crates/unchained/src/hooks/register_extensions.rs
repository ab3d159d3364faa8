use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, info};

use super::{AppFactoryHook, HookContext, import_bundle_modules};
use crate::{
    app::{App, ExtensionDef},
    bundle::Bundle,
    error::Error,
    graph::DependencyGraph,
};

/// Initializes the extensions contributed by bundles' `extensions` modules.
///
/// A later bundle's extension replaces an earlier one with the same name.
/// Extensions are initialized in dependency order, ties broken by the order
/// they were first contributed.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegisterExtensionsHook;

impl AppFactoryHook for RegisterExtensionsHook {
    fn name(&self) -> &str {
        "register_extensions"
    }

    fn bundle_module_names(&self) -> Vec<String> {
        vec!["extensions".to_owned()]
    }

    fn run_after(&self) -> Vec<String> {
        vec!["configure_app".to_owned()]
    }

    fn run_hook(
        &mut self,
        app: &mut App,
        bundles: &[Arc<Bundle>],
        ctx: &HookContext<'_>,
    ) -> anyhow::Result<()> {
        let mut defs: IndexMap<String, ExtensionDef> = IndexMap::new();
        for bundle in bundles {
            for module in import_bundle_modules(self, bundle, ctx.loader)? {
                for def in module.extensions() {
                    if defs.insert(def.name().to_owned(), def.clone()).is_some() {
                        debug!("Extension {} replaced by {}", def.name(), module.name());
                    }
                }
            }
        }

        let mut graph = DependencyGraph::new("extension");
        for name in defs.keys() {
            graph.add_node(name);
        }
        for def in defs.values() {
            for dependency in def.dependencies() {
                graph.add_dependency(def.name(), dependency)?;
            }
        }

        for name in graph.topological_sort()? {
            let Some(def) = defs.get(&name) else {
                continue;
            };
            let mut extension = def.build();
            extension
                .init_app(app)
                .map_err(|source| Error::Extension {
                    name: name.clone(),
                    source,
                })?;
            debug!("Initialized extension {name}");
            app.insert_extension(name, extension);
        }
        info!("Registered {} extension(s)", defs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        app::Extension,
        config::ProjectConfig,
        env::Env,
        module::{Module, ModuleCatalog},
    };

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Extension for Recorder {
        fn init_app(&mut self, app: &mut App) -> anyhow::Result<()> {
            self.log.lock().unwrap().push(self.name.to_owned());
            app.config_mut()
                .insert(format!("{}_READY", self.name.to_uppercase()), true);
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> ExtensionDef {
        let log = Arc::clone(log);
        ExtensionDef::new(name, move || {
            Box::new(Recorder {
                name,
                log: Arc::clone(&log),
            })
        })
    }

    fn run(catalog: &ModuleCatalog, bundles: &[Arc<Bundle>]) -> anyhow::Result<App> {
        let project = ProjectConfig::new(bundles.iter().map(|b| b.module_name().to_owned()));
        let mut app = App::new("test", Env::Test);
        let ctx = HookContext {
            loader: catalog,
            project: &project,
            env: Env::Test,
        };
        RegisterExtensionsHook.run_hook(&mut app, bundles, &ctx)?;
        Ok(app)
    }

    #[test]
    fn test_dependency_order_and_override() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let catalog = ModuleCatalog::new()
            .with(
                Module::new("security.extensions")
                    .with_extension(recorder("security", &log).depends_on(["session", "db"]))
                    .with_extension(recorder("session", &log)),
            )
            .with(Module::new("db.extensions").with_extension(recorder("db", &log)))
            .with(
                Module::new("app.extensions")
                    .with_extension(recorder("session", &log).depends_on(["db"])),
            );
        let bundles = [
            Arc::new(Bundle::new("security")),
            Arc::new(Bundle::new("db")),
            Arc::new(Bundle::app("app")),
        ];

        let app = run(&catalog, &bundles).unwrap();
        assert_eq!(*log.lock().unwrap(), ["db", "session", "security"]);
        let names: Vec<_> = app.extension_names().collect();
        assert_eq!(names, ["db", "session", "security"]);
        assert_eq!(app.config().get_bool("SESSION_READY"), Some(true));
        assert!(app.extension("db").is_some());
    }

    #[test]
    fn test_unknown_dependency_and_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let catalog = ModuleCatalog::new().with(
            Module::new("mail.extensions").with_extension(recorder("mail", &log).depends_on(["celery"])),
        );
        let err = run(&catalog, &[Arc::new(Bundle::new("mail"))]).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"extension "mail" must run after unknown extension "celery""#
        );

        #[derive(Debug)]
        struct Broken;
        impl Extension for Broken {
            fn init_app(&mut self, _: &mut App) -> anyhow::Result<()> {
                anyhow::bail!("missing MAIL_SERVER")
            }
        }
        let catalog = ModuleCatalog::new().with(
            Module::new("mail.extensions").with_extension(ExtensionDef::new("mail", || Box::new(Broken))),
        );
        let err = run(&catalog, &[Arc::new(Bundle::new("mail"))]).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"extension "mail" failed to initialize: missing MAIL_SERVER"#
        );
    }
}
