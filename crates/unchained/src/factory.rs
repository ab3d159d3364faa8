//! Boots an application from a project config
//!
//! The factory is the only place that knows the full boot sequence:
//!
//! 1. load the bundles listed in `BUNDLES`, in order
//! 2. run each bundle's `before_init_app` callback
//! 3. collect hooks (built-in, registered on the factory, and contributed
//!    by bundles' `hooks` modules) and order them
//! 4. run every hook with the full bundle list
//! 5. run each bundle's `after_init_app` callback
//!
//! Any failure aborts the boot; nothing is rolled back.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use log::{debug, info};

use crate::{
    app::App,
    bundle::Bundle,
    config::ProjectConfig,
    env::Env,
    error::{Error, Result},
    graph::DependencyGraph,
    hooks::{AppFactoryHook, HookContext, HookFactory, builtin_hooks},
    module::ModuleLoader,
};

/// Sub-module bundles contribute hooks through
pub const HOOKS_MODULE: &str = "hooks";

pub struct AppFactory {
    loader: Arc<dyn ModuleLoader>,
    hooks: Vec<HookFactory>,
}

impl fmt::Debug for AppFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppFactory")
            .field("loader", &self.loader)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl AppFactory {
    pub fn new(loader: impl ModuleLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            hooks: builtin_hooks(),
        }
    }

    /// Add a hook to every app this factory boots
    #[must_use]
    pub fn with_hook<F, H>(mut self, build: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: AppFactoryHook + 'static,
    {
        self.hooks
            .push(Arc::new(move || Box::new(build()) as Box<dyn AppFactoryHook>));
        self
    }

    pub fn loader(&self) -> &dyn ModuleLoader {
        self.loader.as_ref()
    }

    /// Boot an application
    pub fn create_app(&self, project: &ProjectConfig, env: Env) -> Result<App> {
        info!("Booting app for {env} with {} bundle(s)", project.bundles.len());
        let bundles = self.load_bundles(project)?;

        let name = bundles
            .iter()
            .find(|b| b.is_app())
            .map_or("app", |b| b.name())
            .to_owned();
        let mut app = App::new(name, env);
        let app_bundle = bundles.iter().find(|b| b.is_app());
        let template_folder = project
            .template_folder
            .as_deref()
            .map(|p| project.resolve(p))
            .or_else(|| app_bundle.and_then(|b| b.template_folder()));
        let static_folder = project
            .static_folder
            .as_deref()
            .map(|p| project.resolve(p))
            .or_else(|| app_bundle.and_then(|b| b.static_folder()));
        app.set_folders(template_folder, static_folder, project.static_url_path.clone());
        app.set_bundles(bundles.clone());

        for bundle in &bundles {
            if let Some(callback) = bundle.before_init_app_callback() {
                debug!("Running before_init_app of {}", bundle.name());
                callback(&mut app).map_err(|source| Error::BundleCallback {
                    bundle: bundle.name().to_owned(),
                    stage: "before_init_app",
                    source,
                })?;
            }
        }

        let ctx = HookContext {
            loader: self.loader.as_ref(),
            project,
            env,
        };
        for mut hook in self.ordered_hooks(&bundles)? {
            debug!("Running hook {}", hook.name());
            hook.run_hook(&mut app, &bundles, &ctx)
                .map_err(|source| Error::Hook {
                    hook: hook.name().to_owned(),
                    source,
                })?;
        }

        for bundle in &bundles {
            if let Some(callback) = bundle.after_init_app_callback() {
                debug!("Running after_init_app of {}", bundle.name());
                callback(&mut app).map_err(|source| Error::BundleCallback {
                    bundle: bundle.name().to_owned(),
                    stage: "after_init_app",
                    source,
                })?;
            }
        }

        info!("Booted {}", app.name());
        Ok(app)
    }

    /// Load the bundles named in `BUNDLES`, checking names and the app bundle
    pub fn load_bundles(&self, project: &ProjectConfig) -> Result<Vec<Arc<Bundle>>> {
        let mut bundles: Vec<Arc<Bundle>> = Vec::with_capacity(project.bundles.len());
        let mut by_name: IndexMap<String, String> = IndexMap::new();
        for module_name in &project.bundles {
            let bundle = self.load_bundle(module_name)?;
            if let Some(first) = by_name.get(bundle.name()) {
                return Err(Error::DuplicateBundle {
                    name: bundle.name().to_owned(),
                    first: first.clone(),
                    second: module_name.clone(),
                });
            }
            by_name.insert(bundle.name().to_owned(), module_name.clone());
            debug!(
                "Loaded bundle {} from {module_name} ({})",
                bundle.name(),
                bundle
                    .self_and_ancestors()
                    .map(Bundle::module_name)
                    .collect::<Vec<_>>()
                    .join(" -> ")
            );
            bundles.push(bundle);
        }

        let mut app_bundles = bundles.iter().enumerate().filter(|(_, b)| b.is_app());
        if let Some((index, first)) = app_bundles.next() {
            if let Some((_, second)) = app_bundles.next() {
                return Err(Error::MultipleAppBundles {
                    first: first.module_name().to_owned(),
                    second: second.module_name().to_owned(),
                });
            }
            if index + 1 != bundles.len() {
                return Err(Error::AppBundleNotLast {
                    name: first.name().to_owned(),
                });
            }
        }
        Ok(bundles)
    }

    /// `module` itself, or else `module.bundle`
    fn load_bundle(&self, module_name: &str) -> Result<Arc<Bundle>> {
        for candidate in [module_name.to_owned(), format!("{module_name}.bundle")] {
            let module = self
                .loader
                .load(&candidate)
                .map_err(|source| Error::ModuleImport {
                    bundle: module_name.to_owned(),
                    module: candidate.clone(),
                    source,
                })?;
            if let Some(bundle) = module.as_ref().and_then(|m| m.bundle()) {
                return Ok(Arc::clone(bundle));
            }
        }
        Err(Error::BundleNotFound {
            module: module_name.to_owned(),
        })
    }

    /// Every hook for `bundles`, in execution order.
    ///
    /// A bundle hook replaces an earlier hook of the same name, keeping its
    /// position for tie-breaking.
    pub fn ordered_hooks(&self, bundles: &[Arc<Bundle>]) -> Result<Vec<Box<dyn AppFactoryHook>>> {
        let mut hooks: IndexMap<String, Box<dyn AppFactoryHook>> = IndexMap::new();
        for build in &self.hooks {
            let hook = build();
            hooks.insert(hook.name().to_owned(), hook);
        }
        for bundle in bundles {
            for level in bundle.ancestors_then_self() {
                let module_name = level.submodule(HOOKS_MODULE);
                let module = self
                    .loader
                    .load(&module_name)
                    .map_err(|source| Error::ModuleImport {
                        bundle: level.name().to_owned(),
                        module: module_name.clone(),
                        source,
                    })?;
                for build in module.iter().flat_map(|m| m.hooks()) {
                    let hook = build();
                    if hooks.contains_key(hook.name()) {
                        debug!("Hook {} overridden by {module_name}", hook.name());
                    }
                    hooks.insert(hook.name().to_owned(), hook);
                }
            }
        }

        let mut graph = DependencyGraph::new("hook");
        for name in hooks.keys() {
            graph.add_node(name);
        }
        for (name, hook) in &hooks {
            for dependency in hook.run_after() {
                graph.add_dependency(name, &dependency)?;
            }
            for dependent in hook.run_before() {
                graph.add_dependent(name, &dependent)?;
            }
        }

        let order = graph.topological_sort()?;
        debug!("Hook order: {}", order.join(", "));
        Ok(order
            .iter()
            .filter_map(|name| hooks.swap_remove(name))
            .collect())
    }
}
