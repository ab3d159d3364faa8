use std::sync::Arc;

use log::{debug, info, warn};

use super::{AppFactoryHook, HookContext, import_bundle_modules};
use crate::{
    app::App,
    bundle::Bundle,
    env::{self, Env},
    error::Result,
};

/// Base config class merged for every environment
pub const BASE_CONFIG_CLASS: &str = "Config";

/// Builds the app config from every bundle's `config` module.
///
/// Order: framework defaults, the app bundle (early, so vendor bundles can
/// compute values from app knobs), each bundle in boot order with its
/// hierarchy root-first (`Config`, then the env class), and finally the
/// project's `_CONFIG_OVERRIDES`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigureAppHook;

impl ConfigureAppHook {
    fn apply_defaults(app: &mut App, env: Env) {
        let debug = env::debug_from_environment().unwrap_or_else(|| env.default_debug());
        let config = app.config_mut();
        config.insert("ENV", env.as_str());
        config.insert("DEBUG", debug);
        if env == Env::Test {
            config.insert("TESTING", true);
        }
    }

    fn merge_bundle(&self, app: &mut App, bundle: &Bundle, ctx: &HookContext<'_>) -> Result<()> {
        let env_class = ctx.env.config_class_name();
        for module in import_bundle_modules(self, bundle, ctx.loader)? {
            for class in module.config_classes() {
                if class.name() != BASE_CONFIG_CLASS
                    && !Env::ALL.iter().any(|e| e.config_class_name() == class.name())
                {
                    warn!(
                        "Ignoring config class {} in {}: expected {BASE_CONFIG_CLASS} or an \
                         env-specific class",
                        class.name(),
                        module.name()
                    );
                }
            }
            for name in [BASE_CONFIG_CLASS, env_class] {
                if let Some(class) = module.config_class(name) {
                    app.config_mut().merge_class(module.name(), class)?;
                }
            }
        }
        Ok(())
    }
}

impl AppFactoryHook for ConfigureAppHook {
    fn name(&self) -> &str {
        "configure_app"
    }

    fn bundle_module_names(&self) -> Vec<String> {
        vec!["config".to_owned()]
    }

    fn require_exactly_one_bundle_module(&self) -> bool {
        true
    }

    fn run_hook(
        &mut self,
        app: &mut App,
        bundles: &[Arc<Bundle>],
        ctx: &HookContext<'_>,
    ) -> anyhow::Result<()> {
        Self::apply_defaults(app, ctx.env);

        if let Some(app_bundle) = bundles.iter().find(|b| b.is_app()) {
            debug!("Pre-merging config of app bundle {}", app_bundle.name());
            self.merge_bundle(app, app_bundle, ctx)?;
        }
        for bundle in bundles {
            self.merge_bundle(app, bundle, ctx)?;
        }

        if !ctx.project.config_overrides.is_empty() {
            debug!(
                "Applying {} config override(s)",
                ctx.project.config_overrides.len()
            );
            app.config_mut()
                .merge_values(&ctx.project.config_overrides);
        }
        info!(
            "Configured {} for {} with {} keys",
            app.name(),
            ctx.env,
            app.config().len()
        );
        Ok(())
    }
}
