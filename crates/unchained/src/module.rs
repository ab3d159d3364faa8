//! Bundle sub-modules and the loaders that find them
//!
//! Everything a bundle contributes lives in a named sub-module
//! (`<bundle>.config`, `<bundle>.commands`, ...). The boot pipeline never
//! discovers modules implicitly: it asks a [`ModuleLoader`] for each name
//! it needs, where `Ok(None)` means "absent, skip it" and an error means
//! the module exists but could not be imported.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context as _, anyhow, bail};
use indexmap::IndexMap;
use log::{debug, trace};
use serde::Deserialize;

use crate::{
    app::ExtensionDef,
    bundle::Bundle,
    cli::CommandEntry,
    config::ConfigClass,
    hooks::{AppFactoryHook, HookFactory},
    orm::ModelDef,
};

/// What one module contributes
#[derive(Default, Clone)]
pub struct Module {
    name: String,
    bundle: Option<Arc<Bundle>>,
    config_classes: IndexMap<String, ConfigClass>,
    extensions: Vec<ExtensionDef>,
    commands: Vec<CommandEntry>,
    models: Vec<ModelDef>,
    hooks: Vec<HookFactory>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: impl Into<Arc<Bundle>>) -> Self {
        self.bundle = Some(bundle.into());
        self
    }

    /// Add a config class; a later class with the same name replaces it
    #[must_use]
    pub fn with_config(mut self, class: ConfigClass) -> Self {
        self.config_classes.insert(class.name().to_owned(), class);
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: ExtensionDef) -> Self {
        self.extensions.push(extension);
        self
    }

    #[must_use]
    pub fn with_command(mut self, entry: impl Into<CommandEntry>) -> Self {
        self.commands.push(entry.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: ModelDef) -> Self {
        self.models.push(model);
        self
    }

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

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundle(&self) -> Option<&Arc<Bundle>> {
        self.bundle.as_ref()
    }

    pub fn config_class(&self, name: &str) -> Option<&ConfigClass> {
        self.config_classes.get(name)
    }

    pub fn config_classes(&self) -> impl Iterator<Item = &ConfigClass> {
        self.config_classes.values()
    }

    pub fn extensions(&self) -> &[ExtensionDef] {
        &self.extensions
    }

    pub fn commands(&self) -> &[CommandEntry] {
        &self.commands
    }

    pub fn models(&self) -> &[ModelDef] {
        &self.models
    }

    pub fn hooks(&self) -> &[HookFactory] {
        &self.hooks
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("bundle", &self.bundle)
            .field("config_classes", &self.config_classes.keys())
            .field("extensions", &self.extensions)
            .field("commands", &self.commands)
            .field("models", &self.models.len())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Resolves dotted module names
pub trait ModuleLoader: fmt::Debug {
    /// `Ok(None)` when no such module exists
    fn load(&self, name: &str) -> anyhow::Result<Option<Arc<Module>>>;
}

impl<L: ModuleLoader + ?Sized> ModuleLoader for &L {
    fn load(&self, name: &str) -> anyhow::Result<Option<Arc<Module>>> {
        (**self).load(name)
    }
}

impl<L: ModuleLoader + ?Sized> ModuleLoader for Arc<L> {
    fn load(&self, name: &str) -> anyhow::Result<Option<Arc<Module>>> {
        (**self).load(name)
    }
}

#[derive(Debug, Clone)]
enum CatalogEntry {
    Module(Arc<Module>),
    /// Loading fails with this message
    Broken(String),
}

/// Modules registered up front
#[derive(Debug, Clone, Default)]
pub struct ModuleCatalog {
    modules: IndexMap<String, CatalogEntry>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its own name, replacing any earlier one
    pub fn register(&mut self, module: Module) -> &mut Self {
        self.modules
            .insert(module.name.clone(), CatalogEntry::Module(Arc::new(module)));
        self
    }

    /// Register `<module_name>` as the module defining `bundle`
    pub fn register_bundle(&mut self, bundle: Bundle) -> &mut Self {
        let name = bundle.module_name().to_owned();
        self.register(Module::new(name).with_bundle(bundle))
    }

    /// Register a module whose import fails
    pub fn register_broken(&mut self, name: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.modules
            .insert(name.into(), CatalogEntry::Broken(message.into()));
        self
    }

    #[must_use]
    pub fn with(mut self, module: Module) -> Self {
        self.register(module);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

impl ModuleLoader for ModuleCatalog {
    fn load(&self, name: &str) -> anyhow::Result<Option<Arc<Module>>> {
        match self.modules.get(name) {
            Some(CatalogEntry::Module(module)) => Ok(Some(Arc::clone(module))),
            Some(CatalogEntry::Broken(message)) => Err(anyhow!("{message}")),
            None => Ok(None),
        }
    }
}

/// `bundle.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BundleManifest {
    name: Option<String>,
    extends: Option<String>,
    #[serde(default)]
    app: bool,
    command_group_names: Option<Vec<String>>,
}

/// Loads declarative bundles from a project directory.
///
/// `a.b` is a bundle when `<root>/a/b/bundle.toml` exists, and `a.b.config`
/// is read from `<root>/a/b/config.toml`, whose top-level tables are the
/// config classes:
///
/// ```toml
/// [Config]
/// SECRET_KEY = "not-so-secret"
///
/// [DevConfig]
/// DEBUG = true
/// ```
///
/// Modules carrying code (commands, models, hooks) have no file form and
/// always load as absent.
#[derive(Debug, Clone)]
pub struct FsModuleLoader {
    root: PathBuf,
}

impl FsModuleLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_of(&self, name: &str) -> PathBuf {
        name.split('.').fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn load_bundle(&self, name: &str, stack: &mut Vec<String>) -> anyhow::Result<Option<Bundle>> {
        let dir = self.dir_of(name);
        let manifest_path = dir.join("bundle.toml");
        if !manifest_path.is_file() {
            return Ok(None);
        }
        if stack.iter().any(|seen| seen == name) {
            stack.push(name.to_owned());
            bail!("bundle inheritance cycle: {}", stack.join(" -> "));
        }
        stack.push(name.to_owned());

        let text = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let manifest: BundleManifest = toml::from_str(&text)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;
        trace!("Loaded bundle manifest {}: {manifest:?}", manifest_path.display());

        let mut bundle = Bundle::new(name).with_root_folder(dir);
        if let Some(parent) = &manifest.extends {
            let parent = self
                .load_bundle(parent, stack)?
                .ok_or_else(|| anyhow!("{name} extends {parent:?}, which is not a bundle"))?;
            bundle = bundle.extends(Arc::new(parent));
        }
        if let Some(bundle_name) = manifest.name {
            bundle = bundle.named(bundle_name);
        }
        if manifest.app {
            bundle = bundle.as_app();
        }
        if let Some(groups) = manifest.command_group_names {
            bundle = bundle.with_command_group_names(groups);
        }
        stack.pop();
        Ok(Some(bundle))
    }

    fn load_config(&self, name: &str) -> anyhow::Result<Option<Module>> {
        let Some(parent) = name.strip_suffix(".config") else {
            return Ok(None);
        };
        let path = self.dir_of(parent).join("config.toml");
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let table: toml::Table =
            toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;

        let mut module = Module::new(name);
        for (class_name, value) in table {
            let toml::Value::Table(entries) = value else {
                bail!(
                    "{}: top-level key {class_name:?} is not a config class table",
                    path.display()
                );
            };
            let class = ConfigClass::from_table(class_name.clone(), entries)
                .with_context(|| format!("{}: invalid value in [{class_name}]", path.display()))?;
            module = module.with_config(class);
        }
        debug!(
            "Loaded {} config classes from {}",
            module.config_classes.len(),
            path.display()
        );
        Ok(Some(module))
    }
}

impl ModuleLoader for FsModuleLoader {
    fn load(&self, name: &str) -> anyhow::Result<Option<Arc<Module>>> {
        if let Some(config) = self.load_config(name)? {
            return Ok(Some(Arc::new(config)));
        }
        let bundle = self.load_bundle(name, &mut Vec::new())?;
        Ok(bundle.map(|bundle| Arc::new(Module::new(name).with_bundle(bundle))))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_catalog() {
        let mut catalog = ModuleCatalog::new();
        catalog
            .register_bundle(Bundle::new("vendor"))
            .register(Module::new("vendor.config").with_config(ConfigClass::new("Config")))
            .register_broken("vendor.commands", "syntax error");

        let bundle_module = catalog.load("vendor").unwrap().unwrap();
        assert_eq!(bundle_module.bundle().unwrap().name(), "vendor");
        assert!(catalog.load("vendor.config").unwrap().unwrap().config_class("Config").is_some());
        assert!(catalog.load("vendor.models").unwrap().is_none());
        assert_eq!(
            catalog.load("vendor.commands").unwrap_err().to_string(),
            "syntax error"
        );
    }

    #[test]
    fn test_fs_bundles_and_config() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "vendor/bundle.toml", "command_group_names = ['vendor', 'db']\n");
        write(
            dir.path(),
            "app/bundles/vendor/bundle.toml",
            "extends = 'vendor'\n",
        );
        write(dir.path(), "app/bundle.toml", "name = 'shop'\napp = true\n");
        write(
            dir.path(),
            "vendor/config.toml",
            "[Config]\nVENDOR_KEY = 'vendor'\n\n[TestConfig]\nTESTING = true\n",
        );

        let loader = FsModuleLoader::new(dir.path());
        let module = loader.load("app.bundles.vendor").unwrap().unwrap();
        let bundle = module.bundle().unwrap();
        assert_eq!(bundle.name(), "vendor");
        assert_eq!(bundle.command_group_names(), ["vendor", "db"]);
        assert_eq!(bundle.root_folder(), dir.path().join("app/bundles/vendor"));
        assert!(bundle.extends_module("vendor"));

        let app = loader.load("app").unwrap().unwrap();
        assert!(app.bundle().unwrap().is_app());
        assert_eq!(app.bundle().unwrap().name(), "shop");

        let config = loader.load("vendor.config").unwrap().unwrap();
        let names: Vec<_> = config.config_classes().map(ConfigClass::name).collect();
        assert_eq!(names, ["Config", "TestConfig"]);
        let mut merged = crate::config::AppConfig::new();
        merged
            .merge_class("vendor.config", config.config_class("Config").unwrap())
            .unwrap();
        assert_eq!(merged.get("VENDOR_KEY"), Some(&json!("vendor")));

        assert!(loader.load("missing").unwrap().is_none());
        assert!(loader.load("app.config").unwrap().is_none());
        assert!(loader.load("app.commands").unwrap().is_none());
    }

    #[test]
    fn test_fs_config_keeps_declaration_order() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "shop/config.toml",
            "[ProdConfig]\nZEBRA = 3\n\n[Config]\nZEBRA = 1\nALPHA = 2\n",
        );

        let loader = FsModuleLoader::new(dir.path());
        let config = loader.load("shop.config").unwrap().unwrap();
        let names: Vec<_> = config.config_classes().map(ConfigClass::name).collect();
        assert_eq!(names, ["ProdConfig", "Config"]);

        let mut merged = crate::config::AppConfig::new();
        merged
            .merge_class("shop.config", config.config_class("Config").unwrap())
            .unwrap();
        let keys: Vec<_> = merged.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["ZEBRA", "ALPHA"]);
        assert_eq!(merged.to_toml_string().unwrap(), "ZEBRA = 1\nALPHA = 2\n");
    }

    #[test]
    fn test_fs_errors() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/bundle.toml", "extends = 'b'\n");
        write(dir.path(), "b/bundle.toml", "extends = 'a'\n");
        write(dir.path(), "c/bundle.toml", "extends = 'nowhere'\n");
        write(dir.path(), "d/bundle.toml", "colour = 'red'\n");
        write(dir.path(), "e/config.toml", "DEBUG = true\n");

        let loader = FsModuleLoader::new(dir.path());
        let err = loader.load("a").unwrap_err();
        assert_eq!(err.to_string(), "bundle inheritance cycle: a -> b -> a");
        assert!(loader.load("c").unwrap_err().to_string().contains("not a bundle"));
        assert!(loader.load("d").is_err());
        assert!(
            loader
                .load("e.config")
                .unwrap_err()
                .to_string()
                .contains("not a config class table")
        );
    }
}
