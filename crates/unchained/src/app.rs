//! The application object the factory boots
//!
//! After boot the app exclusively owns its merged configuration, its
//! initialized extensions, the command table and the model registry.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;

use crate::{bundle::Bundle, cli::CommandTable, config::AppConfig, env::Env, orm::ModelRegistry};

/// A service wired into the app during boot
pub trait Extension: fmt::Debug + Send + Sync {
    /// Bind to `app`; may read config and register commands
    fn init_app(&mut self, app: &mut App) -> anyhow::Result<()>;
}

/// Builds a fresh extension instance for each boot
pub type ExtensionBuilder = Arc<dyn Fn() -> Box<dyn Extension> + Send + Sync>;

/// An extension as contributed by a bundle's `extensions` module
#[derive(Clone)]
pub struct ExtensionDef {
    name: String,
    dependencies: Vec<String>,
    build: ExtensionBuilder,
}

impl ExtensionDef {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Box<dyn Extension> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            build: Arc::new(build),
        }
    }

    /// Extensions that must be initialized before this one
    #[must_use]
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn build(&self) -> Box<dyn Extension> {
        (self.build)()
    }
}

impl fmt::Debug for ExtensionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDef")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct App {
    name: String,
    env: Env,
    config: AppConfig,
    template_folder: Option<PathBuf>,
    static_folder: Option<PathBuf>,
    static_url_path: Option<String>,
    bundles: Vec<Arc<Bundle>>,
    extensions: IndexMap<String, Box<dyn Extension>>,
    models: ModelRegistry,
    cli: CommandTable,
}

impl App {
    pub fn new(name: impl Into<String>, env: Env) -> Self {
        Self {
            name: name.into(),
            env,
            config: AppConfig::new(),
            template_folder: None,
            static_folder: None,
            static_url_path: None,
            bundles: Vec::new(),
            extensions: IndexMap::new(),
            models: ModelRegistry::new(),
            cli: CommandTable::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> Env {
        self.env
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    pub fn debug(&self) -> bool {
        self.config.get_bool("DEBUG").unwrap_or(false)
    }

    pub fn template_folder(&self) -> Option<&Path> {
        self.template_folder.as_deref()
    }

    pub fn static_folder(&self) -> Option<&Path> {
        self.static_folder.as_deref()
    }

    pub fn static_url_path(&self) -> Option<&str> {
        self.static_url_path.as_deref()
    }

    pub(crate) fn set_folders(
        &mut self,
        template_folder: Option<PathBuf>,
        static_folder: Option<PathBuf>,
        static_url_path: Option<String>,
    ) {
        self.template_folder = template_folder;
        self.static_folder = static_folder;
        self.static_url_path = static_url_path;
    }

    /// Bundles in boot order, the app bundle last
    pub fn bundles(&self) -> &[Arc<Bundle>] {
        &self.bundles
    }

    pub(crate) fn set_bundles(&mut self, bundles: Vec<Arc<Bundle>>) {
        self.bundles = bundles;
    }

    pub fn bundle(&self, name: &str) -> Option<&Arc<Bundle>> {
        self.bundles.iter().find(|b| b.name() == name)
    }

    pub fn extension(&self, name: &str) -> Option<&dyn Extension> {
        self.extensions.get(name).map(|ext| &**ext)
    }

    /// Names of the initialized extensions, in initialization order
    pub fn extension_names(&self) -> impl Iterator<Item = &str> {
        self.extensions.keys().map(String::as_str)
    }

    pub(crate) fn insert_extension(&mut self, name: String, extension: Box<dyn Extension>) {
        self.extensions.insert(name, extension);
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelRegistry {
        &mut self.models
    }

    pub fn cli(&self) -> &CommandTable {
        &self.cli
    }

    pub fn cli_mut(&mut self) -> &mut CommandTable {
        &mut self.cli
    }

    /// Run a command from the app's command table
    pub fn run_command(&self, args: &[String]) -> crate::Result<()> {
        self.cli.invoke(self, args)
    }
}
