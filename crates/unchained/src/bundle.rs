//! Bundles: the unit of composition
//!
//! A bundle is a named package contributing config, extensions, commands,
//! models and hooks to an application. Bundles form hierarchies: a bundle
//! may extend another one to override parts of it, and every tool that
//! looks at "the bundle" walks that hierarchy, either leaf-first
//! ([`Bundle::self_and_ancestors`]) or root-first
//! ([`Bundle::ancestors_then_self`]).

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::app::App;

/// Lifecycle callback run by the app factory around hook execution
pub type BundleCallback = Arc<dyn Fn(&mut App) -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Bundle {
    name: String,
    /// Set when the name came from the caller rather than the module path
    explicit_name: bool,
    module_name: String,
    root_folder: PathBuf,
    parent: Option<Arc<Self>>,
    is_app: bool,
    command_group_names: Option<Vec<String>>,
    before_init_app: Option<BundleCallback>,
    after_init_app: Option<BundleCallback>,
}

impl Bundle {
    /// A bundle defined by the module at `module_name` (e.g. `"shop.bundles.mail"`)
    pub fn new(module_name: impl Into<String>) -> Self {
        let module_name = module_name.into();
        Self {
            name: default_bundle_name(&module_name),
            explicit_name: false,
            root_folder: PathBuf::from(module_name.replace('.', "/")),
            module_name,
            parent: None,
            is_app: false,
            command_group_names: None,
            before_init_app: None,
            after_init_app: None,
        }
    }

    /// The user's top-level app bundle
    pub fn app(module_name: impl Into<String>) -> Self {
        Self::new(module_name).as_app()
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self.explicit_name = true;
        self
    }

    #[must_use]
    pub fn as_app(mut self) -> Self {
        self.is_app = true;
        self
    }

    /// Make this bundle extend `parent`, taking over its name unless one was set
    #[must_use]
    pub fn extends(mut self, parent: Arc<Self>) -> Self {
        if !self.explicit_name {
            self.name = parent.name.clone();
        }
        self.parent = Some(parent);
        self
    }

    #[must_use]
    pub fn with_root_folder(mut self, root: impl Into<PathBuf>) -> Self {
        self.root_folder = root.into();
        self
    }

    #[must_use]
    pub fn with_command_group_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command_group_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn before_init_app<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut App) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_init_app = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn after_init_app<F>(mut self, callback: F) -> Self
    where
        F: Fn(&mut App) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after_init_app = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module path prefix under which this bundle's sub-modules live
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    pub fn is_app(&self) -> bool {
        self.is_app
    }

    /// Command groups this bundle contributes; defaults to one group named
    /// after the bundle. Inherited from the parent when not set.
    pub fn command_group_names(&self) -> Vec<String> {
        self.self_and_ancestors()
            .find_map(|b| b.command_group_names.clone())
            .unwrap_or_else(|| vec![self.name.clone()])
    }

    /// Callback run before any hook, inherited from the parent when not set
    pub fn before_init_app_callback(&self) -> Option<&BundleCallback> {
        self.self_and_ancestors()
            .find_map(|b| b.before_init_app.as_ref())
    }

    /// Callback run after all hooks, inherited from the parent when not set
    pub fn after_init_app_callback(&self) -> Option<&BundleCallback> {
        self.self_and_ancestors()
            .find_map(|b| b.after_init_app.as_ref())
    }

    /// Fully qualified name of a sub-module of this bundle level
    pub fn submodule(&self, name: &str) -> String {
        format!("{}.{name}", self.module_name)
    }

    /// `<root>/templates`, if that directory exists
    pub fn template_folder(&self) -> Option<PathBuf> {
        let folder = self.root_folder.join("templates");
        folder.is_dir().then_some(folder)
    }

    /// `<root>/static`, if that directory exists
    pub fn static_folder(&self) -> Option<PathBuf> {
        let folder = self.root_folder.join("static");
        folder.is_dir().then_some(folder)
    }

    /// This bundle, then each bundle it extends (leaf-first)
    pub fn self_and_ancestors(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |bundle| bundle.parent.as_deref())
    }

    /// The bundles this one extends from the root down, then this bundle
    pub fn ancestors_then_self(&self) -> Vec<&Self> {
        let mut levels: Vec<_> = self.self_and_ancestors().collect();
        levels.reverse();
        levels
    }

    /// Whether a bundle defined by `module_name` is one of this bundle's ancestors
    pub fn extends_module(&self, module_name: &str) -> bool {
        self.self_and_ancestors()
            .skip(1)
            .any(|b| b.module_name == module_name)
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name)
            .field("module_name", &self.module_name)
            .field("root_folder", &self.root_folder)
            .field("parent", &self.parent.as_ref().map(|p| p.module_name()))
            .field("is_app", &self.is_app)
            .field("command_group_names", &self.command_group_names)
            .finish_non_exhaustive()
    }
}

/// Default bundle name: the last module segment, minus a `_bundle` suffix.
///
/// `"shop.bundles.mail_bundle"` and `"shop.bundles.mail.bundle"` both name a
/// bundle `"mail"`.
pub fn default_bundle_name(module_name: &str) -> String {
    let mut segments = module_name.rsplit('.');
    let mut last = segments.next().unwrap_or(module_name);
    if last == "bundle"
        && let Some(previous) = segments.next()
    {
        last = previous;
    }
    last.strip_suffix("_bundle")
        .filter(|s| !s.is_empty())
        .unwrap_or(last)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(default_bundle_name("vendor"), "vendor");
        assert_eq!(default_bundle_name("shop.bundles.mail_bundle"), "mail");
        assert_eq!(default_bundle_name("shop.bundles.mail.bundle"), "mail");
        assert_eq!(default_bundle_name("_bundle"), "_bundle");
    }

    #[test]
    fn test_hierarchy_walkers() {
        let base = Arc::new(Bundle::new("security"));
        let middle = Arc::new(Bundle::new("acme.security").extends(base));
        let leaf = Bundle::new("app.bundles.security").extends(middle);

        let leaf_first: Vec<_> = leaf.self_and_ancestors().map(Bundle::module_name).collect();
        assert_eq!(
            leaf_first,
            ["app.bundles.security", "acme.security", "security"]
        );

        let root_first: Vec<_> = leaf
            .ancestors_then_self()
            .into_iter()
            .map(Bundle::module_name)
            .collect();
        assert_eq!(
            root_first,
            ["security", "acme.security", "app.bundles.security"]
        );

        // the name is inherited through the whole hierarchy
        assert_eq!(leaf.name(), "security");
        assert!(leaf.extends_module("security"));
        assert!(!leaf.extends_module("app.bundles.security"));
    }

    #[test]
    fn test_explicit_name_survives_extends() {
        let base = Arc::new(Bundle::new("security"));
        let leaf = Bundle::new("app.auth").named("auth").extends(base);
        assert_eq!(leaf.name(), "auth");
    }

    #[test]
    fn test_command_group_names_default_and_inherit() {
        let base = Arc::new(Bundle::new("db").with_command_group_names(["db", "migrations"]));
        assert_eq!(Bundle::new("mail").command_group_names(), ["mail"]);
        let leaf = Bundle::new("app.db").extends(base);
        assert_eq!(leaf.command_group_names(), ["db", "migrations"]);
    }

    #[test]
    fn test_submodule_and_root() {
        let bundle = Bundle::new("shop.bundles.mail");
        assert_eq!(bundle.submodule("config"), "shop.bundles.mail.config");
        assert_eq!(bundle.root_folder(), Path::new("shop/bundles/mail"));
    }
}
