//! Project configuration and the merged application config
//!
//! Two kinds of configuration live here:
//!
//! - [`ProjectConfig`] is the declarative boot input read from
//!   `unchained.toml`: the ordered `BUNDLES` list, folder overrides and a
//!   final `_CONFIG_OVERRIDES` table.
//! - [`AppConfig`] is the mapping the configure-app hook produces by merging
//!   every bundle's [`ConfigClass`]es in order. Values are
//!   [`serde_json::Value`]s and keep their first-insertion order.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// File name looked up when discovering the project config
pub const PROJECT_CONFIG_FILE: &str = "unchained.toml";

/// Environment variable pointing at an explicit project config file
pub const CONFIG_PATH_VAR: &str = "UNCHAINED_CONFIG";

/// Boot input: which bundles make up the application and how to lay it out
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectConfig {
    /// Directory the config was loaded from; relative paths resolve against it
    pub root: PathBuf,
    /// Dotted module paths of the bundles, in boot order (app bundle last)
    pub bundles: Vec<String>,
    pub template_folder: Option<PathBuf>,
    pub static_folder: Option<PathBuf>,
    pub static_url_path: Option<String>,
    /// Applied after every bundle's config
    pub config_overrides: IndexMap<String, Value>,
}

/// On-disk shape of `unchained.toml`
#[derive(Debug, Deserialize)]
struct RawProjectConfig {
    #[serde(rename = "BUNDLES")]
    bundles: Option<Vec<String>>,
    #[serde(rename = "TEMPLATE_FOLDER")]
    template_folder: Option<PathBuf>,
    #[serde(rename = "STATIC_FOLDER")]
    static_folder: Option<PathBuf>,
    #[serde(rename = "STATIC_URL_PATH")]
    static_url_path: Option<String>,
    #[serde(rename = "_CONFIG_OVERRIDES", default)]
    config_overrides: IndexMap<String, Value>,
}

impl ProjectConfig {
    /// Project config for the given bundles, rooted at the working directory
    pub fn new<I, S>(bundles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            root: PathBuf::from("."),
            bundles: bundles.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Add an entry to `_CONFIG_OVERRIDES`
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config_overrides.insert(key.into(), value.into());
        self
    }

    /// Load a project config file
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(path, &text)
    }

    /// Parse project config text; `path` is used for errors and as the root
    pub fn from_toml_str(path: &Path, text: &str) -> Result<Self> {
        let raw: RawProjectConfig = toml::from_str(text).map_err(|source| Error::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        let bundles = raw.bundles.ok_or_else(|| Error::ProjectConfig {
            path: path.to_path_buf(),
            message: "missing required BUNDLES list".to_owned(),
        })?;
        if let Some(blank) = bundles.iter().position(|b| b.trim().is_empty()) {
            return Err(Error::ProjectConfig {
                path: path.to_path_buf(),
                message: format!("BUNDLES entry {blank} is empty"),
            });
        }

        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        debug!(
            "Loaded project config {} with {} bundles",
            path.display(),
            bundles.len()
        );

        Ok(Self {
            root,
            bundles,
            template_folder: raw.template_folder,
            static_folder: raw.static_folder,
            static_url_path: raw.static_url_path,
            config_overrides: raw.config_overrides,
        })
    }

    /// Locate and load the project config.
    ///
    /// `UNCHAINED_CONFIG` wins when set; otherwise `unchained.toml` is looked
    /// up in `start` and each of its ancestors.
    pub fn discover(start: &Path) -> Result<Self> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_VAR)
            && !explicit.trim().is_empty()
        {
            return Self::from_path(Path::new(&explicit));
        }

        for dir in start.ancestors() {
            let candidate = dir.join(PROJECT_CONFIG_FILE);
            if candidate.is_file() {
                return Self::from_path(&candidate);
            }
        }

        Err(Error::ProjectConfig {
            path: start.join(PROJECT_CONFIG_FILE),
            message: format!(
                "no {PROJECT_CONFIG_FILE} found here or in any parent directory (set \
                 {CONFIG_PATH_VAR} to point at one)"
            ),
        })
    }

    /// Resolve a possibly relative path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Whether an attribute name takes part in config merging.
///
/// Only uppercase names count (`SECRET_KEY`, `_CONFIG_OVERRIDES`); lowercase
/// helpers defined next to them are ignored.
pub fn is_config_key(key: &str) -> bool {
    key.chars().any(|c| c.is_ascii_uppercase())
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Computes a config value from the configuration merged so far
pub type ComputeFn = Arc<dyn Fn(&AppConfig) -> anyhow::Result<Value> + Send + Sync>;

/// One attribute of a config class
#[derive(Clone)]
pub enum ConfigEntry {
    Value(Value),
    /// Evaluated at merge time against the app config built so far, so a
    /// vendor bundle can derive its defaults from knobs the app set earlier
    Computed(ComputeFn),
}

impl fmt::Debug for ConfigEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// A named set of config attributes (`Config`, `DevConfig`, ...)
#[derive(Debug, Clone)]
pub struct ConfigClass {
    name: String,
    entries: IndexMap<String, ConfigEntry>,
}

impl ConfigClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: IndexMap::new(),
        }
    }

    /// Build a class from a parsed TOML table
    pub fn from_table(name: impl Into<String>, table: toml::Table) -> Result<Self, serde_json::Error> {
        let mut class = Self::new(name);
        for (key, value) in table {
            class
                .entries
                .insert(key, ConfigEntry::Value(serde_json::to_value(value)?));
        }
        Ok(class)
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(key.into(), ConfigEntry::Value(value.into()));
        self
    }

    #[must_use]
    pub fn computed<F>(mut self, key: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&AppConfig) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .insert(key.into(), ConfigEntry::Computed(Arc::new(compute)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &ConfigEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The application's merged configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AppConfig {
    values: IndexMap<String, Value>,
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Set a value; an existing key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge a config class on top of the current values (last writer wins).
    ///
    /// Computed entries see everything merged before them, including earlier
    /// entries of the same class. Returns the number of keys written.
    pub fn merge_class(&mut self, module: &str, class: &ConfigClass) -> Result<usize> {
        let mut written = 0;
        for (key, entry) in class.entries() {
            if !is_config_key(key) {
                trace!("Skipping non-config attribute {key} in {}", class.name());
                continue;
            }
            let value = match entry {
                ConfigEntry::Value(value) => value.clone(),
                ConfigEntry::Computed(compute) => {
                    compute(self).map_err(|source| Error::ConfigValue {
                        module: module.to_owned(),
                        class: class.name().to_owned(),
                        key: key.to_owned(),
                        source,
                    })?
                }
            };
            self.values.insert(key.to_owned(), value);
            written += 1;
        }
        debug!("Merged {written} keys from {module}.{}", class.name());
        Ok(written)
    }

    /// Merge plain key/value pairs (used for `_CONFIG_OVERRIDES`)
    pub fn merge_values<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        for (key, value) in values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Render as TOML. Null values have no TOML spelling and are left out.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        let mut table = toml::Table::new();
        for (key, value) in &self.values {
            if value.is_null() {
                continue;
            }
            table.insert(key.clone(), toml::Value::try_from(value)?);
        }
        toml::to_string(&table)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_project_config_from_toml() {
        let text = r#"
BUNDLES = ["vendor", "app"]
STATIC_URL_PATH = "/assets"

[_CONFIG_OVERRIDES]
SECRET_KEY = "override"
"#;
        let config = ProjectConfig::from_toml_str(Path::new("proj/unchained.toml"), text).unwrap();
        assert_eq!(config.bundles, ["vendor", "app"]);
        assert_eq!(config.static_url_path.as_deref(), Some("/assets"));
        assert_eq!(config.root, PathBuf::from("proj"));
        assert_eq!(config.config_overrides["SECRET_KEY"], json!("override"));
    }

    #[test]
    fn test_project_config_requires_bundles() {
        let err = ProjectConfig::from_toml_str(Path::new("unchained.toml"), "STATIC_FOLDER = 'x'")
            .unwrap_err();
        assert!(err.to_string().contains("missing required BUNDLES"), "{err}");
    }

    #[test]
    fn test_config_keys() {
        assert!(is_config_key("SECRET_KEY"));
        assert!(is_config_key("_CONFIG_OVERRIDES"));
        assert!(is_config_key("OAUTH2"));
        assert!(!is_config_key("helper"));
        assert!(!is_config_key("Mixed_Case"));
        assert!(!is_config_key("__"));
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut config = AppConfig::new();
        let base = ConfigClass::new("Config")
            .set("KEY", "base")
            .set("OTHER", 1)
            .set("lowercase", true);
        let dev = ConfigClass::new("DevConfig").set("KEY", "dev");

        assert_eq!(config.merge_class("vendor.config", &base).unwrap(), 2);
        config.merge_class("vendor.config", &dev).unwrap();

        assert_eq!(config.get_str("KEY"), Some("dev"));
        assert_eq!(config.get("OTHER"), Some(&json!(1)));
        assert!(!config.contains_key("lowercase"));
        // overwritten keys keep their original position
        let keys: Vec<_> = config.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["KEY", "OTHER"]);
    }

    #[test]
    fn test_computed_entries_read_merged_values() {
        let mut config = AppConfig::new();
        config.insert("APP_NAME", "shop");
        let class = ConfigClass::new("Config").computed("MAIL_SUBJECT_PREFIX", |cfg| {
            let name = cfg.get_str("APP_NAME").unwrap_or("app");
            Ok(json!(format!("[{name}] ")))
        });
        config.merge_class("mail.config", &class).unwrap();
        assert_eq!(config.get_str("MAIL_SUBJECT_PREFIX"), Some("[shop] "));
    }

    #[test]
    fn test_computed_entry_errors_name_their_source() {
        let mut config = AppConfig::new();
        let class =
            ConfigClass::new("Config").computed("BROKEN", |_| Err(anyhow::anyhow!("no db url")));
        let err = config.merge_class("db.config", &class).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"failed to compute config key BROKEN in Config of "db.config": no db url"#
        );
    }

    #[test]
    fn test_to_toml_skips_nulls() {
        let mut config = AppConfig::new();
        config.insert("DEBUG", true);
        config.insert("NOTHING", Value::Null);
        let text = config.to_toml_string().unwrap();
        assert_eq!(text.trim(), "DEBUG = true");
    }
}
