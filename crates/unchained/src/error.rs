//! Error types for the unchained framework
//!
//! Every failure raised while booting an application is reported through
//! [`Error`]. The variants follow the framework's failure taxonomy:
//! configuration, bundle loading, pipeline ordering, model registry,
//! template preprocessing and command dispatch. Messages always name the
//! offending bundle, hook, model or file so a failed boot can be traced
//! back to its source without a debugger.

use std::path::PathBuf;

use crate::template::TemplateError;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // -- configuration -----------------------------------------------------
    #[error("project config {}: {message}", path.display())]
    ProjectConfig { path: PathBuf, message: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(
        "invalid environment {value:?}: expected one of development (dev), production (prod), \
         staging, test"
    )]
    InvalidEnv { value: String },

    #[error("failed to compute config key {key} in {class} of {module:?}: {source}")]
    ConfigValue {
        module: String,
        class: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown Meta option(s) {} on {model}", names.join(", "))]
    UnknownMetaOptions { model: String, names: Vec<String> },

    #[error("invalid value for Meta option `{option}` on {model}: {reason}")]
    InvalidMetaOption {
        model: String,
        option: String,
        reason: String,
    },

    #[error("the first meta option must be `abstract`, found `{found}`")]
    AbstractOptionNotFirst { found: String },

    // -- bundles -----------------------------------------------------------
    #[error("unable to find a bundle in module {module:?} (also tried {module}.bundle)")]
    BundleNotFound { module: String },

    #[error("bundle name {name:?} is used by both {first:?} and {second:?}")]
    DuplicateBundle {
        name: String,
        first: String,
        second: String,
    },

    #[error("only one app bundle is allowed, found {first:?} and {second:?}")]
    MultipleAppBundles { first: String, second: String },

    #[error("the app bundle {name:?} must be the last entry in BUNDLES")]
    AppBundleNotLast { name: String },

    #[error("bundle {bundle:?} {stage} callback failed: {source}")]
    BundleCallback {
        bundle: String,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    // -- pipeline ----------------------------------------------------------
    #[error("{kind} dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle { kind: &'static str, path: Vec<String> },

    #[error("{kind} {name:?} must run after unknown {kind} {dependency:?}")]
    UnknownDependency {
        kind: &'static str,
        name: String,
        dependency: String,
    },

    #[error("{kind} {name:?} must run before unknown {kind} {dependent:?}")]
    UnknownDependent {
        kind: &'static str,
        name: String,
        dependent: String,
    },

    #[error(
        "bundle {bundle:?} defines more than one module for hook {hook:?} where exactly one is \
         required: {}",
        modules.join(", ")
    )]
    MultipleBundleModules {
        bundle: String,
        hook: String,
        modules: Vec<String>,
    },

    #[error("failed to import module {module:?} of bundle {bundle:?}: {source}")]
    ModuleImport {
        bundle: String,
        module: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("hook {hook:?} failed: {source}")]
    Hook {
        hook: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("extension {name:?} failed to initialize: {source}")]
    Extension {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    // -- model registry ----------------------------------------------------
    #[error(
        "incomplete relationship: {model} expects {related}.{attr} to exist, but {related} does \
         not declare it"
    )]
    IncompleteRelationship {
        model: String,
        related: String,
        attr: String,
    },

    #[error("{model} declares a relationship with {related}, but no model named {related} was registered")]
    UnknownRelatedModel { model: String, related: String },

    #[error("{model} inherits from more than one base model class: {}", candidates.join(", "))]
    AmbiguousBaseModel {
        model: String,
        candidates: Vec<String>,
    },

    #[error("{model} extends {base:?}, but no model with that name has been declared")]
    UnknownBaseModel { model: String, base: String },

    #[error(
        "{model}.{attr} uses a backref; lazy mapped models must declare both sides with \
         back_populates"
    )]
    LazyBackref { model: String, attr: String },

    #[error("{model} sets `__abstract__` directly; use `abstract = true` in its Meta instead")]
    AbstractMarker { model: String },

    #[error("{stage} hook of model {model} failed: {source}")]
    ModelHook {
        model: String,
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    // -- templates ---------------------------------------------------------
    #[error(transparent)]
    Template(#[from] TemplateError),

    // -- command line ------------------------------------------------------
    #[error("no such command {path:?}")]
    UnknownCommand { path: String },

    #[error("command {path:?} failed: {source}")]
    Command {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("aborted by user")]
    Cancelled,
}

impl Error {
    /// Process exit code for this error when it escapes the command line
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::UnknownCommand { .. } => 2,
            _ => 1,
        }
    }
}
