//! Modular web-application framework core
//!
//! An application is composed from bundles listed in a project config.
//! [`factory::AppFactory`] loads them in order and runs the boot hooks that
//! merge their configuration, initialize extensions, assemble the command
//! table and map their models. [`template`] holds the preprocessor used by
//! the project scaffolder.

pub mod app;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod env;
pub mod error;
pub mod factory;
pub mod graph;
pub mod hooks;
pub mod module;
pub mod orm;
pub mod scaffold;
pub mod template;

pub use app::App;
pub use error::{Error, Result};
