//! Project scaffolding
//!
//! Renders a tree of preprocessor templates into a destination directory.
//! Every file goes through [`Template`]; files whose output is blank are
//! not written at all, which is how optional parts of a project drop out.

use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::Value;
use walkdir::WalkDir;

use crate::{
    error::{Error, Result},
    template::{Context, Template},
};

/// The starter project shipped with the binary, as (relative path, template)
const STARTER: &[(&str, &str)] = &[
    ("unchained.toml", include_str!("starter/unchained.toml")),
    ("README.md", include_str!("starter/README.md")),
    ("app/bundle.toml", include_str!("starter/app/bundle.toml")),
    ("app/config.toml", include_str!("starter/app/config.toml")),
    ("app/templates/index.html", include_str!("starter/app/templates/index.html")),
    ("api/bundle.toml", include_str!("starter/api/bundle.toml")),
];

/// Defaults for every flag the starter templates read
pub fn starter_context(project_name: &str) -> Context {
    let mut context = Context::new();
    context.insert("project_name".to_owned(), Value::from(project_name));
    context.insert("api".to_owned(), Value::Bool(false));
    context.insert("session".to_owned(), Value::Bool(false));
    context.insert("models".to_owned(), Value::Bool(true));
    context.insert("static_url_path".to_owned(), Value::from(""));
    context
}

/// Whether `path` is missing or an empty directory
pub fn is_empty_dir(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    let mut entries = std::fs::read_dir(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(entries.next().is_none())
}

fn write_output(dest: &Path, rel: &Path, text: &str) -> Result<PathBuf> {
    let target = dest.join(rel);
    let io_error = |source| Error::Io {
        path: target.clone(),
        source,
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    std::fs::write(&target, text).map_err(io_error)?;
    debug!("Wrote {}", target.display());
    Ok(target)
}

/// Render the embedded starter project into `dest`
pub fn render_starter(dest: &Path, context: &Context) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (rel, text) in STARTER {
        let rel = Path::new(rel);
        let output = Template::parse_named(text, rel)?.render(context)?;
        if output.trim().is_empty() {
            debug!("Skipping {}: rendered empty", rel.display());
            continue;
        }
        written.push(write_output(dest, rel, &output)?);
    }
    info!("Rendered {} file(s) into {}", written.len(), dest.display());
    Ok(written)
}

/// Render every file under `src` into the same relative path under `dest`
pub fn render_tree(src: &Path, dest: &Path, context: &Context) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|err| Error::Io {
            path: err.path().unwrap_or(src).to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let output = Template::parse_file(entry.path())?.render(context)?;
        if output.trim().is_empty() {
            debug!("Skipping {}: rendered empty", rel.display());
            continue;
        }
        written.push(write_output(dest, rel, &output)?);
    }
    info!(
        "Rendered {} file(s) from {} into {}",
        written.len(),
        src.display(),
        dest.display()
    );
    Ok(written)
}
