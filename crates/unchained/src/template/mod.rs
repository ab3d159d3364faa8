//! Conditional template preprocessor
//!
//! Templates are plain text with `if` / `elif` / `else` / `endif`
//! directives hidden in comment-like markers, so the unrendered file stays
//! valid in its own language:
//!
//! ```text
//! #! if session:
//! SESSION_TYPE = "filesystem"
//! #! endif
//! DEBUG = #!(if debug: True else: False)
//! ```
//!
//! HTML templates spell the same directives `{#! if x: #}` and
//! `{#!(if x: a else: b)#}`. Conditions use a small expression language
//! (see [`expr`]) evaluated against a [`Context`]; remaining text goes
//! through `{{ ... }}` substitution.

pub mod expr;
mod parser;
mod token;

use std::{
    fmt,
    path::{Path, PathBuf},
};

use handlebars::Handlebars;
use log::trace;
use serde_json::Value;

pub use token::{Child, IfToken, InlinePart, InlineToken, Rendered, Token};

use crate::error::{Error, Result};

/// Values visible to conditions and `{{ }}` substitution
pub type Context = serde_json::Map<String, Value>;

/// A template failed to parse or render
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}:{line}: {kind}", display_path(path.as_deref()))]
pub struct TemplateError {
    pub path: Option<PathBuf>,
    /// 1-based
    pub line: usize,
    pub kind: TemplateErrorKind,
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| "<template>".to_owned(), |p| p.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateErrorKind {
    #[error("`{directive}` without a matching `if`")]
    UnmatchedDirective { directive: &'static str },

    #[error("`if` opened on line {opened} is never closed by `endif`")]
    UnclosedIf { opened: usize },

    #[error("malformed directive: {0}")]
    MalformedDirective(String),

    #[error("malformed inline directive: {0}")]
    MalformedInline(String),

    #[error("error evaluating `{condition}`: {message}")]
    Evaluation { condition: String, message: String },

    #[error("substitution failed: {0}")]
    Render(String),
}

/// Which directive markers a template uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// `#! if x:` and `#!(if x: a)`
    #[default]
    Default,
    /// `{#! if x: #}` and `{#!(if x: a)#}`
    Html,
}

impl Dialect {
    /// `.html` / `.htm` files use the HTML markers
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm") => {
                Self::Html
            }
            _ => Self::Default,
        }
    }
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    path: Option<PathBuf>,
    dialect: Dialect,
    root: Token,
}

impl Template {
    pub fn parse(text: &str, dialect: Dialect) -> Result<Self, TemplateError> {
        Self::parse_inner(text, dialect, None)
    }

    /// Parse text that came from `path`; errors and dialect refer to it
    pub fn parse_named(text: &str, path: &Path) -> Result<Self, TemplateError> {
        Self::parse_inner(text, Dialect::for_path(path), Some(path))
    }

    pub fn parse_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse_named(&text, path)?)
    }

    fn parse_inner(text: &str, dialect: Dialect, path: Option<&Path>) -> Result<Self, TemplateError> {
        let root = parser::Parser::new(text, dialect, path).parse()?;
        trace!("Parsed template {}: {root:#?}", display_path(path));
        Ok(Self {
            path: path.map(Path::to_path_buf),
            dialect,
            root,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn root(&self) -> &Token {
        &self.root
    }

    /// Render against `context`; a template whose every line was excluded
    /// renders to the empty string
    pub fn render(&self, context: &Context) -> Result<String, TemplateError> {
        let mut engine = Handlebars::new();
        engine.register_escape_fn(handlebars::no_escape);
        let renderer = token::Renderer {
            context,
            engine,
            path: self.path.as_deref(),
        };
        match self.root.render(&renderer)? {
            Rendered::Text(text) => Ok(text),
            Rendered::Excluded => Ok(String::new()),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::Html => "html",
        })
    }
}

/// Parse and render in one go
pub fn render_str(text: &str, dialect: Dialect, context: &Context) -> Result<String, TemplateError> {
    Template::parse(text, dialect)?.render(context)
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn ctx(value: Value) -> Context {
        value.as_object().cloned().unwrap_or_default()
    }

    const SESSION: &str = "#! if session:\n    SESSION=\"fs\"\n#! endif\n";

    #[test]
    fn test_block_if() {
        let template = Template::parse(SESSION, Dialect::Default).unwrap();
        assert_eq!(
            template.render(&ctx(json!({"session": true}))).unwrap(),
            "    SESSION=\"fs\"\n"
        );
        assert_eq!(template.render(&ctx(json!({"session": false}))).unwrap(), "");
    }

    #[test]
    fn test_plain_text_round_trips() {
        let text = "line one\n\n  indented {not a var}\n#!/bin/sh\n";
        assert_eq!(render_str(text, Dialect::Default, &Context::new()).unwrap(), text);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let template = Template::parse(SESSION, Dialect::Default).unwrap();
        let context = ctx(json!({"session": true}));
        assert_eq!(
            template.render(&context).unwrap(),
            template.render(&context).unwrap()
        );
    }

    #[test]
    fn test_elif_else_and_surrounding_lines() {
        let text = "\
top
#! if db == 'postgres':
ENGINE = 'pg'
#! elif db == 'sqlite':
ENGINE = 'sqlite'
#! else:
ENGINE = None
#! endif
bottom";
        let template = Template::parse(text, Dialect::Default).unwrap();
        let render = |db: &str| template.render(&ctx(json!({"db": db}))).unwrap();
        assert_eq!(render("sqlite"), "top\nENGINE = 'sqlite'\nbottom");
        assert_eq!(render("mysql"), "top\nENGINE = None\nbottom");
    }

    #[test]
    fn test_excluded_branch_collapses_blank_lines_are_kept() {
        let text = "a\n\n#! if x:\nX\n#! endif\nb";
        assert_eq!(
            render_str(text, Dialect::Default, &ctx(json!({"x": false}))).unwrap(),
            "a\n\nb"
        );
    }

    #[test]
    fn test_statement_branches_keep_indentation() {
        let text = "class Config:\n    #! if debug: DEBUG = True\n    #! else: DEBUG = False\n";
        assert_eq!(
            render_str(text, Dialect::Default, &ctx(json!({"debug": false}))).unwrap(),
            "class Config:\n    DEBUG = False\n"
        );
    }

    #[test]
    fn test_inline_directives() {
        let text = "BUNDLES = [#!(if api: 'api', )#!(if mail: 'mail', )'app']";
        assert_eq!(
            render_str(text, Dialect::Default, &ctx(json!({"api": true, "mail": false}))).unwrap(),
            "BUNDLES = ['api', 'app']"
        );
        let nested = "x = #!(if a: #!(if b: 'ab' else: 'a') else: 'none')";
        assert_eq!(
            render_str(nested, Dialect::Default, &ctx(json!({"a": true, "b": false}))).unwrap(),
            "x = 'a'"
        );
    }

    #[test]
    fn test_html_dialect() {
        let text = "<ul>\n{#! if user: #}\n  <li>{{ user }}</li>\n{#! endif #}\n</ul>\n<p class=\"{#!(if active: on else: off)#}\"></p>";
        let path = Path::new("templates/nav.html");
        let template = Template::parse_named(text, path).unwrap();
        assert_eq!(template.dialect(), Dialect::Html);
        assert_snapshot!(
            template.render(&ctx(json!({"user": "<b>ann</b>", "active": true}))).unwrap(),
            @r#"
        <ul>
          <li><b>ann</b></li>
        </ul>
        <p class="on"></p>
        "#
        );
    }

    #[test]
    fn test_substitution() {
        let text = "name = \"{{ project_name }}\"\n#! if session: kind = \"{{ session }}\"";
        assert_eq!(
            render_str(
                text,
                Dialect::Default,
                &ctx(json!({"project_name": "shop", "session": "redis"}))
            )
            .unwrap(),
            "name = \"shop\"\nkind = \"redis\""
        );
    }

    #[test]
    fn test_errors_name_file_and_line() {
        let path = Path::new("app/config.py");
        let err = Template::parse_named("ok\n#! if x:\nX\n", path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "app/config.py:2: `if` opened on line 2 is never closed by `endif`"
        );

        let template = Template::parse_named("a\n#! if missing:\nX\n#! endif", path).unwrap();
        let err = template.render(&Context::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "app/config.py:2: error evaluating `missing`: name 'missing' is not defined"
        );

        let err = Template::parse("#! for x in y:", Dialect::Default).unwrap_err();
        assert_eq!(err.to_string(), "<template>:1: malformed directive: for x in y:");
    }
}
